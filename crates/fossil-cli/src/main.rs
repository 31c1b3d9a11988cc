//! Thin CLI front-end over `fossil-repo`. Every subcommand opens a
//! [`fossil_repo::Repository`], performs one operation, and maps the
//! result to the exit codes of spec §6: 0 success, 1 fatal error, 2 usage
//! error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use fossil_repo::{Repository, RepoConfig, UserIdentity};

#[derive(Parser)]
#[command(name = "fossil", about = "Distributed version control core")]
struct Cli {
    /// Path to the repository database directory.
    #[arg(long, default_value = "./.fossil-db")]
    repo: PathBuf,

    /// Working directory for checkout operations.
    #[arg(long, default_value = ".")]
    checkout: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show which tracked files have local edits.
    Status,
    /// Resolve a name (hash prefix, tag, branch, tip, date) to a RID.
    Resolve { name: String },
    /// Write checked-in content for tracked files back to disk.
    Update,
    /// Discard local edits, restoring checked-in content.
    Revert { paths: Vec<String> },
    /// Remove every tracked file from disk and clear working-tree state.
    Uncheckout,
    /// List tags carried by a resolved artifact.
    Tags { name: String },
}

fn run() -> Result<(), fossil_repo::Error> {
    let cli = Cli::parse();
    let repo = Repository::open(
        &cli.repo,
        cli.checkout.clone(),
        RepoConfig::default(),
        UserIdentity {
            login: std::env::var("USER").unwrap_or_else(|_| "anonymous".to_string()),
        },
    )?;

    match cli.command {
        Command::Status => {
            repo.checkout.signature_check(&repo.store, false)?;
            for row in repo.checkout.tracked_files()? {
                println!("{:?}\t{}", row.chnged, row.path);
            }
        }
        Command::Resolve { name } => {
            let rid = repo.resolve(&name, None)?;
            let hash = repo.store.hash_of(rid)?;
            println!("{}", hash.to_hex());
        }
        Command::Update => {
            repo.checkout.materialize_to_disk(&repo.store)?;
        }
        Command::Revert { paths } => {
            repo.require_clean_tree().ok();
            repo.checkout.revert(&repo.store, &paths)?;
        }
        Command::Uncheckout => {
            repo.checkout.uncheckout(&repo.config.empty_dirs)?;
        }
        Command::Tags { name } => {
            let rid = repo.resolve(&name, None)?;
            for row in repo.tags.tags_of(rid)? {
                println!("{}\t{:?}\t{:?}", row.tag, row.tag_type, row.value);
            }
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            eprintln!("fossil: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
