//! Repository context: the `Repository` struct ties every lower-layer
//! crate together the way the teacher's services wire a shared context at
//! entry and drop it at exit (spec §9's "replace global mutable state with
//! an explicitly-passed context").

pub mod config;
pub mod error;
pub mod hook;

use std::path::{Path, PathBuf};

use fossil_artifact::Index;
use fossil_checkout::Checkout;
use fossil_objects::{BlobStore, Rid, StoreConfig};
use fossil_purge::PurgeEngine;
use fossil_resolve::{resolve, ResolveContext, TypeHint};
use fossil_sync::CancelToken;
use fossil_tag::TagEngine;

pub use config::{ConfigError, RepoConfig};
pub use error::Error;
pub use hook::{HookDef, HookType};

/// The caller-visible identity behind a transaction, analogous to `g.zLogin`
/// in the original — no authentication here, just the string recorded on
/// `U`-cards and event rows.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub login: String,
}

/// Everything a command needs: the blob store, the derived indexes, the
/// working-tree state, the purge graveyard, a repository-wide cancellation
/// token, the active user, and configuration. Constructed once at command
/// entry and dropped at command exit (spec §9).
pub struct Repository {
    pub store: BlobStore,
    pub index: Index,
    pub tags: TagEngine,
    pub checkout: Checkout,
    pub purge: PurgeEngine,
    pub config: RepoConfig,
    pub user: UserIdentity,
    pub hooks: Vec<HookDef>,
    pub cancel: CancelToken,
    repository_path: PathBuf,
}

impl Repository {
    /// Open (creating if absent) the repository database at `db_path`,
    /// rooted at `checkout_root` for working-tree operations.
    pub fn open(
        db_path: &Path,
        checkout_root: impl Into<PathBuf>,
        config: RepoConfig,
        user: UserIdentity,
    ) -> Result<Self, Error> {
        let db = sled::open(db_path)?;
        let store_config = StoreConfig {
            hash_policy: config.hash_policy.into(),
            max_delta_depth: config.delta_max_depth,
        };
        let store = BlobStore::open(&db_path.join("blobs"), store_config)?;
        let index = Index::open(&db)?;
        let tags = TagEngine::open(&db)?;
        let checkout = Checkout::open(&db, checkout_root)?;
        let purge = PurgeEngine::open(&db)?;

        Ok(Repository {
            store,
            index,
            tags,
            checkout,
            purge,
            config,
            user,
            hooks: Vec::new(),
            cancel: CancelToken::new(),
            repository_path: db_path.to_path_buf(),
        })
    }

    /// Resolve a user-supplied name (hash, prefix, tag, branch, `tip`, a
    /// date, ...) to a single RID.
    pub fn resolve(&self, input: &str, hint: Option<TypeHint>) -> Result<Rid, Error> {
        let current = self
            .checkout
            .tracked_files()
            .ok()
            .and_then(|rows| rows.first().and_then(|r| r.mrid).map(Rid));
        let ctx = ResolveContext {
            store: &self.store,
            index: &self.index,
            tags: &self.tags,
            current_checkout: current,
        };
        Ok(resolve(&ctx, input, hint)?)
    }

    /// Refuse to proceed if the working tree has pending edits, the way
    /// commands requiring a clean tree guard themselves (spec §7's
    /// `WorkingTreeDirty`).
    pub fn require_clean_tree(&self) -> Result<(), Error> {
        self.checkout.signature_check(&self.store, false)?;
        for row in self.checkout.tracked_files()? {
            if row.chnged != fossil_checkout::ChangeState::Unchanged {
                return Err(Error::WorkingTreeDirty);
            }
        }
        Ok(())
    }

    /// Run every hook of `kind` against the given artifact hashes, logging
    /// failures rather than propagating them (spec's best-effort hook
    /// semantics — see [`hook::run_hooks`]).
    pub fn run_hooks(&self, kind: HookType, artifact_hashes: &[String]) {
        let repo_path = self.repository_path.display().to_string();
        for outcome in hook::run_hooks(&self.hooks, kind, &repo_path, artifact_hashes) {
            if !outcome.succeeded {
                tracing::warn!(cmd = %outcome.cmd, "hook did not succeed");
            }
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_a_fresh_repository_and_resolves_tip_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(
            &dir.path().join("repo.db"),
            dir.path().join("checkout"),
            RepoConfig::default(),
            UserIdentity { login: "alice".into() },
        )
        .unwrap();
        let result = repo.resolve("tip", None);
        assert!(result.is_err());
    }

    #[test]
    fn clean_tree_check_passes_with_no_tracked_files() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(
            &dir.path().join("repo.db"),
            dir.path().join("checkout"),
            RepoConfig::default(),
            UserIdentity { login: "alice".into() },
        )
        .unwrap();
        assert!(repo.require_clean_tree().is_ok());
    }
}
