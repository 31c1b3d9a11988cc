//! External command hook runtime (C11), grounded on `hook.c`.
//!
//! Hooks run synchronously after their triggering transaction commits. A
//! nonzero exit status is logged as a warning, never escalated to an
//! error — hooks are best-effort notifications, not participants in the
//! transaction they observe.

use std::process::Command;

use fossil_merge::string_subst;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookType {
    AfterReceive,
    BeforeCommit,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDef {
    #[serde(rename = "type")]
    pub kind: HookType,
    pub cmd: String,
    /// Run order among hooks of the same type, ascending.
    pub seq: i32,
}

/// Substitute `%R` (repository path) and `%A` (space-joined artifact hash
/// list) into a hook command template (`hook.c`'s `hook_subst`, minus
/// `%F` — this crate has no notion of "the fossil executable path").
pub fn build_hook_command(template: &str, repository_path: &str, artifact_hashes: &[String]) -> String {
    let joined = artifact_hashes.join(" ");
    string_subst(template, &[("%R", repository_path), ("%A", &joined)])
}

#[derive(Debug, Clone)]
pub struct HookOutcome {
    pub cmd: String,
    pub succeeded: bool,
}

/// Run every hook of `kind`, in ascending `seq` order, substituting `%R`/
/// `%A`. Failures are collected, not propagated: the caller logs them as
/// warnings and continues (spec's best-effort hook semantics).
pub fn run_hooks(
    hooks: &[HookDef],
    kind: HookType,
    repository_path: &str,
    artifact_hashes: &[String],
) -> Vec<HookOutcome> {
    let mut matching: Vec<&HookDef> = hooks.iter().filter(|h| h.kind == kind).collect();
    matching.sort_by_key(|h| h.seq);

    matching
        .into_iter()
        .map(|hook| {
            let cmd = build_hook_command(&hook.cmd, repository_path, artifact_hashes);
            let succeeded = match Command::new("sh").arg("-c").arg(&cmd).status() {
                Ok(status) => status.success(),
                Err(e) => {
                    tracing::warn!(cmd = %cmd, error = %e, "failed to spawn hook");
                    false
                }
            };
            if !succeeded {
                tracing::warn!(cmd = %cmd, "hook exited with a nonzero status");
            }
            HookOutcome { cmd, succeeded }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_repository_path_and_artifact_list() {
        let cmd = build_hook_command(
            "notify.sh %R %A",
            "/repos/main.fossil",
            &["abc123".to_string(), "def456".to_string()],
        );
        assert_eq!(cmd, "notify.sh /repos/main.fossil abc123 def456");
    }

    #[test]
    fn hooks_run_in_ascending_seq_order() {
        let hooks = vec![
            HookDef { kind: HookType::AfterReceive, cmd: "echo second".into(), seq: 10 },
            HookDef { kind: HookType::AfterReceive, cmd: "echo first".into(), seq: 0 },
            HookDef { kind: HookType::BeforeCommit, cmd: "echo skipped".into(), seq: 0 },
        ];
        let outcomes = run_hooks(&hooks, HookType::AfterReceive, "/tmp/repo", &[]);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].cmd, "echo first");
        assert_eq!(outcomes[1].cmd, "echo second");
        assert!(outcomes.iter().all(|o| o.succeeded));
    }
}
