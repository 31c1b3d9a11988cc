//! Repository configuration, loaded the way the teacher's `knhk-config`
//! loads settings: built-in defaults, then an optional TOML file, then
//! environment variable overrides, in that precedence order.

use std::path::Path;

use fossil_hash::HashPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {field}: {value:?}")]
    Invalid { field: &'static str, value: String },
}

/// `manifest` setting's three independent on-disk artifacts (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ManifestFlags {
    #[serde(default)]
    pub manifest: bool,
    #[serde(default)]
    pub uuid: bool,
    #[serde(default)]
    pub tags: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RepoConfig {
    pub hash_policy: HashPolicyConfig,
    pub manifest: ManifestFlags,
    pub case_sensitive: bool,
    /// Directory names to keep (or recreate) in the working tree even when
    /// empty of tracked files (spec §4.6's `empty-dirs` setting).
    pub empty_dirs: Vec<String>,
    pub delta_max_depth: u32,
    pub gmerge_command: Option<String>,
}

/// A TOML-friendly mirror of [`fossil_hash::HashPolicy`] (the enum itself
/// has no serde derive since `fossil-hash` has no reason to depend on a
/// config format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashPolicyConfig {
    AcceptBoth,
    Sha1Only,
    ShunSha1,
}

impl From<HashPolicyConfig> for HashPolicy {
    fn from(cfg: HashPolicyConfig) -> HashPolicy {
        match cfg {
            HashPolicyConfig::AcceptBoth => HashPolicy::AcceptBoth,
            HashPolicyConfig::Sha1Only => HashPolicy::Sha1Only,
            HashPolicyConfig::ShunSha1 => HashPolicy::ShunSha1,
        }
    }
}

impl Default for RepoConfig {
    fn default() -> Self {
        RepoConfig {
            hash_policy: HashPolicyConfig::AcceptBoth,
            manifest: ManifestFlags::default(),
            case_sensitive: true,
            empty_dirs: Vec::new(),
            delta_max_depth: 32,
            gmerge_command: None,
        }
    }
}

impl RepoConfig {
    pub fn from_file(path: &Path) -> Result<RepoConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Load defaults, optionally overlay a `.fslconfig` file beside the
    /// repository, then apply `FOSSIL_*` environment overrides.
    pub fn load(fslconfig_path: Option<&Path>) -> Result<RepoConfig, ConfigError> {
        let mut config = match fslconfig_path {
            Some(path) if path.exists() => RepoConfig::from_file(path)?,
            _ => RepoConfig::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("FOSSIL_HASH_POLICY") {
            self.hash_policy = match v.as_str() {
                "accept-both" => HashPolicyConfig::AcceptBoth,
                "sha1-only" => HashPolicyConfig::Sha1Only,
                "shun-sha1" => HashPolicyConfig::ShunSha1,
                other => {
                    return Err(ConfigError::Invalid {
                        field: "hash_policy",
                        value: other.to_string(),
                    })
                }
            };
        }
        if let Ok(v) = std::env::var("FOSSIL_CASE_SENSITIVE") {
            self.case_sensitive = parse_bool("case_sensitive", &v)?;
        }
        if let Ok(v) = std::env::var("FOSSIL_EMPTY_DIRS") {
            self.empty_dirs = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(v) = std::env::var("FOSSIL_DELTA_MAX_DEPTH") {
            self.delta_max_depth = v.parse().map_err(|_| ConfigError::Invalid {
                field: "delta_max_depth",
                value: v,
            })?;
        }
        if let Ok(v) = std::env::var("FOSSIL_GMERGE_COMMAND") {
            self.gmerge_command = Some(v);
        }
        Ok(())
    }
}

fn parse_bool(field: &'static str, v: &str) -> Result<bool, ConfigError> {
    match v {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ConfigError::Invalid {
            field,
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_accept_both_hash_algorithms() {
        let config = RepoConfig::default();
        assert_eq!(config.hash_policy, HashPolicyConfig::AcceptBoth);
        assert_eq!(config.delta_max_depth, 32);
    }

    #[test]
    fn parses_a_minimal_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".fslconfig");
        std::fs::write(&path, "case-sensitive = false\ndelta-max-depth = 16\n").unwrap();
        let config = RepoConfig::from_file(&path).unwrap();
        assert!(!config.case_sensitive);
        assert_eq!(config.delta_max_depth, 16);
    }

    #[test]
    fn parses_a_list_valued_empty_dirs_setting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".fslconfig");
        std::fs::write(&path, "empty-dirs = [\"build\", \"dist\"]\n").unwrap();
        let config = RepoConfig::from_file(&path).unwrap();
        assert_eq!(config.empty_dirs, vec!["build".to_string(), "dist".to_string()]);
    }

    #[test]
    fn empty_dirs_env_override_splits_on_comma() {
        std::env::set_var("FOSSIL_EMPTY_DIRS", "build, dist");
        let mut config = RepoConfig::default();
        config.apply_env_overrides().unwrap();
        std::env::remove_var("FOSSIL_EMPTY_DIRS");
        assert_eq!(config.empty_dirs, vec!["build".to_string(), "dist".to_string()]);
    }

    #[test]
    fn rejects_an_invalid_hash_policy_override() {
        std::env::set_var("FOSSIL_HASH_POLICY", "bogus");
        let mut config = RepoConfig::default();
        let result = config.apply_env_overrides();
        std::env::remove_var("FOSSIL_HASH_POLICY");
        assert!(matches!(result, Err(ConfigError::Invalid { field: "hash_policy", .. })));
    }
}
