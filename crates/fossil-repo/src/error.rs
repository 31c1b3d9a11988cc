//! The aggregate error type (spec §7): every lower-layer error folds into
//! one enum here via `#[from]`, plus the cross-cutting kinds spec §7 names
//! directly and that no single crate below owns.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Hash(#[from] fossil_hash::HashError),
    #[error(transparent)]
    Object(#[from] fossil_objects::ObjectError),
    #[error(transparent)]
    Artifact(#[from] fossil_artifact::ArtifactError),
    #[error(transparent)]
    Tag(#[from] fossil_tag::TagError),
    #[error(transparent)]
    Checkout(#[from] fossil_checkout::CheckoutError),
    #[error(transparent)]
    Merge(#[from] fossil_merge::MergeError),
    #[error(transparent)]
    Purge(#[from] fossil_purge::PurgeError),
    #[error(transparent)]
    Sync(#[from] fossil_sync::SyncError),
    #[error(transparent)]
    Resolve(#[from] fossil_resolve::ResolveError),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("working tree has uncommitted changes")]
    WorkingTreeDirty,
    #[error("operation cancelled")]
    Cancelled,
    #[error("database error: {0}")]
    DbError(#[from] sled::Error),
}

impl Error {
    /// Map to the CLI exit codes of spec §6: 0 success (not representable
    /// here, callers short-circuit before constructing an `Error`), 1
    /// fatal error, 2 usage error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Resolve(fossil_resolve::ResolveError::NotFound(_))
            | Error::Resolve(fossil_resolve::ResolveError::Ambiguous(_))
            | Error::Config(_) => 2,
            _ => 1,
        }
    }
}
