//! Content-addressed blob store and binary delta engine (components C2, C3).

pub mod delta;
pub mod store;

pub use delta::{adler32, DeltaError};
pub use store::{BlobStore, ObjectError, PutFlags, PutOutcome, Receipt, Rid, StoreConfig};
