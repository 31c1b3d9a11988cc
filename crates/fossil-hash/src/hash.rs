//! Content hashes (C1).
//!
//! A [`Hash`] is the sum type of the two digest algorithms a repository may
//! accept: SHA-1 (40 hex chars, legacy) and SHA3-256 (64 hex chars, current).
//! Equality and ordering are defined over the hex representation, matching
//! how the repository compares and sorts artifact identifiers everywhere
//! else (prefix lookup, `ORDER BY uuid`-style listings).

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::Digest as _;
use sha3::Sha3_256;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    #[error("hash string has invalid length {0} (expected 40 or 64 hex chars)")]
    BadLength(usize),
    #[error("hash string contains non-hex characters")]
    NotHex,
}

/// The two digest algorithms a repository may produce or accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgo {
    Sha1,
    Sha3_256,
}

impl HashAlgo {
    pub fn hex_len(self) -> usize {
        match self {
            HashAlgo::Sha1 => 40,
            HashAlgo::Sha3_256 => 64,
        }
    }
}

/// A content hash, identifying an artifact.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub enum Hash {
    Sha1([u8; 20]),
    Sha3_256([u8; 32]),
}

impl Hash {
    pub fn algo(&self) -> HashAlgo {
        match self {
            Hash::Sha1(_) => HashAlgo::Sha1,
            Hash::Sha3_256(_) => HashAlgo::Sha3_256,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Hash::Sha1(b) => b.as_slice(),
            Hash::Sha3_256(b) => b.as_slice(),
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes())
    }

    /// Parse a full hex hash. The algorithm is inferred from the string
    /// length, per spec: 40 hex chars is SHA-1, 64 is SHA3-256.
    pub fn from_hex(s: &str) -> Result<Hash, HashError> {
        let raw = hex::decode(s).map_err(|_| HashError::NotHex)?;
        match raw.len() {
            20 => {
                let mut b = [0u8; 20];
                b.copy_from_slice(&raw);
                Ok(Hash::Sha1(b))
            }
            32 => {
                let mut b = [0u8; 32];
                b.copy_from_slice(&raw);
                Ok(Hash::Sha3_256(b))
            }
            n => Err(HashError::BadLength(n)),
        }
    }
}

impl PartialEq for Hash {
    fn eq(&self, other: &Self) -> bool {
        self.to_hex() == other.to_hex()
    }
}

impl std::hash::Hash for Hash {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_hex().hash(state);
    }
}

impl PartialOrd for Hash {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Hash {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_hex().cmp(&other.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Compute the content hash of `bytes` under the given algorithm.
///
/// Invariant (testable property #1): `hash(bytes) == hash(bytes)` for
/// repeated calls with the same input and algorithm.
pub fn hash(bytes: &[u8], algo: HashAlgo) -> Hash {
    match algo {
        HashAlgo::Sha1 => {
            let mut h = Sha1::new();
            h.update(bytes);
            let digest = h.finalize();
            let mut out = [0u8; 20];
            out.copy_from_slice(&digest);
            Hash::Sha1(out)
        }
        HashAlgo::Sha3_256 => {
            let mut h = Sha3_256::new();
            h.update(bytes);
            let digest = h.finalize();
            let mut out = [0u8; 32];
            out.copy_from_slice(&digest);
            Hash::Sha3_256(out)
        }
    }
}

/// MD5 of `bytes`. Used only for the Z-card trailing checksum and the
/// aggregate R-card checksum (spec §4.4, §4.7) — both are wire-format
/// constants inherited from the original tool and must not be swapped
/// for a stronger digest even though MD5 is not used for content
/// addressing anywhere else.
pub fn md5_hex(bytes: &[u8]) -> String {
    use md5::{Digest, Md5};
    let digest = Md5::digest(bytes);
    hex::encode(digest)
}

/// The repository-wide policy controlling which hash algorithms are
/// currently acceptable for new artifacts, and which are shunned by
/// policy (spec §4.1, §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashPolicy {
    /// Accept and produce both SHA-1 and SHA3-256 artifacts.
    AcceptBoth,
    /// Only SHA-1 artifacts are produced or accepted (legacy repositories).
    Sha1Only,
    /// SHA-1 is actively banned; only SHA3-256 is accepted.
    ShunSha1,
}

impl HashPolicy {
    /// True if `algo` is forbidden by this policy.
    pub fn shuns(self, algo: HashAlgo) -> bool {
        matches!((self, algo), (HashPolicy::ShunSha1, HashAlgo::Sha1))
    }

    /// The algorithm newly-created artifacts should hash with under this
    /// policy.
    pub fn preferred_algo(self) -> HashAlgo {
        match self {
            HashPolicy::Sha1Only => HashAlgo::Sha1,
            HashPolicy::AcceptBoth | HashPolicy::ShunSha1 => HashAlgo::Sha3_256,
        }
    }
}
