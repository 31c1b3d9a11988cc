//! Content-addressed blob store (C2).
//!
//! Grounded on the teacher's `LockchainStorage` (sled-backed, bincode row
//! encoding, `thiserror` error enum with `#[from]` conversions): here the
//! sled database plays the role the spec's §6 "repository file" schema
//! describes relationally (`blob`, `delta`, `rcvfrom`, `private`, `unsent`,
//! `unclustered`, `shun`). Each named relational table becomes one sled
//! tree; this is a documented design decision (see `DESIGN.md`), not a
//! literal SQL engine, since the teacher's persistence choice is an
//! embedded KV store rather than SQLite.

use std::collections::HashMap;

use fossil_hash::{hash as hash_bytes, Hash, HashAlgo, HashPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::delta;

/// A local, repository-private artifact identifier (spec GLOSSARY: RID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid(pub u64);

#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("no artifact with rid {0:?}")]
    NotFound(Rid),
    #[error("hash prefix {0:?} does not resolve to any stored artifact")]
    PrefixNotFound(String),
    #[error("hash prefix {0:?} is ambiguous")]
    Ambiguous(String),
    #[error("artifact {0:?} is a phantom: bytes are not present")]
    Phantom(Rid),
    #[error("delta chain for {0:?} exceeds the configured depth limit")]
    ChainTooDeep(Rid),
    #[error("delta error: {0}")]
    Delta(#[from] crate::delta::DeltaError),
    #[error("cannot undelta {0:?}: its source is itself a delta with no literal basis")]
    NoLiteralBasis(Rid),
}

bitflags_lite::bitflags! {
    /// Flags controlling `put` (spec §4.2).
    pub struct PutFlags: u8 {
        const NONE = 0;
        const PRIVATE = 1 << 0;
    }
}

mod bitflags_lite {
    /// A tiny bitflags shim. The teacher's workspace does not depend on the
    /// `bitflags` crate anywhere reachable from the crates we adapted, and
    /// `PutFlags` only ever needs one bit today; a hand-rolled newtype over
    /// `u8` keeps the public API flag-shaped without adding a dependency
    /// whose only caller is this one struct.
    macro_rules! bitflags {
        ($(#[$meta:meta])* pub struct $name:ident : $ty:ty { $(const $flag:ident = $val:expr;)* }) => {
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub struct $name($ty);
            impl $name {
                $(pub const $flag: $name = $name($val);)*
                pub fn contains(&self, other: $name) -> bool {
                    (self.0 & other.0) == other.0
                }
            }
            impl std::ops::BitOr for $name {
                type Output = $name;
                fn bitor(self, rhs: $name) -> $name { $name(self.0 | rhs.0) }
            }
        };
    }
    pub(crate) use bitflags;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Content {
    Literal(Vec<u8>),
    Delta { source: Rid, bytes: Vec<u8> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlobRecord {
    hash_hex: String,
    /// Uncompressed size of the artifact, independent of delta encoding.
    size: u64,
    content: Option<Content>,
    depth: u32,
    private: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub rid: Rid,
    pub uid: String,
    pub ip: String,
    pub mtime: i64,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub hash_policy: HashPolicy,
    pub max_delta_depth: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            hash_policy: HashPolicy::AcceptBoth,
            max_delta_depth: 32,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// Newly stored artifact.
    Stored { rid: Rid, hash_hex: String },
    /// The hash was already known; no second store occurred (spec §4.2:
    /// `put` is idempotent).
    AlreadyPresent { rid: Rid, hash_hex: String },
    /// The hash is shunned; bytes were discarded and no RID was assigned.
    Shunned { hash_hex: String },
    /// The hash's algorithm is forbidden by the active policy.
    PolicyRejected { hash_hex: String },
}

pub struct BlobStore {
    db: sled::Db,
    blobs: sled::Tree,
    hash_index: sled::Tree,
    receipts: sled::Tree,
    shunned: sled::Tree,
    unclustered: sled::Tree,
    unsent: sled::Tree,
    phantom: sled::Tree,
    meta: sled::Tree,
    pub config: StoreConfig,
}

impl BlobStore {
    pub fn open(path: &std::path::Path, config: StoreConfig) -> Result<Self, ObjectError> {
        let db = sled::open(path)?;
        Self::from_db(db, config)
    }

    pub fn open_in_memory(config: StoreConfig) -> Result<Self, ObjectError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, config)
    }

    fn from_db(db: sled::Db, config: StoreConfig) -> Result<Self, ObjectError> {
        Ok(BlobStore {
            blobs: db.open_tree("blob")?,
            hash_index: db.open_tree("hash_index")?,
            receipts: db.open_tree("rcvfrom")?,
            shunned: db.open_tree("shun")?,
            unclustered: db.open_tree("unclustered")?,
            unsent: db.open_tree("unsent")?,
            phantom: db.open_tree("phantom")?,
            meta: db.open_tree("meta")?,
            db,
            config,
        })
    }

    fn next_rid(&self) -> Result<Rid, ObjectError> {
        let next = self.meta.update_and_fetch(b"next_rid", |old| {
            let n = old
                .map(|b| u64::from_be_bytes(b.try_into().unwrap_or([0; 8])))
                .unwrap_or(0);
            Some((n + 1).to_be_bytes().to_vec())
        })?;
        let n = next
            .map(|b| u64::from_be_bytes(b.as_ref().try_into().unwrap_or([0; 8])))
            .unwrap_or(1);
        Ok(Rid(n))
    }

    fn load_record(&self, rid: Rid) -> Result<BlobRecord, ObjectError> {
        let raw = self
            .blobs
            .get(rid.0.to_be_bytes())?
            .ok_or(ObjectError::NotFound(rid))?;
        Ok(bincode::deserialize(&raw)?)
    }

    fn save_record(&self, rid: Rid, rec: &BlobRecord) -> Result<(), ObjectError> {
        self.blobs
            .insert(rid.0.to_be_bytes(), bincode::serialize(rec)?)?;
        Ok(())
    }

    pub fn is_shunned(&self, hash_hex: &str) -> Result<bool, ObjectError> {
        Ok(self.shunned.contains_key(hash_hex.as_bytes())?)
    }

    /// Ban a hash permanently (spec §4.8). `scom` is a human-readable shun
    /// comment; `local` marks this as a local-only shun never reported to
    /// peers (SPEC_FULL.md §B).
    pub fn shun(&self, hash_hex: &str, scom: &str, local: bool) -> Result<(), ObjectError> {
        #[derive(Serialize, Deserialize)]
        struct ShunRecord {
            scom: String,
            local: bool,
        }
        self.shunned.insert(
            hash_hex.as_bytes(),
            bincode::serialize(&ShunRecord {
                scom: scom.to_string(),
                local,
            })?,
        )?;
        Ok(())
    }

    /// Store a new artifact (spec §4.2). Idempotent on hash; honors the
    /// shun set and the active hash policy.
    pub fn put(&self, bytes: &[u8], flags: PutFlags) -> Result<PutOutcome, ObjectError> {
        let algo = self.config.hash_policy.preferred_algo();
        let h = hash_bytes(bytes, algo);
        let hash_hex = h.to_hex();

        if self.is_shunned(&hash_hex)? {
            tracing::warn!(hash = %hash_hex, "put() of shunned hash discarded");
            return Ok(PutOutcome::Shunned { hash_hex });
        }
        if self.config.hash_policy.shuns(h.algo()) {
            return Ok(PutOutcome::PolicyRejected { hash_hex });
        }

        if let Some(raw) = self.hash_index.get(hash_hex.as_bytes())? {
            let rid = Rid(u64::from_be_bytes(raw.as_ref().try_into().unwrap_or([0; 8])));
            let mut rec = self.load_record(rid)?;
            if rec.content.is_none() {
                // Phantom upgrade: bytes are now known (spec §4.2).
                rec.content = Some(Content::Literal(bytes.to_vec()));
                rec.size = bytes.len() as u64;
                self.save_record(rid, &rec)?;
                self.phantom.remove(hash_hex.as_bytes())?;
                tracing::debug!(rid = rid.0, "phantom upgraded to concrete content");
            }
            return Ok(PutOutcome::AlreadyPresent { rid, hash_hex });
        }

        let rid = self.next_rid()?;
        let rec = BlobRecord {
            hash_hex: hash_hex.clone(),
            size: bytes.len() as u64,
            content: Some(Content::Literal(bytes.to_vec())),
            depth: 0,
            private: flags.contains(PutFlags::PRIVATE),
        };
        self.save_record(rid, &rec)?;
        self.hash_index
            .insert(hash_hex.as_bytes(), rid.0.to_be_bytes().to_vec())?;
        self.unclustered.insert(rid.0.to_be_bytes(), &[])?;
        self.unsent.insert(rid.0.to_be_bytes(), &[])?;
        Ok(PutOutcome::Stored { rid, hash_hex })
    }

    /// Register a phantom: a hash we know we need but whose bytes we do
    /// not have yet (spec §3, §4.9).
    pub fn put_phantom(&self, hash: &Hash) -> Result<Rid, ObjectError> {
        let hash_hex = hash.to_hex();
        if let Some(raw) = self.hash_index.get(hash_hex.as_bytes())? {
            return Ok(Rid(u64::from_be_bytes(raw.as_ref().try_into().unwrap_or([0; 8]))));
        }
        let rid = self.next_rid()?;
        let rec = BlobRecord {
            hash_hex: hash_hex.clone(),
            size: 0,
            content: None,
            depth: 0,
            private: false,
        };
        self.save_record(rid, &rec)?;
        self.hash_index
            .insert(hash_hex.as_bytes(), rid.0.to_be_bytes().to_vec())?;
        self.phantom.insert(hash_hex.as_bytes(), &[])?;
        Ok(rid)
    }

    pub fn is_phantom(&self, rid: Rid) -> Result<bool, ObjectError> {
        Ok(self.load_record(rid)?.content.is_none())
    }

    /// Materialize an artifact by walking its delta chain (spec §4.2).
    pub fn get(&self, rid: Rid) -> Result<Vec<u8>, ObjectError> {
        let rec = self.load_record(rid)?;
        match rec.content {
            None => Err(ObjectError::Phantom(rid)),
            Some(Content::Literal(bytes)) => Ok(bytes),
            Some(Content::Delta { source, bytes }) => {
                let base = self.get(source)?;
                Ok(delta::apply(&base, &bytes)?)
            }
        }
    }

    pub fn size(&self, rid: Rid) -> Result<u64, ObjectError> {
        Ok(self.load_record(rid)?.size)
    }

    pub fn hash_of(&self, rid: Rid) -> Result<Hash, ObjectError> {
        let rec = self.load_record(rid)?;
        Hash::from_hex(&rec.hash_hex).map_err(|_| ObjectError::NotFound(rid))
    }

    pub fn is_private(&self, rid: Rid) -> Result<bool, ObjectError> {
        Ok(self.load_record(rid)?.private)
    }

    /// Resolve a hash prefix (≥4 hex chars by convention; not enforced
    /// here, the resolver crate enforces the minimum) to exactly one RID.
    pub fn rid_of(&self, prefix: &str) -> Result<Rid, ObjectError> {
        let mut found: Option<Rid> = None;
        for entry in self.hash_index.scan_prefix(prefix.as_bytes()) {
            let (_, raw) = entry?;
            let rid = Rid(u64::from_be_bytes(raw.as_ref().try_into().unwrap_or([0; 8])));
            if found.is_some() && found != Some(rid) {
                return Err(ObjectError::Ambiguous(prefix.to_string()));
            }
            found = Some(rid);
        }
        found.ok_or_else(|| ObjectError::PrefixNotFound(prefix.to_string()))
    }

    /// Rewrite `rid` as a literal, discarding its delta encoding (spec
    /// §4.2). Used before removing an artifact's delta source.
    pub fn undelta(&self, rid: Rid) -> Result<(), ObjectError> {
        let bytes = self.get(rid)?;
        let mut rec = self.load_record(rid)?;
        rec.content = Some(Content::Literal(bytes));
        rec.depth = 0;
        self.save_record(rid, &rec)
    }

    /// Store `rid` as a delta against `source_rid`, if doing so shrinks it
    /// and introduces no cycle (spec §4.2).
    pub fn deltify(&self, rid: Rid, source_rid: Rid) -> Result<bool, ObjectError> {
        if rid == source_rid {
            return Ok(false);
        }
        if self.would_cycle(rid, source_rid)? {
            return Ok(false);
        }
        let source_depth = self.load_record(source_rid)?.depth;
        if source_depth + 1 > self.config.max_delta_depth {
            return Ok(false);
        }
        let target_bytes = self.get(rid)?;
        let source_bytes = self.get(source_rid)?;
        match delta::create(&source_bytes, &target_bytes) {
            Some(delta_bytes) if delta_bytes.len() < target_bytes.len() => {
                let mut rec = self.load_record(rid)?;
                rec.content = Some(Content::Delta {
                    source: source_rid,
                    bytes: delta_bytes,
                });
                rec.depth = source_depth + 1;
                self.save_record(rid, &rec)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Walk from `source_rid` along its own delta chain; if it ever reaches
    /// `rid`, deltifying `rid` against `source_rid` would create a cycle.
    fn would_cycle(&self, rid: Rid, source_rid: Rid) -> Result<bool, ObjectError> {
        let mut cur = source_rid;
        let mut steps = 0u32;
        loop {
            if cur == rid {
                return Ok(true);
            }
            let rec = self.load_record(cur)?;
            match rec.content {
                Some(Content::Delta { source, .. }) => {
                    cur = source;
                    steps += 1;
                    if steps > self.config.max_delta_depth * 2 {
                        return Ok(true);
                    }
                }
                _ => return Ok(false),
            }
        }
    }

    /// The RID a delta-encoded artifact depends on, if any (used by the
    /// purge subsystem to enforce spec §4.8's dependency guard).
    pub fn delta_source(&self, rid: Rid) -> Result<Option<Rid>, ObjectError> {
        match self.load_record(rid)?.content {
            Some(Content::Delta { source, .. }) => Ok(Some(source)),
            _ => Ok(None),
        }
    }

    pub fn record_receipt(&self, receipt: &Receipt) -> Result<(), ObjectError> {
        self.receipts.insert(
            receipt.rid.0.to_be_bytes(),
            bincode::serialize(receipt)?,
        )?;
        Ok(())
    }

    pub fn receipt_of(&self, rid: Rid) -> Result<Option<Receipt>, ObjectError> {
        Ok(self
            .receipts
            .get(rid.0.to_be_bytes())?
            .map(|raw| bincode::deserialize(&raw))
            .transpose()?)
    }

    pub fn mark_clustered(&self, rid: Rid) -> Result<(), ObjectError> {
        self.unclustered.remove(rid.0.to_be_bytes())?;
        Ok(())
    }

    pub fn mark_sent(&self, rid: Rid) -> Result<(), ObjectError> {
        self.unsent.remove(rid.0.to_be_bytes())?;
        Ok(())
    }

    pub fn unclustered_rids(&self) -> Result<Vec<Rid>, ObjectError> {
        let mut out = Vec::new();
        for entry in self.unclustered.iter() {
            let (k, _) = entry?;
            out.push(Rid(u64::from_be_bytes(k.as_ref().try_into().unwrap_or([0; 8]))));
        }
        Ok(out)
    }

    pub fn unsent_rids(&self) -> Result<Vec<Rid>, ObjectError> {
        let mut out = Vec::new();
        for entry in self.unsent.iter() {
            let (k, _) = entry?;
            out.push(Rid(u64::from_be_bytes(k.as_ref().try_into().unwrap_or([0; 8]))));
        }
        Ok(out)
    }

    /// Every RID currently stored (used by crosslink rebuild and tests).
    pub fn all_rids(&self) -> Result<Vec<Rid>, ObjectError> {
        let mut out = Vec::new();
        for entry in self.blobs.iter() {
            let (k, _) = entry?;
            out.push(Rid(u64::from_be_bytes(k.as_ref().try_into().unwrap_or([0; 8]))));
        }
        Ok(out)
    }

    /// Remove a RID's blob/hash-index/receipt/cluster rows outright. Used
    /// only by the purge subsystem (spec §4.8), which owns the invariant
    /// that no surviving delta still depends on the removed RID.
    pub fn hard_remove(&self, rid: Rid) -> Result<(), ObjectError> {
        if let Ok(rec) = self.load_record(rid) {
            self.hash_index.remove(rec.hash_hex.as_bytes())?;
            self.phantom.remove(rec.hash_hex.as_bytes())?;
        }
        self.blobs.remove(rid.0.to_be_bytes())?;
        self.receipts.remove(rid.0.to_be_bytes())?;
        self.unclustered.remove(rid.0.to_be_bytes())?;
        self.unsent.remove(rid.0.to_be_bytes())?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), ObjectError> {
        self.db.flush()?;
        Ok(())
    }
}
