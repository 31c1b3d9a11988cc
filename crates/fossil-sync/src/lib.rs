//! Sync planner (C10): local bookkeeping for what still needs to go out
//! (`unsent`), what still needs batching into a cluster artifact
//! (`unclustered`), push/pull admission policy, and ingestion of received
//! artifacts including phantom resolution. The wire exchange itself — the
//! actual HTTP/SSH round trip — is out of scope; this crate only decides
//! what to send, what to accept, and what to do once bytes arrive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fossil_artifact::cards::{parse_and_verify, Card};
use fossil_artifact::{grammar, Index, TagSigil};
use fossil_hash::HashAlgo;
use fossil_objects::{BlobStore, PutFlags, PutOutcome, Rid};
use fossil_tag::{TagEngine, TagType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("object store error: {0}")]
    Object(#[from] fossil_objects::ObjectError),
    #[error("crosslink index error: {0}")]
    Index(#[from] fossil_artifact::ArtifactError),
    #[error("tag engine error: {0}")]
    Tag(#[from] fossil_tag::TagError),
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of RIDs named by a single M-card cluster, keeping
    /// handshake cost roughly constant rather than quadratic in repo size
    /// (spec §4.9).
    pub max_cluster_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            max_cluster_size: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PushBatch {
    pub rids: Vec<Rid>,
    pub hashes: Vec<String>,
}

/// A cooperative, clonable cancellation flag shared between a sync session
/// and whatever drives its rounds (spec §5: cancellation between rounds).
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Plan push batches: every non-private `unsent` RID, chunked so no single
/// cluster artifact names more than `max_cluster_size` hashes (spec §4.9's
/// push policy — private artifacts are never offered).
pub fn plan_push(store: &BlobStore, config: &SyncConfig) -> Result<Vec<PushBatch>, SyncError> {
    let mut eligible = Vec::new();
    for rid in store.unsent_rids()? {
        if store.is_private(rid)? {
            continue;
        }
        eligible.push(rid);
    }
    Ok(chunk_into_batches(store, &eligible, config)?)
}

/// Plan cluster batches over every `unclustered` RID, independent of push
/// state — clustering and sending are tracked separately in the schema.
pub fn plan_clusters(store: &BlobStore, config: &SyncConfig) -> Result<Vec<PushBatch>, SyncError> {
    let rids = store.unclustered_rids()?;
    chunk_into_batches(store, &rids, config)
}

fn chunk_into_batches(
    store: &BlobStore,
    rids: &[Rid],
    config: &SyncConfig,
) -> Result<Vec<PushBatch>, SyncError> {
    let mut batches = Vec::new();
    for chunk in rids.chunks(config.max_cluster_size.max(1)) {
        let mut hashes = Vec::with_capacity(chunk.len());
        for &rid in chunk {
            hashes.push(store.hash_of(rid)?.to_hex());
        }
        batches.push(PushBatch {
            rids: chunk.to_vec(),
            hashes,
        });
    }
    Ok(batches)
}

pub fn mark_batch_sent(store: &BlobStore, batch: &PushBatch) -> Result<(), SyncError> {
    for &rid in &batch.rids {
        store.mark_sent(rid)?;
    }
    Ok(())
}

pub fn mark_batch_clustered(store: &BlobStore, batch: &PushBatch) -> Result<(), SyncError> {
    for &rid in &batch.rids {
        store.mark_clustered(rid)?;
    }
    Ok(())
}

/// Pull admission policy (spec §4.9): accept any hash that is not shunned
/// and whose algorithm the active hash policy allows.
pub fn accept_pull(store: &BlobStore, hash_hex: &str, algo: HashAlgo) -> Result<bool, SyncError> {
    if store.is_shunned(hash_hex)? {
        return Ok(false);
    }
    Ok(!store.config.hash_policy.shuns(algo))
}

/// True if `bytes` opens with a known card-grammar letter, i.e. it is
/// plausibly a structured artifact rather than an opaque file blob (spec
/// §4.9: "detectable by its first card being a capital letter from the
/// grammar").
fn looks_structured(bytes: &[u8]) -> bool {
    const KNOWN_LETTERS: &[u8] = b"ACDFGJKLMNPQRTUWZ";
    bytes
        .first()
        .map(|&b| KNOWN_LETTERS.contains(&b))
        .unwrap_or(false)
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub stored: usize,
    pub crosslinked: usize,
    pub rejected: usize,
}

/// Store one received artifact, running crosslink and tag propagation if it
/// parses as a structured artifact. Storing the bytes always resolves a
/// matching phantom in place (`BlobStore::put`'s upgrade path), satisfying
/// spec §4.9's "resolve phantoms by matching received hashes".
pub fn ingest_artifact(
    store: &BlobStore,
    index: &Index,
    tags: &TagEngine,
    bytes: &[u8],
) -> Result<Option<Rid>, SyncError> {
    let algo = store.config.hash_policy.preferred_algo();
    let hash_hex = fossil_hash::hash(bytes, algo).to_hex();
    if !accept_pull(store, &hash_hex, algo)? {
        return Ok(None);
    }

    let rid = match store.put(bytes, PutFlags::NONE)? {
        PutOutcome::Stored { rid, .. } | PutOutcome::AlreadyPresent { rid, .. } => rid,
        PutOutcome::Shunned { .. } | PutOutcome::PolicyRejected { .. } => return Ok(None),
    };

    if looks_structured(bytes) {
        if let Ok(cards) = parse_and_verify(bytes) {
            apply_structured_artifact(store, index, tags, rid, &cards)?;
        }
    }

    Ok(Some(rid))
}

fn apply_structured_artifact(
    store: &BlobStore,
    index: &Index,
    tags: &TagEngine,
    rid: Rid,
    cards: &[Card],
) -> Result<(), SyncError> {
    let outcome = fossil_artifact::crosslink(index, store, rid, cards)?;
    let mtime = grammar::date(cards).unwrap_or_else(|| "1970-01-01T00:00:00.000".to_string());
    for tag_card in &outcome.tags {
        let tag_type = match tag_card.sigil {
            TagSigil::Add => TagType::Singleton,
            TagSigil::Cancel => TagType::Cancel,
            TagSigil::Propagate => TagType::Propagate,
        };
        let target = store.rid_of(&tag_card.target_hash).unwrap_or(rid);
        tags.insert(
            index,
            &tag_card.name,
            tag_type,
            tag_card.value.as_deref(),
            rid,
            &mtime,
            target,
        )?;
    }
    Ok(())
}

/// One side of a request/response sync round: ingest whatever the peer
/// sent, stopping early — without committing the remainder — the moment
/// cancellation is observed (spec §5).
pub fn run_round(
    store: &BlobStore,
    index: &Index,
    tags: &TagEngine,
    cancel: &CancelToken,
    received: &[Vec<u8>],
) -> Result<IngestReport, SyncError> {
    let mut report = IngestReport::default();
    for bytes in received {
        if cancel.is_cancelled() {
            break;
        }
        match ingest_artifact(store, index, tags, bytes)? {
            Some(_) => {
                report.stored += 1;
                if looks_structured(bytes) {
                    report.crosslinked += 1;
                }
            }
            None => report.rejected += 1,
        }
    }
    Ok(report)
}
