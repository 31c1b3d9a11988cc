//! Crosslink / indexer (C5): populates the derived relational tables of
//! spec §4.4/§6 from a parsed artifact. Each table is a sled tree, same
//! design choice as [`fossil_objects::BlobStore`] — see `DESIGN.md`.
//!
//! Crosslink is idempotent (spec §4.4): re-running it for the same RID
//! overwrites rows keyed by that RID with the same values, so rebuilding
//! the whole index from the blob store reproduces identical derived state.

use std::collections::BTreeMap;

use fossil_hash::Hash;
use fossil_objects::{BlobStore, Rid};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cards::Card;
use crate::grammar::{
    self, ArtifactKind, FileEntry, TagCard,
};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("card grammar error: {0}")]
    Grammar(#[from] crate::cards::CardError),
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("object store error: {0}")]
    Object(#[from] fossil_objects::ObjectError),
    #[error("artifact references malformed hash {0:?}")]
    BadHash(String),
    #[error("check-in artifact is missing a required D or U card")]
    IncompleteCheckIn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlinkRow {
    pub ci_rid: u64,
    pub path_id: u64,
    pub new_fid: Option<u64>,
    pub old_fid: Option<u64>,
    pub permission: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlinkRow {
    pub child_rid: u64,
    pub parent_rid: u64,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    pub rid: u64,
    pub kind: String,
    pub timestamp: String,
    pub author: String,
    pub comment: Option<String>,
    pub bgcolor: Option<String>,
}

/// Everything crosslink learned about one artifact that the caller (the
/// `Repository` orchestration layer, spec §2 control-flow step (b)) must
/// act on outside this crate: tags go to the tag engine (C6).
#[derive(Debug, Clone, Default)]
pub struct CrosslinkOutcome {
    pub kind: Option<ArtifactKind>,
    pub tags: Vec<TagCard>,
    pub primary_parent_rid: Option<Rid>,
}

pub struct Index {
    mlink: sled::Tree,
    plink: sled::Tree,
    filename: sled::Tree,
    filename_rev: sled::Tree,
    event: sled::Tree,
    wiki: sled::Tree,
    tech_notes: sled::Tree,
    tickets: sled::Tree,
    ticketchng: sled::Tree,
    attachment: sled::Tree,
    backlink: sled::Tree,
    meta: sled::Tree,
}

impl Index {
    pub fn open(db: &sled::Db) -> Result<Self, ArtifactError> {
        Ok(Index {
            mlink: db.open_tree("mlink")?,
            plink: db.open_tree("plink")?,
            filename: db.open_tree("filename")?,
            filename_rev: db.open_tree("filename_rev")?,
            event: db.open_tree("event")?,
            wiki: db.open_tree("wiki")?,
            tech_notes: db.open_tree("tech_notes")?,
            tickets: db.open_tree("ticket")?,
            ticketchng: db.open_tree("ticketchng")?,
            attachment: db.open_tree("attachment")?,
            backlink: db.open_tree("backlink")?,
            meta: db.open_tree("index_meta")?,
        })
    }

    fn path_id(&self, path: &str) -> Result<u64, ArtifactError> {
        if let Some(raw) = self.filename.get(path.as_bytes())? {
            return Ok(u64::from_be_bytes(raw.as_ref().try_into().unwrap_or([0; 8])));
        }
        let id = self.meta.update_and_fetch(b"next_path_id", |old| {
            let n = old
                .map(|b| u64::from_be_bytes(b.try_into().unwrap_or([0; 8])))
                .unwrap_or(0);
            Some((n + 1).to_be_bytes().to_vec())
        })?;
        let id = id
            .map(|b| u64::from_be_bytes(b.as_ref().try_into().unwrap_or([0; 8])))
            .unwrap_or(1);
        self.filename.insert(path.as_bytes(), id.to_be_bytes().to_vec())?;
        self.filename_rev
            .insert(id.to_be_bytes(), path.as_bytes().to_vec())?;
        Ok(id)
    }

    pub fn path_of(&self, path_id: u64) -> Result<Option<String>, ArtifactError> {
        Ok(self
            .filename_rev
            .get(path_id.to_be_bytes())?
            .map(|b| String::from_utf8_lossy(&b).to_string()))
    }

    pub fn mlink_for(&self, ci_rid: Rid, path_id: u64) -> Result<Option<MlinkRow>, ArtifactError> {
        let key = mlink_key(ci_rid.0, path_id);
        Ok(self
            .mlink
            .get(key)?
            .map(|raw| bincode::deserialize(&raw))
            .transpose()?)
    }

    pub fn mlink_rows_for_checkin(&self, ci_rid: Rid) -> Result<Vec<MlinkRow>, ArtifactError> {
        let mut out = Vec::new();
        let prefix = ci_rid.0.to_be_bytes();
        for entry in self.mlink.scan_prefix(prefix) {
            let (_, raw) = entry?;
            out.push(bincode::deserialize(&raw)?);
        }
        Ok(out)
    }

    pub fn plink_parents(&self, child_rid: Rid) -> Result<Vec<PlinkRow>, ArtifactError> {
        let mut out = Vec::new();
        for entry in self.plink.scan_prefix(child_rid.0.to_be_bytes()) {
            let (_, raw) = entry?;
            out.push(bincode::deserialize(&raw)?);
        }
        Ok(out)
    }

    pub fn plink_children(&self, parent_rid: Rid) -> Result<Vec<PlinkRow>, ArtifactError> {
        // plink is keyed by child, so a reverse scan table is kept in sync
        // on every insert (see insert_plink below).
        let mut out = Vec::new();
        for entry in self.plink.iter() {
            let (_, raw) = entry?;
            let row: PlinkRow = bincode::deserialize(&raw)?;
            if row.parent_rid == parent_rid.0 {
                out.push(row);
            }
        }
        Ok(out)
    }

    pub fn primary_children(&self, parent_rid: Rid) -> Result<Vec<Rid>, ArtifactError> {
        Ok(self
            .plink_children(parent_rid)?
            .into_iter()
            .filter(|r| r.is_primary)
            .map(|r| Rid(r.child_rid))
            .collect())
    }

    pub fn event_of(&self, rid: Rid) -> Result<Option<EventRow>, ArtifactError> {
        Ok(self
            .event
            .get(rid.0.to_be_bytes())?
            .map(|raw| bincode::deserialize(&raw))
            .transpose()?)
    }

    pub fn set_bgcolor(&self, rid: Rid, bgcolor: Option<&str>) -> Result<(), ArtifactError> {
        if let Some(mut row) = self.event_of(rid)? {
            row.bgcolor = bgcolor.map(|s| s.to_string());
            self.event
                .insert(rid.0.to_be_bytes(), bincode::serialize(&row)?)?;
        }
        Ok(())
    }

    pub fn all_checkin_events(&self) -> Result<Vec<EventRow>, ArtifactError> {
        self.events_by_kind("ci")
    }

    /// Every event row of a given kind (`"ci"`, `"w"`, `"e"`, `"g"`, `"t"`),
    /// used by the name resolver's type-hint filtering (spec §4.10).
    pub fn events_by_kind(&self, kind: &str) -> Result<Vec<EventRow>, ArtifactError> {
        let mut out = Vec::new();
        for entry in self.event.iter() {
            let (_, raw) = entry?;
            let row: EventRow = bincode::deserialize(&raw)?;
            if row.kind == kind {
                out.push(row);
            }
        }
        Ok(out)
    }

    /// Remove every derived row referencing `rid` (used by purge, spec
    /// §4.8).
    pub fn remove_rid(&self, rid: Rid) -> Result<(), ArtifactError> {
        self.event.remove(rid.0.to_be_bytes())?;
        let prefix = rid.0.to_be_bytes();
        for entry in self.mlink.scan_prefix(prefix) {
            let (k, _) = entry?;
            self.mlink.remove(k)?;
        }
        let plink_parent_keys: Vec<_> = self
            .plink
            .scan_prefix(rid.0.to_be_bytes())
            .filter_map(|e| e.ok())
            .map(|(k, _)| k)
            .collect();
        for k in plink_parent_keys {
            self.plink.remove(k)?;
        }
        let dangling: Vec<_> = self
            .plink
            .iter()
            .filter_map(|e| e.ok())
            .filter(|(_, v)| {
                bincode::deserialize::<PlinkRow>(v)
                    .map(|r| r.parent_rid == rid.0)
                    .unwrap_or(false)
            })
            .map(|(k, _)| k)
            .collect();
        for k in dangling {
            self.plink.remove(k)?;
        }
        self.attachment.remove(rid.0.to_be_bytes())?;
        self.ticketchng.remove(rid.0.to_be_bytes())?;
        Ok(())
    }
}

fn mlink_key(ci_rid: u64, path_id: u64) -> Vec<u8> {
    let mut k = ci_rid.to_be_bytes().to_vec();
    k.extend_from_slice(&path_id.to_be_bytes());
    k
}

/// Resolve a hash hex string to a RID, registering a phantom entry if the
/// store has never seen this hash before (spec §4.9's phantom tracking).
fn resolve_or_phantom(store: &BlobStore, hash_hex: &str) -> Result<Rid, ArtifactError> {
    if let Ok(rid) = store.rid_of(hash_hex) {
        return Ok(rid);
    }
    let h = Hash::from_hex(hash_hex).map_err(|_| ArtifactError::BadHash(hash_hex.to_string()))?;
    Ok(store.put_phantom(&h)?)
}

/// Populate the derived tables for one newly-stored artifact (spec §4.4,
/// §4.5's crosslink call-out). Returns the tag-cards found, for the caller
/// to hand to the tag engine (C6) — crosslink itself never mutates
/// `tag`/`tagxref`, keeping the component boundary from spec's table in
/// §2.
pub fn crosslink(
    index: &Index,
    store: &BlobStore,
    rid: Rid,
    cards: &[Card],
) -> Result<CrosslinkOutcome, ArtifactError> {
    let kind = grammar::classify(cards);
    let mut outcome = CrosslinkOutcome {
        kind: Some(kind),
        ..Default::default()
    };

    match kind {
        ArtifactKind::CheckIn => {
            let date = grammar::date(cards).ok_or(ArtifactError::IncompleteCheckIn)?;
            let user = grammar::user(cards).ok_or(ArtifactError::IncompleteCheckIn)?;
            let comment = grammar::comment(cards);

            let parents = grammar::parent_hashes(cards);
            let mut primary_parent_rid = None;
            for (i, parent_hash) in parents.iter().enumerate() {
                let parent_rid = resolve_or_phantom(store, parent_hash)?;
                let is_primary = i == 0;
                if is_primary {
                    primary_parent_rid = Some(parent_rid);
                }
                index.plink.insert(
                    plink_key(rid, i as u32),
                    bincode::serialize(&PlinkRow {
                        child_rid: rid.0,
                        parent_rid: parent_rid.0,
                        is_primary,
                    })?,
                )?;
            }
            outcome.primary_parent_rid = primary_parent_rid;

            let entries: Vec<FileEntry> = grammar::file_entries(cards);
            for entry in &entries {
                let path_id = index.path_id(&entry.path)?;
                if let Some(old_path) = &entry.old_path {
                    let old_id = index.path_id(old_path)?;
                    index.filename.insert(
                        format!("__prior__{}", path_id).as_bytes(),
                        old_id.to_be_bytes().to_vec(),
                    )?;
                }
                let new_fid = resolve_or_phantom(store, &entry.hash_hex)?;
                let old_fid = primary_parent_rid
                    .and_then(|p| index.mlink_for(p, path_id).ok().flatten())
                    .and_then(|row| row.new_fid);
                index.mlink.insert(
                    mlink_key(rid.0, path_id),
                    bincode::serialize(&MlinkRow {
                        ci_rid: rid.0,
                        path_id,
                        new_fid: Some(new_fid.0),
                        old_fid,
                        permission: entry.permission.clone(),
                    })?,
                )?;
            }

            index.event.insert(
                rid.0.to_be_bytes(),
                bincode::serialize(&EventRow {
                    rid: rid.0,
                    kind: "ci".to_string(),
                    timestamp: date,
                    author: user,
                    comment,
                    bgcolor: None,
                })?,
            )?;
            outcome.tags = grammar::tag_cards(cards);
        }
        ArtifactKind::Control => {
            outcome.tags = grammar::tag_cards(cards);
            if let (Some(date), Some(user)) = (grammar::date(cards), grammar::user(cards)) {
                index.event.insert(
                    rid.0.to_be_bytes(),
                    bincode::serialize(&EventRow {
                        rid: rid.0,
                        kind: "g".to_string(),
                        timestamp: date,
                        author: user,
                        comment: grammar::comment(cards),
                        bgcolor: None,
                    })?,
                )?;
            }
        }
        ArtifactKind::Wiki => {
            if let Some(title) = grammar::wiki_title(cards) {
                let mut history: Vec<u64> = index
                    .wiki
                    .get(title.as_bytes())?
                    .map(|raw| bincode::deserialize(&raw))
                    .transpose()?
                    .unwrap_or_default();
                history.push(rid.0);
                index
                    .wiki
                    .insert(title.as_bytes(), bincode::serialize(&history)?)?;
            }
            if let (Some(date), Some(user)) = (grammar::date(cards), grammar::user(cards)) {
                index.event.insert(
                    rid.0.to_be_bytes(),
                    bincode::serialize(&EventRow {
                        rid: rid.0,
                        kind: "w".to_string(),
                        timestamp: date,
                        author: user,
                        comment: grammar::wiki_title(cards),
                        bgcolor: None,
                    })?,
                )?;
            }
        }
        ArtifactKind::Event => {
            if let Some((_, tech_note_id)) = grammar::event_id(cards) {
                let mut history: Vec<u64> = index
                    .tech_notes
                    .get(tech_note_id.as_bytes())?
                    .map(|raw| bincode::deserialize(&raw))
                    .transpose()?
                    .unwrap_or_default();
                history.push(rid.0);
                index
                    .tech_notes
                    .insert(tech_note_id.as_bytes(), bincode::serialize(&history)?)?;
            }
            if let (Some(date), Some(user)) = (grammar::date(cards), grammar::user(cards)) {
                index.event.insert(
                    rid.0.to_be_bytes(),
                    bincode::serialize(&EventRow {
                        rid: rid.0,
                        kind: "e".to_string(),
                        timestamp: date,
                        author: user,
                        comment: grammar::comment(cards),
                        bgcolor: None,
                    })?,
                )?;
            }
        }
        ArtifactKind::TicketChange => {
            if let Some(uuid) = grammar::ticket_uuid(cards) {
                let fields = grammar::ticket_fields(cards);
                index.ticketchng.insert(
                    rid.0.to_be_bytes(),
                    bincode::serialize(&(uuid.clone(), fields.clone()))?,
                )?;
                let mut state: BTreeMap<String, String> = index
                    .tickets
                    .get(uuid.as_bytes())?
                    .map(|raw| bincode::deserialize(&raw))
                    .transpose()?
                    .unwrap_or_default();
                for f in fields {
                    match f.value {
                        Some(v) if f.append => {
                            let entry = state.entry(f.name).or_default();
                            if !entry.is_empty() {
                                entry.push('\n');
                            }
                            entry.push_str(&v);
                        }
                        Some(v) => {
                            state.insert(f.name, v);
                        }
                        None => {
                            state.remove(&f.name);
                        }
                    }
                }
                index
                    .tickets
                    .insert(uuid.as_bytes(), bincode::serialize(&state)?)?;
                if let (Some(date), Some(user)) = (grammar::date(cards), grammar::user(cards)) {
                    index.event.insert(
                        rid.0.to_be_bytes(),
                        bincode::serialize(&EventRow {
                            rid: rid.0,
                            kind: "t".to_string(),
                            timestamp: date,
                            author: user,
                            comment: state.get("comment").cloned(),
                            bgcolor: None,
                        })?,
                    )?;
                }
            }
        }
        ArtifactKind::Attachment => {
            if let Some(att) = grammar::attachment(cards) {
                let mut list: Vec<(String, Option<String>, u64)> = index
                    .attachment
                    .get(att.target.as_bytes())?
                    .map(|raw| bincode::deserialize(&raw))
                    .transpose()?
                    .unwrap_or_default();
                list.push((att.filename, att.artifact_hash, rid.0));
                index
                    .attachment
                    .insert(att.target.as_bytes(), bincode::serialize(&list)?)?;
                index.attachment.insert(
                    format!("__byrid__{}", rid.0).as_bytes(),
                    att_target_key(&att.target),
                )?;
            }
        }
        ArtifactKind::Cluster | ArtifactKind::Forum | ArtifactKind::Unknown => {
            // Clusters are consumed by the sync planner directly (C10);
            // forum posts and genuinely unrecognized artifacts have no
            // crosslink counterpart in this core (spec §1 scope).
        }
    }

    Ok(outcome)
}

fn plink_key(child: Rid, parent_index: u32) -> Vec<u8> {
    let mut k = child.0.to_be_bytes().to_vec();
    k.extend_from_slice(&parent_index.to_be_bytes());
    k
}

fn att_target_key(target: &str) -> Vec<u8> {
    target.as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{make_z_card, parse_and_verify, serialize_cards};
    use fossil_objects::{PutFlags, PutOutcome, StoreConfig};

    fn setup() -> (sled::Db, BlobStore) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store = BlobStore::open_in_memory(StoreConfig::default()).unwrap();
        (db, store)
    }

    fn build_checkin(file_content: &[u8]) -> (Vec<u8>, String) {
        let hash_hex = fossil_hash::hash(file_content, fossil_hash::HashAlgo::Sha3_256).to_hex();
        let mut cards = vec![
            Card { letter: b'C', tokens: vec![b"hello".to_vec()], body: None },
            Card { letter: b'D', tokens: vec![b"2024-01-01T00:00:00.000".to_vec()], body: None },
            Card {
                letter: b'F',
                tokens: vec![b"a.txt".to_vec(), hash_hex.clone().into_bytes()],
                body: None,
            },
            Card { letter: b'U', tokens: vec![b"alice".to_vec()], body: None },
        ];
        cards.push(make_z_card(&cards));
        (serialize_cards(&cards), hash_hex)
    }

    #[test]
    fn crosslink_checkin_produces_one_mlink_and_zero_plink() {
        let (db, store) = setup();
        let index = Index::open(&db).unwrap();
        let (file_content, _) = (b"hello world".to_vec(), ());
        let (artifact_bytes, _file_hash) = build_checkin(&file_content);

        // Store the file blob first so mlink resolves to a concrete RID.
        store.put(&file_content, PutFlags::NONE).unwrap();

        let cards = parse_and_verify(&artifact_bytes).unwrap();
        let outcome = match store.put(&artifact_bytes, PutFlags::NONE).unwrap() {
            PutOutcome::Stored { rid, .. } => {
                let outcome = crosslink(&index, &store, rid, &cards).unwrap();
                (rid, outcome)
            }
            _ => panic!(),
        };
        let (rid, outcome) = outcome;
        assert_eq!(outcome.kind, Some(ArtifactKind::CheckIn));
        assert!(outcome.primary_parent_rid.is_none());
        let mlinks = index.mlink_rows_for_checkin(rid).unwrap();
        assert_eq!(mlinks.len(), 1);
        let plinks = index.plink_parents(rid).unwrap();
        assert!(plinks.is_empty());
        let event = index.event_of(rid).unwrap().unwrap();
        assert_eq!(event.kind, "ci");
    }

    #[test]
    fn crosslink_is_idempotent() {
        let (db, store) = setup();
        let index = Index::open(&db).unwrap();
        store.put(b"hello world", PutFlags::NONE).unwrap();
        let (artifact_bytes, _) = build_checkin(b"hello world");
        let cards = parse_and_verify(&artifact_bytes).unwrap();
        let rid = match store.put(&artifact_bytes, PutFlags::NONE).unwrap() {
            PutOutcome::Stored { rid, .. } => rid,
            _ => panic!(),
        };
        crosslink(&index, &store, rid, &cards).unwrap();
        let first = index.mlink_rows_for_checkin(rid).unwrap();
        crosslink(&index, &store, rid, &cards).unwrap();
        let second = index.mlink_rows_for_checkin(rid).unwrap();
        assert_eq!(first.len(), second.len());
    }
}
