//! Tag propagation engine (C6).
//!
//! Grounded on `tag.c`'s `tag_insert`/`tag_propagate` pair: a tag assertion
//! is recorded at one RID (the check-in or control artifact it names
//! directly), then walked outward along the primary-parent edges of the
//! check-in DAG so every descendant inherits the same propagating tag
//! until a more recent direct assertion blocks it. The walk only follows
//! primary-child edges (`plink.is_primary`), matching the original's
//! `isprim` predicate — a tag never propagates across a merge's secondary
//! parent.

use fossil_artifact::Index;
use fossil_objects::Rid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TagError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("crosslink index error: {0}")]
    Index(#[from] fossil_artifact::ArtifactError),
}

/// How a tag applies at the RID it is recorded against (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagType {
    /// `-tag`: cancels a previously propagating tag at and below this RID.
    Cancel,
    /// `+tag`: applies only to this one RID, never propagates.
    Singleton,
    /// `*tag`: applies here and to every descendant along primary edges.
    Propagate,
}

/// Whether a tagxref row was asserted directly or inherited via
/// propagation. Mirrors `tag.c`'s `srcid` column: `0` there means
/// propagated, anything else means a direct assertion at that artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagSource {
    Direct(u64),
    Propagated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagXrefRow {
    pub tag: String,
    pub tag_type: TagType,
    pub source: TagSource,
    /// The check-in at which this tag's value originates, for display
    /// purposes (the rid whose direct assertion this row descends from).
    pub origin_rid: u64,
    pub value: Option<String>,
    /// Comparable timestamp. Fossil artifact `D`-cards are zero-padded
    /// ISO-8601, so lexicographic string order already matches
    /// chronological order — no need to parse into a numeric julianday.
    pub mtime: String,
}

pub struct TagEngine {
    /// Keyed by `tag_name\0rid` (big-endian rid bytes).
    tagxref: sled::Tree,
}

/// Key layout is rid-major (`rid ++ 0x00 ++ tag`) so [`TagEngine::tags_of`]
/// can prefix-scan every tag at a RID; point lookups by `(tag, rid)` stay
/// O(1) since sled `get` always takes an exact key regardless of any
/// scan-friendly ordering.
fn tagxref_key(tag: &str, rid: Rid) -> Vec<u8> {
    let mut k = rid.0.to_be_bytes().to_vec();
    k.push(0);
    k.extend_from_slice(tag.as_bytes());
    k
}

impl TagEngine {
    pub fn open(db: &sled::Db) -> Result<Self, TagError> {
        Ok(TagEngine {
            tagxref: db.open_tree("tagxref")?,
        })
    }

    pub fn row(&self, tag: &str, rid: Rid) -> Result<Option<TagXrefRow>, TagError> {
        Ok(self
            .tagxref
            .get(tagxref_key(tag, rid))?
            .map(|raw| bincode::deserialize(&raw))
            .transpose()?)
    }

    fn put_row(&self, rid: Rid, row: &TagXrefRow) -> Result<(), TagError> {
        self.tagxref
            .insert(tagxref_key(&row.tag, rid), bincode::serialize(row)?)?;
        Ok(())
    }

    fn remove_row(&self, tag: &str, rid: Rid) -> Result<(), TagError> {
        self.tagxref.remove(tagxref_key(tag, rid))?;
        Ok(())
    }

    /// All tags currently in effect at `rid`, direct or inherited.
    pub fn tags_of(&self, rid: Rid) -> Result<Vec<TagXrefRow>, TagError> {
        let mut out = Vec::new();
        let mut prefix = rid.0.to_be_bytes().to_vec();
        prefix.push(0);
        for entry in self.tagxref.scan_prefix(prefix) {
            let (_, raw) = entry?;
            out.push(bincode::deserialize(&raw)?);
        }
        Ok(out)
    }

    /// The currently propagating `branch` tag's value at `rid`, if any —
    /// spec §4.6's branch-name resolution. Falls back to `"trunk"` when no
    /// branch tag has ever been asserted (the root check-in's implicit
    /// branch).
    pub fn branch_of(&self, rid: Rid) -> Result<String, TagError> {
        Ok(self
            .row("branch", rid)?
            .and_then(|r| r.value)
            .unwrap_or_else(|| "trunk".to_string()))
    }

    pub fn is_closed_leaf(&self, rid: Rid) -> Result<bool, TagError> {
        Ok(self.row("closed", rid)?.is_some())
    }

    /// Whether `rid` is a leaf: a check-in with no primary children in the
    /// DAG (`tag.c`'s `leaf_eventually_check`, computed live rather than
    /// cached since the walk is a single prefix scan).
    pub fn is_leaf(&self, index: &Index, rid: Rid) -> Result<bool, TagError> {
        Ok(index.primary_children(rid)?.is_empty())
    }

    /// Record a direct tag assertion at `rid` and propagate it to
    /// descendants along primary edges (`tag.c`'s `tag_insert` +
    /// `tag_propagate`).
    pub fn insert(
        &self,
        index: &Index,
        tag: &str,
        tag_type: TagType,
        value: Option<&str>,
        source_rid: Rid,
        mtime: &str,
        rid: Rid,
    ) -> Result<(), TagError> {
        if let Some(existing) = self.row(tag, rid)? {
            if existing.mtime.as_str() >= mtime {
                // A more recent assertion already won (tag.c: "another
                // entry that is more recent already exists").
                return Ok(());
            }
        }

        let value = if matches!(tag_type, TagType::Cancel) {
            None
        } else {
            value.map(|s| s.to_string())
        };

        self.put_row(
            rid,
            &TagXrefRow {
                tag: tag.to_string(),
                tag_type,
                source: TagSource::Direct(source_rid.0),
                origin_rid: rid.0,
                value: value.clone(),
                mtime: mtime.to_string(),
            },
        )?;

        if tag == "bgcolor" {
            index.set_bgcolor(rid, value.as_deref())?;
        }

        // A singleton assertion still blocks propagation of any
        // ancestor's propagating tag below this point (tag.c: `if(
        // tagtype==1 ) tagtype = 0;` before calling tag_propagate).
        let propagate_type = match tag_type {
            TagType::Propagate => TagType::Propagate,
            TagType::Singleton | TagType::Cancel => TagType::Cancel,
        };
        self.propagate(index, rid, tag, propagate_type, rid, value.as_deref(), mtime)
    }

    /// Walk primary-child edges from `pid`, applying or cancelling `tag`
    /// per descendant according to the override rule: a propagated row
    /// (`TagSource::Propagated`) yields to a newer assertion, a direct
    /// row never does.
    fn propagate(
        &self,
        index: &Index,
        pid: Rid,
        tag: &str,
        tag_type: TagType,
        origin_rid: Rid,
        value: Option<&str>,
        mtime: &str,
    ) -> Result<(), TagError> {
        let mut queue = vec![pid];
        while let Some(cur) = queue.pop() {
            for child in index.primary_children(cur)? {
                let existing = self.row(tag, child)?;
                let doit = match &existing {
                    None => matches!(tag_type, TagType::Propagate),
                    Some(row) => {
                        matches!(row.source, TagSource::Propagated) && row.mtime.as_str() < mtime
                    }
                };
                if !doit {
                    continue;
                }
                queue.push(child);
                match tag_type {
                    TagType::Propagate => {
                        self.put_row(
                            child,
                            &TagXrefRow {
                                tag: tag.to_string(),
                                tag_type: TagType::Propagate,
                                source: TagSource::Propagated,
                                origin_rid: origin_rid.0,
                                value: value.map(|s| s.to_string()),
                                mtime: mtime.to_string(),
                            },
                        )?;
                    }
                    TagType::Cancel | TagType::Singleton => {
                        self.remove_row(tag, child)?;
                    }
                }
                if tag == "bgcolor" {
                    index.set_bgcolor(child, value)?;
                }
            }
        }
        Ok(())
    }

    /// Every RID currently carrying `tag` (direct or propagated), paired
    /// with its row. Used by the name resolver to map a symbolic tag name
    /// back to the check-in(s) it names (spec §4.10).
    pub fn rids_with_tag(&self, tag: &str) -> Result<Vec<(Rid, TagXrefRow)>, TagError> {
        let mut out = Vec::new();
        for entry in self.tagxref.iter() {
            let (k, raw) = entry?;
            if k.len() < 9 || k[8] != 0 || &k[9..] != tag.as_bytes() {
                continue;
            }
            let rid = Rid(u64::from_be_bytes(k[..8].try_into().unwrap()));
            out.push((rid, bincode::deserialize(&raw)?));
        }
        Ok(out)
    }

    /// Remove every tagxref row keyed at `rid`, originating from `rid`, or
    /// directly sourced from `rid` (purge's `DELETE FROM tagxref WHERE rid
    /// IN ... OR srcid IN ... OR origid IN ...`, spec §4.8).
    pub fn purge_rid(&self, rid: Rid) -> Result<(), TagError> {
        let mut prefix = rid.0.to_be_bytes().to_vec();
        prefix.push(0);
        for entry in self.tagxref.scan_prefix(prefix) {
            let (k, _) = entry?;
            self.tagxref.remove(k)?;
        }
        let stale: Vec<_> = self
            .tagxref
            .iter()
            .filter_map(|e| e.ok())
            .filter(|(_, v)| {
                bincode::deserialize::<TagXrefRow>(v)
                    .map(|row| {
                        row.origin_rid == rid.0
                            || matches!(row.source, TagSource::Direct(s) if s == rid.0)
                    })
                    .unwrap_or(false)
            })
            .map(|(k, _)| k)
            .collect();
        for k in stale {
            self.tagxref.remove(k)?;
        }
        Ok(())
    }

}
