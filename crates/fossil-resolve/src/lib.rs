//! Name resolver (C12): maps the various ways a user or caller names an
//! artifact — hash, hash prefix, symbolic tag, branch name, the `tip`/
//! `trunk`/`current`/`latest` keywords, an ISO timestamp, or `tag:NAME` —
//! down to a single RID.

use fossil_artifact::Index;
use fossil_objects::{BlobStore, Rid};
use fossil_tag::TagEngine;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("object store error: {0}")]
    Object(#[from] fossil_objects::ObjectError),
    #[error("crosslink index error: {0}")]
    Index(#[from] fossil_artifact::ArtifactError),
    #[error("tag engine error: {0}")]
    Tag(#[from] fossil_tag::TagError),
    #[error("no artifact matches {0:?}")]
    NotFound(String),
    #[error("{0:?} matches more than one artifact")]
    Ambiguous(String),
}

/// Restrict resolution to one artifact kind, narrowing which derived
/// tables are searched for a symbolic name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeHint {
    CheckIn,
    Wiki,
    Event,
}

impl TypeHint {
    fn event_kind(self) -> &'static str {
        match self {
            TypeHint::CheckIn => "ci",
            TypeHint::Wiki => "w",
            TypeHint::Event => "e",
        }
    }
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn looks_like_date(s: &str) -> bool {
    // ISO-8601-ish: starts with a 4-digit year followed by a dash, e.g.
    // "2024-01-01" or "2024-01-01T00:00:00". Good enough to disambiguate
    // from a hash prefix, which is never a `-`-separated token.
    let bytes = s.as_bytes();
    bytes.len() >= 8 && bytes[..4].iter().all(|b| b.is_ascii_digit()) && bytes.get(4) == Some(&b'-')
}

/// The currently checked-out RID, supplied by the caller since this crate
/// has no working-tree state of its own (`current` keyword, spec §4.10).
pub struct ResolveContext<'a> {
    pub store: &'a BlobStore,
    pub index: &'a Index,
    pub tags: &'a TagEngine,
    pub current_checkout: Option<Rid>,
}

/// The most recently created check-in overall (`tip`/`latest`).
fn tip(index: &Index) -> Result<Option<Rid>, ResolveError> {
    Ok(index
        .all_checkin_events()?
        .into_iter()
        .max_by(|a, b| a.timestamp.cmp(&b.timestamp))
        .map(|e| Rid(e.rid)))
}

/// The most recent check-in on a named branch.
fn most_recent_on_branch(ctx: &ResolveContext, branch: &str) -> Result<Option<Rid>, ResolveError> {
    let mut best: Option<(String, Rid)> = None;
    for event in ctx.index.all_checkin_events()? {
        let rid = Rid(event.rid);
        if ctx.tags.branch_of(rid)? != branch {
            continue;
        }
        if best.as_ref().map(|(t, _)| event.timestamp > *t).unwrap_or(true) {
            best = Some((event.timestamp, rid));
        }
    }
    Ok(best.map(|(_, rid)| rid))
}

fn resolve_tag_name(ctx: &ResolveContext, name: &str) -> Result<Rid, ResolveError> {
    let matches = ctx.tags.rids_with_tag(name)?;
    let mut origins: Vec<u64> = matches.iter().map(|(_, row)| row.origin_rid).collect();
    origins.sort_unstable();
    origins.dedup();
    match origins.len() {
        0 => Err(ResolveError::NotFound(name.to_string())),
        1 => Ok(Rid(origins[0])),
        _ => Err(ResolveError::Ambiguous(name.to_string())),
    }
}

fn resolve_date(ctx: &ResolveContext, hint: Option<TypeHint>, date: &str) -> Result<Rid, ResolveError> {
    let kind = hint.unwrap_or(TypeHint::CheckIn).event_kind();
    let best = ctx
        .index
        .events_by_kind(kind)?
        .into_iter()
        .filter(|e| e.timestamp.as_str() <= date)
        .max_by(|a, b| a.timestamp.cmp(&b.timestamp));
    best.map(|e| Rid(e.rid))
        .ok_or_else(|| ResolveError::NotFound(date.to_string()))
}

/// Resolve `input` to a single RID (spec §4.10). `hint` narrows symbolic
/// and date lookups to one artifact kind; it has no effect on hash/prefix
/// resolution, which is kind-agnostic by construction.
pub fn resolve(ctx: &ResolveContext, input: &str, hint: Option<TypeHint>) -> Result<Rid, ResolveError> {
    if let Some(name) = input.strip_prefix("tag:") {
        return resolve_tag_name(ctx, name);
    }

    match input {
        "tip" | "latest" => return tip(ctx.index)?.ok_or_else(|| ResolveError::NotFound(input.to_string())),
        "trunk" => {
            return most_recent_on_branch(ctx, "trunk")?
                .ok_or_else(|| ResolveError::NotFound(input.to_string()))
        }
        "current" => {
            return ctx
                .current_checkout
                .ok_or_else(|| ResolveError::NotFound(input.to_string()))
        }
        _ => {}
    }

    if is_hex(input) && input.len() >= 4 {
        match ctx.store.rid_of(input) {
            Ok(rid) => return Ok(rid),
            Err(fossil_objects::ObjectError::Ambiguous(_)) => {
                return Err(ResolveError::Ambiguous(input.to_string()))
            }
            Err(fossil_objects::ObjectError::PrefixNotFound(_)) => {
                // Fall through: might be a branch or tag name that happens
                // to consist only of hex characters.
            }
            Err(e) => return Err(e.into()),
        }
    }

    if looks_like_date(input) {
        return resolve_date(ctx, hint, input);
    }

    if let Some(rid) = most_recent_on_branch(ctx, input)? {
        return Ok(rid);
    }

    resolve_tag_name(ctx, input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fossil_artifact::cards::{make_z_card, serialize_cards, Card};
    use fossil_objects::{PutFlags, PutOutcome, StoreConfig};

    fn setup() -> (sled::Db, BlobStore, Index, TagEngine) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store = BlobStore::open_in_memory(StoreConfig::default()).unwrap();
        let index = Index::open(&db).unwrap();
        let tags = TagEngine::open(&db).unwrap();
        (db, store, index, tags)
    }

    fn checkin(store: &BlobStore, index: &Index, date: &str, path: &str, content: &[u8]) -> Rid {
        let hash_hex = fossil_hash::hash(content, fossil_hash::HashAlgo::Sha3_256).to_hex();
        store.put(content, PutFlags::NONE).unwrap();
        let mut cards = vec![
            Card { letter: b'C', tokens: vec![b"msg".to_vec()], body: None },
            Card { letter: b'D', tokens: vec![date.as_bytes().to_vec()], body: None },
            Card {
                letter: b'F',
                tokens: vec![path.as_bytes().to_vec(), hash_hex.into_bytes()],
                body: None,
            },
            Card { letter: b'U', tokens: vec![b"alice".to_vec()], body: None },
        ];
        cards.push(make_z_card(&cards));
        let bytes = serialize_cards(&cards);
        let cards = fossil_artifact::cards::parse_and_verify(&bytes).unwrap();
        let rid = match store.put(&bytes, PutFlags::NONE).unwrap() {
            PutOutcome::Stored { rid, .. } => rid,
            _ => panic!(),
        };
        fossil_artifact::crosslink(index, store, rid, &cards).unwrap();
        rid
    }

    #[test]
    fn resolves_full_hash_prefix() {
        let (_db, store, index, tags) = setup();
        let rid = checkin(&store, &index, "2024-01-01T00:00:00.000", "a.txt", b"one");
        let hash_hex = store.hash_of(rid).unwrap().to_hex();
        let ctx = ResolveContext {
            store: &store,
            index: &index,
            tags: &tags,
            current_checkout: None,
        };
        assert_eq!(resolve(&ctx, &hash_hex[..8], None).unwrap(), rid);
    }

    #[test]
    fn tip_is_the_most_recent_checkin() {
        let (_db, store, index, tags) = setup();
        checkin(&store, &index, "2024-01-01T00:00:00.000", "a.txt", b"one");
        let later = checkin(&store, &index, "2024-06-01T00:00:00.000", "b.txt", b"two");
        let ctx = ResolveContext {
            store: &store,
            index: &index,
            tags: &tags,
            current_checkout: None,
        };
        assert_eq!(resolve(&ctx, "tip", None).unwrap(), later);
        assert_eq!(resolve(&ctx, "latest", None).unwrap(), later);
    }

    #[test]
    fn branch_name_resolves_to_its_most_recent_checkin() {
        let (_db, store, index, tags) = setup();
        let root = checkin(&store, &index, "2024-01-01T00:00:00.000", "a.txt", b"one");
        tags.insert(&index, "branch", fossil_tag::TagType::Propagate, Some("feature"), root, "2024-01-01T00:00:00.000", root).unwrap();
        let ctx = ResolveContext {
            store: &store,
            index: &index,
            tags: &tags,
            current_checkout: None,
        };
        assert_eq!(resolve(&ctx, "feature", None).unwrap(), root);
    }

    #[test]
    fn date_resolves_to_nearest_prior_checkin() {
        let (_db, store, index, tags) = setup();
        let early = checkin(&store, &index, "2024-01-01T00:00:00.000", "a.txt", b"one");
        checkin(&store, &index, "2024-06-01T00:00:00.000", "b.txt", b"two");
        let ctx = ResolveContext {
            store: &store,
            index: &index,
            tags: &tags,
            current_checkout: None,
        };
        assert_eq!(resolve(&ctx, "2024-03-01T00:00:00.000", None).unwrap(), early);
    }

    #[test]
    fn unknown_name_is_not_found() {
        let (_db, store, index, tags) = setup();
        let ctx = ResolveContext {
            store: &store,
            index: &index,
            tags: &tags,
            current_checkout: None,
        };
        assert!(matches!(resolve(&ctx, "nonexistent", None), Err(ResolveError::NotFound(_))));
    }
}
