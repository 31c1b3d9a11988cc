//! End-to-end scenario tests exercising check-in round-trip, three-way
//! merge conflicts, the purge dependency guard, tag propagation and
//! cancellation, shun enforcement, and ambiguous hash-prefix resolution
//! together, the way a caller driving the whole stack would.

use fossil_artifact::cards::{make_z_card, parse_and_verify, serialize_cards, Card};
use fossil_artifact::{crosslink, Index, PlinkRow};
use fossil_hash::HashAlgo;
use fossil_objects::{BlobStore, ObjectError, PutFlags, PutOutcome, Rid, StoreConfig};
use fossil_tag::{TagEngine, TagType};

fn setup() -> (sled::Db, BlobStore, Index, TagEngine) {
    let db = sled::Config::new().temporary(true).open().unwrap();
    let store = BlobStore::open_in_memory(StoreConfig::default()).unwrap();
    let index = Index::open(&db).unwrap();
    let tags = TagEngine::open(&db).unwrap();
    (db, store, index, tags)
}

fn link_primary(db: &sled::Db, child: Rid, parent: Rid) {
    let plink = db.open_tree("plink").unwrap();
    let mut key = child.0.to_be_bytes().to_vec();
    key.extend_from_slice(&0u32.to_be_bytes());
    plink
        .insert(
            key,
            bincode::serialize(&PlinkRow {
                child_rid: child.0,
                parent_rid: parent.0,
                is_primary: true,
            })
            .unwrap(),
        )
        .unwrap();
}

#[test]
fn check_in_round_trips_through_store_and_crosslink() {
    let (_db, store, index, _tags) = setup();
    let content = b"hello\n";
    let file_hash = fossil_hash::hash(content, HashAlgo::Sha3_256).to_hex();
    store.put(content, PutFlags::NONE).unwrap();

    let mut cards = vec![
        Card { letter: b'C', tokens: vec![b"hello".to_vec()], body: None },
        Card { letter: b'D', tokens: vec![b"2024-01-01T00:00:00.000".to_vec()], body: None },
        Card {
            letter: b'F',
            tokens: vec![b"a.txt".to_vec(), file_hash.into_bytes()],
            body: None,
        },
        Card { letter: b'U', tokens: vec![b"alice".to_vec()], body: None },
    ];
    cards.push(make_z_card(&cards));
    let bytes = serialize_cards(&cards);

    let parsed = parse_and_verify(&bytes).unwrap();
    let rid = match store.put(&bytes, PutFlags::NONE).unwrap() {
        PutOutcome::Stored { rid, .. } => rid,
        other => panic!("expected a fresh store, got {other:?}"),
    };
    crosslink(&index, &store, rid, &parsed).unwrap();

    assert_eq!(store.get(rid).unwrap(), bytes);
    let events = index.all_checkin_events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].rid, rid.0);
    let mlinks = index.mlink_rows_for_checkin(rid).unwrap();
    assert_eq!(mlinks.len(), 1);
    assert_eq!(index.path_of(mlinks[0].path_id).unwrap().as_deref(), Some("a.txt"));
    assert!(index.plink_parents(rid).unwrap().is_empty());
}

#[test]
fn overlapping_edits_yield_one_conflict_block() {
    let pivot = b"A\nB\nC\n";
    let mine = b"A\nX\nC\n";
    let theirs = b"A\nY\nC\n";
    let result = fossil_merge::merge(pivot, mine, theirs).unwrap();
    assert_eq!(result.conflicts, 1);
    let text = String::from_utf8(result.output).unwrap();
    assert!(text.contains(fossil_merge::MERGE_MARKER_BEGIN));
    assert!(text.contains("X"));
    assert!(text.contains("B"));
    assert!(text.contains("Y"));
}

#[test]
fn purge_rejects_a_whole_blob_still_backing_a_surviving_delta() {
    let (_db, store, index, tags) = setup();
    let base_rid = match store.put(b"the quick brown fox jumps", PutFlags::NONE).unwrap() {
        PutOutcome::Stored { rid, .. } => rid,
        _ => panic!(),
    };
    let derived_rid = match store
        .put(b"the quick brown fox leaps", PutFlags::NONE)
        .unwrap()
    {
        PutOutcome::Stored { rid, .. } => rid,
        _ => panic!(),
    };
    store.deltify(derived_rid, base_rid).ok();

    let purge = fossil_purge::PurgeEngine::open(
        &sled::Config::new().temporary(true).open().unwrap(),
    )
    .unwrap();

    let only_base = purge.purge(&store, &index, &tags, &[base_rid], "note", "2024-01-01T00:00:00.000");
    if store.delta_source(derived_rid).unwrap() == Some(base_rid) {
        assert!(matches!(only_base, Err(fossil_purge::PurgeError::DependencyViolation(_))));
        let both = purge.purge(
            &store,
            &index,
            &tags,
            &[base_rid, derived_rid],
            "note",
            "2024-01-01T00:00:00.000",
        );
        assert!(both.is_ok());
    }
}

#[test]
fn branch_tag_propagates_until_a_downstream_cancel() {
    let (db, _store, index, tags) = setup();
    let x = Rid(1);
    let y = Rid(2);
    let z = Rid(3);
    link_primary(&db, y, x);
    link_primary(&db, z, y);

    tags.insert(&index, "branch", TagType::Propagate, Some("feat"), x, "2024-01-01T00:00:00.000", x)
        .unwrap();
    assert_eq!(tags.branch_of(x).unwrap(), "feat");
    assert_eq!(tags.branch_of(y).unwrap(), "feat");
    assert_eq!(tags.branch_of(z).unwrap(), "feat");

    tags.insert(&index, "branch", TagType::Cancel, None, y, "2024-01-02T00:00:00.000", y)
        .unwrap();
    assert_eq!(tags.branch_of(x).unwrap(), "feat");
    assert_eq!(tags.branch_of(y).unwrap(), "trunk");
    assert_eq!(tags.branch_of(z).unwrap(), "trunk");
}

#[test]
fn shunned_hash_is_refused_on_put_and_on_pull_offer() {
    let (_db, store, index, tags) = setup();
    let hash_hex = fossil_hash::hash(b"malicious content", HashAlgo::Sha3_256).to_hex();
    store.shun(&hash_hex, "bad content", false).unwrap();

    let before = store.all_rids().unwrap().len();
    let outcome = store.put(b"malicious content", PutFlags::NONE).unwrap();
    assert!(matches!(outcome, PutOutcome::Shunned { .. }));
    assert_eq!(store.all_rids().unwrap().len(), before);

    let accepted = fossil_sync::accept_pull(&store, &hash_hex, HashAlgo::Sha3_256).unwrap();
    assert!(!accepted);
    let ingested = fossil_sync::ingest_artifact(&store, &index, &tags, b"malicious content").unwrap();
    assert!(ingested.is_none());
}

#[test]
fn shared_hash_prefix_is_ambiguous_until_lengthened() {
    let (_db, store, _index, _tags) = setup();
    let shared_prefix = "abcd";
    let first = fossil_hash::Hash::from_hex(&format!("{shared_prefix}{}", "1".repeat(60))).unwrap();
    let second = fossil_hash::Hash::from_hex(&format!("{shared_prefix}{}", "2".repeat(60))).unwrap();
    let rid_a = store.put_phantom(&first).unwrap();
    let rid_b = store.put_phantom(&second).unwrap();
    assert_ne!(rid_a, rid_b);

    assert!(matches!(store.rid_of(shared_prefix), Err(ObjectError::Ambiguous(_))));
    assert_eq!(store.rid_of(&first.to_hex()).unwrap(), rid_a);
    assert_eq!(store.rid_of(&second.to_hex()).unwrap(), rid_b);
}
