//! Artifact classification and typed field access over a parsed card
//! sequence (spec §4.4).

use crate::cards::Card;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    CheckIn,
    Cluster,
    Control,
    Wiki,
    Event,
    TicketChange,
    Attachment,
    Forum,
    Unknown,
}

/// Determine an artifact's type from which cards appear (spec §4.4).
/// Order matters: some letters are shared across classes (`D`, `U`, `Z`
/// appear almost everywhere), so the more specific identifying letter is
/// checked first.
pub fn classify(cards: &[Card]) -> ArtifactKind {
    let has = |l: u8| cards.iter().any(|c| c.letter == l);
    if has(b'K') && has(b'J') {
        ArtifactKind::TicketChange
    } else if has(b'A') {
        ArtifactKind::Attachment
    } else if has(b'L') && has(b'W') {
        ArtifactKind::Wiki
    } else if has(b'E') && has(b'W') {
        ArtifactKind::Event
    } else if has(b'G') || has(b'H') || has(b'I') {
        ArtifactKind::Forum
    } else if has(b'M') && !has(b'F') {
        ArtifactKind::Cluster
    } else if has(b'F') && has(b'D') && has(b'U') {
        ArtifactKind::CheckIn
    } else if has(b'T') && has(b'D') && has(b'U') && !has(b'F') {
        ArtifactKind::Control
    } else {
        ArtifactKind::Unknown
    }
}

/// One `F`-card: `path hash ?permission? ?oldpath?` (spec §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub hash_hex: String,
    pub permission: Option<String>,
    pub old_path: Option<String>,
}

pub fn file_entries(cards: &[Card]) -> Vec<FileEntry> {
    cards
        .iter()
        .filter(|c| c.letter == b'F')
        .filter_map(|c| {
            let path = c.token_str(0)?;
            let hash_hex = c.token_str(1)?;
            let permission = c.token_str(2);
            let old_path = c.token_str(3);
            Some(FileEntry {
                path,
                hash_hex,
                permission,
                old_path,
            })
        })
        .collect()
}

/// `P`-cards: space-separated parent hashes. There may be more than one
/// `P` card in principle but Fossil always emits a single card with all
/// parents as tokens; we accept both shapes defensively.
pub fn parent_hashes(cards: &[Card]) -> Vec<String> {
    cards
        .iter()
        .filter(|c| c.letter == b'P')
        .flat_map(|c| (0..c.tokens.len()).filter_map(|i| c.token_str(i)))
        .collect()
}

pub fn comment(cards: &[Card]) -> Option<String> {
    cards.iter().find(|c| c.letter == b'C').and_then(|c| c.token_str(0))
}

pub fn date(cards: &[Card]) -> Option<String> {
    cards.iter().find(|c| c.letter == b'D').and_then(|c| c.token_str(0))
}

pub fn user(cards: &[Card]) -> Option<String> {
    cards.iter().find(|c| c.letter == b'U').and_then(|c| c.token_str(0))
}

pub fn mimetype(cards: &[Card]) -> Option<String> {
    cards.iter().find(|c| c.letter == b'N').and_then(|c| c.token_str(0))
}

pub fn wiki_title(cards: &[Card]) -> Option<String> {
    cards.iter().find(|c| c.letter == b'L').and_then(|c| c.token_str(0))
}

pub fn wiki_body(cards: &[Card]) -> Option<Vec<u8>> {
    cards.iter().find(|c| c.letter == b'W').and_then(|c| c.body.clone())
}

/// `T`-card: `+|-|*tag-name target-hash ?value` (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagSigil {
    /// `+`: add singleton.
    Add,
    /// `-`: cancel.
    Cancel,
    /// `*`: add propagating.
    Propagate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCard {
    pub sigil: TagSigil,
    pub name: String,
    pub target_hash: String,
    pub value: Option<String>,
}

pub fn tag_cards(cards: &[Card]) -> Vec<TagCard> {
    cards
        .iter()
        .filter(|c| c.letter == b'T')
        .filter_map(|c| {
            let raw = c.token_str(0)?;
            let (sigil, name) = match raw.chars().next()? {
                '+' => (TagSigil::Add, raw[1..].to_string()),
                '-' => (TagSigil::Cancel, raw[1..].to_string()),
                '*' => (TagSigil::Propagate, raw[1..].to_string()),
                _ => return None,
            };
            let target_hash = c.token_str(1)?;
            let value = c.token_str(2);
            Some(TagCard {
                sigil,
                name,
                target_hash,
                value,
            })
        })
        .collect()
}

pub fn cluster_members(cards: &[Card]) -> Vec<String> {
    cards
        .iter()
        .filter(|c| c.letter == b'M')
        .filter_map(|c| c.token_str(0))
        .collect()
}

/// `K`-card (ticket UUID) and `J`-cards (`?+?field-name ?value`).
pub fn ticket_uuid(cards: &[Card]) -> Option<String> {
    cards.iter().find(|c| c.letter == b'K').and_then(|c| c.token_str(0))
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TicketField {
    pub append: bool,
    pub name: String,
    pub value: Option<String>,
}

pub fn ticket_fields(cards: &[Card]) -> Vec<TicketField> {
    cards
        .iter()
        .filter(|c| c.letter == b'J')
        .filter_map(|c| {
            let raw = c.token_str(0)?;
            let (append, name) = if let Some(stripped) = raw.strip_prefix('+') {
                (true, stripped.to_string())
            } else {
                (false, raw)
            };
            let value = c.token_str(1);
            Some(TicketField { append, name, value })
        })
        .collect()
}

/// `A`-card: `filename target artifact-hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentCard {
    pub filename: String,
    pub target: String,
    pub artifact_hash: Option<String>,
}

pub fn attachment(cards: &[Card]) -> Option<AttachmentCard> {
    let c = cards.iter().find(|c| c.letter == b'A')?;
    Some(AttachmentCard {
        filename: c.token_str(0)?,
        target: c.token_str(1)?,
        artifact_hash: c.token_str(2),
    })
}

/// `E`-card: `timestamp tech-note-id`.
pub fn event_id(cards: &[Card]) -> Option<(String, String)> {
    let c = cards.iter().find(|c| c.letter == b'E')?;
    Some((c.token_str(0)?, c.token_str(1)?))
}

/// Aggregate content checksum per spec §4.4/§4.7/§8 invariant 8: md5 of the
/// concatenation `name<space>size\n<bytes>` of every F-card's file content,
/// in F-card order.
pub fn compute_r_card(entries: &[(FileEntry, Vec<u8>)]) -> String {
    let mut buf = Vec::new();
    for (entry, bytes) in entries {
        buf.extend_from_slice(entry.path.as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(bytes.len().to_string().as_bytes());
        buf.push(b'\n');
        buf.extend_from_slice(bytes);
    }
    fossil_hash::md5_hex(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{make_z_card, serialize_cards};

    fn checkin_cards() -> Vec<Card> {
        let mut cards = vec![
            Card { letter: b'C', tokens: vec![b"hello".to_vec()], body: None },
            Card { letter: b'D', tokens: vec![b"2024-01-01T00:00:00.000".to_vec()], body: None },
            Card {
                letter: b'F',
                tokens: vec![b"a.txt".to_vec(), b"5eb63bbbe01eeed093cb22bb8f5acdc3".to_vec()],
                body: None,
            },
            Card { letter: b'U', tokens: vec![b"alice".to_vec()], body: None },
        ];
        cards.push(make_z_card(&cards));
        cards
    }

    #[test]
    fn classifies_checkin() {
        assert_eq!(classify(&checkin_cards()), ArtifactKind::CheckIn);
    }

    #[test]
    fn classifies_control_tag_artifact() {
        let mut cards = vec![
            Card { letter: b'D', tokens: vec![b"2024-01-01T00:00:00.000".to_vec()], body: None },
            Card {
                letter: b'T',
                tokens: vec![b"*branch".to_vec(), b"abcd1234".to_vec(), b"feat".to_vec()],
                body: None,
            },
            Card { letter: b'U', tokens: vec![b"alice".to_vec()], body: None },
        ];
        cards.push(make_z_card(&cards));
        assert_eq!(classify(&cards), ArtifactKind::Control);
        let tags = tag_cards(&cards);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].sigil, TagSigil::Propagate);
        assert_eq!(tags[0].name, "branch");
        assert_eq!(tags[0].value.as_deref(), Some("feat"));
    }

    #[test]
    fn file_entries_parses_rename() {
        let mut cards = checkin_cards();
        cards.insert(
            2,
            Card {
                letter: b'F',
                tokens: vec![
                    b"b.txt".to_vec(),
                    b"deadbeef".to_vec(),
                    b"x".to_vec(),
                    b"old_b.txt".to_vec(),
                ],
                body: None,
            },
        );
        let entries = file_entries(&cards);
        let renamed = entries.iter().find(|e| e.path == "b.txt").unwrap();
        assert_eq!(renamed.old_path.as_deref(), Some("old_b.txt"));
        assert_eq!(renamed.permission.as_deref(), Some("x"));
        let _ = serialize_cards(&cards);
    }

    #[test]
    fn r_card_matches_spec_formula() {
        let entries = vec![
            (
                FileEntry { path: "a.txt".into(), hash_hex: "h1".into(), permission: None, old_path: None },
                b"hello".to_vec(),
            ),
            (
                FileEntry { path: "b.txt".into(), hash_hex: "h2".into(), permission: None, old_path: None },
                b"world".to_vec(),
            ),
        ];
        let mut expected = Vec::new();
        expected.extend_from_slice(b"a.txt 5\nhello");
        expected.extend_from_slice(b"b.txt 5\nworld");
        assert_eq!(compute_r_card(&entries), fossil_hash::md5_hex(&expected));
    }
}
