//! The card-based textual grammar (spec §4.4) and its Z-card checksum.

use fossil_hash::md5_hex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CardError {
    #[error("empty line where a card was expected")]
    EmptyLine,
    #[error("truncated W-card body: wanted {wanted} bytes, only {have} remained")]
    TruncatedBody { wanted: usize, have: usize },
    #[error("W-card byte count is not a valid integer")]
    BadByteCount,
    #[error("artifact has no trailing Z-card")]
    MissingZCard,
    #[error("Z-card checksum mismatch: header says {header}, computed {computed}")]
    ChecksumMismatch { header: String, computed: String },
    #[error("card appears after the terminating Z-card")]
    TrailingDataAfterZ,
}

/// One line of a structured artifact (spec §4.4).
///
/// Token bytes are stored exactly as they appear on the wire (already
/// fossilize-escaped where the grammar requires it); callers that need the
/// semantic value call `fossil_hash::defossilize` on the token they need.
/// Keeping cards byte-exact is what makes parse-then-serialize the
/// identity function on well-formed input (spec §8 invariant 6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub letter: u8,
    pub tokens: Vec<Vec<u8>>,
    /// Only set for the `W` (wiki body) card.
    pub body: Option<Vec<u8>>,
}

impl Card {
    pub fn token_str(&self, i: usize) -> Option<String> {
        self.tokens
            .get(i)
            .and_then(|t| fossil_hash::defossilize(t).ok())
            .and_then(|b| String::from_utf8(b).ok())
    }
}

fn split_tokens(line: &[u8]) -> Vec<Vec<u8>> {
    line.split(|&b| b == b' ')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_vec())
        .collect()
}

/// Parse the card sequence of a structured artifact, without verifying the
/// Z-card checksum (see [`parse_and_verify`] for that).
pub fn parse_cards(bytes: &[u8]) -> Result<Vec<Card>, CardError> {
    let mut cards = Vec::new();
    let mut i = 0usize;
    let mut saw_z = false;
    while i < bytes.len() {
        if saw_z {
            return Err(CardError::TrailingDataAfterZ);
        }
        let nl = bytes[i..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| i + p)
            .unwrap_or(bytes.len());
        let line = &bytes[i..nl];
        if line.is_empty() {
            return Err(CardError::EmptyLine);
        }
        let letter = line[0];
        let rest = &line[1..];
        let tokens = split_tokens(rest);
        let line_end = (nl + 1).min(bytes.len());

        if letter == b'W' {
            let count: usize = tokens
                .first()
                .and_then(|t| std::str::from_utf8(t).ok())
                .and_then(|s| s.parse().ok())
                .ok_or(CardError::BadByteCount)?;
            let body_start = line_end;
            let body_end = body_start + count;
            if body_end > bytes.len() {
                return Err(CardError::TruncatedBody {
                    wanted: count,
                    have: bytes.len() - body_start,
                });
            }
            let body = bytes[body_start..body_end].to_vec();
            i = body_end;
            // The body is followed by its own newline.
            if bytes.get(i) == Some(&b'\n') {
                i += 1;
            }
            cards.push(Card {
                letter,
                tokens: vec![tokens.first().cloned().unwrap_or_default()],
                body: Some(body),
            });
        } else {
            if letter == b'Z' {
                saw_z = true;
            }
            cards.push(Card {
                letter,
                tokens,
                body: None,
            });
            i = line_end;
        }
    }
    Ok(cards)
}

/// Re-serialize cards to their exact wire bytes.
pub fn serialize_cards(cards: &[Card]) -> Vec<u8> {
    let mut out = Vec::new();
    for card in cards {
        out.push(card.letter);
        if card.letter == b'W' {
            out.push(b' ');
            out.extend_from_slice(&card.tokens[0]);
            out.push(b'\n');
            if let Some(body) = &card.body {
                out.extend_from_slice(body);
            }
            out.push(b'\n');
        } else {
            for token in &card.tokens {
                out.push(b' ');
                out.extend_from_slice(token);
            }
            out.push(b'\n');
        }
    }
    out
}

/// Parse cards and verify the trailing Z-card checksum (spec §4.4): the
/// checksum is the MD5 of every byte preceding the `Z` card.
pub fn parse_and_verify(bytes: &[u8]) -> Result<Vec<Card>, CardError> {
    let cards = parse_cards(bytes)?;
    let z_index = cards
        .iter()
        .position(|c| c.letter == b'Z')
        .ok_or(CardError::MissingZCard)?;
    // Re-serialize everything up to (not including) the Z-card to compute
    // the checksum over exactly the bytes the original writer hashed.
    let prefix = serialize_cards(&cards[..z_index]);
    let computed = md5_hex(&prefix);
    let header = cards[z_index]
        .tokens
        .first()
        .map(|t| String::from_utf8_lossy(t).to_string())
        .unwrap_or_default();
    if !header.eq_ignore_ascii_case(&computed) {
        return Err(CardError::ChecksumMismatch { header, computed });
    }
    Ok(cards)
}

/// Build a well-formed Z-card for a card sequence that does not yet have
/// one, matching the checksum convention parse_and_verify checks.
pub fn make_z_card(cards_without_z: &[Card]) -> Card {
    let prefix = serialize_cards(cards_without_z);
    let digest = md5_hex(&prefix);
    Card {
        letter: b'Z',
        tokens: vec![digest.into_bytes()],
        body: None,
    }
}
