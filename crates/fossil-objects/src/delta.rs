//! Binary delta engine (C3).
//!
//! A delta is a sequence of copy-from-source and insert-literal operations
//! terminated by a checksum (spec §4.3). The matcher below is a block-hash
//! greedy scan: it is not Fossil's exact rsync-style algorithm, but it
//! produces the same wire shape and satisfies the same round-trip law,
//! which is the only property the spec makes load-bearing (§8, item 5).

use thiserror::Error;

const BLOCK: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeltaError {
    #[error("truncated delta header")]
    TruncatedHeader,
    #[error("malformed delta opcode at offset {0}")]
    MalformedOpcode(usize),
    #[error("delta references source offset {0} out of range (source len {1})")]
    SourceOutOfRange(usize, usize),
    #[error("checksum mismatch: delta claims {expected:08x}, target computed {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("delta target length mismatch: header said {header}, produced {produced}")]
    LengthMismatch { header: usize, produced: usize },
}

/// Adler-32 checksum, matching the terminator format of spec §4.3/§6.
pub fn adler32(bytes: &[u8]) -> u32 {
    const MOD_ADLER: u32 = 65521;
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for &byte in bytes {
        a = (a + byte as u32) % MOD_ADLER;
        b = (b + a) % MOD_ADLER;
    }
    (b << 16) | a
}

/// Build an index of every `BLOCK`-byte window of `source` keyed by its raw
/// bytes, so the scan below can find copy candidates in O(1) expected time.
fn build_index(source: &[u8]) -> std::collections::HashMap<&[u8], usize> {
    let mut index = std::collections::HashMap::new();
    if source.len() >= BLOCK {
        for i in 0..=(source.len() - BLOCK) {
            // Keep the earliest occurrence: matches cheap, later duplicate
            // blocks are more likely additions.
            index.entry(&source[i..i + BLOCK]).or_insert(i);
        }
    }
    index
}

enum Op {
    Copy { count: usize, offset: usize },
    Insert { count: usize, start: usize },
}

/// Compute a delta that turns `source` into `target`. Returns `None` when
/// the delta would not be smaller than storing `target` whole — callers
/// then store the target literally (spec §4.3: "deltas that would exceed
/// the literal size are rejected").
pub fn create(source: &[u8], target: &[u8]) -> Option<Vec<u8>> {
    let index = build_index(source);
    let mut ops = Vec::new();
    let mut j = 0usize;
    let mut pending_start = 0usize;

    while j < target.len() {
        let have_block = j + BLOCK <= target.len();
        let found = have_block
            .then(|| index.get(&target[j..j + BLOCK]).copied())
            .flatten();

        match found {
            Some(src_pos) => {
                if pending_start < j {
                    ops.push(Op::Insert {
                        count: j - pending_start,
                        start: pending_start,
                    });
                }
                // Extend the match as far as both sides agree.
                let mut len = BLOCK;
                while j + len < target.len()
                    && src_pos + len < source.len()
                    && target[j + len] == source[src_pos + len]
                {
                    len += 1;
                }
                ops.push(Op::Copy {
                    count: len,
                    offset: src_pos,
                });
                j += len;
                pending_start = j;
            }
            None => {
                j += 1;
            }
        }
    }
    if pending_start < target.len() {
        ops.push(Op::Insert {
            count: target.len() - pending_start,
            start: pending_start,
        });
    }

    let mut out = format!("{}\n", target.len()).into_bytes();
    for op in &ops {
        match op {
            Op::Copy { count, offset } => {
                out.extend_from_slice(format!("{}@{},", count, offset).as_bytes());
            }
            Op::Insert { count, start } => {
                out.extend_from_slice(format!("{}:", count).as_bytes());
                out.extend_from_slice(&target[*start..*start + *count]);
            }
        }
    }
    out.extend_from_slice(format!(";{:08x}", adler32(target)).as_bytes());

    if out.len() >= target.len() {
        None
    } else {
        Some(out)
    }
}

/// Apply `delta` to `source`, reproducing the original target (spec §4.3
/// round-trip law, §8 item 5).
pub fn apply(source: &[u8], delta: &[u8]) -> Result<Vec<u8>, DeltaError> {
    let nl = delta
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(DeltaError::TruncatedHeader)?;
    let header_len: usize = std::str::from_utf8(&delta[..nl])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(DeltaError::TruncatedHeader)?;

    let mut out = Vec::with_capacity(header_len);
    let mut i = nl + 1;
    while i < delta.len() && delta[i] != b';' {
        let num_start = i;
        while i < delta.len() && delta[i].is_ascii_digit() {
            i += 1;
        }
        if i == num_start {
            return Err(DeltaError::MalformedOpcode(i));
        }
        let count: usize = std::str::from_utf8(&delta[num_start..i])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(DeltaError::MalformedOpcode(num_start))?;
        match delta.get(i) {
            Some(b'@') => {
                i += 1;
                let off_start = i;
                while i < delta.len() && delta[i].is_ascii_digit() {
                    i += 1;
                }
                let offset: usize = std::str::from_utf8(&delta[off_start..i])
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(DeltaError::MalformedOpcode(off_start))?;
                if delta.get(i) != Some(&b',') {
                    return Err(DeltaError::MalformedOpcode(i));
                }
                i += 1;
                if offset + count > source.len() {
                    return Err(DeltaError::SourceOutOfRange(offset + count, source.len()));
                }
                out.extend_from_slice(&source[offset..offset + count]);
            }
            Some(b':') => {
                i += 1;
                if i + count > delta.len() {
                    return Err(DeltaError::MalformedOpcode(i));
                }
                out.extend_from_slice(&delta[i..i + count]);
                i += count;
            }
            _ => return Err(DeltaError::MalformedOpcode(i)),
        }
    }
    if delta.get(i) != Some(&b';') {
        return Err(DeltaError::TruncatedHeader);
    }
    let hex_start = i + 1;
    let expected = u32::from_str_radix(
        std::str::from_utf8(&delta[hex_start..]).map_err(|_| DeltaError::TruncatedHeader)?,
        16,
    )
    .map_err(|_| DeltaError::TruncatedHeader)?;
    let actual = adler32(&out);
    if expected != actual {
        return Err(DeltaError::ChecksumMismatch { expected, actual });
    }
    if out.len() != header_len {
        return Err(DeltaError::LengthMismatch {
            header: header_len,
            produced: out.len(),
        });
    }
    Ok(out)
}
