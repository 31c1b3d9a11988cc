//! Three-way textual merge, ported from `merge3.c`'s `blob_merge`.
//!
//! The merge walks the two independently-computed edit scripts (pivot to
//! V1, pivot to V2) side by side. Where only one side changed a region,
//! that side's edit wins. Where both sides made the identical edit, it is
//! applied once. Where the sides disagree over overlapping lines, the
//! conflicting region is widened line-by-line until it lands on a copy
//! boundary in both scripts, then both versions are emitted between
//! marker lines.

use crate::diff::{diff_triples, split_lines, Line};

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("cannot perform a textual merge on binary input")]
    BinaryInput,
}

#[derive(Debug, Clone)]
pub struct MergeResult {
    pub output: Vec<u8>,
    pub conflicts: usize,
}

impl MergeResult {
    pub fn is_clean(&self) -> bool {
        self.conflicts == 0
    }
}

pub const MERGE_MARKER_BEGIN: &str =
    "<<<<<<< BEGIN MERGE CONFLICT: local copy shown first <<<<<<<<<<<<<<<\n";
pub const MERGE_MARKER_PIVOT: &str =
    "======= COMMON ANCESTOR content follows ============================\n";
pub const MERGE_MARKER_MERGED: &str =
    "======= MERGED IN content follows ==================================\n";
pub const MERGE_MARKER_END: &str =
    ">>>>>>> END MERGE CONFLICT >>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>>\n";

const MARKERS: [&str; 4] = [
    MERGE_MARKER_BEGIN,
    MERGE_MARKER_PIVOT,
    MERGE_MARKER_MERGED,
    MERGE_MARKER_END,
];

fn copy_lines(out: Option<&mut Vec<u8>>, src: &[Line], pos: &mut usize, n: usize) {
    if let Some(out) = out {
        for line in &src[*pos..*pos + n] {
            out.extend_from_slice(line);
        }
    }
    *pos += n;
}

fn same_lines(a: &[Line], a_pos: usize, b: &[Line], b_pos: usize, n: usize) -> bool {
    n == 0 || a[a_pos..a_pos + n] == b[b_pos..b_pos + n]
}

/// True if advancing `sz` lines of the pivot through the edit script
/// starting at `triples[i]` lands exactly on a copy operation rather than
/// partway through a delete.
fn ends_at_copy(triples: &[(usize, usize, usize)], mut i: usize, mut sz: usize) -> bool {
    while sz > 0 && i < triples.len() {
        let (c, d, ins) = triples[i];
        if c == 0 && d == 0 && ins == 0 {
            break;
        }
        if c >= sz {
            return true;
        }
        sz -= c;
        if d > sz {
            return false;
        }
        sz -= d;
        i += 1;
    }
    true
}

/// Output the edited text corresponding to the next `sz` lines of the
/// unedited source, starting at triple index `i`. Returns the triple
/// index to resume from.
fn output_one_side(
    out: &mut Vec<u8>,
    src: &[Line],
    src_pos: &mut usize,
    triples: &mut [(usize, usize, usize)],
    mut i: usize,
    mut sz: usize,
) -> usize {
    while sz > 0 {
        if i >= triples.len() {
            break;
        }
        let (c, d, ins) = triples[i];
        if c == 0 && d == 0 && ins == 0 {
            break;
        }
        if c >= sz {
            copy_lines(Some(out), src, src_pos, sz);
            triples[i].0 -= sz;
            break;
        }
        copy_lines(Some(out), src, src_pos, c);
        copy_lines(Some(out), src, src_pos, ins);
        sz -= c + d;
        i += 1;
    }
    i
}

/// Merge `v1` and `v2`, both edits of `pivot`, into one text. Returns the
/// merged bytes and the number of conflicting regions found; conflicting
/// regions are wrapped in the four `MERGE_MARKER_*` lines and still count
/// toward `conflicts` even though the merge always produces output.
pub fn merge3(pivot: &[u8], v1: &[u8], v2: &[u8]) -> Result<MergeResult, MergeError> {
    if fossil_hash::looks_binary(pivot) || fossil_hash::looks_binary(v1) || fossil_hash::looks_binary(v2) {
        return Err(MergeError::BinaryInput);
    }

    let pivot_lines = split_lines(pivot);
    let v1_lines = split_lines(v1);
    let v2_lines = split_lines(v2);

    let mut t1 = diff_triples(&pivot_lines, &v1_lines);
    let mut t2 = diff_triples(&pivot_lines, &v2_lines);
    let limit1 = t1.len();
    let limit2 = t2.len();

    let mut pivot_pos = 0usize;
    let mut v1_pos = 0usize;
    let mut v2_pos = 0usize;
    let mut out = Vec::new();
    let mut conflicts = 0usize;

    let mut i1 = 0usize;
    let mut i2 = 0usize;

    while i1 < limit1 && i2 < limit2 {
        let (c1, d1, ins1) = t1[i1];
        let (c2, d2, ins2) = t2[i2];

        if c1 > 0 && c2 > 0 {
            let n = c1.min(c2);
            copy_lines(Some(&mut out), &pivot_lines, &mut pivot_pos, n);
            copy_lines(None, &v1_lines, &mut v1_pos, n);
            copy_lines(None, &v2_lines, &mut v2_pos, n);
            t1[i1].0 -= n;
            t2[i2].0 -= n;
        } else if c1 >= d2 && c1 > 0 && d2 + ins2 > 0 {
            copy_lines(None, &pivot_lines, &mut pivot_pos, d2);
            copy_lines(None, &v1_lines, &mut v1_pos, d2);
            copy_lines(Some(&mut out), &v2_lines, &mut v2_pos, ins2);
            t1[i1].0 -= d2;
            i2 += 1;
        } else if c2 >= d1 && c2 > 0 && d1 + ins1 > 0 {
            copy_lines(None, &pivot_lines, &mut pivot_pos, d1);
            copy_lines(None, &v2_lines, &mut v2_pos, d1);
            copy_lines(Some(&mut out), &v1_lines, &mut v1_pos, ins1);
            t2[i2].0 -= d1;
            i1 += 1;
        } else if t1[i1] == t2[i2] && same_lines(&v1_lines, v1_pos, &v2_lines, v2_pos, ins1) {
            let (_, d, ins) = t1[i1];
            copy_lines(None, &pivot_lines, &mut pivot_pos, d);
            copy_lines(Some(&mut out), &v1_lines, &mut v1_pos, ins);
            copy_lines(None, &v2_lines, &mut v2_pos, ins);
            i1 += 1;
            i2 += 1;
        } else {
            let mut sz = 1;
            conflicts += 1;
            while !ends_at_copy(&t1, i1, sz) || !ends_at_copy(&t2, i2, sz) {
                sz += 1;
            }
            out.extend_from_slice(MARKERS[0].as_bytes());
            i1 = output_one_side(&mut out, &v1_lines, &mut v1_pos, &mut t1, i1, sz);
            out.extend_from_slice(MARKERS[1].as_bytes());
            copy_lines(Some(&mut out), &pivot_lines, &mut pivot_pos, sz);
            out.extend_from_slice(MARKERS[2].as_bytes());
            i2 = output_one_side(&mut out, &v2_lines, &mut v2_pos, &mut t2, i2, sz);
            out.extend_from_slice(MARKERS[3].as_bytes());
        }

        if i1 < limit1 && t1[i1] == (0, 0, 0) {
            i1 += 1;
        }
        if i2 < limit2 && t2[i2] == (0, 0, 0) {
            i2 += 1;
        }
    }

    if i1 < limit1 && t1[i1].2 > 0 {
        copy_lines(Some(&mut out), &v1_lines, &mut v1_pos, t1[i1].2);
    } else if i2 < limit2 && t2[i2].2 > 0 {
        copy_lines(Some(&mut out), &v2_lines, &mut v2_pos, t2[i2].2);
    }

    Ok(MergeResult {
        output: out,
        conflicts,
    })
}

/// True if `bytes` contains one of the four conflict-marker lines verbatim
/// — an unresolved merge left in a working file (`merge3.c`'s
/// `contains_merge_marker`).
pub fn contains_merge_marker(bytes: &[u8]) -> bool {
    split_lines(bytes)
        .iter()
        .any(|line| MARKERS.iter().any(|m| line.as_slice() == m.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_edits_merge_cleanly() {
        let pivot = b"one\ntwo\nthree\nfour\nfive\n";
        let v1 = b"ONE\ntwo\nthree\nfour\nfive\n";
        let v2 = b"one\ntwo\nthree\nfour\nFIVE\n";
        let result = merge3(pivot, v1, v2).unwrap();
        assert_eq!(result.conflicts, 0);
        assert_eq!(
            result.output,
            b"ONE\ntwo\nthree\nfour\nFIVE\n".to_vec()
        );
    }

    #[test]
    fn overlapping_edits_produce_a_conflict_with_markers() {
        let pivot = b"alpha\nbeta\ngamma\n";
        let v1 = b"alpha\nBETA-ONE\ngamma\n";
        let v2 = b"alpha\nBETA-TWO\ngamma\n";
        let result = merge3(pivot, v1, v2).unwrap();
        assert_eq!(result.conflicts, 1);
        assert!(contains_merge_marker(&result.output));
        let text = String::from_utf8(result.output).unwrap();
        assert!(text.contains("BETA-ONE"));
        assert!(text.contains("BETA-TWO"));
    }

    #[test]
    fn identical_edits_on_both_sides_merge_without_conflict() {
        let pivot = b"a\nb\nc\n";
        let v1 = b"a\nB\nc\n";
        let v2 = b"a\nB\nc\n";
        let result = merge3(pivot, v1, v2).unwrap();
        assert_eq!(result.conflicts, 0);
        assert_eq!(result.output, b"a\nB\nc\n".to_vec());
    }

    #[test]
    fn unchanged_input_merges_to_itself() {
        let pivot = b"same\ntext\n";
        let result = merge3(pivot, pivot, pivot).unwrap();
        assert_eq!(result.conflicts, 0);
        assert_eq!(result.output, pivot.to_vec());
    }

    #[test]
    fn binary_input_is_rejected() {
        let pivot = b"text\n";
        let mut v1 = b"text\n".to_vec();
        v1.push(0);
        assert!(matches!(merge3(pivot, &v1, pivot), Err(MergeError::BinaryInput)));
    }

    #[test]
    fn clean_merge_has_no_markers() {
        let pivot = b"x\ny\n";
        let v1 = b"X\ny\n";
        let v2 = b"x\nY\n";
        let result = merge3(pivot, v1, v2).unwrap();
        assert!(result.is_clean());
        assert!(!contains_merge_marker(&result.output));
    }
}
