//! Line-level diff producing edit triples, the representation `merge3.c`
//! builds its three-way merge on top of.
//!
//! Each triple is `(copy, delete, insert)`: copy that many lines unchanged
//! from the base, then drop `delete` base lines, then take `insert` lines
//! from the edited side. A full edit script is a `Vec` of these triples,
//! read in order.

/// A line including its trailing `\n`, if the source had one. Splitting
/// this way means concatenating every line reproduces the input exactly,
/// and a file lacking a final newline yields a last line without one.
pub type Line = Vec<u8>;

pub fn split_lines(bytes: &[u8]) -> Vec<Line> {
    if bytes.is_empty() {
        return Vec::new();
    }
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\n' {
            lines.push(bytes[start..=i].to_vec());
            start = i + 1;
        }
    }
    if start < bytes.len() {
        lines.push(bytes[start..].to_vec());
    }
    lines
}

/// Longest-common-subsequence diff between `a` (the base) and `b` (the
/// edited copy), expressed as copy/delete/insert triples.
pub fn diff_triples(a: &[Line], b: &[Line]) -> Vec<(usize, usize, usize)> {
    let n = a.len();
    let m = b.len();
    let mut dp = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            dp[i][j] = if a[i] == b[j] {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }

    enum Op {
        Copy,
        Delete,
        Insert,
    }
    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0usize, 0usize);
    while i < n && j < m {
        if a[i] == b[j] && dp[i][j] == dp[i + 1][j + 1] + 1 {
            ops.push(Op::Copy);
            i += 1;
            j += 1;
        } else if dp[i + 1][j] >= dp[i][j + 1] {
            ops.push(Op::Delete);
            i += 1;
        } else {
            ops.push(Op::Insert);
            j += 1;
        }
    }
    while i < n {
        ops.push(Op::Delete);
        i += 1;
    }
    while j < m {
        ops.push(Op::Insert);
        j += 1;
    }

    let mut triples = Vec::new();
    let mut cur = (0usize, 0usize, 0usize);
    let mut in_edit = false;
    for op in ops {
        match op {
            Op::Copy => {
                if in_edit {
                    triples.push(cur);
                    cur = (0, 0, 0);
                    in_edit = false;
                }
                cur.0 += 1;
            }
            Op::Delete => {
                in_edit = true;
                cur.1 += 1;
            }
            Op::Insert => {
                in_edit = true;
                cur.2 += 1;
            }
        }
    }
    triples.push(cur);
    triples
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(s: &str) -> Vec<Line> {
        split_lines(s.as_bytes())
    }

    fn apply(base: &[Line], triples: &[(usize, usize, usize)], edited: &[Line]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut bpos = 0;
        let mut epos = 0;
        for &(c, d, ins) in triples {
            out.extend(base[bpos..bpos + c].concat());
            bpos += c + d;
            out.extend(edited[epos..epos + ins].concat());
            epos += ins;
        }
        out
    }

    #[test]
    fn identical_input_is_all_copy() {
        let a = lines("one\ntwo\nthree\n");
        let triples = diff_triples(&a, &a);
        assert_eq!(triples, vec![(3, 0, 0)]);
    }

    #[test]
    fn single_line_edit_round_trips() {
        let base = lines("one\ntwo\nthree\n");
        let edited = lines("one\nTWO\nthree\n");
        let triples = diff_triples(&base, &edited);
        assert_eq!(apply(&base, &triples, &edited), edited.concat());
    }

    #[test]
    fn pure_insert_round_trips() {
        let base = lines("one\ntwo\n");
        let edited = lines("one\ntwo\nthree\n");
        let triples = diff_triples(&base, &edited);
        assert_eq!(apply(&base, &triples, &edited), edited.concat());
    }

    #[test]
    fn pure_delete_round_trips() {
        let base = lines("one\ntwo\nthree\n");
        let edited = lines("one\nthree\n");
        let triples = diff_triples(&base, &edited);
        assert_eq!(apply(&base, &triples, &edited), edited.concat());
    }
}
