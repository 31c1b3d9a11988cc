//! Binary/UTF-8 classification used only to guard the merger (C1, spec §4.1,
//! `SPEC_FULL.md` §B "lookslike.c" supplement).

/// Bytes examined when deciding whether a blob "looks binary". Fossil's
/// `looks_binary` only needs to look at a bounded prefix; scanning the
/// whole file would make huge blobs pathologically slow to diff-guard.
const SNIFF_WINDOW: usize = 1 << 20;
const MAX_LINE_LEN: usize = 8192;

/// True if the blob contains a NUL byte or a line longer than 8192 bytes,
/// within the first examined window. This classification exists purely to
/// guard the three-way merger (spec §4.7 step 1); it is never persisted.
pub fn looks_binary(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(SNIFF_WINDOW)];
    let mut line_len = 0usize;
    for &b in window {
        if b == 0 {
            return true;
        }
        if b == b'\n' {
            line_len = 0;
        } else {
            line_len += 1;
            if line_len > MAX_LINE_LEN {
                return true;
            }
        }
    }
    false
}

/// UTF-8 validity per RFC 3629, with the pragmatic exception that an
/// embedded NUL byte does not itself invalidate an otherwise well-formed
/// sequence (spec §4.1).
pub fn utf8_validate(bytes: &[u8]) -> bool {
    std::str::from_utf8(bytes).is_ok()
}

/// Additive classification (SPEC_FULL.md §B): whether the blob mixes CRLF
/// and bare LF line endings. Used only to decide whether the merger should
/// emit a warning about inconsistent line endings; it never blocks a merge.
pub fn has_mixed_line_endings(bytes: &[u8]) -> bool {
    let mut saw_crlf = false;
    let mut saw_bare_lf = false;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\n' {
            if i > 0 && bytes[i - 1] == b'\r' {
                saw_crlf = true;
            } else {
                saw_bare_lf = true;
            }
        }
        i += 1;
    }
    saw_crlf && saw_bare_lf
}

/// Additive classification (SPEC_FULL.md §B): whether the blob opens with a
/// UTF-8 byte-order mark.
pub fn has_bom(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0xEF, 0xBB, 0xBF])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nul_byte_is_binary() {
        assert!(looks_binary(b"hello\0world"));
    }

    #[test]
    fn plain_text_is_not_binary() {
        assert!(!looks_binary(b"line one\nline two\n"));
    }

    #[test]
    fn long_line_is_binary() {
        let long_line = vec![b'x'; MAX_LINE_LEN + 1];
        assert!(looks_binary(&long_line));
    }

    #[test]
    fn exactly_max_line_len_is_not_binary() {
        let line = vec![b'x'; MAX_LINE_LEN];
        assert!(!looks_binary(&line));
    }

    #[test]
    fn valid_utf8_passes() {
        assert!(utf8_validate("héllo wörld".as_bytes()));
    }

    #[test]
    fn invalid_utf8_fails() {
        assert!(!utf8_validate(&[0xff, 0xfe, 0xfd]));
    }

    #[test]
    fn mixed_line_endings_detected() {
        assert!(has_mixed_line_endings(b"a\r\nb\nc\r\n"));
        assert!(!has_mixed_line_endings(b"a\nb\nc\n"));
        assert!(!has_mixed_line_endings(b"a\r\nb\r\n"));
    }
}
