//! External graphical-merge command construction, ported from
//! `merge3.c`'s `string_subst`/`merge_3way`.
//!
//! The core library never spawns processes itself (spec's boundary:
//! side-effecting command execution belongs to the orchestration layer).
//! [`build_gmerge_command`] only performs the `%token` substitution and
//! hands back the command line the caller should run when a merge left
//! conflicts and a `gmerge-command` is configured.

/// Replace every `%name` occurrence in `template` with its paired value.
/// Unrecognized `%` sequences are passed through unchanged, matching
/// `string_subst`'s fallback of re-emitting the literal `%` and advancing
/// one character.
pub fn string_subst(template: &str, subst: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            let start = i;
            while i < bytes.len() && bytes[i] != b'%' {
                i += 1;
            }
            out.push_str(&template[start..i]);
            continue;
        }
        let rest = &template[i..];
        if let Some((name, value)) = subst.iter().find(|(name, _)| rest.starts_with(name)) {
            out.push_str(value);
            i += name.len();
        } else {
            out.push('%');
            i += 1;
        }
    }
    out
}

/// Build the command line for an external `gmerge-command` given the four
/// well-known file placeholders (`%baseline`, `%original`, `%merge`,
/// `%output`).
pub fn build_gmerge_command(
    template: &str,
    baseline_path: &str,
    original_path: &str,
    merge_path: &str,
    output_path: &str,
) -> String {
    string_subst(
        template,
        &[
            ("%baseline", baseline_path),
            ("%original", original_path),
            ("%merge", merge_path),
            ("%output", output_path),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_all_known_tokens() {
        let cmd = build_gmerge_command(
            "meld %baseline %original %merge --output=%output",
            "/tmp/base",
            "/tmp/orig",
            "/tmp/merge",
            "/tmp/out",
        );
        assert_eq!(cmd, "meld /tmp/base /tmp/orig /tmp/merge --output=/tmp/out");
    }

    #[test]
    fn unknown_percent_token_passes_through() {
        let cmd = string_subst("100%% done %baseline", &[("%baseline", "base.txt")]);
        assert_eq!(cmd, "100%% done base.txt");
    }
}
