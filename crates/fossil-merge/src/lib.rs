//! Three-way textual merge engine (C8).

pub mod diff;
pub mod gmerge;
pub mod merge3;

pub use diff::{diff_triples, split_lines, Line};
pub use gmerge::{build_gmerge_command, string_subst};
pub use merge3::{
    contains_merge_marker, merge3 as merge, MergeError, MergeResult, MERGE_MARKER_BEGIN,
    MERGE_MARKER_END, MERGE_MARKER_MERGED, MERGE_MARKER_PIVOT,
};
