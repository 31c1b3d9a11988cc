//! Structured-artifact card grammar and crosslink/indexer (components C4,
//! C5).

pub mod cards;
pub mod grammar;
pub mod index;

pub use cards::{Card, CardError};
pub use grammar::{
    attachment, classify, cluster_members, comment, compute_r_card, date, event_id,
    file_entries, mimetype, parent_hashes, tag_cards, ticket_fields, ticket_uuid, user,
    wiki_body, wiki_title, ArtifactKind, AttachmentCard, FileEntry, TagCard, TagSigil,
    TicketField,
};
pub use index::{
    crosslink, ArtifactError, CrosslinkOutcome, EventRow, Index, MlinkRow, PlinkRow,
};
