//! Subject and visit resolution against the catalog
//!
//! Inserts are flushed but never committed here; the caller commits a whole
//! batch once every subject and visit of the dataset has been resolved.

mod subject;
mod visit;

pub use subject::{generate_cand_id, normalize_sex, resolve_or_create_subject, CAND_ID_RANGE};
pub use visit::{resolve_or_create_visit, visit_label};

/// Name recorded as the creator of catalog rows made by this tool
pub const REGISTERED_BY: &str = "dsi-import";
