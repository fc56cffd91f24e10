//! dsi-import library interface
//!
//! Imports BIDS-like datasets (subjects, visits, acquisitions with JSON and
//! TSV sidecars) into a SQLite catalog. The binary is a thin CLI over
//! [`orchestrator::Importer`] and [`chunking::ChunkingInvoker`].

pub mod catalog;
pub mod chunking;
pub mod dataset;
pub mod error;
pub mod error_group;
pub mod hed;
pub mod metadata;
pub mod orchestrator;
pub mod pipeline;
pub mod placement;
pub mod report;
pub mod resolve;

pub use crate::error::{ImportError, ImportResult};
pub use crate::orchestrator::{ImportOptions, Importer};
pub use crate::report::{ImportOutcome, RunReport};
