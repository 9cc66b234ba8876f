//! The transaction pipeline: JSON-LD expansion and staging (spec §4.3).

pub mod expand;
pub mod stage;

pub use expand::Context;
pub use stage::{classify, stage, stage_insert, stage_modify, StageRequest, TxnKind};
