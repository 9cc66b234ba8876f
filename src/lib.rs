//! flakedb-core: a content-addressed, JSON-LD semantic graph database with a
//! Merkle-chained commit log.
//!
//! ## Core principles
//!
//! 1. **Flakes, not rows.** Every asserted or retracted fact is an atomic
//!    `(s, p, o, dt, t, op, m)` tuple (spec §3.1); nothing is ever mutated in
//!    place, only retracted and re-asserted at a later `t`.
//! 2. **Content-addressed history.** Every commit and its data payload are
//!    hashed (SHA-256/base32) and chained via `previous` references, so a
//!    ledger's full history is independently verifiable (spec §4.4, §6.5).
//! 3. **Schema and shapes are derived, not declared up front.** Class and
//!    property hierarchies (`schema`) and SHACL shapes (`shacl`) are hydrated
//!    incrementally from the flakes already in the graph.
//! 4. **Access control rides the same graph.** Policies (`policy`) are
//!    ordinary subjects, compiled per request and enforced on both the read
//!    and write paths (spec §4.6).
//!
//! [`db::Db`] ties these pieces together into the write/read pipeline
//! described in spec §2: classify -> stage -> validate -> authorize ->
//! refresh schema -> commit/reify.

pub mod commit;
pub mod config;
pub mod db;
pub mod error;
pub mod flake;
pub mod fuel;
pub mod novelty;
pub mod policy;
pub mod schema;
pub mod shacl;
pub mod sid;
pub mod storage;
pub mod transact;
pub mod vocab;

pub use config::{LedgerConfig, TransactorOptions};
pub use db::{Db, StagedDb, TransactMeta};
pub use error::{DbError, ErrorKind, Result, ValidationReport, ValidationResult};
pub use flake::{Flake, Object};
pub use novelty::Novelty;
pub use policy::{Action, CompiledPolicies, RequestContext};
pub use schema::Schema;
pub use sid::{IriCodec, Sid};
pub use vocab::Vocab;
