//! Ambient configuration surface: transactor limits and ledger-level defaults.
//!
//! The teacher crate (`codegraph-storage`) has no dedicated config module, but
//! its constructors follow a builder idiom (`Snapshot::with_metadata`,
//! `SqliteSnapshotStore::new_in_memory`); we generalize that idiom here for the
//! knobs spec §5/§9 name: the (optional) fuel budget and the explicit depth
//! guard for recursive JSON-LD node walks.

use crate::commit::codec::LEDGER_CONTEXT;
use crate::fuel::FuelTracker;
use crate::transact::Context;

/// Options governing a single `stage` call (spec §4.3, §9).
#[derive(Debug, Clone)]
pub struct TransactorOptions {
    /// Maximum recursion depth for nested JSON-LD node walks (spec §9 design notes:
    /// "depth guards must be explicit").
    pub max_node_depth: usize,
    /// Maximum recursion depth for SHACL shape materialization (spec §4.5
    /// "up to a fixed depth guard to break cycles").
    pub max_shape_depth: usize,
    pub fuel: Option<FuelTracker>,
}

impl Default for TransactorOptions {
    fn default() -> Self {
        Self {
            max_node_depth: 64,
            max_shape_depth: 32,
            fuel: None,
        }
    }
}

impl TransactorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_node_depth(mut self, depth: usize) -> Self {
        self.max_node_depth = depth;
        self
    }

    pub fn with_max_shape_depth(mut self, depth: usize) -> Self {
        self.max_shape_depth = depth;
        self
    }

    pub fn with_fuel_budget(mut self, budget: u64) -> Self {
        self.fuel = Some(FuelTracker::new(budget));
        self
    }
}

/// Ledger-level configuration: the alias this ledger publishes under, the
/// JSON-LD version IRI stamped on every commit/DB payload (spec §6.3, §6.4),
/// and the default `@context` prefix table every staged document is expanded
/// against before it reaches the stager (spec §4.3 step 1).
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub alias: String,
    pub branch: String,
    pub context_version: String,
    pub default_context: Context,
}

impl LedgerConfig {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            branch: "main".to_string(),
            context_version: LEDGER_CONTEXT.to_string(),
            default_context: Context::new(),
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Register a prefix (`"ex" -> "http://ex/#"`) in this ledger's default
    /// context. A document's own inline `@context` still overrides it
    /// per-node (spec §4.3 step 1).
    pub fn with_prefix(mut self, prefix: impl Into<String>, iri: impl Into<String>) -> Self {
        self.default_context = self.default_context.with_prefix(prefix, iri);
        self
    }
}
