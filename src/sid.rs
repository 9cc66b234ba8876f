//! Subject identifiers (SIDs) and the IRI codec (spec §3.2, §4.1).
//!
//! An SID is a pair `(namespace-code, local-name)`. Namespaces 0–100 are
//! reserved for the defaults below; user-defined namespaces start at 101.
//! SIDs are totally ordered first by namespace code, then by local name.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// First namespace code available for user-defined namespaces.
pub const FIRST_USER_NAMESPACE: u32 = 101;

/// Within a user namespace, local-name ids below this boundary are the
/// "property range" (classes, properties, SHACL shapes); ids at or above it
/// are the "default range" for ordinary individuals (spec §3.2 "ordered
/// ranges for classes, properties, and individuals"). Keeping vocabulary ids
/// low and dense lets schema scans stay cheap without a secondary index.
pub const INDIVIDUAL_RANGE_START: u64 = 1 << 32;

/// Reserved default namespace codes (spec §3.2).
pub mod ns {
    pub const XSD: u32 = 0;
    pub const RDF: u32 = 1;
    pub const RDFS: u32 = 2;
    pub const SHACL: u32 = 3;
    pub const OWL: u32 = 4;
    pub const FLUREE_COMMIT: u32 = 5;
    pub const FLUREE_DB: u32 = 6;
    pub const BLANK_NODE: u32 = 7;
    pub const FLUREE_POLICY: u32 = 8;
}

fn default_namespace_prefixes() -> Vec<(u32, &'static str)> {
    vec![
        (ns::XSD, "http://www.w3.org/2001/XMLSchema#"),
        (ns::RDF, "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
        (ns::RDFS, "http://www.w3.org/2000/01/rdf-schema#"),
        (ns::SHACL, "http://www.w3.org/ns/shacl#"),
        (ns::OWL, "http://www.w3.org/2002/07/owl#"),
        (ns::FLUREE_COMMIT, "fluree:commit:sha256:"),
        (ns::FLUREE_DB, "fluree:db:sha256:"),
        (ns::BLANK_NODE, "_:"),
        (ns::FLUREE_POLICY, "https://ns.flur.ee/policy#"),
    ]
}

/// A compact namespace-coded identifier for an IRI (spec §3.2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sid {
    pub namespace: u32,
    pub name_id: u64,
}

impl Sid {
    pub fn new(namespace: u32, name_id: u64) -> Self {
        Self { namespace, name_id }
    }
}

/// Sentinel datatype SID marking `o` as a reference to another subject (spec §3.1).
pub fn any_uri_sid() -> Sid {
    Sid::new(ns::XSD, 0)
}

/// Split an IRI into `(namespace-prefix, local-name)` at the last of `#`, `?`, `/`, `:`.
fn split_iri(iri: &str) -> (&str, &str) {
    let idx = iri
        .rfind(['#', '?', '/', ':'])
        .map(|i| i + 1)
        .unwrap_or(0);
    iri.split_at(idx)
}

/// Bidirectional IRI ↔ SID mapping with a namespace table shipped on every commit
/// (spec §4.1).
#[derive(Debug)]
pub struct IriCodec {
    /// namespace prefix -> namespace code
    prefix_to_code: DashMap<String, u32>,
    /// namespace code -> namespace prefix
    code_to_prefix: DashMap<u32, String>,
    /// (namespace code, local name) -> name id, and back
    name_to_id: DashMap<(u32, String), u64>,
    id_to_name: DashMap<(u32, u64), String>,
    next_namespace: AtomicU32,
    /// Counter for the property range (classes/properties/shapes), per namespace.
    next_property_id: DashMap<u32, AtomicU64>,
    /// Counter for the default range (ordinary individuals), per namespace,
    /// seeded at [`INDIVIDUAL_RANGE_START`].
    next_individual_id: DashMap<u32, AtomicU64>,
    /// Namespaces introduced since the last call to `drain_new_namespaces`.
    pending_namespaces: DashMap<u32, ()>,
}

impl Default for IriCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl IriCodec {
    pub fn new() -> Self {
        let codec = Self {
            prefix_to_code: DashMap::new(),
            code_to_prefix: DashMap::new(),
            name_to_id: DashMap::new(),
            id_to_name: DashMap::new(),
            next_namespace: AtomicU32::new(FIRST_USER_NAMESPACE),
            next_property_id: DashMap::new(),
            next_individual_id: DashMap::new(),
            pending_namespaces: DashMap::new(),
        };
        for (code, prefix) in default_namespace_prefixes() {
            codec.prefix_to_code.insert(prefix.to_string(), code);
            codec.code_to_prefix.insert(code, prefix.to_string());
        }
        codec
    }

    fn expand_keyword(iri: &str) -> String {
        match iri {
            "@type" => "http://www.w3.org/1999/02/22-rdf-syntax-ns#type".to_string(),
            "@json" => "http://www.w3.org/1999/02/22-rdf-syntax-ns#JSON".to_string(),
            other => other.to_string(),
        }
    }

    /// Generate a new blank-node local name: `fdb-<epoch-ms>-<8-char-nanoid>` (spec §4.1).
    pub fn new_blank_node_name(epoch_ms: u128) -> String {
        let suffix = nanoid::nanoid!(8);
        format!("fdb-{epoch_ms}-{suffix}")
    }

    /// Idempotently encode `iri` into an SID from the default (individual) range,
    /// allocating a new namespace code if needed.
    pub fn encode(&self, iri: &str) -> Sid {
        self.encode_range(iri, false)
    }

    /// Idempotently encode `iri` into an SID, choosing the property range when
    /// `is_property_range` is set (spec §4.3.a: "using the property-range if the
    /// node has type `rdfs:Class`/`rdf:Property`/SHACL shape, else the default
    /// range"). The range choice only matters the first time an IRI is seen —
    /// an already-known local name always returns its existing id.
    pub fn encode_range(&self, iri: &str, is_property_range: bool) -> Sid {
        let iri = Self::expand_keyword(iri);
        let (prefix, local) = split_iri(&iri);
        let code = self.namespace_code(prefix);
        let name_id = self.local_name_id(code, local, is_property_range);
        Sid::new(code, name_id)
    }

    fn namespace_code(&self, prefix: &str) -> u32 {
        if let Some(code) = self.prefix_to_code.get(prefix) {
            return *code;
        }
        let code = self.next_namespace.fetch_add(1, Ordering::SeqCst);
        self.prefix_to_code.insert(prefix.to_string(), code);
        self.code_to_prefix.insert(code, prefix.to_string());
        self.pending_namespaces.insert(code, ());
        code
    }

    fn local_name_id(&self, namespace: u32, local: &str, is_property_range: bool) -> u64 {
        let key = (namespace, local.to_string());
        if let Some(id) = self.name_to_id.get(&key) {
            return *id;
        }
        let id = if is_property_range {
            let counter = self
                .next_property_id
                .entry(namespace)
                .or_insert_with(|| AtomicU64::new(0));
            counter.fetch_add(1, Ordering::SeqCst)
        } else {
            let counter = self
                .next_individual_id
                .entry(namespace)
                .or_insert_with(|| AtomicU64::new(INDIVIDUAL_RANGE_START));
            counter.fetch_add(1, Ordering::SeqCst)
        };
        self.name_to_id.insert(key, id);
        self.id_to_name.insert((namespace, id), local.to_string());
        id
    }

    /// Reverse an SID back to its IRI.
    pub fn decode(&self, sid: Sid) -> Option<String> {
        let prefix = self.code_to_prefix.get(&sid.namespace)?;
        let local = self.id_to_name.get(&(sid.namespace, sid.name_id))?;
        Some(format!("{}{}", prefix.value(), local.value()))
    }

    /// Register an already-known IRI->SID binding (used during reification, spec §4.4,
    /// where commits arrive with namespace tables that must be merged rather than
    /// re-derived).
    pub fn register_namespace(&self, code: u32, prefix: &str) {
        if !self.code_to_prefix.contains_key(&code) {
            self.code_to_prefix.insert(code, prefix.to_string());
            self.prefix_to_code.insert(prefix.to_string(), code);
            let current = self.next_namespace.load(Ordering::SeqCst);
            if code >= current {
                self.next_namespace.store(code + 1, Ordering::SeqCst);
            }
        }
    }

    /// Namespaces introduced since the last drain, as `(code, prefix)` pairs, for
    /// the `ns` array of a commit / `namespaces` array of a DB payload (spec §6.3/§6.4).
    pub fn drain_new_namespaces(&self) -> Vec<(u32, String)> {
        let codes: Vec<u32> = self
            .pending_namespaces
            .iter()
            .map(|entry| *entry.key())
            .collect();
        let mut out = Vec::with_capacity(codes.len());
        for code in codes {
            self.pending_namespaces.remove(&code);
            if let Some(prefix) = self.code_to_prefix.get(&code) {
                out.push((code, prefix.value().clone()));
            }
        }
        out.sort_by_key(|(c, _)| *c);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_idempotent() {
        let codec = IriCodec::new();
        let a = codec.encode("http://ex/#name");
        let b = codec.encode("http://ex/#name");
        assert_eq!(a, b);
    }

    #[test]
    fn decode_reverses_encode() {
        let codec = IriCodec::new();
        let iri = "http://ex.com/alice";
        let sid = codec.encode(iri);
        assert_eq!(codec.decode(sid).as_deref(), Some(iri));
    }

    #[test]
    fn type_keyword_expands_to_rdf_type() {
        let codec = IriCodec::new();
        let a = codec.encode("@type");
        let b = codec.encode("http://www.w3.org/1999/02/22-rdf-syntax-ns#type");
        assert_eq!(a, b);
        assert_eq!(a.namespace, ns::RDF);
    }

    #[test]
    fn new_namespaces_start_at_101() {
        let codec = IriCodec::new();
        let sid = codec.encode("http://ex.com/#thing");
        assert!(sid.namespace >= FIRST_USER_NAMESPACE);
    }

    #[test]
    fn sids_totally_ordered_by_namespace_then_name() {
        let mut sids = vec![Sid::new(2, 5), Sid::new(1, 100), Sid::new(1, 2)];
        sids.sort();
        assert_eq!(sids, vec![Sid::new(1, 2), Sid::new(1, 100), Sid::new(2, 5)]);
    }

    #[test]
    fn pending_namespaces_drained_once() {
        let codec = IriCodec::new();
        codec.encode("http://new.example/#a");
        let first = codec.drain_new_namespaces();
        assert_eq!(first.len(), 1);
        let second = codec.drain_new_namespaces();
        assert!(second.is_empty());
    }

    #[test]
    fn property_range_and_default_range_are_disjoint() {
        let codec = IriCodec::new();
        let class_sid = codec.encode_range("http://ex/#Person", true);
        let instance_sid = codec.encode_range("http://ex/#alice", false);
        assert!(class_sid.name_id < INDIVIDUAL_RANGE_START);
        assert!(instance_sid.name_id >= INDIVIDUAL_RANGE_START);
    }

    #[test]
    fn encode_range_is_idempotent_regardless_of_later_range_hint() {
        let codec = IriCodec::new();
        let first = codec.encode_range("http://ex/#thing", true);
        let second = codec.encode_range("http://ex/#thing", false);
        assert_eq!(first, second);
    }

    #[test]
    fn blank_node_name_has_expected_shape() {
        let name = IriCodec::new_blank_node_name(12345);
        assert!(name.starts_with("fdb-12345-"));
        assert_eq!(name.len(), "fdb-12345-".len() + 8);
    }
}
