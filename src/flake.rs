//! The flake model: the atomic fact representation and its invariants (spec §3.1).

use serde::{Deserialize, Serialize};

use crate::sid::{any_uri_sid, Sid};

/// Fixed per-flake header cost used by the canonical size formula (spec §9 Open
/// Questions: "the target implementation must fix a canonical size formula").
/// Chosen to approximate `s + p + dt + t + op` as constant-width fields, leaving
/// only the object and metadata as variable-length.
pub const FLAKE_HEADER_BYTES: usize = 32;

/// The object of a flake: either a literal value or a reference to another subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Object {
    /// A scalar literal (string, number, boolean) carried as JSON.
    Value(serde_json::Value),
    /// A reference to another subject's SID (datatype is always `anyURI`).
    Ref(Sid),
}

impl Object {
    /// Canonical byte representation used for both ordering and size accounting.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            Object::Value(v) => serde_json::to_vec(v).unwrap_or_default(),
            Object::Ref(sid) => format!("{}:{}", sid.namespace, sid.name_id).into_bytes(),
        }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, Object::Ref(_))
    }

    pub fn as_ref_sid(&self) -> Option<Sid> {
        match self {
            Object::Ref(sid) => Some(*sid),
            Object::Value(_) => None,
        }
    }
}

/// Optional flake metadata: RDF-list index preservation and language tags (spec §3.1).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// List index, for `@list` value preservation.
    pub i: Option<i64>,
    /// Language tag, for `rdf:langString` values.
    pub lang: Option<String>,
}

impl Meta {
    pub fn is_empty(&self) -> bool {
        self.i.is_none() && self.lang.is_none()
    }

    pub fn with_index(i: i64) -> Self {
        Self {
            i: Some(i),
            lang: None,
        }
    }

    pub fn with_lang(lang: impl Into<String>) -> Self {
        Self {
            i: None,
            lang: Some(lang.into()),
        }
    }
}

/// A flake: the atomic fact tuple `(s, p, o, dt, t, op, m)` (spec §3.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flake {
    pub s: Sid,
    pub p: Sid,
    pub o: Object,
    pub dt: Sid,
    /// Transaction epoch; negative integers internally (inverse of the positive
    /// commit counter `t`, spec §3.1).
    pub t: i64,
    /// `true` = assertion, `false` = retraction.
    pub op: bool,
    pub m: Option<Meta>,
}

impl Flake {
    pub fn new(s: Sid, p: Sid, o: Object, dt: Sid, t: i64, op: bool) -> Self {
        Self {
            s,
            p,
            o,
            dt,
            t,
            op,
            m: None,
        }
    }

    pub fn with_meta(mut self, m: Meta) -> Self {
        if !m.is_empty() {
            self.m = Some(m);
        }
        self
    }

    /// Construct the IRI flake a new subject receives at creation (spec §3.1 invariant):
    /// `(s, anyURI, "<iri>", xsd:string, t, true, nil)`.
    pub fn iri_flake(s: Sid, iri_predicate: Sid, iri: &str, xsd_string: Sid, t: i64) -> Self {
        Flake::new(
            s,
            iri_predicate,
            Object::Value(serde_json::Value::String(iri.to_string())),
            xsd_string,
            t,
            true,
        )
    }

    pub fn is_reference(&self) -> bool {
        self.dt == any_uri_sid() || self.o.is_ref()
    }

    /// The positive commit counter this flake was written at (`t` is stored inverted).
    pub fn commit_t(&self) -> i64 {
        -self.t
    }

    /// Deterministic, additive size-in-bytes for this flake (spec §3.1, §9).
    pub fn size(&self) -> usize {
        let object_len = self.o.canonical_bytes().len();
        let meta_len = self
            .m
            .as_ref()
            .map(|m| serde_json::to_vec(m).map(|v| v.len()).unwrap_or(0))
            .unwrap_or(0);
        FLAKE_HEADER_BYTES + object_len + meta_len
    }

    /// Produce the retraction counterpart of this (assertion) flake at transaction `t`.
    pub fn flip(&self, at_t: i64) -> Flake {
        Flake {
            t: at_t,
            op: !self.op,
            ..self.clone()
        }
    }

    /// The `(s, p, o, t, op)` uniqueness key (spec §3.1 invariant).
    pub fn fact_key(&self) -> (Sid, Sid, Vec<u8>, i64, bool) {
        (self.s, self.p, self.o.canonical_bytes(), self.t, self.op)
    }
}

/// The four sort orders novelty maintains over flakes (spec §3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlakeOrder {
    /// `(s, p, o, t, ...)`
    Spot,
    /// `(p, o, s, t, ...)`
    Post,
    /// `(o, p, s, t, ...)` — reference flakes only.
    Opst,
    /// `(t, s, p, o, ...)`
    Tspo,
}

/// Comparison key for a given sort order, used to build `BTreeSet`s over flakes.
pub fn order_key(flake: &Flake, order: FlakeOrder) -> (Sid, Sid, Vec<u8>, i64, bool) {
    let o_bytes = flake.o.canonical_bytes();
    match order {
        FlakeOrder::Spot => (flake.s, flake.p, o_bytes, flake.t, flake.op),
        FlakeOrder::Post => (flake.p, flake.s, o_bytes, flake.t, flake.op),
        FlakeOrder::Opst => {
            let o_sid = flake.o.as_ref_sid().unwrap_or(flake.s);
            (o_sid, flake.p, vec![], flake.t, flake.op)
        }
        FlakeOrder::Tspo => {
            // `t` is folded into the Sid namespace slot below so every order can
            // share the same tuple shape; callers sort `Tspo` by a dedicated key
            // (see `TspoKey`) rather than this helper.
            (flake.s, flake.p, o_bytes, flake.t, flake.op)
        }
    }
}

/// Dedicated ordering key for the `(t, s, p, o, ...)` order (spec §3.4).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TspoKey {
    pub t: i64,
    pub s: Sid,
    pub p: Sid,
    pub o_bytes: Vec<u8>,
    pub op: bool,
}

impl TspoKey {
    pub fn from_flake(flake: &Flake) -> Self {
        Self {
            t: flake.t,
            s: flake.s,
            p: flake.p,
            o_bytes: flake.o.canonical_bytes(),
            op: flake.op,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sid::ns;

    fn sample_flake() -> Flake {
        Flake::new(
            Sid::new(ns::XSD, 1),
            Sid::new(101, 1),
            Object::Value(serde_json::json!("Alice")),
            Sid::new(ns::XSD, 2),
            -1,
            true,
        )
    }

    #[test]
    fn size_is_additive_header_plus_object() {
        let f = sample_flake();
        assert_eq!(f.size(), FLAKE_HEADER_BYTES + f.o.canonical_bytes().len());
    }

    #[test]
    fn flip_toggles_op_and_sets_t() {
        let f = sample_flake();
        let flipped = f.flip(-2);
        assert_eq!(flipped.op, false);
        assert_eq!(flipped.t, -2);
        assert_eq!(flipped.s, f.s);
        assert_eq!(flipped.o, f.o);
    }

    #[test]
    fn fact_key_distinguishes_assert_and_retract() {
        let f = sample_flake();
        let flipped = f.flip(f.t);
        assert_ne!(f.fact_key(), flipped.fact_key());
    }

    #[test]
    fn reference_flake_detected_via_object_or_datatype() {
        let r = Flake::new(
            Sid::new(101, 1),
            Sid::new(101, 2),
            Object::Ref(Sid::new(101, 3)),
            any_uri_sid(),
            -1,
            true,
        );
        assert!(r.is_reference());
    }

    #[test]
    fn commit_t_inverts_internal_t() {
        let f = sample_flake();
        assert_eq!(f.commit_t(), 1);
    }
}
