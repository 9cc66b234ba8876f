//! Novelty: the in-memory sorted-set overlay of flakes added since the last
//! persisted index (spec §3.4).

use std::collections::BTreeSet;

use crate::flake::{order_key, Flake, FlakeOrder, TspoKey};
use crate::sid::Sid;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct OrderedEntry {
    key: (Sid, Sid, Vec<u8>, i64, bool),
    flake: FlakeHandle,
}

/// `Flake` wrapped so it can live in the `BTreeSet`s keyed by the four orders;
/// equality/ordering is driven entirely by the tuple key stored alongside it.
#[derive(Debug, Clone)]
struct FlakeHandle(Flake);

impl PartialEq for FlakeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0.fact_key() == other.0.fact_key()
    }
}
impl Eq for FlakeHandle {}
impl PartialOrd for FlakeHandle {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for FlakeHandle {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.fact_key().cmp(&other.0.fact_key())
    }
}

/// The novelty overlay: four sorted sets plus running size and `t` (spec §3.4).
#[derive(Debug, Clone, Default)]
pub struct Novelty {
    spot: BTreeSet<OrderedEntry>,
    post: BTreeSet<OrderedEntry>,
    /// OPST only indexes reference flakes.
    opst: BTreeSet<OrderedEntry>,
    tspo: BTreeSet<(TspoKey, FlakeHandle)>,
    size: usize,
    t: i64,
}

impl Novelty {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn t(&self) -> i64 {
        self.t
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.spot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spot.is_empty()
    }

    /// Insert a flake into all applicable orders (spec §4.3 "Staged DB construction":
    /// "merged into novelty (adds into all four orders; OPST only for reference flakes)").
    pub fn insert(&mut self, flake: Flake) {
        self.size += flake.size();
        if flake.t < self.t || self.t == 0 {
            self.t = flake.t;
        }
        let spot_key = order_key(&flake, FlakeOrder::Spot);
        self.spot.insert(OrderedEntry {
            key: spot_key,
            flake: FlakeHandle(flake.clone()),
        });
        let post_key = order_key(&flake, FlakeOrder::Post);
        self.post.insert(OrderedEntry {
            key: post_key,
            flake: FlakeHandle(flake.clone()),
        });
        if flake.is_reference() {
            let opst_key = order_key(&flake, FlakeOrder::Opst);
            self.opst.insert(OrderedEntry {
                key: opst_key,
                flake: FlakeHandle(flake.clone()),
            });
        }
        let tspo_key = TspoKey::from_flake(&flake);
        self.tspo.insert((tspo_key, FlakeHandle(flake)));
    }

    /// Remove a flake that exactly matches `fact_key()` from all orders (used when
    /// re-staging cancels a previously staged assertion rather than flipping it;
    /// spec §4.3).
    pub fn remove_matching(&mut self, flake: &Flake) -> bool {
        let target = flake.fact_key();
        let mut removed = false;

        let spot_match = self
            .spot
            .iter()
            .find(|e| e.flake.0.fact_key() == target)
            .cloned();
        if let Some(entry) = spot_match {
            self.size = self.size.saturating_sub(entry.flake.0.size());
            self.spot.remove(&entry);
            removed = true;
        }
        let post_match = self
            .post
            .iter()
            .find(|e| e.flake.0.fact_key() == target)
            .cloned();
        if let Some(entry) = post_match {
            self.post.remove(&entry);
        }
        let opst_match = self
            .opst
            .iter()
            .find(|e| e.flake.0.fact_key() == target)
            .cloned();
        if let Some(entry) = opst_match {
            self.opst.remove(&entry);
        }
        let tspo_match = self
            .tspo
            .iter()
            .find(|(_, h)| h.0.fact_key() == target)
            .cloned();
        if let Some(entry) = tspo_match {
            self.tspo.remove(&entry);
        }
        removed
    }

    /// All flakes in SPOT order.
    pub fn iter_spot(&self) -> impl Iterator<Item = &Flake> {
        self.spot.iter().map(|e| &e.flake.0)
    }

    /// All flakes in TSPO order (used for replay / chronological scans).
    pub fn iter_tspo(&self) -> impl Iterator<Item = &Flake> {
        self.tspo.iter().map(|(_, h)| &h.0)
    }

    /// Flakes for a given subject, in SPOT order.
    pub fn subject_flakes(&self, s: Sid) -> Vec<Flake> {
        self.spot
            .iter()
            .filter(|e| e.flake.0.s == s)
            .map(|e| e.flake.0.clone())
            .collect()
    }

    /// Currently-asserted values for `(s, p)`: assertions not cancelled by a later
    /// retraction of the same `(s,p,o)` (used by the transactor's retraction step,
    /// spec §4.3.e).
    pub fn current_values(&self, s: Sid, p: Sid) -> Vec<Flake> {
        let mut asserted: Vec<Flake> = Vec::new();
        let mut retracted_keys: Vec<Vec<u8>> = Vec::new();
        for flake in self.spot.iter().map(|e| &e.flake.0) {
            if flake.s != s || flake.p != p {
                continue;
            }
            if flake.op {
                asserted.push(flake.clone());
            } else {
                retracted_keys.push(flake.o.canonical_bytes());
            }
        }
        asserted
            .into_iter()
            .filter(|f| !retracted_keys.contains(&f.o.canonical_bytes()))
            .collect()
    }

    /// The currently-asserted flake at `(s, p)` whose object matches
    /// `o_bytes` exactly, if any (used by re-staging cancellation, spec
    /// §4.3 "Staged DB construction").
    pub fn find_current_assertion(&self, s: Sid, p: Sid, o_bytes: &[u8]) -> Option<Flake> {
        self.current_values(s, p)
            .into_iter()
            .find(|f| f.o.canonical_bytes() == o_bytes)
    }

    /// Objects referencing `o` via any predicate (used by OPST scans, e.g. SHACL
    /// `sh:targetObjectsOf`-adjacent back-reference lookups).
    pub fn referencing(&self, o: Sid) -> Vec<Flake> {
        self.opst
            .iter()
            .filter(|e| e.flake.0.o.as_ref_sid() == Some(o))
            .map(|e| e.flake.0.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.spot.clear();
        self.post.clear();
        self.opst.clear();
        self.tspo.clear();
        self.size = 0;
        self.t = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flake::Object;
    use crate::sid::any_uri_sid;

    fn flake(s: u64, p: u64, v: &str, t: i64, op: bool) -> Flake {
        Flake::new(
            Sid::new(101, s),
            Sid::new(101, p),
            Object::Value(serde_json::json!(v)),
            Sid::new(0, 2),
            t,
            op,
        )
    }

    #[test]
    fn insert_updates_size_and_t() {
        let mut novelty = Novelty::new();
        let f = flake(1, 2, "A", -1, true);
        let size = f.size();
        novelty.insert(f);
        assert_eq!(novelty.size(), size);
        assert_eq!(novelty.t(), -1);
    }

    #[test]
    fn current_values_excludes_retracted() {
        let mut novelty = Novelty::new();
        novelty.insert(flake(1, 2, "A", -1, true));
        novelty.insert(flake(1, 2, "A", -2, false));
        novelty.insert(flake(1, 2, "B", -2, true));
        let current = novelty.current_values(Sid::new(101, 1), Sid::new(101, 2));
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].o, Object::Value(serde_json::json!("B")));
    }

    #[test]
    fn opst_only_holds_reference_flakes() {
        let mut novelty = Novelty::new();
        novelty.insert(flake(1, 2, "A", -1, true));
        let reference = Flake::new(
            Sid::new(101, 1),
            Sid::new(101, 3),
            Object::Ref(Sid::new(101, 9)),
            any_uri_sid(),
            -1,
            true,
        );
        novelty.insert(reference);
        assert_eq!(novelty.referencing(Sid::new(101, 9)).len(), 1);
    }

    #[test]
    fn remove_matching_drops_from_all_orders() {
        let mut novelty = Novelty::new();
        let f = flake(1, 2, "A", -1, true);
        novelty.insert(f.clone());
        assert!(novelty.remove_matching(&f));
        assert_eq!(novelty.len(), 0);
        assert_eq!(novelty.size(), 0);
    }

    #[test]
    fn find_current_assertion_matches_object_bytes() {
        let mut novelty = Novelty::new();
        novelty.insert(flake(1, 2, "A", -1, true));
        let found = novelty
            .find_current_assertion(Sid::new(101, 1), Sid::new(101, 2), &Object::Value(serde_json::json!("A")).canonical_bytes())
            .unwrap();
        assert_eq!(found.t, -1);
        assert!(novelty
            .find_current_assertion(Sid::new(101, 1), Sid::new(101, 2), &Object::Value(serde_json::json!("B")).canonical_bytes())
            .is_none());
    }

    #[test]
    fn tspo_iterates_sorted_by_t_first() {
        let mut novelty = Novelty::new();
        novelty.insert(flake(1, 2, "A", -2, true));
        novelty.insert(flake(1, 3, "B", -1, true));
        let ts: Vec<i64> = novelty.iter_tspo().map(|f| f.t).collect();
        assert_eq!(ts, vec![-2, -1]);
    }
}
