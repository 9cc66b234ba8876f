//! Vocabulary/schema builder: class, property, subclass/subproperty graph,
//! and the cached datatype bindings built from it (spec §3.4, §4.2).

use std::collections::{HashMap, HashSet};

use crate::flake::Flake;
use crate::sid::{IriCodec, Sid};
use crate::vocab::Vocab;

/// Per-predicate schema entry (spec §3.4: `{id, iri, subclassOf, parentProps, childProps}`).
#[derive(Debug, Clone, Default)]
pub struct PropertyMeta {
    pub id: Sid,
    pub iri: String,
    /// Populated only when `id` denotes a class: direct `rdfs:subClassOf` parents.
    pub subclass_of: Vec<Sid>,
    /// Direct and transitive super-properties (via `subPropertyOf`/`equivalentProperty`).
    pub parent_props: HashSet<Sid>,
    /// Direct and transitive sub-properties.
    pub child_props: HashSet<Sid>,
    pub is_class: bool,
    pub is_property: bool,
}

/// An immutable schema snapshot (spec §3.4: "A schema is immutable per `t`").
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub properties: HashMap<Sid, PropertyMeta>,
    /// Transitive closure: class SID -> set of all (transitive) subclasses, including itself.
    pub subclasses: HashMap<Sid, HashSet<Sid>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, id: Sid, iri: &str) -> &mut PropertyMeta {
        let meta = self.properties.entry(id).or_insert_with(|| PropertyMeta {
            id,
            iri: iri.to_string(),
            ..Default::default()
        });
        if meta.iri.is_empty() && !iri.is_empty() {
            meta.iri = iri.to_string();
        }
        meta
    }

    /// Record `child subClassOf parent` / `subPropertyOf` / `equivalentProperty` edges
    /// (spec §4.2 `update-related`).
    ///
    /// - `subPropertyOf`: child -> parent's `childProps`; parent -> child's `parentProps`
    ///   (both transitively propagated).
    /// - `equivalentProperty`: both directions (spec §9 Open Question: adopts the
    ///   bidirectional interpretation).
    pub fn update_related(&mut self, relation: Relation, parent: Sid, child: Sid) {
        match relation {
            Relation::SubClassOf => {
                self.entry(child, "").subclass_of.push(parent);
            }
            Relation::SubPropertyOf => {
                self.link_parent_child(parent, child);
            }
            Relation::EquivalentProperty => {
                self.link_parent_child(parent, child);
                self.link_parent_child(child, parent);
            }
        }
    }

    fn link_parent_child(&mut self, parent: Sid, child: Sid) {
        let child_ancestors: Vec<Sid> = self
            .properties
            .get(&child)
            .map(|p| p.parent_props.iter().copied().collect())
            .unwrap_or_default();
        let parent_descendants: Vec<Sid> = self
            .properties
            .get(&parent)
            .map(|p| p.child_props.iter().copied().collect())
            .unwrap_or_default();

        self.entry(parent, "").child_props.insert(child);
        self.entry(child, "").parent_props.insert(parent);

        for descendant in &parent_descendants {
            self.entry(*descendant, "").parent_props.insert(child);
            self.entry(child, "").child_props.insert(*descendant);
        }
        for ancestor in &child_ancestors {
            self.entry(*ancestor, "").child_props.insert(parent);
            self.entry(parent, "").parent_props.insert(*ancestor);
        }
    }

    /// Compute, for every class, the least set containing the class and closed under
    /// the `rdfs:subClassOf` inverse relation (spec §4.2 `subclass-closure`, §8 invariant).
    pub fn recompute_subclass_closure(&mut self) {
        let mut children_of: HashMap<Sid, HashSet<Sid>> = HashMap::new();
        for meta in self.properties.values() {
            for parent in &meta.subclass_of {
                children_of.entry(*parent).or_default().insert(meta.id);
            }
        }

        let all_classes: HashSet<Sid> = self
            .properties
            .values()
            .filter(|p| p.is_class || children_of.contains_key(&p.id))
            .map(|p| p.id)
            .collect();

        let mut result: HashMap<Sid, HashSet<Sid>> = HashMap::new();
        for class in &all_classes {
            let mut seen = HashSet::new();
            let mut stack = vec![*class];
            seen.insert(*class);
            while let Some(current) = stack.pop() {
                if let Some(children) = children_of.get(&current) {
                    for child in children {
                        if seen.insert(*child) {
                            stack.push(*child);
                        }
                    }
                }
            }
            result.insert(*class, seen);
        }
        self.subclasses = result;
    }

    pub fn is_known_predicate(&self, sid: Sid) -> bool {
        self.properties.contains_key(&sid)
    }
}

/// The relation a schema-triggering flake expresses (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    SubClassOf,
    SubPropertyOf,
    EquivalentProperty,
}

/// Extract newly-added flakes relevant to the schema and fold them into a new
/// `Schema` (spec §4.2 `hydrate`). Flakes are "relevant" when their subject is
/// already a known predicate SID, or their predicate is one of the vocabulary
/// predicates (`rdf:type` on a class/property subject, `subClassOf`,
/// `subPropertyOf`, `equivalentProperty`).
///
/// Reference triples whose object is not a known SID are logged and skipped —
/// hydration never aborts the transaction (spec §4.2 "Failure semantics").
pub fn hydrate(base: &Schema, new_flakes: &[Flake], codec: &IriCodec, vocab: &Vocab) -> Schema {
    let mut schema = base.clone();

    for flake in new_flakes {
        if !flake.op {
            continue; // retractions never add schema facts; a full implementation
                      // would additionally prune stale edges, deferred as future work.
        }
        if flake.p == vocab.rdf_type {
            let Some(class_sid) = flake.o.as_ref_sid() else {
                continue;
            };
            if class_sid == vocab.rdfs_class {
                let iri = codec.decode(flake.s).unwrap_or_default();
                schema.entry(flake.s, &iri).is_class = true;
            } else if class_sid == vocab.rdf_property {
                let iri = codec.decode(flake.s).unwrap_or_default();
                schema.entry(flake.s, &iri).is_property = true;
            }
            continue;
        }

        let relation = if flake.p == vocab.rdfs_sub_class_of {
            Some(Relation::SubClassOf)
        } else if flake.p == vocab.rdfs_sub_property_of {
            Some(Relation::SubPropertyOf)
        } else if flake.p == vocab.owl_equivalent_property {
            Some(Relation::EquivalentProperty)
        } else {
            None
        };

        let Some(relation) = relation else {
            continue;
        };

        let Some(object_sid) = flake.o.as_ref_sid() else {
            tracing::warn!(predicate = ?flake.p, "schema relation with non-reference object skipped");
            continue;
        };
        schema.update_related(relation, object_sid, flake.s);
    }

    schema.recompute_subclass_closure();
    schema
}
