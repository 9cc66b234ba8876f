//! Well-known vocabulary IRIs, resolved to SIDs through the shared `IriCodec`
//! (spec §3.4, §4.2, §4.5). Centralized here so schema hydration, the
//! transactor, and the SHACL engine agree on the same predicate identities.

use crate::sid::{IriCodec, Sid};

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const RDF_PROPERTY: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#Property";
pub const RDF_LIST: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#List";
pub const RDFS_CLASS: &str = "http://www.w3.org/2000/01/rdf-schema#Class";
pub const RDFS_SUB_CLASS_OF: &str = "http://www.w3.org/2000/01/rdf-schema#subClassOf";
pub const RDFS_SUB_PROPERTY_OF: &str = "http://www.w3.org/2000/01/rdf-schema#subPropertyOf";
pub const OWL_EQUIVALENT_PROPERTY: &str = "http://www.w3.org/2002/07/owl#equivalentProperty";

pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
pub const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
pub const XSD_DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
pub const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
pub const XSD_ANY_URI: &str = "http://www.w3.org/2001/XMLSchema#anyURI";
pub const XSD_DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";

pub const SH_NODE_SHAPE: &str = "http://www.w3.org/ns/shacl#NodeShape";
pub const SH_PROPERTY_SHAPE: &str = "http://www.w3.org/ns/shacl#PropertyShape";
pub const SH_TARGET_CLASS: &str = "http://www.w3.org/ns/shacl#targetClass";
pub const SH_TARGET_NODE: &str = "http://www.w3.org/ns/shacl#targetNode";
pub const SH_TARGET_SUBJECTS_OF: &str = "http://www.w3.org/ns/shacl#targetSubjectsOf";
pub const SH_TARGET_OBJECTS_OF: &str = "http://www.w3.org/ns/shacl#targetObjectsOf";
pub const SH_PROPERTY: &str = "http://www.w3.org/ns/shacl#property";
pub const SH_PATH: &str = "http://www.w3.org/ns/shacl#path";
pub const SH_INVERSE_PATH: &str = "http://www.w3.org/ns/shacl#inversePath";
pub const SH_ALTERNATIVE_PATH: &str = "http://www.w3.org/ns/shacl#alternativePath";
pub const SH_CLASS: &str = "http://www.w3.org/ns/shacl#class";
pub const SH_DATATYPE: &str = "http://www.w3.org/ns/shacl#datatype";
pub const SH_NODE_KIND: &str = "http://www.w3.org/ns/shacl#nodeKind";
pub const SH_MIN_COUNT: &str = "http://www.w3.org/ns/shacl#minCount";
pub const SH_MAX_COUNT: &str = "http://www.w3.org/ns/shacl#maxCount";
pub const SH_MIN_INCLUSIVE: &str = "http://www.w3.org/ns/shacl#minInclusive";
pub const SH_MAX_INCLUSIVE: &str = "http://www.w3.org/ns/shacl#maxInclusive";
pub const SH_MIN_EXCLUSIVE: &str = "http://www.w3.org/ns/shacl#minExclusive";
pub const SH_MAX_EXCLUSIVE: &str = "http://www.w3.org/ns/shacl#maxExclusive";
pub const SH_MIN_LENGTH: &str = "http://www.w3.org/ns/shacl#minLength";
pub const SH_MAX_LENGTH: &str = "http://www.w3.org/ns/shacl#maxLength";
pub const SH_PATTERN: &str = "http://www.w3.org/ns/shacl#pattern";
pub const SH_FLAGS: &str = "http://www.w3.org/ns/shacl#flags";
pub const SH_LANGUAGE_IN: &str = "http://www.w3.org/ns/shacl#languageIn";
pub const SH_UNIQUE_LANG: &str = "http://www.w3.org/ns/shacl#uniqueLang";
pub const SH_EQUALS: &str = "http://www.w3.org/ns/shacl#equals";
pub const SH_DISJOINT: &str = "http://www.w3.org/ns/shacl#disjoint";
pub const SH_LESS_THAN: &str = "http://www.w3.org/ns/shacl#lessThan";
pub const SH_LESS_THAN_OR_EQUALS: &str = "http://www.w3.org/ns/shacl#lessThanOrEquals";
pub const SH_IN: &str = "http://www.w3.org/ns/shacl#in";
pub const SH_HAS_VALUE: &str = "http://www.w3.org/ns/shacl#hasValue";
pub const SH_NOT: &str = "http://www.w3.org/ns/shacl#not";
pub const SH_AND: &str = "http://www.w3.org/ns/shacl#and";
pub const SH_OR: &str = "http://www.w3.org/ns/shacl#or";
pub const SH_XONE: &str = "http://www.w3.org/ns/shacl#xone";
pub const SH_NODE: &str = "http://www.w3.org/ns/shacl#node";
pub const SH_QUALIFIED_VALUE_SHAPE: &str = "http://www.w3.org/ns/shacl#qualifiedValueShape";
pub const SH_QUALIFIED_MIN_COUNT: &str = "http://www.w3.org/ns/shacl#qualifiedMinCount";
pub const SH_QUALIFIED_MAX_COUNT: &str = "http://www.w3.org/ns/shacl#qualifiedMaxCount";
pub const SH_QUALIFIED_VALUE_SHAPES_DISJOINT: &str = "http://www.w3.org/ns/shacl#qualifiedValueShapesDisjoint";
pub const SH_CLOSED: &str = "http://www.w3.org/ns/shacl#closed";
pub const SH_IGNORED_PROPERTIES: &str = "http://www.w3.org/ns/shacl#ignoredProperties";
pub const SH_CONTAINS: &str = "http://www.w3.org/ns/shacl#contains";
pub const SH_SEVERITY: &str = "http://www.w3.org/ns/shacl#severity";
pub const SH_VIOLATION: &str = "http://www.w3.org/ns/shacl#Violation";

pub const F_POLICY: &str = "https://ns.flur.ee/policy#Policy";
pub const F_TARGET_CLASS: &str = "https://ns.flur.ee/policy#targetClass";
pub const F_TARGET_NODE: &str = "https://ns.flur.ee/policy#targetNode";
pub const F_ALLOW: &str = "https://ns.flur.ee/policy#allow";
pub const F_TARGET_ROLE: &str = "https://ns.flur.ee/policy#targetRole";
pub const F_EQUALS: &str = "https://ns.flur.ee/policy#equals";
pub const F_CONTAINS: &str = "https://ns.flur.ee/policy#contains";
pub const F_PROPERTY: &str = "https://ns.flur.ee/policy#property";
pub const F_ACTION: &str = "https://ns.flur.ee/policy#action";
pub const F_VIEW: &str = "https://ns.flur.ee/policy#view";
pub const F_MODIFY: &str = "https://ns.flur.ee/policy#modify";
pub const F_ROOT: &str = "https://ns.flur.ee/policy#root?";

/// Reserved predicate a subject's own IRI is recorded under (spec §3.1 invariant:
/// "every new subject receives an IRI flake at creation").
pub const FLUREE_IRI: &str = "https://ns.flur.ee/ledger#iri";

/// Predicates whose presence on a newly-added flake triggers schema hydration
/// (spec §3.4): `rdfs:subClassOf`, `rdfs:subPropertyOf`, `owl:equivalentProperty`,
/// and any SHACL-namespace predicate (structural shape metadata).
pub fn is_schema_predicate(iri: &str) -> bool {
    iri == RDFS_SUB_CLASS_OF
        || iri == RDFS_SUB_PROPERTY_OF
        || iri == OWL_EQUIVALENT_PROPERTY
        || iri.starts_with("http://www.w3.org/ns/shacl#")
}

/// Resolved SIDs for the vocabulary predicates the schema builder and SHACL
/// engine dispatch on, computed once per `IriCodec` instance.
#[derive(Debug, Clone, Copy)]
pub struct Vocab {
    pub rdf_type: Sid,
    pub rdf_list: Sid,
    pub rdfs_class: Sid,
    pub rdf_property: Sid,
    pub rdfs_sub_class_of: Sid,
    pub rdfs_sub_property_of: Sid,
    pub owl_equivalent_property: Sid,
    pub sh_node_shape: Sid,
    pub sh_property_shape: Sid,
    pub fluree_iri: Sid,
    pub xsd_string: Sid,
    pub xsd_integer: Sid,
    pub xsd_decimal: Sid,
    pub xsd_double: Sid,
    pub xsd_boolean: Sid,
    pub xsd_any_uri: Sid,
}

impl Vocab {
    pub fn new(codec: &IriCodec) -> Self {
        Self {
            rdf_type: codec.encode(RDF_TYPE),
            rdf_list: codec.encode(RDF_LIST),
            rdfs_class: codec.encode(RDFS_CLASS),
            rdf_property: codec.encode(RDF_PROPERTY),
            rdfs_sub_class_of: codec.encode(RDFS_SUB_CLASS_OF),
            rdfs_sub_property_of: codec.encode(RDFS_SUB_PROPERTY_OF),
            owl_equivalent_property: codec.encode(OWL_EQUIVALENT_PROPERTY),
            sh_node_shape: codec.encode(SH_NODE_SHAPE),
            sh_property_shape: codec.encode(SH_PROPERTY_SHAPE),
            fluree_iri: codec.encode(FLUREE_IRI),
            xsd_string: codec.encode(XSD_STRING),
            xsd_integer: codec.encode(XSD_INTEGER),
            xsd_decimal: codec.encode(XSD_DECIMAL),
            xsd_double: codec.encode(XSD_DOUBLE),
            xsd_boolean: codec.encode(XSD_BOOLEAN),
            xsd_any_uri: codec.encode(XSD_ANY_URI),
        }
    }
}
