//! SHACL engine: shape discovery, target selection, and constraint validation
//! (spec §4.5). Property paths beyond a named predicate, its inverse, and an
//! alternative list are out of scope (spec §1 Non-goals).

use std::collections::HashSet;

use regex::Regex;

use crate::error::{DbError, Result, ValidationReport, ValidationResult};
use crate::flake::Object;
use crate::novelty::Novelty;
use crate::schema::Schema;
use crate::sid::{IriCodec, Sid};
use crate::vocab::{self, Vocab};

/// SIDs for every SHACL-namespace predicate the engine dispatches on, resolved
/// once per `IriCodec` (spec §4.5 constraint catalogue).
#[derive(Debug, Clone, Copy)]
struct ShaclVocab {
    target_class: Sid,
    target_node: Sid,
    target_subjects_of: Sid,
    target_objects_of: Sid,
    property: Sid,
    path: Sid,
    inverse_path: Sid,
    alternative_path: Sid,
    class: Sid,
    datatype: Sid,
    node_kind: Sid,
    min_count: Sid,
    max_count: Sid,
    min_inclusive: Sid,
    max_inclusive: Sid,
    min_exclusive: Sid,
    max_exclusive: Sid,
    min_length: Sid,
    max_length: Sid,
    pattern: Sid,
    flags: Sid,
    language_in: Sid,
    unique_lang: Sid,
    equals: Sid,
    disjoint: Sid,
    less_than: Sid,
    less_than_or_equals: Sid,
    in_: Sid,
    has_value: Sid,
    not: Sid,
    and: Sid,
    or: Sid,
    xone: Sid,
    node: Sid,
    qualified_value_shape: Sid,
    qualified_min_count: Sid,
    qualified_max_count: Sid,
    qualified_value_shapes_disjoint: Sid,
    closed: Sid,
    ignored_properties: Sid,
    contains: Sid,
    severity: Sid,
}

impl ShaclVocab {
    fn new(codec: &IriCodec) -> Self {
        Self {
            target_class: codec.encode(vocab::SH_TARGET_CLASS),
            target_node: codec.encode(vocab::SH_TARGET_NODE),
            target_subjects_of: codec.encode(vocab::SH_TARGET_SUBJECTS_OF),
            target_objects_of: codec.encode(vocab::SH_TARGET_OBJECTS_OF),
            property: codec.encode(vocab::SH_PROPERTY),
            path: codec.encode(vocab::SH_PATH),
            inverse_path: codec.encode(vocab::SH_INVERSE_PATH),
            alternative_path: codec.encode(vocab::SH_ALTERNATIVE_PATH),
            class: codec.encode(vocab::SH_CLASS),
            datatype: codec.encode(vocab::SH_DATATYPE),
            node_kind: codec.encode(vocab::SH_NODE_KIND),
            min_count: codec.encode(vocab::SH_MIN_COUNT),
            max_count: codec.encode(vocab::SH_MAX_COUNT),
            min_inclusive: codec.encode(vocab::SH_MIN_INCLUSIVE),
            max_inclusive: codec.encode(vocab::SH_MAX_INCLUSIVE),
            min_exclusive: codec.encode(vocab::SH_MIN_EXCLUSIVE),
            max_exclusive: codec.encode(vocab::SH_MAX_EXCLUSIVE),
            min_length: codec.encode(vocab::SH_MIN_LENGTH),
            max_length: codec.encode(vocab::SH_MAX_LENGTH),
            pattern: codec.encode(vocab::SH_PATTERN),
            flags: codec.encode(vocab::SH_FLAGS),
            language_in: codec.encode(vocab::SH_LANGUAGE_IN),
            unique_lang: codec.encode(vocab::SH_UNIQUE_LANG),
            equals: codec.encode(vocab::SH_EQUALS),
            disjoint: codec.encode(vocab::SH_DISJOINT),
            less_than: codec.encode(vocab::SH_LESS_THAN),
            less_than_or_equals: codec.encode(vocab::SH_LESS_THAN_OR_EQUALS),
            in_: codec.encode(vocab::SH_IN),
            has_value: codec.encode(vocab::SH_HAS_VALUE),
            not: codec.encode(vocab::SH_NOT),
            and: codec.encode(vocab::SH_AND),
            or: codec.encode(vocab::SH_OR),
            xone: codec.encode(vocab::SH_XONE),
            node: codec.encode(vocab::SH_NODE),
            qualified_value_shape: codec.encode(vocab::SH_QUALIFIED_VALUE_SHAPE),
            qualified_min_count: codec.encode(vocab::SH_QUALIFIED_MIN_COUNT),
            qualified_max_count: codec.encode(vocab::SH_QUALIFIED_MAX_COUNT),
            qualified_value_shapes_disjoint: codec.encode(vocab::SH_QUALIFIED_VALUE_SHAPES_DISJOINT),
            closed: codec.encode(vocab::SH_CLOSED),
            ignored_properties: codec.encode(vocab::SH_IGNORED_PROPERTIES),
            contains: codec.encode(vocab::SH_CONTAINS),
            severity: codec.encode(vocab::SH_SEVERITY),
        }
    }
}

/// A resolved SHACL property path (spec §4.5 "Property path resolution").
/// Sequences longer than a single named/inverse/alternative segment are
/// outside scope (spec §1 Non-goals).
#[derive(Debug, Clone)]
pub enum Path {
    Predicate(Sid),
    Inverse(Sid),
    Alternative(Vec<Sid>),
}

/// One resolved value at a focus node: the object term plus its datatype and
/// optional language tag (spec §4.5 "Property path resolution").
#[derive(Debug, Clone)]
pub struct ValueNode {
    pub object: Object,
    pub datatype: Sid,
    pub lang: Option<String>,
}

impl ValueNode {
    fn as_ref_sid(&self) -> Option<Sid> {
        self.object.as_ref_sid()
    }
}

fn path_from_shape(shape_sid: Sid, novelty: &Novelty, sv: &ShaclVocab) -> Option<Path> {
    let path_flake = novelty.current_values(shape_sid, sv.path).into_iter().next()?;
    let path_node = path_flake.o.as_ref_sid()?;

    if let Some(inv) = novelty.current_values(path_node, sv.inverse_path).into_iter().next() {
        return inv.o.as_ref_sid().map(Path::Inverse);
    }
    let mut alt: Vec<(i64, Sid)> = novelty
        .current_values(path_node, sv.alternative_path)
        .into_iter()
        .filter_map(|f| f.o.as_ref_sid().map(|s| (f.m.as_ref().and_then(|m| m.i).unwrap_or(0), s)))
        .collect();
    if !alt.is_empty() {
        alt.sort_by_key(|(i, _)| *i);
        return Some(Path::Alternative(alt.into_iter().map(|(_, s)| s).collect()));
    }
    Some(Path::Predicate(path_node))
}

/// Resolve `path` from `focus`, producing value nodes (spec §4.5 "Property
/// path resolution").
fn resolve_path(path: &Path, focus: Sid, novelty: &Novelty, vocab: &Vocab) -> Vec<ValueNode> {
    match path {
        Path::Predicate(p) => novelty
            .current_values(focus, *p)
            .into_iter()
            .map(|f| ValueNode { object: f.o, datatype: f.dt, lang: f.m.and_then(|m| m.lang) })
            .collect(),
        Path::Inverse(p) => novelty
            .referencing(focus)
            .into_iter()
            .filter(|f| f.p == *p && novelty.current_values(f.s, *p).iter().any(|c| c.o.as_ref_sid() == Some(focus)))
            .map(|f| ValueNode {
                object: Object::Ref(f.s),
                datatype: vocab.xsd_any_uri,
                lang: None,
            })
            .collect(),
        Path::Alternative(preds) => {
            let mut out = Vec::new();
            for p in preds {
                out.extend(resolve_path(&Path::Predicate(*p), focus, novelty, vocab));
            }
            out
        }
    }
}

fn path_predicates(path: &Path) -> Vec<Sid> {
    match path {
        Path::Predicate(p) => vec![*p],
        Path::Inverse(p) => vec![*p],
        Path::Alternative(ps) => ps.clone(),
    }
}

/// A materialized shape: a map from constraint predicate to parsed constraint
/// value(s) (spec §4.5 "Shape discovery").
#[derive(Debug, Clone, Default)]
pub struct ShapeDef {
    pub id: Sid,
    pub path: Option<Path>,
    pub target_class: Vec<Sid>,
    pub target_node: Vec<Sid>,
    pub target_subjects_of: Vec<Sid>,
    pub target_objects_of: Vec<Sid>,

    pub class: Vec<Sid>,
    pub datatype: Option<Sid>,
    pub node_kind: Option<String>,
    pub min_count: Option<i64>,
    pub max_count: Option<i64>,
    pub min_inclusive: Option<f64>,
    pub max_inclusive: Option<f64>,
    pub min_exclusive: Option<f64>,
    pub max_exclusive: Option<f64>,
    pub min_length: Option<i64>,
    pub max_length: Option<i64>,
    pub pattern: Option<String>,
    pub flags: Option<String>,
    pub language_in: Vec<String>,
    pub unique_lang: bool,
    pub equals: Option<Sid>,
    pub disjoint: Option<Sid>,
    pub less_than: Option<Sid>,
    pub less_than_or_equals: Option<Sid>,
    pub in_list: Option<Vec<Object>>,
    pub has_value: Option<Object>,
    pub not: Vec<Sid>,
    pub and: Vec<Sid>,
    pub or: Vec<Sid>,
    pub xone: Vec<Sid>,
    pub node: Vec<Sid>,
    pub property: Vec<Sid>,
    pub qualified_value_shape: Option<Sid>,
    pub qualified_min_count: Option<i64>,
    pub qualified_max_count: Option<i64>,
    pub qualified_value_shapes_disjoint: bool,
    pub closed: bool,
    pub ignored_properties: Vec<Sid>,
    /// `sh:contains` is recognized but always rejected (spec §9 Open Question).
    pub contains_rejected: bool,
    pub severity: Option<String>,
}

fn number_of(v: &serde_json::Value) -> Option<f64> {
    v.as_f64()
}

fn ordered_list(novelty: &Novelty, subject: Sid, predicate: Sid) -> Vec<crate::flake::Flake> {
    let mut values = novelty.current_values(subject, predicate);
    values.sort_by_key(|f| f.m.as_ref().and_then(|m| m.i).unwrap_or(0));
    values
}

fn build_shape_def(shape_sid: Sid, novelty: &Novelty, sv: &ShaclVocab) -> ShapeDef {
    let mut shape = ShapeDef { id: shape_sid, ..Default::default() };
    shape.path = path_from_shape(shape_sid, novelty, sv);

    let refs = |p: Sid| -> Vec<Sid> {
        ordered_list(novelty, shape_sid, p).into_iter().filter_map(|f| f.o.as_ref_sid()).collect()
    };
    shape.target_class = refs(sv.target_class);
    shape.target_node = refs(sv.target_node);
    shape.target_subjects_of = refs(sv.target_subjects_of);
    shape.target_objects_of = refs(sv.target_objects_of);
    shape.class = refs(sv.class);
    shape.datatype = refs(sv.datatype).into_iter().next();
    shape.node_kind = novelty
        .current_values(shape_sid, sv.node_kind)
        .into_iter()
        .next()
        .and_then(|f| f.o.as_ref_sid())
        .map(|s| format!("{}:{}", s.namespace, s.name_id));
    shape.min_count = novelty
        .current_values(shape_sid, sv.min_count)
        .into_iter()
        .next()
        .and_then(|f| match f.o {
            Object::Value(v) => v.as_i64(),
            Object::Ref(_) => None,
        });
    shape.max_count = novelty
        .current_values(shape_sid, sv.max_count)
        .into_iter()
        .next()
        .and_then(|f| match f.o {
            Object::Value(v) => v.as_i64(),
            Object::Ref(_) => None,
        });
    shape.min_inclusive = novelty.current_values(shape_sid, sv.min_inclusive).into_iter().next().and_then(|f| match f.o { Object::Value(v) => number_of(&v), _ => None });
    shape.max_inclusive = novelty.current_values(shape_sid, sv.max_inclusive).into_iter().next().and_then(|f| match f.o { Object::Value(v) => number_of(&v), _ => None });
    shape.min_exclusive = novelty.current_values(shape_sid, sv.min_exclusive).into_iter().next().and_then(|f| match f.o { Object::Value(v) => number_of(&v), _ => None });
    shape.max_exclusive = novelty.current_values(shape_sid, sv.max_exclusive).into_iter().next().and_then(|f| match f.o { Object::Value(v) => number_of(&v), _ => None });
    shape.min_length = novelty.current_values(shape_sid, sv.min_length).into_iter().next().and_then(|f| match f.o { Object::Value(v) => v.as_i64(), _ => None });
    shape.max_length = novelty.current_values(shape_sid, sv.max_length).into_iter().next().and_then(|f| match f.o { Object::Value(v) => v.as_i64(), _ => None });
    shape.pattern = novelty.current_values(shape_sid, sv.pattern).into_iter().next().and_then(|f| match f.o { Object::Value(v) => v.as_str().map(str::to_string), _ => None });
    shape.flags = novelty.current_values(shape_sid, sv.flags).into_iter().next().and_then(|f| match f.o { Object::Value(v) => v.as_str().map(str::to_string), _ => None });
    shape.language_in = ordered_list(novelty, shape_sid, sv.language_in)
        .into_iter()
        .filter_map(|f| match f.o { Object::Value(v) => v.as_str().map(str::to_string), _ => None })
        .collect();
    shape.unique_lang = novelty.current_values(shape_sid, sv.unique_lang).into_iter().next().and_then(|f| match f.o { Object::Value(v) => v.as_bool(), _ => None }).unwrap_or(false);
    shape.equals = refs(sv.equals).into_iter().next();
    shape.disjoint = refs(sv.disjoint).into_iter().next();
    shape.less_than = refs(sv.less_than).into_iter().next();
    shape.less_than_or_equals = refs(sv.less_than_or_equals).into_iter().next();
    let in_values: Vec<Object> = ordered_list(novelty, shape_sid, sv.in_).into_iter().map(|f| f.o).collect();
    shape.in_list = if in_values.is_empty() { None } else { Some(in_values) };
    shape.has_value = novelty.current_values(shape_sid, sv.has_value).into_iter().next().map(|f| f.o);
    shape.not = refs(sv.not);
    shape.and = refs(sv.and);
    shape.or = refs(sv.or);
    shape.xone = refs(sv.xone);
    shape.node = refs(sv.node);
    shape.property = refs(sv.property);
    shape.qualified_value_shape = refs(sv.qualified_value_shape).into_iter().next();
    shape.qualified_min_count = novelty.current_values(shape_sid, sv.qualified_min_count).into_iter().next().and_then(|f| match f.o { Object::Value(v) => v.as_i64(), _ => None });
    shape.qualified_max_count = novelty.current_values(shape_sid, sv.qualified_max_count).into_iter().next().and_then(|f| match f.o { Object::Value(v) => v.as_i64(), _ => None });
    shape.qualified_value_shapes_disjoint = novelty.current_values(shape_sid, sv.qualified_value_shapes_disjoint).into_iter().next().and_then(|f| match f.o { Object::Value(v) => v.as_bool(), _ => None }).unwrap_or(false);
    shape.closed = novelty.current_values(shape_sid, sv.closed).into_iter().next().and_then(|f| match f.o { Object::Value(v) => v.as_bool(), _ => None }).unwrap_or(false);
    shape.ignored_properties = refs(sv.ignored_properties);
    shape.contains_rejected = !novelty.current_values(shape_sid, sv.contains).is_empty();
    shape.severity = novelty.current_values(shape_sid, sv.severity).into_iter().next().and_then(|f| f.o.as_ref_sid()).map(|s| format!("{}:{}", s.namespace, s.name_id));

    shape
}

/// Process-wide shape cache, keyed by shape SID (spec §3.5, §4.5, §9). Entries
/// are pure and recomputed on demand; invalidated whenever a flake with a
/// SHACL-namespace predicate is added.
#[derive(Debug, Default)]
pub struct ShapeCache {
    cache: dashmap::DashMap<Sid, std::sync::Arc<ShapeDef>>,
}

impl ShapeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize (or fetch) the shape at `shape_sid`, enforcing the depth
    /// guard against reference cycles (spec §4.5 "up to a fixed depth guard
    /// to break cycles").
    fn get_or_build(
        &self,
        shape_sid: Sid,
        novelty: &Novelty,
        sv: &ShaclVocab,
        depth: usize,
        max_depth: usize,
    ) -> Result<std::sync::Arc<ShapeDef>> {
        if depth > max_depth {
            return Err(DbError::schema(format!(
                "SHACL shape recursion exceeded max depth {max_depth} (possible cycle at shape {shape_sid:?})"
            )));
        }
        if let Some(existing) = self.cache.get(&shape_sid) {
            return Ok(existing.clone());
        }
        let def = std::sync::Arc::new(build_shape_def(shape_sid, novelty, sv));
        self.cache.insert(shape_sid, def.clone());
        Ok(def)
    }

    /// Drop every cached shape (spec §3.5 "invalidated whenever a flake
    /// affecting the SHACL subgraph is added").
    pub fn invalidate(&self) {
        self.cache.clear();
    }
}

/// Whether any of `flakes` touches the SHACL subgraph (spec §3.5 "Shape cache
/// ... invalidated whenever a flake affecting the SHACL subgraph is added").
/// Checked by namespace code rather than a full IRI decode since every SHACL
/// predicate lives under the single reserved `sh:` namespace (`ns::SHACL`).
pub fn touches_shacl_subgraph(flakes: &[crate::flake::Flake]) -> bool {
    flakes.iter().any(|f| f.p.namespace == crate::sid::ns::SHACL || f.s.namespace == crate::sid::ns::SHACL)
}

/// Discover candidate shape subjects: those typed `sh:NodeShape` (directly, or
/// implicitly by being a class with at least one target declaration) (spec
/// §4.5 "Shape discovery", "Implicit targeting").
fn discover_shapes(novelty: &Novelty, schema: &Schema, codec: &IriCodec, vocab: &Vocab, sv: &ShaclVocab) -> Vec<Sid> {
    let node_shape_sid = codec.encode(vocab::SH_NODE_SHAPE);
    let mut shapes: HashSet<Sid> = novelty
        .referencing(node_shape_sid)
        .into_iter()
        .filter(|f| f.p == vocab.rdf_type)
        .map(|f| f.s)
        .filter(|s| novelty.current_values(*s, vocab.rdf_type).iter().any(|f| f.o.as_ref_sid() == Some(node_shape_sid)))
        .collect();

    // Implicit targeting: any class with shape-bearing predicates attached
    // directly (sh:property, target*) also counts, even without an explicit
    // sh:NodeShape type (spec §4.5).
    for (sid, meta) in &schema.properties {
        if !meta.is_class {
            continue;
        }
        let has_shape_predicates = [sv.property, sv.target_class, sv.target_node, sv.target_subjects_of, sv.target_objects_of, sv.closed]
            .iter()
            .any(|p| !novelty.current_values(*sid, *p).is_empty());
        if has_shape_predicates {
            shapes.insert(*sid);
        }
    }
    shapes.into_iter().collect()
}

fn class_instances(novelty: &Novelty, schema: &Schema, vocab: &Vocab, class: Sid) -> HashSet<Sid> {
    let mut classes = HashSet::new();
    classes.insert(class);
    if let Some(subclasses) = schema.subclasses.get(&class) {
        classes.extend(subclasses.iter().copied());
    }
    let mut out = HashSet::new();
    for c in classes {
        for flake in novelty.referencing(c) {
            if flake.p == vocab.rdf_type && novelty.current_values(flake.s, vocab.rdf_type).iter().any(|f| f.o.as_ref_sid() == Some(c)) {
                out.insert(flake.s);
            }
        }
    }
    out
}

/// Select focus nodes for `shape`, scoped to `modified` (spec §4.5 "Target
/// selection").
fn select_targets(
    shape: &ShapeDef,
    novelty: &Novelty,
    schema: &Schema,
    vocab: &Vocab,
    modified: &HashSet<Sid>,
) -> HashSet<Sid> {
    let mut focus = HashSet::new();

    for class in &shape.target_class {
        focus.extend(class_instances(novelty, schema, vocab, *class).into_iter().filter(|s| modified.contains(s)));
    }
    for node in &shape.target_node {
        if modified.contains(node) {
            focus.insert(*node);
        }
    }
    for predicate in &shape.target_subjects_of {
        for s in modified {
            if !novelty.current_values(*s, *predicate).is_empty() {
                focus.insert(*s);
            }
        }
    }
    for predicate in &shape.target_objects_of {
        for s in modified {
            for f in novelty.current_values(*s, *predicate) {
                if let Some(obj) = f.o.as_ref_sid() {
                    focus.insert(obj);
                }
            }
            for f in novelty.referencing(*s) {
                if f.p == *predicate {
                    focus.insert(f.s);
                }
            }
        }
    }
    // Implicit targeting: shape is also a class.
    if let Some(meta) = schema.properties.get(&shape.id) {
        if meta.is_class {
            focus.extend(class_instances(novelty, schema, vocab, shape.id).into_iter().filter(|s| modified.contains(s)));
        }
    }
    focus
}

fn object_as_json(object: &Object, codec: &IriCodec) -> serde_json::Value {
    match object {
        Object::Value(v) => v.clone(),
        Object::Ref(sid) => serde_json::json!(codec.decode(*sid).unwrap_or_default()),
    }
}

fn result(shape: &ShapeDef, subject: Sid, constraint: &str, path: Option<&Path>, expect: Option<serde_json::Value>, value: Option<serde_json::Value>, message: impl Into<String>, codec: &IriCodec) -> ValidationResult {
    ValidationResult {
        subject: codec.decode(subject).unwrap_or_default(),
        shape: codec.decode(shape.id).unwrap_or_default(),
        constraint: constraint.to_string(),
        path: path.map(|p| match p {
            Path::Predicate(s) | Path::Inverse(s) => codec.decode(*s).unwrap_or_default(),
            Path::Alternative(ss) => ss.iter().map(|s| codec.decode(*s).unwrap_or_default()).collect::<Vec<_>>().join("|"),
        }),
        expect,
        value,
        message: message.into(),
        severity: shape.severity.clone().unwrap_or_else(|| "sh:Violation".to_string()),
    }
}

/// Evaluate `shape`'s scalar/cardinality/logical constraints against `focus`,
/// appending violations to `out` (spec §4.5 "Constraint catalogue").
#[allow(clippy::too_many_arguments)]
fn check_shape(
    shape: &ShapeDef,
    focus: Sid,
    novelty: &Novelty,
    schema: &Schema,
    codec: &IriCodec,
    vocab: &Vocab,
    cache: &ShapeCache,
    sv: &ShaclVocab,
    depth: usize,
    max_depth: usize,
    out: &mut Vec<ValidationResult>,
) -> Result<()> {
    if shape.contains_rejected {
        out.push(result(shape, focus, "sh:contains", shape.path.as_ref(), None, None, "sh:contains is recognized but not supported", codec));
    }

    let value_nodes: Vec<ValueNode> = match &shape.path {
        Some(path) => resolve_path(path, focus, novelty, vocab),
        None => vec![ValueNode { object: Object::Ref(focus), datatype: vocab.xsd_any_uri, lang: None }],
    };

    if !shape.class.is_empty() {
        for vn in &value_nodes {
            let Some(sid) = vn.as_ref_sid() else {
                out.push(result(shape, focus, "sh:class", shape.path.as_ref(), Some(serde_json::json!(shape.class.iter().map(|c| codec.decode(*c).unwrap_or_default()).collect::<Vec<_>>())), Some(object_as_json(&vn.object, codec)), "value is not a reference", codec));
                continue;
            };
            let satisfies = shape.class.iter().all(|expected| class_instances(novelty, schema, vocab, *expected).contains(&sid));
            if !satisfies {
                out.push(result(shape, focus, "sh:class", shape.path.as_ref(), Some(serde_json::json!(shape.class.iter().map(|c| codec.decode(*c).unwrap_or_default()).collect::<Vec<_>>())), Some(codec.decode(sid).map(serde_json::Value::String).unwrap_or(serde_json::Value::Null)), "value is not typed with every required class", codec));
            }
        }
    }

    if let Some(expected_dt) = shape.datatype {
        for vn in &value_nodes {
            if vn.datatype != expected_dt {
                out.push(result(shape, focus, "sh:datatype", shape.path.as_ref(), Some(serde_json::json!(codec.decode(expected_dt))), Some(object_as_json(&vn.object, codec)), "value does not have the expected datatype", codec));
            }
        }
    }

    if let Some(kind) = &shape.node_kind {
        for vn in &value_nodes {
            let is_iri = vn.as_ref_sid().is_some();
            let ok = match kind.as_str() {
                k if k.ends_with("IRI") => is_iri,
                k if k.ends_with("Literal") => !is_iri,
                _ => true,
            };
            if !ok {
                out.push(result(shape, focus, "sh:nodeKind", shape.path.as_ref(), Some(serde_json::json!(kind)), Some(object_as_json(&vn.object, codec)), "value does not match the required node kind", codec));
            }
        }
    }

    if let Some(min) = shape.min_count {
        if (value_nodes.len() as i64) < min {
            out.push(result(shape, focus, "sh:minCount", shape.path.as_ref(), Some(serde_json::json!(min)), Some(serde_json::json!(value_nodes.len())), "too few values", codec));
        }
    }
    if let Some(max) = shape.max_count {
        if (value_nodes.len() as i64) > max {
            out.push(result(shape, focus, "sh:maxCount", shape.path.as_ref(), Some(serde_json::json!(max)), Some(serde_json::json!(value_nodes.len())), "too many values", codec));
        }
    }

    for vn in &value_nodes {
        if let Object::Value(v) = &vn.object {
            if let Some(n) = v.as_f64() {
                if let Some(bound) = shape.min_inclusive {
                    if n < bound {
                        out.push(result(shape, focus, "sh:minInclusive", shape.path.as_ref(), Some(serde_json::json!(bound)), Some(v.clone()), "value below minimum (inclusive)", codec));
                    }
                }
                if let Some(bound) = shape.max_inclusive {
                    if n > bound {
                        out.push(result(shape, focus, "sh:maxInclusive", shape.path.as_ref(), Some(serde_json::json!(bound)), Some(v.clone()), "value above maximum (inclusive)", codec));
                    }
                }
                if let Some(bound) = shape.min_exclusive {
                    if n <= bound {
                        out.push(result(shape, focus, "sh:minExclusive", shape.path.as_ref(), Some(serde_json::json!(bound)), Some(v.clone()), "value below minimum (exclusive)", codec));
                    }
                }
                if let Some(bound) = shape.max_exclusive {
                    if n >= bound {
                        out.push(result(shape, focus, "sh:maxExclusive", shape.path.as_ref(), Some(serde_json::json!(bound)), Some(v.clone()), "value above maximum (exclusive)", codec));
                    }
                }
            }
            let as_string = match v {
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            };
            if let Some(s) = as_string {
                if let Some(min_len) = shape.min_length {
                    if (s.chars().count() as i64) < min_len {
                        out.push(result(shape, focus, "sh:minLength", shape.path.as_ref(), Some(serde_json::json!(min_len)), Some(v.clone()), "string shorter than minLength", codec));
                    }
                }
                if let Some(max_len) = shape.max_length {
                    if (s.chars().count() as i64) > max_len {
                        out.push(result(shape, focus, "sh:maxLength", shape.path.as_ref(), Some(serde_json::json!(max_len)), Some(v.clone()), "string longer than maxLength", codec));
                    }
                }
                if let Some(pattern) = &shape.pattern {
                    let built = if let Some(flags) = &shape.flags {
                        Regex::new(&format!("(?{flags}){pattern}"))
                    } else {
                        Regex::new(pattern)
                    };
                    match built {
                        Ok(re) if !re.is_match(&s) => {
                            out.push(result(shape, focus, "sh:pattern", shape.path.as_ref(), Some(serde_json::json!(pattern)), Some(v.clone()), "value does not match pattern", codec));
                        }
                        Err(e) => return Err(DbError::from(e)),
                        _ => {}
                    }
                }
            }
            if !shape.language_in.is_empty() {
                let lang_ok = vn.lang.as_deref().map(|l| shape.language_in.iter().any(|allowed| allowed == l)).unwrap_or(false);
                if !lang_ok {
                    out.push(result(shape, focus, "sh:languageIn", shape.path.as_ref(), Some(serde_json::json!(shape.language_in)), Some(v.clone()), "value language tag not in allowed list", codec));
                }
            }
        }
    }

    if shape.unique_lang {
        let mut seen = HashSet::new();
        for vn in &value_nodes {
            if let Some(lang) = &vn.lang {
                if !seen.insert(lang.clone()) {
                    out.push(result(shape, focus, "sh:uniqueLang", shape.path.as_ref(), None, Some(serde_json::json!(lang)), "duplicate language tag among values", codec));
                }
            }
        }
    }

    if let Some(companion) = shape.equals {
        let companion_values: HashSet<Vec<u8>> = novelty.current_values(focus, companion).iter().map(|f| f.o.canonical_bytes()).collect();
        let own: HashSet<Vec<u8>> = value_nodes.iter().map(|vn| vn.object.canonical_bytes()).collect();
        if own != companion_values {
            out.push(result(shape, focus, "sh:equals", shape.path.as_ref(), None, None, "value set does not equal companion predicate's value set", codec));
        }
    }
    if let Some(companion) = shape.disjoint {
        let companion_values: HashSet<Vec<u8>> = novelty.current_values(focus, companion).iter().map(|f| f.o.canonical_bytes()).collect();
        if value_nodes.iter().any(|vn| companion_values.contains(&vn.object.canonical_bytes())) {
            out.push(result(shape, focus, "sh:disjoint", shape.path.as_ref(), None, None, "value set intersects companion predicate's value set", codec));
        }
    }
    if let Some(companion) = shape.less_than {
        let companion_values = novelty.current_values(focus, companion);
        for vn in &value_nodes {
            if let Object::Value(v) = &vn.object {
                if let Some(n) = v.as_f64() {
                    let violates = companion_values.iter().any(|c| matches!(&c.o, Object::Value(cv) if cv.as_f64().map(|cn| n >= cn).unwrap_or(false)));
                    if violates {
                        out.push(result(shape, focus, "sh:lessThan", shape.path.as_ref(), None, Some(v.clone()), "value is not less than companion predicate's value", codec));
                    }
                }
            }
        }
    }
    if let Some(companion) = shape.less_than_or_equals {
        let companion_values = novelty.current_values(focus, companion);
        for vn in &value_nodes {
            if let Object::Value(v) = &vn.object {
                if let Some(n) = v.as_f64() {
                    let violates = companion_values.iter().any(|c| matches!(&c.o, Object::Value(cv) if cv.as_f64().map(|cn| n > cn).unwrap_or(false)));
                    if violates {
                        out.push(result(shape, focus, "sh:lessThanOrEquals", shape.path.as_ref(), None, Some(v.clone()), "value is not less than or equal to companion predicate's value", codec));
                    }
                }
            }
        }
    }

    if let Some(allowed) = &shape.in_list {
        let allowed_bytes: HashSet<Vec<u8>> = allowed.iter().map(|o| o.canonical_bytes()).collect();
        for vn in &value_nodes {
            if !allowed_bytes.contains(&vn.object.canonical_bytes()) {
                out.push(result(shape, focus, "sh:in", shape.path.as_ref(), Some(serde_json::json!(allowed.iter().map(|o| object_as_json(o, codec)).collect::<Vec<_>>())), Some(object_as_json(&vn.object, codec)), "value is not one of the enumerated terms", codec));
            }
        }
    }
    if let Some(required) = &shape.has_value {
        let has = value_nodes.iter().any(|vn| vn.object.canonical_bytes() == required.canonical_bytes());
        if !has {
            out.push(result(shape, focus, "sh:hasValue", shape.path.as_ref(), Some(object_as_json(required, codec)), None, "required value is not present", codec));
        }
    }

    // Logical combinators: each references sibling node shapes (no `sh:path`).
    for sub_sid in &shape.not {
        let sub = cache.get_or_build(*sub_sid, novelty, sv, depth + 1, max_depth)?;
        let mut sub_out = Vec::new();
        check_shape(&sub, focus, novelty, schema, codec, vocab, cache, sv, depth + 1, max_depth, &mut sub_out)?;
        if sub_out.is_empty() {
            out.push(result(shape, focus, "sh:not", None, None, None, "node conforms to a shape it must not conform to", codec));
        }
    }
    for sub_sid in &shape.and {
        let sub = cache.get_or_build(*sub_sid, novelty, sv, depth + 1, max_depth)?;
        check_shape(&sub, focus, novelty, schema, codec, vocab, cache, sv, depth + 1, max_depth, out)?;
    }
    if !shape.or.is_empty() {
        let mut any_ok = false;
        for sub_sid in &shape.or {
            let sub = cache.get_or_build(*sub_sid, novelty, sv, depth + 1, max_depth)?;
            let mut sub_out = Vec::new();
            check_shape(&sub, focus, novelty, schema, codec, vocab, cache, sv, depth + 1, max_depth, &mut sub_out)?;
            if sub_out.is_empty() {
                any_ok = true;
            }
        }
        if !any_ok {
            out.push(result(shape, focus, "sh:or", None, None, None, "node conforms to none of the alternative shapes", codec));
        }
    }
    if !shape.xone.is_empty() {
        let mut conforming = 0;
        for sub_sid in &shape.xone {
            let sub = cache.get_or_build(*sub_sid, novelty, sv, depth + 1, max_depth)?;
            let mut sub_out = Vec::new();
            check_shape(&sub, focus, novelty, schema, codec, vocab, cache, sv, depth + 1, max_depth, &mut sub_out)?;
            if sub_out.is_empty() {
                conforming += 1;
            }
        }
        if conforming != 1 {
            out.push(result(shape, focus, "sh:xone", None, None, Some(serde_json::json!(conforming)), "node must conform to exactly one alternative shape", codec));
        }
    }

    for sub_sid in &shape.node {
        let sub = cache.get_or_build(*sub_sid, novelty, sv, depth + 1, max_depth)?;
        for vn in &value_nodes {
            let Some(sid) = vn.as_ref_sid() else { continue };
            let mut sub_out = Vec::new();
            check_shape(&sub, sid, novelty, schema, codec, vocab, cache, sv, depth + 1, max_depth, &mut sub_out)?;
            if !sub_out.is_empty() {
                out.push(result(shape, focus, "sh:node", shape.path.as_ref(), None, Some(codec.decode(sid).map(serde_json::Value::String).unwrap_or(serde_json::Value::Null)), "value does not conform to the referenced shape", codec));
            }
        }
    }

    for sub_sid in &shape.property {
        let sub = cache.get_or_build(*sub_sid, novelty, sv, depth + 1, max_depth)?;
        check_shape(&sub, focus, novelty, schema, codec, vocab, cache, sv, depth + 1, max_depth, out)?;
    }

    if let Some(qualified_sid) = shape.qualified_value_shape {
        let sub = cache.get_or_build(qualified_sid, novelty, sv, depth + 1, max_depth)?;
        let mut count = 0;
        for vn in &value_nodes {
            let Some(sid) = vn.as_ref_sid() else { continue };
            let mut sub_out = Vec::new();
            check_shape(&sub, sid, novelty, schema, codec, vocab, cache, sv, depth + 1, max_depth, &mut sub_out)?;
            if sub_out.is_empty() {
                count += 1;
            }
        }
        if let Some(min) = shape.qualified_min_count {
            if count < min {
                out.push(result(shape, focus, "sh:qualifiedMinCount", shape.path.as_ref(), Some(serde_json::json!(min)), Some(serde_json::json!(count)), "too few values conform to the qualified shape", codec));
            }
        }
        if let Some(max) = shape.qualified_max_count {
            if count > max {
                out.push(result(shape, focus, "sh:qualifiedMaxCount", shape.path.as_ref(), Some(serde_json::json!(max)), Some(serde_json::json!(count)), "too many values conform to the qualified shape", codec));
            }
        }
    }

    if shape.closed {
        let mut allowed: HashSet<Sid> = shape.ignored_properties.iter().copied().collect();
        for sub_sid in &shape.property {
            if let Ok(sub) = cache.get_or_build(*sub_sid, novelty, sv, depth + 1, max_depth) {
                if let Some(p) = &sub.path {
                    allowed.extend(path_predicates(p));
                }
            }
        }
        for flake in novelty.subject_flakes(focus) {
            if !flake.op || flake.p == vocab.fluree_iri || flake.p == vocab.rdf_type {
                continue;
            }
            if !allowed.contains(&flake.p) {
                let values: Vec<serde_json::Value> = novelty.current_values(focus, flake.p).iter().map(|f| object_as_json(&f.o, codec)).collect();
                out.push(result(
                    shape,
                    focus,
                    "sh:closed",
                    None,
                    None,
                    Some(serde_json::json!(values)),
                    format!(
                        "disallowed path {} with values {}",
                        codec.decode(flake.p).unwrap_or_default(),
                        values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
                    ),
                    codec,
                ));
            }
        }
    }

    Ok(())
}

/// Validate every modified subject against every applicable shape, returning
/// `Err(DbError::shacl_violation(..))` if any violation is found (spec §4.5
/// "Result shape", §7 "shacl-violation").
pub fn validate(
    novelty: &Novelty,
    schema: &Schema,
    codec: &IriCodec,
    vocab: &Vocab,
    cache: &ShapeCache,
    modified: &HashSet<Sid>,
    max_shape_depth: usize,
) -> Result<()> {
    let sv = ShaclVocab::new(codec);
    let shape_sids = discover_shapes(novelty, schema, codec, vocab, &sv);
    tracing::debug!(shapes = shape_sids.len(), modified = modified.len(), "validating modified subjects against shapes");
    let mut results = Vec::new();

    for shape_sid in shape_sids {
        let shape = cache.get_or_build(shape_sid, novelty, &sv, 0, max_shape_depth)?;
        let focus_nodes = select_targets(&shape, novelty, schema, vocab, modified);
        for focus in focus_nodes {
            check_shape(&shape, focus, novelty, schema, codec, vocab, cache, &sv, 0, max_shape_depth, &mut results)?;
        }
    }

    if results.is_empty() {
        Ok(())
    } else {
        tracing::warn!(violations = results.len(), "SHACL validation failed");
        Err(DbError::shacl_violation(ValidationReport { conforms: false, results }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transact::stage_insert;
    use crate::config::TransactorOptions;

    fn fixture() -> (IriCodec, Vocab, Novelty) {
        let codec = IriCodec::new();
        let vocab = Vocab::new(&codec);
        (codec, vocab, Novelty::new())
    }

    fn insert(codec: &IriCodec, vocab: &Vocab, novelty: &mut Novelty, doc: serde_json::Value, t: i64) {
        let opts = TransactorOptions::default();
        for flake in stage_insert(&[doc], t, codec, vocab, novelty, &opts).unwrap() {
            novelty.insert(flake);
        }
    }

    fn schema_for(codec: &IriCodec, vocab: &Vocab, novelty: &Novelty) -> Schema {
        crate::schema::hydrate(&Schema::new(), &novelty.iter_spot().cloned().collect::<Vec<_>>(), codec, vocab)
    }

    #[test]
    fn min_count_violation_reports_expect_and_value() {
        let (codec, vocab, mut novelty) = fixture();
        insert(&codec, &vocab, &mut novelty, serde_json::json!({
            "@id": "ex:UserShape",
            "@type": "http://www.w3.org/ns/shacl#NodeShape",
            "http://www.w3.org/ns/shacl#targetClass": {"@id": "ex:User"},
            "http://www.w3.org/ns/shacl#property": {
                "@id": "ex:UserShape-email",
                "http://www.w3.org/ns/shacl#path": {"@id": "ex:email"},
                "http://www.w3.org/ns/shacl#minCount": 1,
                "http://www.w3.org/ns/shacl#maxCount": 1,
            },
        }), -1);
        insert(&codec, &vocab, &mut novelty, serde_json::json!({
            "@id": "ex:alice",
            "@type": "ex:User",
            "ex:name": "Alice",
        }), -2);

        let schema = schema_for(&codec, &vocab, &novelty);
        let cache = ShapeCache::new();
        let modified: HashSet<Sid> = [codec.encode("ex:alice")].into_iter().collect();
        let err = validate(&novelty, &schema, &codec, &vocab, &cache, &modified, 32).unwrap_err();
        let report = err.report.unwrap();
        assert!(report.results.iter().any(|r| r.constraint == "sh:minCount" && r.expect == Some(serde_json::json!(1)) && r.value == Some(serde_json::json!(0))));
    }

    #[test]
    fn closed_shape_reports_disallowed_path() {
        let (codec, vocab, mut novelty) = fixture();
        insert(&codec, &vocab, &mut novelty, serde_json::json!({
            "@id": "ex:UserShape",
            "@type": "http://www.w3.org/ns/shacl#NodeShape",
            "http://www.w3.org/ns/shacl#targetClass": {"@id": "ex:User"},
            "http://www.w3.org/ns/shacl#closed": true,
            "http://www.w3.org/ns/shacl#property": {
                "@id": "ex:UserShape-name",
                "http://www.w3.org/ns/shacl#path": {"@id": "ex:name"},
            },
        }), -1);
        insert(&codec, &vocab, &mut novelty, serde_json::json!({
            "@id": "ex:bob",
            "@type": "ex:User",
            "ex:name": "Bob",
            "ex:age": 30,
        }), -2);

        let schema = schema_for(&codec, &vocab, &novelty);
        let cache = ShapeCache::new();
        let modified: HashSet<Sid> = [codec.encode("ex:bob")].into_iter().collect();
        let err = validate(&novelty, &schema, &codec, &vocab, &cache, &modified, 32).unwrap_err();
        let report = err.report.unwrap();
        let violation = report.results.iter().find(|r| r.constraint == "sh:closed").unwrap();
        assert!(violation.message.contains("ex:age"));
        assert!(violation.message.contains("30"));
    }

    #[test]
    fn conforming_subject_produces_no_violations() {
        let (codec, vocab, mut novelty) = fixture();
        insert(&codec, &vocab, &mut novelty, serde_json::json!({
            "@id": "ex:UserShape",
            "@type": "http://www.w3.org/ns/shacl#NodeShape",
            "http://www.w3.org/ns/shacl#targetClass": {"@id": "ex:User"},
            "http://www.w3.org/ns/shacl#property": {
                "@id": "ex:UserShape-email",
                "http://www.w3.org/ns/shacl#path": {"@id": "ex:email"},
                "http://www.w3.org/ns/shacl#minCount": 1,
            },
        }), -1);
        insert(&codec, &vocab, &mut novelty, serde_json::json!({
            "@id": "ex:carol",
            "@type": "ex:User",
            "ex:email": "carol@example.com",
        }), -2);

        let schema = schema_for(&codec, &vocab, &novelty);
        let cache = ShapeCache::new();
        let modified: HashSet<Sid> = [codec.encode("ex:carol")].into_iter().collect();
        assert!(validate(&novelty, &schema, &codec, &vocab, &cache, &modified, 32).is_ok());
    }

    #[test]
    fn shape_cache_invalidation_clears_entries() {
        let cache = ShapeCache::new();
        let codec = IriCodec::new();
        let sv = ShaclVocab::new(&codec);
        let novelty = Novelty::new();
        let sid = codec.encode("ex:Shape");
        let _ = cache.get_or_build(sid, &novelty, &sv, 0, 4).unwrap();
        assert_eq!(cache.cache.len(), 1);
        cache.invalidate();
        assert_eq!(cache.cache.len(), 0);
    }

    #[test]
    fn path_with_inverse_resolves_referring_subjects() {
        let (codec, vocab, mut novelty) = fixture();
        insert(&codec, &vocab, &mut novelty, serde_json::json!({
            "@id": "ex:alice",
            "ex:knows": {"@id": "ex:bob"},
        }), -1);
        let path = Path::Inverse(codec.encode("ex:knows"));
        let bob = codec.encode("ex:bob");
        let values = resolve_path(&path, bob, &novelty, &vocab);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].as_ref_sid(), Some(codec.encode("ex:alice")));
    }
}
