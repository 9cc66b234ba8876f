//! The transactor's staging algorithm (spec §4.3): translate an expanded
//! JSON-LD document into new/retracted flakes, without touching novelty
//! directly — the caller merges the returned flakes (spec §4.3 "Staged DB
//! construction").

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::config::TransactorOptions;
use crate::error::{DbError, Result};
use crate::flake::{Flake, Meta, Object};
use crate::novelty::Novelty;
use crate::sid::{IriCodec, Sid};
use crate::vocab::{self, Vocab};

/// A parsed transaction document (spec §4.3 step 2).
#[derive(Debug, Clone)]
pub enum TxnKind {
    Insert(Vec<Value>),
    Modify {
        delete: Vec<Value>,
        insert: Vec<Value>,
        /// The `@where` clause, left unevaluated (spec §1: "query-language
        /// surface ... treated as a black box producing a where-solution
        /// stream"). The caller resolves it externally and supplies
        /// [`StageRequest::Modify::solutions`].
        where_clause: Value,
    },
}

/// Staging input: either a plain insert document, or a modify document paired
/// with its already-resolved `@where` solutions.
#[derive(Debug, Clone)]
pub enum StageRequest {
    Insert(Vec<Value>),
    Modify {
        delete: Vec<Value>,
        insert: Vec<Value>,
        solutions: Vec<HashMap<String, Value>>,
    },
}

fn as_node_array(document: &Value) -> Result<Vec<Value>> {
    match document {
        Value::Array(items) => Ok(items.clone()),
        Value::Object(_) => Ok(vec![document.clone()]),
        _ => Err(DbError::invalid_transaction("document must be a node object or array of nodes")),
    }
}

/// Classify a document as insert or modify (spec §4.3 step 2).
pub fn classify(document: &Value) -> Result<TxnKind> {
    if let Some(obj) = document.as_object() {
        if obj.contains_key("@delete") || obj.contains_key("@insert") || obj.contains_key("@where") {
            let delete = obj.get("@delete").map(as_node_array).transpose()?.unwrap_or_default();
            let insert = obj.get("@insert").map(as_node_array).transpose()?.unwrap_or_default();
            let where_clause = obj.get("@where").cloned().unwrap_or(Value::Null);
            return Ok(TxnKind::Modify { delete, insert, where_clause });
        }
    }
    Ok(TxnKind::Insert(as_node_array(document)?))
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn scalar_datatype(value: &Value, vocab: &Vocab) -> Sid {
    match value {
        Value::String(_) => vocab.xsd_string,
        Value::Bool(_) => vocab.xsd_boolean,
        Value::Number(n) if n.is_i64() || n.is_u64() => vocab.xsd_integer,
        Value::Number(_) => vocab.xsd_decimal,
        _ => vocab.xsd_string,
    }
}

fn is_property_range_types(types: &[String]) -> bool {
    types.iter().any(|t| {
        t == vocab::RDFS_CLASS || t == vocab::RDF_PROPERTY || t == vocab::SH_NODE_SHAPE || t == vocab::SH_PROPERTY_SHAPE
    })
}

fn extract_types(obj: &serde_json::Map<String, Value>) -> Vec<String> {
    match obj.get("@type") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    }
}

/// Values at a predicate, normalized to `(optional list index, value)` pairs;
/// an `@list` wrapper yields indices, a bare array or scalar does not (spec
/// §4.3.f: "emit flakes with metadata `:i` preserving index order").
fn normalize_values(value: &Value) -> Result<Vec<(Option<i64>, &Value)>> {
    if let Some(obj) = value.as_object() {
        if let Some(list) = obj.get("@list") {
            let items = list
                .as_array()
                .ok_or_else(|| DbError::invalid_transaction("@list value is not a vector"))?;
            return Ok(items.iter().enumerate().map(|(i, v)| (Some(i as i64), v)).collect());
        }
    }
    match value {
        Value::Array(items) => Ok(items.iter().map(|v| (None, v)).collect()),
        other => Ok(vec![(None, other)]),
    }
}

fn retract_stale(
    novelty: &Novelty,
    s: Sid,
    p: Sid,
    new_object_bytes: &[Vec<u8>],
    t: i64,
    opts: &TransactorOptions,
    out: &mut Vec<Flake>,
) -> Result<()> {
    if let Some(fuel) = &opts.fuel {
        fuel.charge(1)?;
    }
    for prior in novelty.current_values(s, p) {
        if !new_object_bytes.contains(&prior.o.canonical_bytes()) {
            out.push(prior.flip(t));
        }
    }
    Ok(())
}

fn literal_flake(s: Sid, p: Sid, value: &Value, index: Option<i64>, t: i64, vocab: &Vocab) -> Result<Flake> {
    let mut meta = Meta::default();
    if let Some(i) = index {
        meta.i = Some(i);
    }
    if let Some(obj) = value.as_object() {
        if let Some(literal) = obj.get("@value") {
            if let Some(lang) = obj.get("@language").and_then(Value::as_str) {
                meta.lang = Some(lang.to_string());
            }
            let dt = scalar_datatype(literal, vocab);
            return Ok(Flake::new(s, p, Object::Value(literal.clone()), dt, t, true).with_meta(meta));
        }
        return Err(DbError::invalid_transaction("unsupported value shape: expected @value or a node"));
    }
    let dt = scalar_datatype(value, vocab);
    Ok(Flake::new(s, p, Object::Value(value.clone()), dt, t, true).with_meta(meta))
}

/// Stage a value that is itself a node (has `@id` and/or further properties),
/// recursing into it; returns `None` for plain literals so the caller falls
/// back to [`literal_flake`].
fn try_stage_nested_node(
    item: &Value,
    t: i64,
    codec: &IriCodec,
    vocab: &Vocab,
    novelty: &Novelty,
    opts: &TransactorOptions,
    depth: usize,
    out: &mut Vec<Flake>,
) -> Result<Option<Sid>> {
    let Some(obj) = item.as_object() else {
        return Ok(None);
    };
    if obj.contains_key("@value") {
        return Ok(None);
    }
    if obj.contains_key("@id") && obj.len() == 1 {
        let id = obj["@id"].as_str().ok_or_else(|| DbError::invalid_transaction("@id must be a string"))?;
        return Ok(Some(codec.encode(id)));
    }
    if obj.contains_key("@id") || !obj.is_empty() {
        return Ok(Some(stage_node(item, t, codec, vocab, novelty, opts, depth, out)?));
    }
    Ok(None)
}

/// Stage one top-level or nested node, returning its subject SID (spec §4.3
/// step 3, recursive case a–f).
fn stage_node(
    node: &Value,
    t: i64,
    codec: &IriCodec,
    vocab: &Vocab,
    novelty: &Novelty,
    opts: &TransactorOptions,
    depth: usize,
    out: &mut Vec<Flake>,
) -> Result<Sid> {
    if depth > opts.max_node_depth {
        return Err(DbError::invalid_transaction("maximum node recursion depth exceeded"));
    }
    if let Some(fuel) = &opts.fuel {
        fuel.charge(1)?;
    }
    let obj = node
        .as_object()
        .ok_or_else(|| DbError::invalid_transaction("node must be a JSON object"))?;

    let property_keys = obj.keys().filter(|k| k.as_str() != "@id" && k.as_str() != "@idx").count();
    if property_keys == 0 {
        return Err(DbError::invalid_transaction("node has no properties to assert"));
    }

    let id = match obj.get("@id").and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => IriCodec::new_blank_node_name(now_millis()),
    };

    let types = extract_types(obj);
    let is_property_range = is_property_range_types(&types);
    let s = codec.encode_range(&id, is_property_range);
    if let Some(fuel) = &opts.fuel {
        fuel.charge(1)?;
    }
    if novelty.subject_flakes(s).is_empty() {
        out.push(Flake::iri_flake(s, vocab.fluree_iri, &id, vocab.xsd_string, t));
    }

    if !types.is_empty() {
        let mut class_sids = Vec::with_capacity(types.len());
        for type_iri in &types {
            let class_sid = codec.encode_range(type_iri, true);
            if let Some(fuel) = &opts.fuel {
                fuel.charge(1)?;
            }
            if novelty.subject_flakes(class_sid).is_empty() {
                out.push(Flake::iri_flake(class_sid, vocab.fluree_iri, type_iri, vocab.xsd_string, t));
            }
            class_sids.push(class_sid);
        }
        let new_bytes: Vec<Vec<u8>> = class_sids.iter().map(|c| Object::Ref(*c).canonical_bytes()).collect();
        retract_stale(novelty, s, vocab.rdf_type, &new_bytes, t, opts, out)?;
        for class_sid in class_sids {
            out.push(Flake::new(s, vocab.rdf_type, Object::Ref(class_sid), vocab.xsd_any_uri, t, true));
        }
    }

    for (key, value) in obj {
        if key == "@id" || key == "@idx" || key == "@type" {
            continue;
        }
        let p = codec.encode(key);
        let items = normalize_values(value)?;
        let mut new_bytes = Vec::with_capacity(items.len());
        let mut value_flakes = Vec::with_capacity(items.len());
        for (index, item) in items {
            let flake = match try_stage_nested_node(item, t, codec, vocab, novelty, opts, depth + 1, out)? {
                Some(nested_sid) => {
                    let mut meta = Meta::default();
                    meta.i = index;
                    Flake::new(s, p, Object::Ref(nested_sid), vocab.xsd_any_uri, t, true).with_meta(meta)
                }
                None => literal_flake(s, p, item, index, t, vocab)?,
            };
            new_bytes.push(flake.o.canonical_bytes());
            value_flakes.push(flake);
        }
        retract_stale(novelty, s, p, &new_bytes, t, opts, out)?;
        out.extend(value_flakes);
    }

    Ok(s)
}

/// Stage an insert document: every top-level node, recursively (spec §4.3
/// step 3).
pub fn stage_insert(
    nodes: &[Value],
    t: i64,
    codec: &IriCodec,
    vocab: &Vocab,
    novelty: &Novelty,
    opts: &TransactorOptions,
) -> Result<Vec<Flake>> {
    let mut out = Vec::new();
    for node in nodes {
        stage_node(node, t, codec, vocab, novelty, opts, 0, &mut out)?;
    }
    Ok(out)
}

fn bind(template: &Value, solution: &HashMap<String, Value>) -> Value {
    match template {
        Value::String(s) if s.starts_with('?') => solution.get(s.as_str()).cloned().unwrap_or_else(|| template.clone()),
        Value::Array(items) => Value::Array(items.iter().map(|v| bind(v, solution)).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), bind(v, solution))).collect()),
        other => other.clone(),
    }
}

/// Stage a modify document: bind each where-solution into the delete/insert
/// templates and emit the corresponding retraction/assertion flakes at the
/// same `t` (spec §4.3 step 4).
pub fn stage_modify(
    solutions: &[HashMap<String, Value>],
    delete_template: &[Value],
    insert_template: &[Value],
    t: i64,
    codec: &IriCodec,
    vocab: &Vocab,
) -> Result<Vec<Flake>> {
    let mut out = Vec::new();
    for solution in solutions {
        for node in delete_template {
            let bound = bind(node, solution);
            out.extend(crate::commit::codec::nodes_to_flakes(&[bound], t, false, codec, vocab)?);
        }
        for node in insert_template {
            let bound = bind(node, solution);
            out.extend(crate::commit::codec::nodes_to_flakes(&[bound], t, true, codec, vocab)?);
        }
    }
    Ok(out)
}

/// Stage a transaction request end-to-end (spec §4.3).
pub fn stage(
    request: StageRequest,
    t: i64,
    codec: &IriCodec,
    vocab: &Vocab,
    novelty: &Novelty,
    opts: &TransactorOptions,
) -> Result<Vec<Flake>> {
    match request {
        StageRequest::Insert(nodes) => stage_insert(&nodes, t, codec, vocab, novelty, opts),
        StageRequest::Modify { delete, insert, solutions } => {
            stage_modify(&solutions, &delete, &insert, t, codec, vocab)
        }
    }
}
