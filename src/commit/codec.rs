//! Commit / DB-payload JSON-LD shapes, canonicalization, and content hashing
//! (spec §3.3, §6.3, §6.4, §6.5).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{DbError, Result};
use crate::flake::{Flake, Meta, Object};
use crate::sid::{IriCodec, Sid};
use crate::vocab::Vocab;

pub const COMMIT_SCHEME: &str = "fluree:commit:sha256:";
pub const DB_SCHEME: &str = "fluree:db:sha256:";
pub const LEDGER_CONTEXT: &str = "https://ns.flur.ee/ledger/v1";

/// A bare `{id}` reference (spec §6.3 `issuer`, `ns` entries).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdRef {
    pub id: String,
}

impl IdRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// `previous` commit reference (spec §6.3: `{id, type:["Commit"], address}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviousRef {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: Vec<String>,
    pub address: String,
}

impl PreviousRef {
    pub fn commit(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self { id: id.into(), type_: vec!["Commit".to_string()], address: address.into() }
    }
}

/// The `data` block of a commit, and recursively the `index.data` block
/// (spec §6.3: `{id, type:["DB"], t, address, previous?, flakes, size}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRef {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: Vec<String>,
    pub t: i64,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<IdRef>,
    pub flakes: u64,
    pub size: u64,
}

/// An `index` block, populated only once asynchronous indexing has completed
/// through some `t` (spec §3.3, §6.3: `{id, type:["Index"], address, data}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRef {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: Vec<String>,
    pub address: String,
    pub data: DataRef,
}

/// The canonical commit map (spec §3.3, §6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitMap {
    #[serde(rename = "@context")]
    pub context: String,
    pub id: String,
    pub v: u32,
    pub address: String,
    #[serde(rename = "type")]
    pub type_: Vec<String>,
    pub alias: String,
    pub branch: String,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<IdRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<PreviousRef>,
    pub data: DataRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ns: Vec<IdRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexRef>,
}

/// The DB payload referenced by `commit.data` (spec §6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbPayload {
    #[serde(rename = "@context")]
    pub context: String,
    pub id: String,
    #[serde(rename = "type")]
    pub type_: Vec<String>,
    pub t: i64,
    pub v: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assert: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retract: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    pub flakes: u64,
    pub size: u64,
}

/// Canonical bytes for hashing: UTF-8 JSON, sorted keys (spec §6.5).
///
/// `serde_json::Map` is backed by a `BTreeMap` as long as the `preserve_order`
/// crate feature is not enabled (it is not, in this crate's `Cargo.toml`), so
/// plain `serde_json::to_vec` already yields deterministic, sorted-key output
/// at every nesting level — no bespoke canonicalizer is needed.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn hash_and_encode(bytes: &[u8], scheme: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let encoded = base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &digest);
    format!("{scheme}b{encoded}")
}

/// Compute `data.id`: SHA-256/base32 of the canonicalized payload with `id` blanked
/// (spec §4.4 step 2, §6.5).
pub fn compute_data_id(payload: &DbPayload) -> Result<String> {
    let mut blanked = payload.clone();
    blanked.id = String::new();
    let bytes = canonical_bytes(&blanked)?;
    Ok(hash_and_encode(&bytes, DB_SCHEME))
}

/// Compute `commit.id`: SHA-256/base32 of the canonicalized commit map with `id`
/// and `address` blanked (spec §4.4 step 5, §6.5). `address` is excluded because
/// it is assigned by the storage backend only after the commit bytes are written
/// (spec §4.4 steps 5–7), so it cannot be part of its own content address.
pub fn compute_commit_id(commit: &CommitMap) -> Result<String> {
    let mut blanked = commit.clone();
    blanked.id = String::new();
    blanked.address = String::new();
    let bytes = canonical_bytes(&blanked)?;
    Ok(hash_and_encode(&bytes, COMMIT_SCHEME))
}

/// Verify that `commit.id` matches its recomputed hash (spec §4.4 "Read", §8
/// "Hash determinism"). Fatal `invalid-commit` on mismatch.
pub fn verify_commit_hash(commit: &CommitMap) -> Result<()> {
    let expected = compute_commit_id(commit)?;
    if expected != commit.id {
        return Err(DbError::invalid_commit(format!(
            "commit hash mismatch: expected {expected}, found {}",
            commit.id
        )));
    }
    Ok(())
}

/// Verify that `data.id` matches its recomputed hash.
pub fn verify_data_hash(payload: &DbPayload) -> Result<()> {
    let expected = compute_data_id(payload)?;
    if expected != payload.id {
        return Err(DbError::invalid_commit(format!(
            "data hash mismatch: expected {expected}, found {}",
            payload.id
        )));
    }
    Ok(())
}

/// Render a single literal/reference flake object as its JSON-LD value form
/// (spec §6.4: `@assert`/`@retract` node arrays).
fn value_json(flake: &Flake, codec: &IriCodec) -> Value {
    let base = match &flake.o {
        Object::Ref(sid) => {
            let iri = codec.decode(*sid).unwrap_or_default();
            Value::Object(Map::from_iter([("@id".to_string(), Value::String(iri))]))
        }
        Object::Value(v) => v.clone(),
    };
    match flake.m.as_ref().and_then(|m| m.lang.clone()) {
        Some(lang) if !base.is_object() => {
            let mut obj = Map::new();
            obj.insert("@value".to_string(), base);
            obj.insert("@language".to_string(), Value::String(lang));
            Value::Object(obj)
        }
        _ => base,
    }
}

/// Group flakes for one `@assert`/`@retract` array into JSON-LD node maps
/// (spec §4.4 "Write" step 1, §6.4). Each subject becomes one node, its
/// `rdf:type` flakes collapse into an `@type` array, and value groups with
/// list-index metadata render as `{"@list": [...]}` in index order.
pub fn flakes_to_nodes(flakes: &[Flake], codec: &IriCodec, vocab: &Vocab) -> Vec<Value> {
    let mut order: Vec<Sid> = Vec::new();
    let mut by_subject: HashMap<Sid, Vec<&Flake>> = HashMap::new();
    for flake in flakes {
        if flake.p == vocab.fluree_iri {
            continue;
        }
        by_subject.entry(flake.s).or_insert_with(|| {
            order.push(flake.s);
            Vec::new()
        });
        by_subject.get_mut(&flake.s).unwrap().push(flake);
    }

    let mut nodes = Vec::with_capacity(order.len());
    for s in order {
        let group = &by_subject[&s];
        let mut obj = Map::new();
        obj.insert(
            "@id".to_string(),
            Value::String(codec.decode(s).unwrap_or_default()),
        );

        let mut types: Vec<String> = Vec::new();
        let mut by_predicate: Vec<Sid> = Vec::new();
        let mut predicate_flakes: HashMap<Sid, Vec<&Flake>> = HashMap::new();
        for flake in group {
            if flake.p == vocab.rdf_type {
                if let Some(class_sid) = flake.o.as_ref_sid() {
                    types.push(codec.decode(class_sid).unwrap_or_default());
                }
                continue;
            }
            predicate_flakes.entry(flake.p).or_insert_with(|| {
                by_predicate.push(flake.p);
                Vec::new()
            });
            predicate_flakes.get_mut(&flake.p).unwrap().push(flake);
        }
        if !types.is_empty() {
            obj.insert(
                "@type".to_string(),
                if types.len() == 1 {
                    Value::String(types.into_iter().next().unwrap())
                } else {
                    Value::Array(types.into_iter().map(Value::String).collect())
                },
            );
        }

        for p in by_predicate {
            let iri = codec.decode(p).unwrap_or_default();
            let mut values = predicate_flakes[&p].clone();
            let has_index = values.iter().any(|f| f.m.as_ref().and_then(|m| m.i).is_some());
            if has_index {
                values.sort_by_key(|f| f.m.as_ref().and_then(|m| m.i).unwrap_or(0));
                let list: Vec<Value> = values.iter().map(|f| value_json(f, codec)).collect();
                obj.insert(
                    iri,
                    Value::Object(Map::from_iter([("@list".to_string(), Value::Array(list))])),
                );
            } else if values.len() == 1 {
                obj.insert(iri, value_json(values[0], codec));
            } else {
                obj.insert(
                    iri,
                    Value::Array(values.iter().map(|f| value_json(f, codec)).collect()),
                );
            }
        }

        nodes.push(Value::Object(obj));
    }
    nodes
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

fn value_to_flake(
    s: Sid,
    p: Sid,
    value: &Value,
    index: Option<i64>,
    t: i64,
    op: bool,
    codec: &IriCodec,
    vocab: &Vocab,
) -> Result<Flake> {
    let mut meta = Meta::default();
    if let Some(i) = index {
        meta.i = Some(i);
    }

    if let Some(obj) = value.as_object() {
        if let Some(id) = obj.get("@id").and_then(Value::as_str) {
            let sid = codec.encode(id);
            return Ok(Flake::new(s, p, Object::Ref(sid), vocab.xsd_any_uri, t, op).with_meta(meta));
        }
        if let Some(literal) = obj.get("@value") {
            if let Some(lang) = obj.get("@language").and_then(Value::as_str) {
                meta.lang = Some(lang.to_string());
            }
            let dt = scalar_datatype(literal, vocab);
            return Ok(Flake::new(s, p, Object::Value(literal.clone()), dt, t, op).with_meta(meta));
        }
        return Err(DbError::invalid_transaction(format!(
            "unrecognized value object for predicate {}",
            codec.decode(p).unwrap_or_default()
        )));
    }

    let dt = scalar_datatype(value, vocab);
    Ok(Flake::new(s, p, Object::Value(value.clone()), dt, t, op).with_meta(meta))
}

/// Convert one `@assert`/`@retract` node array back into flakes at transaction
/// `t` (spec §4.4 "Read": "convert `@assert`/`@retract` nodes into flakes").
pub fn nodes_to_flakes(
    nodes: &[Value],
    t: i64,
    op: bool,
    codec: &IriCodec,
    vocab: &Vocab,
) -> Result<Vec<Flake>> {
    let mut flakes = Vec::new();
    for node in nodes {
        let obj = node
            .as_object()
            .ok_or_else(|| DbError::invalid_transaction("node is not a JSON object"))?;
        let id = obj
            .get("@id")
            .and_then(Value::as_str)
            .ok_or_else(|| DbError::invalid_transaction("node missing @id"))?;
        let s = codec.encode(id);
        if op {
            flakes.push(Flake::iri_flake(s, vocab.fluree_iri, id, vocab.xsd_string, t));
        }

        for (key, value) in obj {
            if key == "@id" {
                continue;
            }
            if key == "@type" {
                let types: Vec<&str> = match value {
                    Value::String(v) => vec![v.as_str()],
                    Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
                    _ => {
                        return Err(DbError::invalid_transaction("@type must be a string or array"))
                    }
                };
                for type_iri in types {
                    let class_sid = codec.encode(type_iri);
                    flakes.push(Flake::new(
                        s,
                        vocab.rdf_type,
                        Object::Ref(class_sid),
                        vocab.xsd_any_uri,
                        t,
                        op,
                    ));
                }
                continue;
            }

            let p = codec.encode(key);
            if let Some(list_obj) = value.as_object().filter(|o| o.contains_key("@list")) {
                let items = list_obj
                    .get("@list")
                    .and_then(Value::as_array)
                    .ok_or_else(|| DbError::invalid_transaction("@list value is not a vector"))?;
                for (idx, item) in items.iter().enumerate() {
                    flakes.push(value_to_flake(s, p, item, Some(idx as i64), t, op, codec, vocab)?);
                }
                continue;
            }

            match value {
                Value::Array(items) => {
                    for item in items {
                        flakes.push(value_to_flake(s, p, item, None, t, op, codec, vocab)?);
                    }
                }
                other => {
                    flakes.push(value_to_flake(s, p, other, None, t, op, codec, vocab)?);
                }
            }
        }
    }
    Ok(flakes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> DbPayload {
        DbPayload {
            context: LEDGER_CONTEXT.to_string(),
            id: String::new(),
            type_: vec!["DB".to_string()],
            t: 1,
            v: 0,
            previous: None,
            assert: vec![serde_json::json!({"@id": "ex:a", "ex:name": "A"})],
            retract: vec![],
            namespaces: vec!["http://ex/#".to_string()],
            flakes: 3,
            size: 120,
        }
    }

    fn sample_commit(data: DataRef) -> CommitMap {
        CommitMap {
            context: LEDGER_CONTEXT.to_string(),
            id: String::new(),
            v: 0,
            address: String::new(),
            type_: vec!["Commit".to_string()],
            alias: "my-ledger".to_string(),
            branch: "main".to_string(),
            time: DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            tag: vec![],
            message: None,
            author: None,
            txn: None,
            annotation: None,
            issuer: None,
            previous: None,
            data,
            ns: vec![],
            index: None,
        }
    }

    #[test]
    fn data_hash_is_deterministic() {
        let mut payload = sample_payload();
        let id1 = compute_data_id(&payload).unwrap();
        payload.id = "whatever".to_string(); // blanked before hashing regardless
        let id2 = compute_data_id(&payload).unwrap();
        assert_eq!(id1, id2);
        assert!(id1.starts_with(DB_SCHEME));
    }

    #[test]
    fn commit_hash_round_trips() {
        let mut payload = sample_payload();
        payload.id = compute_data_id(&payload).unwrap();
        let data_ref = DataRef {
            id: payload.id.clone(),
            type_: vec!["DB".to_string()],
            t: 1,
            address: "fluree:memory://data-1".to_string(),
            previous: None,
            flakes: payload.flakes,
            size: payload.size,
        };
        let mut commit = sample_commit(data_ref);
        commit.id = compute_commit_id(&commit).unwrap();
        assert!(verify_commit_hash(&commit).is_ok());
    }

    #[test]
    fn tampered_commit_fails_hash_verification() {
        let payload = sample_payload();
        let data_ref = DataRef {
            id: "fluree:db:sha256:bdeadbeef".to_string(),
            type_: vec!["DB".to_string()],
            t: 1,
            address: "fluree:memory://data-1".to_string(),
            previous: None,
            flakes: payload.flakes,
            size: payload.size,
        };
        let mut commit = sample_commit(data_ref);
        commit.id = compute_commit_id(&commit).unwrap();
        commit.message = Some("tampered after hashing".to_string());
        assert!(verify_commit_hash(&commit).is_err());
    }

    #[test]
    fn canonical_bytes_sort_keys_regardless_of_insertion_order() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(canonical_bytes(&a).unwrap(), canonical_bytes(&b).unwrap());
    }

    fn codec_vocab() -> (IriCodec, Vocab) {
        let codec = IriCodec::new();
        let vocab = Vocab::new(&codec);
        (codec, vocab)
    }

    #[test]
    fn node_round_trips_through_flakes() {
        let (codec, vocab) = codec_vocab();
        let subject = codec.encode("http://ex/#alice");
        let name_pred = codec.encode("http://ex/#name");
        let knows_pred = codec.encode("http://ex/#knows");
        let bob = codec.encode("http://ex/#bob");

        let flakes = vec![
            Flake::iri_flake(subject, vocab.fluree_iri, "http://ex/#alice", vocab.xsd_string, -1),
            Flake::new(
                subject,
                vocab.rdf_type,
                Object::Ref(codec.encode("http://ex/#Person")),
                vocab.xsd_any_uri,
                -1,
                true,
            ),
            Flake::new(subject, name_pred, Object::Value(serde_json::json!("Alice")), vocab.xsd_string, -1, true),
            Flake::new(subject, knows_pred, Object::Ref(bob), vocab.xsd_any_uri, -1, true),
        ];

        let nodes = flakes_to_nodes(&flakes, &codec, &vocab);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0]["@id"], "http://ex/#alice");
        assert_eq!(nodes[0]["@type"], "http://ex/#Person");

        let round_tripped = nodes_to_flakes(&nodes, -1, true, &codec, &vocab).unwrap();
        assert!(round_tripped.iter().any(|f| f.p == name_pred));
        assert!(round_tripped.iter().any(|f| f.p == knows_pred && f.o == Object::Ref(bob)));
    }

    #[test]
    fn list_values_preserve_index_order() {
        let (codec, vocab) = codec_vocab();
        let subject = codec.encode("http://ex/#alice");
        let items_pred = codec.encode("http://ex/#items");
        let flakes = vec![
            Flake::new(subject, items_pred, Object::Value(serde_json::json!("b")), vocab.xsd_string, -1, true)
                .with_meta(crate::flake::Meta::with_index(1)),
            Flake::new(subject, items_pred, Object::Value(serde_json::json!("a")), vocab.xsd_string, -1, true)
                .with_meta(crate::flake::Meta::with_index(0)),
        ];
        let nodes = flakes_to_nodes(&flakes, &codec, &vocab);
        let list = nodes[0]["http://ex/#items"]["@list"].as_array().unwrap();
        assert_eq!(list[0], "a");
        assert_eq!(list[1], "b");

        let round_tripped = nodes_to_flakes(&nodes, -1, true, &codec, &vocab).unwrap();
        let mut indices: Vec<i64> = round_tripped
            .iter()
            .filter(|f| f.p == items_pred)
            .map(|f| f.m.as_ref().unwrap().i.unwrap())
            .collect();
        indices.sort();
        assert_eq!(indices, vec![0, 1]);
    }
}
