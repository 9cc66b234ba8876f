//! Cross-module pipeline tests: stage -> SHACL -> policy -> commit -> reify,
//! exercising the concrete scenarios of spec §8 end to end rather than one
//! module at a time.

use flakedb_core::config::{LedgerConfig, TransactorOptions};
use flakedb_core::db::{Db, TransactMeta};
use flakedb_core::policy::RequestContext;
use flakedb_core::storage::memory::{MemoryBlobStore, MemoryNamingService};
use flakedb_core::transact::StageRequest;

fn insert(node: serde_json::Value) -> StageRequest {
    StageRequest::Insert(vec![node])
}

#[tokio::test]
async fn five_commit_chain_reifies_to_the_same_current_state() {
    let blobs = MemoryBlobStore::new();
    let naming = MemoryNamingService::new();
    let mut db = Db::new(LedgerConfig::new("chain-ledger"));

    for i in 0..5u32 {
        db.transact(
            insert(serde_json::json!({
                "@id": "http://ex/#alice",
                "http://ex/#name": format!("Alice-v{i}"),
            })),
            &TransactorOptions::default(),
            &RequestContext::root(),
            TransactMeta::default(),
            &blobs,
            &naming,
            None,
        )
        .await
        .unwrap();
    }

    let reloaded = Db::load(LedgerConfig::new("chain-ledger"), &blobs, &naming, None)
        .await
        .unwrap();

    assert_eq!(reloaded.head.as_ref().unwrap().data.t, 5);
    assert_eq!(reloaded.novelty.t(), -5);

    let alice = reloaded.codec.encode("http://ex/#alice");
    let name_pred = reloaded.codec.encode("http://ex/#name");
    let current = reloaded.novelty.current_values(alice, name_pred);
    assert_eq!(current.len(), 1, "only the final value should remain in force");
    assert_eq!(
        current[0].o,
        flakedb_core::flake::Object::Value(serde_json::json!("Alice-v4"))
    );

    // Every assertion ever made for this predicate, minus superseded ones,
    // is a retraction somewhere in the replayed history (spec §8 scenario 3).
    let retractions = reloaded
        .novelty
        .subject_flakes(alice)
        .into_iter()
        .filter(|f| !f.op && f.p == name_pred)
        .count();
    assert_eq!(retractions, 4, "each of the four superseded values must be retracted");
}

#[tokio::test]
async fn compact_iri_document_expands_against_the_ledgers_default_context() {
    let blobs = MemoryBlobStore::new();
    let naming = MemoryNamingService::new();
    let mut db = Db::new(LedgerConfig::new("curie-ledger").with_prefix("ex", "http://ex/#"));

    db.transact(
        insert(serde_json::json!({
            "@context": {"ex": "http://ex/#"},
            "@id": "ex:a",
            "ex:name": "A",
        })),
        &TransactorOptions::default(),
        &RequestContext::root(),
        TransactMeta::default(),
        &blobs,
        &naming,
        None,
    )
    .await
    .unwrap();

    let a = db.codec.encode("http://ex/#a");
    let name_pred = db.codec.encode("http://ex/#name");
    let current = db.novelty.current_values(a, name_pred);
    assert_eq!(current.len(), 1, "the compact IRI document must resolve to the expanded namespace");
    assert_eq!(current[0].o, flakedb_core::flake::Object::Value(serde_json::json!("A")));
}

#[tokio::test]
async fn closed_shape_rejects_disallowed_property_and_leaves_chain_intact() {
    let blobs = MemoryBlobStore::new();
    let naming = MemoryNamingService::new();
    let mut db = Db::new(LedgerConfig::new("closed-ledger"));

    db.transact(
        insert(serde_json::json!({
            "@id": "http://ex/#UserShape",
            "@type": "http://www.w3.org/ns/shacl#NodeShape",
            "http://www.w3.org/ns/shacl#targetClass": {"@id": "http://ex/#User"},
            "http://www.w3.org/ns/shacl#closed": true,
            "http://www.w3.org/ns/shacl#property": {
                "@id": "http://ex/#UserShape-name",
                "http://www.w3.org/ns/shacl#path": {"@id": "http://ex/#name"},
            },
        })),
        &TransactorOptions::default(),
        &RequestContext::root(),
        TransactMeta::default(),
        &blobs,
        &naming,
        None,
    )
    .await
    .unwrap();

    let t_before = db.head.as_ref().unwrap().data.t;

    let err = db
        .transact(
            insert(serde_json::json!({
                "@id": "http://ex/#bob",
                "@type": "http://ex/#User",
                "http://ex/#age": 30,
            })),
            &TransactorOptions::default(),
            &RequestContext::root(),
            TransactMeta::default(),
            &blobs,
            &naming,
            None,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, flakedb_core::error::ErrorKind::ShaclViolation);
    let report = err.report.expect("closed-shape violation carries a report");
    assert!(report
        .results
        .iter()
        .any(|r| r.constraint == "sh:closed"));
    assert_eq!(
        db.head.as_ref().unwrap().data.t,
        t_before,
        "a rejected transaction must not advance the chain"
    );
}

#[tokio::test]
async fn reader_role_cannot_view_or_write_outside_its_scoped_property() {
    let blobs = MemoryBlobStore::new();
    let naming = MemoryNamingService::new();
    let mut db = Db::new(LedgerConfig::new("policy-ledger"));

    db.transact(
        insert(serde_json::json!({"@id": "http://ex/#alice", "http://ex/#name": "Alice", "http://ex/#age": 30, "@type": "http://ex/#User"})),
        &TransactorOptions::default(),
        &RequestContext::root(),
        TransactMeta::default(),
        &blobs,
        &naming,
        None,
    )
    .await
    .unwrap();

    db.transact(
        insert(serde_json::json!({
            "@id": "http://ex/#reader-policy",
            "@type": "https://ns.flur.ee/policy#Policy",
            "https://ns.flur.ee/policy#targetClass": {"@id": "http://ex/#User"},
            "https://ns.flur.ee/policy#allow": {
                "@id": "http://ex/#reader-policy-allow",
                "https://ns.flur.ee/policy#targetRole": {"@id": "http://ex/#reader"},
                "https://ns.flur.ee/policy#property": {"@id": "http://ex/#name"},
                "https://ns.flur.ee/policy#action": {"@id": "https://ns.flur.ee/policy#view"},
            },
        })),
        &TransactorOptions::default(),
        &RequestContext::root(),
        TransactMeta::default(),
        &blobs,
        &naming,
        None,
    )
    .await
    .unwrap();

    let reader_ctx = RequestContext::new()
        .with_identity(db.codec.encode("http://ex/#reader-user"))
        .with_role(db.codec.encode("http://ex/#reader"));

    let alice = db.codec.encode("http://ex/#alice");
    let visible = db.read_subject(alice, &reader_ctx);
    let name_pred = db.codec.encode("http://ex/#name");
    let age_pred = db.codec.encode("http://ex/#age");

    assert!(visible.iter().any(|f| f.p == name_pred), "name is allowed");
    assert!(!visible.iter().any(|f| f.p == age_pred), "age must be dropped for reader role");

    let write_err = db
        .transact(
            insert(serde_json::json!({"@id": "http://ex/#alice", "http://ex/#age": 31, "@type": "http://ex/#User"})),
            &TransactorOptions::default(),
            &reader_ctx,
            TransactMeta::default(),
            &blobs,
            &naming,
            None,
        )
        .await
        .unwrap_err();

    assert_eq!(write_err.kind, flakedb_core::error::ErrorKind::InvalidPolicy);
}
