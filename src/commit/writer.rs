//! Commit chain write pipeline (spec §4.4 "Write").

use chrono::Utc;

use super::codec::{
    compute_commit_id, compute_data_id, CommitMap, DataRef, DbPayload, IdRef, PreviousRef,
    COMMIT_SCHEME, DB_SCHEME,
};
use super::credential::CredentialSigner;
use crate::error::Result;
use crate::storage::{BlobStore, NamingService, WriteOptions};

/// Everything the writer needs to produce and publish the next commit in a
/// ledger's chain (spec §4.4 "Write" steps 1–8).
pub struct CommitInput<'a> {
    pub alias: String,
    pub branch: String,
    /// The `@context` IRI stamped on the commit map and DB payload (spec
    /// §6.3, §6.4), taken from the ledger's [`crate::config::LedgerConfig`].
    pub context_version: String,
    pub previous: Option<CommitMap>,
    /// `@assert`/`@retract` node arrays already rendered to JSON (spec §6.4),
    /// e.g. via [`super::codec::flakes_to_nodes`].
    pub assert: Vec<serde_json::Value>,
    pub retract: Vec<serde_json::Value>,
    pub flakes: u64,
    pub size: u64,
    /// Namespace prefixes newly introduced since the previous commit
    /// (spec §4.1 `drain_new_namespaces`).
    pub new_namespaces: Vec<String>,
    pub message: Option<String>,
    pub tag: Vec<String>,
    pub annotation: Option<String>,
    pub txn: Option<String>,
    pub author: Option<String>,
    pub issuer: Option<String>,
    pub blob_store: &'a dyn BlobStore,
    pub naming_service: &'a dyn NamingService,
    /// Present only when the commit is to be wrapped as a verifiable credential
    /// (spec §4.4 step 6).
    pub signer: Option<&'a dyn CredentialSigner>,
}

/// Write the data payload and commit map, publish the new head, and return the
/// published `CommitMap` (spec §4.4 "Write").
pub async fn commit(input: CommitInput<'_>) -> Result<CommitMap> {
    let t = input
        .previous
        .as_ref()
        .map(|p| p.data.t + 1)
        .unwrap_or(1);
    tracing::debug!(alias = %input.alias, t, flakes = input.flakes, "staging commit");

    let mut payload = DbPayload {
        context: input.context_version.clone(),
        id: String::new(),
        type_: vec!["DB".to_string()],
        t,
        v: 0,
        previous: input.previous.as_ref().map(|p| p.data.id.clone()),
        assert: input.assert,
        retract: input.retract,
        namespaces: input.new_namespaces.clone(),
        flakes: input.flakes,
        size: input.size,
    };
    payload.id = compute_data_id(&payload)?;

    let data_bytes = serde_json::to_vec(&payload)?;
    let data_write = input
        .blob_store
        .write(DB_SCHEME, &data_bytes, WriteOptions { content_address: true })
        .await?;

    let data_ref = DataRef {
        id: payload.id.clone(),
        type_: vec!["DB".to_string()],
        t,
        address: data_write.address,
        previous: input
            .previous
            .as_ref()
            .map(|p| IdRef::new(p.data.id.clone())),
        flakes: payload.flakes,
        size: payload.size,
    };

    let mut commit_map = CommitMap {
        context: input.context_version,
        id: String::new(),
        v: 0,
        address: String::new(),
        type_: vec!["Commit".to_string()],
        alias: input.alias.clone(),
        branch: input.branch,
        time: Utc::now(),
        tag: input.tag,
        message: input.message,
        author: input.author,
        txn: input.txn,
        annotation: input.annotation,
        issuer: input.issuer.map(IdRef::new),
        previous: input
            .previous
            .as_ref()
            .map(|p| PreviousRef::commit(p.id.clone(), p.address.clone())),
        data: data_ref,
        ns: input.new_namespaces.into_iter().map(IdRef::new).collect(),
        index: None,
    };
    commit_map.id = compute_commit_id(&commit_map)?;

    let commit_bytes = serde_json::to_vec(&commit_map)?;
    let publish_bytes = match input.signer {
        Some(signer) => {
            let payload_json = String::from_utf8(commit_bytes)
                .map_err(|e| crate::error::DbError::invalid_commit(format!("non-UTF8 commit JSON: {e}")))?;
            signer.sign(&payload_json)?.into_bytes()
        }
        None => commit_bytes,
    };

    let commit_write = input
        .blob_store
        .write(COMMIT_SCHEME, &publish_bytes, WriteOptions { content_address: true })
        .await?;
    commit_map.address = commit_write.address;

    input
        .naming_service
        .publish(&input.alias, &commit_map.address)
        .await?;

    tracing::info!(alias = %input.alias, t, commit_id = %commit_map.id, "commit published");
    Ok(commit_map)
}
