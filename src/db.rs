//! The top-level ledger handle, tying staging, SHACL validation, policy
//! enforcement, schema refresh and the commit chain together (spec §2
//! "System overview", write-path and read-path data flow).

use std::collections::HashSet;

use crate::commit::codec::{flakes_to_nodes, CommitMap};
use crate::commit::credential::{CredentialSigner, CredentialVerifier};
use crate::commit::loader::reify;
use crate::commit::writer::{commit, CommitInput};
use crate::config::{LedgerConfig, TransactorOptions};
use crate::error::Result;
use crate::flake::Flake;
use crate::novelty::Novelty;
use crate::policy::{self, CompiledPolicies, RequestContext};
use crate::schema::{self, Schema};
use crate::shacl::{self, ShapeCache};
use crate::sid::IriCodec;
use crate::storage::{BlobStore, NamingService};
use crate::transact::{stage, Context, StageRequest};
use crate::vocab::Vocab;

/// Commit-level metadata a caller may attach to a transaction (spec §6.3:
/// `message`, `author`, `tag`, `annotation`, `txn`, `issuer`).
#[derive(Debug, Clone, Default)]
pub struct TransactMeta {
    pub message: Option<String>,
    pub tag: Vec<String>,
    pub annotation: Option<String>,
    pub txn: Option<String>,
    pub author: Option<String>,
    pub issuer: Option<String>,
}

/// An uncommitted transaction result (spec §3.5 "Staged DB": "created by
/// `stage`; mutable-by-replacement via further stages; becomes a commit upon
/// `commit!`; may be discarded").
///
/// Dropping a `StagedDb` discards everything it holds — the overlaid
/// novelty, the shape-cache entries built while validating it, and any SID
/// allocator state — with no further cleanup required, since nothing is
/// written to storage until [`Db::commit_staged`] succeeds (spec §5
/// "Cancellation & timeouts").
#[derive(Debug, Clone)]
pub struct StagedDb {
    pub novelty: Novelty,
    pub schema: Schema,
    /// Every flake staged since the ledger's last commit, net of any
    /// re-staging cancellations (spec §4.3 "Staged DB construction").
    pub new_flakes: Vec<Flake>,
    /// The most negative `t` already committed to the ledger this `StagedDb`
    /// was staged from; flakes with a more negative `t` than this were staged
    /// (not yet committed) and are eligible for cancellation on re-stage.
    committed_boundary: i64,
    /// The ledger's default `@context` prefix table, carried forward so that
    /// further re-staging expands compact IRIs consistently (spec §4.3 step 1).
    default_context: Context,
}

impl StagedDb {
    fn next_t(&self) -> i64 {
        self.novelty.t() - 1
    }

    /// Stage another transaction on top of this uncommitted one (spec §3.5
    /// "mutable-by-replacement via further stages").
    ///
    /// If the new transaction retracts a value that this same (uncommitted)
    /// staging chain itself asserted, the prior assertion is removed outright
    /// rather than flipped — novelty never carries a staged assert/retract
    /// pair for a fact nothing durable ever observed (spec §4.3 "Staged DB
    /// construction": "retractions that cancel previously staged assertions
    /// are removed (not flipped) to keep novelty minimal"). A retraction of a
    /// value from already-committed history is always flipped normally:
    /// committed facts are immutable and must stay represented by an explicit
    /// retraction flake.
    pub fn stage(
        &self,
        request: StageRequest,
        codec: &IriCodec,
        vocab: &Vocab,
        opts: &TransactorOptions,
    ) -> Result<StagedDb> {
        let t = self.next_t();
        let expanded = self.default_context.expand_request(request);
        let produced = stage(expanded, t, codec, vocab, &self.novelty, opts)?;

        let mut novelty = self.novelty.clone();
        let mut new_flakes = self.new_flakes.clone();
        let mut retained_this_round = Vec::new();
        for flake in produced {
            if !flake.op {
                let o_bytes = flake.o.canonical_bytes();
                if let Some(prior) = novelty.find_current_assertion(flake.s, flake.p, &o_bytes) {
                    if prior.t < self.committed_boundary {
                        novelty.remove_matching(&prior);
                        new_flakes.retain(|f| f.fact_key() != prior.fact_key());
                        continue;
                    }
                }
            }
            novelty.insert(flake.clone());
            new_flakes.push(flake.clone());
            retained_this_round.push(flake);
        }

        let schema = schema::hydrate(&self.schema, &retained_this_round, codec, vocab);
        Ok(StagedDb {
            novelty,
            schema,
            new_flakes,
            committed_boundary: self.committed_boundary,
            default_context: self.default_context.clone(),
        })
    }
}

/// An open ledger: the shared IRI codec, the in-memory novelty overlay, the
/// current schema snapshot, the process-wide SHACL shape cache, and the
/// published commit chain's head (spec §2, §3.4, §4.5).
pub struct Db {
    pub config: LedgerConfig,
    pub codec: IriCodec,
    pub vocab: Vocab,
    pub novelty: Novelty,
    pub schema: Schema,
    pub shape_cache: ShapeCache,
    pub head: Option<CommitMap>,
}

impl Db {
    /// Start a brand-new, empty ledger (spec §8 "empty-ledger genesis").
    pub fn new(config: LedgerConfig) -> Self {
        let codec = IriCodec::new();
        let vocab = Vocab::new(&codec);
        Self {
            config,
            codec,
            vocab,
            novelty: Novelty::new(),
            schema: Schema::new(),
            shape_cache: ShapeCache::new(),
            head: None,
        }
    }

    /// Open an existing ledger by fetching and replaying its full commit
    /// chain (spec §4.4 "Read").
    pub async fn load(
        config: LedgerConfig,
        blob_store: &dyn BlobStore,
        naming_service: &dyn NamingService,
        verifier: Option<&dyn CredentialVerifier>,
    ) -> Result<Self> {
        let codec = IriCodec::new();
        let vocab = Vocab::new(&codec);
        let reified = reify(&config.alias, blob_store, naming_service, &codec, &vocab, verifier).await?;
        Ok(Self {
            config,
            codec,
            vocab,
            novelty: reified.novelty,
            schema: reified.schema,
            shape_cache: ShapeCache::new(),
            head: Some(reified.head),
        })
    }

    /// The `t` the next staged transaction should use: one more negative than
    /// whatever novelty currently holds (spec §3.1: `t` is an inverse, strictly
    /// decreasing epoch counter while staged).
    fn next_stage_t(&self) -> i64 {
        if self.novelty.t() == 0 {
            -1
        } else {
            self.novelty.t() - 1
        }
    }

    /// Stage a transaction against the ledger's current (fully committed) state,
    /// without validating or publishing it (spec §3.5 "Staged DB" lifecycle:
    /// "created by `stage`; mutable-by-replacement via further stages").
    ///
    /// Multiple [`StagedDb`] values may be produced concurrently from the same
    /// `Db` snapshot (spec §5 "Multiple concurrent `stage` calls against the
    /// same branch are permitted"); only one may ultimately be committed via
    /// [`Db::commit_staged`].
    pub fn stage(&self, request: StageRequest, opts: &TransactorOptions) -> Result<StagedDb> {
        let t = self.next_stage_t();
        let expanded = self.config.default_context.expand_request(request);
        let new_flakes = stage(expanded, t, &self.codec, &self.vocab, &self.novelty, opts)?;
        let mut novelty = self.novelty.clone();
        for flake in &new_flakes {
            novelty.insert(flake.clone());
        }
        let schema = schema::hydrate(&self.schema, &new_flakes, &self.codec, &self.vocab);
        Ok(StagedDb {
            novelty,
            schema,
            new_flakes,
            committed_boundary: self.novelty.t(),
            default_context: self.config.default_context.clone(),
        })
    }

    /// Validate `staged` against SHACL shapes and the compiled policy table,
    /// and — only if both pass — publish it as the next commit (spec §2 write
    /// path, §4.5, §4.6, §4.4 "Write").
    ///
    /// On `shacl-violation` or `invalid-policy`, nothing is merged into
    /// novelty or the schema and nothing is published: the ledger is left
    /// exactly as it was before the call (spec §7 "local to staging").
    pub async fn commit_staged(
        &mut self,
        staged: StagedDb,
        opts: &TransactorOptions,
        ctx: &RequestContext,
        meta: TransactMeta,
        blob_store: &dyn BlobStore,
        naming_service: &dyn NamingService,
        signer: Option<&dyn CredentialSigner>,
    ) -> Result<CommitMap> {
        let StagedDb { novelty: staged_novelty, schema: staged_schema, new_flakes, .. } = staged;
        let modified: HashSet<crate::sid::Sid> = new_flakes.iter().map(|f| f.s).collect();

        // A transaction that edits the SHACL subgraph itself (new/changed shape
        // constraints) must not validate against stale cached shape defs (spec §3.5).
        if shacl::touches_shacl_subgraph(&new_flakes) {
            self.shape_cache.invalidate();
        }

        shacl::validate(
            &staged_novelty,
            &staged_schema,
            &self.codec,
            &self.vocab,
            &self.shape_cache,
            &modified,
            opts.max_shape_depth,
        )?;

        let policies = policy::compile(&staged_novelty, &self.codec, &self.vocab);
        policy::check_write(&policies, ctx, &staged_novelty, &staged_schema, &self.vocab, &new_flakes)?;

        let assert_flakes: Vec<Flake> = new_flakes.iter().filter(|f| f.op).cloned().collect();
        let retract_flakes: Vec<Flake> = new_flakes.iter().filter(|f| !f.op).cloned().collect();
        let assert_nodes = flakes_to_nodes(&assert_flakes, &self.codec, &self.vocab);
        let retract_nodes = flakes_to_nodes(&retract_flakes, &self.codec, &self.vocab);
        let new_namespaces: Vec<String> = self
            .codec
            .drain_new_namespaces()
            .into_iter()
            .map(|(_, prefix)| prefix)
            .collect();

        let committed = commit(CommitInput {
            alias: self.config.alias.clone(),
            branch: self.config.branch.clone(),
            context_version: self.config.context_version.clone(),
            previous: self.head.clone(),
            assert: assert_nodes,
            retract: retract_nodes,
            flakes: new_flakes.len() as u64,
            size: new_flakes.iter().map(|f| f.size() as u64).sum(),
            new_namespaces,
            message: meta.message,
            tag: meta.tag,
            annotation: meta.annotation,
            txn: meta.txn,
            author: meta.author,
            issuer: meta.issuer,
            blob_store,
            naming_service,
            signer,
        })
        .await?;

        self.novelty = staged_novelty;
        self.schema = staged_schema;
        self.head = Some(committed.clone());
        Ok(committed)
    }

    /// Stage and immediately commit a transaction in one call (spec §2 write
    /// path, end to end). Most callers that don't need to inspect or re-stage
    /// an intermediate [`StagedDb`] use this directly.
    pub async fn transact(
        &mut self,
        request: StageRequest,
        opts: &TransactorOptions,
        ctx: &RequestContext,
        meta: TransactMeta,
        blob_store: &dyn BlobStore,
        naming_service: &dyn NamingService,
        signer: Option<&dyn CredentialSigner>,
    ) -> Result<CommitMap> {
        let staged = self.stage(request, opts)?;
        self.commit_staged(staged, opts, ctx, meta, blob_store, naming_service, signer).await
    }

    /// Every currently-asserted flake for `subject`, filtered through the
    /// compiled view-policy for `ctx` (spec §4.6 "Read path").
    pub fn read_subject(&self, subject: crate::sid::Sid, ctx: &RequestContext) -> Vec<Flake> {
        let policies = self.compile_policies();
        let flakes: Vec<Flake> = self
            .novelty
            .subject_flakes(subject)
            .into_iter()
            .filter(|f| f.op)
            .collect();
        policy::filter_read(&policies, ctx, &self.novelty, &self.schema, &self.vocab, flakes)
    }

    /// Compile the policy table currently in force (spec §4.6 "Compilation").
    pub fn compile_policies(&self) -> CompiledPolicies {
        policy::compile(&self.novelty, &self.codec, &self.vocab)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{MemoryBlobStore, MemoryNamingService};

    fn insert(node: serde_json::Value) -> StageRequest {
        StageRequest::Insert(vec![node])
    }

    #[tokio::test]
    async fn genesis_transaction_commits_at_t_one() {
        let blobs = MemoryBlobStore::new();
        let naming = MemoryNamingService::new();
        let mut db = Db::new(LedgerConfig::new("my-ledger"));

        let committed = db
            .transact(
                insert(serde_json::json!({"@id": "http://ex/#alice", "http://ex/#name": "Alice"})),
                &TransactorOptions::default(),
                &RequestContext::root(),
                TransactMeta::default(),
                &blobs,
                &naming,
                None,
            )
            .await
            .unwrap();

        assert_eq!(committed.data.t, 1);
        let alice = db.codec.encode("http://ex/#alice");
        assert!(!db.novelty.subject_flakes(alice).is_empty());
    }

    #[tokio::test]
    async fn second_transaction_advances_t_and_retracts_prior_value() {
        let blobs = MemoryBlobStore::new();
        let naming = MemoryNamingService::new();
        let mut db = Db::new(LedgerConfig::new("my-ledger"));

        db.transact(
            insert(serde_json::json!({"@id": "http://ex/#alice", "http://ex/#name": "Alice"})),
            &TransactorOptions::default(),
            &RequestContext::root(),
            TransactMeta::default(),
            &blobs,
            &naming,
            None,
        )
        .await
        .unwrap();

        let second = db
            .transact(
                insert(serde_json::json!({"@id": "http://ex/#alice", "http://ex/#name": "Alicia"})),
                &TransactorOptions::default(),
                &RequestContext::root(),
                TransactMeta::default(),
                &blobs,
                &naming,
                None,
            )
            .await
            .unwrap();

        assert_eq!(second.data.t, 2);
        let alice = db.codec.encode("http://ex/#alice");
        let name_pred = db.codec.encode("http://ex/#name");
        let current = db.novelty.current_values(alice, name_pred);
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].o, crate::flake::Object::Value(serde_json::json!("Alicia")));
    }

    #[tokio::test]
    async fn shacl_violation_leaves_ledger_unchanged() {
        let blobs = MemoryBlobStore::new();
        let naming = MemoryNamingService::new();
        let mut db = Db::new(LedgerConfig::new("my-ledger"));

        db.transact(
            insert(serde_json::json!({
                "@id": "http://ex/#UserShape",
                "@type": "http://www.w3.org/ns/shacl#NodeShape",
                "http://www.w3.org/ns/shacl#targetClass": {"@id": "http://ex/#User"},
                "http://www.w3.org/ns/shacl#property": {
                    "@id": "http://ex/#UserShape-email",
                    "http://www.w3.org/ns/shacl#path": {"@id": "http://ex/#email"},
                    "http://www.w3.org/ns/shacl#minCount": 1,
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

        let before = db.novelty.len();
        let err = db
            .transact(
                insert(serde_json::json!({"@id": "http://ex/#bob", "@type": "http://ex/#User"})),
                &TransactorOptions::default(),
                &RequestContext::root(),
                TransactMeta::default(),
                &blobs,
                &naming,
                None,
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind, crate::error::ErrorKind::ShaclViolation);
        assert!(err.report.is_some());
        assert_eq!(db.novelty.len(), before);
    }

    #[tokio::test]
    async fn restaging_cancels_a_staged_assertion_instead_of_flipping_it() {
        let mut db = Db::new(LedgerConfig::new("my-ledger"));
        let opts = TransactorOptions::default();

        let first_stage = db
            .stage(insert(serde_json::json!({"@id": "http://ex/#alice", "http://ex/#name": "Alice"})), &opts)
            .unwrap();
        let before_cancel = first_stage.new_flakes.len();

        let second_stage = first_stage
            .stage(
                insert(serde_json::json!({"@id": "http://ex/#alice", "http://ex/#name": "Alicia"})),
                &db.codec,
                &db.vocab,
                &opts,
            )
            .unwrap();

        // The first-staged "Alice" assertion is cancelled outright (no
        // retraction flake for it survives), not flipped.
        let name_pred = db.codec.encode("http://ex/#name");
        assert!(!second_stage
            .new_flakes
            .iter()
            .any(|f| f.p == name_pred && !f.op));
        assert!(second_stage.new_flakes.iter().any(|f| f.p == name_pred
            && f.op
            && f.o == crate::flake::Object::Value(serde_json::json!("Alicia"))));
        assert!(second_stage.new_flakes.len() < before_cancel + 2);

        let alice = db.codec.encode("http://ex/#alice");
        let current = second_stage.novelty.current_values(alice, name_pred);
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].o, crate::flake::Object::Value(serde_json::json!("Alicia")));
    }

    #[tokio::test]
    async fn restaging_flips_a_retraction_against_committed_history() {
        let blobs = MemoryBlobStore::new();
        let naming = MemoryNamingService::new();
        let mut db = Db::new(LedgerConfig::new("my-ledger"));
        let opts = TransactorOptions::default();

        db.transact(
            insert(serde_json::json!({"@id": "http://ex/#alice", "http://ex/#name": "Alice"})),
            &opts,
            &RequestContext::root(),
            TransactMeta::default(),
            &blobs,
            &naming,
            None,
        )
        .await
        .unwrap();

        // Re-staged against already-committed history: the prior value must be
        // retracted explicitly, never silently dropped.
        let staged = db
            .stage(insert(serde_json::json!({"@id": "http://ex/#alice", "http://ex/#name": "Alicia"})), &opts)
            .unwrap();
        let name_pred = db.codec.encode("http://ex/#name");
        assert!(staged.new_flakes.iter().any(|f| f.p == name_pred
            && !f.op
            && f.o == crate::flake::Object::Value(serde_json::json!("Alice"))));
    }

    #[tokio::test]
    async fn staged_db_can_be_discarded_without_committing() {
        let blobs = MemoryBlobStore::new();
        let naming = MemoryNamingService::new();
        let mut db = Db::new(LedgerConfig::new("my-ledger"));
        let opts = TransactorOptions::default();

        db.transact(
            insert(serde_json::json!({"@id": "http://ex/#alice", "http://ex/#name": "Alice"})),
            &opts,
            &RequestContext::root(),
            TransactMeta::default(),
            &blobs,
            &naming,
            None,
        )
        .await
        .unwrap();

        let before = db.novelty.len();
        {
            let staged = db
                .stage(insert(serde_json::json!({"@id": "http://ex/#alice", "http://ex/#name": "Discarded"})), &opts)
                .unwrap();
            assert!(!staged.new_flakes.is_empty());
        } // dropped without ever calling commit_staged

        assert_eq!(db.novelty.len(), before);
    }

    #[tokio::test]
    async fn reloaded_ledger_reifies_to_the_same_current_values() {
        let blobs = MemoryBlobStore::new();
        let naming = MemoryNamingService::new();
        let mut db = Db::new(LedgerConfig::new("my-ledger"));

        db.transact(
            insert(serde_json::json!({"@id": "http://ex/#alice", "http://ex/#name": "Alice"})),
            &TransactorOptions::default(),
            &RequestContext::root(),
            TransactMeta::default(),
            &blobs,
            &naming,
            None,
        )
        .await
        .unwrap();

        let reloaded = Db::load(LedgerConfig::new("my-ledger"), &blobs, &naming, None)
            .await
            .unwrap();
        let alice = reloaded.codec.encode("http://ex/#alice");
        let name_pred = reloaded.codec.encode("http://ex/#name");
        assert_eq!(reloaded.novelty.current_values(alice, name_pred).len(), 1);
    }
}
