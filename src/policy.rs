//! Attribute-based, predicate-level access control (spec §4.6).
//!
//! A policy is an ordinary subject of type `f:Policy` stored in the graph
//! like any other data. [`compile`] reads every such subject out of novelty
//! once per request and produces a [`CompiledPolicies`] table keyed by
//! action and target (class or node); [`filter_read`]/[`check_write`] then
//! evaluate that table against a specific requester.

use std::collections::{HashMap, HashSet};

use crate::flake::Flake;
use crate::novelty::Novelty;
use crate::schema::Schema;
use crate::sid::{IriCodec, Sid};
use crate::vocab::{self, Vocab};

/// Which operations an allow rule grants (spec §4.6 "`f:action` vector").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    View,
    Modify,
}

/// The optional condition narrowing an allow rule to a specific requester
/// (spec §4.6: "`f:equals` ... `f:contains` ... or no condition").
#[derive(Debug, Clone, Copy)]
enum Condition {
    /// Unconditional for any identity holding the role.
    None,
    /// The path from the focus node must resolve to exactly the identity.
    Equals(Sid),
    /// The path from the focus node must resolve to a set containing the identity.
    Contains(Sid),
}

#[derive(Debug, Clone, Copy)]
struct AllowRule {
    role: Sid,
    condition: Condition,
}

fn rule_permits(rule: &AllowRule, ctx: &RequestContext, novelty: &Novelty, focus: Sid) -> bool {
    if !ctx.roles.contains(&rule.role) {
        return false;
    }
    match rule.condition {
        Condition::None => true,
        Condition::Equals(path) => {
            let Some(identity) = ctx.identity else { return false };
            let values = novelty.current_values(focus, path);
            values.len() == 1 && values[0].o.as_ref_sid() == Some(identity)
        }
        Condition::Contains(path) => {
            let Some(identity) = ctx.identity else { return false };
            novelty
                .current_values(focus, path)
                .iter()
                .any(|f| f.o.as_ref_sid() == Some(identity))
        }
    }
}

/// Allow rules compiled for one policy target, split into unscoped rules and
/// rules scoped to a specific predicate (spec §4.6 "{default, property-SID}").
#[derive(Debug, Clone, Default)]
struct CompiledTarget {
    default: Vec<AllowRule>,
    property: HashMap<Sid, Vec<AllowRule>>,
}

impl CompiledTarget {
    fn permits(&self, predicate: Sid, ctx: &RequestContext, novelty: &Novelty, focus: Sid) -> bool {
        if let Some(rules) = self.property.get(&predicate) {
            if rules.iter().any(|r| rule_permits(r, ctx, novelty, focus)) {
                return true;
            }
        }
        self.default.iter().any(|r| rule_permits(r, ctx, novelty, focus))
    }
}

/// A target is either every instance of a class (possibly transitively, via
/// `Schema::subclasses`) or one specific node (spec §4.6 "`f:targetClass` or
/// `f:targetNode`").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TargetKey {
    Class(Sid),
    Node(Sid),
}

/// The compiled policy table: action -> target -> compiled rules (spec §4.6
/// "Compilation"). Built once per request and reused across every flake it
/// touches.
#[derive(Debug, Clone, Default)]
pub struct CompiledPolicies {
    view: HashMap<TargetKey, CompiledTarget>,
    modify: HashMap<TargetKey, CompiledTarget>,
}

impl CompiledPolicies {
    fn table(&self, action: Action) -> &HashMap<TargetKey, CompiledTarget> {
        match action {
            Action::View => &self.view,
            Action::Modify => &self.modify,
        }
    }

    fn table_mut(&mut self, action: Action) -> &mut HashMap<TargetKey, CompiledTarget> {
        match action {
            Action::View => &mut self.view,
            Action::Modify => &mut self.modify,
        }
    }

    /// `true` once at least one policy targets this class or node, for
    /// *either* action (spec §4.6: absent any matching target, the subject
    /// is unrestricted; once a policy governs a class/node at all, any
    /// action it doesn't explicitly grant is denied rather than silently
    /// skipped — a `view`-only policy still makes `modify` default-deny for
    /// the classes it targets, per spec §8 scenario 6).
    fn has_target(&self, _action: Action, classes: &[Sid], node: Sid) -> bool {
        let targeted = |table: &HashMap<TargetKey, CompiledTarget>| {
            table.contains_key(&TargetKey::Node(node))
                || classes.iter().any(|c| table.contains_key(&TargetKey::Class(*c)))
        };
        targeted(&self.view) || targeted(&self.modify)
    }

    /// Whether `predicate` on `focus` (whose classes are `classes`) is permitted
    /// for `action` under `ctx` (spec §4.6 "Enforcement").
    fn permits(
        &self,
        action: Action,
        classes: &[Sid],
        focus: Sid,
        predicate: Sid,
        ctx: &RequestContext,
        novelty: &Novelty,
    ) -> bool {
        let table = self.table(action);
        if let Some(target) = table.get(&TargetKey::Node(focus)) {
            if target.permits(predicate, ctx, novelty, focus) {
                return true;
            }
        }
        classes.iter().any(|class| {
            table
                .get(&TargetKey::Class(*class))
                .map(|t| t.permits(predicate, ctx, novelty, focus))
                .unwrap_or(false)
        })
    }
}

struct PolicyVocab {
    policy: Sid,
    target_class: Sid,
    target_node: Sid,
    allow: Sid,
    target_role: Sid,
    equals: Sid,
    contains: Sid,
    property: Sid,
    action: Sid,
    view: Sid,
    modify: Sid,
    root: Sid,
}

impl PolicyVocab {
    fn new(codec: &IriCodec) -> Self {
        Self {
            policy: codec.encode(vocab::F_POLICY),
            target_class: codec.encode(vocab::F_TARGET_CLASS),
            target_node: codec.encode(vocab::F_TARGET_NODE),
            allow: codec.encode(vocab::F_ALLOW),
            target_role: codec.encode(vocab::F_TARGET_ROLE),
            equals: codec.encode(vocab::F_EQUALS),
            contains: codec.encode(vocab::F_CONTAINS),
            property: codec.encode(vocab::F_PROPERTY),
            action: codec.encode(vocab::F_ACTION),
            view: codec.encode(vocab::F_VIEW),
            modify: codec.encode(vocab::F_MODIFY),
            root: codec.encode(vocab::F_ROOT),
        }
    }
}

/// Who is asking, and under which roles (spec §4.6 "For a requesting identity
/// and role set").
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub identity: Option<Sid>,
    pub roles: HashSet<Sid>,
    /// Reserved shortcut bypassing every check (spec §4.6 "A reserved shortcut
    /// `{:f/view :root?}` bypasses checks for fully privileged identities").
    pub is_root: bool,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(mut self, identity: Sid) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_role(mut self, role: Sid) -> Self {
        self.roles.insert(role);
        self
    }

    pub fn root() -> Self {
        Self { is_root: true, ..Self::default() }
    }
}

fn single_ref(novelty: &Novelty, s: Sid, p: Sid) -> Option<Sid> {
    novelty.current_values(s, p).iter().find_map(|f| f.o.as_ref_sid())
}

fn all_refs(novelty: &Novelty, s: Sid, p: Sid) -> Vec<Sid> {
    novelty.current_values(s, p).iter().filter_map(|f| f.o.as_ref_sid()).collect()
}

fn compile_allow(novelty: &Novelty, pv: &PolicyVocab, allow_sid: Sid) -> (Vec<Action>, Vec<Sid>, AllowRule) {
    let condition = if let Some(path) = single_ref(novelty, allow_sid, pv.equals) {
        Condition::Equals(path)
    } else if let Some(path) = single_ref(novelty, allow_sid, pv.contains) {
        Condition::Contains(path)
    } else {
        Condition::None
    };
    let roles = all_refs(novelty, allow_sid, pv.target_role);
    let role = roles.into_iter().next().unwrap_or(allow_sid);
    let rule = AllowRule { role, condition };

    let actions = all_refs(novelty, allow_sid, pv.action)
        .into_iter()
        .filter_map(|a| {
            if a == pv.view {
                Some(Action::View)
            } else if a == pv.modify {
                Some(Action::Modify)
            } else {
                None
            }
        })
        .collect::<Vec<_>>();
    let actions = if actions.is_empty() { vec![Action::View, Action::Modify] } else { actions };

    let properties = all_refs(novelty, allow_sid, pv.property);
    (actions, properties, rule)
}

fn policy_subjects(novelty: &Novelty, vocab: &Vocab, pv: &PolicyVocab) -> Vec<Sid> {
    novelty
        .iter_spot()
        .filter(|f| f.op && f.p == vocab.rdf_type && f.o.as_ref_sid() == Some(pv.policy))
        .map(|f| f.s)
        .collect()
}

/// Compile every `f:Policy` subject currently in novelty into a
/// [`CompiledPolicies`] table (spec §4.6 "Compilation"). Independent of any
/// particular requester; [`filter_read`]/[`check_write`] apply a
/// [`RequestContext`] against this table at enforcement time.
pub fn compile(novelty: &Novelty, codec: &IriCodec, vocab: &Vocab) -> CompiledPolicies {
    let pv = PolicyVocab::new(codec);
    let mut compiled = CompiledPolicies::default();
    tracing::debug!("compiling policy table");

    for policy_sid in policy_subjects(novelty, vocab, &pv) {
        let mut targets = Vec::new();
        targets.extend(all_refs(novelty, policy_sid, pv.target_class).into_iter().map(TargetKey::Class));
        targets.extend(all_refs(novelty, policy_sid, pv.target_node).into_iter().map(TargetKey::Node));
        if targets.is_empty() {
            continue;
        }

        for allow_sid in all_refs(novelty, policy_sid, pv.allow) {
            let (actions, properties, rule) = compile_allow(novelty, &pv, allow_sid);
            for action in actions {
                for target in &targets {
                    let entry = compiled.table_mut(action).entry(*target).or_default();
                    if properties.is_empty() {
                        entry.default.push(rule);
                    } else {
                        for prop in &properties {
                            entry.property.entry(*prop).or_default().push(rule);
                        }
                    }
                }
            }
        }
    }

    compiled
}

fn subject_classes(novelty: &Novelty, vocab: &Vocab, subject: Sid) -> Vec<Sid> {
    all_refs(novelty, subject, vocab.rdf_type)
}

/// Expand `classes` to every class the schema records as a (transitive)
/// superclass-equivalent grouping, i.e. classes whose subclass closure
/// contains one of `classes` (spec §4.6 target matching follows the same
/// class hierarchy SHACL targeting does, spec §4.5).
fn matching_policy_classes(schema: &Schema, classes: &[Sid]) -> Vec<Sid> {
    schema
        .subclasses
        .iter()
        .filter(|(_, members)| classes.iter().any(|c| members.contains(c)))
        .map(|(class, _)| *class)
        .chain(classes.iter().copied())
        .collect()
}

/// Read-path enforcement: drop every flake whose subject has no permitting
/// view-policy rule, once at least one policy targets that subject's class or
/// node (spec §4.6 "Read path"). Subjects untouched by any policy pass
/// through unfiltered.
pub fn filter_read(
    policies: &CompiledPolicies,
    ctx: &RequestContext,
    novelty: &Novelty,
    schema: &Schema,
    vocab: &Vocab,
    flakes: Vec<Flake>,
) -> Vec<Flake> {
    if ctx.is_root {
        return flakes;
    }

    let mut class_cache: HashMap<Sid, Vec<Sid>> = HashMap::new();
    flakes
        .into_iter()
        .filter(|flake| {
            let classes = class_cache
                .entry(flake.s)
                .or_insert_with(|| matching_policy_classes(schema, &subject_classes(novelty, vocab, flake.s)))
                .clone();
            if !policies.has_target(Action::View, &classes, flake.s) {
                return true;
            }
            policies.permits(Action::View, &classes, flake.s, flake.p, ctx, novelty)
        })
        .collect()
}

/// Write-path enforcement: reject the whole transaction if any new flake's
/// subject is policy-targeted and fails the compiled modify-policy (spec §4.6
/// "Write path").
pub fn check_write(
    policies: &CompiledPolicies,
    ctx: &RequestContext,
    novelty: &Novelty,
    schema: &Schema,
    vocab: &Vocab,
    new_flakes: &[Flake],
) -> crate::error::Result<()> {
    if ctx.is_root {
        return Ok(());
    }

    let mut class_cache: HashMap<Sid, Vec<Sid>> = HashMap::new();
    for flake in new_flakes {
        let classes = class_cache
            .entry(flake.s)
            .or_insert_with(|| matching_policy_classes(schema, &subject_classes(novelty, vocab, flake.s)))
            .clone();
        if !policies.has_target(Action::Modify, &classes, flake.s) {
            continue;
        }
        if !policies.permits(Action::Modify, &classes, flake.s, flake.p, ctx, novelty) {
            tracing::warn!(subject = ?flake.s, predicate = ?flake.p, "write denied by policy");
            return Err(crate::error::DbError::invalid_policy(format!(
                "write denied for predicate {} on subject {:?}",
                flake.p.name_id, flake.s
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransactorOptions;
    use crate::transact::stage_insert;

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

    /// Scenario from spec §8: a `reader` role may view `ex:User.name` only.
    #[test]
    fn reader_role_sees_scoped_property_only_and_others_are_dropped() {
        let (codec, vocab, mut novelty) = fixture();

        insert(
            &codec,
            &vocab,
            &mut novelty,
            serde_json::json!({
                "@id": "ex:alice",
                "@type": "ex:User",
                "ex:name": "Alice",
                "ex:age": 30,
            }),
            -1,
        );
        insert(
            &codec,
            &vocab,
            &mut novelty,
            serde_json::json!({
                "@id": "ex:namePolicy",
                "@type": "https://ns.flur.ee/policy#Policy",
                "https://ns.flur.ee/policy#targetClass": {"@id": "ex:User"},
                "https://ns.flur.ee/policy#allow": {
                    "@id": "ex:readerAllowName",
                    "https://ns.flur.ee/policy#targetRole": {"@id": "ex:reader"},
                    "https://ns.flur.ee/policy#property": {"@id": "ex:name"},
                    "https://ns.flur.ee/policy#action": {"@id": "https://ns.flur.ee/policy#view"},
                },
            }),
            -2,
        );

        let schema = schema_for(&codec, &vocab, &novelty);
        let compiled = compile(&novelty, &codec, &vocab);
        let reader = codec.encode("ex:reader");
        let ctx = RequestContext::new().with_role(reader);

        let alice = codec.encode("ex:alice");
        let flakes: Vec<Flake> = novelty.subject_flakes(alice);
        let visible = filter_read(&compiled, &ctx, &novelty, &schema, &vocab, flakes);

        let name_pred = codec.encode("ex:name");
        let age_pred = codec.encode("ex:age");
        assert!(visible.iter().any(|f| f.p == name_pred));
        assert!(!visible.iter().any(|f| f.p == age_pred));
    }

    /// Scenario from spec §8: a write as `reader` (no modify-allow) is rejected.
    #[test]
    fn write_is_rejected_when_no_modify_rule_matches() {
        let (codec, vocab, mut novelty) = fixture();

        insert(
            &codec,
            &vocab,
            &mut novelty,
            serde_json::json!({
                "@id": "ex:bob",
                "@type": "ex:User",
                "ex:name": "Bob",
            }),
            -1,
        );
        insert(
            &codec,
            &vocab,
            &mut novelty,
            serde_json::json!({
                "@id": "ex:viewOnlyPolicy",
                "@type": "https://ns.flur.ee/policy#Policy",
                "https://ns.flur.ee/policy#targetClass": {"@id": "ex:User"},
                "https://ns.flur.ee/policy#allow": {
                    "@id": "ex:readerAllowView",
                    "https://ns.flur.ee/policy#targetRole": {"@id": "ex:reader"},
                    "https://ns.flur.ee/policy#action": {"@id": "https://ns.flur.ee/policy#view"},
                },
            }),
            -2,
        );

        let schema = schema_for(&codec, &vocab, &novelty);
        let compiled = compile(&novelty, &codec, &vocab);
        let reader = codec.encode("ex:reader");
        let ctx = RequestContext::new().with_role(reader);

        let bob = codec.encode("ex:bob");
        let name_pred = codec.encode("ex:name");
        let new_flake = Flake::new(
            bob,
            name_pred,
            crate::flake::Object::Value(serde_json::json!("Bobby")),
            vocab.xsd_string,
            -3,
            true,
        );

        let err = check_write(&compiled, &ctx, &novelty, &schema, &vocab, &[new_flake]).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidPolicy);
    }

    /// `f:root?`-equivalent bypass: a root context sees and writes everything.
    #[test]
    fn root_context_bypasses_all_checks() {
        let (codec, vocab, mut novelty) = fixture();
        insert(
            &codec,
            &vocab,
            &mut novelty,
            serde_json::json!({"@id": "ex:carol", "@type": "ex:User", "ex:age": 41}),
            -1,
        );
        insert(
            &codec,
            &vocab,
            &mut novelty,
            serde_json::json!({
                "@id": "ex:denyAll",
                "@type": "https://ns.flur.ee/policy#Policy",
                "https://ns.flur.ee/policy#targetClass": {"@id": "ex:User"},
            }),
            -2,
        );

        let schema = schema_for(&codec, &vocab, &novelty);
        let compiled = compile(&novelty, &codec, &vocab);
        let ctx = RequestContext::root();

        let carol = codec.encode("ex:carol");
        let flakes = novelty.subject_flakes(carol);
        let visible = filter_read(&compiled, &ctx, &novelty, &schema, &vocab, flakes);
        assert_eq!(visible.len(), novelty.subject_flakes(carol).len());
    }

    #[test]
    fn subjects_with_no_applicable_policy_pass_through_unfiltered() {
        let (codec, vocab, mut novelty) = fixture();
        insert(&codec, &vocab, &mut novelty, serde_json::json!({"@id": "ex:dave", "ex:age": 22}), -1);

        let schema = schema_for(&codec, &vocab, &novelty);
        let compiled = compile(&novelty, &codec, &vocab);
        let ctx = RequestContext::new();

        let dave = codec.encode("ex:dave");
        let flakes = novelty.subject_flakes(dave);
        let expected_len = flakes.len();
        let visible = filter_read(&compiled, &ctx, &novelty, &schema, &vocab, flakes);
        assert_eq!(visible.len(), expected_len);
    }

    /// Spec §4.6: `f:equals` requires the path to resolve to a single value
    /// equal to the identity; `f:contains` only requires the identity to be
    /// among the (possibly many) values.
    #[test]
    fn equals_rejects_a_multi_valued_path_but_contains_accepts_it() {
        let (codec, vocab, mut novelty) = fixture();
        let owner_pred = codec.encode("ex:owner");
        let alice = codec.encode("ex:alice");

        insert(
            &codec,
            &vocab,
            &mut novelty,
            serde_json::json!({
                "@id": "ex:doc",
                "ex:owner": [{"@id": "ex:alice"}, {"@id": "ex:bob"}],
            }),
            -1,
        );

        let doc = codec.encode("ex:doc");
        let ctx = RequestContext::new().with_identity(alice).with_role(alice);

        let equals_rule = AllowRule { role: alice, condition: Condition::Equals(owner_pred) };
        assert!(
            !rule_permits(&equals_rule, &ctx, &novelty, doc),
            "f:equals must not match when the path resolves to more than one value"
        );

        let contains_rule = AllowRule { role: alice, condition: Condition::Contains(owner_pred) };
        assert!(
            rule_permits(&contains_rule, &ctx, &novelty, doc),
            "f:contains must match as long as the identity is among the values"
        );
    }
}
