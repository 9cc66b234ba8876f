//! Minimal JSON-LD context expansion (spec §4.3 step 1).
//!
//! The core treats the query-language surface as an external black box (spec
//! §1 "Out of scope"); by the same boundary, a full JSON-LD processor with
//! `@context` term mapping, `@reverse`, scoped contexts, and framing is not
//! reimplemented here. What staging actually needs is: compact IRIs
//! (`"ex:name"`) resolved against a prefix table, and the two keywords
//! (`@type`, `@json`) already handled by [`crate::sid::IriCodec`]. This module
//! resolves compact IRIs for keys and `{"@id": ...}`/`@type` string values
//! before a document reaches the stager.

use std::collections::HashMap;

use serde_json::Value;

/// A flat prefix table (`"ex" -> "http://ex/#"`), the ledger's default context
/// (spec §4.3 "Expand with the ledger's default context").
#[derive(Debug, Clone, Default)]
pub struct Context {
    prefixes: HashMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>, iri: impl Into<String>) -> Self {
        self.prefixes.insert(prefix.into(), iri.into());
        self
    }

    /// Expand a single compact term. Absolute IRIs, blank-node labels (`_:`),
    /// and JSON-LD keywords (`@id`, `@type`, ...) pass through unchanged.
    pub fn expand_term(&self, term: &str) -> String {
        if term.starts_with('@') || term.starts_with("_:") || term.contains("://") {
            return term.to_string();
        }
        if let Some((prefix, local)) = term.split_once(':') {
            if let Some(base) = self.prefixes.get(prefix) {
                return format!("{base}{local}");
            }
        }
        term.to_string()
    }

    fn expand_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.expand_term(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.expand_value(v)).collect()),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    let key = self.expand_term(k);
                    let expanded = if key == "@type" {
                        self.expand_value(v)
                    } else if key == "@id" {
                        self.expand_value(v)
                    } else {
                        self.expand_node(v)
                    };
                    out.insert(key, expanded);
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    fn expand_node(&self, value: &Value) -> Value {
        match value {
            Value::Object(_) => self.expand_value(value),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.expand_node(v)).collect()),
            other => other.clone(),
        }
    }

    /// Expand a top-level document: a single node object, an array of nodes,
    /// or a modify clause (`@where`/`@delete`/`@insert` are structural keys and
    /// keep their contents expanded recursively).
    pub fn expand(&self, document: &Value) -> Value {
        self.expand_value(document)
    }

    /// Merge this context with a node's own inline `@context` object, if it
    /// has one (spec §4.3 step 1: "Expand with the ledger's default context").
    /// Prefixes the node declares itself take priority over the ledger
    /// default.
    fn merge_inline(&self, node: &Value) -> Context {
        let Some(inline) = node.get("@context").and_then(Value::as_object) else {
            return self.clone();
        };
        let mut merged = self.clone();
        for (prefix, iri) in inline {
            if let Value::String(iri) = iri {
                merged.prefixes.insert(prefix.clone(), iri.clone());
            }
        }
        merged
    }

    /// Expand a single node document, first merging in its own inline
    /// `@context` (if any) over this context and stripping the `@context` key
    /// before expansion, since it is not itself a predicate (spec §4.3 step 1,
    /// §8 scenario 1).
    pub fn expand_node_with_own_context(&self, node: &Value) -> Value {
        let merged = self.merge_inline(node);
        let mut stripped = node.clone();
        if let Value::Object(map) = &mut stripped {
            map.remove("@context");
        }
        merged.expand(&stripped)
    }

    /// Expand every node of a staging request, each against this context
    /// merged with its own inline `@context` (spec §4.3 step 1). The
    /// `@where`-solution bindings of a modify request are untouched: they are
    /// variable values, not JSON-LD terms.
    pub fn expand_request(&self, request: super::stage::StageRequest) -> super::stage::StageRequest {
        use super::stage::StageRequest;
        match request {
            StageRequest::Insert(nodes) => StageRequest::Insert(
                nodes.iter().map(|n| self.expand_node_with_own_context(n)).collect(),
            ),
            StageRequest::Modify { delete, insert, solutions } => StageRequest::Modify {
                delete: delete.iter().map(|n| self.expand_node_with_own_context(n)).collect(),
                insert: insert.iter().map(|n| self.expand_node_with_own_context(n)).collect(),
                solutions,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_iri_expands_via_prefix() {
        let ctx = Context::new().with_prefix("ex", "http://ex/#");
        assert_eq!(ctx.expand_term("ex:name"), "http://ex/#name");
    }

    #[test]
    fn absolute_iri_passes_through() {
        let ctx = Context::new();
        assert_eq!(ctx.expand_term("http://ex/#name"), "http://ex/#name");
    }

    #[test]
    fn keyword_passes_through_unexpanded() {
        let ctx = Context::new();
        assert_eq!(ctx.expand_term("@type"), "@type");
    }

    #[test]
    fn node_keys_and_id_values_expand() {
        let ctx = Context::new().with_prefix("ex", "http://ex/#");
        let doc = serde_json::json!({"@id": "ex:alice", "ex:knows": {"@id": "ex:bob"}});
        let expanded = ctx.expand(&doc);
        assert_eq!(expanded["@id"], "http://ex/#alice");
        assert_eq!(expanded["http://ex/#knows"]["@id"], "http://ex/#bob");
    }

    #[test]
    fn inline_context_overrides_ledger_default_and_is_stripped() {
        let ledger_default = Context::new().with_prefix("ex", "http://other/#");
        let doc = serde_json::json!({
            "@context": {"ex": "http://ex/#"},
            "@id": "ex:a",
            "ex:name": "A",
        });
        let expanded = ledger_default.expand_node_with_own_context(&doc);
        assert_eq!(expanded["@id"], "http://ex/#a");
        assert_eq!(expanded["http://ex/#name"], "A");
        assert!(expanded.get("@context").is_none());
    }

    #[test]
    fn node_without_inline_context_falls_back_to_ledger_default() {
        let ledger_default = Context::new().with_prefix("ex", "http://ex/#");
        let doc = serde_json::json!({"@id": "ex:a", "ex:name": "A"});
        let expanded = ledger_default.expand_node_with_own_context(&doc);
        assert_eq!(expanded["@id"], "http://ex/#a");
        assert_eq!(expanded["http://ex/#name"], "A");
    }
}
