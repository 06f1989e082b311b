//! Legacy request rewriter (spec.md §4.7): a pure, idempotent ingress
//! transform applied to every `tools/call` request body before dispatch.
//! Modeled as a small, independently-tested pure function in the same
//! family as `selection::resolve` — mirrors the teacher's
//! `tools::discovery` helpers (`first_sentence`, `extract_param_names`),
//! which are likewise pure transforms over a request's JSON shape.

use serde_json::{Map, Value};

/// Result of rewriting one request: the (possibly) rewritten body plus an
/// observability report of which legacy name mapped to which canonical name.
pub struct RewriteOutcome {
    pub body: Value,
    pub rewritten: Option<(String, String)>,
}

const CANONICAL_SEARCH: &str = "hub_search";
const CANONICAL_REPO_SEARCH: &str = "hub_search";

fn is_model_search_alias(name: &str) -> bool {
    matches!(
        name,
        "model_search" | "model-search" | "hf_model_search"
    )
}

fn is_dataset_search_alias(name: &str) -> bool {
    matches!(
        name,
        "dataset_search" | "dataset-search" | "hf_dataset_search"
    )
}

fn is_repo_search_alias(name: &str) -> bool {
    name == "repo_search"
}

/// Rewrite a `tools/call` body `{ name, arguments }` in place of any
/// recognised legacy tool name. Returns the body unchanged if `name` does
/// not match a known legacy alias.
pub fn rewrite(body: &Value) -> RewriteOutcome {
    let Some(name) = body.get("name").and_then(Value::as_str) else {
        return RewriteOutcome {
            body: body.clone(),
            rewritten: None,
        };
    };

    if is_model_search_alias(name) {
        return rewrite_repo_type_search(body, name, "model", &["task", "library"]);
    }
    if is_dataset_search_alias(name) {
        return rewrite_repo_type_search(body, name, "dataset", &["tags"]);
    }
    if is_repo_search_alias(name) {
        let mut rewritten = body.clone();
        if let Some(obj) = rewritten.as_object_mut() {
            obj.insert("name".to_string(), Value::String(CANONICAL_REPO_SEARCH.to_string()));
        }
        return RewriteOutcome {
            body: rewritten,
            rewritten: Some((name.to_string(), CANONICAL_REPO_SEARCH.to_string())),
        };
    }

    RewriteOutcome {
        body: body.clone(),
        rewritten: None,
    }
}

/// Shared logic for `model_search`/`dataset_search`: rewrite the name,
/// pin `repo_types`, and fold the given legacy argument keys into
/// `filters` (deduplicated), removing the originals.
fn rewrite_repo_type_search(
    body: &Value,
    legacy_name: &str,
    repo_type: &str,
    fold_keys: &[&str],
) -> RewriteOutcome {
    let mut rewritten = body.clone();
    let Some(obj) = rewritten.as_object_mut() else {
        return RewriteOutcome {
            body: rewritten,
            rewritten: None,
        };
    };

    obj.insert("name".to_string(), Value::String(CANONICAL_SEARCH.to_string()));

    let mut arguments = match obj.remove("arguments") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };

    arguments.insert(
        "repo_types".to_string(),
        Value::Array(vec![Value::String(repo_type.to_string())]),
    );

    let mut filters: Vec<String> = arguments
        .get("filters")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    for key in fold_keys {
        if let Some(value) = arguments.remove(*key) {
            if let Some(s) = value.as_str() {
                if !filters.iter().any(|f| f == s) {
                    filters.push(s.to_string());
                }
            }
        }
    }

    arguments.insert(
        "filters".to_string(),
        Value::Array(filters.into_iter().map(Value::String).collect()),
    );

    obj.insert("arguments".to_string(), Value::Object(arguments));

    RewriteOutcome {
        body: rewritten,
        rewritten: Some((legacy_name.to_string(), CANONICAL_SEARCH.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn model_search_rewrite_matches_spec_scenario() {
        let body = json!({
            "name": "model_search",
            "arguments": {
                "query": "qwen",
                "task": "text-generation",
                "library": "transformers",
                "filters": ["featured"]
            }
        });
        let outcome = rewrite(&body);
        assert_eq!(
            outcome.rewritten,
            Some(("model_search".to_string(), "hub_search".to_string()))
        );
        assert_eq!(outcome.body["name"], "hub_search");
        assert_eq!(outcome.body["arguments"]["query"], "qwen");
        assert_eq!(outcome.body["arguments"]["repo_types"], json!(["model"]));
        assert!(outcome.body["arguments"].get("task").is_none());
        assert!(outcome.body["arguments"].get("library").is_none());
        let mut filters: Vec<String> = outcome.body["arguments"]["filters"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        filters.sort();
        let mut expected = vec![
            "featured".to_string(),
            "text-generation".to_string(),
            "transformers".to_string(),
        ];
        expected.sort();
        assert_eq!(filters, expected);
    }

    #[test]
    fn dataset_search_folds_tags_into_filters() {
        let body = json!({
            "name": "dataset_search",
            "arguments": { "tags": "vision" }
        });
        let outcome = rewrite(&body);
        assert_eq!(outcome.body["arguments"]["repo_types"], json!(["dataset"]));
        assert_eq!(outcome.body["arguments"]["filters"], json!(["vision"]));
    }

    #[test]
    fn repo_search_rewrites_name_only() {
        let body = json!({ "name": "repo_search", "arguments": { "query": "x" } });
        let outcome = rewrite(&body);
        assert_eq!(outcome.body["name"], "hub_search");
        assert_eq!(outcome.body["arguments"], json!({ "query": "x" }));
    }

    #[test]
    fn unknown_tool_name_passes_through_unchanged() {
        let body = json!({ "name": "generate_image", "arguments": { "prompt": "cat" } });
        let outcome = rewrite(&body);
        assert_eq!(outcome.body, body);
        assert!(outcome.rewritten.is_none());
    }

    #[test]
    fn rewrite_is_idempotent() {
        let body = json!({
            "name": "model_search",
            "arguments": { "task": "text-generation" }
        });
        let once = rewrite(&body).body;
        let twice = rewrite(&once).body;
        assert_eq!(once, twice);
    }
}
