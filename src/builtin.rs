//! Built-in tools (spec.md §1, §4.5): plain HTTP clients against the hub's
//! service catalogue, with no interesting state of their own — grounded on
//! the teacher's `backend::http::HttpBackend::start` pattern of building one
//! bare `reqwest::Client` per call rather than a long-lived MCP session.

use serde_json::{json, Value};
use std::time::Duration;

use crate::config::Config;

/// Static identifiers for the built-in tool catalogue (spec.md §4.5,
/// §4.6 fallback list).
pub const HUB_SEARCH: &str = "hub_search";
pub const HUB_INSPECT: &str = "hub_inspect";
pub const DOCS_SEARCH: &str = "docs_search";
pub const DOCS_FETCH: &str = "docs_fetch";

pub fn all_ids() -> Vec<String> {
    vec![
        HUB_SEARCH.to_string(),
        HUB_INSPECT.to_string(),
        DOCS_SEARCH.to_string(),
        DOCS_FETCH.to_string(),
    ]
}

pub struct BuiltInResult {
    pub is_error: bool,
    pub text: String,
}

/// Dispatch a built-in tool call by ID against the service catalogue.
pub async fn invoke(
    client: &reqwest::Client,
    id: &str,
    arguments: &Value,
    bearer_token: Option<&str>,
    config: &Config,
) -> BuiltInResult {
    match id {
        HUB_SEARCH => hub_search(client, arguments, bearer_token, config).await,
        HUB_INSPECT => hub_inspect(client, arguments, bearer_token, config).await,
        DOCS_SEARCH => docs_search(client, arguments, bearer_token, config).await,
        DOCS_FETCH => docs_fetch(client, arguments, bearer_token, config).await,
        other => BuiltInResult {
            is_error: true,
            text: format!("unknown built-in tool '{other}'"),
        },
    }
}

async fn get_json(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, &str)],
    bearer_token: Option<&str>,
    timeout: Duration,
) -> Result<Value, String> {
    let mut req = client.get(url).query(query);
    if let Some(token) = bearer_token {
        req = req.bearer_auth(token);
    }
    let response = tokio::time::timeout(timeout, req.send())
        .await
        .map_err(|_| "request timed out".to_string())?
        .map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("service catalogue returned {}", response.status()));
    }
    response.json::<Value>().await.map_err(|e| e.to_string())
}

async fn hub_search(
    client: &reqwest::Client,
    arguments: &Value,
    bearer_token: Option<&str>,
    config: &Config,
) -> BuiltInResult {
    let query = arguments.get("query").and_then(Value::as_str).unwrap_or("");
    let repo_types = arguments
        .get("repo_types")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();

    match get_json(
        client,
        "https://huggingface.co/api/search",
        &[("q", query), ("repo_types", &repo_types)],
        bearer_token.or(config.default_hf_token.as_deref()),
        config.space_info_timeout,
    )
    .await
    {
        Ok(body) => BuiltInResult {
            is_error: false,
            text: body.to_string(),
        },
        Err(e) => BuiltInResult {
            is_error: true,
            text: e,
        },
    }
}

async fn hub_inspect(
    client: &reqwest::Client,
    arguments: &Value,
    bearer_token: Option<&str>,
    config: &Config,
) -> BuiltInResult {
    let Some(repo_id) = arguments.get("repo_id").and_then(Value::as_str) else {
        return BuiltInResult {
            is_error: true,
            text: "missing required argument 'repo_id'".to_string(),
        };
    };
    let url = format!("https://huggingface.co/api/models/{repo_id}");
    match get_json(
        client,
        &url,
        &[],
        bearer_token.or(config.default_hf_token.as_deref()),
        config.space_info_timeout,
    )
    .await
    {
        Ok(body) => BuiltInResult {
            is_error: false,
            text: body.to_string(),
        },
        Err(e) => BuiltInResult {
            is_error: true,
            text: e,
        },
    }
}

async fn docs_search(
    client: &reqwest::Client,
    arguments: &Value,
    bearer_token: Option<&str>,
    config: &Config,
) -> BuiltInResult {
    let query = arguments.get("query").and_then(Value::as_str).unwrap_or("");
    match get_json(
        client,
        "https://huggingface.co/api/docs/search",
        &[("q", query)],
        bearer_token.or(config.default_hf_token.as_deref()),
        config.space_info_timeout,
    )
    .await
    {
        Ok(body) => BuiltInResult {
            is_error: false,
            text: body.to_string(),
        },
        Err(e) => BuiltInResult {
            is_error: true,
            text: e,
        },
    }
}

async fn docs_fetch(
    client: &reqwest::Client,
    arguments: &Value,
    bearer_token: Option<&str>,
    config: &Config,
) -> BuiltInResult {
    let Some(path) = arguments.get("path").and_then(Value::as_str) else {
        return BuiltInResult {
            is_error: true,
            text: "missing required argument 'path'".to_string(),
        };
    };
    let url = format!("https://huggingface.co/docs/{path}");
    match get_json(
        client,
        &url,
        &[],
        bearer_token.or(config.default_hf_token.as_deref()),
        config.space_info_timeout,
    )
    .await
    {
        Ok(body) => BuiltInResult {
            is_error: false,
            text: body.to_string(),
        },
        Err(e) => BuiltInResult {
            is_error: true,
            text: e,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_builtin_id_is_a_structured_error() {
        let client = reqwest::Client::new();
        let config = Config::default();
        let result = invoke(&client, "not_real", &json!({}), None, &config).await;
        assert!(result.is_error);
        assert!(result.text.contains("not_real"));
    }

    #[tokio::test]
    async fn hub_inspect_requires_repo_id() {
        let client = reqwest::Client::new();
        let config = Config::default();
        let result = invoke(&client, HUB_INSPECT, &json!({}), None, &config).await;
        assert!(result.is_error);
        assert!(result.text.contains("repo_id"));
    }

    #[test]
    fn all_ids_lists_every_builtin() {
        let ids = all_ids();
        assert!(ids.contains(&HUB_SEARCH.to_string()));
        assert!(ids.contains(&DOCS_FETCH.to_string()));
        assert_eq!(ids.len(), 4);
    }
}
