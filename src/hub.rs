//! Thin HTTP client against the hub API and upstream schema endpoint
//! (spec.md §6 "Hub API", §4.2 Phase A/B). Grounded on the teacher's
//! `backend::http::HttpBackend::start` pattern of building a bare `reqwest`
//! client for one-shot calls, minus the long-lived MCP session — these are
//! plain GETs, not MCP handshakes.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::model::SpaceRef;

#[derive(Debug, Deserialize)]
struct HubRuntime {
    stage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HubSpaceResponse {
    subdomain: Option<String>,
    #[serde(default)]
    private: bool,
    sdk: Option<String>,
    emoji: Option<String>,
    title: Option<String>,
    runtime: Option<HubRuntime>,
}

/// Parsed, pre-cache-insertion shape of a hub metadata fetch.
pub struct FetchedMetadata {
    pub subdomain: String,
    pub sdk: String,
    pub private: bool,
    pub emoji: Option<String>,
    pub title: Option<String>,
    pub runtime_stage: Option<String>,
    pub etag: Option<String>,
}

pub enum MetadataFetch {
    Fresh(FetchedMetadata),
    NotModified,
    Error(String),
}

/// GET `https://huggingface.co/api/spaces/<ref>`, with optional `If-None-Match`.
pub async fn fetch_metadata(
    client: &reqwest::Client,
    r#ref: &SpaceRef,
    token: Option<&str>,
    if_none_match: Option<&str>,
    timeout: Duration,
) -> MetadataFetch {
    let url = format!("https://huggingface.co/api/spaces/{}", r#ref.as_str());
    let mut req = client.get(&url);
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }
    if let Some(etag) = if_none_match {
        req = req.header(reqwest::header::IF_NONE_MATCH, etag);
    }

    let response = match tokio::time::timeout(timeout, req.send()).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => return MetadataFetch::Error(e.to_string()),
        Err(_) => return MetadataFetch::Error("timed out".to_string()),
    };

    if response.status() == StatusCode::NOT_MODIFIED {
        return MetadataFetch::NotModified;
    }
    if !response.status().is_success() {
        return MetadataFetch::Error(format!("hub returned {}", response.status()));
    }

    let etag = response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body: HubSpaceResponse = match response.json().await {
        Ok(b) => b,
        Err(e) => return MetadataFetch::Error(e.to_string()),
    };

    let Some(subdomain) = body.subdomain.filter(|s| !s.is_empty()) else {
        return MetadataFetch::Error("hub response missing subdomain".to_string());
    };

    MetadataFetch::Fresh(FetchedMetadata {
        subdomain,
        sdk: body.sdk.unwrap_or_default(),
        private: body.private,
        emoji: body.emoji,
        title: body.title,
        runtime_stage: body.runtime.and_then(|r| r.stage),
        etag,
    })
}

pub enum SchemaFetch {
    Fresh(Value),
    Error(String),
}

/// GET `https://<subdomain>.hf.space/gradio_api/mcp/schema`.
pub async fn fetch_schema(
    client: &reqwest::Client,
    subdomain: &str,
    token: Option<&str>,
    timeout: Duration,
) -> SchemaFetch {
    let url = format!("https://{subdomain}.hf.space/gradio_api/mcp/schema");
    let mut req = client.get(&url);
    if let Some(token) = token {
        req = req.header("X-HF-Authorization", format!("Bearer {token}"));
    }

    let response = match tokio::time::timeout(timeout, req.send()).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => return SchemaFetch::Error(e.to_string()),
        Err(_) => return SchemaFetch::Error("timed out".to_string()),
    };

    if !response.status().is_success() {
        return SchemaFetch::Error(format!("schema endpoint returned {}", response.status()));
    }

    match response.json::<Value>().await {
        Ok(v) => SchemaFetch::Fresh(v),
        Err(e) => SchemaFetch::Error(e.to_string()),
    }
}
