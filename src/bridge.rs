//! Upstream bridge (spec.md §4.4): the heart of the system. Opens a
//! transient SSE client against one upstream space, performs the protocol
//! handshake, sends exactly one `tools/call`, relays progress, captures
//! response headers, rewrites replica URLs, and closes on every exit path.
//!
//! Grounded on the teacher's `backend::lenient_client::LenientClient` for
//! the pattern of wrapping `reqwest` responses to inspect headers before the
//! message reaches model-layer code, and `backend::http::HttpBackend::call_tool`
//! for timeout-wrapped single-call dispatch. The upstream here speaks the
//! legacy SSE transport (GET opens the stream, server announces a POST
//! endpoint, responses interleave on the GET stream) rather than
//! streamable-HTTP, so the client is hand-rolled directly against
//! `sse_stream` instead of going through `rmcp`'s streamable-http transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use futures_util::StreamExt;
use regex::Regex;
use serde_json::{json, Value};
use sse_stream::SseStream;
use thiserror::Error;
use tracing::warn;

static REPLICA_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https://([^/\s]+)(/gradio_api\S*)").unwrap());

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to open upstream stream: {0}")]
    Connect(String),
    #[error("upstream did not announce a message endpoint before timing out")]
    NoEndpoint,
    #[error("upstream call timed out")]
    Timeout,
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("upstream returned a protocol error: {0}")]
    Protocol(String),
    #[error("invocation cancelled")]
    Cancelled,
}

/// Relays one progress notification downstream. Implemented by the server
/// layer, which owns the actual `RequestContext`/peer handle. Returns `Err`
/// when the downstream notification failed to send, so the bridge can latch
/// the relay off after exactly one failed attempt (spec.md §4.4 step 4).
#[async_trait::async_trait]
pub trait ProgressRelay: Send + Sync {
    async fn send(&self, progress: Value, total: Option<Value>, message: Option<Value>) -> Result<(), String>;
}

pub struct BridgeRequest<'a> {
    pub subdomain: &'a str,
    pub tool_name: &'a str,
    pub arguments: Value,
    pub bearer_token: Option<&'a str>,
    pub progress_token: Option<Value>,
}

pub struct BridgeOutcome {
    pub is_error: bool,
    pub content: Vec<Value>,
    pub captured_headers: HashMap<String, String>,
}

const AUTH_HEADER: &str = "X-HF-Authorization";
const REPLICA_HEADER: &str = "X-Proxied-Replica";

/// Run one invocation end to end. `cancel` is polled between every awaited
/// step; `idle_timeout` resets on every SSE event received (spec.md §5).
pub async fn call(
    client: &reqwest::Client,
    request: BridgeRequest<'_>,
    progress_relay: Option<Arc<dyn ProgressRelay>>,
    cancel: Arc<AtomicBool>,
    idle_timeout: Duration,
    no_replica_rewrite: bool,
) -> Result<BridgeOutcome, BridgeError> {
    let sse_url = format!("https://{}.hf.space/gradio_api/mcp/sse", request.subdomain);
    let origin = format!("https://{}.hf.space", request.subdomain);

    let mut captured_headers: HashMap<String, String> = HashMap::new();

    let get_response = {
        let mut req = client.get(&sse_url);
        if let Some(token) = request.bearer_token {
            req = req.header(AUTH_HEADER, format!("Bearer {token}"));
        }
        req.send()
            .await
            .map_err(|e| BridgeError::Connect(e.to_string()))?
    };
    capture_headers(&get_response, &mut captured_headers);

    let byte_stream = get_response.bytes_stream().boxed();
    let mut events: EventStream = Box::pin(SseStream::from_bytes_stream(byte_stream));

    // The relay permanently latches off after its first failed attempt
    // (spec.md §4.4 step 4) — modeled as a local one-shot flag.
    let relay_disabled = AtomicBool::new(false);

    let endpoint = await_endpoint(&mut events, idle_timeout).await?;
    let endpoint_url = resolve_endpoint_url(&origin, &endpoint);

    if cancel.load(Ordering::Relaxed) {
        return Err(BridgeError::Cancelled);
    }

    post_message(
        client,
        &endpoint_url,
        request.bearer_token,
        &json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": { "name": "gradio-mcp-proxy", "version": env!("CARGO_PKG_VERSION") }
            }
        }),
        &mut captured_headers,
    )
    .await?;

    await_response(&mut events, 1, idle_timeout, &cancel).await?;

    post_message(
        client,
        &endpoint_url,
        request.bearer_token,
        &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        &mut captured_headers,
    )
    .await?;

    let mut call_params = json!({
        "name": request.tool_name,
        "arguments": request.arguments,
    });
    if let Some(token) = &request.progress_token {
        call_params["_meta"] = json!({ "progressToken": token });
    }

    post_message(
        client,
        &endpoint_url,
        request.bearer_token,
        &json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": call_params }),
        &mut captured_headers,
    )
    .await?;

    let result = loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(BridgeError::Cancelled);
        }

        let frame = next_frame(&mut events, idle_timeout).await?;
        let Some(frame) = frame else {
            return Err(BridgeError::Transport("upstream closed the stream".to_string()));
        };

        if frame.get("id").and_then(Value::as_i64) == Some(2) {
            if let Some(error) = frame.get("error") {
                return Err(BridgeError::Protocol(error.to_string()));
            }
            break frame.get("result").cloned().unwrap_or(Value::Null);
        }

        if frame.get("method").and_then(Value::as_str) == Some("notifications/progress") {
            if let Some(relay) = &progress_relay {
                if request.progress_token.is_some() {
                    let params = frame.get("params").cloned().unwrap_or(Value::Null);
                    let progress = params.get("progress").cloned().unwrap_or(Value::Null);
                    let total = params.get("total").cloned();
                    let message = params.get("message").cloned();
                    relay_progress(relay, &relay_disabled, progress, total, message).await;
                }
            }
        }
    };

    drop(events);

    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let content = result
        .get("content")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let content = if no_replica_rewrite {
        content
    } else if let Some(replica_id) = captured_headers
        .get(REPLICA_HEADER)
        .and_then(|h| extract_replica_id(h))
    {
        content
            .into_iter()
            .map(|item| rewrite_content_item(item, &replica_id))
            .collect()
    } else {
        content
    };

    Ok(BridgeOutcome {
        is_error,
        content,
        captured_headers,
    })
}

/// Dispatch one progress notification to `relay`, unless it is already
/// latched off. A failed (or panicked) send latches it off permanently for
/// the rest of this invocation — at most one attempt ever reaches the relay
/// after the first failure (spec.md §4.4 step 4, §8 scenario 3).
async fn relay_progress(
    relay: &Arc<dyn ProgressRelay>,
    relay_disabled: &AtomicBool,
    progress: Value,
    total: Option<Value>,
    message: Option<Value>,
) {
    if relay_disabled.load(Ordering::Relaxed) {
        return;
    }
    let relay = Arc::clone(relay);
    let outcome = tokio::spawn(async move { relay.send(progress, total, message).await }).await;
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(error = %e, "progress relay failed, disabling for this invocation");
            relay_disabled.store(true, Ordering::Relaxed);
        }
        Err(e) => {
            warn!(error = %e, "progress relay task panicked, disabling for this invocation");
            relay_disabled.store(true, Ordering::Relaxed);
        }
    }
}

fn capture_headers(response: &reqwest::Response, captured: &mut HashMap<String, String>) {
    if let Some(value) = response
        .headers()
        .get(REPLICA_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        captured.insert(REPLICA_HEADER.to_string(), value.to_string());
    }
}

async fn post_message(
    client: &reqwest::Client,
    endpoint_url: &str,
    bearer_token: Option<&str>,
    body: &Value,
    captured: &mut HashMap<String, String>,
) -> Result<(), BridgeError> {
    let mut req = client.post(endpoint_url).json(body);
    if let Some(token) = bearer_token {
        req = req.header(AUTH_HEADER, format!("Bearer {token}"));
    }
    let response = req
        .send()
        .await
        .map_err(|e| BridgeError::Transport(e.to_string()))?;
    capture_headers(&response, captured);
    if !response.status().is_success() && response.status().as_u16() != 202 {
        return Err(BridgeError::Transport(format!(
            "upstream message endpoint returned {}",
            response.status()
        )));
    }
    Ok(())
}

type EventStream = std::pin::Pin<
    Box<
        SseStream<
            sse_stream::ByteStreamBody<
                futures_util::stream::BoxStream<'static, reqwest::Result<bytes::Bytes>>,
                bytes::Bytes,
            >,
        >,
    >,
>;

async fn await_endpoint(events: &mut EventStream, timeout: Duration) -> Result<String, BridgeError> {
    loop {
        let item = tokio::time::timeout(timeout, events.next())
            .await
            .map_err(|_| BridgeError::NoEndpoint)?;
        let Some(item) = item else {
            return Err(BridgeError::NoEndpoint);
        };
        let sse = item.map_err(|e| BridgeError::Transport(e.to_string()))?;
        if sse.event.as_deref() == Some("endpoint") {
            if let Some(data) = sse.data {
                return Ok(data);
            }
        }
    }
}

/// Read raw SSE frames until one JSON-RPC payload is produced, or the
/// idle deadline elapses (the deadline resets on every frame received,
/// progress or otherwise, per spec.md §5).
async fn next_frame(
    events: &mut EventStream,
    idle_timeout: Duration,
) -> Result<Option<Value>, BridgeError> {
    loop {
        let item = tokio::time::timeout(idle_timeout, events.next())
            .await
            .map_err(|_| BridgeError::Timeout)?;
        let Some(item) = item else {
            return Ok(None);
        };
        let sse = item.map_err(|e| BridgeError::Transport(e.to_string()))?;
        if sse.event.as_deref() == Some("endpoint") {
            continue;
        }
        let Some(data) = sse.data else {
            continue;
        };
        match serde_json::from_str::<Value>(&data) {
            Ok(value) => return Ok(Some(value)),
            Err(_) => continue,
        }
    }
}

/// Wait for the JSON-RPC response matching `expected_id`, dropping anything
/// else (progress notifications interleaved before a handshake response).
async fn await_response(
    events: &mut EventStream,
    expected_id: i64,
    idle_timeout: Duration,
    cancel: &Arc<AtomicBool>,
) -> Result<Value, BridgeError> {
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(BridgeError::Cancelled);
        }
        let Some(frame) = next_frame(events, idle_timeout).await? else {
            return Err(BridgeError::Transport("upstream closed before responding".to_string()));
        };
        if frame.get("id").and_then(Value::as_i64) == Some(expected_id) {
            if let Some(error) = frame.get("error") {
                return Err(BridgeError::Protocol(error.to_string()));
            }
            return Ok(frame.get("result").cloned().unwrap_or(Value::Null));
        }
    }
}

fn resolve_endpoint_url(origin: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else if let Some(stripped) = endpoint.strip_prefix('/') {
        format!("{origin}/{stripped}")
    } else {
        format!("{origin}/{endpoint}")
    }
}

/// Split on `-`, returning the last non-empty segment — `None` when there is
/// no `-` at all (spec.md §8 scenario 1).
pub fn extract_replica_id(header: &str) -> Option<String> {
    if !header.contains('-') {
        return None;
    }
    let last = header.rsplit('-').next().unwrap_or("");
    if last.is_empty() {
        None
    } else {
        Some(last.to_string())
    }
}

fn rewrite_content_item(item: Value, replica_id: &str) -> Value {
    let Some(obj) = item.as_object() else {
        return item;
    };
    if obj.get("type").and_then(Value::as_str) != Some("text") {
        return item;
    }
    let Some(text) = obj.get("text").and_then(Value::as_str) else {
        return item;
    };
    if !REPLICA_URL_RE.is_match(text) {
        return item;
    }

    let rewritten = REPLICA_URL_RE.replace_all(text, |caps: &regex::Captures| {
        format!("https://{}/--replicas/{}{}", &caps[1], replica_id, &caps[2])
    });

    let mut cloned = obj.clone();
    cloned.insert("text".to_string(), Value::String(rewritten.into_owned()));
    Value::Object(cloned)
}
