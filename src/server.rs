//! MCP server surface (spec.md §4, §6): one `GradioMcpServer` instance per
//! transport session, backed by a dynamic per-session tool catalogue rather
//! than the teacher's static `#[tool_router]` table. Grounded on the
//! teacher's `server::GateminiServer` for `ServerHandler` override shape and
//! error mapping, and on `ConaryLabs-Mira`'s `mcp::handler` for the manual
//! (non-macro) `list_tools`/`call_tool` pattern a dynamic catalogue needs.
//!
//! Session headers only exist on the Streamable HTTP transport (spec.md §6
//! requires real `Authorization`/`X-MCP-*` headers), so unlike the teacher
//! this server is never served over stdio.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, ErrorData as McpError, Implementation,
    ListToolsResult, PaginatedRequestParams, ProgressNotificationParam, ServerCapabilities,
    ServerInfo,
};
use rmcp::service::{Peer, RequestContext, RoleServer};
use rmcp::ServerHandler;
use serde_json::Value;
use tracing::warn;

use crate::bridge::ProgressRelay;
use crate::builtin;
use crate::legacy;
use crate::registry::{InvocationOutcome, Registry};
use crate::selection::{self, Preset, SelectionInput, SettingsSource, UserSettings};
use crate::session::{HeaderOverrides, InvocationContext, SessionContext};

/// `X-MCP-*`/`Authorization` headers captured for one transport session
/// (spec.md §6 "Headers, session-level").
#[derive(Debug, Clone, Default)]
pub struct SessionHeaders {
    pub authorization: Option<String>,
    pub bouquet: Option<String>,
    pub mix: Vec<String>,
    pub gradio: Vec<String>,
}

impl SessionHeaders {
    pub fn from_map(headers: &HashMap<String, String>) -> Self {
        let get = |name: &str| headers.get(name).cloned();
        let csv = |name: &str| {
            get(name)
                .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
                .unwrap_or_default()
        };
        Self {
            authorization: get("authorization").map(|v| v.trim_start_matches("Bearer ").trim_start_matches("bearer ").to_string()),
            bouquet: get("x-mcp-bouquet"),
            mix: csv("x-mcp-mix"),
            gradio: csv("x-mcp-gradio"),
        }
    }

    /// Read the session-level headers (spec.md §6) off the inbound HTTP
    /// request parts that the Streamable HTTP transport stashes in the
    /// request context's extensions — the `service_factory` that builds one
    /// `GradioMcpServer` per transport session runs before any request
    /// arrives, so headers can only be read here, lazily, on first use.
    fn from_context(context: &RequestContext<RoleServer>) -> Self {
        let Some(parts) = context.extensions.get::<http::request::Parts>() else {
            return Self::default();
        };
        let get = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
        let csv = |name: &str| {
            get(name)
                .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
                .unwrap_or_default()
        };
        Self {
            authorization: get("authorization").map(|v| {
                v.trim_start_matches("Bearer ").trim_start_matches("bearer ").to_string()
            }),
            bouquet: get("x-mcp-bouquet"),
            mix: csv("x-mcp-mix"),
            gradio: csv("x-mcp-gradio"),
        }
    }
}

/// Relays progress notifications through the session's live `Peer` handle
/// (spec.md §4.4 "progress relay"). Constructed once per invocation.
struct PeerProgressRelay {
    peer: Peer<RoleServer>,
    progress_token: rmcp::model::ProgressToken,
}

#[async_trait::async_trait]
impl ProgressRelay for PeerProgressRelay {
    async fn send(&self, progress: Value, total: Option<Value>, message: Option<Value>) -> Result<(), String> {
        let progress = progress.as_f64().unwrap_or(0.0);
        let total = total.and_then(|v| v.as_f64());
        let message = message.and_then(|v| v.as_str().map(str::to_string));
        let param = ProgressNotificationParam {
            progress_token: self.progress_token.clone(),
            progress,
            total,
            message,
        };
        self.peer
            .notify_progress(param)
            .await
            .map_err(|e| e.to_string())
    }
}

/// One server instance per connected transport session (spec.md §3
/// `SessionContext` lifecycle: "created on first request carrying a new
/// session identifier").
pub struct GradioMcpServer {
    registry: Arc<Registry>,
    known_bouquets: Vec<Preset>,
    search_enables_fetch: bool,
    session: OnceLock<Arc<SessionContext>>,
}

impl GradioMcpServer {
    pub fn new(registry: Arc<Registry>, known_bouquets: Vec<Preset>, search_enables_fetch: bool) -> Self {
        Self {
            registry,
            known_bouquets,
            search_enables_fetch,
            session: OnceLock::new(),
        }
    }

    /// Return this instance's session, building it on first use (spec.md §3
    /// "created on first request carrying a new session identifier" — here,
    /// the first request on this transport session, since `service_factory`
    /// hands each transport session its own `GradioMcpServer`).
    async fn ensure_session(&self, context: &RequestContext<RoleServer>) -> Arc<SessionContext> {
        if let Some(session) = self.session.get() {
            return Arc::clone(session);
        }
        let headers = SessionHeaders::from_context(context);
        let session = self.start_session(headers, context.peer.clone()).await;
        match self.session.set(Arc::clone(&session)) {
            Ok(()) => session,
            Err(_) => Arc::clone(self.session.get().expect("just set")),
        }
    }

    /// Resolve the active selection and build the catalogue for a brand new
    /// session, spawning the background notifier that turns catalogue
    /// changes into `notifications/tools/list_changed` (spec.md §4.5, §4.6).
    async fn start_session(&self, headers: SessionHeaders, peer: Peer<RoleServer>) -> Arc<SessionContext> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let all_builtin_ids = builtin::all_ids();
        let user_settings = headers.authorization.as_ref().map(|_| UserSettings {
            tool_ids: all_builtin_ids.clone(),
            source: SettingsSource::ServiceCatalogue,
        });

        let input = SelectionInput {
            bouquet_header: headers.bouquet.as_deref(),
            mix_header: &headers.mix,
            gradio_header: &headers.gradio,
            known_bouquets: &self.known_bouquets,
            user_settings: user_settings.as_ref(),
            all_builtin_ids: &all_builtin_ids,
        };
        let mut selection = selection::resolve(&input);
        selection.tool_ids = selection::apply_search_enables_fetch(
            selection.tool_ids,
            self.search_enables_fetch,
            builtin::DOCS_SEARCH,
            builtin::DOCS_FETCH,
        );

        let overrides = HeaderOverrides {
            bouquet: headers.bouquet.clone(),
            mix: headers.mix.clone(),
            gradio: headers.gradio.clone(),
        };
        let (session, mut changed_rx) = SessionContext::new(
            session_id,
            None,
            None,
            headers.authorization.clone(),
            overrides,
        );

        let token = session.bearer_token().map(str::to_string);
        self.registry
            .build_catalogue(&session, &selection, token.as_deref())
            .await;

        tokio::spawn(async move {
            while changed_rx.recv().await.is_some() {
                if peer.is_transport_closed() {
                    break;
                }
                if let Err(e) = peer.notify_tool_list_changed().await {
                    warn!(error = %e, "failed to notify tool list change");
                    break;
                }
            }
        });

        session
    }
}

fn text_content(text: impl Into<String>) -> Content {
    Content::text(text.into())
}

fn outcome_to_result(outcome: InvocationOutcome, invocation: &InvocationContext) -> Result<CallToolResult, McpError> {
    match outcome {
        InvocationOutcome::NotFound => Err(McpError::invalid_params(
            format!("unknown or disabled tool '{}'", invocation.outward_name),
            None,
        )),
        InvocationOutcome::BridgeFailed(e) => Ok(CallToolResult {
            content: vec![text_content(e.to_string())],
            is_error: Some(true),
            structured_content: None,
            meta: captured_meta(invocation),
        }),
        InvocationOutcome::Result { is_error, content } => {
            let content = content
                .into_iter()
                .map(|v| match v.get("text").and_then(Value::as_str) {
                    Some(text) => text_content(text),
                    None => text_content(v.to_string()),
                })
                .collect();
            Ok(CallToolResult {
                content,
                is_error: Some(is_error),
                structured_content: None,
                meta: captured_meta(invocation),
            })
        }
    }
}

/// Attach any headers the bridge captured from the upstream response, as
/// `_meta.responseHeaders` (spec.md §4.4 "captured headers"). Always
/// attached, even when empty, so callers don't need to special-case absence.
fn captured_meta(invocation: &InvocationContext) -> Option<rmcp::model::Meta> {
    let headers = invocation.captured_headers_snapshot();
    let mut meta = rmcp::model::Meta::default();
    meta.insert(
        "responseHeaders".to_string(),
        serde_json::to_value(headers).unwrap_or(Value::Null),
    );
    Some(meta)
}

impl ServerHandler for GradioMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Aggregates built-in Hugging Face hub tools with dynamically discovered \
                 Gradio Space tools. Use tools/list to see the active catalogue for this session."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move {
            let session = self.ensure_session(&context).await;
            let tools = session
                .catalogue_snapshot()
                .into_iter()
                .filter(|t| t.enabled)
                .map(|t| {
                    let schema = match t.schema {
                        Value::Object(obj) => Arc::new(obj),
                        _ => Arc::new(serde_json::Map::new()),
                    };
                    rmcp::model::Tool {
                        name: t.outward_name.into(),
                        description: None,
                        input_schema: schema,
                        output_schema: None,
                        annotations: None,
                        title: None,
                        icons: None,
                        execution: None,
                        meta: None,
                    }
                })
                .collect();
            Ok(ListToolsResult { tools, next_cursor: None, meta: None })
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            let session = self.ensure_session(&context).await;

            let raw = serde_json::json!({
                "name": request.name.as_ref(),
                "arguments": request.arguments.clone().map(Value::Object).unwrap_or(Value::Null),
            });
            let rewritten = legacy::rewrite(&raw);
            let outward_name = rewritten
                .body
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(request.name.as_ref())
                .to_string();
            let arguments = rewritten
                .body
                .get("arguments")
                .cloned()
                .unwrap_or(Value::Object(Default::default()));

            let raw_progress_token = request.meta.clone().unwrap_or_default().get_progress_token();
            let progress_token_value = raw_progress_token
                .as_ref()
                .map(|t| serde_json::to_value(t).unwrap_or(Value::Null));
            let invocation = InvocationContext::new(outward_name, arguments, progress_token_value);

            let relay = raw_progress_token.map(|token| {
                Arc::new(PeerProgressRelay { peer: context.peer.clone(), progress_token: token }) as Arc<dyn ProgressRelay>
            });

            let outcome = self.registry.invoke(&session, &invocation, relay).await;
            outcome_to_result(outcome, &invocation)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_headers_parse_bearer_and_csv_lists() {
        let mut map = HashMap::new();
        map.insert("authorization".to_string(), "Bearer hf_abc".to_string());
        map.insert("x-mcp-bouquet".to_string(), "media".to_string());
        map.insert("x-mcp-mix".to_string(), "a, b ,c".to_string());
        map.insert("x-mcp-gradio".to_string(), "owner/space, other/space".to_string());
        let headers = SessionHeaders::from_map(&map);
        assert_eq!(headers.authorization.as_deref(), Some("hf_abc"));
        assert_eq!(headers.bouquet.as_deref(), Some("media"));
        assert_eq!(headers.mix, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(
            headers.gradio,
            vec!["owner/space".to_string(), "other/space".to_string()]
        );
    }

    #[test]
    fn session_headers_default_when_absent() {
        let headers = SessionHeaders::from_map(&HashMap::new());
        assert!(headers.authorization.is_none());
        assert!(headers.bouquet.is_none());
        assert!(headers.mix.is_empty());
    }
}
