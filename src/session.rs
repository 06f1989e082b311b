//! Per-session and per-invocation state (spec.md §3). Grounded on the
//! teacher's `BackendManager` for the "owning struct holds the mutable
//! state, callers go through explicit methods" shape, generalized from one
//! process-wide manager to one instance per connected client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::model::CallableTool;

/// `X-MCP-*` header overrides captured at session start (spec.md §4.6).
#[derive(Debug, Clone, Default)]
pub struct HeaderOverrides {
    pub bouquet: Option<String>,
    pub mix: Vec<String>,
    pub gradio: Vec<String>,
}

/// A notification that the active catalogue changed; the transport layer
/// turns each receipt into one `notifications/tools/list_changed`.
pub struct CatalogueChanged;

/// Everything scoped to one connected client (spec.md §3 `SessionContext`).
pub struct SessionContext {
    pub session_id: String,
    pub client_name: Option<String>,
    pub client_version: Option<String>,
    /// Never logged in full; `Display`/`Debug` are intentionally not derived.
    bearer_token: Option<String>,
    pub header_overrides: HeaderOverrides,
    catalogue: std::sync::RwLock<HashMap<String, CallableTool>>,
    last_emitted_enabled: std::sync::RwLock<Vec<String>>,
    listener_tx: mpsc::Sender<CatalogueChanged>,
}

impl SessionContext {
    pub fn new(
        session_id: String,
        client_name: Option<String>,
        client_version: Option<String>,
        bearer_token: Option<String>,
        header_overrides: HeaderOverrides,
    ) -> (Arc<Self>, mpsc::Receiver<CatalogueChanged>) {
        // Bound 1: the producer never blocks on a slow consumer (spec.md §4.5);
        // a pending "changed" signal collapses duplicate notifications.
        let (tx, rx) = mpsc::channel(1);
        let session = Arc::new(Self {
            session_id,
            client_name,
            client_version,
            bearer_token,
            header_overrides,
            catalogue: std::sync::RwLock::new(HashMap::new()),
            last_emitted_enabled: std::sync::RwLock::new(Vec::new()),
            listener_tx: tx,
        });
        (session, rx)
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    pub fn catalogue_snapshot(&self) -> Vec<CallableTool> {
        self.catalogue
            .read()
            .expect("catalogue lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn lookup(&self, outward_name: &str) -> Option<CallableTool> {
        self.catalogue
            .read()
            .expect("catalogue lock poisoned")
            .get(outward_name)
            .cloned()
    }

    /// Replace the whole catalogue, then notify listeners iff the enabled
    /// outward-name set actually changed (spec.md §4.5, §8 invariant).
    pub fn replace_catalogue(&self, tools: Vec<CallableTool>) {
        let mut enabled: Vec<String> = tools
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.outward_name.clone())
            .collect();
        enabled.sort();

        {
            let mut map = self.catalogue.write().expect("catalogue lock poisoned");
            map.clear();
            for tool in tools {
                map.insert(tool.outward_name.clone(), tool);
            }
        }

        let changed = {
            let mut last = self
                .last_emitted_enabled
                .write()
                .expect("last-emitted lock poisoned");
            let changed = *last != enabled;
            *last = enabled;
            changed
        };

        if changed {
            // Non-blocking: a full channel means a change notification is
            // already pending, which is an equivalent outcome.
            let _ = self.listener_tx.try_send(CatalogueChanged);
        }
    }

    /// Enable or disable one tool by outward name; returns false if unknown.
    pub fn set_enabled(&self, outward_name: &str, enabled: bool) -> bool {
        let changed_enabled_set = {
            let mut map = self.catalogue.write().expect("catalogue lock poisoned");
            match map.get_mut(outward_name) {
                Some(tool) if tool.enabled != enabled => {
                    tool.enabled = enabled;
                    true
                }
                Some(_) => false,
                None => return false,
            }
        };

        if changed_enabled_set {
            let mut enabled_names: Vec<String> = self
                .catalogue
                .read()
                .expect("catalogue lock poisoned")
                .values()
                .filter(|t| t.enabled)
                .map(|t| t.outward_name.clone())
                .collect();
            enabled_names.sort();

            let mut last = self
                .last_emitted_enabled
                .write()
                .expect("last-emitted lock poisoned");
            if *last != enabled_names {
                *last = enabled_names;
                let _ = self.listener_tx.try_send(CatalogueChanged);
            }
        }
        true
    }
}

/// Per-call state (spec.md §3 `InvocationContext`). At most one upstream SSE
/// client is created per instance.
pub struct InvocationContext {
    pub outward_name: String,
    pub arguments: Value,
    pub progress_token: Option<Value>,
    cancelled: Arc<AtomicBool>,
    pub captured_headers: std::sync::Mutex<HashMap<String, String>>,
}

impl InvocationContext {
    pub fn new(outward_name: String, arguments: Value, progress_token: Option<Value>) -> Self {
        Self {
            outward_name,
            arguments,
            progress_token,
            cancelled: Arc::new(AtomicBool::new(false)),
            captured_headers: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn capture_header(&self, name: &str, value: &str) {
        self.captured_headers
            .lock()
            .expect("captured-headers lock poisoned")
            .insert(name.to_string(), value.to_string());
    }

    pub fn captured_headers_snapshot(&self) -> HashMap<String, String> {
        self.captured_headers
            .lock()
            .expect("captured-headers lock poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, enabled: bool) -> CallableTool {
        CallableTool {
            outward_name: name.to_string(),
            upstream: None,
            schema: json!({"type": "object", "properties": {}, "required": []}),
            enabled,
        }
    }

    #[test]
    fn replace_catalogue_notifies_only_on_enabled_set_change() {
        let (session, mut rx) = SessionContext::new(
            "s1".to_string(),
            None,
            None,
            None,
            HeaderOverrides::default(),
        );

        session.replace_catalogue(vec![tool("a", true)]);
        assert!(rx.try_recv().is_ok());

        // Same enabled set, different disabled tool added: no new notification.
        session.replace_catalogue(vec![tool("a", true), tool("b", false)]);
        assert!(rx.try_recv().is_err());

        // Enabling b changes the set: notifies.
        assert!(session.set_enabled("b", true));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn disabled_tool_not_invokable_by_lookup_alone() {
        let (session, _rx) = SessionContext::new(
            "s1".to_string(),
            None,
            None,
            None,
            HeaderOverrides::default(),
        );
        session.replace_catalogue(vec![tool("a", false)]);
        let looked_up = session.lookup("a").unwrap();
        assert!(!looked_up.enabled);
    }

    #[test]
    fn unknown_tool_enable_returns_false() {
        let (session, _rx) = SessionContext::new(
            "s1".to_string(),
            None,
            None,
            None,
            HeaderOverrides::default(),
        );
        assert!(!session.set_enabled("missing", true));
    }
}
