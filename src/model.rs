use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

/// A stable identifier for a remote endpoint: `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpaceRef(String);

impl SpaceRef {
    /// Parse a `owner/name` ref. Rejects whitespace and anything but exactly one `/`.
    pub fn parse(raw: &str) -> Result<Self, SpaceRefError> {
        if raw.chars().any(char::is_whitespace) {
            return Err(SpaceRefError::Whitespace);
        }
        if raw.matches('/').count() != 1 {
            return Err(SpaceRefError::SlashCount(raw.matches('/').count()));
        }
        let (owner, name) = raw.split_once('/').expect("checked above");
        if owner.is_empty() || name.is_empty() {
            return Err(SpaceRefError::EmptyComponent);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpaceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SpaceRefError {
    #[error("space ref contains whitespace")]
    Whitespace,
    #[error("space ref must contain exactly one '/', found {0}")]
    SlashCount(usize),
    #[error("space ref has an empty owner or name component")]
    EmptyComponent,
}

/// Cached description of a remote endpoint.
#[derive(Debug, Clone)]
pub struct SpaceMetadata {
    pub r#ref: SpaceRef,
    pub subdomain: String,
    pub sdk: String,
    pub private: bool,
    pub emoji: Option<String>,
    pub title: Option<String>,
    pub runtime_stage: Option<String>,
    pub etag: Option<String>,
    pub fetched_at: Instant,
}

/// A single callable tool on an endpoint, as reported upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Cached list of tool descriptors for one endpoint.
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    pub r#ref: SpaceRef,
    pub tools: Vec<ToolDescriptor>,
    pub fetched_at: Instant,
}

/// The fully resolved upstream address and tool name backing a `CallableTool`.
#[derive(Debug, Clone)]
pub struct UpstreamTool {
    pub r#ref: SpaceRef,
    pub subdomain: String,
    pub tool_name: String,
}

/// An entry in the active per-session catalogue.
#[derive(Debug, Clone)]
pub struct CallableTool {
    pub outward_name: String,
    pub upstream: Option<UpstreamTool>,
    pub schema: Value,
    pub enabled: bool,
}

/// Build the outward name for a dynamic tool: `gr{index}_{name}`, with a `p`
/// marker inserted when the backing space is private (spec.md §3, §4.5).
pub fn outward_name(index: usize, upstream_name: &str, private: bool) -> String {
    if private {
        format!("gr{index}p_{upstream_name}")
    } else {
        format!("gr{index}_{upstream_name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_ref_valid() {
        assert!(SpaceRef::parse("owner/name").is_ok());
    }

    #[test]
    fn space_ref_rejects_whitespace() {
        assert_eq!(
            SpaceRef::parse("ow ner/name").unwrap_err(),
            SpaceRefError::Whitespace
        );
    }

    #[test]
    fn space_ref_rejects_wrong_slash_count() {
        assert_eq!(
            SpaceRef::parse("noslash").unwrap_err(),
            SpaceRefError::SlashCount(0)
        );
        assert_eq!(
            SpaceRef::parse("a/b/c").unwrap_err(),
            SpaceRefError::SlashCount(2)
        );
    }

    #[test]
    fn space_ref_rejects_empty_component() {
        assert_eq!(
            SpaceRef::parse("/name").unwrap_err(),
            SpaceRefError::EmptyComponent
        );
        assert_eq!(
            SpaceRef::parse("owner/").unwrap_err(),
            SpaceRefError::EmptyComponent
        );
    }

    #[test]
    fn outward_name_private_marker() {
        assert_eq!(outward_name(1, "generate", false), "gr1_generate");
        assert_eq!(outward_name(2, "generate", true), "gr2p_generate");
    }
}
