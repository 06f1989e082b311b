use std::time::Duration;

/// Process-wide configuration, resolved entirely from environment variables.
///
/// There is no config file in this system (unlike the teacher's YAML-backed
/// `Config`): every knob here is an env var per the external-interfaces list.
#[derive(Debug, Clone)]
pub struct Config {
    /// `GRADIO_SPACE_CACHE_TTL` — metadata cache TTL, milliseconds. Default 5 min.
    pub space_cache_ttl: Duration,
    /// `GRADIO_SCHEMA_CACHE_TTL` — schema cache TTL, milliseconds. Default 5 min.
    pub schema_cache_ttl: Duration,
    /// `GRADIO_DISCOVERY_CONCURRENCY` — per-phase fetch concurrency cap. Default 10.
    pub discovery_concurrency: usize,
    /// `GRADIO_SPACE_INFO_TIMEOUT` — hub metadata fetch timeout, milliseconds. Default 5s.
    pub space_info_timeout: Duration,
    /// `GRADIO_SCHEMA_TIMEOUT` — upstream schema fetch timeout, milliseconds. Default 12s.
    pub schema_timeout: Duration,
    /// `NO_REPLICA_REWRITE` — presence disables the replica URL rewrite kill-switch.
    pub no_replica_rewrite: bool,
    /// `SEARCH_ENABLES_FETCH` — when true, enabling docs-search also enables docs-fetch.
    pub search_enables_fetch: bool,
    /// `DEFAULT_HF_TOKEN` — fallback bearer token used when no header token is present.
    pub default_hf_token: Option<String>,
    /// `GRADIO_TOOL_CALL_IDLE_TIMEOUT` — upstream bridge inactivity timeout,
    /// milliseconds; reset on every SSE event received. Default 30s.
    pub tool_call_idle_timeout: Duration,
}

fn env_duration_ms(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str) -> bool {
    std::env::var(key).is_ok()
}

impl Config {
    /// Resolve configuration from the process environment, with the spec's defaults.
    pub fn from_env() -> Self {
        Self {
            space_cache_ttl: env_duration_ms("GRADIO_SPACE_CACHE_TTL", Duration::from_secs(300)),
            schema_cache_ttl: env_duration_ms("GRADIO_SCHEMA_CACHE_TTL", Duration::from_secs(300)),
            discovery_concurrency: env_usize("GRADIO_DISCOVERY_CONCURRENCY", 10),
            space_info_timeout: env_duration_ms("GRADIO_SPACE_INFO_TIMEOUT", Duration::from_secs(5)),
            schema_timeout: env_duration_ms("GRADIO_SCHEMA_TIMEOUT", Duration::from_secs(12)),
            no_replica_rewrite: env_bool("NO_REPLICA_REWRITE"),
            search_enables_fetch: std::env::var("SEARCH_ENABLES_FETCH")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            default_hf_token: std::env::var("DEFAULT_HF_TOKEN").ok(),
            tool_call_idle_timeout: env_duration_ms(
                "GRADIO_TOOL_CALL_IDLE_TIMEOUT",
                Duration::from_secs(30),
            ),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            space_cache_ttl: Duration::from_secs(300),
            schema_cache_ttl: Duration::from_secs(300),
            discovery_concurrency: 10,
            space_info_timeout: Duration::from_secs(5),
            schema_timeout: Duration::from_secs(12),
            no_replica_rewrite: false,
            search_enables_fetch: false,
            default_hf_token: None,
            tool_call_idle_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.space_cache_ttl, Duration::from_secs(300));
        assert_eq!(c.schema_cache_ttl, Duration::from_secs(300));
        assert_eq!(c.discovery_concurrency, 10);
        assert_eq!(c.space_info_timeout, Duration::from_secs(5));
        assert_eq!(c.schema_timeout, Duration::from_secs(12));
        assert!(!c.no_replica_rewrite);
        assert!(!c.search_enables_fetch);
        assert!(c.default_hf_token.is_none());
    }
}
