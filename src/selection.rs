//! Tool selection strategy (spec.md §4.6): resolves the active tool-ID set
//! for a session from headers, stored settings, and built-in presets, then
//! applies legacy normalization and the `gradio` endpoint merge. Grounded on
//! the teacher's `tools::discovery` module's style of small, pure,
//! independently-tested resolution functions over plain collections.

use std::collections::HashSet;

/// A named bundle of built-in tool IDs (spec.md §4.6 "bouquet"/"mix").
#[derive(Debug, Clone)]
pub struct Preset {
    pub name: String,
    pub tool_ids: Vec<String>,
}

/// Where the active user settings came from, recorded for observability
/// only — it does not change resolution behaviour (spec.md §4.6 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsSource {
    CallerSupplied,
    ServiceCatalogue,
}

#[derive(Debug, Clone)]
pub struct UserSettings {
    pub tool_ids: Vec<String>,
    pub source: SettingsSource,
}

#[derive(Debug, Clone, Default)]
pub struct SelectionInput<'a> {
    pub bouquet_header: Option<&'a str>,
    pub mix_header: &'a [String],
    pub gradio_header: &'a [String],
    pub known_bouquets: &'a [Preset],
    pub user_settings: Option<&'a UserSettings>,
    pub all_builtin_ids: &'a [String],
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub tool_ids: Vec<String>,
    pub gradio_endpoints: Vec<String>,
    pub legacy_rewrites: Vec<(String, String)>,
}

/// Resolve the active tool-ID set, highest-precedence rule first.
pub fn resolve(input: &SelectionInput<'_>) -> Selection {
    let base: Vec<String> = if let Some(bouquet_name) = input.bouquet_header {
        // 1. Bouquet override — replaces everything, ignores user settings.
        input
            .known_bouquets
            .iter()
            .find(|p| p.name == bouquet_name)
            .map(|p| p.tool_ids.clone())
            .unwrap_or_default()
    } else if !input.mix_header.is_empty() && input.user_settings.is_some() {
        // 2. Mix — union of base settings and named presets.
        let mut set: HashSet<String> = input
            .user_settings
            .map(|s| s.tool_ids.iter().cloned().collect())
            .unwrap_or_default();
        for mix_name in input.mix_header {
            if let Some(preset) = input.known_bouquets.iter().find(|p| &p.name == mix_name) {
                set.extend(preset.tool_ids.iter().cloned());
            }
        }
        set.into_iter().collect()
    } else if let Some(settings) = input.user_settings {
        // 3. User settings, as-is.
        settings.tool_ids.clone()
    } else {
        // 4. Fallback — every known built-in.
        input.all_builtin_ids.to_vec()
    };

    let (normalized, legacy_rewrites) = normalize_legacy_ids(&base);

    Selection {
        tool_ids: normalized,
        gradio_endpoints: input.gradio_header.to_vec(),
        legacy_rewrites,
    }
}

/// Collapse legacy search/detail aliases to their canonical ID. Non-aliased
/// IDs keep their original relative order; collapsed canonical IDs are
/// appended once each, in the order their first alias was seen (spec.md
/// §4.6, §8 scenario 5).
fn normalize_legacy_ids(ids: &[String]) -> (Vec<String>, Vec<(String, String)>) {
    const SEARCH_ALIASES: &[&str] = &["model_search", "dataset_search", "repo_search"];
    const DETAIL_ALIASES: &[&str] = &["model_detail", "dataset_detail"];
    const CANONICAL_SEARCH: &str = "hub_search";
    const CANONICAL_DETAIL: &str = "hub_inspect";

    let mut plain = Vec::with_capacity(ids.len());
    let mut canonical_order = Vec::new();
    let mut canonical_seen = HashSet::new();
    let mut rewrites = Vec::new();

    for id in ids {
        let canonical = if SEARCH_ALIASES.contains(&id.as_str()) {
            Some(CANONICAL_SEARCH)
        } else if DETAIL_ALIASES.contains(&id.as_str()) {
            Some(CANONICAL_DETAIL)
        } else {
            None
        };

        match canonical {
            Some(canonical) => {
                rewrites.push((id.clone(), canonical.to_string()));
                if canonical_seen.insert(canonical) {
                    canonical_order.push(canonical.to_string());
                }
            }
            None => {
                if !plain.contains(id) {
                    plain.push(id.clone());
                }
            }
        }
    }

    plain.extend(canonical_order);
    (plain, rewrites)
}

/// Add docs-fetch whenever docs-search is present and fetch is missing
/// (spec.md §4.6 "search-enables-fetch", gated by config).
pub fn apply_search_enables_fetch(
    mut tool_ids: Vec<String>,
    enabled: bool,
    search_id: &str,
    fetch_id: &str,
) -> Vec<String> {
    if enabled && tool_ids.iter().any(|id| id == search_id) && !tool_ids.iter().any(|id| id == fetch_id) {
        tool_ids.push(fetch_id.to_string());
    }
    tool_ids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preset(name: &str, ids: &[&str]) -> Preset {
        Preset {
            name: name.to_string(),
            tool_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn bouquet_overrides_user_settings() {
        let bouquets = vec![preset("media", &["generate_image"])];
        let settings = UserSettings {
            tool_ids: vec!["hub_search".to_string()],
            source: SettingsSource::CallerSupplied,
        };
        let input = SelectionInput {
            bouquet_header: Some("media"),
            known_bouquets: &bouquets,
            user_settings: Some(&settings),
            all_builtin_ids: &[],
            ..Default::default()
        };
        let resolved = resolve(&input);
        assert_eq!(resolved.tool_ids, vec!["generate_image".to_string()]);
    }

    #[test]
    fn mix_unions_with_base_settings() {
        let bouquets = vec![preset("extra", &["generate_image"])];
        let settings = UserSettings {
            tool_ids: vec!["hub_search".to_string()],
            source: SettingsSource::CallerSupplied,
        };
        let mix = vec!["extra".to_string()];
        let input = SelectionInput {
            mix_header: &mix,
            known_bouquets: &bouquets,
            user_settings: Some(&settings),
            all_builtin_ids: &[],
            ..Default::default()
        };
        let mut resolved = resolve(&input).tool_ids;
        resolved.sort();
        assert_eq!(
            resolved,
            vec!["generate_image".to_string(), "hub_search".to_string()]
        );
    }

    #[test]
    fn fallback_enables_all_builtins() {
        let builtins = vec!["hub_search".to_string(), "hub_inspect".to_string()];
        let input = SelectionInput {
            all_builtin_ids: &builtins,
            ..Default::default()
        };
        assert_eq!(resolve(&input).tool_ids, builtins);
    }

    #[test]
    fn legacy_aliases_collapse_preserving_first_occurrence() {
        let ids = vec![
            "model_search".to_string(),
            "repo_search".to_string(),
            "dataset_search".to_string(),
        ];
        let (normalized, _) = normalize_legacy_ids(&ids);
        assert_eq!(normalized, vec!["hub_search".to_string()]);

        let ids2 = vec![
            "model_detail".to_string(),
            "custom_flag".to_string(),
            "dataset_detail".to_string(),
        ];
        let (normalized2, _) = normalize_legacy_ids(&ids2);
        assert_eq!(
            normalized2,
            vec!["custom_flag".to_string(), "hub_inspect".to_string()]
        );
    }

    #[test]
    fn search_enables_fetch_only_when_configured() {
        let ids = vec!["docs_search".to_string()];
        let with_fetch =
            apply_search_enables_fetch(ids.clone(), true, "docs_search", "docs_fetch");
        assert!(with_fetch.contains(&"docs_fetch".to_string()));

        let without_fetch = apply_search_enables_fetch(ids, false, "docs_search", "docs_fetch");
        assert!(!without_fetch.contains(&"docs_fetch".to_string()));
    }

    #[test]
    fn gradio_header_endpoints_are_carried_through() {
        let gradio = vec!["owner/space".to_string()];
        let input = SelectionInput {
            gradio_header: &gradio,
            all_builtin_ids: &[],
            ..Default::default()
        };
        assert_eq!(resolve(&input).gradio_endpoints, gradio);
    }
}
