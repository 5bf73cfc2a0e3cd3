//! C4 — `BackendPolicy`: a pure function from (model id, config, registry)
//! to an ordered list of backend candidates.

use lmx_types::{ModelConfig, Outcome};

use crate::registry::CompatibilityRegistry;

/// Architecture signatures that are force-routed away from `vllm-mlx`
/// regardless of preference order.
const BLOCKED_VLLM_ARCHITECTURES: &[&str] = &["glm_moe_dsa"];

/// Default backend preference order when a model has no explicit override.
const DEFAULT_PREFERENCE: &[&str] = &["vllm-mlx", "mlx-lm"];

/// Normalize an architecture string for signature matching: lowercase,
/// non-alphanumeric runs collapsed to a single `_`, edges stripped.
fn normalize_architecture(raw: &str) -> String {
    let mut normalized = String::with_capacity(raw.len());
    let mut last_was_sep = false;
    for ch in raw.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            normalized.push(ch);
            last_was_sep = false;
        } else if !last_was_sep {
            normalized.push('_');
            last_was_sep = true;
        }
    }
    normalized.trim_matches('_').to_string()
}

fn is_gguf_model_id(model_id: &str) -> bool {
    let lower = model_id.to_lowercase();
    lower.ends_with(".gguf") || lower.contains("gguf")
}

/// Compute the ordered list of backend candidates for a model.
///
/// 1. A `.gguf`-suffixed or `gguf`-containing model id always routes to
///    `["gguf"]`, regardless of preference.
/// 2. Otherwise start from `config.backend_preference` (or the default
///    `["vllm-mlx", "mlx-lm"]`), drop unknown tags and any `gguf` entry,
///    and dedupe while preserving order.
/// 3. If GGUF fallback is enabled, append `"gguf"`.
/// 4. Unless `allow_failed`, drop any backend whose latest registry record
///    for this model is `fail`.
/// 5. If that filtering removed every candidate, fall back to the
///    pre-filter list — fail-open by design (see `SPEC_FULL.md` §9): we
///    prefer a likely-bad attempt over a hard 404.
pub async fn candidates(
    model_id: &str,
    config: &ModelConfig,
    registry: &CompatibilityRegistry,
    gguf_fallback_enabled: bool,
    allow_failed: bool,
) -> Vec<String> {
    if is_gguf_model_id(model_id) {
        return vec!["gguf".to_string()];
    }

    let preference: Vec<&str> = config
        .backend_preference
        .as_deref()
        .map(|v| v.iter().map(String::as_str).collect())
        .unwrap_or_else(|| DEFAULT_PREFERENCE.to_vec());

    let mut ordered: Vec<String> = Vec::new();
    for tag in preference {
        if tag.eq_ignore_ascii_case("gguf") {
            continue;
        }
        if !matches!(tag, "vllm-mlx" | "mlx-lm") {
            continue;
        }
        let owned = tag.to_string();
        if !ordered.contains(&owned) {
            ordered.push(owned);
        }
    }

    if gguf_fallback_enabled {
        ordered.push("gguf".to_string());
    }

    // Architecture-signature guard: certain architectures must never reach
    // vllm-mlx, independent of the registry's fail history.
    if let Some(architecture) = &config.architecture {
        let normalized = normalize_architecture(architecture);
        if BLOCKED_VLLM_ARCHITECTURES
            .iter()
            .any(|sig| normalized.contains(sig))
        {
            ordered.retain(|b| b != "vllm-mlx");
        }
    }

    if allow_failed {
        return ordered;
    }

    let mut filtered = Vec::with_capacity(ordered.len());
    for backend in &ordered {
        let latest = registry.latest(model_id, backend).await;
        let recently_failed = matches!(latest, Some(r) if r.outcome == Outcome::Fail);
        if !recently_failed {
            filtered.push(backend.clone());
        }
    }

    if filtered.is_empty() {
        ordered
    } else {
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> ModelConfig {
        ModelConfig::default()
    }

    #[tokio::test]
    async fn gguf_model_id_always_routes_to_gguf() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CompatibilityRegistry::open(dir.path().join("r.json")).await;
        let result = candidates(
            "path/model.gguf",
            &default_config(),
            &registry,
            false,
            false,
        )
        .await;
        assert_eq!(result, vec!["gguf".to_string()]);
    }

    #[tokio::test]
    async fn gguf_substring_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CompatibilityRegistry::open(dir.path().join("r.json")).await;
        let result = candidates("org/Some-GGUF-Quant", &default_config(), &registry, false, false).await;
        assert_eq!(result, vec!["gguf".to_string()]);
    }

    #[tokio::test]
    async fn failed_backend_is_dropped_leaving_the_other() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CompatibilityRegistry::open(dir.path().join("r.json")).await;
        registry
            .record(
                "model-a".to_string(),
                "vllm-mlx",
                "1.0",
                lmx_types::Outcome::Fail,
                Some("oom".into()),
            )
            .await;
        let result = candidates("model-a", &default_config(), &registry, false, false).await;
        assert_eq!(result, vec!["mlx-lm".to_string()]);
    }

    #[tokio::test]
    async fn fail_open_when_all_candidates_filtered_out() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CompatibilityRegistry::open(dir.path().join("r.json")).await;
        registry
            .record("model-a".to_string(), "vllm-mlx", "1.0", lmx_types::Outcome::Fail, None)
            .await;
        registry
            .record("model-a".to_string(), "mlx-lm", "1.0", lmx_types::Outcome::Fail, None)
            .await;
        let result = candidates("model-a", &default_config(), &registry, false, false).await;
        assert_eq!(result, vec!["vllm-mlx".to_string(), "mlx-lm".to_string()]);
    }

    #[tokio::test]
    async fn blocked_architecture_removes_vllm_mlx() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CompatibilityRegistry::open(dir.path().join("r.json")).await;
        let mut config = default_config();
        config.architecture = Some("GLM-MoE-DSA".to_string());
        let result = candidates("model-a", &config, &registry, false, true).await;
        assert_eq!(result, vec!["mlx-lm".to_string()]);
    }

    #[tokio::test]
    async fn gguf_fallback_appended_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CompatibilityRegistry::open(dir.path().join("r.json")).await;
        let result = candidates("model-a", &default_config(), &registry, true, true).await;
        assert_eq!(
            result,
            vec!["vllm-mlx".to_string(), "mlx-lm".to_string(), "gguf".to_string()]
        );
    }
}
