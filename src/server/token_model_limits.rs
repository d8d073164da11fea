//! Output-token ceilings per model and mode.
//!
//! Both tables are keyed by canonical model id (see [`canonical_model_id`]); dated snapshots,
//! `-latest` aliases and aggregator namespaces all collapse onto one row.

/// Used when a model has no row and extended thinking is off.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
/// Floor for extended thinking, and ceiling for models with no row.
pub const GLOBAL_EXTENDED_DEFAULT: u32 = 32_768;
/// Room left for the visible answer on top of the thinking budget.
pub const THINKING_OVERHEAD_TOKENS: u32 = 2048;

// (canonical id, normal ceiling, extended ceiling)
const MODEL_LIMITS: &[(&str, u32, u32)] = &[
    ("gpt-5", 16_384, 128_000),
    ("gpt-5-mini", 16_384, 128_000),
    ("gpt-5-nano", 16_384, 128_000),
    ("gpt-4.1", 16_384, 32_768),
    ("gpt-4.1-mini", 16_384, 32_768),
    ("gpt-4o", 16_384, 16_384),
    ("gpt-4o-mini", 16_384, 16_384),
    ("o1", 16_384, 100_000),
    ("o3", 16_384, 100_000),
    ("o3-mini", 16_384, 100_000),
    ("o4-mini", 16_384, 100_000),
    ("claude-opus-4-1", 8192, 32_000),
    ("claude-opus-4", 8192, 32_000),
    ("claude-sonnet-4-5", 8192, 64_000),
    ("claude-sonnet-4", 8192, 64_000),
    ("claude-3-7-sonnet", 8192, 64_000),
    ("claude-3-5-sonnet", 8192, 8192),
    ("claude-3-5-haiku", 8192, 8192),
    ("gemini-2.5-pro", 8192, 65_536),
    ("gemini-2.5-flash", 8192, 65_536),
    ("gemini-2.0-flash", 8192, 8192),
    ("deepseek-r1", 8192, 32_768),
    ("llama-3.3-70b-instruct", 4096, 4096),
];

fn lookup(model: &str) -> Option<(u32, u32)> {
    let id = canonical_model_id(model);
    MODEL_LIMITS
        .iter()
        .find(|(k, _, _)| *k == id)
        .map(|(_, normal, extended)| (*normal, *extended))
}

fn strip_date_suffix(id: &str) -> &str {
    let bytes = id.as_bytes();
    let all_digits = |s: &[u8]| s.iter().all(u8::is_ascii_digit);
    // -YYYYMMDD
    if bytes.len() > 9 && bytes[bytes.len() - 9] == b'-' && all_digits(&bytes[bytes.len() - 8..]) {
        return &id[..id.len() - 9];
    }
    // -YYYY-MM-DD
    if bytes.len() > 11 {
        let tail = &bytes[bytes.len() - 11..];
        if tail[0] == b'-'
            && tail[5] == b'-'
            && tail[8] == b'-'
            && all_digits(&tail[1..5])
            && all_digits(&tail[6..8])
            && all_digits(&tail[9..11])
        {
            return &id[..id.len() - 11];
        }
    }
    id
}

/// Collapse aliases onto the canonical table key.
///
/// - lower-case, vendor namespace dropped (`anthropic/claude-opus-4.1` -> `claude-opus-4.1`)
/// - variant suffix after `:` dropped (`:online`, `:free`)
/// - `-latest` and trailing release dates dropped
/// - Claude version dots become dashes (`claude-opus-4.1` -> `claude-opus-4-1`)
pub fn canonical_model_id(model: &str) -> String {
    let lower = model.trim().to_ascii_lowercase();
    let base = lower.rsplit('/').next().unwrap_or(&lower);
    let base = base.split(':').next().unwrap_or(base);
    let base = base.strip_suffix("-latest").unwrap_or(base);
    let base = strip_date_suffix(base);
    if base.starts_with("claude") {
        base.replace('.', "-")
    } else {
        base.to_string()
    }
}

/// The ceiling for a model in a mode, independent of any requested budget.
pub fn model_ceiling(model: &str, extended_thinking: bool) -> u32 {
    match (lookup(model), extended_thinking) {
        (Some((normal, _)), false) => normal,
        (Some((_, extended)), true) => extended,
        (None, false) => DEFAULT_MAX_TOKENS,
        (None, true) => GLOBAL_EXTENDED_DEFAULT,
    }
}

/// Resolved `max_tokens` for one request.
///
/// With extended thinking the requested budget plus overhead is raised to at least
/// [`GLOBAL_EXTENDED_DEFAULT`] and then capped by the model's extended ceiling.
pub fn resolve_max_tokens(model: &str, extended_thinking: bool, thinking_budget_tokens: u32) -> u32 {
    if !extended_thinking {
        return model_ceiling(model, false);
    }
    let requested = thinking_budget_tokens.saturating_add(THINKING_OVERHEAD_TOKENS);
    let target = requested.max(GLOBAL_EXTENDED_DEFAULT);
    target.min(model_ceiling(model, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_thinking_caps_at_model_ceiling() {
        assert_eq!(resolve_max_tokens("claude-opus-4-1", true, 4096), 32_000);
        assert_eq!(resolve_max_tokens("claude-opus-4-1-20250805", true, 4096), 32_000);
    }

    #[test]
    fn larger_budget_helps_up_to_ceiling() {
        assert_eq!(resolve_max_tokens("gpt-5", true, 4096), GLOBAL_EXTENDED_DEFAULT);
        assert_eq!(resolve_max_tokens("gpt-5", true, 60_000), 62_048);
        assert_eq!(resolve_max_tokens("gpt-5", true, 500_000), 128_000);
    }

    #[test]
    fn normal_mode_uses_table_or_default() {
        assert_eq!(resolve_max_tokens("gpt-4o", false, 0), 16_384);
        assert_eq!(resolve_max_tokens("claude-sonnet-4-5", false, 99_999), 8192);
        assert_eq!(resolve_max_tokens("unknown-model", false, 0), DEFAULT_MAX_TOKENS);
        assert_eq!(resolve_max_tokens("unknown-model", true, 0), GLOBAL_EXTENDED_DEFAULT);
    }

    #[test]
    fn aliases_collapse() {
        assert_eq!(canonical_model_id("claude-3-5-sonnet-20241022"), "claude-3-5-sonnet");
        assert_eq!(canonical_model_id("claude-3-5-sonnet-latest"), "claude-3-5-sonnet");
        assert_eq!(canonical_model_id("anthropic/claude-opus-4.1"), "claude-opus-4-1");
        assert_eq!(canonical_model_id("gpt-4.1-2025-04-14"), "gpt-4.1");
        assert_eq!(canonical_model_id("GPT-5"), "gpt-5");
        assert_eq!(
            canonical_model_id("openrouter/meta-llama/llama-3.3-70b-instruct:free"),
            "llama-3.3-70b-instruct"
        );
        assert_eq!(canonical_model_id("gemini-2.5-pro"), "gemini-2.5-pro");
    }

    #[test]
    fn non_reasoning_models_keep_low_ceiling() {
        assert_eq!(model_ceiling("gpt-4o", true), model_ceiling("gpt-4o", false));
        assert_eq!(resolve_max_tokens("claude-3-5-haiku", true, 30_000), 8192);
    }

    #[test]
    fn never_exceeds_ceiling_for_any_table_row() {
        for (model, _, _) in MODEL_LIMITS {
            for extended in [false, true] {
                for budget in [0, 1024, 4096, 31_000, 64_000, 200_000, u32::MAX] {
                    let got = resolve_max_tokens(model, extended, budget);
                    assert!(got <= model_ceiling(model, extended), "{model} {extended} {budget}");
                }
            }
        }
    }
}
