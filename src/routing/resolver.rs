use crate::config::ProviderKind;

/// Model id split into the provider that serves it and the id sent upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub kind: ProviderKind,
    pub upstream_model: String,
}

#[derive(Debug, Clone, Copy)]
enum Rule {
    /// Namespace prefix removed before dispatch.
    StripPrefix(&'static str),
    /// Any vendor-namespaced id (`vendor/model`).
    Namespaced,
    Contains(&'static str),
    /// Leading model family, e.g. `o3` matches `o3` and `o3-mini` but not `foo3`.
    Family(&'static str),
}

impl Rule {
    fn apply(&self, model: &str) -> Option<String> {
        let lower = model.to_ascii_lowercase();
        match *self {
            Rule::StripPrefix(p) => lower
                .starts_with(p)
                .then(|| model[p.len()..].to_string()),
            Rule::Namespaced => model.contains('/').then(|| model.to_string()),
            Rule::Contains(needle) => lower.contains(needle).then(|| model.to_string()),
            Rule::Family(f) => {
                let hit = lower
                    .strip_prefix(f)
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('-'));
                hit.then(|| model.to_string())
            }
        }
    }
}

// Ordered; the first matching rule decides. Adding a provider family means adding a row here and a
// `ProviderKind` variant, which the registry's exhaustive match then forces to be wired up.
const RULES: &[(Rule, ProviderKind)] = &[
    (Rule::StripPrefix("openrouter/"), ProviderKind::OpenRouter),
    (Rule::Namespaced, ProviderKind::OpenRouter),
    (Rule::Contains("claude"), ProviderKind::Anthropic),
    (Rule::Contains("gpt-"), ProviderKind::OpenAI),
    (Rule::Contains("chatgpt"), ProviderKind::OpenAI),
    (Rule::Family("o1"), ProviderKind::OpenAI),
    (Rule::Family("o3"), ProviderKind::OpenAI),
    (Rule::Family("o4"), ProviderKind::OpenAI),
    (Rule::Contains("gemini"), ProviderKind::Google),
    (Rule::Contains("gemma"), ProviderKind::Google),
];

/// Total mapping `model -> ProviderKind`; unknown ids fall back to the configured default.
#[derive(Debug, Clone, Copy)]
pub struct ProviderResolver {
    default_kind: ProviderKind,
}

impl ProviderResolver {
    pub fn new(default_kind: ProviderKind) -> Self {
        Self { default_kind }
    }

    pub fn resolve(&self, model: &str) -> ResolvedModel {
        let model = model.trim();
        RULES
            .iter()
            .find_map(|(rule, kind)| {
                rule.apply(model).map(|upstream_model| ResolvedModel {
                    kind: *kind,
                    upstream_model,
                })
            })
            .unwrap_or_else(|| ResolvedModel {
                kind: self.default_kind,
                upstream_model: model.to_string(),
            })
    }
}
