//! Model name translation

use crate::registry::ProviderRecord;

/// Family keywords tried, in order, when there is no exact mapping.
const MODEL_KEYWORDS: &[&str] = &["haiku", "sonnet", "opus", "gpt-3.5", "gpt-4"];

/// Model identifier to send to `provider` for a client-requested model.
///
/// Precedence:
/// 1. exact key in `provider.models`
/// 2. first keyword that is a case-insensitive substring of the request and
///    also a key in `provider.models`
/// 3. `provider.default_model`
/// 4. the requested name unchanged
pub fn resolve_model(provider: &ProviderRecord, requested: &str) -> String {
    if let Some(mapped) = provider.models.get(requested) {
        return mapped.clone();
    }

    let lower = requested.to_lowercase();
    for keyword in MODEL_KEYWORDS {
        if lower.contains(keyword)
            && let Some(mapped) = provider.models.get(*keyword)
        {
            return mapped.clone();
        }
    }

    if let Some(default) = provider.default_model.as_deref().filter(|m| !m.is_empty()) {
        return default.to_string();
    }

    requested.to_string()
}
