use axum::http::HeaderMap;

// HTTP helpers
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// Key masking for logs
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let start: String = chars[..4].iter().collect();
    let end: String = chars[chars.len() - 4..].iter().collect();
    format!("{}****{}", start, end)
}

/// Upstream error text for logs: the JSON `error.message` when present, else the raw body, clipped.
pub fn upstream_error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body).ok().and_then(|v| {
        let err = v.get("error")?;
        err.get("message")
            .and_then(|m| m.as_str())
            .or_else(|| err.as_str())
            .map(|s| s.to_string())
    });
    let msg = from_json.unwrap_or_else(|| body.trim().to_string());
    if msg.chars().count() > 500 {
        msg.chars().take(500).collect()
    } else {
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_parsing() {
        let mut h = HeaderMap::new();
        assert_eq!(bearer_token(&h), None);
        h.insert("authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&h).as_deref(), Some("abc123"));
        h.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&h), None);
        h.insert("authorization", HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&h), None);
    }

    #[test]
    fn masks_keys() {
        assert_eq!(mask_key("short"), "****");
        assert_eq!(mask_key("sk-abcdefghijkl"), "sk-a****ijkl");
    }

    #[test]
    fn extracts_provider_error_message() {
        let openai = r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#;
        assert_eq!(upstream_error_message(openai), "Rate limit reached");
        let anthropic = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert_eq!(upstream_error_message(anthropic), "Overloaded");
        let openrouter = r#"{"error":"bad gateway"}"#;
        assert_eq!(upstream_error_message(openrouter), "bad gateway");
        assert_eq!(upstream_error_message("  plain text  "), "plain text");
    }
}
