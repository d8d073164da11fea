use async_trait::async_trait;
use axum::http::HeaderMap;
use std::collections::HashMap;

use crate::config::AuthToken;
use crate::server::util::bearer_token;

/// Pre-authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: String,
    pub professional_role: Option<String>,
}

// 认证解析器：缺失主体时整个请求以 401 结束
#[async_trait]
pub trait AuthResolver: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> Option<Principal>;
}

/// Bearer tokens from `[[auth.tokens]]`.
pub struct StaticTokenAuth {
    tokens: HashMap<String, Principal>,
}

impl StaticTokenAuth {
    pub fn new(tokens: &[AuthToken]) -> Self {
        let tokens = tokens
            .iter()
            .filter(|t| !t.token.trim().is_empty())
            .map(|t| {
                (
                    t.token.clone(),
                    Principal {
                        user_id: t.user_id.clone(),
                        role: t.role.clone(),
                        professional_role: t.professional_role.clone(),
                    },
                )
            })
            .collect();
        Self { tokens }
    }
}

#[async_trait]
impl AuthResolver for StaticTokenAuth {
    async fn resolve(&self, headers: &HeaderMap) -> Option<Principal> {
        let token = bearer_token(headers)?;
        self.tokens.get(&token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn resolves_configured_tokens_only() {
        let auth = StaticTokenAuth::new(&[AuthToken {
            token: "tok-1".into(),
            user_id: "u-1".into(),
            role: "admin".into(),
            professional_role: Some("physician".into()),
        }]);

        let mut h = HeaderMap::new();
        assert!(auth.resolve(&h).await.is_none());

        h.insert("authorization", HeaderValue::from_static("Bearer tok-2"));
        assert!(auth.resolve(&h).await.is_none());

        h.insert("authorization", HeaderValue::from_static("Bearer tok-1"));
        let p = auth.resolve(&h).await.unwrap();
        assert_eq!(p.user_id, "u-1");
        assert_eq!(p.professional_role.as_deref(), Some("physician"));
    }
}
