//! Stream credential resolution

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Close code sent when a stream credential is rejected
pub const REJECT_CODE: u16 = 4401;

/// An authenticated stream client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
}

/// Resolves a credential token to an enabled identity
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `None` for unknown or disabled tokens
    async fn resolve(&self, token: &str) -> Option<Identity>;
}

/// A configured API token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiToken {
    pub token: String,
    pub username: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Tokens fixed at startup
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, ApiToken>,
}

impl StaticTokens {
    pub fn new(tokens: impl IntoIterator<Item = ApiToken>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .filter(|t| !t.token.is_empty())
                .map(|t| (t.token.clone(), t))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityResolver for StaticTokens {
    async fn resolve(&self, token: &str) -> Option<Identity> {
        self.tokens
            .get(token)
            .filter(|t| t.enabled)
            .map(|t| Identity {
                username: t.username.clone(),
            })
    }
}

/// The stream was refused before any data was sent
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stream rejected ({code}): {reason}")]
pub struct SessionRejected {
    pub code: u16,
    pub reason: String,
}

impl SessionRejected {
    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        Self {
            code: REJECT_CODE,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> StaticTokens {
        StaticTokens::new(vec![
            ApiToken {
                token: "t-alice".to_string(),
                username: "alice".to_string(),
                enabled: true,
            },
            ApiToken {
                token: "t-bob".to_string(),
                username: "bob".to_string(),
                enabled: false,
            },
            ApiToken {
                token: String::new(),
                username: "nobody".to_string(),
                enabled: true,
            },
        ])
    }

    #[tokio::test]
    async fn test_resolves_enabled_token() {
        let identity = tokens().resolve("t-alice").await.unwrap();
        assert_eq!(identity.username, "alice");
    }

    #[tokio::test]
    async fn test_rejects_disabled_unknown_and_empty() {
        let tokens = tokens();
        assert_eq!(tokens.len(), 2);
        assert!(tokens.resolve("t-bob").await.is_none());
        assert!(tokens.resolve("t-mallory").await.is_none());
        assert!(tokens.resolve("").await.is_none());
    }

    #[test]
    fn test_rejection_code() {
        let rejected = SessionRejected::unauthenticated("invalid token");
        assert_eq!(rejected.code, 4401);
        assert!(rejected.to_string().contains("invalid token"));
    }
}
