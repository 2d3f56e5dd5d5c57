//! Credential source consulted on every (re)connect attempt.

use std::sync::{Arc, RwLock};

/// Supplies the credential attached to the connection URL.
pub trait AuthProvider: Send + Sync + 'static {
    /// Current credential, if any.
    fn token(&self) -> Option<String>;

    /// Whether the token should be presented at all.
    fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }
}

/// Fixed credential, or none.
#[derive(Debug, Clone, Default)]
pub struct StaticAuth {
    token: Option<String>,
}

impl StaticAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()).filter(|t: &String| !t.is_empty()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn from_option(token: Option<String>) -> Self {
        token.map(Self::new).unwrap_or_default()
    }
}

impl AuthProvider for StaticAuth {
    fn token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Credential that can be replaced at runtime (login, refresh, logout).
/// The next connect attempt picks up the new value.
#[derive(Debug, Clone, Default)]
pub struct SharedToken {
    token: Arc<RwLock<Option<String>>>,
}

impl SharedToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(|p| p.into_inner()) = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

impl AuthProvider for SharedToken {
    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_auth() {
        assert_eq!(StaticAuth::new("abc").token().as_deref(), Some("abc"));
        assert!(StaticAuth::new("abc").is_authenticated());
        assert!(!StaticAuth::new("").is_authenticated());
        assert!(!StaticAuth::anonymous().is_authenticated());
        assert!(StaticAuth::from_option(None).token().is_none());
    }

    #[test]
    fn test_shared_token_updates() {
        let auth = SharedToken::new();
        let view = auth.clone();
        assert!(!view.is_authenticated());

        auth.set("t1");
        assert_eq!(view.token().as_deref(), Some("t1"));

        auth.clear();
        assert!(view.token().is_none());
    }
}
