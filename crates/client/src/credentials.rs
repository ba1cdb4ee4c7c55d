//! Credential provider seam.

use larder_core::Token;

/// Supplies the bearer token for an operation.
///
/// The transfer engine asks once per push or pull and attaches the result to
/// every request of that operation. Minting and refreshing tokens is the
/// provider's business.
pub trait CredentialProvider: Send + Sync {
    /// The token to use right now, if any.
    fn current_token(&self) -> Option<Token>;

    /// Whether `token` should be considered expired.
    fn is_expired(&self, token: &Token) -> bool {
        token.is_expired()
    }
}

/// A provider holding one fixed token (or none).
#[derive(Clone, Debug, Default)]
pub struct StaticCredentials {
    token: Option<Token>,
}

impl StaticCredentials {
    pub fn new(token: Token) -> Self {
        Self { token: Some(token) }
    }

    /// No token at all. Operations against an authenticated backend will fail.
    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl From<Option<String>> for StaticCredentials {
    fn from(secret: Option<String>) -> Self {
        Self {
            token: secret.map(Token::new),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn current_token(&self) -> Option<Token> {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Duration, OffsetDateTime};

    #[test]
    fn test_static_credentials() {
        let provider = StaticCredentials::from(Some("abc".to_string()));
        let token = provider.current_token().unwrap();
        assert_eq!(token.secret(), "abc");
        assert!(!provider.is_expired(&token));

        assert!(StaticCredentials::anonymous().current_token().is_none());
    }

    #[test]
    fn test_default_expiry_check_uses_token() {
        let provider = StaticCredentials::anonymous();
        let stale = Token::with_expiry("x", OffsetDateTime::now_utc() - Duration::hours(1));
        assert!(provider.is_expired(&stale));
    }
}
