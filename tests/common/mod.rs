use tradectl::broker::{AuthManager, TokenIssuer};
use tradectl::domain::errors::AuthError;

/// Issues a fixed token without touching the network, the same role the
/// teacher's mock execution services play for `ExecutionService`.
pub struct StubIssuer;

#[async_trait::async_trait]
impl TokenIssuer for StubIssuer {
    async fn issue_token(&self, _api_key: &str, _api_secret: &str) -> Result<String, AuthError> {
        Ok("test-token".to_string())
    }
}

pub fn auth_manager() -> AuthManager {
    AuthManager::new(Some("key".to_string()), Some("secret".to_string()), Box::new(StubIssuer)).unwrap()
}
