use async_trait::async_trait;

use crate::error::Result;
use crate::storage::AccountId;

/// Name of the browser session cookie.
pub const SESSION_COOKIE: &str = "session";

/// Resolves a browser session token to the signed-in account.
///
/// Implement this over whatever issues your web sessions. Returning
/// `Ok(None)` means the token is unknown or expired.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Option<AccountId>>;
}

/// Resolver for deployments without browser sessions. Rejects every token.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSessions;

#[async_trait]
impl SessionResolver for NoSessions {
    async fn resolve(&self, _token: &str) -> Result<Option<AccountId>> {
        Ok(None)
    }
}
