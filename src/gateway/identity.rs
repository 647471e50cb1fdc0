use std::future::Future;
use std::pin::Pin;

use crate::core::GatewayResult;

/// The account behind the connection, resolved once after the first READY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: u64,
    pub username: String,
    pub bot: bool,
}

pub type IdentityFuture<'a> = Pin<Box<dyn Future<Output = GatewayResult<CurrentUser>> + Send + 'a>>;

/// Authenticated request-response collaborator used to resolve "self" for `ignore_self`
/// filtering. An `AuthenticationFailed` error stops the client.
pub trait IdentityProvider: Send + Sync + 'static {
    fn fetch_current_identity(&self) -> IdentityFuture<'_>;
}

/// Provider for a caller that already knows its account.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub CurrentUser);

impl StaticIdentity {
    pub fn new(id: u64, username: impl Into<String>) -> Self {
        Self(CurrentUser {
            id,
            username: username.into(),
            bot: true,
        })
    }
}

impl IdentityProvider for StaticIdentity {
    fn fetch_current_identity(&self) -> IdentityFuture<'_> {
        let user = self.0.clone();
        Box::pin(async move { Ok(user) })
    }
}
