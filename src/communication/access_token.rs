use std::{future::Future, sync::Arc};

use async_trait::async_trait;

use crate::error::HubError;

/// Supplies the bearer token for outgoing requests.
///
/// It is asked again before every negotiate, connect, poll and send, so a provider
/// that rotates tokens is honored without reconnecting.
#[async_trait]
pub trait AccessTokenFactory: Send + Sync {
    async fn access_token(&self) -> Result<Option<String>, HubError>;
}

/// Always yields the same token. Used for the token a negotiate redirect hands out.
#[derive(Debug, Clone)]
pub struct StaticAccessToken(pub String);

#[async_trait]
impl AccessTokenFactory for StaticAccessToken {
    async fn access_token(&self) -> Result<Option<String>, HubError> {
        Ok(Some(self.0.clone()))
    }
}

struct FnAccessToken<F>(F);

#[async_trait]
impl<F, Fut> AccessTokenFactory for FnAccessToken<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<String>, HubError>> + Send,
{
    async fn access_token(&self) -> Result<Option<String>, HubError> {
        (self.0)().await
    }
}

/// Wraps an async closure as an [`AccessTokenFactory`].
///
/// ```ignore
/// let factory = access_token_fn(|| async { Ok(Some(fetch_token().await)) });
/// ```
pub fn access_token_fn<F, Fut>(factory: F) -> Arc<dyn AccessTokenFactory>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<String>, HubError>> + Send + 'static,
{
    Arc::new(FnAccessToken(factory))
}

pub(crate) async fn resolve_token(factory: Option<&Arc<dyn AccessTokenFactory>>) -> Result<Option<String>, HubError> {
    match factory {
        Some(factory) => factory.access_token().await,
        None => Ok(None),
    }
}
