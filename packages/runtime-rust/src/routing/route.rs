//! The processor abstraction a fan-out dispatches to.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use gather_core::Message;
use tokio_util::sync::CancellationToken;

/// Failure reported by one route.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// The route rejected or failed to process the message.
    #[error("route failed: {reason}")]
    Failed { reason: String },
    /// The route observed cancellation and stopped.
    #[error("route cancelled")]
    Cancelled,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RouteError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// A processor that turns one message into one result message.
///
/// Routes receive a [`CancellationToken`] that fires when the fan-out hits
/// its deadline or fails fast. Long-running routes should watch it and
/// return [`RouteError::Cancelled`].
#[async_trait]
pub trait Route: Send + Sync {
    /// Name used in logs and failure reports.
    fn name(&self) -> &str;

    async fn process(
        &self,
        message: Message,
        cancel: CancellationToken,
    ) -> Result<Message, RouteError>;
}

/// Route backed by an async closure.
pub struct FnRoute<F> {
    name: String,
    f: F,
}

impl<F> FnRoute<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> Route for FnRoute<F>
where
    F: Fn(Message, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Message, RouteError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        message: Message,
        cancel: CancellationToken,
    ) -> Result<Message, RouteError> {
        (self.f)(message, cancel).await
    }
}

/// Wraps an async closure as a shareable route.
pub fn route_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Route>
where
    F: Fn(Message, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Message, RouteError>> + Send + 'static,
{
    Arc::new(FnRoute::new(name, f))
}
