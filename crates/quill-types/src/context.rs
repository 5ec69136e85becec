//! Request-scoped cancellation carried through every collaborator call.

use std::future::Future;

use tokio_util::sync::CancellationToken;

/// The request was cancelled before the operation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("request cancelled")]
pub struct Cancelled;

/// Request context passed to the sequencer and from there to storage, the
/// signer and the quota manager.
///
/// Cloning shares the underlying token; [`RequestContext::child`] derives a
/// context that is cancelled with its parent but can also be cancelled alone.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
}

impl RequestContext {
    /// A fresh, uncancelled context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a child context.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Cancel this context and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail fast if the context is already cancelled.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.token.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Drive `fut` to completion unless the context is cancelled first.
    ///
    /// On cancellation `fut` is dropped without being polled again.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Cancelled),
            out = fut => Ok(out),
        }
    }
}
