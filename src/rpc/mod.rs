//! Reasoning-backend RPC client.
//!
//! The backend is a separate process listening on a Unix domain socket and
//! speaking newline-delimited JSON envelopes. [`client::BackendClient`]
//! owns the shared connection; [`Reasoner`] is the seam the orchestrator
//! loops depend on so they can be driven by fakes in tests.

pub mod client;
pub mod codec;
pub mod envelope;
pub mod extract;
pub mod fallback;

use std::future::Future;
use std::pin::Pin;

use crate::Result;

/// Boxed future returned by [`Reasoner`] methods.
pub type ReasonerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Text-in, text-out access to the reasoning backend.
pub trait Reasoner: Send + Sync {
    /// Send `content` under `intent` and return the extracted reply text.
    ///
    /// # Errors
    ///
    /// Transport failures satisfy [`crate::AppError::is_transport`]; a
    /// backend `error` envelope surfaces as `AppError::Backend`.
    fn query<'a>(&'a self, content: &'a str, intent: &'a str) -> ReasonerFuture<'a, String>;

    /// Compute an embedding vector for `content`.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Reasoner::query`], plus `AppError::Protocol`
    /// when the payload is not a numeric array.
    fn embed<'a>(&'a self, content: &'a str) -> ReasonerFuture<'a, Vec<f64>>;
}
