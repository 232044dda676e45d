//! # Handler Traits
//!
//! The four handler capabilities, one per dispatch shape. A type implements
//! exactly the capability it is registered under; the registry classifies it
//! by the [`Candidate`](crate::registry::Candidate) constructor used.

use super::context::HandlerContext;
use super::interception::InterceptorKey;
use crate::messaging::{Outcome, Request};
use async_trait::async_trait;

/// Result of handler code. Business failures belong in the [`Outcome`];
/// an `Err` aborts the message.
pub type HandlerResult<T> = anyhow::Result<T>;

/// Blocking handler for a fire-and-forget request
///
/// # Example
///
/// ```rust,ignore
/// struct PingHandler;
///
/// impl SyncHandler for PingHandler {
///     type Request = Ping;
///     type Context = DispatchContext;
///
///     fn handle(&self, _request: &Ping, _context: &DispatchContext) -> HandlerResult<Outcome<()>> {
///         Ok(Outcome::done())
///     }
/// }
/// ```
pub trait SyncHandler: Send + Sync + 'static {
    type Request: Request<Response = ()>;
    type Context: HandlerContext;

    /// Handle one request
    ///
    /// # Arguments
    ///
    /// * `request` - The request as persisted by the bus
    /// * `context` - Per-dispatch context (transaction, trace, log writer)
    ///
    /// # Returns
    ///
    /// * `Ok(Outcome)` - Business result, possibly carrying warnings or errors
    /// * `Err` - Infrastructure or unexpected failure; the message is aborted
    fn handle(&self, request: &Self::Request, context: &Self::Context)
        -> HandlerResult<Outcome<()>>;

    /// Interceptor to run around [`handle`](Self::handle), if any
    fn interceptor() -> Option<InterceptorKey> {
        None
    }
}

/// Blocking handler for a request that produces a response
pub trait SyncResponseHandler: Send + Sync + 'static {
    type Request: Request;
    type Context: HandlerContext;

    /// Handle one request and produce its response. The bus persists the
    /// returned outcome as the response message before the call returns.
    fn handle(
        &self,
        request: &Self::Request,
        context: &Self::Context,
    ) -> HandlerResult<Outcome<<Self::Request as Request>::Response>>;

    fn interceptor() -> Option<InterceptorKey> {
        None
    }
}

/// Asynchronous handler for a fire-and-forget request
#[async_trait]
pub trait AsyncHandler: Send + Sync + 'static {
    type Request: Request<Response = ()>;
    type Context: HandlerContext;

    async fn handle(
        &self,
        request: &Self::Request,
        context: &Self::Context,
    ) -> HandlerResult<Outcome<()>>;

    fn interceptor() -> Option<InterceptorKey> {
        None
    }
}

/// Asynchronous handler for a request that produces a response
///
/// Cancellation observed while the handler runs is the handler's to honor;
/// see [`DispatchContext::cancellation`](super::DispatchContext::cancellation).
#[async_trait]
pub trait AsyncResponseHandler: Send + Sync + 'static {
    type Request: Request;
    type Context: HandlerContext;

    async fn handle(
        &self,
        request: &Self::Request,
        context: &Self::Context,
    ) -> HandlerResult<Outcome<<Self::Request as Request>::Response>>;

    fn interceptor() -> Option<InterceptorKey> {
        None
    }
}
