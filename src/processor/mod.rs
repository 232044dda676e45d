//! # Handler Processors
//!
//! One processor per dispatch shape. A processor resolves the handler for the
//! current dispatch scope, routes the call through the handler's interceptor
//! when one is declared, hands response-bearing outcomes to the response sink,
//! and records the message lifecycle around all of it.
//!
//! The four variants only differ in how they call the handler. Everything else
//! lives in [`guard`], in one blocking and one async helper:
//!
//! ```text
//! InProcess ──► resolve handler ──► [interceptor ──►] handler ──► save response
//!     │                                                              │
//!     └── error / panic ──► Aborted (own transaction) ──► re-raise   └──► Completed
//! ```

pub mod async_processors;
pub(crate) mod guard;
pub mod sync_processors;

pub use async_processors::{AsyncResponseProcessor, AsyncVoidProcessor};
pub use sync_processors::{SyncResponseProcessor, SyncVoidProcessor};

use crate::error::BusResult;
use crate::handlers::HandlerContext;
use crate::messaging::{Message, Outcome, Request};
use crate::registry::{HandlerRegistry, ServiceScope, Shape};
use async_trait::async_trait;
use std::sync::Arc;

/// Everything a processor needs for one call
pub struct Dispatch<'a, R: Request> {
    /// The request as decoded from its persisted payload
    pub request: &'a R,
    pub context: &'a dyn HandlerContext,
    pub scope: &'a ServiceScope,
    pub registry: &'a HandlerRegistry,
    pub responses: &'a dyn ResponseSink<R::Response>,
}

/// Persists the outcome of a response-bearing handler
#[async_trait]
pub trait ResponseSink<T: Message>: Send + Sync {
    fn save(&self, outcome: &Outcome<T>) -> BusResult<()>;

    async fn save_async(&self, outcome: &Outcome<T>) -> BusResult<()>;
}

#[async_trait]
pub trait Processor<R: Request>: Send + Sync {
    fn shape(&self) -> Shape;

    fn process(&self, dispatch: Dispatch<'_, R>) -> BusResult<Outcome<R::Response>>;

    async fn process_async(&self, dispatch: Dispatch<'_, R>) -> BusResult<Outcome<R::Response>>;
}

/// Builds the processor bound to request type `R`
pub type ProcessorFactory<R> = Arc<dyn Fn() -> Arc<dyn Processor<R>> + Send + Sync>;
