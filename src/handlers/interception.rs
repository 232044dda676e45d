//! # Interceptors
//!
//! An interceptor wraps a handler invocation. It receives the call metadata,
//! its own context and a one-shot continuation; calling the continuation runs
//! the handler and yields an opaque [`Completion`]. Because the continuation is
//! consumed on use, an interceptor cannot run the handler twice.
//!
//! A handler opts in by returning an [`InterceptorKey`] from its `interceptor()`
//! function. Synchronous handlers need an [`Interceptor`], asynchronous handlers
//! an [`AsyncInterceptor`].

use super::context::{downcast_context, HandlerContext};
use super::traits::HandlerResult;
use crate::messaging::{MessageId, MessageTypeId, Outcome, OutcomeStatus, TypeKey};
use crate::registry::Shape;
use anyhow::anyhow;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::any::Any;
use std::fmt;

/// Identity of an interceptor type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorKey(TypeKey);

impl InterceptorKey {
    pub fn of<I: 'static>() -> Self {
        Self(TypeKey::of::<I>())
    }

    pub fn type_key(&self) -> TypeKey {
        self.0
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }
}

impl fmt::Display for InterceptorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.name())
    }
}

/// Metadata of the intercepted handler call
#[derive(Debug, Clone)]
pub struct InterceptedCall {
    pub message_id: MessageId,
    pub message_type: MessageTypeId,
    pub request: &'static str,
    pub handler: &'static str,
    pub shape: Shape,
}

/// Result of the wrapped handler, opaque to the interceptor
pub struct Completion {
    status: OutcomeStatus,
    value: Box<dyn Any + Send>,
}

impl Completion {
    pub(crate) fn from_outcome<T: Send + 'static>(outcome: Outcome<T>) -> Self {
        Self {
            status: outcome.status(),
            value: Box::new(outcome),
        }
    }

    pub(crate) fn into_outcome<T: 'static>(self) -> Option<Outcome<T>> {
        self.value.downcast::<Outcome<T>>().ok().map(|outcome| *outcome)
    }

    /// Worst severity reported by the handler's outcome
    pub fn status(&self) -> OutcomeStatus {
        self.status
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// One-shot continuation that runs the wrapped handler
pub struct Proceed<'a> {
    run: Box<dyn FnOnce() -> HandlerResult<Completion> + 'a>,
}

impl<'a> Proceed<'a> {
    pub(crate) fn new(run: impl FnOnce() -> HandlerResult<Completion> + 'a) -> Self {
        Self { run: Box::new(run) }
    }

    pub fn run(self) -> HandlerResult<Completion> {
        (self.run)()
    }
}

/// One-shot continuation that runs the wrapped asynchronous handler
pub struct ProceedAsync<'a> {
    run: BoxFuture<'a, HandlerResult<Completion>>,
}

impl<'a> ProceedAsync<'a> {
    pub(crate) fn new(run: BoxFuture<'a, HandlerResult<Completion>>) -> Self {
        Self { run }
    }

    pub async fn run(self) -> HandlerResult<Completion> {
        self.run.await
    }
}

/// Wraps synchronous handlers
///
/// # Example
///
/// ```rust,ignore
/// struct Timing;
///
/// impl Interceptor for Timing {
///     type Context = DispatchContext;
///
///     fn intercept(
///         &self,
///         call: &InterceptedCall,
///         _context: &DispatchContext,
///         next: Proceed<'_>,
///     ) -> HandlerResult<Completion> {
///         let started = std::time::Instant::now();
///         let completion = next.run();
///         tracing::info!(handler = call.handler, elapsed_ms = started.elapsed().as_millis() as u64);
///         completion
///     }
/// }
/// ```
pub trait Interceptor: Send + Sync + 'static {
    type Context: HandlerContext;

    fn intercept(
        &self,
        call: &InterceptedCall,
        context: &Self::Context,
        next: Proceed<'_>,
    ) -> HandlerResult<Completion>;
}

/// Wraps asynchronous handlers
#[async_trait]
pub trait AsyncInterceptor: Send + Sync + 'static {
    type Context: HandlerContext;

    async fn intercept(
        &self,
        call: &InterceptedCall,
        context: &Self::Context,
        next: ProceedAsync<'_>,
    ) -> HandlerResult<Completion>;
}

/// Object-safe form of [`Interceptor`] used by the processors
pub(crate) trait DynInterceptor: Send + Sync {
    fn intercept_dyn(
        &self,
        call: &InterceptedCall,
        context: &dyn HandlerContext,
        next: Proceed<'_>,
    ) -> HandlerResult<Completion>;
}

impl<I: Interceptor> DynInterceptor for I {
    fn intercept_dyn(
        &self,
        call: &InterceptedCall,
        context: &dyn HandlerContext,
        next: Proceed<'_>,
    ) -> HandlerResult<Completion> {
        let context = interceptor_context::<I::Context>(context)?;
        self.intercept(call, context, next)
    }
}

/// Object-safe form of [`AsyncInterceptor`] used by the processors
pub(crate) trait DynAsyncInterceptor: Send + Sync {
    fn intercept_dyn<'a>(
        &'a self,
        call: &'a InterceptedCall,
        context: &'a dyn HandlerContext,
        next: ProceedAsync<'a>,
    ) -> BoxFuture<'a, HandlerResult<Completion>>;
}

impl<I: AsyncInterceptor> DynAsyncInterceptor for I {
    fn intercept_dyn<'a>(
        &'a self,
        call: &'a InterceptedCall,
        context: &'a dyn HandlerContext,
        next: ProceedAsync<'a>,
    ) -> BoxFuture<'a, HandlerResult<Completion>> {
        Box::pin(async move {
            let context = interceptor_context::<I::Context>(context)?;
            self.intercept(call, context, next).await
        })
    }
}

fn interceptor_context<C: HandlerContext>(context: &dyn HandlerContext) -> HandlerResult<&C> {
    downcast_context::<C>(context).ok_or_else(|| {
        anyhow!(
            "interceptor expects context {}, received {}",
            std::any::type_name::<C>(),
            context.context_name()
        )
    })
}
