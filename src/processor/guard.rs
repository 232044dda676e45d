//! Shared invocation path of the four processors.
//!
//! Lifecycle entries, the abort included, go into the dispatch transaction.
//! Keeping a failure on record past a rollback is the bus's job.

use super::Dispatch;
use crate::error::{BusError, BusResult};
use crate::handlers::{
    downcast_context, Completion, DispatchContext, DynAsyncInterceptor, DynInterceptor,
    HandlerContext, HandlerResult, InterceptedCall, InterceptorKey, Proceed, ProceedAsync,
};
use crate::messaging::{Outcome, Request};
use crate::registry::{HandlerRegistry, InterceptorResolver, ServiceScope, Shape};
use crate::state_machine::MessageStatus;
use crate::storage::LogPayload;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::{type_name, Any};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Run a blocking handler, with or without its interceptor
pub(crate) fn run_sync<R, H, C, F>(
    shape: Shape,
    dispatch: &Dispatch<'_, R>,
    interceptor: Option<InterceptorKey>,
    invoke: F,
) -> BusResult<Outcome<R::Response>>
where
    R: Request,
    H: Send + Sync + 'static,
    C: HandlerContext,
    F: FnOnce(&H, &R, &C) -> HandlerResult<Outcome<R::Response>>,
{
    let call = call_metadata::<R, H>(shape, dispatch.context);
    guarded(&call, dispatch.context, || {
        let handler = resolve_handler::<H>(dispatch.scope, &call)?;
        let context = handler_context::<C>(dispatch.context)?;

        let outcome = match interceptor {
            None => invoke(handler.as_ref(), dispatch.request, context)
                .map_err(|e| BusError::handler(call.handler, e))?,
            Some(key) => {
                let interceptor =
                    resolve_sync_interceptor(dispatch.registry, dispatch.scope, key, &call)?;
                let proceed = Proceed::new(|| {
                    invoke(handler.as_ref(), dispatch.request, context).map(Completion::from_outcome)
                });
                let completion = interceptor
                    .intercept_dyn(&call, dispatch.context, proceed)
                    .map_err(|e| BusError::handler(call.handler, e))?;
                unwrap_completion(completion, key, &call)?
            }
        };

        if shape.has_response() {
            dispatch.responses.save(&outcome)?;
        }
        Ok(outcome)
    })
}

/// Run an asynchronous handler, with or without its interceptor
pub(crate) async fn run_async<R, H, C, F>(
    shape: Shape,
    dispatch: &Dispatch<'_, R>,
    interceptor: Option<InterceptorKey>,
    invoke: F,
) -> BusResult<Outcome<R::Response>>
where
    R: Request,
    H: Send + Sync + 'static,
    C: HandlerContext,
    F: for<'h> FnOnce(&'h H, &'h R, &'h C) -> BoxFuture<'h, HandlerResult<Outcome<R::Response>>>
        + Send,
{
    let call = call_metadata::<R, H>(shape, dispatch.context);
    let body = async {
        let handler = resolve_handler::<H>(dispatch.scope, &call)?;
        let context = handler_context::<C>(dispatch.context)?;

        let outcome = match interceptor {
            None => invoke(handler.as_ref(), dispatch.request, context)
                .await
                .map_err(|e| BusError::handler(call.handler, e))?,
            Some(key) => {
                let interceptor =
                    resolve_async_interceptor(dispatch.registry, dispatch.scope, key, &call)?;
                let run = invoke(handler.as_ref(), dispatch.request, context);
                let proceed =
                    ProceedAsync::new(Box::pin(run.map(|result| result.map(Completion::from_outcome))));
                let completion = interceptor
                    .intercept_dyn(&call, dispatch.context, proceed)
                    .await
                    .map_err(|e| BusError::handler(call.handler, e))?;
                unwrap_completion(completion, key, &call)?
            }
        };

        if shape.has_response() {
            dispatch.responses.save_async(&outcome).await?;
        }
        Ok(outcome)
    };
    guarded_async(&call, dispatch.context, body).await
}

fn guarded<T>(
    call: &InterceptedCall,
    context: &dyn HandlerContext,
    body: impl FnOnce() -> BusResult<Outcome<T>>,
) -> BusResult<Outcome<T>> {
    let dispatch = context.dispatch();
    let started = Instant::now();
    dispatch.log().log_debug(
        dispatch.message_id(),
        MessageStatus::InProcess.into(),
        |p| describe(p, call, "Handler invoked"),
        None,
        Some(dispatch.transaction()),
    );

    let result = panic::catch_unwind(AssertUnwindSafe(body))
        .unwrap_or_else(|payload| Err(panicked(call, payload)));

    match result {
        Ok(outcome) => {
            let elapsed_ms = elapsed_ms(started);
            if outcome.has_errors() {
                dispatch.log().log_warning(
                    dispatch.message_id(),
                    MessageStatus::Completed.into(),
                    |p| completed(p, call, &outcome, elapsed_ms),
                    Some("Handler completed with errors in its outcome"),
                    Some(dispatch.transaction()),
                );
            } else {
                dispatch.log().log_information(
                    dispatch.message_id(),
                    MessageStatus::Completed.into(),
                    |p| completed(p, call, &outcome, elapsed_ms),
                    None,
                    Some(dispatch.transaction()),
                );
            }
            Ok(outcome)
        }
        Err(error) => {
            let detail = error.to_string();
            dispatch.log().log_error(
                dispatch.message_id(),
                MessageStatus::Aborted.into(),
                &error,
                |p| aborted(p, call, &error, dispatch),
                Some(&detail),
                Some(dispatch.transaction()),
            );
            Err(error)
        }
    }
}

async fn guarded_async<T>(
    call: &InterceptedCall,
    context: &dyn HandlerContext,
    body: impl Future<Output = BusResult<Outcome<T>>> + Send,
) -> BusResult<Outcome<T>> {
    let dispatch = context.dispatch();
    let started = Instant::now();
    dispatch
        .log()
        .log_debug_async(
            dispatch.message_id(),
            MessageStatus::InProcess.into(),
            |p| describe(p, call, "Handler invoked"),
            None,
            Some(dispatch.transaction()),
        )
        .await;

    let result = AssertUnwindSafe(body)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(panicked(call, payload)));

    match result {
        Ok(outcome) => {
            let elapsed_ms = elapsed_ms(started);
            if outcome.has_errors() {
                dispatch
                    .log()
                    .log_warning_async(
                        dispatch.message_id(),
                        MessageStatus::Completed.into(),
                        |p| completed(p, call, &outcome, elapsed_ms),
                        Some("Handler completed with errors in its outcome"),
                        Some(dispatch.transaction()),
                    )
                    .await;
            } else {
                dispatch
                    .log()
                    .log_information_async(
                        dispatch.message_id(),
                        MessageStatus::Completed.into(),
                        |p| completed(p, call, &outcome, elapsed_ms),
                        None,
                        Some(dispatch.transaction()),
                    )
                    .await;
            }
            Ok(outcome)
        }
        Err(error) => {
            let detail = error.to_string();
            dispatch
                .log()
                .log_error_async(
                    dispatch.message_id(),
                    MessageStatus::Aborted.into(),
                    &error,
                    |p| aborted(p, call, &error, dispatch),
                    Some(&detail),
                    Some(dispatch.transaction()),
                )
                .await;
            Err(error)
        }
    }
}

fn call_metadata<R: Request, H: 'static>(shape: Shape, context: &dyn HandlerContext) -> InterceptedCall {
    let dispatch = context.dispatch();
    InterceptedCall {
        message_id: dispatch.message_id(),
        message_type: dispatch.message_type(),
        request: type_name::<R>(),
        handler: type_name::<H>(),
        shape,
    }
}

fn resolve_handler<H: Send + Sync + 'static>(
    scope: &ServiceScope,
    call: &InterceptedCall,
) -> BusResult<Arc<H>> {
    scope
        .resolve::<H>()
        .map_err(|source| BusError::HandlerNotFound {
            request: call.request.to_string(),
            handler: call.handler.to_string(),
            source,
        })
}

fn handler_context<C: HandlerContext>(context: &dyn HandlerContext) -> BusResult<&C> {
    downcast_context::<C>(context).ok_or_else(|| BusError::ContextTypeMismatch {
        expected: type_name::<C>().to_string(),
        actual: context.context_name().to_string(),
    })
}

fn interceptor_resolver<'r>(
    registry: &'r HandlerRegistry,
    key: InterceptorKey,
    call: &InterceptedCall,
) -> BusResult<&'r InterceptorResolver> {
    registry
        .interceptor(key)
        .map(|binding| &binding.resolver)
        .ok_or_else(|| BusError::interceptor_not_found(key.name(), call.handler, "not registered"))
}

fn resolve_sync_interceptor(
    registry: &HandlerRegistry,
    scope: &ServiceScope,
    key: InterceptorKey,
    call: &InterceptedCall,
) -> BusResult<Arc<dyn DynInterceptor>> {
    match interceptor_resolver(registry, key, call)? {
        InterceptorResolver::Sync(resolve) => resolve(scope)
            .map_err(|e| BusError::interceptor_not_found(key.name(), call.handler, e.to_string())),
        InterceptorResolver::Async(_) => Err(BusError::interceptor_not_found(
            key.name(),
            call.handler,
            "registered as an asynchronous interceptor",
        )),
    }
}

fn resolve_async_interceptor(
    registry: &HandlerRegistry,
    scope: &ServiceScope,
    key: InterceptorKey,
    call: &InterceptedCall,
) -> BusResult<Arc<dyn DynAsyncInterceptor>> {
    match interceptor_resolver(registry, key, call)? {
        InterceptorResolver::Async(resolve) => resolve(scope)
            .map_err(|e| BusError::interceptor_not_found(key.name(), call.handler, e.to_string())),
        InterceptorResolver::Sync(_) => Err(BusError::interceptor_not_found(
            key.name(),
            call.handler,
            "registered as a synchronous interceptor",
        )),
    }
}

fn unwrap_completion<T: 'static>(
    completion: Completion,
    key: InterceptorKey,
    call: &InterceptedCall,
) -> BusResult<Outcome<T>> {
    completion.into_outcome::<T>().ok_or_else(|| {
        BusError::invariant(format!(
            "interceptor {key} returned a completion that did not come from {}",
            call.handler
        ))
    })
}

fn panicked(call: &InterceptedCall, payload: Box<dyn Any + Send>) -> BusError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    BusError::HandlerPanicked {
        handler: call.handler.to_string(),
        message,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn describe(payload: &mut LogPayload, call: &InterceptedCall, message: &str) {
    payload
        .message(message)
        .field("handler", call.handler)
        .field("request", call.request)
        .field("shape", call.shape);
}

fn completed<T>(payload: &mut LogPayload, call: &InterceptedCall, outcome: &Outcome<T>, elapsed_ms: u64) {
    describe(payload, call, "Handler completed");
    payload
        .field("outcome", outcome.status())
        .field("messages", outcome.messages())
        .field("elapsed_ms", elapsed_ms);
}

fn aborted(payload: &mut LogPayload, call: &InterceptedCall, error: &BusError, dispatch: &DispatchContext) {
    describe(payload, call, "Handler failed");
    payload
        .field("error_kind", error.kind())
        .field("trace_id", dispatch.trace().trace_id())
        .field("trace_depth", dispatch.trace().depth());
}
