//! # Handlers
//!
//! Capability traits implemented by application code: the four handler
//! shapes, the two interceptor flavors, and the context they all receive.

pub mod context;
pub mod interception;
pub mod traits;

pub use context::{
    ContextFactory, DefaultContextFactory, DispatchContext, HandlerContext, TraceInfo,
};
pub use interception::{
    AsyncInterceptor, Completion, InterceptedCall, Interceptor, InterceptorKey, Proceed,
    ProceedAsync,
};
pub use traits::{
    AsyncHandler, AsyncResponseHandler, HandlerResult, SyncHandler, SyncResponseHandler,
};

pub(crate) use context::downcast_context;
pub(crate) use interception::{DynAsyncInterceptor, DynInterceptor};
