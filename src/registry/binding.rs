//! # Bindings
//!
//! Immutable records committed by the handler registry: one [`HandlerBinding`]
//! per request type, one [`InterceptorBinding`] per interceptor type.

use super::services::{Lifetime, ResolveError, ServiceScope};
use super::type_registry::MessageType;
use crate::handlers::{DynAsyncInterceptor, DynInterceptor, InterceptorKey};
use crate::messaging::{Request, TypeKey};
use crate::processor::ProcessorFactory;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Dispatch shape: {sync, async} × {void, response}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    SyncVoid,
    SyncResponse,
    AsyncVoid,
    AsyncResponse,
}

impl Shape {
    pub const ALL: [Shape; 4] = [
        Shape::SyncVoid,
        Shape::SyncResponse,
        Shape::AsyncVoid,
        Shape::AsyncResponse,
    ];

    pub fn is_async(&self) -> bool {
        matches!(self, Self::AsyncVoid | Self::AsyncResponse)
    }

    pub fn has_response(&self) -> bool {
        matches!(self, Self::SyncResponse | Self::AsyncResponse)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SyncVoid => write!(f, "sync_void"),
            Self::SyncResponse => write!(f, "sync_response"),
            Self::AsyncVoid => write!(f, "async_void"),
            Self::AsyncResponse => write!(f, "async_response"),
        }
    }
}

/// Association of one request type with its handler
#[derive(Clone)]
pub struct HandlerBinding {
    pub(crate) shape: Shape,
    pub(crate) request: MessageType,
    pub(crate) response: Option<MessageType>,
    pub(crate) context: TypeKey,
    pub(crate) handler: TypeKey,
    pub(crate) interceptor: Option<InterceptorKey>,
    pub(crate) lifetime: Lifetime,
    /// A `ProcessorFactory<R>` for the bound request type
    pub(crate) processor: Arc<dyn Any + Send + Sync>,
}

impl HandlerBinding {
    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn request(&self) -> &MessageType {
        &self.request
    }

    /// `None` for fire-and-forget shapes
    pub fn response(&self) -> Option<&MessageType> {
        self.response.as_ref()
    }

    pub fn context(&self) -> TypeKey {
        self.context
    }

    pub fn handler(&self) -> TypeKey {
        self.handler
    }

    pub fn interceptor(&self) -> Option<InterceptorKey> {
        self.interceptor
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    pub(crate) fn processor_factory<R: Request>(&self) -> Option<ProcessorFactory<R>> {
        self.processor.downcast_ref::<ProcessorFactory<R>>().cloned()
    }
}

impl fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("shape", &self.shape)
            .field("request", &self.request.name())
            .field("response", &self.response.as_ref().map(MessageType::name))
            .field("handler", &self.handler)
            .field("interceptor", &self.interceptor)
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

pub(crate) type SyncInterceptorResolver =
    Arc<dyn Fn(&ServiceScope) -> Result<Arc<dyn DynInterceptor>, ResolveError> + Send + Sync>;
pub(crate) type AsyncInterceptorResolver =
    Arc<dyn Fn(&ServiceScope) -> Result<Arc<dyn DynAsyncInterceptor>, ResolveError> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum InterceptorResolver {
    Sync(SyncInterceptorResolver),
    Async(AsyncInterceptorResolver),
}

impl InterceptorResolver {
    pub(crate) fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }
}

/// A registered interceptor type
#[derive(Clone)]
pub struct InterceptorBinding {
    pub(crate) key: InterceptorKey,
    pub(crate) context: TypeKey,
    pub(crate) lifetime: Lifetime,
    pub(crate) resolver: InterceptorResolver,
}

impl InterceptorBinding {
    pub fn key(&self) -> InterceptorKey {
        self.key
    }

    pub fn context(&self) -> TypeKey {
        self.context
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// Whether this interceptor wraps asynchronous handlers
    pub fn is_async(&self) -> bool {
        self.resolver.is_async()
    }

    /// Whether it can wrap a handler of `shape`
    pub fn supports(&self, shape: Shape) -> bool {
        self.is_async() == shape.is_async()
    }
}

impl fmt::Debug for InterceptorBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorBinding")
            .field("key", &self.key)
            .field("context", &self.context)
            .field("lifetime", &self.lifetime)
            .field("async", &self.is_async())
            .finish()
    }
}

/// Result of offering one candidate to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Handler(Shape),
    /// Registered as an interceptor
    NotAHandler,
}

/// Counts from a [`register_all`](super::HandlerRegistry::register_all) pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistrationSummary {
    pub sync_void: usize,
    pub sync_response: usize,
    pub async_void: usize,
    pub async_response: usize,
    pub interceptors: usize,
}

impl RegistrationSummary {
    pub(crate) fn record(&mut self, outcome: RegistrationOutcome) {
        match outcome {
            RegistrationOutcome::Handler(Shape::SyncVoid) => self.sync_void += 1,
            RegistrationOutcome::Handler(Shape::SyncResponse) => self.sync_response += 1,
            RegistrationOutcome::Handler(Shape::AsyncVoid) => self.async_void += 1,
            RegistrationOutcome::Handler(Shape::AsyncResponse) => self.async_response += 1,
            RegistrationOutcome::NotAHandler => self.interceptors += 1,
        }
    }

    pub fn handlers(&self) -> usize {
        self.sync_void + self.sync_response + self.async_void + self.async_response
    }
}

/// Snapshot of the registry's contents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub sync_void: usize,
    pub sync_response: usize,
    pub async_void: usize,
    pub async_response: usize,
    pub interceptors: usize,
    pub message_types: usize,
    pub services: usize,
}

impl RegistryStats {
    pub fn total_handlers(&self) -> usize {
        self.sync_void + self.sync_response + self.async_void + self.async_response
    }
}

/// A handler whose declared interceptor cannot be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedInterceptor {
    pub handler: TypeKey,
    pub shape: Shape,
    pub interceptor: InterceptorKey,
    pub reason: &'static str,
}

impl fmt::Display for UnresolvedInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) declares interceptor {}: {}",
            self.handler, self.shape, self.interceptor, self.reason
        )
    }
}
