//! # Registration Candidates
//!
//! A [`Candidate`] captures everything the registry needs to know about one
//! handler or interceptor type: the capability it implements (chosen by the
//! constructor), the types it touches, and the factory that builds it. A
//! scanning caller can collect candidates of every kind into one list and hand
//! it to [`HandlerRegistry::register_all`](super::HandlerRegistry::register_all).

use super::binding::{InterceptorResolver, Shape};
use super::services::{Lifetime, ServiceCollection, ServiceScope};
use super::type_registry::{request_kind, MessageKind, MessageTypeSpec};
use crate::handlers::{
    AsyncHandler, AsyncInterceptor, AsyncResponseHandler, DynAsyncInterceptor, DynInterceptor,
    HandlerContext, Interceptor, InterceptorKey, SyncHandler, SyncResponseHandler,
};
use crate::messaging::{is_void, Request, TypeKey};
use crate::processor::{
    AsyncResponseProcessor, AsyncVoidProcessor, Processor, ProcessorFactory,
    SyncResponseProcessor, SyncVoidProcessor,
};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

type Install = Box<dyn FnOnce(&mut ServiceCollection, Lifetime) + Send>;

pub enum Candidate {
    Handler(HandlerDescriptor),
    Interceptor(InterceptorDescriptor),
}

pub struct HandlerDescriptor {
    pub(crate) shape: Shape,
    pub(crate) request: MessageTypeSpec,
    pub(crate) request_kind: MessageKind,
    pub(crate) response: Option<MessageTypeSpec>,
    pub(crate) context: TypeKey,
    pub(crate) handler: TypeKey,
    pub(crate) interceptor: Option<InterceptorKey>,
    pub(crate) lifetime: Option<Lifetime>,
    pub(crate) install: Install,
    pub(crate) processor: Arc<dyn Any + Send + Sync>,
}

pub struct InterceptorDescriptor {
    pub(crate) key: InterceptorKey,
    pub(crate) context: TypeKey,
    pub(crate) lifetime: Option<Lifetime>,
    pub(crate) install: Install,
    pub(crate) resolver: InterceptorResolver,
}

impl HandlerDescriptor {
    fn new<H, C, R, F>(
        shape: Shape,
        interceptor: Option<InterceptorKey>,
        factory: F,
        processor: ProcessorFactory<R>,
    ) -> Self
    where
        H: Send + Sync + 'static,
        C: HandlerContext,
        R: Request,
        F: Fn(&ServiceScope) -> anyhow::Result<H> + Send + Sync + 'static,
    {
        Self {
            shape,
            request: MessageTypeSpec::of::<R>(),
            request_kind: request_kind::<R>(),
            response: (!is_void::<R::Response>()).then(MessageTypeSpec::of::<R::Response>),
            context: TypeKey::of::<C>(),
            handler: TypeKey::of::<H>(),
            interceptor,
            lifetime: None,
            install: Box::new(move |services: &mut ServiceCollection, lifetime| {
                services.add_factory::<H, F>(lifetime, factory);
            }),
            processor: Arc::new(processor),
        }
    }
}

fn processor_factory<R, P>(build: fn() -> P) -> ProcessorFactory<R>
where
    R: Request,
    P: Processor<R> + 'static,
{
    Arc::new(move || Arc::new(build()) as Arc<dyn Processor<R>>)
}

impl Candidate {
    pub fn sync_handler<H, F>(factory: F) -> Self
    where
        H: SyncHandler,
        F: Fn(&ServiceScope) -> anyhow::Result<H> + Send + Sync + 'static,
    {
        Self::Handler(HandlerDescriptor::new::<H, H::Context, H::Request, F>(
            Shape::SyncVoid,
            H::interceptor(),
            factory,
            processor_factory(SyncVoidProcessor::<H>::new),
        ))
    }

    pub fn sync_response_handler<H, F>(factory: F) -> Self
    where
        H: SyncResponseHandler,
        F: Fn(&ServiceScope) -> anyhow::Result<H> + Send + Sync + 'static,
    {
        Self::Handler(HandlerDescriptor::new::<H, H::Context, H::Request, F>(
            Shape::SyncResponse,
            H::interceptor(),
            factory,
            processor_factory(SyncResponseProcessor::<H>::new),
        ))
    }

    pub fn async_handler<H, F>(factory: F) -> Self
    where
        H: AsyncHandler,
        F: Fn(&ServiceScope) -> anyhow::Result<H> + Send + Sync + 'static,
    {
        Self::Handler(HandlerDescriptor::new::<H, H::Context, H::Request, F>(
            Shape::AsyncVoid,
            H::interceptor(),
            factory,
            processor_factory(AsyncVoidProcessor::<H>::new),
        ))
    }

    pub fn async_response_handler<H, F>(factory: F) -> Self
    where
        H: AsyncResponseHandler,
        F: Fn(&ServiceScope) -> anyhow::Result<H> + Send + Sync + 'static,
    {
        Self::Handler(HandlerDescriptor::new::<H, H::Context, H::Request, F>(
            Shape::AsyncResponse,
            H::interceptor(),
            factory,
            processor_factory(AsyncResponseProcessor::<H>::new),
        ))
    }

    pub fn interceptor<I, F>(factory: F) -> Self
    where
        I: Interceptor,
        F: Fn(&ServiceScope) -> anyhow::Result<I> + Send + Sync + 'static,
    {
        let resolver = InterceptorResolver::Sync(Arc::new(|scope: &ServiceScope| {
            scope
                .resolve::<I>()
                .map(|interceptor| interceptor as Arc<dyn DynInterceptor>)
        }));
        Self::Interceptor(InterceptorDescriptor::new::<I, I::Context, F>(factory, resolver))
    }

    pub fn async_interceptor<I, F>(factory: F) -> Self
    where
        I: AsyncInterceptor,
        F: Fn(&ServiceScope) -> anyhow::Result<I> + Send + Sync + 'static,
    {
        let resolver = InterceptorResolver::Async(Arc::new(|scope: &ServiceScope| {
            scope
                .resolve::<I>()
                .map(|interceptor| interceptor as Arc<dyn DynAsyncInterceptor>)
        }));
        Self::Interceptor(InterceptorDescriptor::new::<I, I::Context, F>(factory, resolver))
    }

    /// Override the registry's default lifetime for this candidate
    pub fn with_lifetime(mut self, lifetime: Lifetime) -> Self {
        match &mut self {
            Self::Handler(descriptor) => descriptor.lifetime = Some(lifetime),
            Self::Interceptor(descriptor) => descriptor.lifetime = Some(lifetime),
        }
        self
    }

    /// Type name of the handler or interceptor
    pub fn name(&self) -> &'static str {
        match self {
            Self::Handler(descriptor) => descriptor.handler.name(),
            Self::Interceptor(descriptor) => descriptor.key.name(),
        }
    }
}

impl InterceptorDescriptor {
    fn new<I, C, F>(factory: F, resolver: InterceptorResolver) -> Self
    where
        I: Send + Sync + 'static,
        C: HandlerContext,
        F: Fn(&ServiceScope) -> anyhow::Result<I> + Send + Sync + 'static,
    {
        Self {
            key: InterceptorKey::of::<I>(),
            context: TypeKey::of::<C>(),
            lifetime: None,
            install: Box::new(move |services: &mut ServiceCollection, lifetime| {
                services.add_factory::<I, F>(lifetime, factory);
            }),
            resolver,
        }
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(descriptor) => f
                .debug_struct("Candidate::Handler")
                .field("shape", &descriptor.shape)
                .field("request", &descriptor.request.key())
                .field("handler", &descriptor.handler)
                .field("interceptor", &descriptor.interceptor)
                .field("lifetime", &descriptor.lifetime)
                .finish(),
            Self::Interceptor(descriptor) => f
                .debug_struct("Candidate::Interceptor")
                .field("key", &descriptor.key)
                .field("lifetime", &descriptor.lifetime)
                .finish(),
        }
    }
}
