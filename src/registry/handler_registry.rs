//! # Handler Registry
//!
//! Binds each request type to exactly one handler, across four per-shape
//! tables, and keeps the interceptors handlers may declare. The registry is
//! filled during startup and is read-only once the bus is built: the bus holds
//! it behind an `Arc` and nothing mutates it afterwards.
//!
//! Handler registration runs four checks, in order, before committing anything:
//!
//! 1. the handler's context type equals the registry's context type
//! 2. the request type fits the shape (void shapes need `Response = ()`,
//!    response shapes need anything else) and its type metadata is consistent
//! 3. no handler is bound to the request type yet, in any shape
//! 4. the handler's response type can be recorded as a response value
//!
//! Any failure is a [`RegistrationError`] naming both types involved.

use super::binding::{
    HandlerBinding, InterceptorBinding, RegistrationOutcome, RegistrationSummary, RegistryStats,
    Shape, UnresolvedInterceptor,
};
use super::candidate::{Candidate, HandlerDescriptor, InterceptorDescriptor};
use super::errors::{RegistrationError, RegistrationResult};
use super::services::{Lifetime, ServiceCollection, ServiceScope};
use super::type_registry::{MessageKind, MessageTypeSpec, TypeRegistry};
use crate::config::BusConfig;
use crate::handlers::{
    AsyncHandler, AsyncInterceptor, AsyncResponseHandler, DispatchContext, HandlerContext,
    Interceptor, InterceptorKey, SyncHandler, SyncResponseHandler,
};
use crate::logging::log_registry_operation;
use crate::messaging::{Event, MessageTypeId, TypeKey};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

pub struct HandlerRegistry {
    context: TypeKey,
    default_lifetime: Lifetime,
    types: TypeRegistry,
    sync_void: HashMap<TypeId, HandlerBinding>,
    sync_response: HashMap<TypeId, HandlerBinding>,
    async_void: HashMap<TypeId, HandlerBinding>,
    async_response: HashMap<TypeId, HandlerBinding>,
    interceptors: HashMap<TypeId, InterceptorBinding>,
    services: ServiceCollection,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new::<DispatchContext>()
    }
}

impl HandlerRegistry {
    /// Registry whose handlers all receive context type `C`
    pub fn new<C: HandlerContext>() -> Self {
        Self {
            context: TypeKey::of::<C>(),
            default_lifetime: Lifetime::default(),
            types: TypeRegistry::new(),
            sync_void: HashMap::new(),
            sync_response: HashMap::new(),
            async_void: HashMap::new(),
            async_response: HashMap::new(),
            interceptors: HashMap::new(),
            services: ServiceCollection::new(),
        }
    }

    /// [`DispatchContext`] registry using the configured handler lifetime
    pub fn for_config(config: &BusConfig) -> Self {
        Self::default().with_default_lifetime(config.handler_lifetime)
    }

    pub fn with_default_lifetime(mut self, lifetime: Lifetime) -> Self {
        self.default_lifetime = lifetime;
        self
    }

    pub fn context_type(&self) -> TypeKey {
        self.context
    }

    pub fn default_lifetime(&self) -> Lifetime {
        self.default_lifetime
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn services(&self) -> &ServiceCollection {
        &self.services
    }

    /// Add the dependencies handler factories resolve
    pub fn services_mut(&mut self) -> &mut ServiceCollection {
        &mut self.services
    }

    /// Register one candidate.
    ///
    /// Returns [`RegistrationOutcome::Handler`] with the shape it was bound
    /// under, or [`RegistrationOutcome::NotAHandler`] when the candidate was an
    /// interceptor.
    pub fn try_register_handler_and_interceptor(
        &mut self,
        candidate: Candidate,
    ) -> RegistrationResult<RegistrationOutcome> {
        match candidate {
            Candidate::Handler(descriptor) => {
                let shape = descriptor.shape;
                self.register_handler(descriptor)?;
                Ok(RegistrationOutcome::Handler(shape))
            }
            Candidate::Interceptor(descriptor) => {
                self.register_interceptor_descriptor(descriptor)?;
                Ok(RegistrationOutcome::NotAHandler)
            }
        }
    }

    /// Register a mixed list of handlers and interceptors, stopping at the first error
    pub fn register_all(
        &mut self,
        candidates: impl IntoIterator<Item = Candidate>,
    ) -> RegistrationResult<RegistrationSummary> {
        let mut summary = RegistrationSummary::default();
        for candidate in candidates {
            summary.record(self.try_register_handler_and_interceptor(candidate)?);
        }
        info!(
            handlers = summary.handlers(),
            interceptors = summary.interceptors,
            "Registered handler candidates"
        );
        Ok(summary)
    }

    pub fn register_sync_handler<H, F>(&mut self, factory: F) -> RegistrationResult<()>
    where
        H: SyncHandler,
        F: Fn(&ServiceScope) -> anyhow::Result<H> + Send + Sync + 'static,
    {
        self.try_register_handler_and_interceptor(Candidate::sync_handler(factory))
            .map(drop)
    }

    pub fn register_sync_response_handler<H, F>(&mut self, factory: F) -> RegistrationResult<()>
    where
        H: SyncResponseHandler,
        F: Fn(&ServiceScope) -> anyhow::Result<H> + Send + Sync + 'static,
    {
        self.try_register_handler_and_interceptor(Candidate::sync_response_handler(factory))
            .map(drop)
    }

    pub fn register_async_handler<H, F>(&mut self, factory: F) -> RegistrationResult<()>
    where
        H: AsyncHandler,
        F: Fn(&ServiceScope) -> anyhow::Result<H> + Send + Sync + 'static,
    {
        self.try_register_handler_and_interceptor(Candidate::async_handler(factory))
            .map(drop)
    }

    pub fn register_async_response_handler<H, F>(&mut self, factory: F) -> RegistrationResult<()>
    where
        H: AsyncResponseHandler,
        F: Fn(&ServiceScope) -> anyhow::Result<H> + Send + Sync + 'static,
    {
        self.try_register_handler_and_interceptor(Candidate::async_response_handler(factory))
            .map(drop)
    }

    pub fn register_interceptor<I, F>(&mut self, factory: F) -> RegistrationResult<()>
    where
        I: Interceptor,
        F: Fn(&ServiceScope) -> anyhow::Result<I> + Send + Sync + 'static,
    {
        self.try_register_handler_and_interceptor(Candidate::interceptor(factory))
            .map(drop)
    }

    pub fn register_async_interceptor<I, F>(&mut self, factory: F) -> RegistrationResult<()>
    where
        I: AsyncInterceptor,
        F: Fn(&ServiceScope) -> anyhow::Result<I> + Send + Sync + 'static,
    {
        self.try_register_handler_and_interceptor(Candidate::async_interceptor(factory))
            .map(drop)
    }

    /// Record an event type in the type registry
    pub fn register_event<E: Event>(&mut self) -> RegistrationResult<MessageTypeId> {
        let id = self.types.register::<E>(MessageKind::Event)?.id();
        log_registry_operation(
            "register_event",
            None,
            Some(std::any::type_name::<E>()),
            None,
            "success",
            None,
        );
        Ok(id)
    }

    /// Binding of a request type, whichever shape it was registered under
    pub fn binding_for(&self, request: TypeKey) -> Option<&HandlerBinding> {
        Shape::ALL
            .iter()
            .find_map(|shape| self.table(*shape).get(&request.id()))
    }

    pub fn binding_of<R: 'static>(&self) -> Option<&HandlerBinding> {
        self.binding_for(TypeKey::of::<R>())
    }

    /// Bindings of one shape
    pub fn bindings(&self, shape: Shape) -> impl Iterator<Item = &HandlerBinding> {
        self.table(shape).values()
    }

    pub fn interceptor(&self, key: InterceptorKey) -> Option<&InterceptorBinding> {
        self.interceptors.get(&key.type_key().id())
    }

    pub fn interceptors(&self) -> impl Iterator<Item = &InterceptorBinding> {
        self.interceptors.values()
    }

    /// Handlers whose declared interceptor is missing or of the wrong flavor.
    ///
    /// These handlers fail at dispatch time with an interceptor resolution error.
    pub fn unresolved_interceptors(&self) -> Vec<UnresolvedInterceptor> {
        let mut unresolved: Vec<_> = Shape::ALL
            .iter()
            .flat_map(|shape| self.table(*shape).values())
            .filter_map(|binding| {
                let key = binding.interceptor?;
                let reason = match self.interceptor(key) {
                    None => "not registered",
                    Some(interceptor) if !interceptor.supports(binding.shape) => {
                        if binding.shape.is_async() {
                            "registered as a synchronous interceptor"
                        } else {
                            "registered as an asynchronous interceptor"
                        }
                    }
                    Some(_) => return None,
                };
                Some(UnresolvedInterceptor {
                    handler: binding.handler,
                    shape: binding.shape,
                    interceptor: key,
                    reason,
                })
            })
            .collect();
        unresolved.sort_by_key(|u| u.handler.name());
        unresolved
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            sync_void: self.sync_void.len(),
            sync_response: self.sync_response.len(),
            async_void: self.async_void.len(),
            async_response: self.async_response.len(),
            interceptors: self.interceptors.len(),
            message_types: self.types.len(),
            services: self.services.len(),
        }
    }

    fn table(&self, shape: Shape) -> &HashMap<TypeId, HandlerBinding> {
        match shape {
            Shape::SyncVoid => &self.sync_void,
            Shape::SyncResponse => &self.sync_response,
            Shape::AsyncVoid => &self.async_void,
            Shape::AsyncResponse => &self.async_response,
        }
    }

    fn table_mut(&mut self, shape: Shape) -> &mut HashMap<TypeId, HandlerBinding> {
        match shape {
            Shape::SyncVoid => &mut self.sync_void,
            Shape::SyncResponse => &mut self.sync_response,
            Shape::AsyncVoid => &mut self.async_void,
            Shape::AsyncResponse => &mut self.async_response,
        }
    }

    fn register_handler(&mut self, descriptor: HandlerDescriptor) -> RegistrationResult<()> {
        let request_name = descriptor.request.key().name();
        let handler_name = descriptor.handler.name();

        if let Err(error) = self.validate_handler(&descriptor) {
            log_registry_operation(
                "register_handler",
                Some(&descriptor.shape.to_string()),
                Some(request_name),
                Some(handler_name),
                "rejected",
                Some(&error.to_string()),
            );
            return Err(error);
        }

        let HandlerDescriptor {
            shape,
            request,
            request_kind,
            response,
            context,
            handler,
            interceptor,
            lifetime,
            install,
            processor,
        } = descriptor;

        let (request, response) = self.types.commit_request(request, request_kind, response)?;
        let lifetime = lifetime.unwrap_or(self.default_lifetime);
        install(&mut self.services, lifetime);

        self.table_mut(shape).insert(
            request.type_key().id(),
            HandlerBinding {
                shape,
                request,
                response,
                context,
                handler,
                interceptor,
                lifetime,
                processor,
            },
        );

        log_registry_operation(
            "register_handler",
            Some(&shape.to_string()),
            Some(request_name),
            Some(handler_name),
            "success",
            interceptor.map(|key| key.name()),
        );
        Ok(())
    }

    fn validate_handler(&self, descriptor: &HandlerDescriptor) -> RegistrationResult<()> {
        let handler_name = descriptor.handler.name();
        let request_name = descriptor.request.key().name();

        // 1. context type
        self.check_context(handler_name, descriptor.context)?;

        // 2. request capability
        match (&descriptor.response, descriptor.shape.has_response()) {
            (None, true) => {
                return Err(RegistrationError::RequestCapabilityMismatch {
                    request: request_name.to_string(),
                    shape: descriptor.shape.to_string(),
                    expected: "a non-unit response type".to_string(),
                    actual: "()".to_string(),
                })
            }
            (Some(response), false) => {
                return Err(RegistrationError::RequestCapabilityMismatch {
                    request: request_name.to_string(),
                    shape: descriptor.shape.to_string(),
                    expected: "()".to_string(),
                    actual: response.key().name().to_string(),
                })
            }
            _ => {}
        }
        self.types
            .check(&descriptor.request, descriptor.request_kind)?;

        // 3. one binding per request type across all shapes
        if let Some(existing) = self.binding_for(descriptor.request.key()) {
            return Err(RegistrationError::DuplicateHandler {
                request: request_name.to_string(),
                existing_handler: existing.handler.name().to_string(),
                existing_shape: existing.shape.to_string(),
                new_handler: handler_name.to_string(),
                new_shape: descriptor.shape.to_string(),
            });
        }

        // 4. handler contract for (request, response, context)
        if let Some(response) = &descriptor.response {
            self.check_response(handler_name, response)?;
        }
        self.types.check_request(
            &descriptor.request,
            descriptor.request_kind,
            descriptor.response.as_ref(),
        )
    }

    fn check_response(&self, handler: &str, response: &MessageTypeSpec) -> RegistrationResult<()> {
        self.types
            .check(response, MessageKind::ResponseValue)
            .map_err(|error| match error {
                RegistrationError::ConflictingMessageType { registered, .. } => {
                    RegistrationError::HandlerContractViolation {
                        handler: handler.to_string(),
                        expected: format!(
                            "response type {} usable as {}",
                            response.key().name(),
                            MessageKind::ResponseValue
                        ),
                        actual: format!("{} is registered as {registered}", response.key().name()),
                    }
                }
                other => other,
            })
    }

    fn check_context(&self, component: &str, declared: TypeKey) -> RegistrationResult<()> {
        if declared != self.context {
            return Err(RegistrationError::ContextTypeMismatch {
                component: component.to_string(),
                declared: declared.name().to_string(),
                expected: self.context.name().to_string(),
            });
        }
        Ok(())
    }

    fn register_interceptor_descriptor(
        &mut self,
        descriptor: InterceptorDescriptor,
    ) -> RegistrationResult<()> {
        let InterceptorDescriptor {
            key,
            context,
            lifetime,
            install,
            resolver,
        } = descriptor;

        self.check_context(key.name(), context)?;

        if self.interceptors.contains_key(&key.type_key().id()) {
            debug!(interceptor = %key, "Interceptor already registered");
            return Ok(());
        }

        let lifetime = lifetime.unwrap_or(self.default_lifetime);
        install(&mut self.services, lifetime);
        self.interceptors.insert(
            key.type_key().id(),
            InterceptorBinding {
                key,
                context,
                lifetime,
                resolver,
            },
        );

        log_registry_operation(
            "register_interceptor",
            None,
            None,
            Some(key.name()),
            "success",
            None,
        );
        Ok(())
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("context", &self.context)
            .field("default_lifetime", &self.default_lifetime)
            .field("stats", &self.stats())
            .finish()
    }
}
