use super::message_bus::MessageBus;
use super::processor_cache::ProcessorCache;
use crate::config::BusConfig;
use crate::constants::runtime_key;
use crate::error::BusResult;
use crate::handlers::{ContextFactory, DefaultContextFactory};
use crate::logging;
use crate::messaging::{JsonSerializer, MessageSerializer};
use crate::registry::{HandlerRegistry, RegistrationError};
use crate::storage::{MessageStore, StatusLogWriter};
use std::sync::Arc;
use tracing::{info, warn};

/// Assembles a [`MessageBus`] from a finished registry and a store
pub struct MessageBusBuilder {
    registry: HandlerRegistry,
    store: Arc<dyn MessageStore>,
    serializer: Arc<dyn MessageSerializer>,
    context_factory: Arc<dyn ContextFactory>,
    config: BusConfig,
}

impl MessageBus {
    pub fn builder(registry: HandlerRegistry, store: Arc<dyn MessageStore>) -> MessageBusBuilder {
        MessageBusBuilder {
            registry,
            store,
            serializer: Arc::new(JsonSerializer),
            context_factory: Arc::new(DefaultContextFactory),
            config: BusConfig::default(),
        }
    }
}

impl MessageBusBuilder {
    pub fn serializer(mut self, serializer: Arc<dyn MessageSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Factory for the context handed to handlers. It must produce the
    /// registry's configured context type.
    pub fn context_factory(mut self, factory: Arc<dyn ContextFactory>) -> Self {
        self.context_factory = factory;
        self
    }

    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and the registry wiring, then freeze the registry.
    ///
    /// Handlers whose declared interceptor cannot be used are reported as a
    /// warning, or as [`RegistrationError::UnresolvedInterceptor`] when
    /// `strict_interceptors` is set.
    pub fn build(self) -> BusResult<MessageBus> {
        self.config.validate()?;

        for unresolved in self.registry.unresolved_interceptors() {
            if self.config.strict_interceptors {
                return Err(RegistrationError::UnresolvedInterceptor {
                    handler: unresolved.handler.name().to_string(),
                    interceptor: unresolved.interceptor.name().to_string(),
                    reason: unresolved.reason.to_string(),
                }
                .into());
            }
            warn!(
                handler = %unresolved.handler,
                shape = %unresolved.shape,
                interceptor = %unresolved.interceptor,
                reason = unresolved.reason,
                "Handler declares an interceptor that will fail at dispatch"
            );
        }

        let services = Arc::new(self.registry.services().build());
        let log = StatusLogWriter::new(
            Arc::clone(&self.store),
            self.config.host_id.as_str(),
            runtime_key(),
        );
        let stats = self.registry.stats();

        logging::log_registry_operation(
            "build_bus",
            None,
            None,
            Some(&self.config.host_id),
            "ready",
            Some(&format!(
                "{} handlers, {} interceptors, {} message types",
                stats.total_handlers(),
                stats.interceptors,
                stats.message_types
            )),
        );
        info!(
            host_id = %self.config.host_id,
            environment = %self.config.environment,
            runtime_key = %log.runtime_key(),
            "✅ Message bus ready"
        );

        Ok(MessageBus {
            registry: Arc::new(self.registry),
            services,
            store: self.store,
            serializer: self.serializer,
            context_factory: self.context_factory,
            processors: ProcessorCache::new(),
            log,
            config: self.config,
        })
    }
}
