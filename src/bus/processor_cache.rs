//! Lazily built processors, one per request type.

use crate::error::{BusError, BusResult};
use crate::messaging::Request;
use crate::processor::Processor;
use crate::registry::HandlerRegistry;
use dashmap::DashMap;
use std::any::{type_name, Any, TypeId};
use std::sync::Arc;
use tracing::debug;

/// Concurrent cache of processors keyed by request type.
///
/// Concurrent first dispatches of one request type race on the map entry;
/// exactly one processor is built and every caller gets that instance.
#[derive(Debug, Default)]
pub struct ProcessorCache {
    entries: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ProcessorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create<R: Request>(
        &self,
        registry: &HandlerRegistry,
    ) -> BusResult<Arc<dyn Processor<R>>> {
        let key = TypeId::of::<R>();
        if let Some(entry) = self.entries.get(&key) {
            return downcast::<R>(entry.value());
        }

        let entry = self.entries.entry(key).or_try_insert_with(|| {
            let binding = registry
                .binding_of::<R>()
                .ok_or_else(|| BusError::handler_not_registered(type_name::<R>()))?;
            let factory = binding.processor_factory::<R>().ok_or_else(|| {
                BusError::invariant(format!(
                    "processor factory of {} does not match its request type",
                    binding.handler()
                ))
            })?;
            let processor: Arc<dyn Processor<R>> = factory();
            debug!(
                request = type_name::<R>(),
                shape = %processor.shape(),
                "Built processor"
            );
            Ok::<_, BusError>(Arc::new(processor) as Arc<dyn Any + Send + Sync>)
        })?;
        downcast::<R>(entry.value())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn downcast<R: Request>(entry: &Arc<dyn Any + Send + Sync>) -> BusResult<Arc<dyn Processor<R>>> {
    entry
        .downcast_ref::<Arc<dyn Processor<R>>>()
        .cloned()
        .ok_or_else(|| {
            BusError::invariant(format!(
                "cached processor for {} has an unexpected type",
                type_name::<R>()
            ))
        })
}
