//! # Message Bus
//!
//! Entry point for callers. The bus persists each request before its handler
//! runs, drives the handler through its processor, persists response outcomes,
//! and decides commit or rollback for the transactions it owns.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use courier_core::{Candidate, HandlerRegistry, InMemoryMessageStore, MessageBus};
//! use std::sync::Arc;
//!
//! let mut registry = HandlerRegistry::default();
//! registry.register_sync_response_handler::<AddHandler, _>(|_| Ok(AddHandler))?;
//!
//! let bus = MessageBus::builder(registry, Arc::new(InMemoryMessageStore::new())).build()?;
//! let outcome = bus.request(&Add { a: 2, b: 3 })?;
//! assert_eq!(outcome.value(), Some(&5));
//! ```

pub mod builder;
pub mod message_bus;
pub mod options;
pub mod processor_cache;

pub use builder::MessageBusBuilder;
pub use message_bus::MessageBus;
pub use options::SendOptions;
pub use processor_cache::ProcessorCache;
