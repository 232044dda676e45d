#![allow(clippy::doc_markdown)] // Allow technical terms like serde_json in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Courier Core
//!
//! Durable in-process message and command bus.
//!
//! ## Overview
//!
//! Callers send typed requests. Each request type is bound to exactly one
//! handler, in one of four shapes: blocking or async, with or without a
//! response. Every request is persisted before its handler runs, and every
//! response outcome is persisted before it is returned, so a crash at any
//! point leaves a recoverable trail.
//!
//! ## Architecture
//!
//! ```text
//! caller ──► MessageBus ──► MessageStore (write-ahead save)
//!               │
//!               ├──► ProcessorCache ──► Processor<R> ──► [Interceptor ──►] Handler
//!               │                           │
//!               │                           └──► ResponseSink ──► MessageStore
//!               └──► StatusLogWriter ──► status column + append-only log
//! ```
//!
//! ## Module Organization
//!
//! - [`bus`] - Orchestration, send options, processor cache
//! - [`registry`] - Type and handler registries, service resolution
//! - [`handlers`] - Handler and interceptor traits, handler context
//! - [`processor`] - The four processors and their shared invocation path
//! - [`storage`] - Storage contract, status/log writer, in-memory store
//! - [`messaging`] - Message traits, identifiers, outcomes, serialization
//! - [`state_machine`] - Message status lifecycle
//! - [`config`] - Layered bus configuration
//! - [`error`] - Per-call error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use courier_core::{
//!     HandlerContext, HandlerRegistry, HandlerResult, InMemoryMessageStore, Message,
//!     MessageBus, Outcome, Request, SyncResponseHandler, DispatchContext,
//! };
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Add {
//!     a: i64,
//!     b: i64,
//! }
//!
//! impl Message for Add {}
//! impl Request for Add {
//!     type Response = i64;
//! }
//!
//! struct AddHandler;
//!
//! impl SyncResponseHandler for AddHandler {
//!     type Request = Add;
//!     type Context = DispatchContext;
//!
//!     fn handle(&self, request: &Add, _context: &DispatchContext) -> HandlerResult<Outcome<i64>> {
//!         Ok(Outcome::success(request.a + request.b))
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = HandlerRegistry::default();
//! registry.register_sync_response_handler::<AddHandler, _>(|_| Ok(AddHandler))?;
//!
//! let bus = MessageBus::builder(registry, Arc::new(InMemoryMessageStore::new())).build()?;
//! let outcome = bus.request(&Add { a: 2, b: 3 })?;
//! assert_eq!(outcome.value(), Some(&5));
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! cargo bench --features benchmarks
//! ```

pub mod bus;
pub mod config;
pub mod constants;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod messaging;
pub mod processor;
pub mod registry;
pub mod state_machine;
pub mod storage;

pub use bus::{MessageBus, MessageBusBuilder, SendOptions};
pub use config::{BusConfig, ConfigResult, ConfigurationError};
pub use error::{BusError, BusResult};
pub use handlers::{
    AsyncHandler, AsyncInterceptor, AsyncResponseHandler, Completion, ContextFactory,
    DefaultContextFactory, DispatchContext, HandlerContext, HandlerResult, InterceptedCall,
    Interceptor, InterceptorKey, Proceed, ProceedAsync, SyncHandler, SyncResponseHandler,
    TraceInfo,
};
pub use messaging::{
    Event, JsonSerializer, Message, MessageId, MessageSerializer, MessageTypeId, Outcome,
    OutcomeStatus, Request,
};
pub use registry::{
    Candidate, HandlerRegistry, Lifetime, MessageKind, RegistrationError, RegistrationResult,
    ServiceScope, Shape, TypeRegistry,
};
pub use state_machine::{MessageStatus, StatusUpdate};
pub use storage::{
    Fault, InMemoryMessageStore, MessageStore, StatusLogWriter, StoreError, Transaction,
    TransactionContext, Visibility,
};
