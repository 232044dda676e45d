//! # Registry
//!
//! Startup-time wiring of message types, handlers and interceptors.
//!
//! ## Overview
//!
//! - **TypeRegistry**: message type ↔ durable identifier, by type and by id
//! - **HandlerRegistry**: one handler per request type across four shapes,
//!   plus interceptors keyed by interceptor type
//! - **ServiceCollection**: factories that build handlers, interceptors and
//!   their dependencies, with a lifetime per service
//!
//! ## Architecture
//!
//! ```text
//! Candidate ──► HandlerRegistry ──► TypeRegistry
//!                    │
//!                    ├──► HandlerBinding (per shape table)
//!                    ├──► InterceptorBinding
//!                    └──► ServiceCollection ──► ServiceProvider ──► ServiceScope (per dispatch)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use courier_core::registry::{Candidate, HandlerRegistry, Lifetime};
//!
//! let mut registry = HandlerRegistry::default();
//! registry.register_all(vec![
//!     Candidate::sync_handler(|_| Ok(PingHandler)),
//!     Candidate::sync_response_handler(|scope| Ok(AddHandler::new(scope.resolve()?)))
//!         .with_lifetime(Lifetime::Singleton),
//!     Candidate::interceptor(|_| Ok(Timing)),
//! ])?;
//! ```

pub mod binding;
pub mod candidate;
pub mod errors;
pub mod handler_registry;
pub mod services;
pub mod type_registry;

pub use binding::{
    HandlerBinding, InterceptorBinding, RegistrationOutcome, RegistrationSummary, RegistryStats,
    Shape, UnresolvedInterceptor,
};
pub use candidate::{Candidate, HandlerDescriptor, InterceptorDescriptor};
pub use errors::{RegistrationError, RegistrationResult};
pub use handler_registry::HandlerRegistry;
pub use services::{Lifetime, ResolveError, ServiceCollection, ServiceProvider, ServiceScope};
pub use type_registry::{MessageKind, MessageType, MessageTypeSpec, TypeRegistry};

pub(crate) use binding::InterceptorResolver;
