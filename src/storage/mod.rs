//! # Storage Module
//!
//! The persistence contract the bus depends on, the status/log writer built on
//! top of it, and an in-memory reference store.
//!
//! ```text
//! MessageBus ──► MessageStore ──► headers + bodies
//!     │              ▲
//!     └──► StatusLogWriter ──► status column + append-only log
//! ```

pub mod errors;
pub mod in_memory;
pub mod status_log;
pub mod traits;

pub use errors::{StoreError, StoreResult};
pub use in_memory::{
    Fault, InMemoryMessageStore, InMemoryTransaction, TransactionStats, Visibility,
};
pub use status_log::{LogPayload, StatusLogWriter};
pub use traits::{
    MessageStore, NewLogEntry, NewMessage, SavedMessage, Transaction, TransactionContext,
};
