//! # Messaging Module
//!
//! Message traits and identifiers, business outcomes, the persisted record
//! types, and payload serialization.

pub mod envelope;
pub mod errors;
pub mod message;
pub mod outcome;
pub mod serializer;

pub use envelope::{ErrorInfo, LogSeverity, MessageBody, MessageEnvelope, MessageLogEntry};
pub use errors::{SerializationError, SerializationResult};
pub use message::{
    is_void, Event, Message, MessageId, MessageTypeId, Request, SyncToken, TypeKey,
};
pub use outcome::{Outcome, OutcomeMessage, OutcomeSeverity, OutcomeStatus};
pub use serializer::{from_payload, to_payload, JsonSerializer, MessageSerializer};
