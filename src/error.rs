//! # Bus Errors
//!
//! Per-call error taxonomy for the message bus. Configuration errors raised
//! while wiring the registry live in [`crate::registry::RegistrationError`] and
//! are only wrapped here so a caller can use one `?` across startup and dispatch.

use crate::config::ConfigurationError;
use crate::messaging::{MessageId, SerializationError};
use crate::registry::{RegistrationError, ResolveError};
use crate::storage::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    /// Structural wiring mistake; startup only
    #[error("Configuration error: {0}")]
    Configuration(#[from] RegistrationError),

    #[error("Invalid bus configuration: {0}")]
    InvalidConfig(#[from] ConfigurationError),

    #[error("No handler is registered for request type {request}")]
    HandlerNotRegistered { request: String },

    #[error("Handler {handler} for request type {request} could not be resolved: {source}")]
    HandlerNotFound {
        request: String,
        handler: String,
        #[source]
        source: ResolveError,
    },

    #[error("Interceptor {interceptor} declared by handler {handler} could not be resolved: {reason}")]
    InterceptorNotFound {
        interceptor: String,
        handler: String,
        reason: String,
    },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Context factory produced {actual}, but the registry is configured for {expected}")]
    ContextTypeMismatch { expected: String, actual: String },

    #[error("Dispatch cancelled before the handler was invoked (message {message_id:?})")]
    CancelledBeforeDispatch { message_id: Option<MessageId> },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// The handler's own error, carried unchanged
    #[error("Handler {handler} failed: {source}")]
    Handler {
        handler: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Handler {handler} panicked: {message}")]
    HandlerPanicked { handler: String, message: String },
}

impl BusError {
    pub fn handler_not_registered(request: impl Into<String>) -> Self {
        Self::HandlerNotRegistered {
            request: request.into(),
        }
    }

    pub fn interceptor_not_found(
        interceptor: impl Into<String>,
        handler: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InterceptorNotFound {
            interceptor: interceptor.into(),
            handler: handler.into(),
            reason: reason.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    pub fn handler(handler: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Handler {
            handler: handler.into(),
            source,
        }
    }

    /// The error returned by handler code, if this failure came from a handler.
    ///
    /// Use `downcast_ref` on the result to recover the handler's concrete error type.
    pub fn handler_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Handler { source, .. } => Some(source),
            _ => None,
        }
    }

    /// True for wiring mistakes that should stop application start
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::InvalidConfig(_))
    }

    /// Short, stable label used in structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) | Self::InvalidConfig(_) => "configuration",
            Self::HandlerNotRegistered { .. } | Self::HandlerNotFound { .. } => "handler_resolution",
            Self::InterceptorNotFound { .. } => "interceptor_resolution",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::ContextTypeMismatch { .. } => "context_type_mismatch",
            Self::CancelledBeforeDispatch { .. } => "cancelled_before_dispatch",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
            Self::Handler { .. } => "handler",
            Self::HandlerPanicked { .. } => "handler_panic",
        }
    }
}

pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("division by zero")]
    struct DivideByZero;

    #[test]
    fn test_handler_error_keeps_original_type() {
        let error = BusError::handler("Divider", anyhow::Error::new(DivideByZero));

        let source = error.handler_error().expect("handler error");
        assert!(source.downcast_ref::<DivideByZero>().is_some());
        assert_eq!(error.kind(), "handler");
        assert_eq!(error.to_string(), "Handler Divider failed: division by zero");
    }

    #[test]
    fn test_error_display() {
        let error = BusError::handler_not_registered("Ping");
        assert_eq!(error.to_string(), "No handler is registered for request type Ping");

        let error = BusError::invariant("storage returned no message handle");
        assert_eq!(
            error.to_string(),
            "Invariant violation: storage returned no message handle"
        );
        assert!(!error.is_configuration());
    }

    #[test]
    fn test_cancelled_is_distinct_from_handler_failure() {
        let error = BusError::CancelledBeforeDispatch { message_id: None };
        assert!(error.handler_error().is_none());
        assert_eq!(error.kind(), "cancelled_before_dispatch");
    }
}
