//! # Registration Errors
//!
//! Raised while wiring the registry at startup. Every variant names both the
//! offending type and what was expected. These errors are meant to stop the
//! application from starting; nothing in the crate catches them.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("{component} declares context type {declared}, but the registry is configured for {expected}")]
    ContextTypeMismatch {
        component: String,
        declared: String,
        expected: String,
    },

    #[error("Request type {request} cannot be handled as {shape}: expected {expected}, found response type {actual}")]
    RequestCapabilityMismatch {
        request: String,
        shape: String,
        expected: String,
        actual: String,
    },

    #[error("Request type {request} is already handled by {existing_handler} ({existing_shape}); cannot also bind {new_handler} ({new_shape})")]
    DuplicateHandler {
        request: String,
        existing_handler: String,
        existing_shape: String,
        new_handler: String,
        new_shape: String,
    },

    #[error("Handler {handler} does not satisfy its contract: expected {expected}, found {actual}")]
    HandlerContractViolation {
        handler: String,
        expected: String,
        actual: String,
    },

    #[error("Message type {type_name} is already registered as {registered}; cannot register it as {requested}")]
    ConflictingMessageType {
        type_name: String,
        registered: String,
        requested: String,
    },

    #[error("Message type identifier {id} of {incoming} collides with already registered {existing}")]
    MessageTypeIdCollision {
        id: String,
        existing: String,
        incoming: String,
    },

    #[error("Handler {handler} declares interceptor {interceptor}, which cannot be used: {reason}")]
    UnresolvedInterceptor {
        handler: String,
        interceptor: String,
        reason: String,
    },
}

pub type RegistrationResult<T> = Result<T, RegistrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names_both_types() {
        let error = RegistrationError::ContextTypeMismatch {
            component: "PingHandler".to_string(),
            declared: "TenantContext".to_string(),
            expected: "DispatchContext".to_string(),
        };
        let text = error.to_string();
        assert!(text.contains("TenantContext"));
        assert!(text.contains("DispatchContext"));
    }
}
