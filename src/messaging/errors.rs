//! # Serialization Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("Message serialization error: {message_type}: {message}")]
    Serialize {
        message_type: String,
        message: String,
    },

    #[error("Message deserialization error: {message_type}: {message}")]
    Deserialize {
        message_type: String,
        message: String,
    },

    #[error("Unsupported content type: {content_type}")]
    UnsupportedContentType { content_type: String },
}

impl SerializationError {
    pub fn serialize(message_type: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Serialize {
            message_type: message_type.into(),
            message: message.to_string(),
        }
    }

    pub fn deserialize(message_type: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Deserialize {
            message_type: message_type.into(),
            message: message.to_string(),
        }
    }
}

pub type SerializationResult<T> = Result<T, SerializationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SerializationError::deserialize("Add", "missing field `a`");
        assert_eq!(
            error.to_string(),
            "Message deserialization error: Add: missing field `a`"
        );
    }
}
