//! # Persisted Message Records
//!
//! The header ([`MessageEnvelope`]) is kept apart from the payload
//! ([`MessageBody`]) so status lookups never load payload bytes. Each message
//! also owns an append-only trail of [`MessageLogEntry`] rows.

use super::message::{MessageId, MessageTypeId, SyncToken};
use crate::state_machine::MessageStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Durable header of one dispatched message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: MessageId,
    pub message_type_id: MessageTypeId,
    /// Set on response messages: the request they answer
    pub corresponding_message_id: Option<MessageId>,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub host_id: String,
    /// Runtime key of the process that wrote the message
    pub runtime_key: Uuid,
    pub retry_count: u32,
    pub delay_until: Option<DateTime<Utc>>,
    pub sync_token: SyncToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub message_id: MessageId,
    pub content_type: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogSeverity {
    Trace,
    Debug,
    Information,
    Warning,
    Error,
    Critical,
}

impl LogSeverity {
    /// Severities that carry structured error information
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Error | Self::Critical)
    }
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Information => write!(f, "information"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Structured description of an error attached to `Error`/`Critical` entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    /// `source()` chain, outermost first, excluding `message`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ErrorInfo {
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: error.to_string(),
            causes,
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }
}

/// One immutable audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageLogEntry {
    pub message_id: MessageId,
    /// Store-assigned, strictly increasing across the store
    pub sequence: u64,
    pub severity: LogSeverity,
    pub logged_at: DateTime<Utc>,
    /// Status of the message when the entry was written
    pub status: MessageStatus,
    pub payload: serde_json::Value,
    pub detail: Option<String>,
    pub error: Option<ErrorInfo>,
    pub host_id: String,
    pub runtime_key: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer {
        #[source]
        inner: std::io::Error,
    }

    #[test]
    fn test_error_info_walks_source_chain() {
        let error = Outer {
            inner: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };
        let info = ErrorInfo::from_error(&error).with_kind("storage");

        assert_eq!(info.message, "outer failure");
        assert_eq!(info.causes, vec!["disk full".to_string()]);
        assert_eq!(info.kind.as_deref(), Some("storage"));
    }

    #[test]
    fn test_severity_order() {
        assert!(LogSeverity::Trace < LogSeverity::Information);
        assert!(LogSeverity::Error < LogSeverity::Critical);
        assert!(LogSeverity::Critical.is_failure());
        assert!(!LogSeverity::Warning.is_failure());
    }
}
