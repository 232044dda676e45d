use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a persisted message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Persisted, not yet picked up by a handler
    Created,
    /// Handler invocation started
    InProcess,
    /// Handler returned normally
    Completed,
    /// Handler, interceptor or resolution failed
    Aborted,
}

impl MessageStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Check if this is an active state (handler is running)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::InProcess)
    }

    /// Position in the lifecycle order `Created < InProcess < {Completed, Aborted}`
    pub fn rank(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::InProcess => 1,
            Self::Completed | Self::Aborted => 2,
        }
    }
}

impl Default for MessageStatus {
    fn default() -> Self {
        Self::Created
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::InProcess => write!(f, "in_process"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "in_process" => Ok(Self::InProcess),
            "completed" => Ok(Self::Completed),
            "aborted" => Ok(Self::Aborted),
            _ => Err(format!("Invalid message status: {s}")),
        }
    }
}

/// Status argument of a log call.
///
/// `Unchanged` appends a log entry without touching the status column at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "status")]
pub enum StatusUpdate {
    Unchanged,
    To(MessageStatus),
}

impl StatusUpdate {
    pub fn target(&self) -> Option<MessageStatus> {
        match self {
            Self::Unchanged => None,
            Self::To(status) => Some(*status),
        }
    }
}

impl From<MessageStatus> for StatusUpdate {
    fn from(status: MessageStatus) -> Self {
        Self::To(status)
    }
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::To(status) => write!(f, "{status}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(MessageStatus::Completed.is_terminal());
        assert!(MessageStatus::Aborted.is_terminal());
        assert!(!MessageStatus::Created.is_terminal());
        assert!(!MessageStatus::InProcess.is_terminal());
        assert!(MessageStatus::InProcess.is_active());
    }

    #[test]
    fn test_rank_order() {
        assert!(MessageStatus::Created.rank() < MessageStatus::InProcess.rank());
        assert!(MessageStatus::InProcess.rank() < MessageStatus::Completed.rank());
        assert_eq!(MessageStatus::Completed.rank(), MessageStatus::Aborted.rank());
    }

    #[test]
    fn test_display_and_parse() {
        for status in [
            MessageStatus::Created,
            MessageStatus::InProcess,
            MessageStatus::Completed,
            MessageStatus::Aborted,
        ] {
            assert_eq!(status.to_string().parse::<MessageStatus>(), Ok(status));
        }
        assert!("finished".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&MessageStatus::InProcess).unwrap();
        assert_eq!(json, "\"in_process\"");
    }

    #[test]
    fn test_status_update_target() {
        assert_eq!(StatusUpdate::Unchanged.target(), None);
        assert_eq!(
            StatusUpdate::from(MessageStatus::Aborted).target(),
            Some(MessageStatus::Aborted)
        );
    }
}
