use super::states::MessageStatus;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: MessageStatus,
        to: MessageStatus,
    },

    #[error("Message is already {current}; {requested} cannot be entered from a terminal status")]
    TerminalStatus {
        current: MessageStatus,
        requested: MessageStatus,
    },
}

pub type TransitionResult<T> = Result<T, TransitionError>;
