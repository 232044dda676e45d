//! # Storage Error Types

use crate::messaging::{MessageId, SyncToken};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Transaction {transaction_id} is not known to this store")]
    UnknownTransaction { transaction_id: Uuid },

    #[error("Transaction {transaction_id} is already {state}")]
    TransactionClosed {
        transaction_id: Uuid,
        state: &'static str,
    },

    #[error("Message not found: {message_id}")]
    MessageNotFound { message_id: MessageId },

    #[error("Stale sync token for message {message_id}: expected {expected}, found {actual}")]
    StaleSyncToken {
        message_id: MessageId,
        expected: SyncToken,
        actual: SyncToken,
    },

    #[error("Storage operation failed: {operation}: {message}")]
    Operation { operation: String, message: String },
}

impl StoreError {
    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
