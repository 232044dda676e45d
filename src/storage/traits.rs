//! # Storage Contract
//!
//! The bus persists through these traits and never sees the backing database.
//! Async methods default to their blocking counterparts so a store only has to
//! override them when it performs real I/O.

use super::errors::StoreResult;
use crate::constants::{defaults, runtime_key};
use crate::messaging::{
    ErrorInfo, LogSeverity, MessageBody, MessageEnvelope, MessageId, MessageLogEntry,
    MessageTypeId, SyncToken,
};
use crate::state_machine::MessageStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// One unit of work against a store
#[async_trait]
pub trait Transaction: Send + Sync + fmt::Debug {
    fn id(&self) -> Uuid;

    fn commit(&self) -> StoreResult<()>;

    fn rollback(&self) -> StoreResult<()>;

    async fn commit_async(&self) -> StoreResult<()> {
        self.commit()
    }

    async fn rollback_async(&self) -> StoreResult<()> {
        self.rollback()
    }
}

/// Shared handle to a transaction. Ownership (who commits) is tracked separately.
pub type TransactionContext = Arc<dyn Transaction>;

/// A message about to be persisted
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub message_type_id: MessageTypeId,
    pub corresponding_message_id: Option<MessageId>,
    pub session_id: Option<String>,
    pub host_id: String,
    pub runtime_key: Uuid,
    pub retry_count: u32,
    pub delay_until: Option<DateTime<Utc>>,
    pub content_type: String,
    pub payload: Vec<u8>,
}

impl NewMessage {
    pub fn new(
        message_type_id: MessageTypeId,
        content_type: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_type_id,
            corresponding_message_id: None,
            session_id: None,
            host_id: defaults::HOST_ID.to_string(),
            runtime_key: runtime_key(),
            retry_count: 0,
            delay_until: None,
            content_type: content_type.into(),
            payload,
        }
    }

    pub fn with_host(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = host_id.into();
        self
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn corresponding_to(mut self, message_id: Option<MessageId>) -> Self {
        self.corresponding_message_id = message_id;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn delayed_until(mut self, delay_until: Option<DateTime<Utc>>) -> Self {
        self.delay_until = delay_until;
        self
    }
}

/// Result of persisting a request: its id and the payload as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedMessage {
    pub id: MessageId,
    pub payload: Vec<u8>,
}

/// A log entry about to be appended
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    pub message_id: MessageId,
    pub severity: LogSeverity,
    pub status: MessageStatus,
    pub payload: serde_json::Value,
    pub detail: Option<String>,
    pub error: Option<ErrorInfo>,
    pub host_id: String,
    pub runtime_key: Uuid,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    fn create_transaction(&self) -> StoreResult<TransactionContext>;

    /// Persist header and body. `Ok(None)` means the store produced no handle.
    fn save_request_message(
        &self,
        tx: &dyn Transaction,
        message: NewMessage,
    ) -> StoreResult<Option<SavedMessage>>;

    /// Persist a response linked to its request through `corresponding_message_id`
    fn save_response_message(
        &self,
        tx: &dyn Transaction,
        response: NewMessage,
    ) -> StoreResult<Option<MessageId>>;

    /// Write a new status if `expected` still matches; returns the regenerated token
    fn update_status(
        &self,
        tx: &dyn Transaction,
        message_id: MessageId,
        expected: SyncToken,
        status: MessageStatus,
    ) -> StoreResult<SyncToken>;

    fn append_log_entry(&self, tx: &dyn Transaction, entry: NewLogEntry) -> StoreResult<()>;

    /// Header as visible outside any transaction
    fn find_envelope(&self, message_id: MessageId) -> StoreResult<Option<MessageEnvelope>>;

    /// Header as seen from inside `tx`, including that transaction's own writes
    fn find_envelope_in(
        &self,
        tx: &dyn Transaction,
        message_id: MessageId,
    ) -> StoreResult<Option<MessageEnvelope>>;

    fn find_body(&self, message_id: MessageId) -> StoreResult<Option<MessageBody>>;

    /// Log entries of one message in append order
    fn log_entries(&self, message_id: MessageId) -> StoreResult<Vec<MessageLogEntry>>;

    /// Log entries as seen from inside `tx`, in append order
    fn log_entries_in(
        &self,
        tx: &dyn Transaction,
        message_id: MessageId,
    ) -> StoreResult<Vec<MessageLogEntry>>;

    fn responses_for(&self, request_id: MessageId) -> StoreResult<Vec<MessageEnvelope>>;

    /// Status from the header, or from the most recent log entry when no header exists
    fn current_status(&self, message_id: MessageId) -> StoreResult<Option<MessageStatus>> {
        if let Some(envelope) = self.find_envelope(message_id)? {
            return Ok(Some(envelope.status));
        }
        Ok(self
            .log_entries(message_id)?
            .last()
            .map(|entry| entry.status))
    }

    /// Status as seen from inside `tx`, with the same log fallback as [`Self::current_status`]
    fn current_status_in(
        &self,
        tx: &dyn Transaction,
        message_id: MessageId,
    ) -> StoreResult<Option<MessageStatus>> {
        if let Some(envelope) = self.find_envelope_in(tx, message_id)? {
            return Ok(Some(envelope.status));
        }
        Ok(self
            .log_entries_in(tx, message_id)?
            .last()
            .map(|entry| entry.status))
    }

    async fn create_transaction_async(&self) -> StoreResult<TransactionContext> {
        self.create_transaction()
    }

    async fn find_envelope_in_async(
        &self,
        tx: &dyn Transaction,
        message_id: MessageId,
    ) -> StoreResult<Option<MessageEnvelope>> {
        self.find_envelope_in(tx, message_id)
    }

    async fn log_entries_in_async(
        &self,
        tx: &dyn Transaction,
        message_id: MessageId,
    ) -> StoreResult<Vec<MessageLogEntry>> {
        self.log_entries_in(tx, message_id)
    }

    async fn save_request_message_async(
        &self,
        tx: &dyn Transaction,
        message: NewMessage,
    ) -> StoreResult<Option<SavedMessage>> {
        self.save_request_message(tx, message)
    }

    async fn save_response_message_async(
        &self,
        tx: &dyn Transaction,
        response: NewMessage,
    ) -> StoreResult<Option<MessageId>> {
        self.save_response_message(tx, response)
    }

    async fn update_status_async(
        &self,
        tx: &dyn Transaction,
        message_id: MessageId,
        expected: SyncToken,
        status: MessageStatus,
    ) -> StoreResult<SyncToken> {
        self.update_status(tx, message_id, expected, status)
    }

    async fn append_log_entry_async(
        &self,
        tx: &dyn Transaction,
        entry: NewLogEntry,
    ) -> StoreResult<()> {
        self.append_log_entry(tx, entry)
    }
}
