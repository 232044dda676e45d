//! # In-Memory Message Store
//!
//! Reference [`MessageStore`] backed by a `parking_lot::Mutex`. Writes are
//! applied immediately and recorded in a per-transaction undo log; rollback
//! replays the undo log in reverse.
//!
//! What readers see of writes made by a still-open transaction depends on the
//! store's [`Visibility`]. Under [`Visibility::ReadCommitted`] the store
//! behaves like a SQL database at read committed: a transaction sees its own
//! writes, everyone else sees the last committed state.
//!
//! Faults can be injected to exercise the bus's failure paths.

use super::errors::{StoreError, StoreResult};
use super::traits::{
    MessageStore, NewLogEntry, NewMessage, SavedMessage, Transaction, TransactionContext,
};
use crate::messaging::{
    MessageBody, MessageEnvelope, MessageId, MessageLogEntry, SyncToken,
};
use crate::state_machine::MessageStatus;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Failure modes the in-memory store can be told to simulate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// `save_request_message` returns no handle
    MissingHandle,
    /// `save_request_message` hands back an empty payload
    EmptyPayload,
    FailLogWrites,
    FailStatusWrites,
    FailResponseWrites,
    FailCommit,
    FailRollback,
}

/// Which uncommitted writes a reader can see
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Visibility {
    /// Every write is visible to every reader as soon as it is made
    #[default]
    ReadUncommitted,
    /// Readers see committed state plus the writes of their own transaction
    ReadCommitted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
}

impl TransactionStats {
    /// Transactions neither committed nor rolled back
    pub fn open(&self) -> u64 {
        self.begun - self.committed - self.rolled_back
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    RolledBack,
}

impl TxState {
    fn label(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        }
    }
}

#[derive(Debug)]
enum UndoOp {
    RemoveMessage(MessageId),
    RestoreStatus {
        message_id: MessageId,
        status: MessageStatus,
        sync_token: SyncToken,
    },
    RemoveLogEntry(u64),
}

#[derive(Debug)]
struct TxRecord {
    state: TxState,
    undo: Vec<UndoOp>,
}

/// A header with writes from a transaction that is still open
#[derive(Debug, Clone, Copy)]
struct PendingHeader {
    writer: Uuid,
    /// Last committed status and token; `None` when the writer inserted the header
    committed: Option<(MessageStatus, SyncToken)>,
}

#[derive(Debug, Default)]
struct StoreState {
    visibility: Visibility,
    envelopes: HashMap<MessageId, MessageEnvelope>,
    bodies: HashMap<MessageId, MessageBody>,
    log: Vec<MessageLogEntry>,
    next_sequence: u64,
    transactions: HashMap<Uuid, TxRecord>,
    pending_headers: HashMap<MessageId, PendingHeader>,
    /// Log sequence → transaction that appended it, while that transaction is open
    pending_log: HashMap<u64, Uuid>,
    stats: TransactionStats,
}

impl StoreState {
    fn active(&mut self, transaction_id: Uuid) -> StoreResult<&mut TxRecord> {
        let record = self
            .transactions
            .get_mut(&transaction_id)
            .ok_or(StoreError::UnknownTransaction { transaction_id })?;
        if record.state != TxState::Active {
            return Err(StoreError::TransactionClosed {
                transaction_id,
                state: record.state.label(),
            });
        }
        Ok(record)
    }

    fn insert_message(&mut self, transaction_id: Uuid, message: NewMessage, status: MessageStatus) -> StoreResult<MessageId> {
        self.active(transaction_id)?;
        let id = MessageId::new();
        self.envelopes.insert(
            id,
            MessageEnvelope {
                id,
                message_type_id: message.message_type_id,
                corresponding_message_id: message.corresponding_message_id,
                session_id: message.session_id,
                created_at: Utc::now(),
                status,
                host_id: message.host_id,
                runtime_key: message.runtime_key,
                retry_count: message.retry_count,
                delay_until: message.delay_until,
                sync_token: SyncToken::generate(),
            },
        );
        self.bodies.insert(
            id,
            MessageBody {
                message_id: id,
                content_type: message.content_type,
                payload: message.payload,
            },
        );
        self.active(transaction_id)?
            .undo
            .push(UndoOp::RemoveMessage(id));
        self.pending_headers.insert(
            id,
            PendingHeader {
                writer: transaction_id,
                committed: None,
            },
        );
        Ok(id)
    }

    /// Drop the pending marks of a transaction once it is committed or rolled back
    fn release(&mut self, transaction_id: Uuid) {
        self.pending_headers
            .retain(|_, pending| pending.writer != transaction_id);
        self.pending_log.retain(|_, writer| *writer != transaction_id);
    }

    fn hidden_from(&self, writer: Uuid, viewer: Option<Uuid>) -> bool {
        self.visibility == Visibility::ReadCommitted && Some(writer) != viewer
    }

    fn envelope_for(&self, message_id: MessageId, viewer: Option<Uuid>) -> Option<MessageEnvelope> {
        let envelope = self.envelopes.get(&message_id)?;
        match self.pending_headers.get(&message_id) {
            Some(pending) if self.hidden_from(pending.writer, viewer) => {
                let (status, sync_token) = pending.committed?;
                Some(MessageEnvelope {
                    status,
                    sync_token,
                    ..envelope.clone()
                })
            }
            _ => Some(envelope.clone()),
        }
    }

    fn log_for(&self, message_id: MessageId, viewer: Option<Uuid>) -> Vec<MessageLogEntry> {
        self.log
            .iter()
            .filter(|entry| entry.message_id == message_id)
            .filter(|entry| match self.pending_log.get(&entry.sequence) {
                Some(writer) => !self.hidden_from(*writer, viewer),
                None => true,
            })
            .cloned()
            .collect()
    }

    fn undo(&mut self, op: UndoOp) {
        match op {
            UndoOp::RemoveMessage(id) => {
                self.envelopes.remove(&id);
                self.bodies.remove(&id);
            }
            UndoOp::RestoreStatus {
                message_id,
                status,
                sync_token,
            } => {
                if let Some(envelope) = self.envelopes.get_mut(&message_id) {
                    envelope.status = status;
                    envelope.sync_token = sync_token;
                }
            }
            UndoOp::RemoveLogEntry(sequence) => {
                self.log.retain(|entry| entry.sequence != sequence);
            }
        }
    }
}

#[derive(Default)]
struct Inner {
    state: Mutex<StoreState>,
    faults: Mutex<HashSet<Fault>>,
    /// Faults that fire on their next check and then clear
    one_shot: Mutex<HashSet<Fault>>,
}

impl Inner {
    fn faulted(&self, fault: Fault) -> bool {
        self.one_shot.lock().remove(&fault) || self.faults.lock().contains(&fault)
    }

    fn injected(&self, fault: Fault, operation: &str) -> StoreResult<()> {
        if self.faulted(fault) {
            return Err(StoreError::operation(operation, "injected failure"));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryMessageStore {
    inner: Arc<Inner>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visibility(visibility: Visibility) -> Self {
        let store = Self::default();
        store.inner.state.lock().visibility = visibility;
        store
    }

    /// A store whose readers only see committed writes and their own
    pub fn read_committed() -> Self {
        Self::with_visibility(Visibility::ReadCommitted)
    }

    pub fn visibility(&self) -> Visibility {
        self.inner.state.lock().visibility
    }

    pub fn inject(&self, fault: Fault) {
        self.inner.faults.lock().insert(fault);
    }

    /// Fail the next operation the fault applies to, then behave normally
    pub fn inject_once(&self, fault: Fault) {
        self.inner.one_shot.lock().insert(fault);
    }

    pub fn clear_fault(&self, fault: Fault) {
        self.inner.faults.lock().remove(&fault);
        self.inner.one_shot.lock().remove(&fault);
    }

    pub fn transaction_stats(&self) -> TransactionStats {
        self.inner.state.lock().stats
    }

    /// Number of stored headers, responses included
    pub fn message_count(&self) -> usize {
        self.inner.state.lock().envelopes.len()
    }

    pub fn envelopes(&self) -> Vec<MessageEnvelope> {
        let mut envelopes: Vec<_> = self.inner.state.lock().envelopes.values().cloned().collect();
        envelopes.sort_by_key(|e| e.created_at);
        envelopes
    }

    /// Every log entry in sequence order, across messages
    pub fn all_log_entries(&self) -> Vec<MessageLogEntry> {
        self.inner.state.lock().log.clone()
    }
}

impl fmt::Debug for InMemoryMessageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("InMemoryMessageStore")
            .field("messages", &state.envelopes.len())
            .field("log_entries", &state.log.len())
            .field("stats", &state.stats)
            .finish()
    }
}

pub struct InMemoryTransaction {
    id: Uuid,
    store: Arc<Inner>,
}

impl fmt::Debug for InMemoryTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryTransaction")
            .field("id", &self.id)
            .finish()
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    fn id(&self) -> Uuid {
        self.id
    }

    fn commit(&self) -> StoreResult<()> {
        self.store.injected(Fault::FailCommit, "commit")?;
        let mut state = self.store.state.lock();
        let record = state.active(self.id)?;
        record.state = TxState::Committed;
        record.undo.clear();
        state.release(self.id);
        state.stats.committed += 1;
        debug!(transaction_id = %self.id, "Committed in-memory transaction");
        Ok(())
    }

    fn rollback(&self) -> StoreResult<()> {
        self.store.injected(Fault::FailRollback, "rollback")?;
        let mut state = self.store.state.lock();
        let undo = {
            let record = state.active(self.id)?;
            record.state = TxState::RolledBack;
            std::mem::take(&mut record.undo)
        };
        for op in undo.into_iter().rev() {
            state.undo(op);
        }
        state.release(self.id);
        state.stats.rolled_back += 1;
        debug!(transaction_id = %self.id, "Rolled back in-memory transaction");
        Ok(())
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    fn create_transaction(&self) -> StoreResult<TransactionContext> {
        let id = Uuid::new_v4();
        let mut state = self.inner.state.lock();
        state.transactions.insert(
            id,
            TxRecord {
                state: TxState::Active,
                undo: Vec::new(),
            },
        );
        state.stats.begun += 1;
        Ok(Arc::new(InMemoryTransaction {
            id,
            store: Arc::clone(&self.inner),
        }))
    }

    fn save_request_message(
        &self,
        tx: &dyn Transaction,
        message: NewMessage,
    ) -> StoreResult<Option<SavedMessage>> {
        if self.inner.faulted(Fault::MissingHandle) {
            return Ok(None);
        }
        let payload = if self.inner.faulted(Fault::EmptyPayload) {
            Vec::new()
        } else {
            message.payload.clone()
        };
        let id = self
            .inner
            .state
            .lock()
            .insert_message(tx.id(), message, MessageStatus::Created)?;
        Ok(Some(SavedMessage { id, payload }))
    }

    fn save_response_message(
        &self,
        tx: &dyn Transaction,
        response: NewMessage,
    ) -> StoreResult<Option<MessageId>> {
        self.inner.injected(Fault::FailResponseWrites, "save_response_message")?;
        let id = self
            .inner
            .state
            .lock()
            .insert_message(tx.id(), response, MessageStatus::Completed)?;
        Ok(Some(id))
    }

    fn update_status(
        &self,
        tx: &dyn Transaction,
        message_id: MessageId,
        expected: SyncToken,
        status: MessageStatus,
    ) -> StoreResult<SyncToken> {
        self.inner.injected(Fault::FailStatusWrites, "update_status")?;
        let mut state = self.inner.state.lock();
        state.active(tx.id())?;

        let pending = state.pending_headers.get(&message_id).copied();
        if let Some(pending) = pending.filter(|p| state.hidden_from(p.writer, Some(tx.id()))) {
            return Err(match pending.committed {
                None => StoreError::MessageNotFound { message_id },
                Some(_) => StoreError::operation(
                    "update_status",
                    format!("message {message_id} is locked by transaction {}", pending.writer),
                ),
            });
        }

        let envelope = state
            .envelopes
            .get_mut(&message_id)
            .ok_or(StoreError::MessageNotFound { message_id })?;
        if envelope.sync_token != expected {
            return Err(StoreError::StaleSyncToken {
                message_id,
                expected,
                actual: envelope.sync_token,
            });
        }

        let undo = UndoOp::RestoreStatus {
            message_id,
            status: envelope.status,
            sync_token: envelope.sync_token,
        };
        let committed = (envelope.status, envelope.sync_token);
        let token = SyncToken::generate();
        envelope.status = status;
        envelope.sync_token = token;

        state.active(tx.id())?.undo.push(undo);
        state
            .pending_headers
            .entry(message_id)
            .or_insert(PendingHeader {
                writer: tx.id(),
                committed: Some(committed),
            });
        Ok(token)
    }

    fn append_log_entry(&self, tx: &dyn Transaction, entry: NewLogEntry) -> StoreResult<()> {
        self.inner.injected(Fault::FailLogWrites, "append_log_entry")?;
        let mut state = self.inner.state.lock();
        state.active(tx.id())?;

        state.next_sequence += 1;
        let sequence = state.next_sequence;
        state.log.push(MessageLogEntry {
            message_id: entry.message_id,
            sequence,
            severity: entry.severity,
            logged_at: Utc::now(),
            status: entry.status,
            payload: entry.payload,
            detail: entry.detail,
            error: entry.error,
            host_id: entry.host_id,
            runtime_key: entry.runtime_key,
        });
        state
            .active(tx.id())?
            .undo
            .push(UndoOp::RemoveLogEntry(sequence));
        state.pending_log.insert(sequence, tx.id());
        Ok(())
    }

    fn find_envelope(&self, message_id: MessageId) -> StoreResult<Option<MessageEnvelope>> {
        Ok(self.inner.state.lock().envelope_for(message_id, None))
    }

    fn find_envelope_in(
        &self,
        tx: &dyn Transaction,
        message_id: MessageId,
    ) -> StoreResult<Option<MessageEnvelope>> {
        Ok(self.inner.state.lock().envelope_for(message_id, Some(tx.id())))
    }

    fn find_body(&self, message_id: MessageId) -> StoreResult<Option<MessageBody>> {
        let state = self.inner.state.lock();
        if state.envelope_for(message_id, None).is_none() {
            return Ok(None);
        }
        Ok(state.bodies.get(&message_id).cloned())
    }

    fn log_entries(&self, message_id: MessageId) -> StoreResult<Vec<MessageLogEntry>> {
        Ok(self.inner.state.lock().log_for(message_id, None))
    }

    fn log_entries_in(
        &self,
        tx: &dyn Transaction,
        message_id: MessageId,
    ) -> StoreResult<Vec<MessageLogEntry>> {
        Ok(self.inner.state.lock().log_for(message_id, Some(tx.id())))
    }

    fn responses_for(&self, request_id: MessageId) -> StoreResult<Vec<MessageEnvelope>> {
        let state = self.inner.state.lock();
        let mut responses: Vec<_> = state
            .envelopes
            .values()
            .filter(|envelope| envelope.corresponding_message_id == Some(request_id))
            .filter_map(|envelope| state.envelope_for(envelope.id, None))
            .collect();
        responses.sort_by_key(|envelope| envelope.created_at);
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{LogSeverity, MessageTypeId};

    fn new_message() -> NewMessage {
        NewMessage::new(
            MessageTypeId::from_name("tests.ping"),
            "application/json",
            b"{}".to_vec(),
        )
    }

    fn log_entry(message_id: MessageId, status: MessageStatus) -> NewLogEntry {
        NewLogEntry {
            message_id,
            severity: LogSeverity::Information,
            status,
            payload: serde_json::json!({ "message": "test" }),
            detail: None,
            error: None,
            host_id: "test-host".to_string(),
            runtime_key: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_uncommitted_writes_are_visible_and_commit_keeps_them() {
        let store = InMemoryMessageStore::new();
        let tx = store.create_transaction().unwrap();

        let saved = store
            .save_request_message(tx.as_ref(), new_message())
            .unwrap()
            .unwrap();
        assert!(store.find_envelope(saved.id).unwrap().is_some());
        assert_eq!(saved.payload, b"{}".to_vec());

        tx.commit().unwrap();
        let envelope = store.find_envelope(saved.id).unwrap().unwrap();
        assert_eq!(envelope.status, MessageStatus::Created);
        assert_eq!(store.transaction_stats().committed, 1);
    }

    #[test]
    fn test_rollback_undoes_message_status_and_log() {
        let store = InMemoryMessageStore::new();
        let tx = store.create_transaction().unwrap();
        let saved = store
            .save_request_message(tx.as_ref(), new_message())
            .unwrap()
            .unwrap();
        let token = store.find_envelope(saved.id).unwrap().unwrap().sync_token;
        store
            .update_status(tx.as_ref(), saved.id, token, MessageStatus::InProcess)
            .unwrap();
        store
            .append_log_entry(tx.as_ref(), log_entry(saved.id, MessageStatus::InProcess))
            .unwrap();

        tx.rollback().unwrap();

        assert!(store.find_envelope(saved.id).unwrap().is_none());
        assert!(store.find_body(saved.id).unwrap().is_none());
        assert!(store.log_entries(saved.id).unwrap().is_empty());
        assert_eq!(store.transaction_stats().rolled_back, 1);
    }

    #[test]
    fn test_status_falls_back_to_log_trail() {
        let store = InMemoryMessageStore::new();
        let business = store.create_transaction().unwrap();
        let saved = store
            .save_request_message(business.as_ref(), new_message())
            .unwrap()
            .unwrap();

        let audit = store.create_transaction().unwrap();
        store
            .append_log_entry(audit.as_ref(), log_entry(saved.id, MessageStatus::Aborted))
            .unwrap();
        audit.commit().unwrap();
        business.rollback().unwrap();

        assert!(store.find_envelope(saved.id).unwrap().is_none());
        assert_eq!(
            store.current_status(saved.id).unwrap(),
            Some(MessageStatus::Aborted)
        );
    }

    #[test]
    fn test_stale_sync_token_is_rejected() {
        let store = InMemoryMessageStore::new();
        let tx = store.create_transaction().unwrap();
        let saved = store
            .save_request_message(tx.as_ref(), new_message())
            .unwrap()
            .unwrap();
        let stale = store.find_envelope(saved.id).unwrap().unwrap().sync_token;

        let fresh = store
            .update_status(tx.as_ref(), saved.id, stale, MessageStatus::InProcess)
            .unwrap();
        assert_ne!(fresh, stale);

        let result = store.update_status(tx.as_ref(), saved.id, stale, MessageStatus::Completed);
        assert!(matches!(result, Err(StoreError::StaleSyncToken { .. })));
    }

    #[test]
    fn test_closed_transaction_rejects_writes() {
        let store = InMemoryMessageStore::new();
        let tx = store.create_transaction().unwrap();
        tx.commit().unwrap();

        let result = store.save_request_message(tx.as_ref(), new_message());
        assert!(matches!(
            result,
            Err(StoreError::TransactionClosed { state: "committed", .. })
        ));
        assert!(tx.rollback().is_err());
    }

    #[test]
    fn test_injected_faults() {
        let store = InMemoryMessageStore::new();
        let tx = store.create_transaction().unwrap();

        store.inject(Fault::MissingHandle);
        assert!(store
            .save_request_message(tx.as_ref(), new_message())
            .unwrap()
            .is_none());
        store.clear_fault(Fault::MissingHandle);

        store.inject(Fault::FailCommit);
        assert!(tx.commit().is_err());
        assert_eq!(store.transaction_stats().open(), 1);
    }

    #[test]
    fn test_read_committed_hides_open_writes_from_other_readers() {
        let store = InMemoryMessageStore::read_committed();
        let writer = store.create_transaction().unwrap();
        let saved = store
            .save_request_message(writer.as_ref(), new_message())
            .unwrap()
            .unwrap();
        store
            .append_log_entry(writer.as_ref(), log_entry(saved.id, MessageStatus::Created))
            .unwrap();

        let reader = store.create_transaction().unwrap();
        assert!(store.find_envelope(saved.id).unwrap().is_none());
        assert!(store.find_envelope_in(reader.as_ref(), saved.id).unwrap().is_none());
        assert!(store.find_body(saved.id).unwrap().is_none());
        assert!(store.log_entries(saved.id).unwrap().is_empty());
        assert!(store.find_envelope_in(writer.as_ref(), saved.id).unwrap().is_some());
        assert_eq!(store.log_entries_in(writer.as_ref(), saved.id).unwrap().len(), 1);

        writer.commit().unwrap();
        assert!(store.find_envelope(saved.id).unwrap().is_some());
        assert_eq!(store.log_entries(saved.id).unwrap().len(), 1);
        reader.rollback().unwrap();
    }

    #[test]
    fn test_read_committed_shows_last_committed_status() {
        let store = InMemoryMessageStore::read_committed();
        let setup = store.create_transaction().unwrap();
        let saved = store
            .save_request_message(setup.as_ref(), new_message())
            .unwrap()
            .unwrap();
        setup.commit().unwrap();

        let writer = store.create_transaction().unwrap();
        let token = store
            .find_envelope_in(writer.as_ref(), saved.id)
            .unwrap()
            .unwrap()
            .sync_token;
        store
            .update_status(writer.as_ref(), saved.id, token, MessageStatus::InProcess)
            .unwrap();

        let outside = store.find_envelope(saved.id).unwrap().unwrap();
        assert_eq!(outside.status, MessageStatus::Created);
        assert_eq!(outside.sync_token, token);

        let other = store.create_transaction().unwrap();
        let locked = store.update_status(other.as_ref(), saved.id, token, MessageStatus::Aborted);
        assert!(matches!(locked, Err(StoreError::Operation { .. })));

        writer.commit().unwrap();
        assert_eq!(
            store.find_envelope(saved.id).unwrap().unwrap().status,
            MessageStatus::InProcess
        );
        other.rollback().unwrap();
    }

    #[test]
    fn test_one_shot_fault_fires_once() {
        let store = InMemoryMessageStore::new();
        store.inject_once(Fault::FailCommit);

        let first = store.create_transaction().unwrap();
        assert!(first.commit().is_err());
        first.rollback().unwrap();

        let second = store.create_transaction().unwrap();
        second.commit().unwrap();
        assert_eq!(store.transaction_stats().committed, 1);
    }

    #[test]
    fn test_async_commit_delegates() {
        let store = InMemoryMessageStore::new();
        let tx = store.create_transaction().unwrap();
        tokio_test::block_on(tx.commit_async()).unwrap();
        assert_eq!(store.transaction_stats().committed, 1);
    }
}
