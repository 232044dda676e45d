//! # Status / Log Writer
//!
//! One method per severity, each in a blocking and an async form. A call
//! appends one [`MessageLogEntry`](crate::messaging::MessageLogEntry) and, unless
//! the status argument is [`StatusUpdate::Unchanged`], moves the message status
//! in the same unit of work.
//!
//! Calls without a transaction open and commit their own. Failures while
//! writing are reported through `tracing` and never returned: an audit write
//! must not replace the error or result of the call that produced it.

use super::errors::StoreResult;
use super::traits::{MessageStore, NewLogEntry, Transaction, TransactionContext};
use crate::messaging::{
    ErrorInfo, LogSeverity, MessageEnvelope, MessageId, MessageLogEntry, SyncToken,
};
use crate::state_machine::{plan_transition, MessageStatus, StatusUpdate};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, warn, Level};
use uuid::Uuid;

/// Structured payload assembled by a log call's builder callback
#[derive(Debug, Default)]
pub struct LogPayload {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl LogPayload {
    pub fn message(&mut self, text: impl Into<String>) -> &mut Self {
        self.message = Some(text.into());
        self
    }

    /// Add a field; values that fail to serialize are recorded as their error text
    pub fn field(&mut self, key: impl Into<String>, value: impl Serialize) -> &mut Self {
        let value = serde_json::to_value(value)
            .unwrap_or_else(|e| Value::String(format!("<unserializable: {e}>")));
        self.fields.insert(key.into(), value);
        self
    }

    fn into_value(self) -> Value {
        let mut object = self.fields;
        if let Some(message) = self.message {
            object.insert("message".to_string(), Value::String(message));
        }
        Value::Object(object)
    }
}

#[derive(Debug)]
struct LogRequest {
    message_id: MessageId,
    severity: LogSeverity,
    update: StatusUpdate,
    payload: Value,
    detail: Option<String>,
    error: Option<ErrorInfo>,
}

impl LogRequest {
    fn new(
        message_id: MessageId,
        severity: LogSeverity,
        update: StatusUpdate,
        build: impl FnOnce(&mut LogPayload),
        detail: Option<&str>,
        error: Option<ErrorInfo>,
    ) -> Self {
        let mut payload = LogPayload::default();
        build(&mut payload);
        Self {
            message_id,
            severity,
            update,
            payload: payload.into_value(),
            detail: detail.map(str::to_string),
            error,
        }
    }
}

/// Outcome of reading the current status and planning the write
struct Resolved {
    recorded: MessageStatus,
    /// Token to update the header with, when a status write is due
    write_with: Option<SyncToken>,
}

macro_rules! mirror {
    ($level:expr, $writer:ident, $request:ident) => {
        tracing::event!(
            $level,
            message_id = %$request.message_id,
            severity = %$request.severity,
            status = %$request.update,
            host_id = %$writer.host_id,
            detail = ?$request.detail,
            error = ?$request.error.as_ref().map(|e| &e.message),
            payload = %$request.payload,
            "📝 MESSAGE_LOG"
        )
    };
}

macro_rules! severity_methods {
    ($($(#[$doc:meta])* $name:ident, $async_name:ident => $severity:expr;)*) => {
        $(
            $(#[$doc])*
            pub fn $name(
                &self,
                message_id: MessageId,
                status: StatusUpdate,
                build: impl FnOnce(&mut LogPayload),
                detail: Option<&str>,
                tx: Option<&TransactionContext>,
            ) {
                let request = LogRequest::new(message_id, $severity, status, build, detail, None);
                self.write(request, tx);
            }

            pub fn $async_name(
                &self,
                message_id: MessageId,
                status: StatusUpdate,
                build: impl FnOnce(&mut LogPayload),
                detail: Option<&str>,
                tx: Option<&TransactionContext>,
            ) -> impl Future<Output = ()> + Send + '_ {
                let request = LogRequest::new(message_id, $severity, status, build, detail, None);
                self.write_async(request, tx.cloned())
            }
        )*
    };
}

macro_rules! failure_methods {
    ($($name:ident, $async_name:ident => $severity:expr;)*) => {
        $(
            pub fn $name(
                &self,
                message_id: MessageId,
                status: StatusUpdate,
                error: &(dyn std::error::Error + 'static),
                build: impl FnOnce(&mut LogPayload),
                detail: Option<&str>,
                tx: Option<&TransactionContext>,
            ) {
                let info = ErrorInfo::from_error(error);
                let request =
                    LogRequest::new(message_id, $severity, status, build, detail, Some(info));
                self.write(request, tx);
            }

            pub fn $async_name(
                &self,
                message_id: MessageId,
                status: StatusUpdate,
                error: &(dyn std::error::Error + 'static),
                build: impl FnOnce(&mut LogPayload),
                detail: Option<&str>,
                tx: Option<&TransactionContext>,
            ) -> impl Future<Output = ()> + Send + '_ {
                let info = ErrorInfo::from_error(error);
                let request =
                    LogRequest::new(message_id, $severity, status, build, detail, Some(info));
                self.write_async(request, tx.cloned())
            }
        )*
    };
}

#[derive(Clone)]
pub struct StatusLogWriter {
    store: Arc<dyn MessageStore>,
    host_id: Arc<str>,
    runtime_key: Uuid,
}

impl fmt::Debug for StatusLogWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusLogWriter")
            .field("host_id", &self.host_id)
            .field("runtime_key", &self.runtime_key)
            .finish()
    }
}

impl StatusLogWriter {
    pub fn new(store: Arc<dyn MessageStore>, host_id: impl Into<Arc<str>>, runtime_key: Uuid) -> Self {
        Self {
            store,
            host_id: host_id.into(),
            runtime_key,
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn runtime_key(&self) -> Uuid {
        self.runtime_key
    }

    severity_methods! {
        log_trace, log_trace_async => LogSeverity::Trace;
        log_debug, log_debug_async => LogSeverity::Debug;
        log_information, log_information_async => LogSeverity::Information;
        log_warning, log_warning_async => LogSeverity::Warning;
    }

    failure_methods! {
        log_error, log_error_async => LogSeverity::Error;
        log_critical, log_critical_async => LogSeverity::Critical;
    }

    fn write(&self, request: LogRequest, tx: Option<&TransactionContext>) {
        self.mirror(&request);
        let result = match tx {
            Some(tx) => self.apply(&request, tx.as_ref()),
            None => self.apply_local(&request),
        };
        if let Err(failure) = result {
            self.report_failure(&request, &failure);
        }
    }

    async fn write_async(&self, request: LogRequest, tx: Option<TransactionContext>) {
        self.mirror(&request);
        let result = match tx {
            Some(tx) => self.apply_async(&request, tx.as_ref()).await,
            None => self.apply_local_async(&request).await,
        };
        if let Err(failure) = result {
            self.report_failure(&request, &failure);
        }
    }

    fn apply_local(&self, request: &LogRequest) -> StoreResult<()> {
        let tx = self.store.create_transaction()?;
        let result = self
            .apply(request, tx.as_ref())
            .and_then(|()| tx.commit());
        if result.is_err() {
            if let Err(rollback) = tx.rollback() {
                warn!(message_id = %request.message_id, error = %rollback, "Failed to roll back local log transaction");
            }
        }
        result
    }

    async fn apply_local_async(&self, request: &LogRequest) -> StoreResult<()> {
        let tx = self.store.create_transaction_async().await?;
        let result = match self.apply_async(request, tx.as_ref()).await {
            Ok(()) => tx.commit_async().await,
            Err(failure) => Err(failure),
        };
        if result.is_err() {
            if let Err(rollback) = tx.rollback_async().await {
                warn!(message_id = %request.message_id, error = %rollback, "Failed to roll back local log transaction");
            }
        }
        result
    }

    fn apply(&self, request: &LogRequest, tx: &dyn Transaction) -> StoreResult<()> {
        let envelope = self.store.find_envelope_in(tx, request.message_id)?;
        let current = match &envelope {
            Some(envelope) => Some(envelope.status),
            None => last_status(self.store.log_entries_in(tx, request.message_id)?),
        };
        let resolved = self.resolve(request, envelope, current);
        if let Some(token) = resolved.write_with {
            self.store
                .update_status(tx, request.message_id, token, resolved.recorded)?;
        }
        self.store
            .append_log_entry(tx, self.entry(request, resolved.recorded))
    }

    async fn apply_async(&self, request: &LogRequest, tx: &dyn Transaction) -> StoreResult<()> {
        let envelope = self
            .store
            .find_envelope_in_async(tx, request.message_id)
            .await?;
        let current = match &envelope {
            Some(envelope) => Some(envelope.status),
            None => last_status(
                self.store
                    .log_entries_in_async(tx, request.message_id)
                    .await?,
            ),
        };
        let resolved = self.resolve(request, envelope, current);
        if let Some(token) = resolved.write_with {
            self.store
                .update_status_async(tx, request.message_id, token, resolved.recorded)
                .await?;
        }
        self.store
            .append_log_entry_async(tx, self.entry(request, resolved.recorded))
            .await
    }

    /// Plan the write from the header and status visible in the writing transaction
    fn resolve(
        &self,
        request: &LogRequest,
        envelope: Option<MessageEnvelope>,
        current: Option<MessageStatus>,
    ) -> Resolved {
        match plan_transition(current, request.update) {
            Ok(plan) => Resolved {
                recorded: plan.recorded,
                write_with: envelope
                    .filter(|_| plan.write)
                    .map(|envelope| envelope.sync_token),
            },
            Err(rejected) => {
                warn!(
                    message_id = %request.message_id,
                    error = %rejected,
                    "Status transition rejected; entry records the current status"
                );
                Resolved {
                    recorded: current.unwrap_or_default(),
                    write_with: None,
                }
            }
        }
    }

    fn entry(&self, request: &LogRequest, status: MessageStatus) -> NewLogEntry {
        NewLogEntry {
            message_id: request.message_id,
            severity: request.severity,
            status,
            payload: request.payload.clone(),
            detail: request.detail.clone(),
            error: request.error.clone(),
            host_id: self.host_id.to_string(),
            runtime_key: self.runtime_key,
        }
    }

    fn mirror(&self, request: &LogRequest) {
        match request.severity {
            LogSeverity::Trace => mirror!(Level::TRACE, self, request),
            LogSeverity::Debug => mirror!(Level::DEBUG, self, request),
            LogSeverity::Information => mirror!(Level::INFO, self, request),
            LogSeverity::Warning => mirror!(Level::WARN, self, request),
            LogSeverity::Error | LogSeverity::Critical => mirror!(Level::ERROR, self, request),
        }
    }

    fn report_failure(&self, request: &LogRequest, failure: &dyn std::error::Error) {
        error!(
            message_id = %request.message_id,
            severity = %request.severity,
            status = %request.update,
            host_id = %self.host_id,
            error = %failure,
            "Failed to record message log entry"
        );
    }
}

fn last_status(entries: Vec<MessageLogEntry>) -> Option<MessageStatus> {
    entries.last().map(|entry| entry.status)
}
