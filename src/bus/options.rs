//! Per-call options for [`MessageBus`](super::MessageBus) sends.

use crate::handlers::TraceInfo;
use crate::messaging::MessageId;
use crate::storage::TransactionContext;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Options for one send or request.
///
/// A send that carries a transaction joins it and leaves commit and rollback
/// to the caller. Without one, the bus opens a transaction and owns it.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    transaction: Option<TransactionContext>,
    trace: Option<Arc<TraceInfo>>,
    session_id: Option<String>,
    corresponding_message_id: Option<MessageId>,
    delay_until: Option<DateTime<Utc>>,
    timeout: Option<Duration>,
    retry_count: u32,
    cancellation: Option<CancellationToken>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join an ambient transaction; the caller keeps ownership
    pub fn with_transaction(mut self, transaction: TransactionContext) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// Continue an existing trace; the dispatch records a child span of it
    pub fn with_trace(mut self, trace: Arc<TraceInfo>) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn corresponding_to(mut self, message_id: MessageId) -> Self {
        self.corresponding_message_id = Some(message_id);
        self
    }

    /// Recorded on the envelope only; dispatch is never deferred
    pub fn delayed_until(mut self, delay_until: DateTime<Utc>) -> Self {
        self.delay_until = Some(delay_until);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn transaction(&self) -> Option<&TransactionContext> {
        self.transaction.as_ref()
    }

    pub fn trace(&self) -> Option<&Arc<TraceInfo>> {
        self.trace.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn corresponding_message_id(&self) -> Option<MessageId> {
        self.corresponding_message_id
    }

    pub fn delay_until(&self) -> Option<DateTime<Utc>> {
        self.delay_until
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_own_their_transaction() {
        let options = SendOptions::new();
        assert!(options.transaction().is_none());
        assert!(options.trace().is_none());
        assert_eq!(options.retry_count(), 0);
        assert!(!options.is_cancelled());
    }

    #[test]
    fn test_cancellation_is_observed() {
        let token = CancellationToken::new();
        let options = SendOptions::new()
            .with_session("checkout-42")
            .with_cancellation(token.clone());
        assert_eq!(options.session_id(), Some("checkout-42"));
        assert!(!options.is_cancelled());

        token.cancel();
        assert!(options.is_cancelled());
    }
}
