//! # Handler Context
//!
//! Every dispatch builds one [`DispatchContext`] and hands it to the configured
//! [`ContextFactory`], which may wrap it in an application-specific context. The
//! registry is configured for exactly one context type; handlers and
//! interceptors must declare that same type.

use crate::bus::SendOptions;
use crate::messaging::{MessageId, MessageTypeId};
use crate::state_machine::StatusUpdate;
use crate::storage::{LogPayload, StatusLogWriter, TransactionContext};
use chrono::{DateTime, Utc};
use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A context type handlers can declare.
///
/// Implementations wrap a [`DispatchContext`]; the bus reaches the dispatch
/// data through [`HandlerContext::dispatch`] whatever the concrete type is.
pub trait HandlerContext: Any + Send + Sync {
    fn dispatch(&self) -> &DispatchContext;

    fn as_any(&self) -> &dyn Any;

    /// Concrete type name, for error messages
    fn context_name(&self) -> &'static str {
        type_name::<Self>()
    }
}

/// Trace lineage of a dispatch.
///
/// Nested dispatches point at their parent instead of copying it, so the
/// chain can be walked back to the root call.
#[derive(Debug, Clone)]
pub struct TraceInfo {
    trace_id: Uuid,
    span_id: Uuid,
    operation: String,
    started_at: DateTime<Utc>,
    previous: Option<Arc<TraceInfo>>,
}

impl TraceInfo {
    pub fn root(operation: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            trace_id: Uuid::new_v4(),
            span_id: Uuid::new_v4(),
            operation: operation.into(),
            started_at: Utc::now(),
            previous: None,
        })
    }

    /// New span in the same trace, linked to `self`
    pub fn child(self: &Arc<Self>, operation: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            trace_id: self.trace_id,
            span_id: Uuid::new_v4(),
            operation: operation.into(),
            started_at: Utc::now(),
            previous: Some(Arc::clone(self)),
        })
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn span_id(&self) -> Uuid {
        self.span_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn previous(&self) -> Option<&Arc<TraceInfo>> {
        self.previous.as_ref()
    }

    /// Number of ancestors; zero for a root trace
    pub fn depth(&self) -> usize {
        self.lineage().count() - 1
    }

    /// This trace followed by its ancestors, nearest first
    pub fn lineage(&self) -> impl Iterator<Item = &TraceInfo> {
        std::iter::successors(Some(self), |trace| trace.previous.as_deref())
    }
}

/// Per-dispatch data built by the bus
#[derive(Clone)]
pub struct DispatchContext {
    pub(crate) transaction: TransactionContext,
    pub(crate) trace: Arc<TraceInfo>,
    pub(crate) host_id: Arc<str>,
    pub(crate) runtime_key: Uuid,
    pub(crate) message_id: MessageId,
    pub(crate) message_type: MessageTypeId,
    pub(crate) session_id: Option<String>,
    pub(crate) timeout: Duration,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) log: StatusLogWriter,
    pub(crate) cancellation: Option<CancellationToken>,
}

impl DispatchContext {
    /// Transaction the dispatch runs in; owned by the bus or by the caller
    pub fn transaction(&self) -> &TransactionContext {
        &self.transaction
    }

    pub fn trace(&self) -> &Arc<TraceInfo> {
        &self.trace
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn runtime_key(&self) -> Uuid {
        self.runtime_key
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn message_type(&self) -> MessageTypeId {
        self.message_type
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Budget for the handler; the bus does not enforce it
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn log(&self) -> &StatusLogWriter {
        &self.log
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Options for a send issued from inside this dispatch.
    ///
    /// The nested call joins this dispatch's transaction without owning it and
    /// continues its trace lineage.
    pub fn nested_options(&self) -> SendOptions {
        let mut options = SendOptions::new()
            .with_transaction(Arc::clone(&self.transaction))
            .with_trace(Arc::clone(&self.trace))
            .with_timeout(self.timeout)
            .corresponding_to(self.message_id);
        if let Some(session_id) = &self.session_id {
            options = options.with_session(session_id.clone());
        }
        if let Some(token) = &self.cancellation {
            options = options.with_cancellation(token.child_token());
        }
        options
    }

    /// Audit entry against the current message, inside the dispatch transaction
    pub fn log_information(&self, build: impl FnOnce(&mut LogPayload), detail: Option<&str>) {
        self.log.log_information(
            self.message_id,
            StatusUpdate::Unchanged,
            build,
            detail,
            Some(&self.transaction),
        );
    }

    pub fn log_warning(&self, build: impl FnOnce(&mut LogPayload), detail: Option<&str>) {
        self.log.log_warning(
            self.message_id,
            StatusUpdate::Unchanged,
            build,
            detail,
            Some(&self.transaction),
        );
    }
}

impl HandlerContext for DispatchContext {
    fn dispatch(&self) -> &DispatchContext {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("message_id", &self.message_id)
            .field("message_type", &self.message_type)
            .field("host_id", &self.host_id)
            .field("trace_id", &self.trace.trace_id)
            .field("depth", &self.trace.depth())
            .field("session_id", &self.session_id)
            .field("transaction", &self.transaction.id())
            .finish()
    }
}

/// Builds the context handed to handlers from the bus-built dispatch data
pub trait ContextFactory: Send + Sync {
    fn create(&self, dispatch: DispatchContext) -> Box<dyn HandlerContext>;
}

/// Hands the [`DispatchContext`] through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultContextFactory;

impl ContextFactory for DefaultContextFactory {
    fn create(&self, dispatch: DispatchContext) -> Box<dyn HandlerContext> {
        Box::new(dispatch)
    }
}

pub(crate) fn downcast_context<C: HandlerContext>(context: &dyn HandlerContext) -> Option<&C> {
    context.as_any().downcast_ref::<C>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_lineage_links_to_parent() {
        let root = TraceInfo::root("orders.place");
        let child = root.child("inventory.reserve");
        let grandchild = child.child("inventory.audit");

        assert_eq!(root.depth(), 0);
        assert_eq!(grandchild.depth(), 2);
        assert_eq!(grandchild.trace_id(), root.trace_id());
        assert_ne!(grandchild.span_id(), child.span_id());
        assert!(Arc::ptr_eq(grandchild.previous().unwrap(), &child));

        let operations: Vec<_> = grandchild.lineage().map(TraceInfo::operation).collect();
        assert_eq!(
            operations,
            vec!["inventory.audit", "inventory.reserve", "orders.place"]
        );
    }
}
