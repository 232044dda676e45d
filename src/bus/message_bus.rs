//! # Message Bus
//!
//! Eight entry points share one dispatch skeleton:
//!
//! 1. take the caller's transaction, or open one and own it
//! 2. get or build the processor for the request type
//! 3. persist the request and decode the stored payload (write-ahead)
//! 4. build the handler context through the context factory
//! 5. run the processor; response-bearing shapes persist their outcome
//! 6. commit an owned transaction
//!
//! Any failure is logged with the message id, the status at failure and the
//! trace, an owned transaction is rolled back, and the original error is
//! returned. A message that was persisted before the failure keeps an
//! `Aborted` entry: after a rollback it is written in a transaction of its own.

use super::options::SendOptions;
use super::processor_cache::ProcessorCache;
use crate::config::BusConfig;
use crate::error::{BusError, BusResult};
use crate::handlers::{ContextFactory, DispatchContext, HandlerContext, TraceInfo};
use crate::logging;
use crate::messaging::{
    from_payload, to_payload, Message, MessageId, MessageSerializer, Outcome, Request,
};
use crate::processor::{Dispatch, ResponseSink};
use crate::registry::{HandlerRegistry, MessageType, ServiceProvider, TypeRegistry};
use crate::state_machine::{MessageStatus, StatusUpdate};
use crate::storage::{
    LogPayload, MessageStore, NewMessage, StatusLogWriter, StoreError, TransactionContext,
};
use async_trait::async_trait;
use chrono::Utc;
use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, field, instrument, Span};
use uuid::Uuid;

/// Transaction of one dispatch and whether this call decides its fate
struct CallTransaction {
    transaction: TransactionContext,
    owned: bool,
}

/// How far a dispatch got before it returned
#[derive(Debug, Default)]
struct Progress {
    message_id: Option<MessageId>,
    trace: Option<Arc<TraceInfo>>,
    /// The processor ran and wrote its final lifecycle entry into the dispatch transaction
    lifecycle_recorded: bool,
}

/// The in-process message bus
pub struct MessageBus {
    pub(super) registry: Arc<HandlerRegistry>,
    pub(super) services: Arc<ServiceProvider>,
    pub(super) store: Arc<dyn MessageStore>,
    pub(super) serializer: Arc<dyn MessageSerializer>,
    pub(super) context_factory: Arc<dyn ContextFactory>,
    pub(super) processors: ProcessorCache,
    pub(super) log: StatusLogWriter,
    pub(super) config: BusConfig,
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("host_id", &self.config.host_id)
            .field("runtime_key", &self.log.runtime_key())
            .field("handlers", &self.registry.stats().total_handlers())
            .field("cached_processors", &self.processors.len())
            .field("serializer", &self.serializer)
            .finish()
    }
}

impl MessageBus {
    /// Send a fire-and-forget request
    pub fn send<R: Request<Response = ()>>(&self, request: &R) -> BusResult<Outcome<()>> {
        self.dispatch(request, SendOptions::default())
    }

    pub fn send_with<R: Request<Response = ()>>(
        &self,
        request: &R,
        options: SendOptions,
    ) -> BusResult<Outcome<()>> {
        self.dispatch(request, options)
    }

    /// Send a request and return its handler's outcome
    pub fn request<R: Request>(&self, request: &R) -> BusResult<Outcome<R::Response>> {
        self.dispatch(request, SendOptions::default())
    }

    pub fn request_with<R: Request>(
        &self,
        request: &R,
        options: SendOptions,
    ) -> BusResult<Outcome<R::Response>> {
        self.dispatch(request, options)
    }

    pub async fn send_async<R: Request<Response = ()>>(&self, request: &R) -> BusResult<Outcome<()>> {
        self.dispatch_async(request, SendOptions::default()).await
    }

    pub async fn send_with_async<R: Request<Response = ()>>(
        &self,
        request: &R,
        options: SendOptions,
    ) -> BusResult<Outcome<()>> {
        self.dispatch_async(request, options).await
    }

    pub async fn request_async<R: Request>(&self, request: &R) -> BusResult<Outcome<R::Response>> {
        self.dispatch_async(request, SendOptions::default()).await
    }

    pub async fn request_with_async<R: Request>(
        &self,
        request: &R,
        options: SendOptions,
    ) -> BusResult<Outcome<R::Response>> {
        self.dispatch_async(request, options).await
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn host_id(&self) -> &str {
        &self.config.host_id
    }

    /// Distinguishes entries written by this instance from earlier or concurrent ones
    pub fn runtime_key(&self) -> Uuid {
        self.log.runtime_key()
    }

    /// Number of request types with a built processor
    pub fn cached_processors(&self) -> usize {
        self.processors.len()
    }

    #[instrument(
        name = "bus.dispatch",
        skip_all,
        fields(
            message_type = type_name::<R>(),
            host_id = %self.config.host_id,
            trace_id = field::Empty,
        )
    )]
    fn dispatch<R: Request>(
        &self,
        request: &R,
        options: SendOptions,
    ) -> BusResult<Outcome<R::Response>> {
        let started = Instant::now();
        let mut progress = Progress::default();
        let call = self
            .begin(&options)
            .inspect_err(|e| self.record_failure::<R>(e, &progress, None))?;
        let result = self
            .dispatch_in(request, &options, &call.transaction, &mut progress)
            .and_then(|outcome| self.commit(&call).map(|()| outcome));
        match result {
            Ok(outcome) => {
                self.record_success::<R>(started, &progress);
                Ok(outcome)
            }
            Err(error) => {
                let status = progress.message_id.and_then(|message_id| {
                    self.store
                        .current_status_in(call.transaction.as_ref(), message_id)
                        .ok()
                        .flatten()
                });
                self.record_failure::<R>(&error, &progress, status);
                if call.owned {
                    self.rollback(&call);
                }
                if let Some((message_id, tx)) = self.abort_target(&progress, &call) {
                    self.log.log_error(
                        message_id,
                        MessageStatus::Aborted.into(),
                        &error,
                        |p| abort_payload(p, &error, &progress),
                        Some(&error.to_string()),
                        tx,
                    );
                }
                Err(error)
            }
        }
    }

    #[instrument(
        name = "bus.dispatch",
        skip_all,
        fields(
            message_type = type_name::<R>(),
            host_id = %self.config.host_id,
            trace_id = field::Empty,
        )
    )]
    async fn dispatch_async<R: Request>(
        &self,
        request: &R,
        options: SendOptions,
    ) -> BusResult<Outcome<R::Response>> {
        let started = Instant::now();
        let mut progress = Progress::default();
        let call = self
            .begin_async(&options)
            .await
            .inspect_err(|e| self.record_failure::<R>(e, &progress, None))?;
        let result = self
            .dispatch_in_async(request, &options, &call.transaction, &mut progress)
            .await;
        let result = match result {
            Ok(outcome) => self.commit_async(&call).await.map(|()| outcome),
            Err(error) => Err(error),
        };
        match result {
            Ok(outcome) => {
                self.record_success::<R>(started, &progress);
                Ok(outcome)
            }
            Err(error) => {
                let status = match progress.message_id {
                    Some(message_id) => self
                        .store
                        .find_envelope_in_async(call.transaction.as_ref(), message_id)
                        .await
                        .ok()
                        .flatten()
                        .map(|envelope| envelope.status),
                    None => None,
                };
                self.record_failure::<R>(&error, &progress, status);
                if call.owned {
                    self.rollback_async(&call).await;
                }
                if let Some((message_id, tx)) = self.abort_target(&progress, &call) {
                    let detail = error.to_string();
                    self.log
                        .log_error_async(
                            message_id,
                            MessageStatus::Aborted.into(),
                            &error,
                            |p| abort_payload(p, &error, &progress),
                            Some(&detail),
                            tx,
                        )
                        .await;
                }
                Err(error)
            }
        }
    }

    fn dispatch_in<R: Request>(
        &self,
        request: &R,
        options: &SendOptions,
        tx: &TransactionContext,
        progress: &mut Progress,
    ) -> BusResult<Outcome<R::Response>> {
        ensure_not_cancelled(options, None)?;
        let processor = self.processors.get_or_create::<R>(&self.registry)?;
        let message_type = self.message_type::<R>()?;

        let message = self.request_message(message_type, request, options)?;
        let saved = self
            .store
            .save_request_message(tx.as_ref(), message)?
            .ok_or_else(|| missing_handle(message_type))?;
        progress.message_id = Some(saved.id);
        ensure_payload(message_type, &saved.payload)?;
        self.log.log_trace(
            saved.id,
            StatusUpdate::Unchanged,
            |p| {
                p.message("Message persisted")
                    .field("message_type", message_type.name());
            },
            None,
            Some(tx),
        );

        let request: R = from_payload(self.serializer.as_ref(), message_type.name(), &saved.payload)?;
        let trace = trace_for(message_type, options);
        progress.trace = Some(Arc::clone(&trace));
        let context = self.context_for(message_type, saved.id, trace, options, tx)?;
        ensure_not_cancelled(options, Some(saved.id))?;

        let scope = self.services.create_scope();
        let responses = self.response_sink(saved.id, tx, options);
        let result = processor.process(Dispatch {
            request: &request,
            context: context.as_ref(),
            scope: &scope,
            registry: &self.registry,
            responses: &responses,
        });
        progress.lifecycle_recorded = true;
        result
    }

    async fn dispatch_in_async<R: Request>(
        &self,
        request: &R,
        options: &SendOptions,
        tx: &TransactionContext,
        progress: &mut Progress,
    ) -> BusResult<Outcome<R::Response>> {
        ensure_not_cancelled(options, None)?;
        let processor = self.processors.get_or_create::<R>(&self.registry)?;
        let message_type = self.message_type::<R>()?;

        let message = self.request_message(message_type, request, options)?;
        let saved = self
            .store
            .save_request_message_async(tx.as_ref(), message)
            .await?
            .ok_or_else(|| missing_handle(message_type))?;
        progress.message_id = Some(saved.id);
        ensure_payload(message_type, &saved.payload)?;
        self.log
            .log_trace_async(
                saved.id,
                StatusUpdate::Unchanged,
                |p| {
                    p.message("Message persisted")
                        .field("message_type", message_type.name());
                },
                None,
                Some(tx),
            )
            .await;

        let request: R = from_payload(self.serializer.as_ref(), message_type.name(), &saved.payload)?;
        let trace = trace_for(message_type, options);
        progress.trace = Some(Arc::clone(&trace));
        let context = self.context_for(message_type, saved.id, trace, options, tx)?;
        ensure_not_cancelled(options, Some(saved.id))?;

        let scope = self.services.create_scope();
        let responses = self.response_sink(saved.id, tx, options);
        let result = processor
            .process_async(Dispatch {
                request: &request,
                context: context.as_ref(),
                scope: &scope,
                registry: &self.registry,
                responses: &responses,
            })
            .await;
        progress.lifecycle_recorded = true;
        result
    }

    fn begin(&self, options: &SendOptions) -> BusResult<CallTransaction> {
        match options.transaction() {
            Some(transaction) => Ok(CallTransaction {
                transaction: Arc::clone(transaction),
                owned: false,
            }),
            None => Ok(CallTransaction {
                transaction: self.store.create_transaction()?,
                owned: true,
            }),
        }
    }

    async fn begin_async(&self, options: &SendOptions) -> BusResult<CallTransaction> {
        match options.transaction() {
            Some(transaction) => Ok(CallTransaction {
                transaction: Arc::clone(transaction),
                owned: false,
            }),
            None => Ok(CallTransaction {
                transaction: self.store.create_transaction_async().await?,
                owned: true,
            }),
        }
    }

    fn commit(&self, call: &CallTransaction) -> BusResult<()> {
        if call.owned {
            call.transaction.commit()?;
        }
        Ok(())
    }

    async fn commit_async(&self, call: &CallTransaction) -> BusResult<()> {
        if call.owned {
            call.transaction.commit_async().await?;
        }
        Ok(())
    }

    fn rollback(&self, call: &CallTransaction) {
        if let Err(rollback_error) = call.transaction.rollback() {
            self.record_rollback_failure(&call.transaction, &rollback_error);
        }
    }

    async fn rollback_async(&self, call: &CallTransaction) {
        if let Err(rollback_error) = call.transaction.rollback_async().await {
            self.record_rollback_failure(&call.transaction, &rollback_error);
        }
    }

    fn message_type<R: Request>(&self) -> BusResult<&MessageType> {
        self.registry
            .types()
            .message_type_of::<R>()
            .ok_or_else(|| BusError::handler_not_registered(type_name::<R>()))
    }

    fn request_message<R: Request>(
        &self,
        message_type: &MessageType,
        request: &R,
        options: &SendOptions,
    ) -> BusResult<NewMessage> {
        let payload = to_payload(self.serializer.as_ref(), message_type.name(), request)?;
        Ok(
            NewMessage::new(message_type.id(), self.serializer.content_type(), payload)
                .with_host(self.config.host_id.as_str())
                .with_session(options.session_id().map(str::to_string))
                .corresponding_to(options.corresponding_message_id())
                .with_retry_count(options.retry_count())
                .delayed_until(options.delay_until()),
        )
    }

    fn context_for(
        &self,
        message_type: &MessageType,
        message_id: MessageId,
        trace: Arc<TraceInfo>,
        options: &SendOptions,
        tx: &TransactionContext,
    ) -> BusResult<Box<dyn HandlerContext>> {
        let dispatch = DispatchContext {
            transaction: Arc::clone(tx),
            trace,
            host_id: Arc::from(self.config.host_id.as_str()),
            runtime_key: self.log.runtime_key(),
            message_id,
            message_type: message_type.id(),
            session_id: options.session_id().map(str::to_string),
            timeout: options
                .timeout()
                .unwrap_or_else(|| self.config.default_timeout()),
            started_at: Utc::now(),
            log: self.log.clone(),
            cancellation: options.cancellation().cloned(),
        };

        let context = self.context_factory.create(dispatch);
        let expected = self.registry.context_type();
        if context.as_any().type_id() != expected.id() {
            return Err(BusError::ContextTypeMismatch {
                expected: expected.name().to_string(),
                actual: context.context_name().to_string(),
            });
        }
        Ok(context)
    }

    fn response_sink<'a>(
        &'a self,
        request_id: MessageId,
        tx: &'a TransactionContext,
        options: &'a SendOptions,
    ) -> StoreResponseSink<'a> {
        StoreResponseSink {
            store: self.store.as_ref(),
            serializer: self.serializer.as_ref(),
            tx,
            request_id,
            host_id: &self.config.host_id,
            session_id: options.session_id(),
        }
    }

    fn record_success<R: Request>(&self, started: Instant, progress: &Progress) {
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let message_id = progress.message_id.map(|id| id.to_string());
        logging::log_dispatch_operation(
            "dispatch",
            type_name::<R>(),
            message_id.as_deref(),
            &self.config.host_id,
            "completed",
            Some(duration_ms),
        );
    }

    fn record_failure<R: Request>(
        &self,
        failure: &BusError,
        progress: &Progress,
        status: Option<MessageStatus>,
    ) {
        let trace = progress.trace.as_deref();
        error!(
            host_id = %self.config.host_id,
            message_type = type_name::<R>(),
            message_id = progress.message_id.map(field::display),
            status_at_failure = status.map(field::display),
            trace_id = trace.map(|t| field::display(t.trace_id())),
            trace_depth = trace.map(TraceInfo::depth),
            error_kind = failure.kind(),
            error = %failure,
            "Dispatch failed"
        );
    }

    /// Where the `Aborted` entry of a failed dispatch goes, if anywhere.
    ///
    /// An owned transaction is rolled back by now, so the entry gets its own.
    /// In a caller's transaction the processor's entry stands; the bus adds one
    /// only when the failure came before the processor ran.
    fn abort_target<'c>(
        &self,
        progress: &Progress,
        call: &'c CallTransaction,
    ) -> Option<(MessageId, Option<&'c TransactionContext>)> {
        let message_id = progress.message_id?;
        match (call.owned, progress.lifecycle_recorded) {
            (true, _) => Some((message_id, None)),
            (false, false) => Some((message_id, Some(&call.transaction))),
            (false, true) => None,
        }
    }

    fn record_rollback_failure(
        &self,
        transaction: &TransactionContext,
        rollback_error: &StoreError,
    ) {
        error!(
            host_id = %self.config.host_id,
            transaction_id = %transaction.id(),
            error = %rollback_error,
            "Rollback failed; the original dispatch error is returned"
        );
    }
}

fn trace_for(message_type: &MessageType, options: &SendOptions) -> Arc<TraceInfo> {
    let operation = message_type.name();
    let trace = match options.trace() {
        Some(parent) => parent.child(operation),
        None => TraceInfo::root(operation),
    };
    Span::current().record("trace_id", field::display(trace.trace_id()));
    trace
}

fn abort_payload(payload: &mut LogPayload, failure: &BusError, progress: &Progress) {
    payload
        .message("Dispatch failed")
        .field("error_kind", failure.kind());
    if let Some(trace) = &progress.trace {
        payload
            .field("trace_id", trace.trace_id())
            .field("trace_depth", trace.depth())
            .field("operation", trace.operation());
    }
}

fn ensure_not_cancelled(options: &SendOptions, message_id: Option<MessageId>) -> BusResult<()> {
    if options.is_cancelled() {
        debug!(message_id = ?message_id, "Dispatch cancelled before handler invocation");
        return Err(BusError::CancelledBeforeDispatch { message_id });
    }
    Ok(())
}

fn missing_handle(message_type: &MessageType) -> BusError {
    BusError::invariant(format!(
        "storage returned no handle for message of type {}",
        message_type.name()
    ))
}

fn ensure_payload(message_type: &MessageType, payload: &[u8]) -> BusResult<()> {
    if payload.is_empty() {
        return Err(BusError::invariant(format!(
            "storage returned an empty payload for message of type {}",
            message_type.name()
        )));
    }
    Ok(())
}

/// Persists response outcomes in the dispatch transaction, linked to the request
struct StoreResponseSink<'a> {
    store: &'a dyn MessageStore,
    serializer: &'a dyn MessageSerializer,
    tx: &'a TransactionContext,
    request_id: MessageId,
    host_id: &'a str,
    session_id: Option<&'a str>,
}

impl StoreResponseSink<'_> {
    fn response_message<T: Message>(&self, outcome: &Outcome<T>) -> BusResult<NewMessage> {
        let name = T::message_name();
        let payload = to_payload(self.serializer, &name, outcome)?;
        Ok(
            NewMessage::new(TypeRegistry::resolve::<T>(), self.serializer.content_type(), payload)
                .with_host(self.host_id)
                .with_session(self.session_id.map(str::to_string))
                .corresponding_to(Some(self.request_id)),
        )
    }

    fn missing_response_handle<T: Message>(&self) -> BusError {
        BusError::invariant(format!(
            "storage returned no handle for the {} response to message {}",
            T::message_name(),
            self.request_id
        ))
    }
}

#[async_trait]
impl<T: Message> ResponseSink<T> for StoreResponseSink<'_> {
    fn save(&self, outcome: &Outcome<T>) -> BusResult<()> {
        let response = self.response_message(outcome)?;
        self.store
            .save_response_message(self.tx.as_ref(), response)?
            .ok_or_else(|| self.missing_response_handle::<T>())?;
        Ok(())
    }

    async fn save_async(&self, outcome: &Outcome<T>) -> BusResult<()> {
        let response = self.response_message(outcome)?;
        self.store
            .save_response_message_async(self.tx.as_ref(), response)
            .await?
            .ok_or_else(|| self.missing_response_handle::<T>())?;
        Ok(())
    }
}
