//! Requests, handlers and interceptors shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use courier_core::{
    AsyncHandler, AsyncInterceptor, AsyncResponseHandler, BusConfig, Candidate, Completion,
    DispatchContext, HandlerRegistry, HandlerResult, InMemoryMessageStore, InterceptedCall,
    Interceptor, InterceptorKey, Message, MessageBus, MessageId, MessageStatus, MessageStore,
    Outcome, Proceed, ProceedAsync, Request, SyncHandler, SyncResponseHandler,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What handlers and interceptors observed during a test
#[derive(Debug, Default)]
pub struct Recorder {
    message_ids: Mutex<Vec<MessageId>>,
    statuses_seen: Mutex<Vec<Option<MessageStatus>>>,
    handler_calls: AtomicUsize,
    before_proceed: AtomicUsize,
    after_proceed: AtomicUsize,
}

impl Recorder {
    pub fn record(&self, context: &DispatchContext) {
        self.handler_calls.fetch_add(1, Ordering::SeqCst);
        self.message_ids.lock().push(context.message_id());
    }

    pub fn message_ids(&self) -> Vec<MessageId> {
        self.message_ids.lock().clone()
    }

    pub fn last_message_id(&self) -> MessageId {
        *self.message_ids.lock().last().expect("a handler ran")
    }

    pub fn statuses_seen(&self) -> Vec<Option<MessageStatus>> {
        self.statuses_seen.lock().clone()
    }

    pub fn handler_calls(&self) -> usize {
        self.handler_calls.load(Ordering::SeqCst)
    }

    pub fn interceptions(&self) -> (usize, usize) {
        (
            self.before_proceed.load(Ordering::SeqCst),
            self.after_proceed.load(Ordering::SeqCst),
        )
    }
}

// Requests

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    pub note: String,
}

impl Message for Ping {}
impl Request for Ping {
    type Response = ();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Add {
    pub a: i64,
    pub b: i64,
}

impl Message for Add {}
impl Request for Add {
    type Response = i64;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Divide {
    pub a: i64,
    pub b: i64,
}

impl Message for Divide {}
impl Request for Divide {
    type Response = i64;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explode;

impl Message for Explode {}
impl Request for Explode {
    type Response = ();
}

/// Handler checks the store for its own header while running
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peek;

impl Message for Peek {}
impl Request for Peek {
    type Response = ();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Square {
    pub x: i64,
}

impl Message for Square {}
impl Request for Square {
    type Response = i64;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Echo {
    pub text: String,
}

impl Message for Echo {}
impl Request for Echo {
    type Response = String;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notify {
    pub channel: String,
}

impl Message for Notify {}
impl Request for Notify {
    type Response = ();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shout {
    pub text: String,
}

impl Message for Shout {}
impl Request for Shout {
    type Response = String;
}

/// Waits for cancellation, so the test can observe it mid-handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wait;

impl Message for Wait {}
impl Request for Wait {
    type Response = String;
}

#[derive(Debug, thiserror::Error)]
#[error("division by zero")]
pub struct DivideByZero;

// Handlers

pub struct PingHandler {
    pub recorder: Arc<Recorder>,
}

impl SyncHandler for PingHandler {
    type Request = Ping;
    type Context = DispatchContext;

    fn handle(&self, _request: &Ping, context: &DispatchContext) -> HandlerResult<Outcome<()>> {
        self.recorder.record(context);
        Ok(Outcome::done())
    }
}

pub struct AddHandler;

impl SyncResponseHandler for AddHandler {
    type Request = Add;
    type Context = DispatchContext;

    fn handle(&self, request: &Add, _context: &DispatchContext) -> HandlerResult<Outcome<i64>> {
        Ok(Outcome::success(request.a + request.b))
    }
}

pub struct DivideHandler {
    pub recorder: Arc<Recorder>,
}

impl SyncResponseHandler for DivideHandler {
    type Request = Divide;
    type Context = DispatchContext;

    fn handle(&self, request: &Divide, context: &DispatchContext) -> HandlerResult<Outcome<i64>> {
        self.recorder.record(context);
        if request.b == 0 {
            return Err(DivideByZero.into());
        }
        if request.b < 0 {
            return Ok(Outcome::failure(
                "negative_divisor",
                "divisor must be positive",
            ));
        }
        Ok(Outcome::success(request.a / request.b))
    }
}

pub struct ExplodeHandler {
    pub recorder: Arc<Recorder>,
}

impl SyncHandler for ExplodeHandler {
    type Request = Explode;
    type Context = DispatchContext;

    fn handle(&self, _request: &Explode, context: &DispatchContext) -> HandlerResult<Outcome<()>> {
        self.recorder.record(context);
        panic!("handler blew up");
    }
}

pub struct PeekHandler {
    pub store: InMemoryMessageStore,
    pub recorder: Arc<Recorder>,
}

impl SyncHandler for PeekHandler {
    type Request = Peek;
    type Context = DispatchContext;

    fn handle(&self, _request: &Peek, context: &DispatchContext) -> HandlerResult<Outcome<()>> {
        self.recorder.record(context);
        let status = self
            .store
            .find_envelope_in(context.transaction().as_ref(), context.message_id())?
            .map(|envelope| envelope.status);
        self.recorder.statuses_seen.lock().push(status);
        Ok(Outcome::done())
    }
}

pub struct SquareHandler {
    pub recorder: Arc<Recorder>,
}

impl SyncResponseHandler for SquareHandler {
    type Request = Square;
    type Context = DispatchContext;

    fn handle(&self, request: &Square, context: &DispatchContext) -> HandlerResult<Outcome<i64>> {
        self.recorder.record(context);
        Ok(Outcome::success(request.x * request.x))
    }

    fn interceptor() -> Option<InterceptorKey> {
        Some(InterceptorKey::of::<CountingInterceptor>())
    }
}

pub struct EchoHandler;

#[async_trait]
impl AsyncResponseHandler for EchoHandler {
    type Request = Echo;
    type Context = DispatchContext;

    async fn handle(
        &self,
        request: &Echo,
        _context: &DispatchContext,
    ) -> HandlerResult<Outcome<String>> {
        Ok(Outcome::success(request.text.clone()))
    }
}

pub struct NotifyHandler {
    pub recorder: Arc<Recorder>,
}

#[async_trait]
impl AsyncHandler for NotifyHandler {
    type Request = Notify;
    type Context = DispatchContext;

    async fn handle(&self, request: &Notify, context: &DispatchContext) -> HandlerResult<Outcome<()>> {
        self.recorder.record(context);
        Ok(Outcome::done().with_info(format!("notified {}", request.channel)))
    }
}

pub struct ShoutHandler {
    pub recorder: Arc<Recorder>,
}

#[async_trait]
impl AsyncResponseHandler for ShoutHandler {
    type Request = Shout;
    type Context = DispatchContext;

    async fn handle(
        &self,
        request: &Shout,
        context: &DispatchContext,
    ) -> HandlerResult<Outcome<String>> {
        self.recorder.record(context);
        Ok(Outcome::success(request.text.to_uppercase()))
    }

    fn interceptor() -> Option<InterceptorKey> {
        Some(InterceptorKey::of::<AsyncCountingInterceptor>())
    }
}

pub struct WaitHandler;

#[async_trait]
impl AsyncResponseHandler for WaitHandler {
    type Request = Wait;
    type Context = DispatchContext;

    async fn handle(
        &self,
        _request: &Wait,
        context: &DispatchContext,
    ) -> HandlerResult<Outcome<String>> {
        match context.cancellation() {
            Some(token) => {
                token.cancelled().await;
                Ok(Outcome::success("cancelled".to_string()).with_warning("stopped early"))
            }
            None => Ok(Outcome::success("no token".to_string())),
        }
    }
}

// Interceptors

pub struct CountingInterceptor {
    pub recorder: Arc<Recorder>,
}

impl Interceptor for CountingInterceptor {
    type Context = DispatchContext;

    fn intercept(
        &self,
        _call: &InterceptedCall,
        _context: &DispatchContext,
        next: Proceed<'_>,
    ) -> HandlerResult<Completion> {
        self.recorder.before_proceed.fetch_add(1, Ordering::SeqCst);
        let completion = next.run();
        self.recorder.after_proceed.fetch_add(1, Ordering::SeqCst);
        completion
    }
}

pub struct AsyncCountingInterceptor {
    pub recorder: Arc<Recorder>,
}

#[async_trait]
impl AsyncInterceptor for AsyncCountingInterceptor {
    type Context = DispatchContext;

    async fn intercept(
        &self,
        _call: &InterceptedCall,
        _context: &DispatchContext,
        next: ProceedAsync<'_>,
    ) -> HandlerResult<Completion> {
        self.recorder.before_proceed.fetch_add(1, Ordering::SeqCst);
        let completion = next.run().await;
        self.recorder.after_proceed.fetch_add(1, Ordering::SeqCst);
        completion
    }
}

// Wiring

/// A bus over the in-memory store with every fixture handler registered
pub struct TestBus {
    pub bus: Arc<MessageBus>,
    pub store: InMemoryMessageStore,
    pub recorder: Arc<Recorder>,
}

pub fn fixture_candidates(store: &InMemoryMessageStore, recorder: &Arc<Recorder>) -> Vec<Candidate> {
    let ping = Arc::clone(recorder);
    let divide = Arc::clone(recorder);
    let explode = Arc::clone(recorder);
    let peek = (store.clone(), Arc::clone(recorder));
    let square = Arc::clone(recorder);
    let notify = Arc::clone(recorder);
    let shout = Arc::clone(recorder);
    let counting = Arc::clone(recorder);
    let async_counting = Arc::clone(recorder);

    vec![
        Candidate::sync_handler(move |_| {
            Ok(PingHandler {
                recorder: Arc::clone(&ping),
            })
        }),
        Candidate::sync_response_handler(|_| Ok(AddHandler)),
        Candidate::sync_response_handler(move |_| {
            Ok(DivideHandler {
                recorder: Arc::clone(&divide),
            })
        }),
        Candidate::sync_handler(move |_| {
            Ok(ExplodeHandler {
                recorder: Arc::clone(&explode),
            })
        }),
        Candidate::sync_handler(move |_| {
            Ok(PeekHandler {
                store: peek.0.clone(),
                recorder: Arc::clone(&peek.1),
            })
        }),
        Candidate::sync_response_handler(move |_| {
            Ok(SquareHandler {
                recorder: Arc::clone(&square),
            })
        }),
        Candidate::async_response_handler(|_| Ok(EchoHandler)),
        Candidate::async_handler(move |_| {
            Ok(NotifyHandler {
                recorder: Arc::clone(&notify),
            })
        }),
        Candidate::async_response_handler(move |_| {
            Ok(ShoutHandler {
                recorder: Arc::clone(&shout),
            })
        }),
        Candidate::async_response_handler(|_| Ok(WaitHandler)),
        Candidate::interceptor(move |_| {
            Ok(CountingInterceptor {
                recorder: Arc::clone(&counting),
            })
        }),
        Candidate::async_interceptor(move |_| {
            Ok(AsyncCountingInterceptor {
                recorder: Arc::clone(&async_counting),
            })
        }),
    ]
}

pub fn test_bus() -> TestBus {
    test_bus_with(BusConfig {
        host_id: "test-host".to_string(),
        environment: "test".to_string(),
        ..BusConfig::default()
    })
}

pub fn test_bus_with(config: BusConfig) -> TestBus {
    test_bus_on(InMemoryMessageStore::new(), config)
}

/// Bus over a store whose readers only see committed writes
pub fn read_committed_bus() -> TestBus {
    test_bus_on(
        InMemoryMessageStore::read_committed(),
        BusConfig {
            host_id: "test-host".to_string(),
            environment: "test".to_string(),
            ..BusConfig::default()
        },
    )
}

pub fn test_bus_on(store: InMemoryMessageStore, config: BusConfig) -> TestBus {
    let recorder = Arc::new(Recorder::default());

    let mut registry = HandlerRegistry::for_config(&config);
    registry
        .register_all(fixture_candidates(&store, &recorder))
        .expect("fixtures register cleanly");

    let bus = MessageBus::builder(registry, Arc::new(store.clone()))
        .config(config)
        .build()
        .expect("bus builds");

    TestBus {
        bus: Arc::new(bus),
        store,
        recorder,
    }
}

pub fn cancelled_token() -> CancellationToken {
    let token = CancellationToken::new();
    token.cancel();
    token
}
