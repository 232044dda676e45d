//! Processors for asynchronous handlers.
//!
//! The blocking entry point drives the async path on the calling thread with
//! `futures::executor::block_on`. It must not be used from inside a
//! single-threaded runtime whose handlers depend on that runtime's drivers.

use super::guard::run_async;
use super::{Dispatch, Processor};
use crate::error::BusResult;
use crate::handlers::{AsyncHandler, AsyncResponseHandler};
use crate::messaging::{Outcome, Request};
use crate::registry::Shape;
use async_trait::async_trait;
use futures::executor::block_on;
use std::fmt;
use std::marker::PhantomData;

pub struct AsyncVoidProcessor<H> {
    _handler: PhantomData<fn() -> H>,
}

impl<H> AsyncVoidProcessor<H> {
    pub fn new() -> Self {
        Self {
            _handler: PhantomData,
        }
    }
}

impl<H> Default for AsyncVoidProcessor<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> fmt::Debug for AsyncVoidProcessor<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AsyncVoidProcessor<{}>", std::any::type_name::<H>())
    }
}

#[async_trait]
impl<H: AsyncHandler> Processor<H::Request> for AsyncVoidProcessor<H> {
    fn shape(&self) -> Shape {
        Shape::AsyncVoid
    }

    fn process(
        &self,
        dispatch: Dispatch<'_, H::Request>,
    ) -> BusResult<Outcome<<H::Request as Request>::Response>> {
        block_on(self.process_async(dispatch))
    }

    async fn process_async(
        &self,
        dispatch: Dispatch<'_, H::Request>,
    ) -> BusResult<Outcome<<H::Request as Request>::Response>> {
        run_async::<H::Request, H, H::Context, _>(
            Shape::AsyncVoid,
            &dispatch,
            H::interceptor(),
            |handler, request, context| handler.handle(request, context),
        )
        .await
    }
}

pub struct AsyncResponseProcessor<H> {
    _handler: PhantomData<fn() -> H>,
}

impl<H> AsyncResponseProcessor<H> {
    pub fn new() -> Self {
        Self {
            _handler: PhantomData,
        }
    }
}

impl<H> Default for AsyncResponseProcessor<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> fmt::Debug for AsyncResponseProcessor<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AsyncResponseProcessor<{}>", std::any::type_name::<H>())
    }
}

#[async_trait]
impl<H: AsyncResponseHandler> Processor<H::Request> for AsyncResponseProcessor<H> {
    fn shape(&self) -> Shape {
        Shape::AsyncResponse
    }

    fn process(
        &self,
        dispatch: Dispatch<'_, H::Request>,
    ) -> BusResult<Outcome<<H::Request as Request>::Response>> {
        block_on(self.process_async(dispatch))
    }

    async fn process_async(
        &self,
        dispatch: Dispatch<'_, H::Request>,
    ) -> BusResult<Outcome<<H::Request as Request>::Response>> {
        run_async::<H::Request, H, H::Context, _>(
            Shape::AsyncResponse,
            &dispatch,
            H::interceptor(),
            |handler, request, context| handler.handle(request, context),
        )
        .await
    }
}
