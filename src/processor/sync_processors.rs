//! Processors for blocking handlers. The async entry point runs the blocking
//! path in place; a blocking handler has nothing to await.

use super::guard::run_sync;
use super::{Dispatch, Processor};
use crate::error::BusResult;
use crate::handlers::{SyncHandler, SyncResponseHandler};
use crate::messaging::{Outcome, Request};
use crate::registry::Shape;
use async_trait::async_trait;
use std::fmt;
use std::marker::PhantomData;

pub struct SyncVoidProcessor<H> {
    _handler: PhantomData<fn() -> H>,
}

impl<H> SyncVoidProcessor<H> {
    pub fn new() -> Self {
        Self {
            _handler: PhantomData,
        }
    }
}

impl<H> Default for SyncVoidProcessor<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> fmt::Debug for SyncVoidProcessor<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncVoidProcessor<{}>", std::any::type_name::<H>())
    }
}

#[async_trait]
impl<H: SyncHandler> Processor<H::Request> for SyncVoidProcessor<H> {
    fn shape(&self) -> Shape {
        Shape::SyncVoid
    }

    fn process(
        &self,
        dispatch: Dispatch<'_, H::Request>,
    ) -> BusResult<Outcome<<H::Request as Request>::Response>> {
        run_sync::<H::Request, H, H::Context, _>(
            Shape::SyncVoid,
            &dispatch,
            H::interceptor(),
            |handler, request, context| handler.handle(request, context),
        )
    }

    async fn process_async(
        &self,
        dispatch: Dispatch<'_, H::Request>,
    ) -> BusResult<Outcome<<H::Request as Request>::Response>> {
        self.process(dispatch)
    }
}

pub struct SyncResponseProcessor<H> {
    _handler: PhantomData<fn() -> H>,
}

impl<H> SyncResponseProcessor<H> {
    pub fn new() -> Self {
        Self {
            _handler: PhantomData,
        }
    }
}

impl<H> Default for SyncResponseProcessor<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> fmt::Debug for SyncResponseProcessor<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncResponseProcessor<{}>", std::any::type_name::<H>())
    }
}

#[async_trait]
impl<H: SyncResponseHandler> Processor<H::Request> for SyncResponseProcessor<H> {
    fn shape(&self) -> Shape {
        Shape::SyncResponse
    }

    fn process(
        &self,
        dispatch: Dispatch<'_, H::Request>,
    ) -> BusResult<Outcome<<H::Request as Request>::Response>> {
        run_sync::<H::Request, H, H::Context, _>(
            Shape::SyncResponse,
            &dispatch,
            H::interceptor(),
            |handler, request, context| handler.handle(request, context),
        )
    }

    async fn process_async(
        &self,
        dispatch: Dispatch<'_, H::Request>,
    ) -> BusResult<Outcome<<H::Request as Request>::Response>> {
        self.process(dispatch)
    }
}
