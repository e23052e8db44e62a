use async_trait::async_trait;

use crate::context::{ClientContext, RequestContext};
use crate::handlers::{
    CommitTxHandler, EndorsementHandler, EndorsementValidationHandler, SignatureValidationHandler,
    TargetResolutionHandler,
};

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

/// A single step of the invocation pipeline.
///
/// A step reports its outcome only through the [`RequestContext`]: on failure
/// it calls [`RequestContext::fail`] and returns without running its
/// successor; on success it either finishes the invocation or hands over to
/// the next step with [`proceed`].
///
/// The trait is object-safe and `Send + Sync` so chains can be stored as
/// `Box<dyn Handler>` and shared between tasks.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Human-readable step name (e.g. "endorsement").
    fn name(&self) -> &str;

    /// Attach the step that runs after this one succeeds, replacing any
    /// existing successor.
    fn set_next(&mut self, next: Box<dyn Handler>);

    async fn handle(&self, request: &mut RequestContext, client: &ClientContext);
}

/// Run `next`, if any, unless the invocation has already failed.
pub async fn proceed(
    next: &Option<Box<dyn Handler>>,
    request: &mut RequestContext,
    client: &ClientContext,
) {
    if request.is_failed() {
        return;
    }
    if let Some(next) = next {
        next.handle(request, client).await;
    }
}

// ---------------------------------------------------------------------------
// HandlerChain
// ---------------------------------------------------------------------------

/// Builder that links an ordered list of steps into one handler.
pub struct HandlerChain {
    first: Box<dyn Handler>,
    rest: Vec<Box<dyn Handler>>,
}

impl HandlerChain {
    pub fn new(first: impl Handler + 'static) -> Self {
        Self::from_boxed(Box::new(first))
    }

    pub fn from_boxed(first: Box<dyn Handler>) -> Self {
        Self {
            first,
            rest: Vec::new(),
        }
    }

    /// Append a step to the end of the chain.
    pub fn then(self, step: impl Handler + 'static) -> Self {
        self.then_boxed(Box::new(step))
    }

    pub fn then_boxed(mut self, step: Box<dyn Handler>) -> Self {
        self.rest.push(step);
        self
    }

    /// Append `step` when present.
    pub fn then_optional(self, step: Option<Box<dyn Handler>>) -> Self {
        match step {
            Some(step) => self.then_boxed(step),
            None => self,
        }
    }

    /// Number of steps in the chain.
    pub fn len(&self) -> usize {
        1 + self.rest.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Step names in execution order.
    pub fn step_names(&self) -> Vec<String> {
        std::iter::once(&self.first)
            .chain(self.rest.iter())
            .map(|step| step.name().to_string())
            .collect()
    }

    /// Link every step to its successor and return the head.
    pub fn build(self) -> Box<dyn Handler> {
        let tail = self.rest.into_iter().rev().reduce(|next, mut step| {
            step.set_next(next);
            step
        });
        let mut head = self.first;
        if let Some(tail) = tail {
            head.set_next(tail);
        }
        head
    }
}

// ---------------------------------------------------------------------------
// Canonical chains
// ---------------------------------------------------------------------------

/// Query chain: resolve targets, then collect endorsements.
pub fn query_handler(next: Option<Box<dyn Handler>>) -> Box<dyn Handler> {
    HandlerChain::new(TargetResolutionHandler::new())
        .then(EndorsementHandler::new())
        .then_optional(next)
        .build()
}

/// Execute chain: resolve targets, collect endorsements, validate them, then
/// commit and wait for the commit notification.
pub fn execute_handler(next: Option<Box<dyn Handler>>) -> Box<dyn Handler> {
    HandlerChain::new(TargetResolutionHandler::new())
        .then(EndorsementHandler::new())
        .then(EndorsementValidationHandler::new())
        .then(CommitTxHandler::new())
        .then_optional(next)
        .build()
}

/// Execute chain that also checks every endorser's identity and signature
/// before submitting.
pub fn execute_handler_with_signature_validation(
    next: Option<Box<dyn Handler>>,
) -> Box<dyn Handler> {
    HandlerChain::new(TargetResolutionHandler::new())
        .then(EndorsementHandler::new())
        .then(EndorsementValidationHandler::new())
        .then(SignatureValidationHandler::new())
        .then(CommitTxHandler::new())
        .then_optional(next)
        .build()
}
