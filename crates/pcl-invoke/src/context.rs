use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use pcl_types::{
    EventService, Status, TransactionProposal, TransactionProposalResponse, TxValidationCode,
    TxnId,
};

use crate::request::{Opts, Request, TargetFilter, TimeoutKind};
use crate::services::{DiscoveryService, Membership, SelectionService, Transactor};

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Output accumulated by the pipeline.
#[derive(Clone, Debug, Default)]
pub struct Response {
    pub proposal: Option<TransactionProposal>,
    /// Endorsements, in target order.
    pub responses: Vec<TransactionProposalResponse>,
    pub transaction_id: Option<TxnId>,
    /// Chaincode payload of the first endorsement.
    pub payload: Bytes,
    pub chaincode_status: i32,
    /// Set once the commit step observed a `VALID` outcome.
    pub tx_validation_code: Option<TxValidationCode>,
    pub endorsements_validated: bool,
}

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// State of one invocation. Consumed by exactly one pipeline run.
pub struct RequestContext {
    pub request: Request,
    pub opts: Opts,
    pub response: Response,
    /// Cancelling this token aborts any step waiting on the network.
    pub cancel: CancellationToken,
    /// Predicate applied to selected peers, derived from the target filter.
    pub selection_filter: Option<Arc<dyn TargetFilter>>,
    error: Option<Status>,
}

impl RequestContext {
    pub fn new(request: Request, opts: Opts) -> Self {
        let selection_filter = opts.target_filter.clone();
        Self {
            request,
            opts,
            response: Response::default(),
            cancel: CancellationToken::new(),
            selection_filter,
            error: None,
        }
    }

    /// Use a caller-owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Record the failure of this invocation.
    ///
    /// The error slot is write-once: the first failure wins and later ones
    /// are only logged.
    pub fn fail(&mut self, status: Status) {
        match &self.error {
            None => self.error = Some(status),
            Some(existing) => {
                warn!(existing = %existing, ignored = %status, "invocation already failed");
            }
        }
    }

    pub fn error(&self) -> Option<&Status> {
        self.error.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn timeout(&self, kind: TimeoutKind) -> Option<Duration> {
        self.opts.timeouts.get(kind)
    }

    /// Fail with a cancellation status if the caller has cancelled.
    /// Returns `true` when the step must stop.
    pub fn check_cancelled(&mut self, step: &str) -> bool {
        if self.cancel.is_cancelled() {
            self.fail(Status::cancelled(format!("invocation cancelled before {step}")));
            return true;
        }
        false
    }

    /// Terminal outcome: the response or the single error, never both.
    pub fn into_result(self) -> Result<Response, Status> {
        match self.error {
            Some(status) => Err(status),
            None => Ok(self.response),
        }
    }
}

// ---------------------------------------------------------------------------
// ClientContext
// ---------------------------------------------------------------------------

/// Collaborators shared by every invocation on a channel.
#[derive(Clone)]
pub struct ClientContext {
    pub channel_id: String,
    pub membership: Arc<dyn Membership>,
    pub discovery: Arc<dyn DiscoveryService>,
    pub selection: Arc<dyn SelectionService>,
    pub transactor: Arc<dyn Transactor>,
    /// Required by the commit step only.
    pub event_service: Option<Arc<dyn EventService>>,
}
