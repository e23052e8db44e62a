use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use pcl_types::{
    Code, Group, Peer, Status, TransactionProposal, TransactionProposalResponse,
};

use crate::context::{ClientContext, RequestContext};
use crate::handler::{proceed, Handler};
use crate::request::TimeoutKind;

/// Sends the proposal to every resolved target concurrently and collects
/// the endorsements in target order.
///
/// Any transport failure fails the invocation; chaincode-level failures are
/// carried in the responses and judged by the validation step.
#[derive(Default)]
pub struct EndorsementHandler {
    next: Option<Box<dyn Handler>>,
}

impl EndorsementHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_next(mut self, next: Box<dyn Handler>) -> Self {
        self.next = Some(next);
        self
    }
}

#[async_trait]
impl Handler for EndorsementHandler {
    fn name(&self) -> &str {
        "endorsement"
    }

    fn set_next(&mut self, next: Box<dyn Handler>) {
        self.next = Some(next);
    }

    async fn handle(&self, request: &mut RequestContext, client: &ClientContext) {
        if request.check_cancelled(self.name()) {
            return;
        }
        if request.opts.targets.is_empty() {
            request.fail(Status::new(
                Group::Client,
                Code::NoPeersAvailable,
                "no targets to send the proposal to",
            ));
            return;
        }
        let start = Instant::now();

        let header = match client.transactor.create_transaction_header() {
            Ok(header) => header,
            Err(e) => {
                request.fail(e.context("failed to create transaction header"));
                return;
            }
        };
        let proposal = request.request.to_proposal(header);
        let peer_timeout = request.timeout(TimeoutKind::PeerResponse);

        let collected = tokio::select! {
            result = send_proposal(&proposal, &request.opts.targets, peer_timeout) => result,
            _ = request.cancel.cancelled() => {
                Err(Status::cancelled("invocation cancelled while collecting endorsements"))
            }
        };

        let responses = match collected {
            Ok(responses) => responses,
            Err(e) => {
                request.fail(e.context("failed to collect endorsements"));
                return;
            }
        };

        let response = &mut request.response;
        response.transaction_id = Some(proposal.txn_id().clone());
        if let Some(first) = responses.first() {
            response.payload = first.proposal_response.response.payload.clone();
            response.chaincode_status = first.chaincode_status();
        }
        response.responses = responses;
        response.proposal = Some(proposal);

        debug!(
            step = self.name(),
            txn_id = %request.response.transaction_id.as_ref().map(|id| id.short_id()).unwrap_or_default(),
            endorsements = request.response.responses.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "endorsements collected"
        );
        proceed(&self.next, request, client).await;
    }
}

/// Fan the proposal out to `targets`. Output order follows target order.
async fn send_proposal(
    proposal: &TransactionProposal,
    targets: &[Arc<dyn Peer>],
    peer_timeout: Option<Duration>,
) -> Result<Vec<TransactionProposalResponse>, Status> {
    let requests = targets
        .iter()
        .map(|peer| endorse_one(peer.as_ref(), proposal, peer_timeout));

    join_all(requests).await.into_iter().collect()
}

async fn endorse_one(
    peer: &dyn Peer,
    proposal: &TransactionProposal,
    peer_timeout: Option<Duration>,
) -> Result<TransactionProposalResponse, Status> {
    let result = match peer_timeout {
        Some(limit) => match tokio::time::timeout(limit, peer.process_proposal(proposal)).await {
            Ok(result) => result,
            Err(_) => Err(Status::timeout(
                Group::Endorser,
                format!("no endorsement from {} within {limit:?}", peer.url()),
            )),
        },
        None => peer.process_proposal(proposal).await,
    };

    if let Err(e) = &result {
        warn!(peer = peer.url(), error = %e, "endorsement request failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use pcl_types::mock::MockPeer;
    use pcl_types::{Code, Group, Peer, Status, TransactionProposal, TransactionProposalResponse};

    use super::*;
    use crate::memory::static_client_context;
    use crate::request::{Opts, Request};

    /// A peer that never answers.
    #[derive(Debug)]
    struct SilentPeer;

    #[async_trait]
    impl Peer for SilentPeer {
        fn name(&self) -> &str {
            "silent"
        }

        fn url(&self) -> &str {
            "silent:7051"
        }

        fn msp_id(&self) -> &str {
            "Org1MSP"
        }

        async fn process_proposal(
            &self,
            _proposal: &TransactionProposal,
        ) -> Result<TransactionProposalResponse, Status> {
            std::future::pending().await
        }
    }

    fn request(targets: Vec<Arc<dyn Peer>>) -> RequestContext {
        RequestContext::new(
            Request::new("testCC", "invoke").arg("query").arg("b"),
            Opts::default().with_targets(targets),
        )
    }

    #[tokio::test]
    async fn collects_endorsements_in_target_order() {
        let p1: Arc<dyn Peer> = Arc::new(MockPeer::new("p1", "peer1:7051").with_payload(&b"value"[..]));
        let p2: Arc<dyn Peer> = Arc::new(MockPeer::new("p2", "peer2:7051").with_payload(&b"value"[..]));
        let mut ctx = request(vec![p2, p1]);

        EndorsementHandler::new()
            .handle(&mut ctx, &static_client_context(vec![]))
            .await;

        assert!(ctx.error().is_none());
        let endorsers: Vec<_> = ctx.response.responses.iter().map(|r| r.endorser.as_str()).collect();
        assert_eq!(endorsers, vec!["peer2:7051", "peer1:7051"]);
        assert_eq!(ctx.response.payload.as_ref(), b"value");
        assert_eq!(ctx.response.chaincode_status, 200);

        let proposal = ctx.response.proposal.as_ref().unwrap();
        assert_eq!(ctx.response.transaction_id.as_ref(), Some(proposal.txn_id()));
        assert_eq!(proposal.args, vec![b"query".to_vec(), b"b".to_vec()]);
    }

    #[tokio::test]
    async fn transport_failure_fails_invocation() {
        let ok: Arc<dyn Peer> = Arc::new(MockPeer::new("p1", "peer1:7051"));
        let down: Arc<dyn Peer> = Arc::new(
            MockPeer::new("p2", "peer2:7051")
                .with_error(Status::connection_failed(Group::Endorser, "connection refused")),
        );
        let mut ctx = request(vec![ok, down]);

        EndorsementHandler::new()
            .handle(&mut ctx, &static_client_context(vec![]))
            .await;

        let err = ctx.error().unwrap();
        assert_eq!(err.code, Code::ConnectionFailed);
        assert!(err.message.contains("connection refused"));
        assert!(ctx.response.responses.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn peer_timeout_bounds_each_request() {
        let mut ctx = request(vec![Arc::new(SilentPeer)]);
        ctx.opts.timeouts.set(TimeoutKind::PeerResponse, Duration::from_millis(50));

        EndorsementHandler::new()
            .handle(&mut ctx, &static_client_context(vec![]))
            .await;

        let err = ctx.error().unwrap();
        assert!(err.is_timeout());
        assert_eq!(err.group, Group::Endorser);
    }

    #[tokio::test]
    async fn cancellation_interrupts_waiting() {
        let mut ctx = request(vec![Arc::new(SilentPeer)]);
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            cancel.cancel();
        });

        EndorsementHandler::new()
            .handle(&mut ctx, &static_client_context(vec![]))
            .await;

        assert_eq!(ctx.error().unwrap().code, Code::Cancelled);
    }

    #[tokio::test]
    async fn no_targets_is_an_error() {
        let mut ctx = request(vec![]);
        EndorsementHandler::new()
            .handle(&mut ctx, &static_client_context(vec![]))
            .await;
        assert_eq!(ctx.error().unwrap().code, Code::NoPeersAvailable);
    }
}
