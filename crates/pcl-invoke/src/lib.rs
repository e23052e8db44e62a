//! Transaction invocation pipeline for the PCL ledger client.
//!
//! A chaincode invocation runs through a chain of steps sharing one
//! [`RequestContext`]: target resolution, endorsement, endorsement
//! validation, and commit with event correlation. Each step either records a
//! failure and stops, or hands over to its successor. Queries stop after
//! endorsement; executes go all the way to the commit notification.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use pcl_invoke::memory::{static_client_context, ChannelEventService};
//! use pcl_invoke::{execute_handler, Handler, Opts, Request, RequestContext, TimeoutKind};
//! use pcl_types::mock::MockPeer;
//! use pcl_types::{Peer, TxValidationCode};
//!
//! # async fn run() -> Result<(), pcl_types::Status> {
//! let peer: Arc<dyn Peer> = Arc::new(MockPeer::new("peer0", "peer0.org1.example.com:7051"));
//! let mut client = static_client_context(vec![peer]);
//! client.event_service = Some(Arc::new(ChannelEventService::auto_reply(TxValidationCode::Valid)));
//!
//! let opts = Opts::default().with_timeout(TimeoutKind::Execute, Duration::from_secs(20));
//! let request = Request::new("mycc", "move").arg("a").arg("b").arg("10");
//! let mut ctx = RequestContext::new(request, opts);
//! execute_handler(None).handle(&mut ctx, &client).await;
//!
//! let response = ctx.into_result()?;
//! assert_eq!(response.chaincode_status, 200);
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod handler;
pub mod handlers;
pub mod memory;
pub mod request;
pub mod services;

// Re-exports for convenience.
pub use context::{ClientContext, RequestContext, Response};
pub use handler::{
    execute_handler, execute_handler_with_signature_validation, proceed, query_handler, Handler,
    HandlerChain,
};
pub use handlers::{
    CommitTxHandler, EndorsementHandler, EndorsementValidationHandler, SignatureValidationHandler,
    TargetResolutionHandler,
};
pub use request::{Opts, Request, RetryOpts, TargetFilter, TimeoutKind, Timeouts};
pub use services::{DiscoveryService, Membership, SelectionService, Transactor};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use pcl_types::mock::MockPeer;
    use pcl_types::{Code, Peer, Status, TxValidationCode};

    use super::*;
    use crate::memory::{
        static_client_context, ChannelEventService, InMemoryTransactor, StaticDiscovery,
        StaticSelection,
    };

    fn peer(name: &str, url: &str, payload: &'static [u8]) -> Arc<MockPeer> {
        Arc::new(MockPeer::new(name, url).with_payload(payload))
    }

    fn invocation(opts: Opts) -> RequestContext {
        RequestContext::new(
            Request::new("testCC", "invoke").arg("move").arg("a").arg("b").arg("1"),
            opts,
        )
    }

    fn execute_opts() -> Opts {
        Opts::default().with_timeout(TimeoutKind::Execute, Duration::from_secs(20))
    }

    // -----------------------------------------------------------------------
    // 1. Query returns the first endorsement's payload
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn query_returns_payload() {
        let p1 = peer("p1", "peer1:7051", b"value");
        let p2 = peer("p2", "peer2:7051", b"value");
        let client = static_client_context(vec![p1.clone(), p2.clone()]);

        let mut ctx = invocation(Opts::default());
        query_handler(None).handle(&mut ctx, &client).await;

        let response = ctx.into_result().unwrap();
        assert_eq!(response.payload.as_ref(), b"value");
        assert_eq!(response.responses.len(), 2);
        assert!(!response.endorsements_validated);
        assert!(response.tx_validation_code.is_none());
        assert_eq!(p1.proposal_count(), 1);
        assert_eq!(p2.proposal_count(), 1);
    }

    // -----------------------------------------------------------------------
    // 2. Execute commits with a VALID notification
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn execute_commits_valid_transaction() {
        let p1 = peer("p1", "peer1:7051", b"value");
        let p2 = peer("p2", "peer2:7051", b"value");
        let transactor = Arc::new(InMemoryTransactor::new("mychannel"));
        let events = Arc::new(ChannelEventService::auto_reply(TxValidationCode::Valid));
        let mut client = static_client_context(vec![p1, p2]);
        client.transactor = transactor.clone();
        client.event_service = Some(events.clone());

        let mut ctx = invocation(execute_opts());
        execute_handler(None).handle(&mut ctx, &client).await;

        let response = ctx.into_result().unwrap();
        assert!(response.endorsements_validated);
        assert_eq!(response.tx_validation_code, Some(TxValidationCode::Valid));

        let submitted = transactor.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(Some(submitted[0].txn_id()), response.transaction_id.as_ref());
        assert_eq!(submitted[0].endorsements.len(), 2);
        assert_eq!(events.active_registrations(), 0);
    }

    // -----------------------------------------------------------------------
    // 3. Mismatched payloads never reach the orderer
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn mismatch_stops_before_commit() {
        let transactor = Arc::new(InMemoryTransactor::new("mychannel"));
        let events = Arc::new(ChannelEventService::auto_reply(TxValidationCode::Valid));
        let mut client = static_client_context(vec![
            peer("p1", "peer1:7051", b"value"),
            peer("p2", "peer2:7051", b"value1"),
        ]);
        client.transactor = transactor.clone();
        client.event_service = Some(events.clone());

        let mut ctx = invocation(execute_opts());
        execute_handler(None).handle(&mut ctx, &client).await;

        let err = ctx.into_result().unwrap_err();
        assert_eq!(err.code, Code::EndorsementMismatch);
        assert!(transactor.submitted().is_empty());
        assert_eq!(events.active_registrations(), 0);
    }

    // -----------------------------------------------------------------------
    // 4. Selection errors propagate and no proposal is sent
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn selection_error_propagates() {
        let p1 = peer("p1", "peer1:7051", b"value");
        let mut client = static_client_context(vec![p1.clone()]);
        client.selection = Arc::new(StaticSelection::failing(Status::selection(
            "Selection service error",
        )));

        let mut ctx = invocation(Opts::default());
        query_handler(None).handle(&mut ctx, &client).await;

        let err = ctx.into_result().unwrap_err();
        assert!(err.to_string().contains("Selection service error"));
        assert_eq!(p1.proposal_count(), 0);
    }

    // -----------------------------------------------------------------------
    // 4b. Discovery errors stop an execute before any endorsement
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn discovery_error_prevents_endorsement() {
        let p1 = peer("p1", "peer1:7051", b"value");
        let transactor = Arc::new(InMemoryTransactor::new("mychannel"));
        let mut client = static_client_context(vec![p1.clone()]);
        client.discovery = Arc::new(StaticDiscovery::failing(Status::discovery(
            "Discovery service error",
        )));
        client.transactor = transactor.clone();
        client.event_service = Some(Arc::new(ChannelEventService::auto_reply(
            TxValidationCode::Valid,
        )));

        let mut ctx = invocation(execute_opts());
        execute_handler(None).handle(&mut ctx, &client).await;

        let err = ctx.into_result().unwrap_err();
        assert_eq!(err.group, pcl_types::Group::Discovery);
        assert!(err.message.contains("Discovery service error"));
        assert_eq!(p1.proposal_count(), 0);
        assert!(transactor.submitted().is_empty());
    }

    // -----------------------------------------------------------------------
    // 5. Explicit targets win over discovery
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn explicit_targets_receive_the_proposal() {
        let discovered = peer("p1", "peer1:7051", b"value");
        let explicit = peer("p2", "peer2:7051", b"value");
        let client = static_client_context(vec![discovered.clone()]);

        let explicit_dyn: Arc<dyn Peer> = explicit.clone();
        let mut ctx = invocation(Opts::default().with_targets(vec![explicit_dyn]));
        query_handler(None).handle(&mut ctx, &client).await;

        assert!(ctx.error().is_none());
        assert_eq!(ctx.opts.target_urls(), vec!["peer2:7051"]);
        assert_eq!(discovered.proposal_count(), 0);
        assert_eq!(explicit.proposal_count(), 1);
    }

    // -----------------------------------------------------------------------
    // 6. Silent event service times out without leaking the registration
    // -----------------------------------------------------------------------
    #[tokio::test(start_paused = true)]
    async fn silent_event_service_times_out() {
        let events = Arc::new(ChannelEventService::silent());
        let mut client = static_client_context(vec![peer("p1", "peer1:7051", b"value")]);
        client.event_service = Some(events.clone());

        let mut ctx = invocation(execute_opts());
        execute_handler(None).handle(&mut ctx, &client).await;

        let err = ctx.into_result().unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(events.active_registrations(), 0);
    }

    // -----------------------------------------------------------------------
    // 7. Extra steps run after the canonical chain
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn signature_chain_rejects_untrusted_endorser() {
        let trusted = peer("p1", "peer1:7051", b"value");
        let untrusted = Arc::new(
            MockPeer::new("p2", "peer2:7051")
                .with_msp("Org2MSP")
                .with_payload(&b"value"[..]),
        );
        let transactor = Arc::new(InMemoryTransactor::new("mychannel"));
        let mut client = static_client_context(vec![trusted, untrusted]);
        client.transactor = transactor.clone();
        client.event_service = Some(Arc::new(ChannelEventService::auto_reply(
            TxValidationCode::Valid,
        )));

        let mut ctx = invocation(execute_opts());
        execute_handler_with_signature_validation(None)
            .handle(&mut ctx, &client)
            .await;

        let err = ctx.into_result().unwrap_err();
        assert_eq!(err.code, Code::SignatureVerificationFailed);
        assert!(transactor.submitted().is_empty());
    }
}
