//! The channel client: query and execute entry points over the invocation
//! pipeline.
//!
//! Every call runs a handler chain against a fresh [`RequestContext`]. When
//! the failure's code is listed in the retry policy the whole chain runs
//! again, so each attempt re-resolves its targets and carries a new
//! transaction id.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pcl_invoke::{
    execute_handler, execute_handler_with_signature_validation, query_handler, ClientContext,
    Handler, Opts, Request, RequestContext, Response, RetryOpts, TimeoutKind,
};
use pcl_types::{jittered_backoff, ChaincodeEventRegistration, Code, Group, Status};

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};

/// Client bound to one channel.
pub struct ChannelClient {
    context: ClientContext,
    config: ChannelConfig,
    query_chain: Box<dyn Handler>,
    execute_chain: Box<dyn Handler>,
    shutdown: CancellationToken,
}

impl ChannelClient {
    pub fn new(context: ClientContext, config: ChannelConfig) -> Result<Self> {
        config.validate()?;
        if context.channel_id != config.channel_id {
            return Err(ChannelError::Config(format!(
                "client context is bound to channel '{}' but the configuration names '{}'",
                context.channel_id, config.channel_id
            )));
        }

        let execute_chain = if config.verify_signatures {
            execute_handler_with_signature_validation(None)
        } else {
            execute_handler(None)
        };
        info!(
            channel_id = %config.channel_id,
            verify_signatures = config.verify_signatures,
            retry_attempts = config.retry.attempts,
            "channel client created"
        );

        Ok(Self {
            context,
            config,
            query_chain: query_handler(None),
            execute_chain,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn channel_id(&self) -> &str {
        &self.config.channel_id
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    /// Evaluate a chaincode function on the endorsers without submitting a
    /// transaction. The whole call is bounded by the query timeout.
    pub async fn query(&self, request: Request, opts: Opts) -> Result<Response> {
        self.invoke(
            self.query_chain.as_ref(),
            request,
            opts,
            Some(TimeoutKind::Query),
        )
        .await
    }

    /// Endorse, submit, and wait for the commit notification.
    pub async fn execute(&self, request: Request, opts: Opts) -> Result<Response> {
        self.invoke(self.execute_chain.as_ref(), request, opts, None)
            .await
    }

    /// Run a caller-built chain with the same option merging and retry
    /// policy as [`Self::query`] and [`Self::execute`].
    pub async fn invoke_handler(
        &self,
        handler: &dyn Handler,
        request: Request,
        opts: Opts,
    ) -> Result<Response> {
        self.invoke(handler, request, opts, None).await
    }

    /// Subscribe to chaincode events whose name matches `event_filter`.
    pub async fn register_chaincode_event(
        &self,
        chaincode_id: &str,
        event_filter: &str,
    ) -> Result<ChaincodeEventRegistration> {
        let events = self.context.event_service.as_ref().ok_or_else(|| {
            Status::new(
                Group::Client,
                Code::NoEventService,
                "no event service configured for this channel",
            )
        })?;
        Ok(events
            .register_chaincode_event(chaincode_id, event_filter)
            .await?)
    }

    /// Cancel every in-flight and future invocation on this client.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!(channel_id = %self.config.channel_id, "channel client shutting down");
        }
        self.shutdown.cancel();
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn invoke(
        &self,
        handler: &dyn Handler,
        request: Request,
        opts: Opts,
        limit: Option<TimeoutKind>,
    ) -> Result<Response> {
        if request.chaincode_id.is_empty() || request.fcn.is_empty() {
            return Err(Status::new(
                Group::Client,
                Code::Unknown,
                "chaincode id and function name are required",
            )
            .into());
        }

        let opts = self.effective_opts(opts);
        let retry = opts.retry.clone();
        let cancel = self.shutdown.child_token();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let status = match self
                .attempt(handler, &request, &opts, limit, &cancel)
                .await
            {
                Ok(response) => {
                    debug!(
                        chaincode = %request.chaincode_id,
                        fcn = %request.fcn,
                        attempt,
                        txn_id = ?response.transaction_id,
                        "invocation succeeded"
                    );
                    return Ok(response);
                }
                Err(status) => status,
            };

            if attempt > retry.attempts || !retry.is_retryable(&status.code) {
                return Err(status.into());
            }

            let delay = backoff_delay(&retry, attempt);
            warn!(
                chaincode = %request.chaincode_id,
                attempt,
                code = %status.code,
                delay_ms = delay.as_millis() as u64,
                error = %status,
                "invocation failed, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Status::cancelled("invocation cancelled while waiting to retry").into());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(
        &self,
        handler: &dyn Handler,
        request: &Request,
        opts: &Opts,
        limit: Option<TimeoutKind>,
        cancel: &CancellationToken,
    ) -> std::result::Result<Response, Status> {
        let mut ctx =
            RequestContext::new(request.clone(), opts.clone()).with_cancellation(cancel.clone());

        match limit.and_then(|kind| ctx.timeout(kind).map(|timeout| (kind, timeout))) {
            Some((kind, timeout)) => {
                let outcome =
                    tokio::time::timeout(timeout, handler.handle(&mut ctx, &self.context)).await;
                if outcome.is_err() {
                    ctx.fail(Status::timeout(
                        Group::Client,
                        format!("{kind} timed out after {timeout:?}"),
                    ));
                }
            }
            None => handler.handle(&mut ctx, &self.context).await,
        }
        ctx.into_result()
    }

    /// Per-call timeouts override the configured ones entry by entry. A call
    /// that leaves the retry policy at its default uses the configured one.
    fn effective_opts(&self, mut opts: Opts) -> Opts {
        opts.timeouts = self.config.timeouts.merged_with(&opts.timeouts);
        if opts.retry == RetryOpts::default() {
            opts.retry = self.config.retry.clone();
        }
        opts
    }
}

impl Drop for ChannelClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn backoff_delay(retry: &RetryOpts, attempt: u32) -> Duration {
    jittered_backoff(
        attempt,
        retry.initial_backoff,
        retry.backoff_factor,
        retry.max_backoff,
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::time::Instant;

    use pcl_invoke::memory::{static_client_context, ChannelEventService, InMemoryTransactor};
    use pcl_types::mock::MockPeer;
    use pcl_types::{
        CcEvent, Peer, TransactionProposal, TransactionProposalResponse, TxValidationCode, TxnId,
    };

    use super::*;

    fn peer(name: &str, payload: &'static [u8]) -> Arc<MockPeer> {
        Arc::new(MockPeer::new(name, format!("{name}.org1.example.com:7051")).with_payload(payload))
    }

    fn transfer() -> Request {
        Request::new("mycc", "move").arg("a").arg("b").arg("10")
    }

    /// Client whose transactor and event service the test keeps handles to.
    fn client_with(
        peers: Vec<Arc<dyn Peer>>,
        events: ChannelEventService,
        config: ChannelConfig,
    ) -> (ChannelClient, Arc<InMemoryTransactor>, Arc<ChannelEventService>) {
        let transactor = Arc::new(InMemoryTransactor::new("mychannel"));
        let events = Arc::new(events);
        let mut context = static_client_context(peers);
        context.transactor = transactor.clone();
        context.event_service = Some(events.clone());
        let client = ChannelClient::new(context, config).unwrap();
        (client, transactor, events)
    }

    fn conflict_retry(attempts: u32) -> RetryOpts {
        RetryOpts {
            attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            ..RetryOpts::default()
        }
    }

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
        ) -> std::result::Result<TransactionProposalResponse, Status> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn query_returns_endorsed_payload() {
        let p0 = peer("peer0", b"100");
        let client =
            ChannelClient::new(static_client_context(vec![p0.clone()]), ChannelConfig::new("mychannel"))
                .unwrap();

        let response = client
            .query(Request::new("mycc", "query").arg("a"), Opts::default())
            .await
            .unwrap();
        assert_eq!(response.payload, Bytes::from_static(b"100"));
        assert_eq!(response.chaincode_status, 200);
        assert!(response.tx_validation_code.is_none());
        assert_eq!(p0.proposal_count(), 1);
    }

    #[tokio::test]
    async fn execute_commits_once() {
        let (client, transactor, events) = client_with(
            vec![peer("peer0", b"ok"), peer("peer1", b"ok")],
            ChannelEventService::auto_reply(TxValidationCode::Valid),
            ChannelConfig::new("mychannel"),
        );

        let response = client.execute(transfer(), Opts::default()).await.unwrap();
        assert_eq!(response.tx_validation_code, Some(TxValidationCode::Valid));
        assert_eq!(response.responses.len(), 2);
        assert_eq!(transactor.submitted().len(), 1);
        assert_eq!(events.active_registrations(), 0);
    }

    #[test]
    fn channel_mismatch_is_rejected() {
        let err = ChannelClient::new(static_client_context(vec![]), ChannelConfig::new("other"))
            .err()
            .unwrap();
        assert!(matches!(err, ChannelError::Config(msg) if msg.contains("mychannel")));
    }

    #[tokio::test]
    async fn missing_function_name_is_rejected_before_endorsement() {
        let p0 = peer("peer0", b"ok");
        let client =
            ChannelClient::new(static_client_context(vec![p0.clone()]), ChannelConfig::new("mychannel"))
                .unwrap();

        let err = client.query(Request::new("mycc", ""), Opts::default()).await.unwrap_err();
        assert_eq!(err.status().unwrap().group, Group::Client);
        assert_eq!(p0.proposal_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn read_conflict_is_retried_with_a_new_transaction() {
        let p0 = peer("peer0", b"ok");
        let (events, mut requests) = ChannelEventService::manual();
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel::<TxnId>();
        tokio::spawn(async move {
            let mut first = true;
            while let Some(request) = requests.recv().await {
                let _ = seen_tx.send(request.txn_id.clone());
                let code = if first {
                    TxValidationCode::MvccReadConflict
                } else {
                    TxValidationCode::Valid
                };
                first = false;
                request.reply(code, 7);
            }
        });
        let (client, transactor, _events) = client_with(
            vec![p0.clone()],
            events,
            ChannelConfig::new("mychannel").with_retry(conflict_retry(2)),
        );

        let response = client.execute(transfer(), Opts::default()).await.unwrap();
        assert_eq!(response.tx_validation_code, Some(TxValidationCode::Valid));
        assert_eq!(p0.proposal_count(), 2);
        assert_eq!(transactor.submitted().len(), 2);

        let first = seen_rx.recv().await.unwrap();
        let second = seen_rx.recv().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(response.transaction_id, Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_after_the_configured_attempts() {
        let (client, transactor, _events) = client_with(
            vec![peer("peer0", b"ok")],
            ChannelEventService::auto_reply(TxValidationCode::MvccReadConflict),
            ChannelConfig::new("mychannel").with_retry(conflict_retry(2)),
        );

        let err = client.execute(transfer(), Opts::default()).await.unwrap_err();
        assert_eq!(
            err.status().unwrap().validation_code(),
            Some(TxValidationCode::MvccReadConflict)
        );
        assert_eq!(transactor.submitted().len(), 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_runs_once() {
        let p0 = peer("peer0", b"a");
        let p1 = peer("peer1", b"b");
        let (client, transactor, _events) = client_with(
            vec![p0.clone(), p1.clone()],
            ChannelEventService::auto_reply(TxValidationCode::Valid),
            ChannelConfig::new("mychannel").with_retry(conflict_retry(3)),
        );

        let err = client.execute(transfer(), Opts::default()).await.unwrap_err();
        assert!(err.status().unwrap().is_endorsement_mismatch());
        assert_eq!(p0.proposal_count(), 1);
        assert_eq!(p1.proposal_count(), 1);
        assert!(transactor.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn call_retry_policy_overrides_config() {
        let (client, transactor, _events) = client_with(
            vec![peer("peer0", b"ok")],
            ChannelEventService::auto_reply(TxValidationCode::MvccReadConflict),
            ChannelConfig::new("mychannel").with_retry(conflict_retry(4)),
        );

        let opts = Opts::default().with_retry(conflict_retry(1));
        assert!(client.execute(transfer(), opts).await.is_err());
        assert_eq!(transactor.submitted().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_retry_backoff() {
        let retry = RetryOpts {
            attempts: 5,
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
            ..RetryOpts::default()
        };
        let (client, transactor, _events) = client_with(
            vec![peer("peer0", b"ok")],
            ChannelEventService::auto_reply(TxValidationCode::MvccReadConflict),
            ChannelConfig::new("mychannel").with_retry(retry),
        );

        let started = Instant::now();
        let (result, ()) = tokio::join!(client.execute(transfer(), Opts::default()), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            client.shutdown();
        });

        let err = result.unwrap_err();
        assert_eq!(err.status().unwrap().code, Code::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(transactor.submitted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn query_timeout_bounds_the_whole_call() {
        let client = ChannelClient::new(
            static_client_context(vec![Arc::new(SilentPeer)]),
            ChannelConfig::new("mychannel"),
        )
        .unwrap();

        let opts = Opts::default().with_timeout(TimeoutKind::Query, Duration::from_secs(2));
        let started = Instant::now();
        let err = client.query(transfer(), opts).await.unwrap_err();

        let status = err.status().unwrap();
        assert!(status.is_timeout());
        assert_eq!(status.group, Group::Client);
        assert!(status.message.contains("query"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn call_timeout_overrides_configured_execute_timeout() {
        let (client, _transactor, events) = client_with(
            vec![peer("peer0", b"ok")],
            ChannelEventService::silent(),
            ChannelConfig::new("mychannel"),
        );

        let opts = Opts::default().with_timeout(TimeoutKind::Execute, Duration::from_secs(1));
        let started = Instant::now();
        let err = client.execute(transfer(), opts).await.unwrap_err();
        assert!(err.status().unwrap().is_timeout());
        assert!(started.elapsed() < Duration::from_secs(180));
        assert_eq!(events.active_registrations(), 0);
    }

    #[tokio::test]
    async fn signature_checks_follow_configuration() {
        let foreign: Arc<dyn Peer> =
            Arc::new(MockPeer::new("peer0", "peer0.org2.example.com:7051").with_msp("Org2MSP"));

        let (lenient, _, _) = client_with(
            vec![foreign.clone()],
            ChannelEventService::auto_reply(TxValidationCode::Valid),
            ChannelConfig::new("mychannel"),
        );
        assert!(lenient.execute(transfer(), Opts::default()).await.is_ok());

        let mut config = ChannelConfig::new("mychannel");
        config.verify_signatures = true;
        let (strict, transactor, _) = client_with(
            vec![foreign],
            ChannelEventService::auto_reply(TxValidationCode::Valid),
            config,
        );
        let err = strict.execute(transfer(), Opts::default()).await.unwrap_err();
        assert_eq!(err.status().unwrap().code, Code::SignatureVerificationFailed);
        assert!(transactor.submitted().is_empty());
    }

    #[tokio::test]
    async fn chaincode_events_need_an_event_service() {
        let bare =
            ChannelClient::new(static_client_context(vec![]), ChannelConfig::new("mychannel"))
                .unwrap();
        let err = bare.register_chaincode_event("mycc", ".*").await.err().unwrap();
        assert_eq!(err.status().unwrap().code, Code::NoEventService);

        let (client, _, events) = client_with(
            vec![],
            ChannelEventService::silent(),
            ChannelConfig::new("mychannel"),
        );
        let mut registration = client
            .register_chaincode_event("mycc", "^transfer")
            .await
            .unwrap();
        let delivered = events.emit_chaincode_event(CcEvent {
            txn_id: TxnId::from("tx1"),
            chaincode_id: "mycc".into(),
            event_name: "transfer-completed".into(),
            payload: Bytes::from_static(b"{}"),
            block_number: 3,
            source_url: "memory".into(),
        });
        assert_eq!(delivered, 1);
        let event = registration.recv().await.unwrap();
        assert_eq!(event.event_name, "transfer-completed");
    }
}
