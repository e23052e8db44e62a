use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pcl_types::{
    Code, Group, Status, Transaction, TransactionResponse, TxStatusRegistration,
    TxValidationCode,
};

use crate::context::{ClientContext, RequestContext};
use crate::handler::{proceed, Handler};
use crate::request::TimeoutKind;

/// Submits the endorsed transaction and waits for its commit outcome.
///
/// The status registration is placed before the transaction is sent, so a
/// commit event can never be missed. The registration is released on every
/// exit path when it goes out of scope.
#[derive(Default)]
pub struct CommitTxHandler {
    next: Option<Box<dyn Handler>>,
}

impl CommitTxHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_next(mut self, next: Box<dyn Handler>) -> Self {
        self.next = Some(next);
        self
    }
}

#[async_trait]
impl Handler for CommitTxHandler {
    fn name(&self) -> &str {
        "commit-tx"
    }

    fn set_next(&mut self, next: Box<dyn Handler>) {
        self.next = Some(next);
    }

    async fn handle(&self, request: &mut RequestContext, client: &ClientContext) {
        if request.check_cancelled(self.name()) {
            return;
        }
        let start = Instant::now();

        match commit(request, client).await {
            Ok(code) => {
                request.response.tx_validation_code = Some(code);
                info!(
                    txn_id = %request.response.transaction_id.as_ref().map(|id| id.short_id()).unwrap_or_default(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "transaction committed"
                );
                proceed(&self.next, request, client).await;
            }
            Err(status) => request.fail(status),
        }
    }
}

async fn commit(
    request: &RequestContext,
    client: &ClientContext,
) -> Result<TxValidationCode, Status> {
    let execute_timeout = request.timeout(TimeoutKind::Execute).ok_or_else(|| {
        Status::new(
            Group::Client,
            Code::MissingTimeout,
            "no execute timeout configured for commit",
        )
    })?;
    let event_service = client.event_service.as_ref().ok_or_else(|| {
        Status::new(
            Group::Client,
            Code::NoEventService,
            "an event service is required to wait for commit",
        )
    })?;
    let proposal = request.response.proposal.clone().ok_or_else(|| {
        Status::new(
            Group::Client,
            Code::Unknown,
            "no endorsed proposal to commit",
        )
    })?;
    let txn_id = proposal.txn_id().clone();

    let reg_timeout = request
        .timeout(TimeoutKind::EventReg)
        .unwrap_or(execute_timeout);
    let mut registration: TxStatusRegistration = bounded(
        reg_timeout,
        Group::EventServer,
        "registering for transaction status",
        &request.cancel,
        event_service.register_tx_status(&txn_id),
    )
    .await
    .map_err(|e| e.context("failed to register for transaction status"))?;
    debug!(txn_id = %txn_id.short_id(), "registered for commit status");

    let transaction = Transaction::new(proposal, request.response.responses.clone())?;
    let submit_timeout = request
        .timeout(TimeoutKind::OrdererResponse)
        .unwrap_or(execute_timeout);
    let sent = bounded(
        submit_timeout,
        Group::Orderer,
        "submitting transaction",
        &request.cancel,
        client.transactor.send_transaction(&transaction),
    )
    .await;
    let TransactionResponse { orderer, .. } =
        sent.map_err(|e| e.context("failed to submit transaction to orderer"))?;
    debug!(txn_id = %txn_id.short_id(), orderer = %orderer, "transaction submitted");

    let event = tokio::select! {
        event = registration.recv() => event.ok_or_else(|| {
            Status::new(
                Group::EventServer,
                Code::EventServiceClosed,
                format!("event service closed before reporting status of {txn_id}"),
            )
        })?,
        _ = tokio::time::sleep(execute_timeout) => {
            return Err(Status::timeout(
                Group::Client,
                format!("no commit event for {txn_id} within {execute_timeout:?}"),
            ));
        }
        _ = request.cancel.cancelled() => {
            return Err(Status::cancelled(format!("invocation cancelled while waiting for commit of {txn_id}")));
        }
    };

    if event.validation_code.is_valid() {
        Ok(event.validation_code)
    } else {
        warn!(
            txn_id = %txn_id.short_id(),
            code = %event.validation_code,
            block = event.block_number,
            "transaction committed as invalid"
        );
        Err(Status::invalid_transaction(event.validation_code))
    }
}

/// Run `fut` for at most `limit`, giving up early on cancellation.
async fn bounded<T>(
    limit: Duration,
    group: Group,
    what: &str,
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, Status>>,
) -> Result<T, Status> {
    tokio::select! {
        outcome = tokio::time::timeout(limit, fut) => match outcome {
            Ok(result) => result,
            Err(_) => Err(Status::timeout(group, format!("{what} timed out after {limit:?}"))),
        },
        _ = cancel.cancelled() => Err(Status::cancelled(format!("invocation cancelled while {what}"))),
    }
}
