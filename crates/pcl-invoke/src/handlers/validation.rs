use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use pcl_types::{Code, Group, Status, TransactionProposalResponse};

use crate::context::{ClientContext, RequestContext};
use crate::handler::{proceed, Handler};

/// Chaincode statuses in this range count as a successful simulation.
const SUCCESS_STATUS: std::ops::Range<i32> = 200..400;

/// Rejects endorsement sets that are not safe to submit: any non-success
/// chaincode status, or proposal response payloads that differ between
/// endorsers.
#[derive(Default)]
pub struct EndorsementValidationHandler {
    next: Option<Box<dyn Handler>>,
}

impl EndorsementValidationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_next(mut self, next: Box<dyn Handler>) -> Self {
        self.next = Some(next);
        self
    }
}

#[async_trait]
impl Handler for EndorsementValidationHandler {
    fn name(&self) -> &str {
        "endorsement-validation"
    }

    fn set_next(&mut self, next: Box<dyn Handler>) {
        self.next = Some(next);
    }

    async fn handle(&self, request: &mut RequestContext, client: &ClientContext) {
        if request.check_cancelled(self.name()) {
            return;
        }
        let start = Instant::now();
        if let Err(status) = validate(&request.response.responses) {
            request.fail(status);
            return;
        }
        request.response.endorsements_validated = true;
        debug!(
            step = self.name(),
            endorsements = request.response.responses.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "endorsements consistent"
        );
        proceed(&self.next, request, client).await;
    }
}

/// Check chaincode statuses, then payload equality against the first
/// response.
pub(crate) fn validate(responses: &[TransactionProposalResponse]) -> Result<(), Status> {
    for response in responses {
        let status = response.chaincode_status();
        if !SUCCESS_STATUS.contains(&status) {
            return Err(Status::new(
                Group::Endorser,
                Code::ChaincodeError(status),
                format!(
                    "endorser {} returned chaincode status {status}: {}",
                    response.endorser, response.proposal_response.response.message
                ),
            ));
        }
    }

    if let Some((first, rest)) = responses.split_first() {
        if let Some(other) = rest.iter().find(|r| r.payload() != first.payload()) {
            debug!(
                first = %first.endorser,
                mismatched = %other.endorser,
                "proposal response payloads differ"
            );
            return Err(Status::endorsement_mismatch());
        }
    }
    Ok(())
}
