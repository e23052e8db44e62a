use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use pcl_types::{Code, Endorsement, Group, Status, TransactionProposalResponse};

use crate::context::{ClientContext, RequestContext};
use crate::handler::{proceed, Handler};
use crate::services::Membership;

/// Checks that every endorsement is signed by a known identity over its own
/// proposal response payload.
#[derive(Default)]
pub struct SignatureValidationHandler {
    next: Option<Box<dyn Handler>>,
}

impl SignatureValidationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_next(mut self, next: Box<dyn Handler>) -> Self {
        self.next = Some(next);
        self
    }
}

#[async_trait]
impl Handler for SignatureValidationHandler {
    fn name(&self) -> &str {
        "signature-validation"
    }

    fn set_next(&mut self, next: Box<dyn Handler>) {
        self.next = Some(next);
    }

    async fn handle(&self, request: &mut RequestContext, client: &ClientContext) {
        if request.check_cancelled(self.name()) {
            return;
        }
        let start = Instant::now();
        for response in &request.response.responses {
            if let Err(status) = verify_endorsement(client.membership.as_ref(), response) {
                request.fail(status);
                return;
            }
        }
        debug!(
            step = self.name(),
            endorsements = request.response.responses.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "endorser signatures verified"
        );
        proceed(&self.next, request, client).await;
    }
}

fn verify_endorsement(
    membership: &dyn Membership,
    response: &TransactionProposalResponse,
) -> Result<(), Status> {
    let failed = |reason: String| {
        Status::new(
            Group::Endorser,
            Code::SignatureVerificationFailed,
            format!("endorsement from {}: {reason}", response.endorser),
        )
    };

    let endorsement = response
        .proposal_response
        .endorsement
        .as_ref()
        .ok_or_else(|| failed("missing endorsement".into()))?;

    membership
        .validate(&endorsement.endorser)
        .map_err(|e| failed(format!("invalid endorser identity: {}", e.message)))?;

    let message = Endorsement::signed_message(response.payload(), &endorsement.endorser);
    membership
        .verify(&endorsement.endorser, &message, &endorsement.signature)
        .map_err(|e| failed(format!("bad signature: {}", e.message)))
}
