//! A scriptable in-process peer.
//!
//! `MockPeer` answers proposals with a configured chaincode status and
//! payload, or fails with a configured transport error. It counts the
//! proposals it receives so callers can assert that a peer was (or was not)
//! contacted.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::peer::{EndpointOptions, EventEndpoint, Peer};
use crate::status::Status;
use crate::txn::{
    ChaincodeResponse, Endorsement, Identity, ProposalResponse, TransactionProposal,
    TransactionProposalResponse,
};

/// Signature a mock endorser attaches to its response.
pub fn mock_signature(payload: &[u8], endorser: &Identity) -> Bytes {
    let message = Endorsement::signed_message(payload, endorser);
    Bytes::copy_from_slice(blake3::hash(&message).as_bytes())
}

#[derive(Debug)]
struct MockEventEndpoint {
    url: String,
}

impl EventEndpoint for MockEventEndpoint {
    fn event_url(&self) -> &str {
        &self.url
    }

    fn options(&self) -> EndpointOptions {
        EndpointOptions::default()
    }
}

#[derive(Debug)]
pub struct MockPeer {
    name: String,
    url: String,
    msp_id: String,
    status: i32,
    message: String,
    payload: Bytes,
    error: Option<Status>,
    event_endpoint: Option<MockEventEndpoint>,
    proposals: AtomicUsize,
}

impl MockPeer {
    /// A peer in `Org1MSP` that endorses with status 200 and an empty payload.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            msp_id: "Org1MSP".into(),
            status: 200,
            message: String::new(),
            payload: Bytes::new(),
            error: None,
            event_endpoint: None,
            proposals: AtomicUsize::new(0),
        }
    }

    pub fn with_msp(mut self, msp_id: impl Into<String>) -> Self {
        self.msp_id = msp_id.into();
        self
    }

    pub fn with_status(mut self, status: i32, message: impl Into<String>) -> Self {
        self.status = status;
        self.message = message.into();
        self
    }

    /// Payload returned both as the chaincode result and as the proposal
    /// response payload.
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Fail every proposal with `error`, as an unreachable peer would.
    pub fn with_error(mut self, error: Status) -> Self {
        self.error = Some(error);
        self
    }

    /// Expose a block-delivery endpoint at the peer's URL.
    pub fn with_event_endpoint(mut self) -> Self {
        self.event_endpoint = Some(MockEventEndpoint {
            url: self.url.clone(),
        });
        self
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.msp_id.clone(), self.name.clone().into_bytes())
    }

    /// Number of proposals this peer has received.
    pub fn proposal_count(&self) -> usize {
        self.proposals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Peer for MockPeer {
    fn name(&self) -> &str {
        &self.name
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn msp_id(&self) -> &str {
        &self.msp_id
    }

    async fn process_proposal(
        &self,
        _proposal: &TransactionProposal,
    ) -> Result<TransactionProposalResponse, Status> {
        self.proposals.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.error {
            return Err(error.clone());
        }

        let endorser = self.identity();
        let signature = mock_signature(&self.payload, &endorser);
        Ok(TransactionProposalResponse {
            endorser: self.url.clone(),
            status: self.status,
            proposal_response: ProposalResponse {
                response: ChaincodeResponse {
                    status: self.status,
                    message: self.message.clone(),
                    payload: self.payload.clone(),
                },
                payload: self.payload.clone(),
                endorsement: Some(Endorsement {
                    endorser,
                    signature,
                }),
            },
        })
    }

    fn event_endpoint(&self) -> Option<&dyn EventEndpoint> {
        self.event_endpoint
            .as_ref()
            .map(|endpoint| endpoint as &dyn EventEndpoint)
    }
}
