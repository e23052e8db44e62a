use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::status::Status;
use crate::txn::{TransactionProposal, TransactionProposalResponse};

/// Connection options a peer advertises for its block-delivery endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointOptions {
    pub keep_alive: Option<Duration>,
    pub fail_fast: bool,
    pub allow_insecure: bool,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            keep_alive: Some(Duration::from_secs(60)),
            fail_fast: false,
            allow_insecure: false,
        }
    }
}

/// Capability of a peer that serves block-delivery streams.
pub trait EventEndpoint: Send + Sync {
    /// Address of the delivery service.
    fn event_url(&self) -> &str;

    fn options(&self) -> EndpointOptions;
}

/// A network peer able to endorse proposals.
///
/// Peers are shared as `Arc<dyn Peer>` between the selection service, the
/// pipeline, and the delivery client.
#[async_trait]
pub trait Peer: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn url(&self) -> &str;

    fn msp_id(&self) -> &str;

    /// Send a proposal and wait for the endorsement.
    ///
    /// An `Err` means the peer could not be reached or refused the request;
    /// chaincode failures come back as an `Ok` response with an error status.
    async fn process_proposal(
        &self,
        proposal: &TransactionProposal,
    ) -> Result<TransactionProposalResponse, Status>;

    /// The delivery endpoint of this peer, if it has one.
    fn event_endpoint(&self) -> Option<&dyn EventEndpoint> {
        None
    }
}
