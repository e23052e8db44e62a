//! Collaborators the pipeline consumes.
//!
//! All of them are shared read-mostly across concurrent invocations and must
//! therefore be `Send + Sync`.

use std::sync::Arc;

use async_trait::async_trait;

use pcl_types::{Identity, Peer, Status, Transaction, TransactionHeader, TransactionResponse};

/// Source of the peers known on a channel.
#[async_trait]
pub trait DiscoveryService: Send + Sync {
    async fn discover(&self, channel_id: &str) -> Result<Vec<Arc<dyn Peer>>, Status>;
}

/// Chooses the endorsers appropriate for a chaincode among discovered peers.
#[async_trait]
pub trait SelectionService: Send + Sync {
    async fn select(
        &self,
        channel_id: &str,
        chaincode_id: &str,
        peers: &[Arc<dyn Peer>],
    ) -> Result<Vec<Arc<dyn Peer>>, Status>;
}

/// Creates transaction headers and submits endorsed transactions to the
/// ordering service.
#[async_trait]
pub trait Transactor: Send + Sync {
    fn create_transaction_header(&self) -> Result<TransactionHeader, Status>;

    async fn send_transaction(&self, transaction: &Transaction)
        -> Result<TransactionResponse, Status>;
}

/// Membership lookup used to check endorser identities and signatures.
pub trait Membership: Send + Sync {
    /// Check that `identity` belongs to a known organization.
    fn validate(&self, identity: &Identity) -> Result<(), Status>;

    /// Check `signature` over `message` by `identity`.
    fn verify(&self, identity: &Identity, message: &[u8], signature: &[u8]) -> Result<(), Status>;
}
