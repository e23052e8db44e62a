use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Length of the random nonce mixed into every transaction id.
pub const NONCE_LEN: usize = 24;

/// Transaction identifier.
///
/// A `TxnId` is the hex-encoded BLAKE3 hash of a random nonce concatenated
/// with the creator's serialized identity, so two proposals from the same
/// creator never share an id.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(String);

impl TxnId {
    /// Compute the id for a given nonce and creator.
    pub fn compute(nonce: &[u8], creator: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(nonce);
        hasher.update(creator);
        Self(hex::encode(hasher.finalize().as_bytes()))
    }

    /// Wrap an id received from the network.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short representation (first 8 characters).
    pub fn short_id(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxnId({})", self.short_id())
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TxnId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Serialized identity of a network member.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub msp_id: String,
    pub id_bytes: Bytes,
}

impl Identity {
    pub fn new(msp_id: impl Into<String>, id_bytes: impl Into<Bytes>) -> Self {
        Self {
            msp_id: msp_id.into(),
            id_bytes: id_bytes.into(),
        }
    }

    /// Bytes a creator contributes to the transaction id.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.msp_id.len() + self.id_bytes.len());
        out.extend_from_slice(self.msp_id.as_bytes());
        out.extend_from_slice(&self.id_bytes);
        out
    }
}

/// Header shared by a proposal and the transaction assembled from it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHeader {
    pub txn_id: TxnId,
    pub channel_id: String,
    pub creator: Identity,
    pub nonce: Bytes,
    pub timestamp: DateTime<Utc>,
}

impl TransactionHeader {
    /// Create a header with a fresh random nonce.
    pub fn new(channel_id: impl Into<String>, creator: Identity) -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self::with_nonce(channel_id, creator, nonce.to_vec())
    }

    /// Create a header from a known nonce.
    pub fn with_nonce(channel_id: impl Into<String>, creator: Identity, nonce: Vec<u8>) -> Self {
        let txn_id = TxnId::compute(&nonce, &creator.to_bytes());
        Self {
            txn_id,
            channel_id: channel_id.into(),
            creator,
            nonce: Bytes::from(nonce),
            timestamp: Utc::now(),
        }
    }
}

/// A chaincode invocation proposal sent to endorsers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionProposal {
    pub header: TransactionHeader,
    pub chaincode_id: String,
    pub fcn: String,
    pub args: Vec<Vec<u8>>,
    pub transient_map: BTreeMap<String, Vec<u8>>,
}

impl TransactionProposal {
    pub fn txn_id(&self) -> &TxnId {
        &self.header.txn_id
    }
}

/// Chaincode execution result returned inside a proposal response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeResponse {
    pub status: i32,
    pub message: String,
    pub payload: Bytes,
}

/// An endorser's signature over the proposal response payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endorsement {
    pub endorser: Identity,
    pub signature: Bytes,
}

impl Endorsement {
    /// Message the endorser signs: response payload followed by the endorser
    /// identity.
    pub fn signed_message(payload: &[u8], endorser: &Identity) -> Vec<u8> {
        let mut message = payload.to_vec();
        message.extend_from_slice(&endorser.to_bytes());
        message
    }
}

/// The proposal response record produced by one endorser.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalResponse {
    pub response: ChaincodeResponse,
    /// Deterministic simulation result; must match bit-for-bit across honest
    /// endorsers.
    pub payload: Bytes,
    pub endorsement: Option<Endorsement>,
}

/// One peer's answer to a transaction proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionProposalResponse {
    /// URL of the endorsing peer.
    pub endorser: String,
    pub status: i32,
    pub proposal_response: ProposalResponse,
}

impl TransactionProposalResponse {
    /// Chaincode status reported by the endorser.
    pub fn chaincode_status(&self) -> i32 {
        self.proposal_response.response.status
    }

    /// The proposal response payload compared across endorsers.
    pub fn payload(&self) -> &[u8] {
        &self.proposal_response.payload
    }
}

/// An endorsed transaction ready for the ordering service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub proposal: TransactionProposal,
    pub endorsements: Vec<TransactionProposalResponse>,
}

impl Transaction {
    /// Assemble a transaction. At least one endorsement is required.
    pub fn new(
        proposal: TransactionProposal,
        endorsements: Vec<TransactionProposalResponse>,
    ) -> Result<Self, TypeError> {
        if endorsements.is_empty() {
            return Err(TypeError::NoEndorsements);
        }
        Ok(Self {
            proposal,
            endorsements,
        })
    }

    pub fn txn_id(&self) -> &TxnId {
        self.proposal.txn_id()
    }
}

/// Acknowledgment from the ordering service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub orderer: String,
    pub txn_id: TxnId,
}
