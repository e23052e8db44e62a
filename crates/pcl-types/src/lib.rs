//! Foundation types for the PCL ledger client.
//!
//! This crate provides the transaction, block, and status types shared by the
//! invocation pipeline (`pcl-invoke`) and the block-delivery client
//! (`pcl-events`). It also defines the capability traits through which those
//! crates talk to the outside world: [`Peer`] for endorsers and
//! [`EventService`] for commit notifications.
//!
//! # Key Types
//!
//! - [`TxnId`]: Transaction identifier derived from a nonce and the creator
//! - [`TransactionProposal`] / [`TransactionProposalResponse`]: Endorsement round trip
//! - [`TxValidationCode`]: Ledger-assigned commit outcome
//! - [`Status`]: Caller-visible error with a group and a distinct code
//! - [`Block`] / [`FilteredBlock`]: Units of the block-delivery stream

pub mod backoff;
pub mod block;
pub mod error;
pub mod event;
pub mod mock;
pub mod peer;
pub mod status;
pub mod txn;
pub mod validation;

pub use backoff::jittered_backoff;
pub use block::{
    Block, BlockEvent, BlockTransaction, CcEvent, ChaincodeEvent, FilteredBlock,
    FilteredBlockEvent, FilteredTransaction, TxStatusEvent,
};
pub use error::TypeError;
pub use event::{
    ChaincodeEventRegistration, EventService, TxStatusRegistration, Unregister,
};
pub use peer::{EndpointOptions, EventEndpoint, Peer};
pub use status::{Code, Group, Status};
pub use txn::{
    ChaincodeResponse, Endorsement, Identity, ProposalResponse, Transaction, TransactionHeader,
    TransactionProposal, TransactionProposalResponse, TransactionResponse, TxnId,
};
pub use validation::TxValidationCode;
