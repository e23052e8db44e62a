//! Block-delivery client for the PCL ledger client.
//!
//! [`DeliverClient`] keeps one delivery stream open to a peer, routes the
//! blocks it receives to registered consumers, and reconnects after stream
//! loss, resuming from the block after the last one it saw. It implements
//! [`pcl_types::EventService`], so it plugs directly into the commit step of
//! the invocation pipeline.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use pcl_events::memory::{Script, ScriptedProvider};
//! use pcl_events::{DeliverClient, DeliverConfig};
//! use pcl_types::mock::MockPeer;
//! use pcl_types::TxnId;
//!
//! # async fn run() -> Result<(), pcl_events::EventError> {
//! let peer = Arc::new(MockPeer::new("peer0", "peer0.org1.example.com:7051").with_event_endpoint());
//! let (script, _feed) = Script::live();
//! let provider = Arc::new(ScriptedProvider::new([script]));
//!
//! let client = DeliverClient::connect("mychannel", peer, provider, DeliverConfig::default()).await?;
//! let mut status = client.register_tx_status_event(&TxnId::from("tx1")).await?;
//! if let Some(event) = status.recv().await {
//!     println!("{} committed in block {}", event.txn_id, event.block_number);
//! }
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod memory;
pub mod registry;
pub mod seek;

// Re-exports for convenience.
pub use client::{BlockRegistration, ConnectionState, DeliverClient, FilteredBlockRegistration};
pub use config::DeliverConfig;
pub use connection::{
    Connection, ConnectionProvider, DeliverKind, DeliverRequest, DeliverResponse,
    DELIVER_STATUS_SUCCESS,
};
pub use error::{EventError, Result};
pub use registry::{RegistrationId, Registry};
pub use seek::{SeekInfo, SeekPosition, SeekState, LAST_BLOCK_SENTINEL};
