//! Channel client for the PCL ledger client.
//!
//! [`ChannelClient`] is the entry point applications use: [`ChannelClient::query`]
//! evaluates a chaincode function on the endorsers, and
//! [`ChannelClient::execute`] endorses, submits, and waits until the
//! transaction is committed. Defaults come from a [`ChannelConfig`], usually
//! loaded from TOML, and each call can override them through [`Opts`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use pcl_channel::{ChannelClient, ChannelConfig, Opts, Request};
//! use pcl_invoke::memory::{static_client_context, ChannelEventService};
//! use pcl_types::mock::MockPeer;
//! use pcl_types::TxValidationCode;
//!
//! # async fn run() -> Result<(), pcl_channel::ChannelError> {
//! let mut context = static_client_context(vec![Arc::new(MockPeer::new(
//!     "peer0",
//!     "peer0.org1.example.com:7051",
//! ))]);
//! context.event_service = Some(Arc::new(ChannelEventService::auto_reply(TxValidationCode::Valid)));
//!
//! let config = ChannelConfig::from_toml_str(
//!     r#"
//!     channel_id = "mychannel"
//!
//!     [retry]
//!     attempts = 3
//!     "#,
//! )?;
//! let client = ChannelClient::new(context, config)?;
//!
//! let response = client
//!     .execute(Request::new("mycc", "move").arg("a").arg("b").arg("10"), Opts::default())
//!     .await?;
//! println!("committed {:?}", response.transaction_id);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;

// Re-exports for convenience.
pub use client::ChannelClient;
pub use config::ChannelConfig;
pub use error::{ChannelError, Result};

// Re-export key types from lower crates.
pub use pcl_invoke::{Opts, Request, Response, RetryOpts, TimeoutKind, Timeouts};
pub use pcl_types::{Code, Group, Status, TxValidationCode, TxnId};
