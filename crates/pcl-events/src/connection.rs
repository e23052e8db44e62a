//! Transport seam of the deliver client.
//!
//! The client never opens sockets itself. A [`ConnectionProvider`] is
//! injected at construction and asked for a fresh [`Connection`] on every
//! (re)connect.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use pcl_types::{Block, EventEndpoint, FilteredBlock, Peer};

use crate::error::{EventError, Result};
use crate::seek::SeekInfo;

/// Deliver status meaning the request was served.
pub const DELIVER_STATUS_SUCCESS: i32 = 200;

/// Which block representation the stream carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverKind {
    /// Full blocks with transaction payloads.
    Deliver,
    /// Transaction ids, validation codes, and chaincode event names only.
    #[default]
    DeliverFiltered,
}

/// Message sent to the delivery service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliverRequest {
    Seek(SeekInfo),
}

/// Message received from the delivery service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliverResponse {
    Block(Block),
    FilteredBlock(FilteredBlock),
    /// Terminal status for the current seek.
    Status(i32),
}

/// An open delivery stream.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, request: DeliverRequest) -> Result<()>;

    /// Next message, or `None` once the stream has ended.
    async fn receive(&mut self) -> Option<Result<DeliverResponse>>;

    async fn close(&mut self);
}

/// Opens delivery streams.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connect(
        &self,
        channel_id: &str,
        endpoint: &dyn EventEndpoint,
        kind: DeliverKind,
    ) -> Result<Box<dyn Connection>>;
}

/// The delivery endpoint of `peer`, or an error if it has none.
pub fn event_endpoint(peer: &dyn Peer) -> Result<&dyn EventEndpoint> {
    peer.event_endpoint()
        .ok_or_else(|| EventError::NotEventEndpoint(peer.url().to_string()))
}

#[cfg(test)]
mod tests {
    use pcl_types::mock::MockPeer;

    use super::*;

    #[test]
    fn endpoint_capability_is_checked() {
        let plain = MockPeer::new("p1", "peer1:7051");
        assert!(matches!(
            event_endpoint(&plain),
            Err(EventError::NotEventEndpoint(url)) if url == "peer1:7051"
        ));

        let capable = MockPeer::new("p2", "peer2:7051").with_event_endpoint();
        assert_eq!(event_endpoint(&capable).unwrap().event_url(), "peer2:7051");
    }
}
