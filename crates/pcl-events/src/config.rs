use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::DeliverKind;
use crate::error::{EventError, Result};
use crate::seek::SeekPosition;

/// Configuration for a [`crate::DeliverClient`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverConfig {
    /// Full or filtered blocks.
    pub kind: DeliverKind,
    /// Where the first stream starts.
    pub initial_seek: SeekPosition,
    /// Bound on sending the seek request.
    pub resp_timeout: Duration,
    /// Bound on opening a stream.
    pub conn_timeout: Duration,
    /// Attempts made by [`crate::DeliverClient::connect`] before giving up.
    pub max_conn_attempts: u32,
    /// Consecutive reconnect failures tolerated after a stream is lost.
    /// Zero means unlimited.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt.
    pub reconnect_initial_delay: Duration,
    /// Upper bound on the delay between connection attempts.
    pub time_between_conn_attempts: Duration,
    /// Capacity of each consumer channel.
    pub event_consumer_buffer_size: usize,
    /// How long a full consumer channel may block delivery. Zero means the
    /// event is dropped immediately.
    pub event_consumer_timeout: Duration,
}

impl Default for DeliverConfig {
    fn default() -> Self {
        Self {
            kind: DeliverKind::DeliverFiltered,
            initial_seek: SeekPosition::Newest,
            resp_timeout: Duration::from_secs(5),
            conn_timeout: Duration::from_secs(15),
            max_conn_attempts: 1,
            max_reconnect_attempts: 0,
            reconnect_initial_delay: Duration::ZERO,
            time_between_conn_attempts: Duration::from_secs(5),
            event_consumer_buffer_size: 100,
            event_consumer_timeout: Duration::from_millis(500),
        }
    }
}

impl DeliverConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.resp_timeout.is_zero() {
            return Err(EventError::Config("resp_timeout must be non-zero".into()));
        }
        if self.conn_timeout.is_zero() {
            return Err(EventError::Config("conn_timeout must be non-zero".into()));
        }
        if self.max_conn_attempts == 0 {
            return Err(EventError::Config("max_conn_attempts must be at least 1".into()));
        }
        if self.event_consumer_buffer_size == 0 {
            return Err(EventError::Config(
                "event_consumer_buffer_size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
