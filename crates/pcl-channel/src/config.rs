use serde::{Deserialize, Serialize};

use pcl_invoke::{RetryOpts, TimeoutKind, Timeouts};

use crate::error::{ChannelError, Result};

/// Configuration for a [`crate::ChannelClient`].
///
/// Timeouts given in a file are layered over [`Timeouts::standard`], so a
/// file only has to name the kinds it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub channel_id: String,
    /// Check endorser identities and signatures before submitting.
    pub verify_signatures: bool,
    /// Default timeouts. Per-call options override individual entries.
    pub timeouts: Timeouts,
    /// Retry policy used when a call does not bring its own.
    pub retry: RetryOpts,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            channel_id: String::new(),
            verify_signatures: false,
            timeouts: Timeouts::standard(),
            retry: RetryOpts::default(),
        }
    }
}

impl ChannelConfig {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryOpts) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = Timeouts::standard().merged_with(&timeouts);
        self
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.normalized()
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.normalized()
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_id.trim().is_empty() {
            return Err(ChannelError::Config("channel_id must not be empty".into()));
        }
        for kind in [TimeoutKind::Execute, TimeoutKind::Query] {
            match self.timeouts.get(kind) {
                Some(timeout) if !timeout.is_zero() => {}
                _ => {
                    return Err(ChannelError::Config(format!(
                        "{kind} timeout must be non-zero"
                    )))
                }
            }
        }
        if self.retry.backoff_factor.is_nan() || self.retry.backoff_factor < 1.0 {
            return Err(ChannelError::Config(
                "retry.backoff_factor must be at least 1.0".into(),
            ));
        }
        if self.retry.max_backoff < self.retry.initial_backoff {
            return Err(ChannelError::Config(
                "retry.max_backoff must not be below retry.initial_backoff".into(),
            ));
        }
        Ok(())
    }

    fn normalized(mut self) -> Result<Self> {
        self.timeouts = Timeouts::standard().merged_with(&self.timeouts);
        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pcl_types::Code;

    use super::*;

    #[test]
    fn defaults_need_a_channel() {
        assert!(ChannelConfig::default().validate().is_err());
        assert!(ChannelConfig::new("mychannel").validate().is_ok());
    }

    #[test]
    fn toml_timeouts_layer_over_standard() {
        let config = ChannelConfig::from_toml_str(
            r#"
            channel_id = "mychannel"
            verify_signatures = true

            [timeouts]
            execute = { secs = 30, nanos = 0 }

            [retry]
            attempts = 2
            retryable_codes = ["ConnectionFailed", "Timeout"]
            "#,
        )
        .unwrap();
        assert_eq!(config.channel_id, "mychannel");
        assert!(config.verify_signatures);
        assert_eq!(
            config.timeouts.get(TimeoutKind::Execute),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            config.timeouts.get(TimeoutKind::Query),
            Some(Duration::from_secs(180))
        );
        assert_eq!(config.retry.attempts, 2);
        assert!(config.retry.is_retryable(&Code::Timeout));
        assert_eq!(config.retry.backoff_factor, 2.0);
    }

    #[test]
    fn json_form_is_accepted() {
        let config = ChannelConfig::from_json_str(
            r#"{ "channel_id": "orders", "timeouts": { "query": { "secs": 3, "nanos": 0 } } }"#,
        )
        .unwrap();
        assert_eq!(config.channel_id, "orders");
        assert_eq!(
            config.timeouts.get(TimeoutKind::Query),
            Some(Duration::from_secs(3))
        );
        assert_eq!(config.retry, RetryOpts::default());
    }

    #[test]
    fn zero_execute_timeout_is_rejected() {
        let err = ChannelConfig::from_toml_str(
            r#"
            channel_id = "mychannel"
            [timeouts]
            execute = { secs = 0, nanos = 0 }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ChannelError::Config(msg) if msg.contains("execute")));
    }

    #[test]
    fn unknown_timeout_kind_is_a_parse_error() {
        let err = ChannelConfig::from_toml_str(
            r#"
            channel_id = "mychannel"
            [timeouts]
            commit = { secs = 1, nanos = 0 }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ChannelError::Toml(_)));
    }
}
