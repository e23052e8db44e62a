use pcl_types::{Code, Group, Status};

/// Errors produced by the block-delivery client.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The peer has no block-delivery endpoint.
    #[error("peer {0} does not expose a block-delivery endpoint")]
    NotEventEndpoint(String),

    /// The connection provider could not open a stream.
    #[error("connection to {url} failed: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// A bounded wait expired.
    #[error("{0}")]
    Timeout(String),

    /// The delivery service answered with a non-success status.
    #[error("deliver service returned status {0}")]
    DeliverStatus(i32),

    /// The underlying stream failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Full-block registrations on a filtered client.
    #[error("block events are not permitted on a filtered deliver client")]
    BlockEventsNotPermitted,

    /// A status registration for this transaction already exists.
    #[error("transaction {0} is already registered")]
    DuplicateRegistration(String),

    /// The chaincode event filter is not a valid regular expression.
    #[error("invalid event filter: {0}")]
    InvalidFilter(#[from] regex::Error),

    /// Configuration value out of range.
    #[error("invalid deliver config: {0}")]
    Config(String),

    /// TOML parse failure.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The client has shut down or given up reconnecting.
    #[error("deliver client is closed")]
    Closed,
}

/// Convenience alias used throughout the events crate.
pub type Result<T> = std::result::Result<T, EventError>;

impl From<EventError> for Status {
    fn from(err: EventError) -> Self {
        let (group, code) = match &err {
            EventError::NotEventEndpoint(_) => (Group::Client, Code::ConnectionFailed),
            EventError::ConnectionFailed { .. }
            | EventError::Transport(_)
            | EventError::DeliverStatus(_) => (Group::EventServer, Code::ConnectionFailed),
            EventError::Timeout(_) => (Group::EventServer, Code::Timeout),
            EventError::BlockEventsNotPermitted
            | EventError::DuplicateRegistration(_)
            | EventError::InvalidFilter(_) => (Group::EventServer, Code::RegistrationFailed),
            EventError::Closed => (Group::EventServer, Code::EventServiceClosed),
            EventError::Config(_) | EventError::Toml(_) => (Group::Client, Code::Unknown),
        };
        Status::new(group, code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_status_codes() {
        let status: Status = EventError::Closed.into();
        assert_eq!(status.code, Code::EventServiceClosed);
        assert_eq!(status.group, Group::EventServer);

        let status: Status = EventError::DuplicateRegistration("abc".into()).into();
        assert_eq!(status.code, Code::RegistrationFailed);
        assert!(status.message.contains("abc"));
    }
}
