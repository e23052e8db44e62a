use thiserror::Error;

use pcl_types::Status;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid channel configuration: {0}")]
    Config(String),

    #[error("failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to parse JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Invocation(#[from] Status),
}

impl ChannelError {
    /// The pipeline status behind an invocation failure.
    pub fn status(&self) -> Option<&Status> {
        match self {
            Self::Invocation(status) => Some(status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
