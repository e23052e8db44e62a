use thiserror::Error;

use crate::status::{Code, Group, Status};

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("at least one proposal response is required to create a transaction")]
    NoEndorsements,

    #[error("unknown transaction validation code: {0}")]
    UnknownValidationCode(i32),
}

impl From<TypeError> for Status {
    fn from(err: TypeError) -> Self {
        Status::new(Group::Client, Code::Unknown, err.to_string())
    }
}
