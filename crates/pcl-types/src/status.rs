//! Caller-visible status taxonomy.
//!
//! Every failure the pipeline reports is a [`Status`]: a [`Group`] naming the
//! subsystem that produced it, a [`Code`] callers can match on, and a human
//! message. Messages coming from collaborators (discovery, selection,
//! transport) are carried through unchanged; [`Status::context`] only
//! prefixes them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::validation::TxValidationCode;

/// Subsystem that produced a status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Group {
    Unknown,
    Client,
    Discovery,
    Selection,
    Endorser,
    Orderer,
    EventServer,
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::Client => "Client",
            Self::Discovery => "Discovery",
            Self::Selection => "Selection",
            Self::Endorser => "Endorser",
            Self::Orderer => "Orderer",
            Self::EventServer => "Event Server",
        };
        write!(f, "{s}")
    }
}

/// Distinct status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    Unknown,
    ConnectionFailed,
    /// Endorsers returned different proposal response payloads.
    EndorsementMismatch,
    /// A peer returned a non-success chaincode status.
    ChaincodeError(i32),
    /// The ledger committed the transaction as invalid.
    InvalidTransaction(TxValidationCode),
    Timeout,
    Cancelled,
    MissingTimeout,
    NoPeersAvailable,
    NoEventService,
    EventServiceClosed,
    SignatureVerificationFailed,
    RegistrationFailed,
}

impl Code {
    /// Numeric form of the code. Chaincode and validation codes keep the
    /// value reported by the peer.
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Unknown => 1,
            Self::ConnectionFailed => 2,
            Self::EndorsementMismatch => 3,
            Self::Timeout => 5,
            Self::NoPeersAvailable => 6,
            Self::SignatureVerificationFailed => 8,
            Self::Cancelled => 10,
            Self::MissingTimeout => 11,
            Self::NoEventService => 12,
            Self::EventServiceClosed => 13,
            Self::RegistrationFailed => 14,
            Self::ChaincodeError(status) => *status,
            Self::InvalidTransaction(code) => code.as_i32(),
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChaincodeError(status) => write!(f, "ChaincodeError({status})"),
            Self::InvalidTransaction(code) => write!(f, "{code}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// A failure reported to callers of the pipeline.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{group} status code ({}) {code}: {message}", .code.as_i32())]
pub struct Status {
    pub group: Group,
    pub code: Code,
    pub message: String,
}

impl Status {
    pub fn new(group: Group, code: Code, message: impl Into<String>) -> Self {
        Self {
            group,
            code,
            message: message.into(),
        }
    }

    /// Failure reported by the discovery service.
    pub fn discovery(message: impl Into<String>) -> Self {
        Self::new(Group::Discovery, Code::Unknown, message)
    }

    /// Failure reported by the selection service.
    pub fn selection(message: impl Into<String>) -> Self {
        Self::new(Group::Selection, Code::Unknown, message)
    }

    /// Transport-level failure talking to an endorser.
    pub fn connection_failed(group: Group, message: impl Into<String>) -> Self {
        Self::new(group, Code::ConnectionFailed, message)
    }

    pub fn endorsement_mismatch() -> Self {
        Self::new(
            Group::Endorser,
            Code::EndorsementMismatch,
            "ProposalResponsePayloads do not match",
        )
    }

    pub fn invalid_transaction(code: TxValidationCode) -> Self {
        Self::new(
            Group::EventServer,
            Code::InvalidTransaction(code),
            format!("received invalid transaction: {code}"),
        )
    }

    pub fn timeout(group: Group, message: impl Into<String>) -> Self {
        Self::new(group, Code::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Group::Client, Code::Cancelled, message)
    }

    /// Prefix the message with the phase that observed the failure. Group,
    /// code, and the original message are preserved.
    pub fn context(mut self, phase: impl fmt::Display) -> Self {
        self.message = format!("{phase}: {}", self.message);
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.code == Code::Timeout
    }

    pub fn is_endorsement_mismatch(&self) -> bool {
        self.code == Code::EndorsementMismatch
    }

    /// The validation code carried by an invalid-transaction status.
    pub fn validation_code(&self) -> Option<TxValidationCode> {
        match self.code {
            Code::InvalidTransaction(code) => Some(code),
            _ => None,
        }
    }
}
