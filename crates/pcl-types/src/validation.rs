use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Outcome the ledger assigns to a transaction when it is committed.
///
/// Numeric values match the ledger's wire protocol so that codes received
/// from a peer can be converted losslessly with [`TxValidationCode::from_i32`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxValidationCode {
    Valid,
    NilEnvelope,
    BadPayload,
    BadCommonHeader,
    BadCreatorSignature,
    InvalidEndorserTransaction,
    InvalidConfigTransaction,
    UnsupportedTxPayload,
    BadProposalTxid,
    DuplicateTxid,
    EndorsementPolicyFailure,
    MvccReadConflict,
    PhantomReadConflict,
    UnknownTxType,
    TargetChainNotFound,
    MarshalTxError,
    NilTxaction,
    ExpiredChaincode,
    ChaincodeVersionConflict,
    BadHeaderExtension,
    BadChannelHeader,
    BadResponsePayload,
    BadRwset,
    IllegalWriteset,
    InvalidWriteset,
    NotValidated,
    InvalidOtherReason,
}

impl TxValidationCode {
    const TABLE: [(TxValidationCode, i32, &'static str); 27] = [
        (Self::Valid, 0, "VALID"),
        (Self::NilEnvelope, 1, "NIL_ENVELOPE"),
        (Self::BadPayload, 2, "BAD_PAYLOAD"),
        (Self::BadCommonHeader, 3, "BAD_COMMON_HEADER"),
        (Self::BadCreatorSignature, 4, "BAD_CREATOR_SIGNATURE"),
        (Self::InvalidEndorserTransaction, 5, "INVALID_ENDORSER_TRANSACTION"),
        (Self::InvalidConfigTransaction, 6, "INVALID_CONFIG_TRANSACTION"),
        (Self::UnsupportedTxPayload, 7, "UNSUPPORTED_TX_PAYLOAD"),
        (Self::BadProposalTxid, 8, "BAD_PROPOSAL_TXID"),
        (Self::DuplicateTxid, 9, "DUPLICATE_TXID"),
        (Self::EndorsementPolicyFailure, 10, "ENDORSEMENT_POLICY_FAILURE"),
        (Self::MvccReadConflict, 11, "MVCC_READ_CONFLICT"),
        (Self::PhantomReadConflict, 12, "PHANTOM_READ_CONFLICT"),
        (Self::UnknownTxType, 13, "UNKNOWN_TX_TYPE"),
        (Self::TargetChainNotFound, 14, "TARGET_CHAIN_NOT_FOUND"),
        (Self::MarshalTxError, 15, "MARSHAL_TX_ERROR"),
        (Self::NilTxaction, 16, "NIL_TXACTION"),
        (Self::ExpiredChaincode, 17, "EXPIRED_CHAINCODE"),
        (Self::ChaincodeVersionConflict, 18, "CHAINCODE_VERSION_CONFLICT"),
        (Self::BadHeaderExtension, 19, "BAD_HEADER_EXTENSION"),
        (Self::BadChannelHeader, 20, "BAD_CHANNEL_HEADER"),
        (Self::BadResponsePayload, 21, "BAD_RESPONSE_PAYLOAD"),
        (Self::BadRwset, 22, "BAD_RWSET"),
        (Self::IllegalWriteset, 23, "ILLEGAL_WRITESET"),
        (Self::InvalidWriteset, 24, "INVALID_WRITESET"),
        (Self::NotValidated, 254, "NOT_VALIDATED"),
        (Self::InvalidOtherReason, 255, "INVALID_OTHER_REASON"),
    ];

    /// Wire value of this code.
    pub fn as_i32(self) -> i32 {
        Self::TABLE
            .iter()
            .find(|(code, _, _)| *code == self)
            .map(|(_, value, _)| *value)
            .unwrap_or(255)
    }

    /// Parse a wire value.
    pub fn from_i32(value: i32) -> Result<Self, TypeError> {
        Self::TABLE
            .iter()
            .find(|(_, v, _)| *v == value)
            .map(|(code, _, _)| *code)
            .ok_or(TypeError::UnknownValidationCode(value))
    }

    /// Protocol name of the code (e.g. `MVCC_READ_CONFLICT`).
    pub fn name(self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(code, _, _)| *code == self)
            .map(|(_, _, name)| *name)
            .unwrap_or("INVALID_OTHER_REASON")
    }

    /// Returns `true` only for [`TxValidationCode::Valid`].
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }
}

impl fmt::Display for TxValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<i32> for TxValidationCode {
    type Error = TypeError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::from_i32(value)
    }
}
