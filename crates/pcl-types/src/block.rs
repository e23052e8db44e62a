use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::txn::TxnId;
use crate::validation::TxValidationCode;

/// An event emitted by chaincode during a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeEvent {
    pub chaincode_id: String,
    pub event_name: String,
    pub payload: Bytes,
}

/// A committed transaction as it appears inside a full block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTransaction {
    pub txn_id: TxnId,
    pub validation_code: TxValidationCode,
    pub chaincode_events: Vec<ChaincodeEvent>,
    pub payload: Bytes,
}

/// A full ledger block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub transactions: Vec<BlockTransaction>,
}

impl Block {
    /// Strip transaction payloads and chaincode event payloads, producing
    /// the view served by the filtered delivery endpoint.
    pub fn to_filtered(&self, channel_id: impl Into<String>) -> FilteredBlock {
        FilteredBlock {
            channel_id: channel_id.into(),
            number: self.number,
            filtered_transactions: self
                .transactions
                .iter()
                .map(|tx| FilteredTransaction {
                    txn_id: tx.txn_id.clone(),
                    validation_code: tx.validation_code,
                    chaincode_events: tx
                        .chaincode_events
                        .iter()
                        .map(|event| ChaincodeEvent {
                            chaincode_id: event.chaincode_id.clone(),
                            event_name: event.event_name.clone(),
                            payload: Bytes::new(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// A transaction inside a filtered block: id, outcome, and event names only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredTransaction {
    pub txn_id: TxnId,
    pub validation_code: TxValidationCode,
    pub chaincode_events: Vec<ChaincodeEvent>,
}

/// A block with transaction contents removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredBlock {
    pub channel_id: String,
    pub number: u64,
    pub filtered_transactions: Vec<FilteredTransaction>,
}

/// A full block delivered to a consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockEvent {
    pub block: Block,
    pub source_url: String,
}

/// A filtered block delivered to a consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilteredBlockEvent {
    pub filtered_block: FilteredBlock,
    pub source_url: String,
}

/// Commit outcome of one transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxStatusEvent {
    pub txn_id: TxnId,
    pub validation_code: TxValidationCode,
    pub block_number: u64,
    pub source_url: String,
}

/// A chaincode event delivered to a consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CcEvent {
    pub txn_id: TxnId,
    pub chaincode_id: String,
    pub event_name: String,
    pub payload: Bytes,
    pub block_number: u64,
    pub source_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filtered_view_drops_payloads() {
        let block = Block {
            number: 7,
            transactions: vec![BlockTransaction {
                txn_id: TxnId::from("tx1"),
                validation_code: TxValidationCode::Valid,
                chaincode_events: vec![ChaincodeEvent {
                    chaincode_id: "cc".into(),
                    event_name: "transfer".into(),
                    payload: Bytes::from_static(b"secret"),
                }],
                payload: Bytes::from_static(b"tx-bytes"),
            }],
        };

        let filtered = block.to_filtered("mychannel");
        assert_eq!(filtered.number, 7);
        assert_eq!(filtered.channel_id, "mychannel");
        let tx = &filtered.filtered_transactions[0];
        assert_eq!(tx.txn_id, TxnId::from("tx1"));
        assert_eq!(tx.chaincode_events[0].event_name, "transfer");
        assert!(tx.chaincode_events[0].payload.is_empty());
    }
}
