use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use pcl_types::{
    Block, BlockEvent, CcEvent, ChaincodeEvent, FilteredBlock, FilteredBlockEvent,
    TxStatusEvent, TxValidationCode, TxnId,
};

use crate::error::{EventError, Result};

/// Identifier of one registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegistrationId(Uuid);

impl RegistrationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RegistrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reg:{}", self.0)
    }
}

/// Consumer side of a registration, as stored in the registry.
pub(crate) enum Subscriber {
    Block(mpsc::Sender<BlockEvent>),
    FilteredBlock(mpsc::Sender<FilteredBlockEvent>),
    TxStatus {
        txn_id: TxnId,
        sender: oneshot::Sender<TxStatusEvent>,
    },
    Chaincode {
        chaincode_id: String,
        filter: Regex,
        sender: mpsc::Sender<CcEvent>,
    },
}

struct ChaincodeSubscriber {
    chaincode_id: String,
    filter: Regex,
    sender: mpsc::Sender<CcEvent>,
}

#[derive(Default)]
struct Inner {
    blocks: HashMap<RegistrationId, mpsc::Sender<BlockEvent>>,
    filtered: HashMap<RegistrationId, mpsc::Sender<FilteredBlockEvent>>,
    tx_status: HashMap<TxnId, (RegistrationId, oneshot::Sender<TxStatusEvent>)>,
    chaincode: HashMap<RegistrationId, ChaincodeSubscriber>,
}

/// Transaction-level view shared by full and filtered blocks.
struct TxView<'a> {
    txn_id: &'a TxnId,
    validation_code: TxValidationCode,
    chaincode_events: &'a [ChaincodeEvent],
}

/// Routes delivered blocks to registered consumers.
///
/// Senders are cloned out of the lock before any await, so a slow consumer
/// never blocks registration.
pub struct Registry {
    inner: Mutex<Inner>,
    consumer_timeout: Duration,
}

impl Registry {
    pub fn new(consumer_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            consumer_timeout,
        }
    }

    pub(crate) fn register(&self, id: RegistrationId, subscriber: Subscriber) -> Result<()> {
        let mut inner = self.inner.lock();
        match subscriber {
            Subscriber::Block(sender) => {
                inner.blocks.insert(id, sender);
            }
            Subscriber::FilteredBlock(sender) => {
                inner.filtered.insert(id, sender);
            }
            Subscriber::TxStatus { txn_id, sender } => {
                if inner.tx_status.contains_key(&txn_id) {
                    return Err(EventError::DuplicateRegistration(txn_id.to_string()));
                }
                inner.tx_status.insert(txn_id, (id, sender));
            }
            Subscriber::Chaincode {
                chaincode_id,
                filter,
                sender,
            } => {
                inner.chaincode.insert(
                    id,
                    ChaincodeSubscriber {
                        chaincode_id,
                        filter,
                        sender,
                    },
                );
            }
        }
        debug!(registration = %id, "registered");
        Ok(())
    }

    /// Remove a registration. Returns `false` if it was already gone.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.blocks.remove(&id).is_some()
            || inner.filtered.remove(&id).is_some()
            || inner.chaincode.remove(&id).is_some();
        if removed {
            return true;
        }
        let before = inner.tx_status.len();
        inner.tx_status.retain(|_, (reg, _)| *reg != id);
        inner.tx_status.len() != before
    }

    /// Number of live registrations of every kind.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.blocks.len() + inner.filtered.len() + inner.tx_status.len() + inner.chaincode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registration, ending all consumer channels.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        *inner = Inner::default();
    }

    pub(crate) async fn dispatch_block(&self, block: Block, channel_id: &str, source_url: &str) {
        let (block_senders, filtered_senders) = {
            let inner = self.inner.lock();
            (
                inner.blocks.values().cloned().collect::<Vec<_>>(),
                inner.filtered.values().cloned().collect::<Vec<_>>(),
            )
        };

        if !filtered_senders.is_empty() {
            let event = FilteredBlockEvent {
                filtered_block: block.to_filtered(channel_id),
                source_url: source_url.to_string(),
            };
            self.fan_out(&filtered_senders, event, "filtered block").await;
        }

        let txs: Vec<TxView<'_>> = block
            .transactions
            .iter()
            .map(|tx| TxView {
                txn_id: &tx.txn_id,
                validation_code: tx.validation_code,
                chaincode_events: &tx.chaincode_events,
            })
            .collect();
        self.dispatch_transactions(&txs, block.number, source_url).await;

        if !block_senders.is_empty() {
            let event = BlockEvent {
                block: block.clone(),
                source_url: source_url.to_string(),
            };
            self.fan_out(&block_senders, event, "block").await;
        }
    }

    pub(crate) async fn dispatch_filtered_block(&self, block: FilteredBlock, source_url: &str) {
        let filtered_senders: Vec<_> = self.inner.lock().filtered.values().cloned().collect();

        let txs: Vec<TxView<'_>> = block
            .filtered_transactions
            .iter()
            .map(|tx| TxView {
                txn_id: &tx.txn_id,
                validation_code: tx.validation_code,
                chaincode_events: &tx.chaincode_events,
            })
            .collect();
        self.dispatch_transactions(&txs, block.number, source_url).await;

        if !filtered_senders.is_empty() {
            let event = FilteredBlockEvent {
                filtered_block: block.clone(),
                source_url: source_url.to_string(),
            };
            self.fan_out(&filtered_senders, event, "filtered block").await;
        }
    }

    async fn dispatch_transactions(&self, txs: &[TxView<'_>], block_number: u64, source_url: &str) {
        let mut chaincode_deliveries = Vec::new();
        {
            let mut inner = self.inner.lock();
            for tx in txs {
                // Exactly one status event per registration: remove on delivery.
                if let Some((id, sender)) = inner.tx_status.remove(tx.txn_id) {
                    let event = TxStatusEvent {
                        txn_id: tx.txn_id.clone(),
                        validation_code: tx.validation_code,
                        block_number,
                        source_url: source_url.to_string(),
                    };
                    if sender.send(event).is_err() {
                        debug!(registration = %id, "tx status receiver already dropped");
                    }
                }

                for cc_event in tx.chaincode_events {
                    for subscriber in inner.chaincode.values() {
                        if subscriber.chaincode_id == cc_event.chaincode_id
                            && subscriber.filter.is_match(&cc_event.event_name)
                        {
                            chaincode_deliveries.push((
                                subscriber.sender.clone(),
                                CcEvent {
                                    txn_id: tx.txn_id.clone(),
                                    chaincode_id: cc_event.chaincode_id.clone(),
                                    event_name: cc_event.event_name.clone(),
                                    payload: cc_event.payload.clone(),
                                    block_number,
                                    source_url: source_url.to_string(),
                                },
                            ));
                        }
                    }
                }
            }
        }

        for (sender, event) in chaincode_deliveries {
            self.deliver(&sender, event, "chaincode event").await;
        }
    }

    async fn fan_out<T: Clone>(&self, senders: &[mpsc::Sender<T>], event: T, what: &str) {
        for sender in senders {
            self.deliver(sender, event.clone(), what).await;
        }
    }

    async fn deliver<T>(&self, sender: &mpsc::Sender<T>, event: T, what: &str) {
        if sender.is_closed() {
            return;
        }
        let delivered = if self.consumer_timeout.is_zero() {
            sender.try_send(event).is_ok()
        } else {
            sender.send_timeout(event, self.consumer_timeout).await.is_ok()
        };
        if !delivered && !sender.is_closed() {
            warn!(kind = what, "consumer is not keeping up, event dropped");
        }
    }
}
