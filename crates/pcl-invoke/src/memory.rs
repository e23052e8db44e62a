//! In-memory collaborators.
//!
//! Intended for tests and embedding: every type here implements one of the
//! service traits without touching the network, and exposes counters so
//! callers can assert how it was used.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::{mpsc, oneshot};

use pcl_types::mock::mock_signature;
use pcl_types::{
    CcEvent, ChaincodeEventRegistration, Code, EventService, Group, Identity, Peer, Status,
    Transaction, TransactionHeader, TransactionResponse, TxStatusEvent, TxStatusRegistration,
    TxValidationCode, TxnId, Unregister,
};

use crate::context::ClientContext;
use crate::services::{DiscoveryService, Membership, SelectionService, Transactor};

// ---------------------------------------------------------------------------
// Discovery / selection
// ---------------------------------------------------------------------------

/// Discovery that always reports the same peers, or always fails.
pub struct StaticDiscovery {
    peers: Vec<Arc<dyn Peer>>,
    error: Option<Status>,
    calls: AtomicUsize,
}

impl StaticDiscovery {
    pub fn new(peers: Vec<Arc<dyn Peer>>) -> Self {
        Self {
            peers,
            error: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: Status) -> Self {
        Self {
            peers: Vec::new(),
            error: Some(error),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `discover` calls served.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscoveryService for StaticDiscovery {
    async fn discover(&self, _channel_id: &str) -> Result<Vec<Arc<dyn Peer>>, Status> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(self.peers.clone()),
        }
    }
}

enum SelectionMode {
    Passthrough,
    Fixed(Vec<Arc<dyn Peer>>),
    Failing(Status),
}

/// Selection that returns its input unchanged, a fixed list, or an error.
pub struct StaticSelection {
    mode: SelectionMode,
}

impl StaticSelection {
    pub fn passthrough() -> Self {
        Self {
            mode: SelectionMode::Passthrough,
        }
    }

    pub fn with_peers(peers: Vec<Arc<dyn Peer>>) -> Self {
        Self {
            mode: SelectionMode::Fixed(peers),
        }
    }

    pub fn failing(error: Status) -> Self {
        Self {
            mode: SelectionMode::Failing(error),
        }
    }
}

impl Default for StaticSelection {
    fn default() -> Self {
        Self::passthrough()
    }
}

#[async_trait]
impl SelectionService for StaticSelection {
    async fn select(
        &self,
        _channel_id: &str,
        _chaincode_id: &str,
        peers: &[Arc<dyn Peer>],
    ) -> Result<Vec<Arc<dyn Peer>>, Status> {
        match &self.mode {
            SelectionMode::Passthrough => Ok(peers.to_vec()),
            SelectionMode::Fixed(fixed) => Ok(fixed.clone()),
            SelectionMode::Failing(error) => Err(error.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Transactor
// ---------------------------------------------------------------------------

/// Orderer stand-in that records every submitted transaction.
pub struct InMemoryTransactor {
    channel_id: String,
    creator: Identity,
    error: Option<Status>,
    submitted: Mutex<Vec<Transaction>>,
}

impl InMemoryTransactor {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            creator: Identity::new("Org1MSP", b"User1@org1".to_vec()),
            error: None,
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn with_creator(mut self, creator: Identity) -> Self {
        self.creator = creator;
        self
    }

    /// Reject every submission with `error`.
    pub fn with_error(mut self, error: Status) -> Self {
        self.error = Some(error);
        self
    }

    /// Transactions accepted so far, in submission order.
    pub fn submitted(&self) -> Vec<Transaction> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl Transactor for InMemoryTransactor {
    fn create_transaction_header(&self) -> Result<TransactionHeader, Status> {
        Ok(TransactionHeader::new(
            self.channel_id.clone(),
            self.creator.clone(),
        ))
    }

    async fn send_transaction(
        &self,
        transaction: &Transaction,
    ) -> Result<TransactionResponse, Status> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        self.submitted.lock().push(transaction.clone());
        Ok(TransactionResponse {
            orderer: "orderer.example.com:7050".into(),
            txn_id: transaction.txn_id().clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Event service
// ---------------------------------------------------------------------------

/// A status registration forwarded to the test driving a manual
/// [`ChannelEventService`].
#[derive(Debug)]
pub struct TxStatusRequest {
    pub txn_id: TxnId,
    reply: oneshot::Sender<TxStatusEvent>,
}

impl TxStatusRequest {
    /// Deliver the commit outcome. Returns `false` if the registration was
    /// already dropped.
    pub fn reply(self, code: TxValidationCode, block_number: u64) -> bool {
        let event = TxStatusEvent {
            txn_id: self.txn_id,
            validation_code: code,
            block_number,
            source_url: "memory".into(),
        };
        self.reply.send(event).is_ok()
    }
}

enum ReplyMode {
    Manual(mpsc::UnboundedSender<TxStatusRequest>),
    Auto(TxValidationCode),
    Silent,
}

struct ChaincodeSubscriber {
    chaincode_id: String,
    filter: Regex,
    sender: mpsc::Sender<CcEvent>,
}

/// Event service backed by in-process channels.
///
/// Three reply modes:
/// - `manual`: every status registration is handed to the caller as a
///   [`TxStatusRequest`] to answer.
/// - `auto_reply`: every registration immediately receives the given code.
/// - `silent`: registrations are held until [`ChannelEventService::notify`].
pub struct ChannelEventService {
    mode: ReplyMode,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, (TxnId, oneshot::Sender<TxStatusEvent>)>>>,
    active: Arc<AtomicUsize>,
    chaincode: Arc<Mutex<HashMap<u64, ChaincodeSubscriber>>>,
}

impl ChannelEventService {
    fn with_mode(mode: ReplyMode) -> Self {
        Self {
            mode,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            active: Arc::new(AtomicUsize::new(0)),
            chaincode: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn manual() -> (Self, mpsc::UnboundedReceiver<TxStatusRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with_mode(ReplyMode::Manual(tx)), rx)
    }

    pub fn auto_reply(code: TxValidationCode) -> Self {
        Self::with_mode(ReplyMode::Auto(code))
    }

    pub fn silent() -> Self {
        Self::with_mode(ReplyMode::Silent)
    }

    /// Number of status registrations not yet dropped.
    pub fn active_registrations(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Deliver `code` to every held registration for `txn_id`. Returns the
    /// number of registrations notified.
    pub fn notify(&self, txn_id: &TxnId, code: TxValidationCode, block_number: u64) -> usize {
        let mut pending = self.pending.lock();
        let ids: Vec<u64> = pending
            .iter()
            .filter(|(_, (id, _))| id == txn_id)
            .map(|(key, _)| *key)
            .collect();
        let mut delivered = 0;
        for key in ids {
            if let Some((_, sender)) = pending.remove(&key) {
                let event = TxStatusEvent {
                    txn_id: txn_id.clone(),
                    validation_code: code,
                    block_number,
                    source_url: "memory".into(),
                };
                if sender.send(event).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Fan a chaincode event out to matching subscribers. Returns the number
    /// of subscribers that received it.
    pub fn emit_chaincode_event(&self, event: CcEvent) -> usize {
        let subscribers = self.chaincode.lock();
        subscribers
            .values()
            .filter(|s| s.chaincode_id == event.chaincode_id && s.filter.is_match(&event.event_name))
            .filter(|s| s.sender.try_send(event.clone()).is_ok())
            .count()
    }

    fn unregister_for(&self, key: u64) -> Unregister {
        let active = self.active.clone();
        let pending = self.pending.clone();
        Unregister::new(move || {
            pending.lock().remove(&key);
            active.fetch_sub(1, Ordering::SeqCst);
        })
    }
}

#[async_trait]
impl EventService for ChannelEventService {
    async fn register_tx_status(&self, txn_id: &TxnId) -> Result<TxStatusRegistration, Status> {
        let key = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        match &self.mode {
            ReplyMode::Manual(requests) => {
                let request = TxStatusRequest {
                    txn_id: txn_id.clone(),
                    reply: tx,
                };
                requests.send(request).map_err(|_| {
                    Status::new(
                        Group::EventServer,
                        Code::EventServiceClosed,
                        "event service receiver dropped",
                    )
                })?;
            }
            ReplyMode::Auto(code) => {
                let _ = tx.send(TxStatusEvent {
                    txn_id: txn_id.clone(),
                    validation_code: *code,
                    block_number: 0,
                    source_url: "memory".into(),
                });
            }
            ReplyMode::Silent => {
                self.pending.lock().insert(key, (txn_id.clone(), tx));
            }
        }

        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(TxStatusRegistration::new(
            txn_id.clone(),
            rx,
            self.unregister_for(key),
        ))
    }

    async fn register_chaincode_event(
        &self,
        chaincode_id: &str,
        event_filter: &str,
    ) -> Result<ChaincodeEventRegistration, Status> {
        let filter = Regex::new(event_filter).map_err(|e| {
            Status::new(
                Group::EventServer,
                Code::RegistrationFailed,
                format!("invalid event filter '{event_filter}': {e}"),
            )
        })?;
        let key = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(64);
        self.chaincode.lock().insert(
            key,
            ChaincodeSubscriber {
                chaincode_id: chaincode_id.to_string(),
                filter,
                sender: tx,
            },
        );

        let chaincode = self.chaincode.clone();
        Ok(ChaincodeEventRegistration::new(
            rx,
            Unregister::new(move || {
                chaincode.lock().remove(&key);
            }),
        ))
    }
}

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// Membership that trusts a fixed set of MSP ids and checks signatures made
/// by [`pcl_types::mock::MockPeer`].
pub struct InMemoryMembership {
    trusted: HashSet<String>,
}

impl InMemoryMembership {
    pub fn new<I, S>(trusted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            trusted: trusted.into_iter().map(Into::into).collect(),
        }
    }
}

impl Membership for InMemoryMembership {
    fn validate(&self, identity: &Identity) -> Result<(), Status> {
        if self.trusted.contains(&identity.msp_id) {
            Ok(())
        } else {
            Err(Status::new(
                Group::Endorser,
                Code::SignatureVerificationFailed,
                format!("unknown MSP '{}'", identity.msp_id),
            ))
        }
    }

    fn verify(&self, identity: &Identity, message: &[u8], signature: &[u8]) -> Result<(), Status> {
        // `message` already carries the identity suffix; recover the payload.
        let suffix = identity.to_bytes();
        let payload = message.strip_suffix(suffix.as_slice()).unwrap_or(message);
        if mock_signature(payload, identity).as_ref() == signature {
            Ok(())
        } else {
            Err(Status::new(
                Group::Endorser,
                Code::SignatureVerificationFailed,
                "signature does not match",
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A client context on `mychannel` whose discovery returns `peers`,
/// selection passes them through, and membership trusts `Org1MSP`. No event
/// service is configured.
pub fn static_client_context(peers: Vec<Arc<dyn Peer>>) -> ClientContext {
    ClientContext {
        channel_id: "mychannel".into(),
        membership: Arc::new(InMemoryMembership::new(["Org1MSP"])),
        discovery: Arc::new(StaticDiscovery::new(peers)),
        selection: Arc::new(StaticSelection::passthrough()),
        transactor: Arc::new(InMemoryTransactor::new("mychannel")),
        event_service: None,
    }
}
