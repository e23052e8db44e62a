use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pcl_types::{
    jittered_backoff, BlockEvent, ChaincodeEventRegistration, CcEvent, EventService,
    FilteredBlockEvent, Peer, Status, TxStatusRegistration, TxnId, Unregister,
};

use crate::config::DeliverConfig;
use crate::connection::{
    event_endpoint, Connection, ConnectionProvider, DeliverKind, DeliverRequest,
    DeliverResponse, DELIVER_STATUS_SUCCESS,
};
use crate::error::{EventError, Result};
use crate::registry::{RegistrationId, Registry, Subscriber};
use crate::seek::{SeekInfo, SeekPosition, SeekState};

/// Floor for the reconnect backoff base when no initial delay is configured.
const MIN_BACKOFF_BASE: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// States of the delivery connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No stream; terminal after shutdown or when reconnecting is abandoned.
    Disconnected,
    Connecting,
    /// Stream open, seek request in flight.
    Seeking,
    Streaming,
    /// Stream lost, waiting before the next attempt.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Seeking => "seeking",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Registrations
// ---------------------------------------------------------------------------

enum Command {
    Register {
        id: RegistrationId,
        subscriber: Subscriber,
        ack: oneshot::Sender<Result<()>>,
    },
    Unregister(RegistrationId),
}

fn unregister_via(commands: &mpsc::UnboundedSender<Command>, id: RegistrationId) -> Unregister {
    let commands = commands.clone();
    Unregister::new(move || {
        let _ = commands.send(Command::Unregister(id));
    })
}

/// Full-block subscription. Dropping it unregisters.
#[derive(Debug)]
pub struct BlockRegistration {
    events: mpsc::Receiver<BlockEvent>,
    _unregister: Unregister,
}

impl BlockRegistration {
    pub async fn recv(&mut self) -> Option<BlockEvent> {
        self.events.recv().await
    }
}

/// Filtered-block subscription. Dropping it unregisters.
#[derive(Debug)]
pub struct FilteredBlockRegistration {
    events: mpsc::Receiver<FilteredBlockEvent>,
    _unregister: Unregister,
}

impl FilteredBlockRegistration {
    pub async fn recv(&mut self) -> Option<FilteredBlockEvent> {
        self.events.recv().await
    }
}

// ---------------------------------------------------------------------------
// DeliverClient
// ---------------------------------------------------------------------------

/// Block-delivery client for one channel on one peer.
///
/// A single dispatcher task owns the connection. It streams blocks to the
/// registry, reconnects after stream loss resuming from the block after the
/// last one seen, and serves registration commands in every state.
pub struct DeliverClient {
    channel_id: String,
    kind: DeliverKind,
    buffer_size: usize,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    seek: Arc<SeekState>,
    registry: Arc<Registry>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DeliverClient {
    /// Open the first stream and start the dispatcher.
    ///
    /// Makes up to `max_conn_attempts` attempts, waiting
    /// `time_between_conn_attempts` between them.
    pub async fn connect(
        channel_id: impl Into<String>,
        peer: Arc<dyn Peer>,
        provider: Arc<dyn ConnectionProvider>,
        config: DeliverConfig,
    ) -> Result<Self> {
        config.validate()?;
        event_endpoint(peer.as_ref())?;

        let channel_id = channel_id.into();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let seek = Arc::new(SeekState::new(config.initial_seek));
        let registry = Arc::new(Registry::new(config.event_consumer_timeout));
        let cancel = CancellationToken::new();

        let link = Link {
            channel_id: channel_id.clone(),
            peer,
            provider,
            config: config.clone(),
            seek: seek.clone(),
            registry: registry.clone(),
            state: state_tx,
            cancel: cancel.clone(),
        };

        let connection = link.initial_connect().await?;
        let dispatcher = Dispatcher {
            link,
            commands: commands_rx,
        };
        let task = tokio::spawn(dispatcher.run(connection));

        Ok(Self {
            channel_id,
            kind: config.kind,
            buffer_size: config.event_consumer_buffer_size,
            commands: commands_tx,
            state: state_rx,
            seek,
            registry,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A watch over state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Highest block number received, if any.
    pub fn last_block_num(&self) -> Option<u64> {
        self.seek.last_block_num()
    }

    /// Position the next (re)connect will seek to.
    pub fn seek_position(&self) -> SeekPosition {
        self.seek.current()
    }

    /// Number of live registrations.
    pub fn registration_count(&self) -> usize {
        self.registry.len()
    }

    pub async fn register_block_events(&self) -> Result<BlockRegistration> {
        if self.kind == DeliverKind::DeliverFiltered {
            return Err(EventError::BlockEventsNotPermitted);
        }
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let id = self.register(Subscriber::Block(tx)).await?;
        Ok(BlockRegistration {
            events: rx,
            _unregister: unregister_via(&self.commands, id),
        })
    }

    pub async fn register_filtered_block_events(&self) -> Result<FilteredBlockRegistration> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let id = self.register(Subscriber::FilteredBlock(tx)).await?;
        Ok(FilteredBlockRegistration {
            events: rx,
            _unregister: unregister_via(&self.commands, id),
        })
    }

    /// Register for the commit status of `txn_id`. At most one event is
    /// delivered; a second registration for the same id is rejected.
    pub async fn register_tx_status_event(&self, txn_id: &TxnId) -> Result<TxStatusRegistration> {
        let (tx, rx) = oneshot::channel();
        let id = self
            .register(Subscriber::TxStatus {
                txn_id: txn_id.clone(),
                sender: tx,
            })
            .await?;
        Ok(TxStatusRegistration::new(
            txn_id.clone(),
            rx,
            unregister_via(&self.commands, id),
        ))
    }

    /// Register for events of `chaincode_id` whose name matches the
    /// `event_filter` regular expression.
    pub async fn register_chaincode_events(
        &self,
        chaincode_id: &str,
        event_filter: &str,
    ) -> Result<ChaincodeEventRegistration> {
        let filter = Regex::new(event_filter)?;
        let (tx, rx) = mpsc::channel::<CcEvent>(self.buffer_size);
        let id = self
            .register(Subscriber::Chaincode {
                chaincode_id: chaincode_id.to_string(),
                filter,
                sender: tx,
            })
            .await?;
        Ok(ChaincodeEventRegistration::new(
            rx,
            unregister_via(&self.commands, id),
        ))
    }

    /// Stop the dispatcher, close the stream, and drop every registration.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "deliver dispatcher ended abnormally");
            }
        }
    }

    async fn register(&self, subscriber: Subscriber) -> Result<RegistrationId> {
        let id = RegistrationId::new();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(Command::Register {
                id,
                subscriber,
                ack: ack_tx,
            })
            .map_err(|_| EventError::Closed)?;
        ack_rx.await.map_err(|_| EventError::Closed)??;
        Ok(id)
    }
}

impl Drop for DeliverClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for DeliverClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliverClient")
            .field("channel_id", &self.channel_id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("last_block_num", &self.last_block_num())
            .finish()
    }
}

#[async_trait]
impl EventService for DeliverClient {
    async fn register_tx_status(&self, txn_id: &TxnId) -> std::result::Result<TxStatusRegistration, Status> {
        self.register_tx_status_event(txn_id).await.map_err(Status::from)
    }

    async fn register_chaincode_event(
        &self,
        chaincode_id: &str,
        event_filter: &str,
    ) -> std::result::Result<ChaincodeEventRegistration, Status> {
        self.register_chaincode_events(chaincode_id, event_filter)
            .await
            .map_err(Status::from)
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Everything the dispatcher needs besides its command queue.
struct Link {
    channel_id: String,
    peer: Arc<dyn Peer>,
    provider: Arc<dyn ConnectionProvider>,
    config: DeliverConfig,
    seek: Arc<SeekState>,
    registry: Arc<Registry>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl Link {
    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = %prev, to = %next, peer = self.peer.url(), "deliver state change");
        }
    }

    async fn initial_connect(&self) -> Result<Box<dyn Connection>> {
        let attempts = self.config.max_conn_attempts;
        let mut last_err = EventError::Closed;
        for attempt in 1..=attempts {
            match self.establish().await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    warn!(attempt, max_attempts = attempts, peer = self.peer.url(), error = %e, "deliver connect failed");
                    last_err = e;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.time_between_conn_attempts).await;
            }
        }
        self.set_state(ConnectionState::Disconnected);
        Err(last_err)
    }

    /// Connect, then seek. A failure in either step closes the stream.
    async fn establish(&self) -> Result<Box<dyn Connection>> {
        self.set_state(ConnectionState::Connecting);
        let endpoint = event_endpoint(self.peer.as_ref())?;
        let url = endpoint.event_url().to_string();

        let mut connection = match tokio::time::timeout(
            self.config.conn_timeout,
            self.provider.connect(&self.channel_id, endpoint, self.config.kind),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(EventError::Timeout(format!(
                    "timeout connecting to deliver service at {url}"
                )))
            }
        };

        self.set_state(ConnectionState::Seeking);
        let position = self.seek.current();
        let request = DeliverRequest::Seek(SeekInfo::new(self.channel_id.clone(), position));
        debug!(seek = %position, peer = %url, "sending seek request");

        let sent = match tokio::time::timeout(self.config.resp_timeout, connection.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(EventError::Timeout(
                "timeout waiting for deliver status response".into(),
            )),
        };
        if let Err(e) = sent {
            connection.close().await;
            return Err(e);
        }

        info!(seek = %position, peer = %url, "deliver stream established");
        Ok(connection)
    }
}

struct Dispatcher {
    link: Link,
    commands: mpsc::UnboundedReceiver<Command>,
}

/// Why streaming stopped.
enum StreamEnd {
    Cancelled,
    Lost(EventError),
}

/// Run `fut` while serving registration commands. Returns `None` on
/// cancellation.
async fn serve_until<F: Future>(
    commands: &mut mpsc::UnboundedReceiver<Command>,
    link: &Link,
    fut: F,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            biased;
            _ = link.cancel.cancelled() => return None,
            Some(command) = commands.recv() => apply(&link.registry, command),
            out = &mut fut => return Some(out),
        }
    }
}

impl Dispatcher {
    async fn run(mut self, connection: Box<dyn Connection>) {
        let mut connection = Some(connection);
        while let Some(mut current) = connection.take() {
            self.link.set_state(ConnectionState::Streaming);
            let end = self.stream(current.as_mut()).await;
            current.close().await;

            match end {
                StreamEnd::Cancelled => break,
                StreamEnd::Lost(e) => {
                    warn!(peer = self.link.peer.url(), error = %e, "deliver stream lost");
                    connection = self.reconnect().await;
                }
            }
        }

        self.link.registry.clear();
        self.link.set_state(ConnectionState::Disconnected);
        info!(peer = self.link.peer.url(), channel = %self.link.channel_id, "deliver client stopped");
    }

    async fn stream(&mut self, connection: &mut dyn Connection) -> StreamEnd {
        let link = &self.link;
        let url = link.peer.url().to_string();
        loop {
            let response = match serve_until(&mut self.commands, link, connection.receive()).await {
                None => return StreamEnd::Cancelled,
                Some(None) => {
                    return StreamEnd::Lost(EventError::Transport("stream ended".into()))
                }
                Some(Some(Err(e))) => return StreamEnd::Lost(e),
                Some(Some(Ok(response))) => response,
            };

            match response {
                DeliverResponse::Block(block) => {
                    debug!(block = block.number, txs = block.transactions.len(), "block received");
                    link.seek.record_block(block.number);
                    link.registry.dispatch_block(block, &link.channel_id, &url).await;
                }
                DeliverResponse::FilteredBlock(block) => {
                    debug!(block = block.number, txs = block.filtered_transactions.len(), "filtered block received");
                    link.seek.record_block(block.number);
                    link.registry.dispatch_filtered_block(block, &url).await;
                }
                DeliverResponse::Status(code) if code == DELIVER_STATUS_SUCCESS => {
                    debug!(code, "deliver status received");
                }
                DeliverResponse::Status(code) => {
                    return StreamEnd::Lost(EventError::DeliverStatus(code));
                }
            }
        }
    }

    /// Returns the next stream, or `None` when cancelled or out of attempts.
    async fn reconnect(&mut self) -> Option<Box<dyn Connection>> {
        let link = &self.link;
        let max = link.config.max_reconnect_attempts;
        let base = link.config.reconnect_initial_delay.max(MIN_BACKOFF_BASE);
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            if max > 0 && attempt > max {
                error!(attempts = max, peer = link.peer.url(), "giving up reconnecting to deliver service");
                return None;
            }

            link.set_state(ConnectionState::Reconnecting);
            let seek = link.seek.prepare_reconnect();
            let delay = if attempt == 1 {
                link.config.reconnect_initial_delay
            } else {
                jittered_backoff(attempt - 1, base, 2.0, link.config.time_between_conn_attempts)
            };
            info!(attempt, seek = %seek, delay_ms = delay.as_millis() as u64, "reconnecting to deliver service");

            serve_until(&mut self.commands, link, tokio::time::sleep(delay)).await?;
            match serve_until(&mut self.commands, link, link.establish()).await? {
                Ok(connection) => return Some(connection),
                Err(e) => warn!(attempt, error = %e, "reconnect attempt failed"),
            }
        }
    }
}

fn apply(registry: &Registry, command: Command) {
    match command {
        Command::Register {
            id,
            subscriber,
            ack,
        } => {
            let result = registry.register(id, subscriber);
            let _ = ack.send(result);
        }
        Command::Unregister(id) => {
            if registry.unregister(id) {
                debug!(registration = %id, "unregistered");
            }
        }
    }
}
