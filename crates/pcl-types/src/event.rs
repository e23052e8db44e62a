use std::fmt;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::block::{CcEvent, TxStatusEvent};
use crate::status::Status;
use crate::txn::TxnId;

/// Removes a registration from the service that created it.
pub struct Unregister(Option<Box<dyn FnOnce() + Send + Sync>>);

impl Unregister {
    pub fn new(f: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    /// An unregister action that does nothing.
    pub fn noop() -> Self {
        Self(None)
    }

    fn run(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl fmt::Debug for Unregister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Unregister").field(&self.0.is_some()).finish()
    }
}

/// Interest in the commit outcome of one transaction.
///
/// At most one event is ever delivered. Dropping the registration
/// unregisters it, so a caller that stops waiting leaves no entry behind.
#[derive(Debug)]
pub struct TxStatusRegistration {
    txn_id: TxnId,
    events: oneshot::Receiver<TxStatusEvent>,
    unregister: Unregister,
}

impl TxStatusRegistration {
    pub fn new(
        txn_id: TxnId,
        events: oneshot::Receiver<TxStatusEvent>,
        unregister: Unregister,
    ) -> Self {
        Self {
            txn_id,
            events,
            unregister,
        }
    }

    pub fn txn_id(&self) -> &TxnId {
        &self.txn_id
    }

    /// Wait for the status event. Returns `None` if the service dropped the
    /// registration without delivering one.
    ///
    /// Cancel-safe: the event is not lost if this future is dropped.
    pub async fn recv(&mut self) -> Option<TxStatusEvent> {
        (&mut self.events).await.ok()
    }
}

impl Drop for TxStatusRegistration {
    fn drop(&mut self) {
        self.unregister.run();
    }
}

/// Interest in chaincode events matching a name filter.
#[derive(Debug)]
pub struct ChaincodeEventRegistration {
    events: mpsc::Receiver<CcEvent>,
    unregister: Unregister,
}

impl ChaincodeEventRegistration {
    pub fn new(events: mpsc::Receiver<CcEvent>, unregister: Unregister) -> Self {
        Self { events, unregister }
    }

    pub async fn recv(&mut self) -> Option<CcEvent> {
        self.events.recv().await
    }
}

impl Drop for ChaincodeEventRegistration {
    fn drop(&mut self) {
        self.unregister.run();
    }
}

/// Source of commit notifications consumed by the pipeline.
#[async_trait]
pub trait EventService: Send + Sync {
    /// Register for the status of `txn_id`.
    ///
    /// Returns only once the registration is in place, so any status event
    /// that becomes observable afterwards is delivered.
    async fn register_tx_status(&self, txn_id: &TxnId) -> Result<TxStatusRegistration, Status>;

    /// Register for chaincode events whose name matches the `event_filter`
    /// regular expression.
    async fn register_chaincode_event(
        &self,
        chaincode_id: &str,
        event_filter: &str,
    ) -> Result<ChaincodeEventRegistration, Status>;
}
