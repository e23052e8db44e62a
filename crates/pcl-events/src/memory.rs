//! Scripted in-process connection provider.
//!
//! Each call to `connect` consumes the next [`Script`]. Seeks sent on any
//! connection are recorded so tests can assert where every stream started.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use pcl_types::EventEndpoint;

use crate::connection::{
    Connection, ConnectionProvider, DeliverKind, DeliverRequest, DeliverResponse,
};
use crate::error::{EventError, Result};
use crate::seek::SeekInfo;

/// What happens after a replayed stream runs out of responses.
#[derive(Clone, Debug)]
pub enum Ending {
    /// The stream ends cleanly.
    Close,
    /// The stream fails with a transport error.
    Fail(String),
    /// The stream stays open and silent.
    Hold,
}

/// Behavior of one connection.
pub enum Script {
    /// `connect` fails.
    Refuse(String),
    /// `connect` succeeds but the seek send never completes.
    StallSeek,
    /// Yield `responses` in order, then apply `then`.
    Replay {
        responses: Vec<DeliverResponse>,
        then: Ending,
    },
    /// Yield whatever the paired sender pushes; ends when it is dropped.
    Live(mpsc::UnboundedReceiver<Result<DeliverResponse>>),
}

impl Script {
    pub fn replay(responses: Vec<DeliverResponse>, then: Ending) -> Self {
        Self::Replay { responses, then }
    }

    /// A live script and the sender that feeds it.
    pub fn live() -> (Self, mpsc::UnboundedSender<Result<DeliverResponse>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::Live(rx), tx)
    }
}

#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    seeks: Arc<Mutex<Vec<SeekInfo>>>,
    connects: AtomicUsize,
    kinds: Mutex<Vec<DeliverKind>>,
}

impl ScriptedProvider {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Queue another script.
    pub fn push(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    /// Seeks received so far, in order.
    pub fn seeks(&self) -> Vec<SeekInfo> {
        self.seeks.lock().clone()
    }

    /// Number of `connect` calls, successful or not.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Deliver kinds requested, in order.
    pub fn kinds(&self) -> Vec<DeliverKind> {
        self.kinds.lock().clone()
    }
}

#[async_trait]
impl ConnectionProvider for ScriptedProvider {
    async fn connect(
        &self,
        _channel_id: &str,
        endpoint: &dyn EventEndpoint,
        kind: DeliverKind,
    ) -> Result<Box<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.kinds.lock().push(kind);

        let script = self.scripts.lock().pop_front();
        let url = endpoint.event_url().to_string();
        let behavior = match script {
            None => {
                return Err(EventError::ConnectionFailed {
                    url,
                    reason: "no scripted connection left".into(),
                })
            }
            Some(Script::Refuse(reason)) => return Err(EventError::ConnectionFailed { url, reason }),
            Some(Script::StallSeek) => Behavior::StallSeek,
            Some(Script::Replay { responses, then }) => Behavior::Replay {
                responses: responses.into(),
                then,
            },
            Some(Script::Live(rx)) => Behavior::Live(rx),
        };

        Ok(Box::new(ScriptedConnection {
            behavior,
            seeks: self.seeks.clone(),
            closed: false,
        }))
    }
}

enum Behavior {
    StallSeek,
    Replay {
        responses: VecDeque<DeliverResponse>,
        then: Ending,
    },
    Live(mpsc::UnboundedReceiver<Result<DeliverResponse>>),
}

struct ScriptedConnection {
    behavior: Behavior,
    seeks: Arc<Mutex<Vec<SeekInfo>>>,
    closed: bool,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn send(&mut self, request: DeliverRequest) -> Result<()> {
        if matches!(self.behavior, Behavior::StallSeek) {
            std::future::pending::<()>().await;
        }
        let DeliverRequest::Seek(info) = request;
        self.seeks.lock().push(info);
        Ok(())
    }

    async fn receive(&mut self) -> Option<Result<DeliverResponse>> {
        if self.closed {
            return None;
        }
        match &mut self.behavior {
            Behavior::StallSeek => None,
            Behavior::Replay { responses, then } => match responses.pop_front() {
                Some(response) => Some(Ok(response)),
                None => match then {
                    Ending::Close => None,
                    Ending::Fail(reason) => {
                        let reason = reason.clone();
                        *then = Ending::Close;
                        Some(Err(EventError::Transport(reason)))
                    }
                    Ending::Hold => std::future::pending().await,
                },
            },
            Behavior::Live(rx) => rx.recv().await,
        }
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
