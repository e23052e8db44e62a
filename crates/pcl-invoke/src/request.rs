use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use pcl_types::{Code, Peer, TransactionHeader, TransactionProposal, TxValidationCode};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Description of one chaincode invocation. Immutable once built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Request {
    pub chaincode_id: String,
    pub fcn: String,
    pub args: Vec<Vec<u8>>,
    pub transient_map: BTreeMap<String, Vec<u8>>,
}

impl Request {
    pub fn new(chaincode_id: impl Into<String>, fcn: impl Into<String>) -> Self {
        Self {
            chaincode_id: chaincode_id.into(),
            fcn: fcn.into(),
            args: Vec::new(),
            transient_map: BTreeMap::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<Vec<u8>>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add a transient (private, not recorded on the ledger) value.
    pub fn transient(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.transient_map.insert(key.into(), value.into());
        self
    }

    /// Build the proposal sent to endorsers.
    pub fn to_proposal(&self, header: TransactionHeader) -> TransactionProposal {
        TransactionProposal {
            header,
            chaincode_id: self.chaincode_id.clone(),
            fcn: self.fcn.clone(),
            args: self.args.clone(),
            transient_map: self.transient_map.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

/// Operation a timeout applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeoutKind {
    /// Waiting for the commit notification of an executed transaction.
    Execute,
    /// A whole query invocation.
    Query,
    /// Establishing a status registration with the event service.
    EventReg,
    /// One endorser answering a proposal.
    PeerResponse,
    /// The ordering service accepting a transaction.
    OrdererResponse,
}

impl TimeoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Query => "query",
            Self::EventReg => "event_reg",
            Self::PeerResponse => "peer_response",
            Self::OrdererResponse => "orderer_response",
        }
    }
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeoutKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "execute" => Ok(Self::Execute),
            "query" => Ok(Self::Query),
            "event_reg" => Ok(Self::EventReg),
            "peer_response" => Ok(Self::PeerResponse),
            "orderer_response" => Ok(Self::OrdererResponse),
            other => Err(format!("unknown timeout kind '{other}'")),
        }
    }
}

/// Mapping from operation kind to timeout duration.
///
/// Serialized as a table keyed by the snake_case kind name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, Duration>",
    into = "BTreeMap<String, Duration>"
)]
pub struct Timeouts(BTreeMap<TimeoutKind, Duration>);

impl Timeouts {
    /// Timeouts used when the caller configures nothing.
    pub fn standard() -> Self {
        Self::default()
            .with(TimeoutKind::Execute, Duration::from_secs(180))
            .with(TimeoutKind::Query, Duration::from_secs(180))
            .with(TimeoutKind::EventReg, Duration::from_secs(15))
            .with(TimeoutKind::PeerResponse, Duration::from_secs(10))
            .with(TimeoutKind::OrdererResponse, Duration::from_secs(15))
    }

    pub fn with(mut self, kind: TimeoutKind, timeout: Duration) -> Self {
        self.0.insert(kind, timeout);
        self
    }

    pub fn set(&mut self, kind: TimeoutKind, timeout: Duration) {
        self.0.insert(kind, timeout);
    }

    pub fn get(&self, kind: TimeoutKind) -> Option<Duration> {
        self.0.get(&kind).copied()
    }

    /// Entries of `other` override entries of `self`.
    pub fn merged_with(&self, other: &Timeouts) -> Timeouts {
        let mut merged = self.clone();
        merged.0.extend(other.0.iter().map(|(k, v)| (*k, *v)));
        merged
    }

    pub fn iter(&self) -> impl Iterator<Item = (TimeoutKind, Duration)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }
}

impl TryFrom<BTreeMap<String, Duration>> for Timeouts {
    type Error = String;

    fn try_from(raw: BTreeMap<String, Duration>) -> Result<Self, Self::Error> {
        let mut timeouts = BTreeMap::new();
        for (key, value) in raw {
            timeouts.insert(key.parse::<TimeoutKind>()?, value);
        }
        Ok(Self(timeouts))
    }
}

impl From<Timeouts> for BTreeMap<String, Duration> {
    fn from(timeouts: Timeouts) -> Self {
        timeouts
            .0
            .into_iter()
            .map(|(k, v)| (k.as_str().to_string(), v))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Retry policy applied around a whole invocation.
///
/// The pipeline itself never retries; the channel client reads this policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOpts {
    /// Additional attempts after the first. Zero disables retries.
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_factor: f64,
    /// Status codes that make an invocation eligible for another attempt.
    pub retryable_codes: Vec<Code>,
}

impl Default for RetryOpts {
    fn default() -> Self {
        Self {
            attempts: 0,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            backoff_factor: 2.0,
            retryable_codes: Self::default_retryable_codes(),
        }
    }
}

impl RetryOpts {
    pub fn default_retryable_codes() -> Vec<Code> {
        vec![
            Code::ConnectionFailed,
            Code::InvalidTransaction(TxValidationCode::MvccReadConflict),
            Code::InvalidTransaction(TxValidationCode::PhantomReadConflict),
        ]
    }

    /// Retry up to `attempts` more times with the default backoff.
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            attempts,
            ..Self::default()
        }
    }

    pub fn is_retryable(&self, code: &Code) -> bool {
        self.retryable_codes.contains(code)
    }
}

// ---------------------------------------------------------------------------
// Opts
// ---------------------------------------------------------------------------

/// Accept-predicate over candidate peers.
pub trait TargetFilter: Send + Sync {
    fn accept(&self, peer: &dyn Peer) -> bool;
}

impl<F> TargetFilter for F
where
    F: Fn(&dyn Peer) -> bool + Send + Sync,
{
    fn accept(&self, peer: &dyn Peer) -> bool {
        self(peer)
    }
}

/// Per-invocation options.
///
/// `targets` is the one field the pipeline writes: the target-resolution step
/// stores the resolved peers there.
#[derive(Clone, Default)]
pub struct Opts {
    pub targets: Vec<Arc<dyn Peer>>,
    pub target_filter: Option<Arc<dyn TargetFilter>>,
    pub timeouts: Timeouts,
    pub retry: RetryOpts,
}

impl Opts {
    /// Send the proposal to exactly these peers, bypassing discovery.
    pub fn with_targets(mut self, targets: Vec<Arc<dyn Peer>>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_target_filter(mut self, filter: impl TargetFilter + 'static) -> Self {
        self.target_filter = Some(Arc::new(filter));
        self
    }

    pub fn with_timeout(mut self, kind: TimeoutKind, timeout: Duration) -> Self {
        self.timeouts.set(kind, timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryOpts) -> Self {
        self.retry = retry;
        self
    }

    /// URLs of the current targets, in order.
    pub fn target_urls(&self) -> Vec<&str> {
        self.targets.iter().map(|peer| peer.url()).collect()
    }
}

impl fmt::Debug for Opts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Opts")
            .field("targets", &self.target_urls())
            .field("target_filter", &self.target_filter.is_some())
            .field("timeouts", &self.timeouts)
            .field("retry", &self.retry)
            .finish()
    }
}
