use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Last-block value meaning "no block received yet".
pub const LAST_BLOCK_SENTINEL: u64 = u64::MAX;

/// Where a delivery stream starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeekPosition {
    Oldest,
    #[default]
    Newest,
    FromBlock(u64),
}

impl fmt::Display for SeekPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oldest => write!(f, "oldest"),
            Self::Newest => write!(f, "newest"),
            Self::FromBlock(n) => write!(f, "from block {n}"),
        }
    }
}

/// Seek request sent on a freshly opened stream. The stream never stops on
/// its own and blocks until new blocks are ready.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekInfo {
    pub channel_id: String,
    pub start: SeekPosition,
    pub stop: u64,
}

impl SeekInfo {
    pub fn new(channel_id: impl Into<String>, start: SeekPosition) -> Self {
        Self {
            channel_id: channel_id.into(),
            start,
            stop: u64::MAX,
        }
    }
}

struct SeekInner {
    seek: SeekPosition,
    last_block_num: u64,
}

/// Seek position and last received block number, guarded together so the
/// reconnect computation sees a consistent pair.
pub struct SeekState {
    inner: Mutex<SeekInner>,
}

impl SeekState {
    pub fn new(initial: SeekPosition) -> Self {
        Self {
            inner: Mutex::new(SeekInner {
                seek: initial,
                last_block_num: LAST_BLOCK_SENTINEL,
            }),
        }
    }

    /// Position the next seek will request.
    pub fn current(&self) -> SeekPosition {
        self.inner.lock().seek
    }

    /// Highest block number seen, if any.
    pub fn last_block_num(&self) -> Option<u64> {
        match self.inner.lock().last_block_num {
            LAST_BLOCK_SENTINEL => None,
            n => Some(n),
        }
    }

    /// Record a received block. The stored number never decreases.
    pub fn record_block(&self, number: u64) {
        let mut inner = self.inner.lock();
        if inner.last_block_num == LAST_BLOCK_SENTINEL || number > inner.last_block_num {
            inner.last_block_num = number;
        }
    }

    /// Recompute the seek position before reconnecting: resume after the
    /// last received block, or ask for the newest block if none arrived.
    pub fn prepare_reconnect(&self) -> SeekPosition {
        let mut inner = self.inner.lock();
        inner.seek = match inner.last_block_num {
            LAST_BLOCK_SENTINEL => SeekPosition::Newest,
            last => SeekPosition::FromBlock(last.saturating_add(1)),
        };
        inner.seek
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn reconnect_resumes_after_last_block() {
        let state = SeekState::new(SeekPosition::Newest);
        state.record_block(40);
        state.record_block(41);
        assert_eq!(state.prepare_reconnect(), SeekPosition::FromBlock(42));
        assert_eq!(state.current(), SeekPosition::FromBlock(42));
    }

    #[test]
    fn reconnect_without_blocks_seeks_newest() {
        let state = SeekState::new(SeekPosition::FromBlock(10));
        assert_eq!(state.current(), SeekPosition::FromBlock(10));
        assert_eq!(state.prepare_reconnect(), SeekPosition::Newest);
        assert_eq!(state.last_block_num(), None);
    }

    #[test]
    fn block_zero_is_recorded() {
        let state = SeekState::new(SeekPosition::Oldest);
        state.record_block(0);
        assert_eq!(state.last_block_num(), Some(0));
        assert_eq!(state.prepare_reconnect(), SeekPosition::FromBlock(1));
    }

    #[test]
    fn seek_position_toml_forms() {
        #[derive(Deserialize)]
        struct Wrapper {
            seek: SeekPosition,
        }
        let newest: Wrapper = toml::from_str(r#"seek = "newest""#).unwrap();
        assert_eq!(newest.seek, SeekPosition::Newest);
        let from: Wrapper = toml::from_str("seek = { from_block = 7 }").unwrap();
        assert_eq!(from.seek, SeekPosition::FromBlock(7));
    }

    proptest! {
        #[test]
        fn last_block_is_monotonic(blocks in proptest::collection::vec(0u64..1_000, 1..50)) {
            let state = SeekState::new(SeekPosition::Newest);
            let mut high = None::<u64>;
            for block in blocks {
                state.record_block(block);
                high = Some(high.map_or(block, |h| h.max(block)));
                prop_assert_eq!(state.last_block_num(), high);
            }
        }
    }
}
