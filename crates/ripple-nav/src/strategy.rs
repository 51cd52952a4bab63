//! Fragment-change detection ladder.
//!
//! History watches the URL with the best mechanism available, in priority
//! order: native navigation API, hash-change notifications, fixed-interval
//! polling. Polling is the universal fallback, used whenever hash changes
//! are allowed but not delivered.

use crate::config::HistoryConfig;
use crate::platform::{NavEvent, Platform};
use std::fmt;

/// How a started history notices URL changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchStrategy {
    /// Listen for pop-state notifications.
    PushState,
    /// Listen for hash-change notifications.
    HashChange,
    /// Compare the URL on a timer.
    Polling,
    /// Watch nothing: hash changes refused and push state unavailable.
    Inert,
}

impl WatchStrategy {
    /// Strategy name, used in diagnostics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PushState => "push_state",
            Self::HashChange => "hash_change",
            Self::Polling => "polling",
            Self::Inert => "inert",
        }
    }

    /// The platform notification this strategy subscribes to, if any.
    #[must_use]
    pub fn event(self) -> Option<NavEvent> {
        match self {
            Self::PushState => Some(NavEvent::PopState),
            Self::HashChange => Some(NavEvent::HashChange),
            Self::Polling | Self::Inert => None,
        }
    }
}

impl fmt::Display for WatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the strategy for `config` on `platform`.
#[must_use]
pub fn select_strategy(config: &HistoryConfig, platform: &dyn Platform) -> WatchStrategy {
    if config.push_state && platform.supports_push_state() {
        WatchStrategy::PushState
    } else if config.hash_change && platform.supports_hash_change() {
        WatchStrategy::HashChange
    } else if config.hash_change {
        WatchStrategy::Polling
    } else {
        WatchStrategy::Inert
    }
}
