//! Fragment history.
//!
//! A [`History`] owns the link between the host's URL and the registered
//! routes. It is created once per navigation surface and passed by handle to
//! every [`Router`](crate::Router).
//!
//! ## Lifecycle
//!
//! ```text
//! ┌───────────────┐  start()  ┌───────────┐  stop()  ┌───────────┐
//! │ uninitialized │──────────▶│  started  │─────────▶│  stopped  │
//! └───────────────┘           └───────────┘          └───────────┘
//!                                   ▲      start()         │
//!                                   └──────────────────────┘
//! ```
//!
//! `start` picks a [`WatchStrategy`] and installs exactly one watcher;
//! `stop` removes it. Starting twice without stopping is an error.

use crate::config::HistoryConfig;
use crate::pattern::RoutePattern;
use crate::platform::{ListenerId, NavEvent, Platform};
use crate::router::RouterId;
use crate::strategy::{select_strategy, WatchStrategy};
use ripple_core::{EventHub, Events};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

/// History errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// `start` was called on a started history.
    #[error("History has already been started")]
    AlreadyStarted,
}

/// Payload of `"route"` events, on the history and on routers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEvent {
    /// The router whose route matched, if a router registered it.
    pub router: Option<RouterId>,
    /// Route name.
    pub name: String,
    /// Captured arguments.
    pub args: Vec<String>,
}

/// Invoked with the matched fragment.
pub type RouteHandler = Rc<dyn Fn(&History, &str)>;

/// Options for [`History::navigate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NavigateOptions {
    /// Run the matching route after updating the URL.
    pub trigger: bool,
    /// Replace the current history entry instead of adding one.
    pub replace: bool,
}

impl NavigateOptions {
    /// Options that run the matching route.
    #[must_use]
    pub fn trigger() -> Self {
        Self {
            trigger: true,
            replace: false,
        }
    }

    /// Replace the current entry.
    #[must_use]
    pub fn with_replace(mut self) -> Self {
        self.replace = true;
        self
    }
}

impl From<bool> for NavigateOptions {
    fn from(trigger: bool) -> Self {
        Self {
            trigger,
            replace: false,
        }
    }
}

#[derive(Clone)]
struct Route {
    pattern: RoutePattern,
    handler: RouteHandler,
}

#[derive(Default)]
struct HistoryState {
    started: bool,
    config: HistoryConfig,
    strategy: Option<WatchStrategy>,
    fragment: Option<String>,
    wants_hash_change: bool,
    wants_push_state: bool,
    has_push_state: bool,
    listener: Option<ListenerId>,
    generation: u64,
}

struct HistoryInner {
    platform: Rc<dyn Platform>,
    hub: EventHub<RouteEvent>,
    routes: RefCell<Vec<Route>>,
    state: RefCell<HistoryState>,
}

/// Shared handle to the navigation history of one platform.
#[derive(Clone)]
pub struct History {
    inner: Rc<HistoryInner>,
}

/// Strip one leading `#` or `/`.
fn strip_marker(fragment: &str) -> &str {
    fragment
        .strip_prefix('#')
        .or_else(|| fragment.strip_prefix('/'))
        .unwrap_or(fragment)
}

impl History {
    /// Create an unstarted history over `platform`.
    #[must_use]
    pub fn new(platform: Rc<dyn Platform>) -> Self {
        Self {
            inner: Rc::new(HistoryInner {
                platform,
                hub: EventHub::new(),
                routes: RefCell::new(Vec::new()),
                state: RefCell::new(HistoryState::default()),
            }),
        }
    }

    fn state(&self) -> Ref<'_, HistoryState> {
        self.inner.state.borrow()
    }

    fn state_mut(&self) -> RefMut<'_, HistoryState> {
        self.inner.state.borrow_mut()
    }

    /// The platform this history drives.
    #[must_use]
    pub fn platform(&self) -> &Rc<dyn Platform> {
        &self.inner.platform
    }

    /// Whether `start` has run without a matching `stop`.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state().started
    }

    /// The watcher installed by the last `start`, while started.
    #[must_use]
    pub fn strategy(&self) -> Option<WatchStrategy> {
        self.state().strategy
    }

    /// Last known fragment.
    #[must_use]
    pub fn fragment(&self) -> Option<String> {
        self.state().fragment.clone()
    }

    /// Configuration of the current (or last) start.
    #[must_use]
    pub fn config(&self) -> HistoryConfig {
        self.state().config.clone()
    }

    /// Number of registered routes.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.inner.routes.borrow().len()
    }

    /// Whether two handles point at the same history.
    #[must_use]
    pub fn ptr_eq(&self, other: &History) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The hash of the current location.
    #[must_use]
    pub fn hash(&self) -> String {
        self.inner.platform.location().hash
    }

    /// Normalised fragment of `fragment`, or of the current location.
    ///
    /// Without an override the fragment comes from the path and query when
    /// push state is in use, otherwise from the hash. The root prefix and
    /// one leading `#` or `/` are removed.
    #[must_use]
    pub fn get_fragment(&self, fragment: Option<&str>) -> String {
        self.fragment_from(fragment, false)
    }

    fn fragment_from(&self, fragment: Option<&str>, force_push_state: bool) -> String {
        let (has_push_state, root) = {
            let state = self.state();
            (state.has_push_state, state.config.root.clone())
        };
        let raw = match fragment {
            Some(fragment) => fragment.to_string(),
            None if has_push_state || force_push_state => {
                let location = self.inner.platform.location();
                format!("{}{}", location.path, location.search)
            }
            None => self.hash(),
        };
        let relative = raw.strip_prefix(root.as_str()).unwrap_or(&raw);
        strip_marker(relative).to_string()
    }

    /// Start watching the URL.
    ///
    /// Returns whether the current URL matched a route (always `false` for a
    /// silent start). A push-state URL opened without push-state support is
    /// rewritten to `root#fragment` and `true` is returned without loading,
    /// as the host reloads at the new URL.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::AlreadyStarted`] if the history is started.
    pub fn start(&self, config: HistoryConfig) -> Result<bool, HistoryError> {
        if self.is_started() {
            return Err(HistoryError::AlreadyStarted);
        }

        let platform = Rc::clone(&self.inner.platform);
        let strategy = select_strategy(&config, platform.as_ref());
        let silent = config.silent;
        let root = config.root.clone();
        {
            let mut state = self.state_mut();
            state.started = true;
            state.wants_hash_change = config.hash_change;
            state.wants_push_state = config.push_state;
            state.has_push_state = config.push_state && platform.supports_push_state();
            state.strategy = Some(strategy);
            state.generation += 1;
            state.config = config;
        }

        if let Some(event) = strategy.event() {
            let id = platform.listen(event, self.watcher());
            self.state_mut().listener = Some(id);
        }
        info!(strategy = %strategy, root = %root, "History started");

        let fragment = self.get_fragment(None);
        self.state_mut().fragment = Some(fragment);

        let location = platform.location();
        let at_root = location.path == root;
        let (wants_hash_change, wants_push_state, has_push_state) = {
            let state = self.state();
            (state.wants_hash_change, state.wants_push_state, state.has_push_state)
        };

        if wants_hash_change && wants_push_state && !has_push_state && !at_root {
            let fragment = self.fragment_from(None, true);
            debug!(fragment = %fragment, "Rewriting push-state URL as hash URL");
            platform.load(&format!("{root}#{fragment}"), true);
            self.state_mut().fragment = Some(fragment);
            return Ok(true);
        } else if wants_push_state && has_push_state && at_root && !location.hash.is_empty() {
            let fragment = strip_marker(&location.hash).to_string();
            debug!(fragment = %fragment, "Rewriting hash URL as push-state URL");
            platform.replace_state(&format!("{root}{fragment}"));
            self.state_mut().fragment = Some(fragment);
        }

        if silent {
            return Ok(false);
        }
        Ok(self.load_url(None))
    }

    fn watcher(&self) -> Rc<dyn Fn(NavEvent)> {
        let weak = Rc::downgrade(&self.inner);
        Rc::new(move |_event| {
            if let Some(inner) = weak.upgrade() {
                History { inner }.check_url();
            }
        })
    }

    /// Remove the installed watcher. Polling loops end at their next tick.
    pub fn stop(&self) {
        let listener = {
            let mut state = self.state_mut();
            if !state.started {
                return;
            }
            state.started = false;
            state.strategy = None;
            state.generation += 1;
            state.listener.take()
        };
        if let Some(id) = listener {
            self.inner.platform.unlisten(id);
        }
        info!("History stopped");
    }

    /// Register a route. Routes registered later are tested first.
    pub fn route(&self, pattern: RoutePattern, handler: RouteHandler) {
        trace!(pattern = %pattern, "Route registered");
        self.inner
            .routes
            .borrow_mut()
            .insert(0, Route { pattern, handler });
    }

    /// Load the URL if its fragment changed since the last look.
    ///
    /// Returns whether a route matched. When the fragment is unchanged
    /// nothing runs and `false` is returned.
    pub fn check_url(&self) -> bool {
        let current = self.get_fragment(None);
        if self.state().fragment.as_deref() == Some(current.as_str()) {
            return false;
        }
        trace!(fragment = %current, "URL changed");
        self.load_url(None) || self.load_url(Some(&self.hash()))
    }

    /// Record the fragment and run the first matching route.
    ///
    /// Returns whether a route matched.
    pub fn load_url(&self, fragment: Option<&str>) -> bool {
        let fragment = self.get_fragment(fragment);
        self.state_mut().fragment = Some(fragment.clone());

        let routes = self.inner.routes.borrow().clone();
        match routes.iter().find(|route| route.pattern.is_match(&fragment)) {
            Some(route) => {
                debug!(fragment = %fragment, pattern = %route.pattern, "Route matched");
                (route.handler)(self, &fragment);
                true
            }
            None => false,
        }
    }

    /// Move to `fragment`.
    ///
    /// Uses push state when available, otherwise the hash, otherwise a full
    /// navigation to `root + fragment`. With `trigger` the matching route
    /// runs afterwards. Returns `false`, doing nothing, when the history is
    /// not started or the fragment is already current.
    pub fn navigate(&self, fragment: &str, options: impl Into<NavigateOptions>) -> bool {
        let options = options.into();
        let (started, has_push_state, wants_hash_change, root, current) = {
            let state = self.state();
            (
                state.started,
                state.has_push_state,
                state.wants_hash_change,
                state.config.root.clone(),
                state.fragment.clone(),
            )
        };
        if !started {
            return false;
        }

        let fragment = strip_marker(fragment).to_string();
        if current.as_deref() == Some(fragment.as_str()) {
            return false;
        }

        let platform = &self.inner.platform;
        self.state_mut().fragment = Some(fragment.clone());
        if has_push_state {
            let url = format!("{root}{fragment}");
            if options.replace {
                platform.replace_state(&url);
            } else {
                platform.push_state(&url);
            }
        } else if wants_hash_change {
            platform.set_hash(&fragment, options.replace);
        } else {
            platform.load(&format!("{root}{fragment}"), options.replace);
        }
        debug!(fragment = %fragment, replace = options.replace, "Navigated");

        if options.trigger {
            self.load_url(Some(&fragment));
        }
        true
    }

    /// Poll the URL every `interval_ms` until the history is stopped.
    ///
    /// Returns immediately unless the history is started with the
    /// [`WatchStrategy::Polling`] strategy.
    pub async fn run_polling(&self) {
        let (generation, period) = {
            let state = self.state();
            if !state.started || state.strategy != Some(WatchStrategy::Polling) {
                return;
            }
            (state.generation, state.config.interval())
        };

        debug!(interval_ms = period.as_millis() as u64, "Polling for URL changes");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if self.state().generation != generation {
                break;
            }
            self.check_url();
        }
        debug!("Polling ended");
    }
}

impl Events<RouteEvent> for History {
    fn events(&self) -> &EventHub<RouteEvent> {
        &self.inner.hub
    }
}

impl fmt::Debug for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("History")
            .field("started", &state.started)
            .field("strategy", &state.strategy)
            .field("fragment", &state.fragment)
            .field("routes", &self.route_count())
            .finish()
    }
}
