//! Routers: named routes bound to a shared [`History`].
//!
//! A router compiles route strings, registers them with the history it was
//! built on, and on a match runs the route's action with the captured
//! arguments. It then emits `"route:<name>"` on itself and `"route"` on the
//! history, so one listener on the history can observe every router.

use crate::history::{History, NavigateOptions, RouteEvent};
use crate::pattern::{RouteError, RoutePattern};
use ripple_core::{EventHub, Events};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

static ROUTER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique router identity, carried by route events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouterId(u64);

impl RouterId {
    /// Generate the next identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(ROUTER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "router_{}", self.0)
    }
}

/// A route action, called with the captured arguments.
pub type RouteAction = Rc<dyn Fn(&[String])>;

struct RouterInner {
    id: RouterId,
    hub: EventHub<RouteEvent>,
    actions: RefCell<HashMap<String, RouteAction>>,
}

impl RouterInner {
    fn action(&self, name: &str) -> Option<RouteAction> {
        self.actions.borrow().get(name).cloned()
    }
}

/// Maps fragments to named actions.
#[derive(Clone)]
pub struct Router {
    inner: Rc<RouterInner>,
    history: History,
}

impl Router {
    /// Create a router with no routes on `history`.
    #[must_use]
    pub fn new(history: &History) -> Self {
        Self {
            inner: Rc::new(RouterInner {
                id: RouterId::generate(),
                hub: EventHub::new(),
                actions: RefCell::new(HashMap::new()),
            }),
            history: history.clone(),
        }
    }

    /// Create a router and bind a declaration-ordered route table.
    ///
    /// # Errors
    ///
    /// See [`Router::bind_routes`].
    pub fn with_routes(history: &History, table: &[(&str, &str)]) -> Result<Self, RouteError> {
        let router = Self::new(history);
        router.bind_routes(table)?;
        Ok(router)
    }

    /// This router's identity.
    #[must_use]
    pub fn id(&self) -> RouterId {
        self.inner.id
    }

    /// The history this router registers with.
    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Define the action run for routes named `name` that were registered
    /// without a handler.
    pub fn define<F>(&self, name: impl Into<String>, action: F) -> &Self
    where
        F: Fn(&[String]) + 'static,
    {
        self.inner
            .actions
            .borrow_mut()
            .insert(name.into(), Rc::new(action));
        self
    }

    /// Compile `route` and register it under `name`.
    ///
    /// Without a `handler` the action defined for `name` runs, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidPattern`] if the route cannot compile.
    pub fn route(
        &self,
        route: &str,
        name: &str,
        handler: Option<RouteAction>,
    ) -> Result<&Self, RouteError> {
        let pattern = RoutePattern::compile(route)?;
        Ok(self.route_pattern(pattern, name, handler))
    }

    /// Register an already compiled pattern under `name`.
    pub fn route_pattern(
        &self,
        pattern: RoutePattern,
        name: &str,
        handler: Option<RouteAction>,
    ) -> &Self {
        debug!(router = %self.inner.id, route = %pattern, name = %name, "Binding route");

        let inner = Rc::clone(&self.inner);
        let matcher = pattern.clone();
        let name = name.to_string();
        self.history.route(
            pattern,
            Rc::new(move |history: &History, fragment: &str| {
                let args = matcher.extract(fragment).unwrap_or_default();
                if let Some(action) = handler.clone().or_else(|| inner.action(&name)) {
                    action(&args);
                }
                let event = RouteEvent {
                    router: Some(inner.id),
                    name: name.clone(),
                    args,
                };
                inner.hub.trigger(&format!("route:{name}"), &event);
                history.trigger("route", &event);
            }),
        );
        self
    }

    /// Bind a `(route, name)` table declared most specific first.
    ///
    /// The table is registered in reverse, so the first declared route is
    /// tested first and general routes can be declared at the bottom.
    ///
    /// # Errors
    ///
    /// Returns the first route that fails to compile; nothing is registered
    /// then.
    pub fn bind_routes(&self, table: &[(&str, &str)]) -> Result<(), RouteError> {
        let compiled = table
            .iter()
            .map(|(route, name)| RoutePattern::compile(route).map(|p| (p, *name)))
            .collect::<Result<Vec<_>, _>>()?;
        for (pattern, name) in compiled.into_iter().rev() {
            self.route_pattern(pattern, name, None);
        }
        Ok(())
    }

    /// Navigate the shared history. See [`History::navigate`].
    pub fn navigate(&self, fragment: &str, options: impl Into<NavigateOptions>) -> bool {
        self.history.navigate(fragment, options)
    }
}

impl Events<RouteEvent> for Router {
    fn events(&self) -> &EventHub<RouteEvent> {
        &self.inner.hub
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut actions: Vec<String> = self.inner.actions.borrow().keys().cloned().collect();
        actions.sort();
        f.debug_struct("Router")
            .field("id", &self.inner.id)
            .field("actions", &actions)
            .finish()
    }
}
