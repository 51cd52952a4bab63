//! Publish/subscribe hub shared by records, record sets, routers and history.
//!
//! Listeners are bound per event name, plus the reserved [`ALL`] bucket that
//! hears every emission. An emission walks a snapshot of the buckets taken
//! when it starts: listeners bound mid-emission wait for the next emission,
//! listeners unbound mid-emission are skipped if they have not run yet.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The wildcard event name. Its listeners receive every emitted event.
pub const ALL: &str = "all";

/// A bound listener. The first argument is the name of the emitted event.
pub type Callback<A> = Rc<dyn Fn(&str, &A)>;

static CONTEXT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque owner token attached to bindings, used to unbind selectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// Generate a process-unique context.
    #[must_use]
    pub fn generate() -> Self {
        Self(CONTEXT_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx_{}", self.0)
    }
}

struct Listener<A> {
    callback: Callback<A>,
    context: Option<ContextId>,
    live: Cell<bool>,
}

fn same_callback<A>(a: &Callback<A>, b: &Callback<A>) -> bool {
    Rc::as_ptr(a).cast::<()>() == Rc::as_ptr(b).cast::<()>()
}

/// Named-event listener registry.
pub struct EventHub<A> {
    buckets: RefCell<HashMap<String, Vec<Rc<Listener<A>>>>>,
}

impl<A> EventHub<A> {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: RefCell::new(HashMap::new()),
        }
    }

    /// Bind `callback` to each whitespace-separated name in `names`.
    pub fn on(&self, names: &str, callback: Callback<A>, context: Option<ContextId>) -> &Self {
        let mut buckets = self.buckets.borrow_mut();
        for name in names.split_whitespace() {
            buckets
                .entry(name.to_string())
                .or_default()
                .push(Rc::new(Listener {
                    callback: Rc::clone(&callback),
                    context,
                    live: Cell::new(true),
                }));
        }
        self
    }

    /// Remove bindings.
    ///
    /// With no arguments every binding goes. With only `names`, every binding
    /// for those names goes. A `callback` and/or `context` narrows removal to
    /// the bindings that match all of the filters given.
    pub fn off(
        &self,
        names: Option<&str>,
        callback: Option<&Callback<A>>,
        context: Option<ContextId>,
    ) -> &Self {
        let mut buckets = self.buckets.borrow_mut();

        if names.is_none() && callback.is_none() && context.is_none() {
            for listener in buckets.values().flatten() {
                listener.live.set(false);
            }
            buckets.clear();
            return self;
        }

        let names: Vec<String> = match names {
            Some(names) => names.split_whitespace().map(str::to_owned).collect(),
            None => buckets.keys().cloned().collect(),
        };

        for name in names {
            let Some(list) = buckets.get_mut(&name) else {
                continue;
            };
            list.retain(|listener| {
                let keep = callback.is_some_and(|cb| !same_callback(cb, &listener.callback))
                    || context.is_some_and(|ctx| listener.context != Some(ctx));
                if !keep {
                    listener.live.set(false);
                }
                keep
            });
            if list.is_empty() {
                buckets.remove(&name);
            }
        }

        self
    }

    /// Emit each whitespace-separated name in `names`.
    ///
    /// Listeners for the name run first, in binding order, then the
    /// [`ALL`] listeners.
    pub fn trigger(&self, names: &str, payload: &A) -> &Self {
        for name in names.split_whitespace() {
            let (direct, wildcard) = {
                let buckets = self.buckets.borrow();
                (
                    buckets.get(name).cloned().unwrap_or_default(),
                    buckets.get(ALL).cloned().unwrap_or_default(),
                )
            };
            for listener in direct.iter().chain(wildcard.iter()) {
                if listener.live.get() {
                    (listener.callback)(name, payload);
                }
            }
        }
        self
    }

    /// Number of live bindings for `name`.
    #[must_use]
    pub fn listener_count(&self, name: &str) -> usize {
        self.buckets.borrow().get(name).map_or(0, Vec::len)
    }

    /// Whether any binding exists at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.borrow().is_empty()
    }
}

impl<A> Default for EventHub<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for EventHub<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buckets = self.buckets.borrow();
        let mut names: Vec<(&String, usize)> = buckets.iter().map(|(k, v)| (k, v.len())).collect();
        names.sort();
        f.debug_struct("EventHub").field("listeners", &names).finish()
    }
}

/// Capability shared by every type that owns an [`EventHub`].
pub trait Events<A: 'static> {
    /// The hub backing this object.
    fn events(&self) -> &EventHub<A>;

    /// Bind a listener. See [`EventHub::on`].
    fn on(&self, names: &str, callback: Callback<A>, context: Option<ContextId>) -> &Self
    where
        Self: Sized,
    {
        self.events().on(names, callback, context);
        self
    }

    /// Bind a closure and hand back the shared callback so it can be unbound.
    fn on_fn<F>(&self, names: &str, f: F) -> Callback<A>
    where
        F: Fn(&str, &A) + 'static,
    {
        let callback: Callback<A> = Rc::new(f);
        self.events().on(names, Rc::clone(&callback), None);
        callback
    }

    /// Remove bindings. See [`EventHub::off`].
    fn off(
        &self,
        names: Option<&str>,
        callback: Option<&Callback<A>>,
        context: Option<ContextId>,
    ) -> &Self
    where
        Self: Sized,
    {
        self.events().off(names, callback, context);
        self
    }

    /// Emit events. See [`EventHub::trigger`].
    fn trigger(&self, names: &str, payload: &A) -> &Self
    where
        Self: Sized,
    {
        self.events().trigger(names, payload);
        self
    }
}
