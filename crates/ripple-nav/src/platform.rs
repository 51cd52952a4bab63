//! Host navigation surface.
//!
//! [`Platform`] is the narrow slice of a host's navigation API that
//! [`History`](crate::History) needs. [`MemoryPlatform`] implements it with an
//! in-memory session history, for tests and headless use.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// Current location, split the way a browser splits it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    /// Path component, e.g. `/app/search`.
    pub path: String,
    /// Query string including the leading `?`, or empty.
    pub search: String,
    /// Hash without the leading `#`, or empty.
    pub hash: String,
}

impl Location {
    /// Split a relative URL (`/path?query#hash`).
    #[must_use]
    pub fn parse(url: &str) -> Self {
        let (rest, hash) = match url.split_once('#') {
            Some((rest, hash)) => (rest, hash.to_string()),
            None => (url, String::new()),
        };
        let (path, search) = match rest.find('?') {
            Some(at) => (rest[..at].to_string(), rest[at..].to_string()),
            None => (rest.to_string(), String::new()),
        };
        Self { path, search, hash }
    }

    /// Reassemble the URL.
    #[must_use]
    pub fn href(&self) -> String {
        if self.hash.is_empty() {
            format!("{}{}", self.path, self.search)
        } else {
            format!("{}{}#{}", self.path, self.search, self.hash)
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.href())
    }
}

/// Navigation notifications a platform can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavEvent {
    /// The session history moved (back/forward across pushed entries).
    PopState,
    /// The hash changed outside of the application's control.
    HashChange,
}

/// Receives navigation notifications.
pub type NavListener = Rc<dyn Fn(NavEvent)>;

/// Handle for removing a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Wrap a raw listener number.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw listener number.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// The host navigation API.
pub trait Platform {
    /// Current location.
    fn location(&self) -> Location;

    /// Whether the native navigation API (push/replace state) exists.
    fn supports_push_state(&self) -> bool;

    /// Whether hash-change notifications are delivered.
    fn supports_hash_change(&self) -> bool;

    /// Add a session history entry for `url` without loading it.
    fn push_state(&self, url: &str);

    /// Replace the current session history entry with `url`.
    fn replace_state(&self, url: &str);

    /// Set the hash, adding a history entry unless `replace`.
    fn set_hash(&self, fragment: &str, replace: bool);

    /// Load `url` as a full navigation, replacing the current entry if
    /// `replace`.
    fn load(&self, url: &str, replace: bool);

    /// Register for `event`.
    fn listen(&self, event: NavEvent, listener: NavListener) -> ListenerId;

    /// Remove a registration. Unknown ids are ignored.
    fn unlisten(&self, id: ListenerId);
}

struct Registration {
    id: ListenerId,
    event: NavEvent,
    listener: NavListener,
}

/// In-memory platform with a session history stack.
///
/// Programmatic changes (`push_state`, `set_hash`, `load`) do not notify
/// listeners. The user-side methods [`MemoryPlatform::visit`],
/// [`MemoryPlatform::back`] and [`MemoryPlatform::forward`] do, the way a
/// browser does when the user acts.
pub struct MemoryPlatform {
    push_state: bool,
    hash_change: bool,
    entries: RefCell<Vec<Location>>,
    index: Cell<usize>,
    loads: Cell<usize>,
    listeners: RefCell<Vec<Registration>>,
    next_listener: Cell<u64>,
}

impl MemoryPlatform {
    /// A platform at `url` with every capability.
    #[must_use]
    pub fn new(url: &str) -> Self {
        Self::with_capabilities(url, true, true)
    }

    /// A platform at `url` with the given capabilities.
    #[must_use]
    pub fn with_capabilities(url: &str, push_state: bool, hash_change: bool) -> Self {
        Self {
            push_state,
            hash_change,
            entries: RefCell::new(vec![Location::parse(url)]),
            index: Cell::new(0),
            loads: Cell::new(0),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(1),
        }
    }

    /// Current URL.
    #[must_use]
    pub fn href(&self) -> String {
        self.location().href()
    }

    /// Number of session history entries.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Number of full navigations performed through [`Platform::load`].
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.get()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Replace the current entry without notifying anyone, as a hash edit
    /// that only a poller would notice.
    pub fn set_location_quietly(&self, url: &str) {
        let index = self.index.get();
        self.entries.borrow_mut()[index] = self.resolve(url);
    }

    /// The user enters `url`: a new entry is pushed and a hash-change is
    /// delivered if only the hash differs.
    pub fn visit(&self, url: &str) {
        let before = self.location();
        let after = self.resolve(url);
        self.push(after.clone());
        if before.path == after.path && before.search == after.search && before.hash != after.hash {
            self.notify(NavEvent::HashChange);
        }
    }

    /// The user goes back one entry. Returns `false` at the start of the
    /// session history.
    pub fn back(&self) -> bool {
        let index = self.index.get();
        if index == 0 {
            return false;
        }
        self.travel(index - 1);
        true
    }

    /// The user goes forward one entry. Returns `false` at the end.
    pub fn forward(&self) -> bool {
        let index = self.index.get();
        if index + 1 >= self.history_len() {
            return false;
        }
        self.travel(index + 1);
        true
    }

    fn travel(&self, to: usize) {
        let before = self.location();
        self.index.set(to);
        let after = self.location();
        self.notify(NavEvent::PopState);
        if before.hash != after.hash {
            self.notify(NavEvent::HashChange);
        }
    }

    fn resolve(&self, url: &str) -> Location {
        match url.strip_prefix('#') {
            Some(hash) => Location {
                hash: hash.to_string(),
                ..self.location()
            },
            None => Location::parse(url),
        }
    }

    fn push(&self, location: Location) {
        let index = self.index.get();
        let mut entries = self.entries.borrow_mut();
        entries.truncate(index + 1);
        entries.push(location);
        self.index.set(entries.len() - 1);
    }

    fn replace(&self, location: Location) {
        let index = self.index.get();
        self.entries.borrow_mut()[index] = location;
    }

    fn notify(&self, event: NavEvent) {
        let listeners: Vec<NavListener> = self
            .listeners
            .borrow()
            .iter()
            .filter(|r| r.event == event)
            .map(|r| Rc::clone(&r.listener))
            .collect();
        trace!(?event, listeners = listeners.len(), "Delivering navigation event");
        for listener in listeners {
            listener(event);
        }
    }
}

impl Platform for MemoryPlatform {
    fn location(&self) -> Location {
        self.entries.borrow()[self.index.get()].clone()
    }

    fn supports_push_state(&self) -> bool {
        self.push_state
    }

    fn supports_hash_change(&self) -> bool {
        self.hash_change
    }

    fn push_state(&self, url: &str) {
        self.push(Location::parse(url));
    }

    fn replace_state(&self, url: &str) {
        self.replace(Location::parse(url));
    }

    fn set_hash(&self, fragment: &str, replace: bool) {
        let location = Location {
            hash: fragment.to_string(),
            ..self.location()
        };
        if replace {
            self.replace(location);
        } else {
            self.push(location);
        }
    }

    fn load(&self, url: &str, replace: bool) {
        self.loads.set(self.loads.get() + 1);
        let location = self.resolve(url);
        if replace {
            self.replace(location);
        } else {
            self.push(location);
        }
    }

    fn listen(&self, event: NavEvent, listener: NavListener) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners.borrow_mut().push(Registration {
            id,
            event,
            listener,
        });
        id
    }

    fn unlisten(&self, id: ListenerId) {
        self.listeners.borrow_mut().retain(|r| r.id != id);
    }
}

impl fmt::Debug for MemoryPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPlatform")
            .field("location", &self.location())
            .field("push_state", &self.push_state)
            .field("hash_change", &self.hash_change)
            .field("history_len", &self.history_len())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
