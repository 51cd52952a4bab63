//! Per-call options recognised by record and record-set operations.

use crate::error::RecordError;
use crate::record::Record;
use std::fmt;
use std::rc::Rc;

/// Receives failures instead of the `"error"` event when supplied.
pub type ErrorCallback = Rc<dyn Fn(&Record, &RecordError)>;

/// Options shared by `set`, `add`, `remove`, `reset`, `sort` and the
/// persistence helpers.
#[derive(Clone, Default)]
pub struct Options {
    /// Suppress the events this call would emit.
    pub silent: bool,
    /// Treat every key passed to `set` as a removal.
    pub unset: bool,
    /// Insertion index for `add`.
    pub at: Option<usize>,
    /// Run the record type's parser over incoming attributes.
    pub parse: bool,
    /// Defer local mutation until the persistence hook confirms.
    pub wait: bool,
    /// Error sink that replaces the `"error"` event.
    pub on_error: Option<ErrorCallback>,
}

impl Options {
    /// Options that suppress events.
    #[must_use]
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    /// Set the insertion index.
    #[must_use]
    pub fn with_at(mut self, index: usize) -> Self {
        self.at = Some(index);
        self
    }

    /// Request removal semantics.
    #[must_use]
    pub fn with_unset(mut self) -> Self {
        self.unset = true;
        self
    }

    /// Request parsing of incoming attributes.
    #[must_use]
    pub fn with_parse(mut self) -> Self {
        self.parse = true;
        self
    }

    /// Request wait-for-persistence semantics.
    #[must_use]
    pub fn with_wait(mut self) -> Self {
        self.wait = true;
        self
    }

    /// Route failures to `callback` instead of the `"error"` event.
    #[must_use]
    pub fn with_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Record, &RecordError) + 'static,
    {
        self.on_error = Some(Rc::new(callback));
        self
    }

    /// A copy with `silent` forced on.
    #[must_use]
    pub fn silenced(&self) -> Self {
        Self {
            silent: true,
            ..self.clone()
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("silent", &self.silent)
            .field("unset", &self.unset)
            .field("at", &self.at)
            .field("parse", &self.parse)
            .field("wait", &self.wait)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
