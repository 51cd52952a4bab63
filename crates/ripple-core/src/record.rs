//! Change-tracked records.
//!
//! A [`Record`] is a shared handle to an attribute bag with change
//! bookkeeping:
//!
//! - `changed` holds the attributes that differ from the last completed
//!   `"change"` broadcast,
//! - `previous` is the attribute snapshot taken when that broadcast ended,
//! - `pending` and `silent` are the transient sets that drive the next
//!   broadcast.
//!
//! # Broadcast
//!
//! A non-silent `set` emits one `"change:<name>"` event per attribute it
//! changed, then drains `pending` by emitting `"change"` until handlers
//! stop producing new changes. A `set` issued by a handler while a
//! broadcast is running emits its attribute events and leaves the generic
//! `"change"` to the outer drain loop, so `previous` is rewritten exactly
//! once per stabilised pass and never mid-broadcast.

use crate::error::{RecordError, ValidationError};
use crate::events::{EventHub, Events};
use crate::model_event::ModelEvent;
use crate::options::Options;
use crate::record_set::{RecordSet, SetInner};
use crate::record_type::RecordType;
use crate::value::{display_text, escape_html, id_key, Attributes};
use serde_json::Value;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Permanent client-local identity, assigned at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    /// Generate the next identity (`c1`, `c2`, ...).
    #[must_use]
    pub fn generate() -> Self {
        Self(format!(
            "c{}",
            CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
        ))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Default)]
struct ChangeState {
    attributes: Attributes,
    previous: Attributes,
    changed: Attributes,
    pending: BTreeSet<String>,
    silent: BTreeSet<String>,
    escaped: HashMap<String, String>,
    id: Option<Value>,
    changing: bool,
    collection: Option<Weak<SetInner>>,
}

struct RecordInner {
    client_id: ClientId,
    kind: Rc<RecordType>,
    hub: EventHub<ModelEvent>,
    state: RefCell<ChangeState>,
}

/// Shared handle to a change-tracked record.
///
/// Cloning the handle does not copy the record; see [`Record::duplicate`].
#[derive(Clone)]
pub struct Record {
    inner: Rc<RecordInner>,
}

impl Record {
    /// Create an untyped record.
    #[must_use]
    pub fn new(attrs: Attributes) -> Self {
        Self::with_type(Rc::new(RecordType::default()), attrs, &Options::default())
    }

    /// Create a record of the given type.
    ///
    /// Defaults go underneath `attrs`; with `options.parse` the type's parser
    /// runs first. The initial attributes are applied silently and become the
    /// first `previous` snapshot.
    #[must_use]
    pub fn with_type(kind: Rc<RecordType>, attrs: Attributes, options: &Options) -> Self {
        let attrs = if options.parse {
            kind.parse(Value::Object(attrs))
        } else {
            attrs
        };
        let mut initial = kind.defaults().clone();
        initial.extend(attrs);

        let record = Self {
            inner: Rc::new(RecordInner {
                client_id: ClientId::generate(),
                kind,
                hub: EventHub::new(),
                state: RefCell::new(ChangeState::default()),
            }),
        };

        record.apply(initial, &Options::silent());
        {
            let mut state = record.state_mut();
            state.changed.clear();
            state.silent.clear();
            state.pending.clear();
            state.previous = state.attributes.clone();
        }

        trace!(client_id = %record.inner.client_id, kind = %record.inner.kind.name(), "Record created");
        record
    }

    fn state(&self) -> Ref<'_, ChangeState> {
        self.inner.state.borrow()
    }

    fn state_mut(&self) -> RefMut<'_, ChangeState> {
        self.inner.state.borrow_mut()
    }

    /// Client-local identity.
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.inner.client_id
    }

    /// The record's type.
    #[must_use]
    pub fn record_type(&self) -> &Rc<RecordType> {
        &self.inner.kind
    }

    /// Externally assigned identifier, if any.
    #[must_use]
    pub fn id(&self) -> Option<Value> {
        self.state().id.clone()
    }

    /// Index key of the identifier, if any.
    #[must_use]
    pub fn id_key(&self) -> Option<String> {
        self.state().id.as_ref().and_then(id_key)
    }

    /// A record is new until it has an identifier.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.id_key().is_none()
    }

    /// Whether two handles point at the same record.
    #[must_use]
    pub fn ptr_eq(&self, other: &Record) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current value of an attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.state().attributes.get(name).cloned()
    }

    /// Whether an attribute holds a non-null value.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        matches!(self.state().attributes.get(name), Some(v) if !v.is_null())
    }

    /// HTML-escaped text of an attribute, memoised until it changes.
    #[must_use]
    pub fn escape(&self, name: &str) -> String {
        if let Some(html) = self.state().escaped.get(name) {
            return html.clone();
        }
        let html = escape_html(&display_text(self.get(name).as_ref()));
        self.state_mut()
            .escaped
            .insert(name.to_string(), html.clone());
        html
    }

    /// Copy of the attribute bag.
    #[must_use]
    pub fn attributes(&self) -> Attributes {
        self.state().attributes.clone()
    }

    /// JSON object of the current attributes.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(self.attributes())
    }

    /// A new record of the same type with the same attributes.
    #[must_use]
    pub fn duplicate(&self) -> Record {
        Self::with_type(Rc::clone(&self.inner.kind), self.attributes(), &Options::default())
    }

    /// Set several attributes.
    ///
    /// # Errors
    ///
    /// Returns the validator's error when the resulting attribute set is
    /// rejected. The failure is also delivered to `options.on_error` or, if
    /// absent, as an `"error"` event; nothing is mutated.
    pub fn set(&self, attrs: Attributes, options: &Options) -> Result<(), ValidationError> {
        let mut attrs = attrs;
        if options.unset {
            for value in attrs.values_mut() {
                *value = Value::Null;
            }
        }

        self.validate_attributes(&attrs, options)?;
        self.apply(attrs, options);
        Ok(())
    }

    /// Write validated attributes and broadcast unless silent.
    fn apply(&self, attrs: Attributes, options: &Options) {
        let mut changes = Vec::new();
        {
            let mut state = self.state_mut();
            let id_attribute = self.inner.kind.id_attribute();

            if let Some(id) = attrs.get(id_attribute) {
                state.id = if options.unset || id.is_null() {
                    None
                } else {
                    Some(id.clone())
                };
            }

            for (name, value) in attrs {
                let differs_from_current = if options.unset {
                    state.attributes.contains_key(&name)
                } else {
                    state.attributes.get(&name) != Some(&value)
                };
                if differs_from_current {
                    state.escaped.remove(&name);
                    if options.silent {
                        state.silent.insert(name.clone());
                    } else {
                        changes.push(name.clone());
                    }
                }

                let differs_from_previous = if options.unset {
                    state.previous.contains_key(&name)
                } else {
                    state.previous.get(&name) != Some(&value)
                };

                if options.unset {
                    state.attributes.remove(&name);
                } else {
                    state.attributes.insert(name.clone(), value.clone());
                }

                if differs_from_previous {
                    if !options.silent {
                        state.pending.insert(name.clone());
                    }
                    state.changed.insert(name, value);
                } else {
                    state.changed.remove(&name);
                    state.pending.remove(&name);
                }
            }
        }

        if !options.silent {
            self.broadcast(options, changes);
        }
    }

    /// Swap in a whole attribute bag without change bookkeeping, returning
    /// the bag it replaced.
    pub(crate) fn replace_attributes(&self, attributes: Attributes) -> Attributes {
        let mut state = self.state_mut();
        let id_attribute = self.inner.kind.id_attribute();
        state.id = attributes.get(id_attribute).filter(|v| !v.is_null()).cloned();
        state.escaped.clear();
        std::mem::replace(&mut state.attributes, attributes)
    }

    /// Set a single attribute.
    ///
    /// # Errors
    ///
    /// See [`Record::set`].
    pub fn set_attr(
        &self,
        name: &str,
        value: impl Into<Value>,
        options: &Options,
    ) -> Result<(), ValidationError> {
        let mut attrs = Attributes::new();
        attrs.insert(name.to_string(), value.into());
        self.set(attrs, options)
    }

    /// Remove an attribute. A no-op if it is absent.
    ///
    /// # Errors
    ///
    /// See [`Record::set`].
    pub fn unset(&self, name: &str, options: &Options) -> Result<(), ValidationError> {
        let options = Options {
            unset: true,
            ..options.clone()
        };
        self.set_attr(name, Value::Null, &options)
    }

    /// Remove every attribute.
    ///
    /// # Errors
    ///
    /// See [`Record::set`].
    pub fn clear(&self, options: &Options) -> Result<(), ValidationError> {
        let options = Options {
            unset: true,
            ..options.clone()
        };
        self.set(self.attributes(), &options)
    }

    /// Broadcast accumulated changes: silently changed attributes get their
    /// `"change:<name>"` events and a `"change"` fires if anything is pending.
    pub fn change(&self, options: &Options) {
        self.broadcast(options, Vec::new());
    }

    fn broadcast(&self, options: &Options, changes: Vec<String>) {
        let (nested, names) = {
            let mut state = self.state_mut();
            let nested = std::mem::replace(&mut state.changing, true);
            let silent = std::mem::take(&mut state.silent);
            state.pending.extend(silent.iter().cloned());
            let mut names = changes;
            for name in silent {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            (nested, names)
        };

        for name in names {
            let value = self.get(&name).unwrap_or(Value::Null);
            let event = ModelEvent::Attribute {
                record: self.clone(),
                name: name.clone(),
                value,
                options: options.clone(),
            };
            self.trigger(&format!("change:{name}"), &event);
        }

        if nested {
            return;
        }

        loop {
            {
                let mut state = self.state_mut();
                if state.pending.is_empty() {
                    break;
                }
                state.pending.clear();
            }

            self.trigger(
                "change",
                &ModelEvent::Change {
                    record: self.clone(),
                    options: options.clone(),
                },
            );

            let mut guard = self.state_mut();
            let state = &mut *guard;
            let (pending, silent) = (&state.pending, &state.silent);
            state
                .changed
                .retain(|name, _| pending.contains(name) || silent.contains(name));
            state.previous = state.attributes.clone();
        }

        self.state_mut().changing = false;
    }

    /// Whether anything changed since the last `"change"` broadcast.
    #[must_use]
    pub fn has_changed(&self) -> bool {
        !self.state().changed.is_empty()
    }

    /// Whether `name` changed since the last `"change"` broadcast.
    #[must_use]
    pub fn has_changed_attr(&self, name: &str) -> bool {
        self.state().changed.contains_key(name)
    }

    /// Attributes that changed since the last broadcast, or, given `diff`,
    /// the entries of `diff` that differ from the previous snapshot.
    /// `None` when there is nothing to report.
    #[must_use]
    pub fn changed_attributes(&self, diff: Option<&Attributes>) -> Option<Attributes> {
        let state = self.state();
        let Some(diff) = diff else {
            return (!state.changed.is_empty()).then(|| state.changed.clone());
        };
        let changed: Attributes = diff
            .iter()
            .filter(|(name, value)| state.previous.get(name.as_str()) != Some(value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        (!changed.is_empty()).then_some(changed)
    }

    /// Value of `name` as of the last completed broadcast.
    #[must_use]
    pub fn previous(&self, name: &str) -> Option<Value> {
        self.state().previous.get(name).cloned()
    }

    /// Snapshot of all attributes as of the last completed broadcast.
    #[must_use]
    pub fn previous_attributes(&self) -> Attributes {
        self.state().previous.clone()
    }

    /// Run the validator against the current attributes.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let attributes = self.attributes();
        self.inner.kind.validate(&attributes).is_ok()
    }

    /// Validate `attrs` merged over the current attributes, reporting a
    /// failure the way `set` does. Silent calls are not validated.
    pub(crate) fn validate_attributes(
        &self,
        attrs: &Attributes,
        options: &Options,
    ) -> Result<(), ValidationError> {
        if options.silent || !self.inner.kind.has_validator() {
            return Ok(());
        }
        let mut candidate = self.attributes();
        candidate.extend(attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.inner.kind.validate(&candidate).map_err(|error| {
            self.report(RecordError::Validation(error.clone()), options);
            error
        })
    }

    pub(crate) fn report(&self, error: RecordError, options: &Options) {
        match &options.on_error {
            Some(on_error) => on_error(self, &error),
            None => {
                self.trigger(
                    "error",
                    &ModelEvent::Error {
                        record: Some(self.clone()),
                        error,
                        options: options.clone(),
                    },
                );
            }
        }
    }

    /// The set this record belongs to, if any.
    #[must_use]
    pub fn collection(&self) -> Option<RecordSet> {
        self.state()
            .collection
            .as_ref()
            .and_then(Weak::upgrade)
            .map(RecordSet::from_inner)
    }

    /// Point the back-reference at `set` unless one is already present.
    pub(crate) fn attach(&self, set: &Rc<SetInner>) {
        let mut state = self.state_mut();
        let attached = state
            .collection
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0);
        if !attached {
            state.collection = Some(Rc::downgrade(set));
        }
    }

    /// Clear the back-reference if it points at `set`.
    pub(crate) fn detach(&self, set: &Rc<SetInner>) {
        let mut state = self.state_mut();
        let owned = state
            .collection
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Rc::as_ptr(set)));
        if owned {
            state.collection = None;
        }
    }
}

impl Events<ModelEvent> for Record {
    fn events(&self) -> &EventHub<ModelEvent> {
        &self.inner.hub
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.state.try_borrow() {
            Ok(state) => f
                .debug_struct("Record")
                .field("client_id", &self.inner.client_id)
                .field("id", &state.id)
                .field("attributes", &state.attributes)
                .finish(),
            Err(_) => f
                .debug_struct("Record")
                .field("client_id", &self.inner.client_id)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::attrs;
    use serde_json::json;
    use std::cell::Cell;

    fn event_log(record: &Record) -> Rc<RefCell<Vec<String>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        record.on_fn("all", move |name, _| sink.borrow_mut().push(name.to_string()));
        log
    }

    #[test]
    fn test_defaults_and_initial_snapshot() {
        let kind = RecordType::new("note")
            .with_defaults(attrs(json!({"title": "untitled", "done": false})))
            .build();
        let record = kind.create(attrs(json!({"title": "Groceries"})));

        assert_eq!(record.get("title"), Some(json!("Groceries")));
        assert_eq!(record.get("done"), Some(json!(false)));
        assert!(!record.has_changed());
        assert_eq!(record.previous_attributes(), record.attributes());
        assert!(record.client_id().as_str().starts_with('c'));
    }

    #[test]
    fn test_set_emits_attribute_events_then_change() {
        let record = Record::new(attrs(json!({"a": 1})));
        let log = event_log(&record);

        record
            .set(attrs(json!({"a": 2, "b": 3})), &Options::default())
            .unwrap();

        assert_eq!(*log.borrow(), vec!["change:a", "change:b", "change"]);
        assert!(!record.has_changed());
        assert_eq!(record.previous("a"), Some(json!(2)));
        assert_eq!(record.previous_attributes(), record.attributes());
    }

    #[test]
    fn test_setting_identical_values_is_quiet() {
        let record = Record::new(attrs(json!({"a": 1, "b": [1, 2]})));
        let log = event_log(&record);

        record.set(record.attributes(), &Options::default()).unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_change_handler_sees_previous_values() {
        let record = Record::new(attrs(json!({"count": 1})));
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        record.on_fn("change", move |_, event| {
            if let Some(r) = event.record() {
                *sink.borrow_mut() = Some((r.previous("count"), r.get("count"), r.has_changed_attr("count")));
            }
        });

        record.set_attr("count", 2, &Options::default()).unwrap();
        assert_eq!(
            *seen.borrow(),
            Some((Some(json!(1)), Some(json!(2)), true))
        );
    }

    #[test]
    fn test_silent_changes_flush_on_next_broadcast() {
        let record = Record::new(attrs(json!({"a": 1})));
        let log = event_log(&record);

        record.set_attr("a", 2, &Options::silent()).unwrap();
        assert!(log.borrow().is_empty());
        assert!(record.has_changed_attr("a"));

        record.set_attr("b", 1, &Options::default()).unwrap();
        assert_eq!(*log.borrow(), vec!["change:b", "change:a", "change"]);
        assert!(!record.has_changed());
        assert_eq!(record.previous("a"), Some(json!(2)));
    }

    #[test]
    fn test_explicit_change_after_silent_set() {
        let record = Record::new(attrs(json!({"a": 1})));
        let log = event_log(&record);

        record.set_attr("a", 5, &Options::silent()).unwrap();
        record.change(&Options::default());
        assert_eq!(*log.borrow(), vec!["change:a", "change"]);
        assert_eq!(record.previous("a"), Some(json!(5)));
    }

    #[test]
    fn test_nested_set_is_drained_before_return() {
        let record = Record::new(attrs(json!({"a": 0, "b": 0})));
        let log = event_log(&record);
        let changes = Rc::new(Cell::new(0));

        let counter = Rc::clone(&changes);
        record.on_fn("change", move |_, event| {
            counter.set(counter.get() + 1);
            if let Some(r) = event.record() {
                if r.get("b") == Some(json!(0)) {
                    r.set_attr("b", 1, &Options::default()).unwrap();
                }
            }
        });

        record.set_attr("a", 1, &Options::default()).unwrap();

        // The nested set fires its attribute event from inside the first
        // "change" pass; the drain loop then runs a second pass for it.
        assert_eq!(changes.get(), 2);
        assert_eq!(
            *log.borrow(),
            vec!["change:a", "change:b", "change", "change"]
        );
        assert_eq!(record.previous_attributes(), record.attributes());
        assert!(!record.has_changed());
    }

    #[test]
    fn test_unset_and_clear() {
        let record = Record::new(attrs(json!({"a": 1, "b": 2})));
        let log = event_log(&record);

        record.unset("a", &Options::default()).unwrap();
        assert!(!record.has("a"));
        assert_eq!(record.get("a"), None);
        assert_eq!(*log.borrow(), vec!["change:a", "change"]);

        log.borrow_mut().clear();
        record.unset("missing", &Options::default()).unwrap();
        assert!(log.borrow().is_empty());

        record.clear(&Options::default()).unwrap();
        assert!(record.attributes().is_empty());
        assert_eq!(*log.borrow(), vec!["change:b", "change"]);
    }

    #[test]
    fn test_has_treats_null_as_absent() {
        let record = Record::new(attrs(json!({"a": null, "b": 0})));
        assert!(!record.has("a"));
        assert!(record.has("b"));
        assert!(!record.has("c"));
    }

    #[test]
    fn test_id_tracks_id_attribute() {
        let kind = RecordType::new("doc").with_id_attribute("_id").build();
        let record = kind.create(attrs(json!({"_id": "abc"})));
        assert_eq!(record.id(), Some(json!("abc")));
        assert!(!record.is_new());

        record.unset("_id", &Options::default()).unwrap();
        assert!(record.is_new());
        assert_eq!(record.id(), None);
    }

    #[test]
    fn test_validation_failure_routes_to_error_event() {
        let kind = RecordType::new("person")
            .with_validator(|a| match a.get("age").and_then(Value::as_i64) {
                Some(age) if age < 0 => Err(ValidationError::new("age must be positive")),
                _ => Ok(()),
            })
            .build();
        let record = kind.create(attrs(json!({"age": 30})));
        let log = event_log(&record);

        let result = record.set_attr("age", -1, &Options::default());
        assert_eq!(result, Err(ValidationError::new("age must be positive")));
        assert_eq!(record.get("age"), Some(json!(30)));
        assert_eq!(*log.borrow(), vec!["error"]);
    }

    #[test]
    fn test_validation_failure_prefers_error_callback() {
        let kind = RecordType::new("person")
            .with_validator(|a| {
                if a.contains_key("forbidden") {
                    Err(ValidationError::new("nope"))
                } else {
                    Ok(())
                }
            })
            .build();
        let record = kind.create(Attributes::new());
        let log = event_log(&record);
        let reported = Rc::new(Cell::new(false));
        let flag = Rc::clone(&reported);
        let options = Options::default().with_error(move |_, _| flag.set(true));

        assert!(record.set_attr("forbidden", 1, &options).is_err());
        assert!(reported.get());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_silent_set_skips_validation_and_is_valid_reports_it() {
        let kind = RecordType::new("bounded")
            .with_validator(|a| match a.get("n").and_then(Value::as_i64) {
                Some(n) if n > 10 => Err(ValidationError::new("too big")),
                _ => Ok(()),
            })
            .build();
        let record = kind.create(attrs(json!({"n": 1})));
        assert!(record.is_valid());

        record.set_attr("n", 11, &Options::silent()).unwrap();
        assert!(!record.is_valid());
    }

    #[test]
    fn test_changed_attributes() {
        let record = Record::new(attrs(json!({"a": 1, "b": 2})));
        assert_eq!(record.changed_attributes(None), None);

        let diff = attrs(json!({"a": 1, "b": 3, "c": null}));
        assert_eq!(
            record.changed_attributes(Some(&diff)),
            Some(attrs(json!({"b": 3, "c": null})))
        );

        record.set_attr("a", 9, &Options::silent()).unwrap();
        assert_eq!(record.changed_attributes(None), Some(attrs(json!({"a": 9}))));
    }

    #[test]
    fn test_escape_is_memoised_until_change() {
        let record = Record::new(attrs(json!({"html": "<b>", "n": 3})));
        assert_eq!(record.escape("html"), "&lt;b&gt;");
        assert_eq!(record.escape("n"), "3");
        assert_eq!(record.escape("missing"), "");

        record.set_attr("html", "a & b", &Options::default()).unwrap();
        assert_eq!(record.escape("html"), "a &amp; b");
    }

    #[test]
    fn test_parse_option_and_duplicate() {
        let kind = RecordType::new("wrapped")
            .with_parser(|v| v.get("data").cloned().unwrap_or(Value::Null))
            .build();
        let record = Record::with_type(
            Rc::clone(&kind),
            attrs(json!({"data": {"x": 1}})),
            &Options::default().with_parse(),
        );
        assert_eq!(record.get("x"), Some(json!(1)));

        let copy = record.duplicate();
        assert_eq!(copy.attributes(), record.attributes());
        assert_ne!(copy.client_id(), record.client_id());
        assert!(!copy.ptr_eq(&record));
    }
}
