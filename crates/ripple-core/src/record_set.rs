//! Ordered, deduplicated sets of records.
//!
//! A [`RecordSet`] keeps its members in a list plus two indices, one by
//! identifier and one by client id. After every public method returns the
//! indices describe exactly the records in the list.
//!
//! Members' events are relayed through the set: every event a member emits
//! is re-emitted by the set, except `"add"`/`"remove"` events that belong to
//! another set. A member's `"destroy"` removes it, and a change of its
//! identifier attribute moves its entry in the id index.

use crate::error::{CollectionError, RecordError, SyncError, ValidationError};
use crate::events::{Callback, ContextId, EventHub, Events, ALL};
use crate::model_event::ModelEvent;
use crate::options::Options;
use crate::record::{ClientId, Record};
use crate::record_type::RecordType;
use crate::sync::{SyncMethod, SyncTarget};
use crate::value::{compare_values, id_key, to_attributes, Attributes};
use serde_json::Value;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::debug;

/// Ordering used to keep a set sorted.
#[derive(Clone)]
pub enum Comparator {
    /// Sort by a key extracted from each record.
    Key(Rc<dyn Fn(&Record) -> Value>),
    /// Sort with a full two-record ordering.
    Order(Rc<dyn Fn(&Record, &Record) -> Ordering>),
}

impl Comparator {
    /// Sort by the value `key` returns for each record.
    #[must_use]
    pub fn by_key<F>(key: F) -> Self
    where
        F: Fn(&Record) -> Value + 'static,
    {
        Self::Key(Rc::new(key))
    }

    /// Sort by one attribute; missing attributes sort as `null`.
    #[must_use]
    pub fn by_attribute(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::by_key(move |record| record.get(&name).unwrap_or(Value::Null))
    }

    /// Sort with a full ordering.
    #[must_use]
    pub fn by<F>(order: F) -> Self
    where
        F: Fn(&Record, &Record) -> Ordering + 'static,
    {
        Self::Order(Rc::new(order))
    }

    /// Stable-sort `records` in place.
    pub fn sort(&self, records: &mut [Record]) {
        match self {
            Self::Key(key) => {
                let mut keyed: Vec<(Value, Record)> =
                    records.iter().map(|r| (key(r), r.clone())).collect();
                keyed.sort_by(|(a, _), (b, _)| compare_values(a, b));
                for (slot, (_, record)) in records.iter_mut().zip(keyed) {
                    *slot = record;
                }
            }
            Self::Order(order) => records.sort_by(|a, b| order(a, b)),
        }
    }
}

impl fmt::Debug for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(_) => f.write_str("Comparator::Key"),
            Self::Order(_) => f.write_str("Comparator::Order"),
        }
    }
}

/// Something that can become a member: an existing record or raw attributes.
#[derive(Debug, Clone)]
pub enum Candidate {
    /// An existing record, added as-is.
    Record(Record),
    /// Attributes for a new record of the set's type. Must be an object or
    /// `null`.
    Attributes(Value),
}

impl From<Record> for Candidate {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

impl From<&Record> for Candidate {
    fn from(record: &Record) -> Self {
        Self::Record(record.clone())
    }
}

impl From<Value> for Candidate {
    fn from(value: Value) -> Self {
        Self::Attributes(value)
    }
}

impl From<Attributes> for Candidate {
    fn from(attrs: Attributes) -> Self {
        Self::Attributes(Value::Object(attrs))
    }
}

/// Input to `add` and `reset`: one candidate or many.
#[derive(Debug, Clone, Default)]
pub struct Batch(Vec<Candidate>);

impl Batch {
    /// An empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Candidate> for Batch {
    fn from(candidate: Candidate) -> Self {
        Self(vec![candidate])
    }
}

impl From<Vec<Candidate>> for Batch {
    fn from(candidates: Vec<Candidate>) -> Self {
        Self(candidates)
    }
}

impl From<Record> for Batch {
    fn from(record: Record) -> Self {
        Self(vec![Candidate::Record(record)])
    }
}

impl From<&Record> for Batch {
    fn from(record: &Record) -> Self {
        Self(vec![Candidate::from(record)])
    }
}

impl From<Vec<Record>> for Batch {
    fn from(records: Vec<Record>) -> Self {
        Self(records.into_iter().map(Candidate::Record).collect())
    }
}

impl From<Attributes> for Batch {
    fn from(attrs: Attributes) -> Self {
        Self(vec![Candidate::from(attrs)])
    }
}

/// An array becomes one candidate per element; any other value is a single
/// candidate.
impl From<Value> for Batch {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Self(items.into_iter().map(Candidate::Attributes).collect()),
            other => Self(vec![Candidate::Attributes(other)]),
        }
    }
}

/// Addresses a member for `remove`.
#[derive(Debug, Clone)]
pub enum RecordKey {
    /// The record itself (matched by client id, then id).
    Record(Record),
    /// A client id.
    ClientId(ClientId),
    /// An identifier value; strings are tried as client ids first.
    Id(Value),
}

impl From<Record> for RecordKey {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

impl From<&Record> for RecordKey {
    fn from(record: &Record) -> Self {
        Self::Record(record.clone())
    }
}

impl From<ClientId> for RecordKey {
    fn from(client_id: ClientId) -> Self {
        Self::ClientId(client_id)
    }
}

impl From<Value> for RecordKey {
    fn from(value: Value) -> Self {
        Self::Id(value)
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        Self::Id(Value::from(value))
    }
}

/// Input to `remove`: one key or many.
#[derive(Debug, Clone, Default)]
pub struct Keys(Vec<RecordKey>);

impl From<RecordKey> for Keys {
    fn from(key: RecordKey) -> Self {
        Self(vec![key])
    }
}

impl From<Record> for Keys {
    fn from(record: Record) -> Self {
        Self(vec![RecordKey::Record(record)])
    }
}

impl From<&Record> for Keys {
    fn from(record: &Record) -> Self {
        Self(vec![RecordKey::from(record)])
    }
}

impl From<ClientId> for Keys {
    fn from(client_id: ClientId) -> Self {
        Self(vec![RecordKey::ClientId(client_id)])
    }
}

impl From<Value> for Keys {
    fn from(value: Value) -> Self {
        Self(vec![RecordKey::Id(value)])
    }
}

impl From<&str> for Keys {
    fn from(value: &str) -> Self {
        Self(vec![RecordKey::from(value)])
    }
}

impl From<Vec<RecordKey>> for Keys {
    fn from(keys: Vec<RecordKey>) -> Self {
        Self(keys)
    }
}

impl From<Vec<Record>> for Keys {
    fn from(records: Vec<Record>) -> Self {
        Self(records.into_iter().map(RecordKey::Record).collect())
    }
}

/// A candidate the validator turned away.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    /// Attributes of the rejected candidate.
    pub attributes: Attributes,
    /// The validator's reason.
    pub error: ValidationError,
}

/// Outcome of `add` or `reset`.
#[derive(Debug, Clone, Default)]
pub struct AddReport {
    /// Records that became members, in input order.
    pub added: Vec<Record>,
    /// Candidates dropped because they were already present.
    pub duplicates: usize,
    /// Candidates rejected by validation.
    pub invalid: Vec<Rejected>,
}

#[derive(Default)]
struct Membership {
    members: Vec<Record>,
    by_id: HashMap<String, Record>,
    by_client_id: HashMap<ClientId, Record>,
    id_keys: HashMap<ClientId, String>,
}

impl Membership {
    fn index(&mut self, record: &Record) {
        self.by_client_id
            .insert(record.client_id().clone(), record.clone());
        self.index_id(record);
    }

    /// Key `record` under its current identifier.
    fn index_id(&mut self, record: &Record) {
        if let Some(id) = record.id_key() {
            self.by_id.insert(id.clone(), record.clone());
            self.id_keys.insert(record.client_id().clone(), id);
        }
    }

    /// Drop the id entry `record` was indexed under, which may predate a
    /// silent identifier change.
    fn unindex_id(&mut self, record: &Record) {
        if let Some(id) = self.id_keys.remove(record.client_id()) {
            if self.by_id.get(&id).is_some_and(|r| r.ptr_eq(record)) {
                self.by_id.remove(&id);
            }
        }
    }

    fn unindex(&mut self, record: &Record) {
        self.unindex_id(record);
        self.by_client_id.remove(record.client_id());
    }

    fn lookup(&self, key: &RecordKey) -> Option<Record> {
        match key {
            RecordKey::Record(record) => self
                .by_client_id
                .get(record.client_id())
                .or_else(|| record.id_key().and_then(|k| self.by_id.get(&k)))
                .cloned(),
            RecordKey::ClientId(client_id) => self.by_client_id.get(client_id).cloned(),
            RecordKey::Id(value) => value
                .as_str()
                .and_then(|s| self.by_client_id.get(&ClientId::from(s)))
                .or_else(|| id_key(value).and_then(|k| self.by_id.get(&k)))
                .cloned(),
        }
    }

    fn position(&self, record: &Record) -> Option<usize> {
        self.members.iter().position(|m| m.ptr_eq(record))
    }
}

pub(crate) struct SetInner {
    context: ContextId,
    kind: Rc<RecordType>,
    hub: EventHub<ModelEvent>,
    comparator: RefCell<Option<Comparator>>,
    state: RefCell<Membership>,
    relay: Callback<ModelEvent>,
}

/// Shared handle to an ordered, indexed set of records.
#[derive(Clone)]
pub struct RecordSet {
    inner: Rc<SetInner>,
}

impl RecordSet {
    /// Create an empty, unsorted set of records of type `kind`.
    #[must_use]
    pub fn new(kind: Rc<RecordType>) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<SetInner>| {
            let weak = weak.clone();
            let relay: Callback<ModelEvent> = Rc::new(move |name: &str, event: &ModelEvent| {
                if let Some(inner) = weak.upgrade() {
                    RecordSet::from_inner(inner).on_member_event(name, event);
                }
            });
            SetInner {
                context: ContextId::generate(),
                kind,
                hub: EventHub::new(),
                comparator: RefCell::new(None),
                state: RefCell::new(Membership::default()),
                relay,
            }
        });
        Self { inner }
    }

    /// Create an empty set kept sorted by `comparator`.
    #[must_use]
    pub fn with_comparator(kind: Rc<RecordType>, comparator: Comparator) -> Self {
        let set = Self::new(kind);
        set.set_comparator(Some(comparator));
        set
    }

    pub(crate) fn from_inner(inner: Rc<SetInner>) -> Self {
        Self { inner }
    }

    /// Type of the records this set builds from raw attributes.
    #[must_use]
    pub fn record_type(&self) -> &Rc<RecordType> {
        &self.inner.kind
    }

    /// Whether two handles point at the same set.
    #[must_use]
    pub fn ptr_eq(&self, other: &RecordSet) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Install or clear the comparator. Existing members are not re-sorted.
    pub fn set_comparator(&self, comparator: Option<Comparator>) {
        *self.inner.comparator.borrow_mut() = comparator;
    }

    /// Whether a comparator is configured.
    #[must_use]
    pub fn has_comparator(&self) -> bool {
        self.inner.comparator.borrow().is_some()
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.borrow().members.len()
    }

    /// Whether the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.borrow().members.is_empty()
    }

    /// Snapshot of the members in order.
    #[must_use]
    pub fn members(&self) -> Vec<Record> {
        self.inner.state.borrow().members.clone()
    }

    /// Member with identifier `id`.
    #[must_use]
    pub fn get(&self, id: &Value) -> Option<Record> {
        let key = id_key(id)?;
        self.inner.state.borrow().by_id.get(&key).cloned()
    }

    /// Member with client id `client_id`.
    #[must_use]
    pub fn get_by_client_id(&self, client_id: &str) -> Option<Record> {
        self.inner
            .state
            .borrow()
            .by_client_id
            .get(&ClientId::from(client_id))
            .cloned()
    }

    /// Member at `index`.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<Record> {
        self.inner.state.borrow().members.get(index).cloned()
    }

    /// Position of `record`, if it is a member.
    #[must_use]
    pub fn index_of(&self, record: &Record) -> Option<usize> {
        self.inner.state.borrow().position(record)
    }

    /// Whether `record` is a member.
    #[must_use]
    pub fn contains(&self, record: &Record) -> bool {
        self.inner
            .state
            .borrow()
            .by_client_id
            .contains_key(record.client_id())
    }

    fn precheck(batch: &Batch) -> Result<(), CollectionError> {
        for candidate in &batch.0 {
            if let Candidate::Attributes(value) = candidate {
                if !(value.is_object() || value.is_null()) {
                    return Err(CollectionError::MalformedCandidate(value.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Turn a candidate into a record; `Err` carries a validation rejection.
    fn prepare(&self, candidate: Candidate, options: &Options) -> Result<Record, Rejected> {
        let value = match candidate {
            Candidate::Record(record) => return Ok(record),
            Candidate::Attributes(value) => value,
        };
        let attrs = to_attributes(value).unwrap_or_default();
        let record = Record::with_type(Rc::clone(&self.inner.kind), attrs, options);
        match self.inner.kind.validate(&record.attributes()) {
            Ok(()) => Ok(record),
            Err(error) => {
                record.report(RecordError::Validation(error.clone()), options);
                Err(Rejected {
                    attributes: record.attributes(),
                    error,
                })
            }
        }
    }

    /// Add records or raw attributes.
    ///
    /// Raw attributes become records of the set's type; candidates the
    /// validator rejects are skipped and listed in the report. Candidates
    /// already present, by client id or identifier, in the set or earlier
    /// in the same batch, are dropped silently. New members are inserted at
    /// `options.at` (or the end), the set is re-sorted if it has a
    /// comparator, and each new member emits `"add"` with its final index
    /// unless `options.silent`.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::MalformedCandidate`] if any candidate is
    /// neither a record nor an attribute object. Nothing is changed then.
    pub fn add(&self, batch: impl Into<Batch>, options: &Options) -> Result<AddReport, CollectionError> {
        let batch = batch.into();
        Self::precheck(&batch)?;

        let mut report = AddReport::default();
        let mut batch_client_ids = HashSet::new();
        let mut batch_ids = HashSet::new();
        {
            let candidates: Vec<Record> = batch
                .0
                .into_iter()
                .filter_map(|candidate| match self.prepare(candidate, options) {
                    Ok(record) => Some(record),
                    Err(rejected) => {
                        report.invalid.push(rejected);
                        None
                    }
                })
                .collect();

            let state = self.inner.state.borrow();
            for record in candidates {
                let client_id = record.client_id().clone();
                let id = record.id_key();
                let duplicate = batch_client_ids.contains(&client_id)
                    || state.by_client_id.contains_key(&client_id)
                    || id
                        .as_ref()
                        .is_some_and(|k| batch_ids.contains(k) || state.by_id.contains_key(k));
                if duplicate {
                    report.duplicates += 1;
                    continue;
                }
                batch_client_ids.insert(client_id);
                if let Some(id) = id {
                    batch_ids.insert(id);
                }
                report.added.push(record);
            }
        }

        if report.added.is_empty() {
            return Ok(report);
        }

        for record in &report.added {
            record.attach(&self.inner);
            record.on(ALL, Rc::clone(&self.inner.relay), Some(self.inner.context));
        }

        {
            let mut state = self.inner.state.borrow_mut();
            for record in &report.added {
                state.index(record);
            }
            let at = options.at.unwrap_or(state.members.len()).min(state.members.len());
            let tail = state.members.split_off(at);
            state.members.extend(report.added.iter().cloned());
            state.members.extend(tail);
        }

        let comparator = self.inner.comparator.borrow().clone();
        if let Some(comparator) = comparator {
            self.sort_members(&comparator);
        }

        debug!(
            set = %self.inner.context,
            added = report.added.len(),
            duplicates = report.duplicates,
            "Records added"
        );

        if !options.silent {
            for (index, record) in self.members().into_iter().enumerate() {
                if !batch_client_ids.contains(record.client_id()) {
                    continue;
                }
                record.trigger(
                    "add",
                    &ModelEvent::Add {
                        record: record.clone(),
                        set: self.clone(),
                        index,
                        options: options.clone(),
                    },
                );
            }
        }

        Ok(report)
    }

    /// Remove members by record, client id or identifier.
    ///
    /// Unknown keys are ignored. Each removed member emits `"remove"` with
    /// its former index unless `options.silent`, then stops relaying to this
    /// set. Returns the removed records.
    pub fn remove(&self, keys: impl Into<Keys>, options: &Options) -> Vec<Record> {
        let mut removed = Vec::new();
        for key in keys.into().0 {
            let taken = {
                let mut state = self.inner.state.borrow_mut();
                let Some(record) = state.lookup(&key) else {
                    continue;
                };
                state.unindex(&record);
                let index = state.position(&record);
                if let Some(index) = index {
                    state.members.remove(index);
                }
                (record, index)
            };

            let (record, index) = taken;
            if let Some(index) = index.filter(|_| !options.silent) {
                record.trigger(
                    "remove",
                    &ModelEvent::Remove {
                        record: record.clone(),
                        set: self.clone(),
                        index,
                        options: options.clone(),
                    },
                );
            }
            self.release(&record);
            removed.push(record);
        }

        if !removed.is_empty() {
            debug!(set = %self.inner.context, removed = removed.len(), "Records removed");
        }
        removed
    }

    fn release(&self, record: &Record) {
        record.detach(&self.inner);
        record.off(Some(ALL), Some(&self.inner.relay), Some(self.inner.context));
    }

    fn sort_members(&self, comparator: &Comparator) {
        let mut members = self.members();
        comparator.sort(&mut members);
        self.inner.state.borrow_mut().members = members;
    }

    /// Re-sort the members with the comparator and emit `"reset"` unless
    /// `options.silent`.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::MissingComparator`] if none is configured.
    pub fn sort(&self, options: &Options) -> Result<(), CollectionError> {
        let comparator = self
            .inner
            .comparator
            .borrow()
            .clone()
            .ok_or(CollectionError::MissingComparator)?;
        self.sort_members(&comparator);

        if !options.silent {
            self.trigger(
                "reset",
                &ModelEvent::Reset {
                    set: self.clone(),
                    options: options.clone(),
                },
            );
        }
        Ok(())
    }

    /// Replace every member with `batch` and emit a single `"reset"` unless
    /// `options.silent`. No per-member `"add"`/`"remove"` events fire.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::MalformedCandidate`] as [`RecordSet::add`]
    /// does, before anything is cleared.
    pub fn reset(&self, batch: impl Into<Batch>, options: &Options) -> Result<AddReport, CollectionError> {
        let batch = batch.into();
        Self::precheck(&batch)?;

        let previous = std::mem::take(&mut *self.inner.state.borrow_mut());
        for record in &previous.members {
            self.release(record);
        }

        let report = self.add(batch, &options.silenced())?;
        debug!(set = %self.inner.context, members = self.len(), "Set reset");

        if !options.silent {
            self.trigger(
                "reset",
                &ModelEvent::Reset {
                    set: self.clone(),
                    options: options.clone(),
                },
            );
        }
        Ok(report)
    }

    /// Prepare a single candidate and add it at the given position.
    fn add_one(
        &self,
        candidate: Candidate,
        options: &Options,
    ) -> Result<Option<Record>, CollectionError> {
        Self::precheck(&Batch::from(candidate.clone()))?;
        match self.prepare(candidate, options) {
            Ok(record) => {
                self.add(&record, options)?;
                Ok(Some(record))
            }
            Err(_) => Ok(None),
        }
    }

    /// Add one candidate at the end. Returns the prepared record, or `None`
    /// if validation rejected it.
    ///
    /// # Errors
    ///
    /// See [`RecordSet::add`].
    pub fn push(
        &self,
        candidate: impl Into<Candidate>,
        options: &Options,
    ) -> Result<Option<Record>, CollectionError> {
        let options = Options {
            at: Some(self.len()),
            ..options.clone()
        };
        self.add_one(candidate.into(), &options)
    }

    /// Remove and return the last member.
    pub fn pop(&self, options: &Options) -> Option<Record> {
        let last = self.at(self.len().checked_sub(1)?)?;
        self.remove(&last, options);
        Some(last)
    }

    /// Add one candidate at the front. See [`RecordSet::push`].
    ///
    /// # Errors
    ///
    /// See [`RecordSet::add`].
    pub fn unshift(
        &self,
        candidate: impl Into<Candidate>,
        options: &Options,
    ) -> Result<Option<Record>, CollectionError> {
        let options = Options {
            at: Some(0),
            ..options.clone()
        };
        self.add_one(candidate.into(), &options)
    }

    /// Remove and return the first member.
    pub fn shift(&self, options: &Options) -> Option<Record> {
        let first = self.at(0)?;
        self.remove(&first, options);
        Some(first)
    }

    /// Members whose attributes include every entry of `attrs`. An empty
    /// filter matches nothing.
    #[must_use]
    pub fn where_attrs(&self, attrs: &Attributes) -> Vec<Record> {
        if attrs.is_empty() {
            return Vec::new();
        }
        self.members()
            .into_iter()
            .filter(|record| {
                attrs
                    .iter()
                    .all(|(name, value)| record.get(name).as_ref() == Some(value))
            })
            .collect()
    }

    /// Value of `name` for every member, in order.
    #[must_use]
    pub fn pluck(&self, name: &str) -> Vec<Option<Value>> {
        self.members().iter().map(|record| record.get(name)).collect()
    }

    /// JSON array of the members' attributes.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Array(self.members().iter().map(Record::to_json).collect())
    }

    fn report(&self, error: RecordError, options: &Options) {
        self.trigger(
            "error",
            &ModelEvent::Error {
                record: None,
                error,
                options: options.clone(),
            },
        );
    }

    /// Load the set through the persistence hook and reset it to the
    /// response. Incoming attributes are parsed by the record type.
    ///
    /// # Errors
    ///
    /// Returns the hook's failure (also emitted as `"error"`) or a malformed
    /// response.
    pub fn fetch(&self, options: &Options) -> Result<AddReport, RecordError> {
        let options = Options {
            parse: true,
            ..options.clone()
        };
        let result = match self.inner.kind.persistence() {
            Some(persistence) => {
                debug!(set = %self.inner.context, "Fetching set");
                persistence.sync(SyncMethod::Read, SyncTarget::Set(self), &options)
            }
            None => Err(SyncError::NoPersistence),
        };
        let response = match result {
            Ok(response) => response.unwrap_or(Value::Array(Vec::new())),
            Err(error) => {
                let error = RecordError::Sync(error);
                self.report(error.clone(), &options);
                return Err(error);
            }
        };
        self.reset(response, &options).map_err(RecordError::from)
    }

    /// Build a record in this set and save it.
    ///
    /// The record joins the set immediately, or only once the save succeeds
    /// with `options.wait`. Returns `Ok(None)` if validation rejected the
    /// candidate.
    ///
    /// # Errors
    ///
    /// Returns a malformed candidate or the save's failure.
    pub fn create(
        &self,
        candidate: impl Into<Candidate>,
        options: &Options,
    ) -> Result<Option<Record>, RecordError> {
        let candidate = candidate.into();
        Self::precheck(&Batch::from(candidate.clone()))?;
        let Ok(record) = self.prepare(candidate, options) else {
            return Ok(None);
        };
        record.attach(&self.inner);

        if !options.wait {
            self.add(&record, options)?;
        }
        record.save(None, options)?;
        if options.wait {
            self.add(&record, options)?;
        }
        Ok(Some(record))
    }

    fn on_member_event(&self, name: &str, event: &ModelEvent) {
        if matches!(name, "add" | "remove")
            && !event.set().is_some_and(|set| set.ptr_eq(self))
        {
            return;
        }

        if let Some(record) = event.record() {
            if name == "destroy" {
                let options = event.options().cloned().unwrap_or_default();
                self.remove(record, &options);
            }

            let id_attribute = self.inner.kind.id_attribute();
            if name.strip_prefix("change:") == Some(id_attribute) && self.contains(record) {
                let mut state = self.inner.state.borrow_mut();
                state.unindex_id(record);
                state.index_id(record);
            }
        }

        self.trigger(name, event);
    }
}

impl Events<ModelEvent> for RecordSet {
    fn events(&self) -> &EventHub<ModelEvent> {
        &self.inner.hub
    }
}

impl fmt::Debug for RecordSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("RecordSet");
        s.field("context", &self.inner.context)
            .field("kind", &self.inner.kind.name());
        match self.inner.state.try_borrow() {
            Ok(state) => s.field("len", &state.members.len()).finish(),
            Err(_) => s.finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::attrs;
    use serde_json::json;
    use std::cell::Cell;

    fn todo_set() -> RecordSet {
        RecordSet::new(RecordType::new("todo").build())
    }

    fn event_log(set: &RecordSet) -> Rc<RefCell<Vec<String>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        set.on_fn("all", move |name, event| {
            let entry = match event.index() {
                Some(index) => format!("{name}@{index}"),
                None => name.to_string(),
            };
            sink.borrow_mut().push(entry);
        });
        log
    }

    fn assert_indexed(set: &RecordSet) {
        let state = set.inner.state.borrow();
        assert_eq!(state.by_client_id.len(), state.members.len());
        for record in &state.members {
            assert!(state.by_client_id[record.client_id()].ptr_eq(record));
            if let Some(id) = record.id_key() {
                assert!(state.by_id[&id].ptr_eq(record));
            }
        }
        assert!(state.by_id.len() <= state.members.len());
        assert_eq!(state.id_keys.len(), state.by_id.len());
    }

    #[test]
    fn test_add_builds_records_and_emits_add() {
        let set = todo_set();
        let log = event_log(&set);

        let report = set
            .add(json!([{"id": 1, "title": "a"}, {"title": "b"}]), &Options::default())
            .unwrap();

        assert_eq!(report.added.len(), 2);
        assert_eq!(set.len(), 2);
        assert_eq!(*log.borrow(), vec!["add@0", "add@1"]);
        assert_eq!(set.get(&json!("1")).unwrap().get("title"), Some(json!("a")));
        let second = set.at(1).unwrap();
        assert!(second.collection().unwrap().ptr_eq(&set));
        assert!(set.get_by_client_id(second.client_id().as_str()).is_some());
        assert_indexed(&set);
    }

    #[test]
    fn test_duplicate_ids_in_one_batch_keep_first() {
        let set = todo_set();
        let report = set
            .add(json!([{"id": 5, "v": 1}, {"id": 5, "v": 2}]), &Options::default())
            .unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(set.at(0).unwrap().get("v"), Some(json!(1)));
    }

    #[test]
    fn test_existing_members_are_dropped_silently() {
        let set = todo_set();
        let record = set.record_type().create(attrs(json!({"title": "x"})));
        set.add(&record, &Options::default()).unwrap();
        let log = event_log(&set);

        let report = set.add(&record, &Options::default()).unwrap();
        assert_eq!(report.duplicates, 1);
        assert!(report.added.is_empty());
        assert!(log.borrow().is_empty());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_malformed_candidate_fails_without_mutation() {
        let set = todo_set();
        let result = set.add(json!([{"id": 1}, 42]), &Options::default());

        assert_eq!(result.unwrap_err(), CollectionError::MalformedCandidate("42".into()));
        assert!(set.is_empty());
    }

    #[test]
    fn test_invalid_candidates_are_collected() {
        let kind = RecordType::new("named")
            .with_validator(|a| {
                if a.contains_key("name") {
                    Ok(())
                } else {
                    Err(ValidationError::new("name required"))
                }
            })
            .build();
        let set = RecordSet::new(kind);

        let report = set
            .add(json!([{"name": "ok"}, {"other": 1}]), &Options::default())
            .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(report.invalid.len(), 1);
        assert_eq!(report.invalid[0].error.message(), "name required");
    }

    #[test]
    fn test_add_at_position() {
        let set = todo_set();
        set.add(json!([{"n": 1}, {"n": 3}]), &Options::default()).unwrap();
        let log = event_log(&set);

        set.add(json!({"n": 2}), &Options::default().with_at(1)).unwrap();
        assert_eq!(set.pluck("n"), vec![Some(json!(1)), Some(json!(2)), Some(json!(3))]);
        assert_eq!(*log.borrow(), vec!["add@1"]);
    }

    #[test]
    fn test_comparator_orders_members_and_add_index_is_final() {
        let set = RecordSet::with_comparator(
            RecordType::new("todo").build(),
            Comparator::by_attribute("rank"),
        );
        set.add(json!([{"rank": 3}, {"rank": 1}]), &Options::default()).unwrap();
        let log = event_log(&set);

        set.add(json!({"rank": 2}), &Options::default()).unwrap();
        assert_eq!(
            set.pluck("rank"),
            vec![Some(json!(1)), Some(json!(2)), Some(json!(3))]
        );
        assert_eq!(*log.borrow(), vec!["add@1"]);
    }

    #[test]
    fn test_sort_requires_comparator() {
        let set = todo_set();
        assert_eq!(
            set.sort(&Options::default()),
            Err(CollectionError::MissingComparator)
        );
    }

    #[test]
    fn test_sort_with_full_ordering_emits_reset() {
        let set = todo_set();
        set.add(json!([{"n": 1}, {"n": 2}, {"n": 3}]), &Options::default()).unwrap();
        let log = event_log(&set);

        set.set_comparator(Some(Comparator::by(|a, b| {
            compare_values(&b.get("n").unwrap_or_default(), &a.get("n").unwrap_or_default())
        })));
        set.sort(&Options::default()).unwrap();

        assert_eq!(set.pluck("n"), vec![Some(json!(3)), Some(json!(2)), Some(json!(1))]);
        assert_eq!(*log.borrow(), vec!["reset"]);
    }

    #[test]
    fn test_key_sort_is_stable() {
        let set = RecordSet::with_comparator(
            RecordType::new("todo").build(),
            Comparator::by_attribute("group"),
        );
        set.add(
            json!([
                {"group": 2, "name": "a"},
                {"group": 1, "name": "b"},
                {"group": 2, "name": "c"},
                {"group": 1, "name": "d"}
            ]),
            &Options::default(),
        )
        .unwrap();
        assert_eq!(
            set.pluck("name"),
            vec![Some(json!("b")), Some(json!("d")), Some(json!("a")), Some(json!("c"))]
        );
    }

    #[test]
    fn test_remove_by_every_key_kind() {
        let set = todo_set();
        set.add(json!([{"id": 1}, {"id": 2}, {"id": 3}, {"title": "new"}]), &Options::default())
            .unwrap();
        let log = event_log(&set);
        let fresh = set.at(3).unwrap();
        let third = set.at(2).unwrap();

        set.remove(json!(1), &Options::default());
        set.remove(fresh.client_id().clone(), &Options::default());
        set.remove(&third, &Options::default());
        set.remove("missing", &Options::default());

        assert_eq!(*log.borrow(), vec!["remove@0", "remove@2", "remove@1"]);
        assert_eq!(set.len(), 1);
        assert!(third.collection().is_none());
        assert!(set.get(&json!(1)).is_none());
        assert_indexed(&set);

        log.borrow_mut().clear();
        third.set_attr("title", "gone", &Options::default()).unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_reset_emits_single_reset() {
        let set = todo_set();
        set.add(json!([{"id": 1}, {"id": 2}]), &Options::default()).unwrap();
        let old = set.at(0).unwrap();
        let log = event_log(&set);

        let report = set
            .reset(json!([{"id": 3}, {"id": 4}, {"id": 5}]), &Options::default())
            .unwrap();

        assert_eq!(report.added.len(), 3);
        assert_eq!(*log.borrow(), vec!["reset"]);
        assert_eq!(set.len(), 3);
        assert!(old.collection().is_none());
        assert!(set.get(&json!(1)).is_none());
        assert_indexed(&set);

        set.reset(Batch::new(), &Options::silent()).unwrap();
        assert!(set.is_empty());
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_member_events_are_relayed() {
        let set = todo_set();
        set.add(json!({"id": 1, "title": "a"}), &Options::default()).unwrap();
        let log = event_log(&set);

        set.at(0)
            .unwrap()
            .set_attr("title", "b", &Options::default())
            .unwrap();
        assert_eq!(*log.borrow(), vec!["change:title", "change"]);
    }

    #[test]
    fn test_id_change_moves_index_entry() {
        let set = todo_set();
        set.add(json!({"id": 1}), &Options::default()).unwrap();
        let record = set.at(0).unwrap();

        record.set_attr("id", 9, &Options::default()).unwrap();
        assert!(set.get(&json!(1)).is_none());
        assert!(set.get(&json!(9)).unwrap().ptr_eq(&record));
        assert_indexed(&set);
    }

    #[test]
    fn test_remove_after_silent_id_change_drops_old_index_entry() {
        let set = todo_set();
        set.add(json!({"id": 1}), &Options::default()).unwrap();
        let record = set.at(0).unwrap();

        record.set_attr("id", 2, &Options::silent()).unwrap();
        assert!(set.get(&json!(1)).unwrap().ptr_eq(&record));

        set.remove(&record, &Options::default());
        assert!(set.is_empty());
        assert!(set.get(&json!(1)).is_none());
        assert!(set.get(&json!(2)).is_none());
        assert_indexed(&set);
    }

    #[test]
    fn test_deferred_id_change_reindexes_from_stored_key() {
        let set = todo_set();
        set.add(json!({"id": 1}), &Options::default()).unwrap();
        let record = set.at(0).unwrap();

        record.set_attr("id", 2, &Options::silent()).unwrap();
        record.change(&Options::default());
        assert!(set.get(&json!(1)).is_none());
        assert!(set.get(&json!(2)).unwrap().ptr_eq(&record));
        assert_indexed(&set);
    }

    #[test]
    fn test_destroy_removes_member() {
        let set = todo_set();
        set.add(json!({"title": "draft"}), &Options::default()).unwrap();
        let log = event_log(&set);
        let record = set.at(0).unwrap();

        assert_eq!(record.destroy(&Options::default()), Ok(false));
        assert!(set.is_empty());
        assert_eq!(*log.borrow(), vec!["remove@0", "destroy"]);
    }

    #[test]
    fn test_foreign_add_events_are_ignored() {
        let a = todo_set();
        let b = todo_set();
        a.add(json!({"id": 1}), &Options::default()).unwrap();
        let record = a.at(0).unwrap();
        let log = event_log(&a);

        b.add(&record, &Options::default()).unwrap();
        b.remove(&record, &Options::default());

        assert!(log.borrow().is_empty());
        assert!(record.collection().unwrap().ptr_eq(&a));
        assert!(a.contains(&record));
    }

    #[test]
    fn test_push_pop_unshift_shift() {
        let set = todo_set();
        set.push(json!({"n": 2}), &Options::default()).unwrap();
        set.push(json!({"n": 3}), &Options::default()).unwrap();
        let first = set.unshift(json!({"n": 1}), &Options::default()).unwrap().unwrap();

        assert!(set.at(0).unwrap().ptr_eq(&first));
        assert_eq!(set.pop(&Options::default()).unwrap().get("n"), Some(json!(3)));
        assert_eq!(set.shift(&Options::default()).unwrap().get("n"), Some(json!(1)));
        assert_eq!(set.len(), 1);
        assert!(todo_set().pop(&Options::default()).is_none());
    }

    #[test]
    fn test_where_attrs_pluck_and_to_json() {
        let set = todo_set();
        set.add(
            json!([{"tag": "x", "n": 1}, {"tag": "y", "n": 2}, {"tag": "x", "n": 3}]),
            &Options::default(),
        )
        .unwrap();

        let xs = set.where_attrs(&attrs(json!({"tag": "x"})));
        assert_eq!(xs.len(), 2);
        assert!(set.where_attrs(&Attributes::new()).is_empty());
        assert_eq!(set.pluck("missing"), vec![None, None, None]);
        assert_eq!(set.to_json()[1], json!({"tag": "y", "n": 2}));
    }

    struct ListStore {
        reads: Cell<usize>,
    }

    impl crate::sync::Persistence for ListStore {
        fn sync(
            &self,
            method: SyncMethod,
            target: SyncTarget<'_>,
            _options: &Options,
        ) -> Result<Option<Value>, SyncError> {
            match (method, target) {
                (SyncMethod::Read, SyncTarget::Set(_)) => {
                    self.reads.set(self.reads.get() + 1);
                    Ok(Some(json!([{"id": 1}, {"id": 2}])))
                }
                (SyncMethod::Create, SyncTarget::Record(_)) => Ok(Some(json!({"id": 10}))),
                _ => Err(SyncError::Failed("unsupported".into())),
            }
        }
    }

    #[test]
    fn test_fetch_resets_from_hook() {
        let store = Rc::new(ListStore { reads: Cell::new(0) });
        let set = RecordSet::new(RecordType::new("todo").with_persistence(store.clone()).build());
        set.add(json!({"id": 99}), &Options::default()).unwrap();
        let log = event_log(&set);

        set.fetch(&Options::default()).unwrap();
        assert_eq!(store.reads.get(), 1);
        assert_eq!(set.pluck("id"), vec![Some(json!(1)), Some(json!(2))]);
        assert_eq!(*log.borrow(), vec!["reset"]);
    }

    #[test]
    fn test_fetch_without_hook_emits_error() {
        let set = todo_set();
        let log = event_log(&set);

        assert_eq!(
            set.fetch(&Options::default()).unwrap_err(),
            RecordError::Sync(SyncError::NoPersistence)
        );
        assert_eq!(*log.borrow(), vec!["error"]);
    }

    #[test]
    fn test_create_adds_and_saves() {
        let store = Rc::new(ListStore { reads: Cell::new(0) });
        let set = RecordSet::new(RecordType::new("todo").with_persistence(store).build());

        let record = set
            .create(json!({"title": "new"}), &Options::default().with_wait())
            .unwrap()
            .unwrap();
        assert_eq!(record.id(), Some(json!(10)));
        assert!(set.get(&json!(10)).unwrap().ptr_eq(&record));
        assert_indexed(&set);
    }
}
