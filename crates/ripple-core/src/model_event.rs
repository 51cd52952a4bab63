//! Payload carried by record and record-set events.

use crate::error::RecordError;
use crate::options::Options;
use crate::record::Record;
use crate::record_set::RecordSet;
use serde_json::Value;

/// What a record or record set emits.
///
/// Record sets re-emit their members' events unchanged, so one payload type
/// serves both.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// `"change"`: a broadcast pass over the record's pending changes.
    Change {
        /// The record that changed.
        record: Record,
        /// Options of the call that started the broadcast.
        options: Options,
    },

    /// `"change:<name>"`: one attribute changed.
    Attribute {
        /// The record that changed.
        record: Record,
        /// Attribute name.
        name: String,
        /// Current value (`Null` once unset).
        value: Value,
        /// Options of the originating call.
        options: Options,
    },

    /// `"error"`: validation or persistence failure.
    Error {
        /// The record concerned, when the failure has one.
        record: Option<Record>,
        /// What went wrong.
        error: RecordError,
        /// Options of the failed call.
        options: Options,
    },

    /// `"add"`: a record joined a set.
    Add {
        /// The new member.
        record: Record,
        /// The set it joined.
        set: RecordSet,
        /// Its position after insertion and sorting.
        index: usize,
        /// Options of the `add` call.
        options: Options,
    },

    /// `"remove"`: a record left a set.
    Remove {
        /// The former member.
        record: Record,
        /// The set it left.
        set: RecordSet,
        /// Its position before removal.
        index: usize,
        /// Options of the `remove` call.
        options: Options,
    },

    /// `"reset"`: a set was replaced wholesale or re-sorted.
    Reset {
        /// The set concerned.
        set: RecordSet,
        /// Options of the call.
        options: Options,
    },

    /// `"destroy"`: the record reached the end of its life.
    Destroy {
        /// The destroyed record.
        record: Record,
        /// The set it belonged to at the time, if any.
        set: Option<RecordSet>,
        /// Options of the `destroy` call.
        options: Options,
    },

    /// `"sync"`: the persistence hook confirmed an operation.
    Sync {
        /// The record that was persisted.
        record: Record,
        /// The hook's response (`Null` when it returned nothing).
        response: Value,
        /// Options of the call.
        options: Options,
    },

    /// Application-defined event.
    Custom {
        /// Record the event is about, if any.
        record: Option<Record>,
        /// Free-form data.
        data: Value,
    },
}

impl ModelEvent {
    /// The record the event is about.
    #[must_use]
    pub fn record(&self) -> Option<&Record> {
        match self {
            Self::Change { record, .. }
            | Self::Attribute { record, .. }
            | Self::Add { record, .. }
            | Self::Remove { record, .. }
            | Self::Destroy { record, .. }
            | Self::Sync { record, .. } => Some(record),
            Self::Error { record, .. } | Self::Custom { record, .. } => record.as_ref(),
            Self::Reset { .. } => None,
        }
    }

    /// The set the event names, if any.
    #[must_use]
    pub fn set(&self) -> Option<&RecordSet> {
        match self {
            Self::Add { set, .. } | Self::Remove { set, .. } | Self::Reset { set, .. } => Some(set),
            Self::Destroy { set, .. } => set.as_ref(),
            _ => None,
        }
    }

    /// Options of the originating call.
    #[must_use]
    pub fn options(&self) -> Option<&Options> {
        match self {
            Self::Change { options, .. }
            | Self::Attribute { options, .. }
            | Self::Error { options, .. }
            | Self::Add { options, .. }
            | Self::Remove { options, .. }
            | Self::Reset { options, .. }
            | Self::Destroy { options, .. }
            | Self::Sync { options, .. } => Some(options),
            Self::Custom { .. } => None,
        }
    }

    /// Position carried by `add` and `remove` events.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Add { index, .. } | Self::Remove { index, .. } => Some(*index),
            _ => None,
        }
    }
}
