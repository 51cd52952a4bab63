//! # ripple-core
//!
//! Observable records and record sets for the Ripple runtime.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **EventHub** - Named-event publish/subscribe with an `"all"` wildcard
//! - **Record** - Change-tracked attribute bag with silent/pending changes
//! - **RecordType** - Per-type factory: id attribute, defaults, validator
//! - **RecordSet** - Ordered, deduplicated, optionally sorted set of records
//! - **Persistence** - The injected hook behind fetch/save/destroy
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ RecordType  │────▶│   Record    │────▶│  RecordSet  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │ events            │ relays
//!        ▼                   ▼                   ▼
//! ┌─────────────┐     ┌─────────────────────────────────┐
//! │ Persistence │     │            EventHub             │
//! └─────────────┘     └─────────────────────────────────┘
//! ```
//!
//! Everything here is single-threaded: handles are `Rc`-based and events are
//! delivered synchronously, in order, on the caller's stack.

pub mod error;
pub mod events;
pub mod model_event;
pub mod options;
pub mod record;
pub mod record_set;
pub mod record_type;
pub mod sync;
pub mod value;

pub use error::{CollectionError, RecordError, SyncError, ValidationError};
pub use events::{Callback, ContextId, EventHub, Events, ALL};
pub use model_event::ModelEvent;
pub use options::Options;
pub use record::{ClientId, Record};
pub use record_set::{AddReport, Batch, Candidate, Comparator, Keys, RecordKey, RecordSet, Rejected};
pub use record_type::RecordType;
pub use sync::{Persistence, SyncMethod, SyncTarget};
pub use value::Attributes;
