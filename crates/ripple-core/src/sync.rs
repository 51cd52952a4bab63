//! Persistence hook and the record helpers built on it.
//!
//! The core never talks to a transport. It calls a [`Persistence`]
//! implementation with the method, the target and the call options, and
//! applies whatever attributes come back.

use crate::error::{RecordError, SyncError};
use crate::events::Events;
use crate::model_event::ModelEvent;
use crate::options::Options;
use crate::record::Record;
use crate::record_set::RecordSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// Operation requested from the persistence hook.
///
/// Serializes as its lower-case name, so hooks can put it on the wire as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMethod {
    /// Persist a new record.
    Create,
    /// Persist changes to an existing record.
    Update,
    /// Delete a persisted record.
    Delete,
    /// Load a record or a whole set.
    Read,
}

impl SyncMethod {
    /// Lower-case method name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Read => "read",
        }
    }
}

impl fmt::Display for SyncMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a persistence call is about.
#[derive(Debug, Clone, Copy)]
pub enum SyncTarget<'a> {
    /// A single record.
    Record(&'a Record),
    /// A whole set (only for [`SyncMethod::Read`]).
    Set(&'a RecordSet),
}

/// The injected persistence function.
///
/// Returns the response body, if any: the attributes to apply for a record
/// call, or an array of attribute objects for a set read.
pub trait Persistence {
    /// Perform `method` on `target`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Failed`] when the backing store rejects the call.
    fn sync(
        &self,
        method: SyncMethod,
        target: SyncTarget<'_>,
        options: &Options,
    ) -> Result<Option<Value>, SyncError>;
}

impl Record {
    fn persistence(&self) -> Option<Rc<dyn Persistence>> {
        self.record_type()
            .persistence()
            .or_else(|| self.collection().and_then(|set| set.record_type().persistence()))
    }

    fn call_persistence(
        &self,
        method: SyncMethod,
        options: &Options,
    ) -> Result<Option<Value>, RecordError> {
        let result = match self.persistence() {
            Some(persistence) => {
                debug!(client_id = %self.client_id(), method = %method, "Persisting record");
                persistence.sync(method, SyncTarget::Record(self), options)
            }
            None => Err(SyncError::NoPersistence),
        };
        result.map_err(|error| {
            let error = RecordError::Sync(error);
            self.report(error.clone(), options);
            error
        })
    }

    fn emit_sync(&self, response: Option<Value>, options: &Options) {
        self.trigger(
            "sync",
            &ModelEvent::Sync {
                record: self.clone(),
                response: response.unwrap_or(Value::Null),
                options: options.clone(),
            },
        );
    }

    /// Load the record through the hook and apply the parsed response.
    ///
    /// # Errors
    ///
    /// Returns the hook's failure or a validation failure of the response.
    pub fn fetch(&self, options: &Options) -> Result<(), RecordError> {
        if let Some(response) = self.call_persistence(SyncMethod::Read, options)? {
            let attrs = self.record_type().parse(response);
            self.set(attrs, options)?;
        }
        Ok(())
    }

    /// Apply `attrs` and persist the record, creating it when it is new.
    ///
    /// With `options.wait` the attributes are only validated up front and the
    /// local state changes once the hook succeeds. Attributes returned by the
    /// hook are applied afterwards and a `"sync"` event fires.
    ///
    /// # Errors
    ///
    /// Returns a validation failure (nothing is persisted) or the hook's
    /// failure.
    pub fn save(
        &self,
        attrs: Option<crate::value::Attributes>,
        options: &Options,
    ) -> Result<(), RecordError> {
        let mut restore = None;

        if let Some(attrs) = &attrs {
            if options.wait {
                self.validate_attributes(attrs, options)?;
                let mut pending = self.attributes();
                pending.extend(attrs.clone());
                restore = Some(self.replace_attributes(pending));
            } else {
                self.set(attrs.clone(), options)?;
            }
        }

        let method = if self.is_new() {
            SyncMethod::Create
        } else {
            SyncMethod::Update
        };
        let result = self.call_persistence(method, options);

        if let Some(current) = restore {
            self.replace_attributes(current);
        }

        let response = result?;
        let mut server = response
            .clone()
            .map(|body| self.record_type().parse(body))
            .unwrap_or_default();
        if options.wait {
            if let Some(mut merged) = attrs {
                merged.extend(server);
                server = merged;
            }
        }

        let apply = Options {
            wait: false,
            ..options.clone()
        };
        self.set(server, &apply)?;
        self.emit_sync(response, options);
        Ok(())
    }

    /// End the record's life.
    ///
    /// A new record only emits `"destroy"` and returns `Ok(false)`. Otherwise
    /// the hook deletes it; `"destroy"` fires before the hook result is
    /// inspected, or only after success with `options.wait`.
    ///
    /// # Errors
    ///
    /// Returns the hook's failure.
    pub fn destroy(&self, options: &Options) -> Result<bool, RecordError> {
        let set = self.collection();
        let fire = || {
            self.trigger(
                "destroy",
                &ModelEvent::Destroy {
                    record: self.clone(),
                    set: set.clone(),
                    options: options.clone(),
                },
            );
        };

        if self.is_new() {
            fire();
            return Ok(false);
        }

        let result = self.call_persistence(SyncMethod::Delete, options);
        if !options.wait {
            fire();
        }
        let response = result?;
        if options.wait {
            fire();
        }
        self.emit_sync(response, options);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_type::RecordType;
    use crate::value::attrs;
    use serde_json::json;
    use std::cell::RefCell;

    /// Persistence fake that records calls and answers from a script.
    #[derive(Default)]
    struct FakeStore {
        calls: RefCell<Vec<SyncMethod>>,
        reply: RefCell<Option<Result<Option<Value>, SyncError>>>,
    }

    impl FakeStore {
        fn replying(reply: Result<Option<Value>, SyncError>) -> Rc<Self> {
            let store = Self::default();
            *store.reply.borrow_mut() = Some(reply);
            Rc::new(store)
        }
    }

    impl Persistence for FakeStore {
        fn sync(
            &self,
            method: SyncMethod,
            _target: SyncTarget<'_>,
            _options: &Options,
        ) -> Result<Option<Value>, SyncError> {
            self.calls.borrow_mut().push(method);
            self.reply.borrow().clone().unwrap_or(Ok(None))
        }
    }

    fn log_events(record: &Record) -> Rc<RefCell<Vec<String>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        record.on_fn("all", move |name, _| sink.borrow_mut().push(name.to_string()));
        log
    }

    #[test]
    fn test_sync_method_serializes_as_name() {
        assert_eq!(serde_json::to_value(SyncMethod::Create).unwrap(), json!("create"));
        let method: SyncMethod = serde_json::from_value(json!("delete")).unwrap();
        assert_eq!(method, SyncMethod::Delete);
        assert_eq!(SyncMethod::Read.to_string(), "read");
    }

    #[test]
    fn test_save_creates_then_updates() {
        let store = FakeStore::replying(Ok(Some(json!({"id": 7}))));
        let kind = RecordType::new("todo")
            .with_persistence(store.clone())
            .build();
        let record = kind.create(attrs(json!({"title": "write"})));
        let log = log_events(&record);

        record.save(None, &Options::default()).unwrap();
        assert_eq!(record.id(), Some(json!(7)));
        assert_eq!(*log.borrow(), vec!["change:id", "change", "sync"]);

        record
            .save(Some(attrs(json!({"title": "ship"}))), &Options::default())
            .unwrap();
        assert_eq!(
            *store.calls.borrow(),
            vec![SyncMethod::Create, SyncMethod::Update]
        );
        assert_eq!(record.get("title"), Some(json!("ship")));
    }

    #[test]
    fn test_save_with_wait_applies_after_success() {
        let store = FakeStore::replying(Err(SyncError::Failed("offline".into())));
        let kind = RecordType::new("todo")
            .with_persistence(store)
            .build();
        let record = kind.create(attrs(json!({"id": 1, "title": "old"})));
        let log = log_events(&record);

        let result = record.save(
            Some(attrs(json!({"title": "new"}))),
            &Options::default().with_wait(),
        );
        assert!(matches!(result, Err(RecordError::Sync(SyncError::Failed(_)))));
        assert_eq!(record.get("title"), Some(json!("old")));
        assert_eq!(*log.borrow(), vec!["error"]);
    }

    #[test]
    fn test_save_with_wait_shows_pending_attributes_to_hook_only() {
        struct Snoop(RefCell<Option<Value>>);
        impl Persistence for Snoop {
            fn sync(
                &self,
                _method: SyncMethod,
                target: SyncTarget<'_>,
                _options: &Options,
            ) -> Result<Option<Value>, SyncError> {
                if let SyncTarget::Record(record) = target {
                    *self.0.borrow_mut() = record.get("title");
                }
                Ok(None)
            }
        }

        let store = Rc::new(Snoop(RefCell::new(None)));
        let kind = RecordType::new("todo")
            .with_persistence(store.clone())
            .build();
        let record = kind.create(attrs(json!({"id": 1, "title": "old"})));
        let log = log_events(&record);

        record
            .save(Some(attrs(json!({"title": "new"}))), &Options::default().with_wait())
            .unwrap();

        assert_eq!(*store.0.borrow(), Some(json!("new")));
        assert_eq!(record.get("title"), Some(json!("new")));
        assert_eq!(record.previous("title"), Some(json!("new")));
        assert_eq!(*log.borrow(), vec!["change:title", "change", "sync"]);
        assert!(!record.has_changed());
    }

    #[test]
    fn test_save_rejects_invalid_attributes_without_calling_hook() {
        let store = FakeStore::replying(Ok(None));
        let kind = RecordType::new("todo")
            .with_validator(|a| {
                if a.get("title") == Some(&json!("")) {
                    Err(crate::error::ValidationError::new("title required"))
                } else {
                    Ok(())
                }
            })
            .with_persistence(store.clone())
            .build();
        let record = kind.create(attrs(json!({"title": "x"})));

        let result = record.save(Some(attrs(json!({"title": ""}))), &Options::default());
        assert!(matches!(result, Err(RecordError::Validation(_))));
        assert!(store.calls.borrow().is_empty());
    }

    #[test]
    fn test_fetch_applies_parsed_response() {
        let store = FakeStore::replying(Ok(Some(json!({"data": {"title": "remote"}}))));
        let kind = RecordType::new("todo")
            .with_parser(|v| v.get("data").cloned().unwrap_or(Value::Null))
            .with_persistence(store)
            .build();
        let record = kind.create(attrs(json!({"id": 3})));

        record.fetch(&Options::default()).unwrap();
        assert_eq!(record.get("title"), Some(json!("remote")));
    }

    #[test]
    fn test_destroy_new_record_only_emits() {
        let record = Record::new(attrs(json!({"title": "draft"})));
        let log = log_events(&record);

        assert_eq!(record.destroy(&Options::default()), Ok(false));
        assert_eq!(*log.borrow(), vec!["destroy"]);
    }

    #[test]
    fn test_destroy_without_hook_reports_error() {
        let record = Record::new(attrs(json!({"id": 4})));
        let log = log_events(&record);

        let result = record.destroy(&Options::default().with_wait());
        assert_eq!(result, Err(RecordError::Sync(SyncError::NoPersistence)));
        assert_eq!(*log.borrow(), vec!["error"]);
    }

    #[test]
    fn test_destroy_persisted_record() {
        let store = FakeStore::replying(Ok(None));
        let kind = RecordType::new("todo")
            .with_persistence(store.clone())
            .build();
        let record = kind.create(attrs(json!({"id": 4})));
        let log = log_events(&record);

        assert_eq!(record.destroy(&Options::default()), Ok(true));
        assert_eq!(*store.calls.borrow(), vec![SyncMethod::Delete]);
        assert_eq!(*log.borrow(), vec!["destroy", "sync"]);
    }
}
