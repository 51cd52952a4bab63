//! In-memory persistence for the demo.

use ripple_core::{Options, Persistence, SyncError, SyncMethod, SyncTarget};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use tracing::debug;

/// Row store keyed by integer id. Creating assigns the next id.
#[derive(Debug)]
pub struct MemoryStore {
    next_id: Cell<u64>,
    rows: RefCell<BTreeMap<u64, Value>>,
}

impl MemoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(1),
            rows: RefCell::new(BTreeMap::new()),
        }
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.borrow().len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn row_id(target: &SyncTarget<'_>) -> Result<u64, SyncError> {
    let SyncTarget::Record(record) = target else {
        return Err(SyncError::Failed("expected a record".into()));
    };
    record
        .id()
        .and_then(|id| id.as_u64())
        .ok_or_else(|| SyncError::Failed("record has no numeric id".into()))
}

impl Persistence for MemoryStore {
    fn sync(
        &self,
        method: SyncMethod,
        target: SyncTarget<'_>,
        _options: &Options,
    ) -> Result<Option<Value>, SyncError> {
        debug!(method = %method, rows = self.len(), "Store call");
        match method {
            SyncMethod::Create => {
                let SyncTarget::Record(record) = target else {
                    return Err(SyncError::Failed("cannot create a set".into()));
                };
                let id = self.next_id.get();
                self.next_id.set(id + 1);
                let mut row = record.attributes();
                row.insert("id".into(), Value::from(id));
                self.rows.borrow_mut().insert(id, Value::Object(row));
                Ok(Some(serde_json::json!({ "id": id })))
            }
            SyncMethod::Update => {
                let id = row_id(&target)?;
                if let SyncTarget::Record(record) = target {
                    self.rows.borrow_mut().insert(id, record.to_json());
                }
                Ok(None)
            }
            SyncMethod::Delete => {
                let id = row_id(&target)?;
                self.rows
                    .borrow_mut()
                    .remove(&id)
                    .map(|_| None)
                    .ok_or_else(|| SyncError::Failed(format!("no row {id}")))
            }
            SyncMethod::Read => match target {
                SyncTarget::Set(_) => Ok(Some(Value::Array(
                    self.rows.borrow().values().cloned().collect(),
                ))),
                SyncTarget::Record(_) => {
                    let id = row_id(&target)?;
                    Ok(self.rows.borrow().get(&id).cloned())
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_core::{RecordSet, RecordType};
    use serde_json::json;
    use std::rc::Rc;

    #[test]
    fn test_create_update_delete_roundtrip() {
        let store = Rc::new(MemoryStore::new());
        let notes = RecordSet::new(RecordType::new("note").with_persistence(store.clone()).build());

        let note = notes
            .create(json!({"title": "draft"}), &Options::default())
            .unwrap()
            .unwrap();
        assert_eq!(note.id(), Some(json!(1)));
        assert_eq!(store.len(), 1);

        note.save(Some(ripple_core::value::attrs(json!({"title": "final"}))), &Options::default())
            .unwrap();
        notes.fetch(&Options::default()).unwrap();
        assert_eq!(notes.at(0).unwrap().get("title"), Some(json!("final")));

        let fetched = notes.at(0).unwrap();
        assert_eq!(fetched.destroy(&Options::default()), Ok(true));
        assert_eq!(store.len(), 0);
        assert!(notes.is_empty());
    }
}
