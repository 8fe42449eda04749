//! Reference-counted handle tables.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};

#[derive(Debug)]
struct Entry<T> {
    refs: usize,
    object: Arc<T>,
}

/// Maps raw identifiers of one object kind to live objects.
///
/// Each entry counts its outstanding references. The object leaves the table
/// when the count drops to zero; in-flight work that cloned the `Arc` keeps
/// using it until done.
#[derive(Debug)]
pub(crate) struct HandleTable<T> {
    entries: Mutex<HashMap<u64, Entry<T>>>,
    /// Error reported for identifiers that name nothing in this table.
    invalid: Error,
}

impl<T> HandleTable<T> {
    pub fn new(invalid: Error) -> Self {
        Self { entries: Mutex::new(HashMap::new()), invalid }
    }

    /// Register a new object holding one reference.
    pub fn insert(&self, id: u64, object: Arc<T>) {
        self.entries.lock().insert(id, Entry { refs: 1, object });
    }

    pub fn get(&self, id: u64) -> Result<Arc<T>> {
        self.entries.lock().get(&id).map(|entry| Arc::clone(&entry.object)).ok_or(self.invalid)
    }

    pub fn retain(&self, id: u64) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&id).ok_or(self.invalid)?;
        entry.refs += 1;
        Ok(())
    }

    /// Drop one reference. Returns the object once its last reference is gone.
    pub fn release(&self, id: u64) -> Result<Option<Arc<T>>> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&id).ok_or(self.invalid)?;
        entry.refs -= 1;
        if entry.refs > 0 {
            return Ok(None);
        }
        Ok(entries.remove(&id).map(|entry| entry.object))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
