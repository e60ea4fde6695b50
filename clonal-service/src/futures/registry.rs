// Future Registry
// Maps handle ids to launched tasks for the lifetime of one orchestrator

use crate::error::{ServiceError, ServiceResult};
use crate::futures::handle::{HandleId, TaskHandle};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Registry of every handle created by one orchestrator.
///
/// Entries are written once and read many times, from any thread. The
/// registry is owned by the orchestrator and shared by reference; there is no
/// process-wide instance.
#[derive(Debug, Default)]
pub struct FutureRegistry {
    /// Counter for generating unique ids
    counter: AtomicU64,
    handles: RwLock<HashMap<HandleId, TaskHandle>>,
}

impl FutureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce a fresh id of the form `future_<n>_<name>`
    pub fn allocate_id(&self, name: &str) -> HandleId {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        HandleId::from(format!("future_{}_{}", n, name))
    }

    /// Register a handle under its own id
    pub fn register(&self, handle: TaskHandle) -> ServiceResult<()> {
        let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
        if handles.contains_key(handle.id()) {
            return Err(ServiceError::DuplicateRegistration(handle.id().clone()));
        }
        handles.insert(handle.id().clone(), handle);
        Ok(())
    }

    /// Look up a previously registered handle
    pub fn resolve(&self, id: &HandleId) -> ServiceResult<TaskHandle> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownHandle(id.to_string()))
    }

    /// Forget a handle; later lookups fail with `UnknownHandle`
    pub fn purge(&self, id: &HandleId) -> Option<TaskHandle> {
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn contains(&self, id: &HandleId) -> bool {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// All registered ids, sorted
    pub fn ids(&self) -> Vec<HandleId> {
        let mut ids: Vec<_> = self
            .handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.handles.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
