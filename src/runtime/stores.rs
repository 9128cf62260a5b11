use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

/// Type-keyed container for the session's stores.
///
/// Each store type is mounted at most once. Stores can be mounted late and
/// unmounted again; readers use [`SessionStores::try_get`] when absence is a
/// normal state rather than a fault.
#[derive(Clone, Default)]
pub struct SessionStores {
    inner: Arc<RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>>,
}

impl SessionStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount<T>(&self, store: Arc<T>) -> Result<(), StoreError>
    where
        T: Send + Sync + 'static,
    {
        let mut guard = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        let type_id = TypeId::of::<T>();
        if guard.contains_key(&type_id) {
            return Err(StoreError::AlreadyMounted(std::any::type_name::<T>()));
        }
        guard.insert(type_id, Box::new(store));
        Ok(())
    }

    pub fn get<T>(&self) -> Result<Arc<T>, StoreError>
    where
        T: Send + Sync + 'static,
    {
        let guard = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        let boxed = guard
            .get(&TypeId::of::<T>())
            .ok_or(StoreError::NotMounted(std::any::type_name::<T>()))?;
        boxed
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or(StoreError::TypeMismatch)
    }

    pub fn try_get<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.get::<T>().ok()
    }

    pub fn mount_with<T, F>(&self, make: F) -> Result<Arc<T>, StoreError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.try_get::<T>() {
            return Ok(existing);
        }
        let store = Arc::new(make());
        let mut guard = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        // A racing writer may have mounted first; keep whichever landed.
        let entry = guard
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(store.clone()) as Box<dyn Any + Send + Sync>);
        entry
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or(StoreError::TypeMismatch)
    }

    /// Returns the store that was mounted, if any.
    pub fn unmount<T>(&self) -> Result<Option<Arc<T>>, StoreError>
    where
        T: Send + Sync + 'static,
    {
        let mut guard = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        Ok(guard
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast::<Arc<T>>().ok())
            .map(|arc| *arc))
    }

    pub fn is_mounted<T>(&self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.inner
            .read()
            .map(|guard| guard.contains_key(&TypeId::of::<T>()))
            .unwrap_or(false)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store `{0}` already mounted")]
    AlreadyMounted(&'static str),
    #[error("store `{0}` not mounted")]
    NotMounted(&'static str),
    #[error("store type mismatch")]
    TypeMismatch,
    #[error("session stores poisoned")]
    Poisoned,
}
