//! Namespace catalog
//!
//! A `Database` maps namespaces (`"db.collection"`) to shared collection
//! handles. Cursors keep a handle to the database and take short read locks
//! on a collection while they step; writers take the write lock. Callers
//! decide when a cursor yields, so writes only land between a cursor's
//! `prepare_to_yield` and `recover_from_yield`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use super::collection::{Collection, CollectionOptions};
use super::errors::{StorageError, StorageResult};
use super::record::RecordId;
use crate::index::IndexSpec;

/// Shared handle to one collection
pub type CollectionHandle = Arc<RwLock<Collection>>;

/// In-memory catalog of collections.
#[derive(Debug, Default)]
pub struct Database {
    collections: RwLock<HashMap<String, CollectionHandle>>,
    idents: AtomicU64,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_ident(&self) -> u64 {
        self.idents.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn catalog(&self) -> StorageResult<RwLockReadGuard<'_, HashMap<String, CollectionHandle>>> {
        self.collections.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn catalog_mut(&self) -> StorageResult<RwLockWriteGuard<'_, HashMap<String, CollectionHandle>>> {
        self.collections.write().map_err(|_| StorageError::LockPoisoned)
    }

    /// Create a collection explicitly.
    pub fn create_collection(&self, namespace: &str, options: CollectionOptions) -> StorageResult<()> {
        let mut catalog = self.catalog_mut()?;
        if catalog.contains_key(namespace) {
            return Err(StorageError::CollectionExists(namespace.to_string()));
        }
        let collection = Collection::new(namespace, self.next_ident(), options, self.next_ident());
        catalog.insert(namespace.to_string(), Arc::new(RwLock::new(collection)));
        Ok(())
    }

    /// Handle to a collection, if it exists
    pub fn collection(&self, namespace: &str) -> StorageResult<Option<CollectionHandle>> {
        Ok(self.catalog()?.get(namespace).cloned())
    }

    /// Handle to a collection, creating a normal one when missing
    fn collection_or_create(&self, namespace: &str) -> StorageResult<CollectionHandle> {
        if let Some(handle) = self.collection(namespace)? {
            return Ok(handle);
        }
        let mut catalog = self.catalog_mut()?;
        let handle = catalog
            .entry(namespace.to_string())
            .or_insert_with(|| {
                let collection = Collection::new(
                    namespace,
                    self.next_ident(),
                    CollectionOptions::normal(),
                    self.next_ident(),
                );
                Arc::new(RwLock::new(collection))
            })
            .clone();
        Ok(handle)
    }

    fn write(handle: &CollectionHandle) -> StorageResult<RwLockWriteGuard<'_, Collection>> {
        handle.write().map_err(|_| StorageError::LockPoisoned)
    }

    /// Insert a document, creating the collection on first use
    pub fn insert(&self, namespace: &str, document: Value) -> StorageResult<RecordId> {
        let handle = self.collection_or_create(namespace)?;
        let mut collection = Self::write(&handle)?;
        collection.insert(document)
    }

    /// Remove every document for which `filter` returns true.
    ///
    /// Returns the number of removed documents.
    pub fn remove<F>(&self, namespace: &str, filter: F) -> StorageResult<usize>
    where
        F: Fn(&Value) -> bool,
    {
        let Some(handle) = self.collection(namespace)? else {
            return Ok(0);
        };
        let mut collection = Self::write(&handle)?;
        let doomed: Vec<RecordId> = collection
            .iter_natural()
            .filter(|r| filter(&r.document))
            .map(|r| r.id)
            .collect();
        for id in &doomed {
            collection.remove_record(*id)?;
        }
        Ok(doomed.len())
    }

    /// Merge the fields of `set` into every document for which `filter`
    /// returns true. Returns the number of updated documents.
    pub fn update<F>(&self, namespace: &str, filter: F, set: &Value) -> StorageResult<usize>
    where
        F: Fn(&Value) -> bool,
    {
        let fields = set
            .as_object()
            .ok_or_else(|| StorageError::InvalidDocument("update must be an object".into()))?;
        let Some(handle) = self.collection(namespace)? else {
            return Ok(0);
        };
        let mut collection = Self::write(&handle)?;
        let targets: Vec<RecordId> = collection
            .iter_natural()
            .filter(|r| filter(&r.document))
            .map(|r| r.id)
            .collect();
        for id in &targets {
            collection.update_record(*id, fields)?;
        }
        Ok(targets.len())
    }

    /// Build an index, creating the collection on first use.
    ///
    /// Returns false when an index with the same name already exists.
    pub fn ensure_index(&self, namespace: &str, spec: IndexSpec) -> StorageResult<bool> {
        let handle = self.collection_or_create(namespace)?;
        let mut collection = Self::write(&handle)?;
        Ok(collection.ensure_index(spec, self.next_ident()))
    }

    pub fn drop_index(&self, namespace: &str, name: &str) -> StorageResult<()> {
        let handle = self
            .collection(namespace)?
            .ok_or_else(|| StorageError::CollectionNotFound(namespace.to_string()))?;
        let mut collection = Self::write(&handle)?;
        collection.drop_index(name)
    }

    /// Drop a collection. Returns false if it did not exist.
    pub fn drop_collection(&self, namespace: &str) -> StorageResult<bool> {
        Ok(self.catalog_mut()?.remove(namespace).is_some())
    }

    /// Number of documents in a collection (0 when missing)
    pub fn count(&self, namespace: &str) -> StorageResult<usize> {
        match self.collection(namespace)? {
            Some(handle) => {
                let collection = handle.read().map_err(|_| StorageError::LockPoisoned)?;
                Ok(collection.len())
            }
            None => Ok(0),
        }
    }

    /// Namespaces in sorted order
    pub fn namespaces(&self) -> StorageResult<Vec<String>> {
        let mut names: Vec<String> = self.catalog()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
