//! ---
//! cp_section: "01-core-runtime"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Keyed document storage with optimistic versioning."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::{Result, StoreError};

/// Contract a persisted document must satisfy.
///
/// Every persisted entity carries a version field that the store bumps on
/// each successful update; stale writers get [`StoreError::VersionConflict`].
pub trait Document: Clone + Send + Sync + 'static {
    /// Primary key within the collection.
    fn key(&self) -> String;
    /// Current optimistic-concurrency version.
    fn version(&self) -> u64;
    /// Overwrite the version (used by the store only).
    fn set_version(&mut self, version: u64);
}

/// One keyed collection of versioned documents.
pub struct Collection<T: Document> {
    name: &'static str,
    inner: RwLock<HashMap<String, T>>,
}

impl<T: Document> Collection<T> {
    /// Create an empty collection.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Collection name, used in log lines.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Insert a new document. Fails if the key is taken. The stored version
    /// is always 1 regardless of the version carried by `doc`.
    pub fn insert(&self, doc: T) -> Result<T> {
        self.insert_unique(doc, |_| false)
    }

    /// Insert a new document with an additional uniqueness guard evaluated
    /// against every stored document under the write lock. When `conflicts`
    /// matches any existing document the insert is rejected.
    pub fn insert_unique<F>(&self, mut doc: T, conflicts: F) -> Result<T>
    where
        F: Fn(&T) -> bool,
    {
        let key = doc.key();
        let mut inner = self.inner.write();
        if inner.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }
        if inner.values().any(&conflicts) {
            return Err(StoreError::AlreadyExists(key));
        }
        doc.set_version(1);
        inner.insert(key.clone(), doc.clone());
        debug!(collection = self.name, key = %key, "document inserted");
        Ok(doc)
    }

    /// Fetch a snapshot of one document.
    pub fn get(&self, key: &str) -> Option<T> {
        self.inner.read().get(key).cloned()
    }

    /// Compare-and-swap update. Succeeds only when the caller's version
    /// matches the stored version; the stored version is then incremented.
    pub fn update(&self, mut doc: T) -> Result<T> {
        let key = doc.key();
        let mut inner = self.inner.write();
        let stored = inner
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if stored.version() != doc.version() {
            return Err(StoreError::VersionConflict {
                key,
                attempted: doc.version(),
                stored: stored.version(),
            });
        }
        doc.set_version(doc.version() + 1);
        inner.insert(key.clone(), doc.clone());
        Ok(doc)
    }

    /// Remove a document, returning it when present.
    pub fn remove(&self, key: &str) -> Option<T> {
        self.inner.write().remove(key)
    }

    /// Snapshot of every document matching the predicate. Order is
    /// unspecified; callers needing an order must sort.
    pub fn find<F>(&self, predicate: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        self.inner
            .read()
            .values()
            .filter(|doc| predicate(doc))
            .cloned()
            .collect()
    }

    /// Snapshot of every document.
    pub fn all(&self) -> Vec<T> {
        self.inner.read().values().cloned().collect()
    }

    /// Count documents matching the predicate.
    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&T) -> bool,
    {
        self.inner.read().values().filter(|doc| predicate(doc)).count()
    }

    /// Total number of documents.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Doc {
        id: String,
        tag: String,
        version: u64,
    }

    impl Document for Doc {
        fn key(&self) -> String {
            self.id.clone()
        }
        fn version(&self) -> u64 {
            self.version
        }
        fn set_version(&mut self, version: u64) {
            self.version = version;
        }
    }

    fn doc(id: &str, tag: &str) -> Doc {
        Doc {
            id: id.into(),
            tag: tag.into(),
            version: 0,
        }
    }

    #[test]
    fn insert_assigns_version_one() {
        let collection = Collection::new("docs");
        let stored = collection.insert(doc("a", "x")).unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(collection.get("a").unwrap().tag, "x");
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let collection = Collection::new("docs");
        collection.insert(doc("a", "x")).unwrap();
        let err = collection.insert(doc("a", "y")).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn unique_guard_rejects_matching_documents() {
        let collection = Collection::new("docs");
        collection.insert(doc("a", "same")).unwrap();
        let err = collection
            .insert_unique(doc("b", "same"), |existing| existing.tag == "same")
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn update_enforces_compare_and_swap() {
        let collection = Collection::new("docs");
        let stored = collection.insert(doc("a", "x")).unwrap();

        let mut fresh = stored.clone();
        fresh.tag = "y".into();
        let updated = collection.update(fresh).unwrap();
        assert_eq!(updated.version, 2);

        // A writer still holding version 1 must conflict, not overwrite.
        let mut stale = stored;
        stale.tag = "z".into();
        let err = collection.update(stale).unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { stored: 2, .. }));
        assert_eq!(collection.get("a").unwrap().tag, "y");
    }

    #[test]
    fn update_of_missing_document_is_not_found() {
        let collection: Collection<Doc> = Collection::new("docs");
        let err = collection.update(doc("ghost", "x")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn find_filters_documents() {
        let collection = Collection::new("docs");
        collection.insert(doc("a", "x")).unwrap();
        collection.insert(doc("b", "y")).unwrap();
        collection.insert(doc("c", "x")).unwrap();
        assert_eq!(collection.find(|d| d.tag == "x").len(), 2);
        assert_eq!(collection.count(|d| d.tag == "y"), 1);
    }
}
