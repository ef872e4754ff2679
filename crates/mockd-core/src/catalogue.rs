//! Mock catalogue with snapshot semantics
//!
//! Writers serialize behind a mutex, build a fresh immutable snapshot and
//! publish it atomically; readers clone the current `Arc` without blocking
//! writers or each other. Every successful write persists the catalogue to
//! the data directory; persistence failures keep the in-memory state and
//! log a warning — the next successful write reconciles the file.

use crate::model::{Mock, Protocol};
use crate::{Error, Result};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Name of the persisted catalogue file inside the data directory.
pub const CATALOGUE_FILE: &str = "catalogue.json";

/// A mock plus its creation sequence number (match-time tie-breaker).
#[derive(Debug, Clone)]
pub struct StoredMock {
    pub mock: Mock,
    pub seq: u64,
}

/// Immutable view of the catalogue, in creation order.
#[derive(Debug, Default)]
pub struct CatalogueSnapshot {
    mocks: Vec<StoredMock>,
    by_id: HashMap<String, usize>,
}

impl CatalogueSnapshot {
    /// Look up a mock by id.
    pub fn get(&self, id: &str) -> Option<&StoredMock> {
        self.by_id.get(id).map(|&i| &self.mocks[i])
    }

    /// All mocks in creation order, including disabled ones.
    pub fn iter(&self) -> impl Iterator<Item = &StoredMock> {
        self.mocks.iter()
    }

    /// Enabled mocks of one protocol, in creation order.
    pub fn iter_protocol(&self, protocol: Protocol) -> impl Iterator<Item = &StoredMock> {
        self.mocks.iter().filter(move |s| s.mock.enabled && s.mock.protocol == protocol)
    }

    pub fn len(&self) -> usize {
        self.mocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mocks.is_empty()
    }
}

/// Filter for `list`.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub protocol: Option<Protocol>,
    pub workspace: Option<String>,
    pub enabled_only: bool,
}

/// The authoritative mock collection.
pub struct MockCatalogue {
    /// Published snapshot; readers clone the Arc.
    current: RwLock<Arc<CatalogueSnapshot>>,
    /// Serializes writers.
    write_lock: Mutex<u64>,
    data_dir: Option<PathBuf>,
}

impl MockCatalogue {
    /// Catalogue persisting to `data_dir/catalogue.json`. Loads existing
    /// state when the file is present.
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        let catalogue = Self {
            current: RwLock::new(Arc::new(CatalogueSnapshot::default())),
            write_lock: Mutex::new(0),
            data_dir: Some(data_dir.clone()),
        };
        let file = data_dir.join(CATALOGUE_FILE);
        if file.exists() {
            let text = std::fs::read_to_string(&file)?;
            let mocks: Vec<Mock> = serde_json::from_str(&text)?;
            info!(count = mocks.len(), "loaded mock catalogue from {}", file.display());
            catalogue.import_collection(mocks, true)?;
        }
        Ok(catalogue)
    }

    /// Catalogue without persistence (tests, ephemeral runs).
    pub fn in_memory() -> Self {
        Self {
            current: RwLock::new(Arc::new(CatalogueSnapshot::default())),
            write_lock: Mutex::new(0),
            data_dir: None,
        }
    }

    /// Current snapshot; cheap, lock-free for practical purposes.
    pub fn snapshot(&self) -> Arc<CatalogueSnapshot> {
        self.current.read().clone()
    }

    /// Create a mock; fails with `AlreadyExists` on id collision. Empty
    /// ids are replaced with a fresh UUID. Returns the stored mock.
    pub fn create(&self, mut mock: Mock) -> Result<Mock> {
        if mock.id.is_empty() {
            mock.id = uuid::Uuid::new_v4().to_string();
        }
        mock.validate()?;
        let mut seq_guard = self.write_lock.lock();
        let snapshot = self.snapshot();
        if snapshot.get(&mock.id).is_some() {
            return Err(Error::already_exists(format!("mock id {}", mock.id)));
        }
        if mock.created_at.is_none() {
            mock.created_at = Some(Utc::now());
        }
        *seq_guard += 1;
        let mut mocks: Vec<StoredMock> = snapshot.mocks.clone();
        mocks.push(StoredMock { mock: mock.clone(), seq: *seq_guard });
        self.publish(mocks);
        Ok(mock)
    }

    /// Create or replace. An upsert of an existing id keeps its creation
    /// order; a new id behaves like `create`.
    pub fn upsert(&self, mut mock: Mock) -> Result<Mock> {
        if mock.id.is_empty() {
            mock.id = uuid::Uuid::new_v4().to_string();
        }
        mock.validate()?;
        let mut seq_guard = self.write_lock.lock();
        let snapshot = self.snapshot();
        let mut mocks: Vec<StoredMock> = snapshot.mocks.clone();
        match snapshot.by_id.get(&mock.id) {
            Some(&i) => {
                if mock.created_at.is_none() {
                    mock.created_at = mocks[i].mock.created_at;
                }
                mocks[i].mock = mock.clone();
            }
            None => {
                if mock.created_at.is_none() {
                    mock.created_at = Some(Utc::now());
                }
                *seq_guard += 1;
                mocks.push(StoredMock { mock: mock.clone(), seq: *seq_guard });
            }
        }
        self.publish(mocks);
        Ok(mock)
    }

    /// Delete by id; fails with `NotFound`.
    pub fn delete(&self, id: &str) -> Result<Mock> {
        let _guard = self.write_lock.lock();
        let snapshot = self.snapshot();
        let Some(&i) = snapshot.by_id.get(id) else {
            return Err(Error::not_found(format!("mock id {id}")));
        };
        let mut mocks: Vec<StoredMock> = snapshot.mocks.clone();
        let removed = mocks.remove(i);
        self.publish(mocks);
        Ok(removed.mock)
    }

    /// Read one mock (disabled mocks included).
    pub fn get(&self, id: &str) -> Option<Mock> {
        self.snapshot().get(id).map(|s| s.mock.clone())
    }

    /// Set the enabled flag; fails with `NotFound`.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<Mock> {
        let _guard = self.write_lock.lock();
        let snapshot = self.snapshot();
        let Some(&i) = snapshot.by_id.get(id) else {
            return Err(Error::not_found(format!("mock id {id}")));
        };
        let mut mocks: Vec<StoredMock> = snapshot.mocks.clone();
        mocks[i].mock.enabled = enabled;
        let updated = mocks[i].mock.clone();
        self.publish(mocks);
        Ok(updated)
    }

    /// List mocks matching the filter, creation order.
    pub fn list(&self, filter: &ListFilter) -> Vec<Mock> {
        self.snapshot()
            .iter()
            .filter(|s| {
                filter.protocol.is_none_or(|p| s.mock.protocol == p)
                    && filter.workspace.as_ref().is_none_or(|w| s.mock.workspace.as_ref() == Some(w))
                    && (!filter.enabled_only || s.mock.enabled)
            })
            .map(|s| s.mock.clone())
            .collect()
    }

    /// Atomically import a collection. With `replace`, the existing
    /// catalogue is dropped first; otherwise ids must not collide. The
    /// whole import succeeds or nothing changes.
    pub fn import_collection(&self, incoming: Vec<Mock>, replace: bool) -> Result<usize> {
        let mut seq_guard = self.write_lock.lock();
        let snapshot = self.snapshot();
        let mut mocks: Vec<StoredMock> =
            if replace { Vec::new() } else { snapshot.mocks.clone() };
        let mut seen: HashMap<String, ()> =
            mocks.iter().map(|s| (s.mock.id.clone(), ())).collect();

        let count = incoming.len();
        for mut mock in incoming {
            if mock.id.is_empty() {
                mock.id = uuid::Uuid::new_v4().to_string();
            }
            mock.validate()?;
            if seen.insert(mock.id.clone(), ()).is_some() {
                return Err(Error::already_exists(format!("mock id {}", mock.id)));
            }
            if mock.created_at.is_none() {
                mock.created_at = Some(Utc::now());
            }
            *seq_guard += 1;
            mocks.push(StoredMock { mock, seq: *seq_guard });
        }
        self.publish(mocks);
        Ok(count)
    }

    /// Persist unconditionally (used at shutdown).
    pub fn persist(&self) -> Result<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        let mocks: Vec<Mock> = self.snapshot().iter().map(|s| s.mock.clone()).collect();
        let text = serde_json::to_string_pretty(&mocks)?;
        std::fs::write(dir.join(CATALOGUE_FILE), text)?;
        Ok(())
    }

    fn publish(&self, mocks: Vec<StoredMock>) {
        let by_id = mocks.iter().enumerate().map(|(i, s)| (s.mock.id.clone(), i)).collect();
        *self.current.write() = Arc::new(CatalogueSnapshot { mocks, by_id });
        if let Err(e) = self.persist() {
            // Transient: memory state is authoritative, the next
            // successful write reconciles the file.
            warn!("failed to persist mock catalogue: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HttpMatcher, HttpResponseSpec, HttpSpec, MockSpec};
    use std::collections::HashMap as Map;

    fn make_mock(id: &str) -> Mock {
        Mock {
            id: id.to_string(),
            name: id.to_string(),
            enabled: true,
            protocol: Protocol::Http,
            spec: MockSpec::Http(HttpSpec {
                matcher: HttpMatcher { path: Some(format!("/{id}")), ..Default::default() },
                response: HttpResponseSpec {
                    status: 200,
                    headers: Map::new(),
                    body: "ok".to_string(),
                    delay_ms: None,
                    sse: None,
                },
            }),
            priority: 0,
            workspace: None,
            created_at: None,
        }
    }

    #[test]
    fn create_then_list_roundtrips() {
        let catalogue = MockCatalogue::in_memory();
        let created = catalogue.create(make_mock("a")).unwrap();
        assert!(created.created_at.is_some());

        let listed = catalogue.list(&ListFilter::default());
        assert_eq!(listed.len(), 1);

        // Equal under JSON canonicalization, excluding server-assigned
        // timestamps (which create filled in).
        let mut expected = serde_json::to_value(&created).unwrap();
        let mut actual = serde_json::to_value(&listed[0]).unwrap();
        expected.as_object_mut().unwrap().remove("createdAt");
        actual.as_object_mut().unwrap().remove("createdAt");
        assert_eq!(expected, actual);
    }

    #[test]
    fn create_conflict_fails() {
        let catalogue = MockCatalogue::in_memory();
        catalogue.create(make_mock("dup")).unwrap();
        let err = catalogue.create(make_mock("dup")).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[test]
    fn upsert_preserves_creation_order() {
        let catalogue = MockCatalogue::in_memory();
        catalogue.create(make_mock("a")).unwrap();
        catalogue.create(make_mock("b")).unwrap();

        let mut replacement = make_mock("a");
        replacement.name = "renamed".to_string();
        catalogue.upsert(replacement).unwrap();

        let snapshot = catalogue.snapshot();
        let ids: Vec<&str> = snapshot.iter().map(|s| s.mock.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(snapshot.get("a").unwrap().mock.name, "renamed");
        assert_eq!(snapshot.get("a").unwrap().seq, 1);
    }

    #[test]
    fn delete_missing_fails() {
        let catalogue = MockCatalogue::in_memory();
        assert!(matches!(catalogue.delete("nope"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn snapshots_are_stable_across_writes() {
        let catalogue = MockCatalogue::in_memory();
        catalogue.create(make_mock("a")).unwrap();
        let before = catalogue.snapshot();
        catalogue.create(make_mock("b")).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(catalogue.snapshot().len(), 2);
    }

    #[test]
    fn import_replace_is_atomic() {
        let catalogue = MockCatalogue::in_memory();
        catalogue.create(make_mock("old")).unwrap();

        // One bad mock poisons the whole import; existing state survives.
        let mut bad = make_mock("bad");
        if let MockSpec::Http(spec) = &mut bad.spec {
            spec.matcher.path_pattern = Some("(".to_string());
        }
        let result = catalogue.import_collection(vec![make_mock("new"), bad], true);
        assert!(result.is_err());
        assert!(catalogue.get("old").is_some());

        catalogue
            .import_collection(vec![make_mock("n1"), make_mock("n2")], true)
            .unwrap();
        assert!(catalogue.get("old").is_none());
        assert_eq!(catalogue.list(&ListFilter::default()).len(), 2);
    }

    #[test]
    fn persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let catalogue = MockCatalogue::new(dir.path()).unwrap();
            catalogue.create(make_mock("persisted")).unwrap();
        }
        let reloaded = MockCatalogue::new(dir.path()).unwrap();
        assert!(reloaded.get("persisted").is_some());
    }

    #[test]
    fn disabled_filtering() {
        let catalogue = MockCatalogue::in_memory();
        catalogue.create(make_mock("on")).unwrap();
        catalogue.create(make_mock("off")).unwrap();
        catalogue.set_enabled("off", false).unwrap();

        let all = catalogue.list(&ListFilter::default());
        assert_eq!(all.len(), 2);
        let enabled =
            catalogue.list(&ListFilter { enabled_only: true, ..Default::default() });
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, "on");
    }
}
