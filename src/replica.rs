// Aquaview - Water-quality telemetry core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Durable replica abstraction
//!
//! The replica is a path-addressed JSON tree (`controlState`,
//! `sensor/<kind>`). Writes overwrite the whole value at a path; writing
//! `null` removes it. Observing a path returns its current value, and
//! every later change is reported by [`ReplicaStore::poll_changes`].
//!
//! Two implementations are provided:
//! - [`MemoryStore`]: shareable in-memory tree that echoes its own writes
//!   back as changes, the way hosted realtime databases do, with write
//!   fault injection for tests.
//! - [`FileStore`]: the whole tree in one JSON file, written atomically,
//!   reporting edits made by other processes on observed paths.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::error::StoreError;

/// A change observed at a replica path
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaChange {
    /// Observed path
    pub path: String,
    /// New value, `None` when the path was removed
    pub value: Option<Value>,
}

/// Trait for durable replicas
pub trait ReplicaStore {
    /// Read the value at a path
    fn read(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Overwrite the value at a path
    fn write(&mut self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Start observing a path; returns its current value
    fn observe(&mut self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Changes on observed paths since the previous poll, in order
    fn poll_changes(&mut self) -> Result<Vec<ReplicaChange>, StoreError>;
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// True when one path is the other or lies beneath it, segment by segment
fn overlaps(a: &str, b: &str) -> bool {
    segments(a).zip(segments(b)).all(|(x, y)| x == y)
}

fn lookup<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = tree;
    for segment in segments(path) {
        node = node.as_object()?.get(segment)?;
    }
    (!node.is_null()).then_some(node)
}

fn insert(tree: &mut Value, path: &str, value: Value) {
    let parts: Vec<&str> = segments(path).collect();
    let Some((leaf, parents)) = parts.split_last() else {
        *tree = value;
        return;
    };

    let mut node = tree;
    for part in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => return,
        };
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        if value.is_null() {
            map.remove(*leaf);
        } else {
            map.insert(leaf.to_string(), value);
        }
    }
}

#[derive(Debug)]
struct MemoryStoreState {
    tree: Value,
    observed: BTreeSet<String>,
    changes: VecDeque<ReplicaChange>,
    fail_writes: u32,
    writes: u64,
}

/// In-memory replica
///
/// Cloning yields another handle to the same tree.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Rc<RefCell<MemoryStoreState>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MemoryStoreState {
                tree: Value::Object(Map::new()),
                observed: BTreeSet::new(),
                changes: VecDeque::new(),
                fail_writes: 0,
                writes: 0,
            })),
        }
    }

    /// Reject the next `count` writes
    pub fn fail_next_writes(&self, count: u32) {
        self.state.borrow_mut().fail_writes = count;
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> u64 {
        self.state.borrow().writes
    }

    /// Simulate a write by another client
    pub fn remote_write(&self, path: &str, value: Value) {
        let mut state = self.state.borrow_mut();
        insert(&mut state.tree, path, value);
        Self::queue_changes(&mut state, path);
    }

    fn queue_changes(state: &mut MemoryStoreState, written: &str) {
        let affected: Vec<String> = state
            .observed
            .iter()
            .filter(|p| overlaps(p, written))
            .cloned()
            .collect();
        for path in affected {
            let value = lookup(&state.tree, &path).cloned();
            state.changes.push_back(ReplicaChange { path, value });
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicaStore for MemoryStore {
    fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        Ok(lookup(&self.state.borrow().tree, path).cloned())
    }

    fn write(&mut self, path: &str, value: Value) -> Result<(), StoreError> {
        let mut state = self.state.borrow_mut();
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(StoreError::WriteRejected {
                path: path.to_string(),
                reason: "replica unavailable".to_string(),
            });
        }

        insert(&mut state.tree, path, value);
        state.writes += 1;
        // Own writes are echoed back like any other change
        Self::queue_changes(&mut state, path);
        Ok(())
    }

    fn observe(&mut self, path: &str) -> Result<Option<Value>, StoreError> {
        let mut state = self.state.borrow_mut();
        state.observed.insert(path.to_string());
        Ok(lookup(&state.tree, path).cloned())
    }

    fn poll_changes(&mut self) -> Result<Vec<ReplicaChange>, StoreError> {
        Ok(self.state.borrow_mut().changes.drain(..).collect())
    }
}

/// JSON-file replica
///
/// Local writes re-read the file first so edits made by other processes
/// on other paths are preserved, then replace it atomically.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    tree: Value,
    /// Last value seen per observed path
    observed: BTreeMap<String, Option<Value>>,
}

impl FileStore {
    /// Open (or lazily create) the replica file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let tree = Self::load(&path)?;
        Ok(Self {
            path,
            tree,
            observed: BTreeMap::new(),
        })
    }

    /// Location of the replica file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, err: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            reason: err.to_string(),
        }
    }

    fn load(path: &Path) -> Result<Value, StoreError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };

        if text.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn persist(&self, tree: &Value) -> Result<(), StoreError> {
        let body = serde_json::to_string_pretty(tree)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }
}

impl ReplicaStore for FileStore {
    fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        Ok(lookup(&self.tree, path).cloned())
    }

    fn write(&mut self, path: &str, value: Value) -> Result<(), StoreError> {
        let mut tree = Self::load(&self.path)?;
        insert(&mut tree, path, value);
        self.persist(&tree)?;
        self.tree = tree;

        // Only the written subtree counts as seen; other observed paths
        // still report whatever another process changed there.
        for (observed, last) in self.observed.iter_mut() {
            if overlaps(observed, path) {
                *last = lookup(&self.tree, observed).cloned();
            }
        }
        Ok(())
    }

    fn observe(&mut self, path: &str) -> Result<Option<Value>, StoreError> {
        let current = lookup(&self.tree, path).cloned();
        self.observed.insert(path.to_string(), current.clone());
        Ok(current)
    }

    fn poll_changes(&mut self) -> Result<Vec<ReplicaChange>, StoreError> {
        self.tree = Self::load(&self.path)?;

        let mut changes = Vec::new();
        for (path, last) in self.observed.iter_mut() {
            let current = lookup(&self.tree, path).cloned();
            if current != *last {
                *last = current.clone();
                changes.push(ReplicaChange {
                    path: path.clone(),
                    value: current,
                });
            }
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_insert_and_lookup_nested() {
        let mut tree = json!({});
        insert(&mut tree, "sensor/tds", json!([1, 2]));
        assert_eq!(lookup(&tree, "sensor/tds"), Some(&json!([1, 2])));
        assert_eq!(lookup(&tree, "sensor/turbidity"), None);

        insert(&mut tree, "sensor/tds", Value::Null);
        assert_eq!(lookup(&tree, "sensor/tds"), None);
    }

    #[test]
    fn test_paths_overlap_by_segment() {
        assert!(overlaps("controlState", "controlState"));
        assert!(overlaps("sensor", "sensor/tds"));
        assert!(overlaps("sensor/tds", "sensor"));
        assert!(overlaps("", "controlState"));
        assert!(!overlaps("controlState", "controlStateArchive"));
        assert!(!overlaps("sensor/tds", "sensor/tdsRaw"));
    }

    #[test]
    fn test_memory_store_sibling_prefix_is_silent() {
        let mut store = MemoryStore::new();
        store.observe("controlState").unwrap();

        store.write("controlStateArchive", json!({"hour": "9"})).unwrap();
        assert!(store.poll_changes().unwrap().is_empty());

        store.write("controlState", json!({"hour": "2"})).unwrap();
        let changes = store.poll_changes().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "controlState");
    }

    #[test]
    fn test_memory_store_echoes_writes() {
        let mut store = MemoryStore::new();
        assert_eq!(store.observe("controlState").unwrap(), None);

        store.write("controlState", json!({"hour": "2"})).unwrap();
        let changes = store.poll_changes().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].value, Some(json!({"hour": "2"})));
        assert!(store.poll_changes().unwrap().is_empty());
    }

    #[test]
    fn test_memory_store_unobserved_paths_are_silent() {
        let mut store = MemoryStore::new();
        store.write("sensor/tds", json!([])).unwrap();
        assert!(store.poll_changes().unwrap().is_empty());
        assert_eq!(store.read("sensor/tds").unwrap(), Some(json!([])));
    }

    #[test]
    fn test_memory_store_fault_injection() {
        let mut store = MemoryStore::new();
        store.fail_next_writes(2);
        assert!(store.write("a", json!(1)).is_err());
        assert!(store.write("a", json!(1)).is_err());
        assert!(store.write("a", json!(1)).is_ok());
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("replica.json");

        let mut store = FileStore::open(&file).unwrap();
        assert_eq!(store.read("controlState").unwrap(), None);
        store.write("controlState", json!({"mode": "1"})).unwrap();

        let reopened = FileStore::open(&file).unwrap();
        assert_eq!(
            reopened.read("controlState").unwrap(),
            Some(json!({"mode": "1"}))
        );
    }

    #[test]
    fn test_file_store_reports_external_edits_only() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("replica.json");

        let mut store = FileStore::open(&file).unwrap();
        store.observe("controlState").unwrap();
        store.write("controlState", json!({"hour": "1"})).unwrap();
        assert!(store.poll_changes().unwrap().is_empty());

        let mut other = FileStore::open(&file).unwrap();
        other.write("controlState", json!({"hour": "5"})).unwrap();

        let changes = store.poll_changes().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].value, Some(json!({"hour": "5"})));
    }

    #[test]
    fn test_file_store_write_preserves_foreign_paths() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("replica.json");

        let mut store = FileStore::open(&file).unwrap();
        let mut other = FileStore::open(&file).unwrap();
        other.write("sensor/tds", json!([{"time": "t", "tds": 1}])).unwrap();

        store.write("controlState", json!({})).unwrap();
        let reopened = FileStore::open(&file).unwrap();
        assert!(reopened.read("sensor/tds").unwrap().is_some());
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("replica.json");
        fs::write(&file, "{ nope").unwrap();
        assert!(matches!(
            FileStore::open(&file),
            Err(StoreError::Serialization(_))
        ));
    }
}
