//! Storage seams for treasury state.
//!
//! Two shapes cover everything the treasury persists:
//! - [`AppendStore`]: append-only records (ledger entries, governance decisions,
//!   completed distributions) with point lookup and time-range queries.
//! - [`SnapshotStore`]: current-state documents keyed by id (beneficiaries,
//!   pending distributions).
//!
//! Both have an in-memory and a file-backed implementation. File-backed stores keep an
//! authoritative in-memory copy and write through to disk before committing in memory.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record in {path} at line {line}: {message}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("record '{0}' already stored")]
    Conflict(String),
}

/// A storable record with a stable id and a timestamp used for range queries.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn record_id(&self) -> &str;
    fn recorded_at(&self) -> DateTime<Utc>;
}

/// Append-only record store.
pub trait AppendStore<R: Record>: Send + Sync {
    /// Append a record. Fails with [`StorageError::Conflict`] on a duplicate id.
    fn append(&mut self, record: R) -> StorageResult<()>;

    /// All records in append order.
    fn all(&self) -> &[R];

    fn get(&self, id: &str) -> Option<&R>;

    /// Records whose timestamp falls inside the inclusive window, in append order.
    fn range(&self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Vec<&R> {
        self.all()
            .iter()
            .filter(|record| in_window(record.recorded_at(), from, to))
            .collect()
    }

    fn last(&self) -> Option<&R> {
        self.all().last()
    }

    fn len(&self) -> usize {
        self.all().len()
    }

    fn is_empty(&self) -> bool {
        self.all().is_empty()
    }

    fn backend_label(&self) -> &'static str;
}

/// Current-state document store keyed by record id.
pub trait SnapshotStore<R: Record>: Send + Sync {
    /// Insert or replace the document for `record.record_id()`.
    fn put(&mut self, record: R) -> StorageResult<()>;

    fn get(&self, id: &str) -> Option<&R>;

    /// All documents ordered by id.
    fn list(&self) -> Vec<&R>;

    fn len(&self) -> usize {
        self.list().len()
    }

    fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    fn backend_label(&self) -> &'static str;
}

pub(crate) fn in_window(
    at: DateTime<Utc>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> bool {
    from.map_or(true, |from| at >= from) && to.map_or(true, |to| at <= to)
}

/// In-memory record log with an id index.
#[derive(Debug, Clone)]
struct RecordLog<R> {
    records: Vec<R>,
    index: HashMap<String, usize>,
}

impl<R: Record> RecordLog<R> {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn ensure_new(&self, id: &str) -> StorageResult<()> {
        if self.index.contains_key(id) {
            return Err(StorageError::Conflict(id.to_string()));
        }
        Ok(())
    }

    fn push(&mut self, record: R) {
        self.index
            .insert(record.record_id().to_string(), self.records.len());
        self.records.push(record);
    }

    fn get(&self, id: &str) -> Option<&R> {
        self.index.get(id).map(|&position| &self.records[position])
    }
}

/// Append store held entirely in process memory.
#[derive(Debug, Clone)]
pub struct MemoryAppendStore<R> {
    log: RecordLog<R>,
}

impl<R: Record> MemoryAppendStore<R> {
    pub fn new() -> Self {
        Self {
            log: RecordLog::new(),
        }
    }
}

impl<R: Record> Default for MemoryAppendStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> AppendStore<R> for MemoryAppendStore<R> {
    fn append(&mut self, record: R) -> StorageResult<()> {
        self.log.ensure_new(record.record_id())?;
        self.log.push(record);
        Ok(())
    }

    fn all(&self) -> &[R] {
        &self.log.records
    }

    fn get(&self, id: &str) -> Option<&R> {
        self.log.get(id)
    }

    fn backend_label(&self) -> &'static str {
        "memory"
    }
}

/// Append store mirrored to a JSON-lines file, one record per line.
///
/// Records are hydrated verbatim on open. Field-level tampering is not rejected here:
/// it surfaces through the owning component's hash verification.
#[derive(Debug)]
pub struct JsonlAppendStore<R> {
    path: PathBuf,
    log: RecordLog<R>,
}

impl<R: Record> JsonlAppendStore<R> {
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let mut log = RecordLog::new();

        if path.exists() {
            let reader = BufReader::new(fs::File::open(&path)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: R = serde_json::from_str(&line).map_err(|e| StorageError::Corrupt {
                    path: path.clone(),
                    line: line_no + 1,
                    message: e.to_string(),
                })?;
                log.ensure_new(record.record_id())
                    .map_err(|e| StorageError::Corrupt {
                        path: path.clone(),
                        line: line_no + 1,
                        message: e.to_string(),
                    })?;
                log.push(record);
            }
        }

        Ok(Self { path, log })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<R: Record> AppendStore<R> for JsonlAppendStore<R> {
    fn append(&mut self, record: R) -> StorageResult<()> {
        self.log.ensure_new(record.record_id())?;

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;

        self.log.push(record);
        Ok(())
    }

    fn all(&self) -> &[R] {
        &self.log.records
    }

    fn get(&self, id: &str) -> Option<&R> {
        self.log.get(id)
    }

    fn backend_label(&self) -> &'static str {
        "file"
    }
}

/// Snapshot store held entirely in process memory.
#[derive(Debug, Clone)]
pub struct MemorySnapshotStore<R> {
    documents: BTreeMap<String, R>,
}

impl<R: Record> MemorySnapshotStore<R> {
    pub fn new() -> Self {
        Self {
            documents: BTreeMap::new(),
        }
    }
}

impl<R: Record> Default for MemorySnapshotStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> SnapshotStore<R> for MemorySnapshotStore<R> {
    fn put(&mut self, record: R) -> StorageResult<()> {
        self.documents.insert(record.record_id().to_string(), record);
        Ok(())
    }

    fn get(&self, id: &str) -> Option<&R> {
        self.documents.get(id)
    }

    fn list(&self) -> Vec<&R> {
        self.documents.values().collect()
    }

    fn len(&self) -> usize {
        self.documents.len()
    }

    fn backend_label(&self) -> &'static str {
        "memory"
    }
}

/// Snapshot store persisted as one JSON document after every mutation.
///
/// Writes go to `<path>.tmp` and are renamed into place.
#[derive(Debug)]
pub struct JsonSnapshotStore<R> {
    path: PathBuf,
    documents: BTreeMap<String, R>,
}

impl<R: Record> JsonSnapshotStore<R> {
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let documents = if path.exists() {
            let bytes = fs::read(&path)?;
            if bytes.is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_slice(&bytes)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self { path, documents })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, documents: &BTreeMap<String, R>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = serde_json::to_vec_pretty(documents)?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, bytes)?;
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }
}

impl<R: Record> SnapshotStore<R> for JsonSnapshotStore<R> {
    fn put(&mut self, record: R) -> StorageResult<()> {
        let mut next = self.documents.clone();
        next.insert(record.record_id().to_string(), record);
        self.persist(&next)?;
        self.documents = next;
        Ok(())
    }

    fn get(&self, id: &str) -> Option<&R> {
        self.documents.get(id)
    }

    fn list(&self) -> Vec<&R> {
        self.documents.values().collect()
    }

    fn len(&self) -> usize {
        self.documents.len()
    }

    fn backend_label(&self) -> &'static str {
        "file"
    }
}

/// Treasury persistence backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Keep all state in process memory only.
    #[default]
    Memory,
    /// Persist logs as JSON lines and snapshots as JSON documents under `dir`.
    File { dir: PathBuf },
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self::File { dir: dir.into() }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File { .. } => "file",
        }
    }

    /// Open the append log called `name` (`<dir>/<name>.jsonl` for file storage).
    pub fn open_append<R: Record>(&self, name: &str) -> StorageResult<Box<dyn AppendStore<R>>> {
        match self {
            Self::Memory => Ok(Box::new(MemoryAppendStore::new())),
            Self::File { dir } => Ok(Box::new(JsonlAppendStore::open(
                dir.join(format!("{name}.jsonl")),
            )?)),
        }
    }

    /// Open the snapshot document called `name` (`<dir>/<name>.json` for file storage).
    pub fn open_snapshot<R: Record>(
        &self,
        name: &str,
    ) -> StorageResult<Box<dyn SnapshotStore<R>>> {
        match self {
            Self::Memory => Ok(Box::new(MemorySnapshotStore::new())),
            Self::File { dir } => Ok(Box::new(JsonSnapshotStore::open(
                dir.join(format!("{name}.json")),
            )?)),
        }
    }
}

/// Memory stores whose writes can be made to fail on demand.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Default)]
    pub(crate) struct FaultSwitch(Arc<AtomicBool>);

    impl FaultSwitch {
        pub(crate) fn fail_writes(&self, fail: bool) {
            self.0.store(fail, Ordering::SeqCst);
        }

        fn check(&self) -> StorageResult<()> {
            if self.0.load(Ordering::SeqCst) {
                return Err(StorageError::Io(io::Error::other("disk full")));
            }
            Ok(())
        }
    }

    #[derive(Debug)]
    pub(crate) struct FaultyAppendStore<R> {
        inner: MemoryAppendStore<R>,
        switch: FaultSwitch,
    }

    impl<R: Record> FaultyAppendStore<R> {
        pub(crate) fn new() -> Self {
            Self {
                inner: MemoryAppendStore::new(),
                switch: FaultSwitch::default(),
            }
        }

        pub(crate) fn switch(&self) -> FaultSwitch {
            self.switch.clone()
        }
    }

    impl<R: Record> AppendStore<R> for FaultyAppendStore<R> {
        fn append(&mut self, record: R) -> StorageResult<()> {
            self.switch.check()?;
            self.inner.append(record)
        }

        fn all(&self) -> &[R] {
            self.inner.all()
        }

        fn get(&self, id: &str) -> Option<&R> {
            self.inner.get(id)
        }

        fn backend_label(&self) -> &'static str {
            "faulty"
        }
    }

    #[derive(Debug)]
    pub(crate) struct FaultySnapshotStore<R> {
        inner: MemorySnapshotStore<R>,
        switch: FaultSwitch,
    }

    impl<R: Record> FaultySnapshotStore<R> {
        pub(crate) fn new() -> Self {
            Self {
                inner: MemorySnapshotStore::new(),
                switch: FaultSwitch::default(),
            }
        }

        pub(crate) fn switch(&self) -> FaultSwitch {
            self.switch.clone()
        }
    }

    impl<R: Record> SnapshotStore<R> for FaultySnapshotStore<R> {
        fn put(&mut self, record: R) -> StorageResult<()> {
            self.switch.check()?;
            self.inner.put(record)
        }

        fn get(&self, id: &str) -> Option<&R> {
            self.inner.get(id)
        }

        fn list(&self) -> Vec<&R> {
            self.inner.list()
        }

        fn backend_label(&self) -> &'static str {
            "faulty"
        }
    }
}
