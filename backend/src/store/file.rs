//! JSON-file record store.
//!
//! Keeps a [`MemoryStore`] in memory and writes one `<entity>.json` document
//! per entity kind on commit, so repeated CLI imports see earlier ones.

use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{MemoryStore, NewRecord, RecordStore, StoredRecord};
use crate::error::StoreResult;
use crate::models::{CanonicalData, EntityKind};

/// Directory where records are stored (relative to current dir)
pub const DEFAULT_STORE_DIR: &str = ".rosterload/store";

/// File-backed store.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    inner: MemoryStore,
}

impl JsonFileStore {
    /// Open a store directory, loading any existing records.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = PathBuf::from(dir.as_ref());
        let mut records: Vec<StoredRecord> = Vec::new();

        for entity in EntityKind::ALL {
            let path = Self::entity_path(&dir, entity);
            if path.exists() {
                let content = fs::read_to_string(&path)?;
                let mut loaded: Vec<StoredRecord> = serde_json::from_str(&content)?;
                log::debug!("Loaded {} {} records from {}", loaded.len(), entity, path.display());
                records.append(&mut loaded);
            }
        }

        Ok(Self {
            dir,
            inner: MemoryStore::with_records(records),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn entity_path(dir: &Path, entity: EntityKind) -> PathBuf {
        dir.join(format!("{}.json", entity))
    }

    /// Write every entity file through a temp file + rename.
    fn persist(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.dir)?;
        let all = self.inner.all();

        for entity in EntityKind::ALL {
            let records: Vec<&StoredRecord> = all.iter().filter(|r| r.entity == entity).collect();
            let path = Self::entity_path(&self.dir, entity);
            if records.is_empty() && !path.exists() {
                continue;
            }

            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, serde_json::to_string_pretty(&records)?)?;
            fs::rename(&tmp, &path)?;
        }
        Ok(())
    }
}

impl RecordStore for JsonFileStore {
    fn records_in_scope(&self, entity: EntityKind, scope: &str) -> StoreResult<Vec<StoredRecord>> {
        self.inner.records_in_scope(entity, scope)
    }

    fn begin(&mut self) -> StoreResult<()> {
        self.inner.begin()
    }

    fn create(&mut self, record: NewRecord) -> StoreResult<StoredRecord> {
        self.inner.create(record)
    }

    fn update(&mut self, id: Uuid, fields: CanonicalData, identity_key: Option<String>) -> StoreResult<StoredRecord> {
        self.inner.update(id, fields, identity_key)
    }

    /// Persist first: a failed write leaves the transaction open for rollback.
    fn commit(&mut self) -> StoreResult<()> {
        self.persist()?;
        self.inner.commit()
    }

    fn rollback(&mut self) -> StoreResult<()> {
        self.inner.rollback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn new_entry(email: &str, date: &str) -> NewRecord {
        let mut fields = CanonicalData::new();
        fields.insert("email".into(), json!(email));
        fields.insert("date".into(), json!(date));
        NewRecord {
            entity: EntityKind::Timesheet,
            scope: "vendor-1".into(),
            fields,
            identity_key: Some(format!("{}|{}", email, date)),
        }
    }

    #[test]
    fn test_commit_persists_across_opens() {
        let dir = tempdir().unwrap();

        let mut store = JsonFileStore::open(dir.path()).unwrap();
        assert!(store.is_empty());
        store.begin().unwrap();
        store.create(new_entry("a@b.co", "2025-03-14")).unwrap();
        store.commit().unwrap();

        assert!(dir.path().join("timesheet.json").exists());
        assert!(!dir.path().join("team-member.json").exists());

        let reopened = JsonFileStore::open(dir.path()).unwrap();
        let records = reopened.records_in_scope(EntityKind::Timesheet, "vendor-1").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity_key.as_deref(), Some("a@b.co|2025-03-14"));
    }

    #[test]
    fn test_rollback_writes_nothing() {
        let dir = tempdir().unwrap();

        let mut store = JsonFileStore::open(dir.path()).unwrap();
        store.begin().unwrap();
        store.create(new_entry("a@b.co", "2025-03-14")).unwrap();
        store.rollback().unwrap();

        assert!(store.is_empty());
        assert!(JsonFileStore::open(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("timesheet.json"), "not json").unwrap();

        assert!(JsonFileStore::open(dir.path()).is_err());
    }
}
