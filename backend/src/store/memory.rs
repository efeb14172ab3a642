//! In-process record store.

use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

use super::{NewRecord, RecordStore, StoredRecord};
use crate::error::{StoreError, StoreResult};
use crate::models::{CanonicalData, EntityKind};

/// Records held in memory. Transactions snapshot the whole map on `begin`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: HashMap<Uuid, StoredRecord>,
    snapshot: Option<HashMap<Uuid, StoredRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with existing records (bypasses uniqueness checks).
    pub fn with_records(records: impl IntoIterator<Item = StoredRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id, r)).collect(),
            snapshot: None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&StoredRecord> {
        self.records.get(&id)
    }

    /// Every record, oldest first.
    pub fn all(&self) -> Vec<StoredRecord> {
        let mut records: Vec<StoredRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Whether another record in the same entity and scope already holds `key`.
    fn key_taken(&self, entity: EntityKind, scope: &str, key: &str, except: Option<Uuid>) -> bool {
        self.records.values().any(|existing| {
            Some(existing.id) != except
                && existing.entity == entity
                && existing.scope == scope
                && existing.identity_key.as_deref() == Some(key)
        })
    }

    fn conflict(entity: EntityKind, key: &str) -> StoreError {
        StoreError::Conflict(format!("a {} with identity '{}' already exists", entity, key))
    }
}

impl RecordStore for MemoryStore {
    fn records_in_scope(&self, entity: EntityKind, scope: &str) -> StoreResult<Vec<StoredRecord>> {
        let mut records: Vec<StoredRecord> = self
            .records
            .values()
            .filter(|r| r.entity == entity && r.scope == scope)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    fn begin(&mut self) -> StoreResult<()> {
        if self.snapshot.is_some() {
            return Err(StoreError::Transaction("transaction already open".to_string()));
        }
        self.snapshot = Some(self.records.clone());
        Ok(())
    }

    fn create(&mut self, record: NewRecord) -> StoreResult<StoredRecord> {
        if let Some(key) = record.identity_key.as_deref() {
            if self.key_taken(record.entity, &record.scope, key, None) {
                return Err(Self::conflict(record.entity, key));
            }
        }

        let stored = StoredRecord::new(record.entity, record.scope, record.fields, record.identity_key);
        self.records.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn update(&mut self, id: Uuid, fields: CanonicalData, identity_key: Option<String>) -> StoreResult<StoredRecord> {
        let (entity, scope) = self
            .records
            .get(&id)
            .map(|r| (r.entity, r.scope.clone()))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if let Some(key) = identity_key.as_deref() {
            if self.key_taken(entity, &scope, key, Some(id)) {
                return Err(Self::conflict(entity, key));
            }
        }

        let record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.fields.extend(fields);
        if identity_key.is_some() {
            record.identity_key = identity_key;
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    fn commit(&mut self) -> StoreResult<()> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| StoreError::Transaction("no open transaction".to_string()))
    }

    fn rollback(&mut self) -> StoreResult<()> {
        if let Some(snapshot) = self.snapshot.take() {
            self.records = snapshot;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_member(email: &str) -> NewRecord {
        let mut fields = CanonicalData::new();
        fields.insert("email".into(), json!(email));
        NewRecord {
            entity: EntityKind::TeamMember,
            scope: "vendor-1".into(),
            fields,
            identity_key: Some(email.to_string()),
        }
    }

    #[test]
    fn test_create_and_scope_query() {
        let mut store = MemoryStore::new();
        store.create(new_member("a@b.co")).unwrap();

        let mut other_scope = new_member("c@d.co");
        other_scope.scope = "vendor-2".into();
        store.create(other_scope).unwrap();

        let records = store.records_in_scope(EntityKind::TeamMember, "vendor-1").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields["email"], json!("a@b.co"));
        assert!(store.records_in_scope(EntityKind::Timesheet, "vendor-1").unwrap().is_empty());
    }

    #[test]
    fn test_identity_conflict() {
        let mut store = MemoryStore::new();
        store.create(new_member("a@b.co")).unwrap();

        let err = store.create(new_member("a@b.co")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.len(), 1);

        // Same key in another scope is fine
        let mut other = new_member("a@b.co");
        other.scope = "vendor-2".into();
        assert!(store.create(other).is_ok());
    }

    #[test]
    fn test_update_merges_fields() {
        let mut store = MemoryStore::new();
        let created = store.create(new_member("a@b.co")).unwrap();

        let mut fields = CanonicalData::new();
        fields.insert("role".into(), json!("Engineer"));
        let updated = store.update(created.id, fields, None).unwrap();

        assert_eq!(updated.fields["email"], json!("a@b.co"));
        assert_eq!(updated.fields["role"], json!("Engineer"));
        assert!(updated.updated_at >= created.updated_at);
        assert!(matches!(
            store.update(Uuid::new_v4(), CanonicalData::new(), None),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_update_moves_identity_key() {
        let mut store = MemoryStore::new();
        let ada = store.create(new_member("ada@old.org")).unwrap();
        store.create(new_member("bob@b.co")).unwrap();

        let mut fields = CanonicalData::new();
        fields.insert("email".into(), json!("ada@new.org"));
        let updated = store.update(ada.id, fields.clone(), Some("ada@new.org".into())).unwrap();
        assert_eq!(updated.identity_key.as_deref(), Some("ada@new.org"));

        // The old key is free again
        assert!(store.create(new_member("ada@old.org")).is_ok());

        // Re-stating its own key is not a conflict
        assert!(store.update(ada.id, fields, Some("ada@new.org".into())).is_ok());

        // Taking another record's key is
        let err = store.update(ada.id, CanonicalData::new(), Some("bob@b.co".into())).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.get(ada.id).unwrap().identity_key.as_deref(), Some("ada@new.org"));
    }

    #[test]
    fn test_rollback_restores_snapshot() {
        let mut store = MemoryStore::new();
        store.create(new_member("keep@b.co")).unwrap();

        store.begin().unwrap();
        store.create(new_member("drop@b.co")).unwrap();
        assert_eq!(store.len(), 2);
        store.rollback().unwrap();

        assert_eq!(store.len(), 1);
        assert!(!store.in_transaction());
    }

    #[test]
    fn test_transaction_misuse() {
        let mut store = MemoryStore::new();
        assert!(matches!(store.commit(), Err(StoreError::Transaction(_))));

        store.begin().unwrap();
        assert!(matches!(store.begin(), Err(StoreError::Transaction(_))));
        store.commit().unwrap();
    }
}
