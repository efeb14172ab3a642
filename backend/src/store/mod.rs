//! Record store: the persistence seam the pipeline reads from and commits to.
//!
//! The pipeline only needs scoped reads (to build the duplicate index) and a
//! transaction with per-record create/update. Two implementations ship:
//!
//! - [`MemoryStore`] - in-process, snapshot-based transactions
//! - [`JsonFileStore`] - [`MemoryStore`] persisted as one JSON file per entity
//!
//! # Contract
//!
//! - `create` and `update` are atomic per record: on error nothing changed.
//! - `Conflict`/`Rejected`/`NotFound` errors are row-level; anything else is
//!   an infrastructure failure and the caller rolls the transaction back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{CanonicalData, EntityKind};

pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// A persisted entity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub id: Uuid,
    pub entity: EntityKind,
    /// Parent entity the record belongs to (e.g. vendor id).
    pub scope: String,
    pub fields: CanonicalData,
    /// Normalized identity key enforced unique per `(entity, scope)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn new(
        entity: EntityKind,
        scope: impl Into<String>,
        fields: CanonicalData,
        identity_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            entity,
            scope: scope.into(),
            fields,
            identity_key,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Data for a record to create.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub entity: EntityKind,
    pub scope: String,
    pub fields: CanonicalData,
    pub identity_key: Option<String>,
}

/// Persistence operations used by the pipeline.
pub trait RecordStore {
    /// All records of an entity kind under one scope.
    fn records_in_scope(&self, entity: EntityKind, scope: &str) -> StoreResult<Vec<StoredRecord>>;

    /// Open a transaction.
    fn begin(&mut self) -> StoreResult<()>;

    /// Create one record, stamping its creation time.
    fn create(&mut self, record: NewRecord) -> StoreResult<StoredRecord>;

    /// Overwrite the given fields of an existing record.
    ///
    /// A `Some` identity key replaces the record's key and is held to the
    /// same uniqueness rule as `create`; `None` keeps the current key.
    fn update(&mut self, id: Uuid, fields: CanonicalData, identity_key: Option<String>) -> StoreResult<StoredRecord>;

    /// Make the transaction's writes durable.
    fn commit(&mut self) -> StoreResult<()>;

    /// Discard the transaction's writes.
    fn rollback(&mut self) -> StoreResult<()>;
}

impl<S: RecordStore + ?Sized> RecordStore for Box<S> {
    fn records_in_scope(&self, entity: EntityKind, scope: &str) -> StoreResult<Vec<StoredRecord>> {
        (**self).records_in_scope(entity, scope)
    }

    fn begin(&mut self) -> StoreResult<()> {
        (**self).begin()
    }

    fn create(&mut self, record: NewRecord) -> StoreResult<StoredRecord> {
        (**self).create(record)
    }

    fn update(&mut self, id: Uuid, fields: CanonicalData, identity_key: Option<String>) -> StoreResult<StoredRecord> {
        (**self).update(id, fields, identity_key)
    }

    fn commit(&mut self) -> StoreResult<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> StoreResult<()> {
        (**self).rollback()
    }
}
