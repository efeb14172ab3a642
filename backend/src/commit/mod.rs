//! Commit Executor: persist the caller-approved subset of a preview.
//!
//! # Eligibility
//!
//! | Status              | Outcome                                              |
//! |---------------------|------------------------------------------------------|
//! | `invalid`           | never attempted, never counted                       |
//! | `valid` / `warning` | created                                              |
//! | `duplicate`         | skipped if `skipDuplicates`, else updated when       |
//! |                     | `updateExisting` and a target exists, else skipped   |
//!
//! Duplicates are never created. A `file` duplicate whose first occurrence
//! was invalid, deselected or failed has no target and is skipped.
//!
//! A row-level store error (conflict, rejection) is recorded against the row
//! and the batch continues. Any other store error rolls the whole
//! transaction back and is returned as a [`CommitError`].

use std::collections::HashMap;
use uuid::Uuid;

use crate::api::logs::{log_info, log_success, log_warning};
use crate::dedup::{identity_of, StoreIndex};
use crate::error::{CommitError, CommitResult, StoreError};
use crate::models::{CommitSelection, DuplicateKind, EntityKind, ImportResult, ImportRow, ImportRowStatus};
use crate::schema::IdentitySpec;
use crate::store::{NewRecord, RecordStore};

/// Where committed rows go.
#[derive(Debug, Clone, Copy)]
pub struct CommitTarget<'a> {
    pub entity: EntityKind,
    pub scope: &'a str,
    pub identity: &'a IdentitySpec,
}

/// What happened to one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowAction {
    Created(Uuid),
    Updated(Uuid),
    Skipped,
}

/// Number of rows a selection will attempt.
pub fn eligible_count(rows: &[ImportRow], selection: &CommitSelection) -> usize {
    rows.iter().filter(|r| selection.is_eligible(r)).count()
}

/// Write the eligible rows inside one store transaction.
pub fn execute_commit<S: RecordStore + ?Sized>(
    rows: &[ImportRow],
    selection: &CommitSelection,
    target: CommitTarget<'_>,
    store: &mut S,
) -> CommitResult<ImportResult> {
    let eligible: Vec<&ImportRow> = rows.iter().filter(|r| selection.is_eligible(r)).collect();
    log_info(format!(
        "💾 Committing {} of {} rows to {} '{}'",
        eligible.len(),
        rows.len(),
        target.entity,
        target.scope
    ));

    let existing = store
        .records_in_scope(target.entity, target.scope)
        .map_err(|source| CommitError::Infrastructure {
            row_number: None,
            source,
        })?;
    let index = StoreIndex::build(&existing, target.identity);

    store.begin().map_err(|source| CommitError::Infrastructure {
        row_number: None,
        source,
    })?;

    let mut result = ImportResult::default();
    let mut written: HashMap<String, Uuid> = HashMap::new();

    for row in eligible {
        match apply_row(row, selection, target, &index, &written, store) {
            Ok(action) => {
                match action {
                    RowAction::Created(_) => result.created += 1,
                    RowAction::Updated(_) => result.updated += 1,
                    RowAction::Skipped => result.skipped += 1,
                }
                if let RowAction::Created(id) | RowAction::Updated(id) = action {
                    if let Some(key) = identity_of(&row.canonical_data, target.identity).key {
                        written.entry(key).or_insert(id);
                    }
                }
            }
            Err(err) if err.is_row_level() => {
                log_warning(format!("Row {}: {}", row.row_number, err));
                result.record_failure(row.row_number, err.to_string());
            }
            Err(err) => return Err(abort(store, Some(row.row_number), err)),
        }
    }

    if let Err(err) = store.commit() {
        return Err(abort(store, None, err));
    }

    result.success = result.failed == 0;
    log_success(format!(
        "Created {}, updated {}, skipped {}, failed {}",
        result.created, result.updated, result.skipped, result.failed
    ));
    Ok(result)
}

fn apply_row<S: RecordStore + ?Sized>(
    row: &ImportRow,
    selection: &CommitSelection,
    target: CommitTarget<'_>,
    index: &StoreIndex,
    written: &HashMap<String, Uuid>,
    store: &mut S,
) -> Result<RowAction, StoreError> {
    let identity = identity_of(&row.canonical_data, target.identity);

    let existing_id = match (&row.status, &row.duplicate_info) {
        (ImportRowStatus::Duplicate, _) if selection.skip_duplicates => return Ok(RowAction::Skipped),
        (ImportRowStatus::Duplicate, Some(info)) => match info.kind {
            DuplicateKind::Database => {
                let id = info.matched_record_id.as_deref().unwrap_or_default();
                Some(Uuid::parse_str(id).map_err(|_| StoreError::NotFound(id.to_string()))?)
            }
            DuplicateKind::File => identity.key.as_deref().and_then(|key| {
                written
                    .get(key)
                    .copied()
                    .or_else(|| index.by_key(key).and_then(|r| Uuid::parse_str(&r.id).ok()))
            }),
        },
        _ => None,
    };

    match existing_id {
        Some(id) if selection.update_existing => {
            store.update(id, row.canonical_data.clone(), identity.key)?;
            Ok(RowAction::Updated(id))
        }
        Some(_) => Ok(RowAction::Skipped),
        // First occurrence never written
        None if row.status == ImportRowStatus::Duplicate => Ok(RowAction::Skipped),
        None => {
            let created = store.create(NewRecord {
                entity: target.entity,
                scope: target.scope.to_string(),
                fields: row.canonical_data.clone(),
                identity_key: identity.key,
            })?;
            Ok(RowAction::Created(created.id))
        }
    }
}

/// Roll back after an infrastructure failure.
fn abort<S: RecordStore + ?Sized>(store: &mut S, row_number: Option<usize>, source: StoreError) -> CommitError {
    log::error!("Commit aborted: {}", source);
    match store.rollback() {
        Ok(()) => CommitError::Infrastructure { row_number, source },
        Err(rollback) => CommitError::RollbackFailed {
            cause: source.to_string(),
            rollback,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CanonicalData, DuplicateInfo, FieldIssue, RawRow};
    use crate::schema::EntitySchema;
    use crate::store::{MemoryStore, StoredRecord};
    use serde_json::json;

    /// Fails the n-th `create` call (1-based) with the given error.
    struct FlakyStore {
        inner: MemoryStore,
        calls: usize,
        fail_on: usize,
        error: fn() -> StoreError,
    }

    impl FlakyStore {
        fn new(fail_on: usize, error: fn() -> StoreError) -> Self {
            Self {
                inner: MemoryStore::new(),
                calls: 0,
                fail_on,
                error,
            }
        }
    }

    impl RecordStore for FlakyStore {
        fn records_in_scope(&self, entity: EntityKind, scope: &str) -> crate::error::StoreResult<Vec<StoredRecord>> {
            self.inner.records_in_scope(entity, scope)
        }
        fn begin(&mut self) -> crate::error::StoreResult<()> {
            self.inner.begin()
        }
        fn create(&mut self, record: NewRecord) -> crate::error::StoreResult<StoredRecord> {
            self.calls += 1;
            if self.calls == self.fail_on {
                return Err((self.error)());
            }
            self.inner.create(record)
        }
        fn update(
            &mut self,
            id: Uuid,
            fields: CanonicalData,
            identity_key: Option<String>,
        ) -> crate::error::StoreResult<StoredRecord> {
            self.inner.update(id, fields, identity_key)
        }
        fn commit(&mut self) -> crate::error::StoreResult<()> {
            self.inner.commit()
        }
        fn rollback(&mut self) -> crate::error::StoreResult<()> {
            self.inner.rollback()
        }
    }

    fn member_data(n: usize) -> CanonicalData {
        let mut data = CanonicalData::new();
        data.insert("firstName".into(), json!(format!("Member{}", n)));
        data.insert("lastName".into(), json!("Test"));
        data.insert("email".into(), json!(format!("m{}@example.com", n)));
        data.insert("dailyRate".into(), json!(500));
        data
    }

    fn row(row_number: usize, data: CanonicalData, status: ImportRowStatus, dup: Option<DuplicateInfo>) -> ImportRow {
        ImportRow {
            row_number,
            original_data: RawRow::new(row_number, vec![]),
            canonical_data: data,
            status,
            errors: if status == ImportRowStatus::Invalid {
                vec![FieldIssue::new("email", "bad")]
            } else {
                vec![]
            },
            warnings: vec![],
            duplicate_info: dup,
        }
    }

    fn valid_rows(count: usize) -> Vec<ImportRow> {
        (1..=count)
            .map(|n| row(n, member_data(n), ImportRowStatus::Valid, None))
            .collect()
    }

    fn target(identity: &IdentitySpec) -> CommitTarget<'_> {
        CommitTarget {
            entity: EntityKind::TeamMember,
            scope: "vendor-1",
            identity,
        }
    }

    #[test]
    fn test_partial_failure_is_reported() {
        let identity = EntitySchema::team_member().identity;
        let mut store = FlakyStore::new(7, || StoreError::Conflict("email already taken".into()));

        let result = execute_commit(&valid_rows(10), &CommitSelection::default(), target(&identity), &mut store).unwrap();

        assert_eq!(result.created, 9);
        assert_eq!(result.failed, 1);
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].row_number, 7);
        assert!(result.errors[0].error.contains("email already taken"));
        assert_eq!(store.inner.len(), 9);
    }

    #[test]
    fn test_infrastructure_failure_rolls_back() {
        let identity = EntitySchema::team_member().identity;
        let mut store = FlakyStore::new(4, || StoreError::Unavailable("connection lost".into()));

        let err = execute_commit(&valid_rows(6), &CommitSelection::default(), target(&identity), &mut store).unwrap_err();

        match err {
            CommitError::Infrastructure { row_number, .. } => assert_eq!(row_number, Some(4)),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(store.inner.is_empty());
        assert!(!store.inner.in_transaction());
    }

    #[test]
    fn test_invalid_rows_never_counted() {
        let identity = EntitySchema::team_member().identity;
        let mut store = MemoryStore::new();
        let rows = vec![
            row(2, member_data(2), ImportRowStatus::Valid, None),
            row(3, member_data(3), ImportRowStatus::Invalid, None),
            row(4, member_data(4), ImportRowStatus::Warning, None),
        ];

        let selection = CommitSelection::default();
        let result = execute_commit(&rows, &selection, target(&identity), &mut store).unwrap();

        assert_eq!(result.created, 2);
        assert_eq!(result.attempted(), eligible_count(&rows, &selection));
        assert!(result.success);
    }

    #[test]
    fn test_duplicate_policies() {
        let identity = EntitySchema::team_member().identity;
        let existing = StoredRecord::new(EntityKind::TeamMember, "vendor-1", member_data(1), Some("m1@example.com".into()));
        let existing_id = existing.id;

        let rows = || {
            let mut data = member_data(1);
            data.insert("role".into(), json!("Lead"));
            vec![
                row(2, data, ImportRowStatus::Duplicate, Some(DuplicateInfo::in_store(existing_id.to_string(), None))),
                row(3, member_data(3), ImportRowStatus::Valid, None),
            ]
        };

        // Skip duplicates
        let mut store = MemoryStore::with_records(vec![existing.clone()]);
        let result = execute_commit(&rows(), &CommitSelection::default(), target(&identity), &mut store).unwrap();
        assert_eq!((result.created, result.updated, result.skipped), (1, 0, 1));

        // Include duplicates, keep existing
        let mut store = MemoryStore::with_records(vec![existing.clone()]);
        let selection = CommitSelection {
            skip_duplicates: false,
            update_existing: false,
            row_numbers: None,
        };
        let result = execute_commit(&rows(), &selection, target(&identity), &mut store).unwrap();
        assert_eq!((result.created, result.updated, result.skipped), (1, 0, 1));

        // Include duplicates, update existing
        let mut store = MemoryStore::with_records(vec![existing]);
        let selection = CommitSelection {
            skip_duplicates: false,
            update_existing: true,
            row_numbers: None,
        };
        let result = execute_commit(&rows(), &selection, target(&identity), &mut store).unwrap();
        assert_eq!((result.created, result.updated, result.skipped), (1, 1, 0));
        assert_eq!(store.get(existing_id).unwrap().fields["role"], json!("Lead"));
    }

    #[test]
    fn test_duplicate_of_unwritten_row_is_never_created() {
        let identity = EntitySchema::team_member().identity;
        let rows = vec![
            row(2, member_data(1), ImportRowStatus::Invalid, None),
            row(3, member_data(1), ImportRowStatus::Duplicate, Some(DuplicateInfo::in_file(2, None))),
            row(4, member_data(4), ImportRowStatus::Valid, None),
        ];

        for update_existing in [false, true] {
            let mut store = MemoryStore::new();
            let selection = CommitSelection {
                skip_duplicates: false,
                update_existing,
                row_numbers: None,
            };

            let result = execute_commit(&rows, &selection, target(&identity), &mut store).unwrap();

            assert_eq!((result.created, result.updated, result.skipped), (1, 0, 1));
            assert_eq!(store.len(), 1);
            assert_eq!(store.all()[0].fields["email"], json!("m4@example.com"));
        }
    }

    #[test]
    fn test_update_moves_identity_key() {
        let identity = EntitySchema::team_member().identity;
        let existing = StoredRecord::new(EntityKind::TeamMember, "vendor-1", member_data(1), Some("m1@example.com".into()));
        let existing_id = existing.id;
        let mut store = MemoryStore::with_records(vec![existing]);

        // Matched by name, new email
        let mut renamed = member_data(1);
        renamed.insert("email".into(), json!("m9@example.com"));
        let rows = vec![row(2, renamed, ImportRowStatus::Duplicate, Some(DuplicateInfo::in_store(existing_id.to_string(), None)))];
        let selection = CommitSelection {
            skip_duplicates: false,
            update_existing: true,
            row_numbers: None,
        };
        let result = execute_commit(&rows, &selection, target(&identity), &mut store).unwrap();
        assert_eq!(result.updated, 1);
        assert_eq!(store.get(existing_id).unwrap().identity_key.as_deref(), Some("m9@example.com"));

        let records = store.records_in_scope(EntityKind::TeamMember, "vendor-1").unwrap();
        let index = StoreIndex::build(&records, &identity);
        assert!(index.by_key("m1@example.com").is_none());
        assert!(index.by_key("m9@example.com").is_some());

        // The freed email can be taken by someone else
        let mut newcomer = member_data(2);
        newcomer.insert("email".into(), json!("m1@example.com"));
        let rows = vec![row(3, newcomer, ImportRowStatus::Valid, None)];
        let result = execute_commit(&rows, &CommitSelection::default(), target(&identity), &mut store).unwrap();
        assert_eq!((result.created, result.failed), (1, 0));
    }

    #[test]
    fn test_file_duplicate_updates_first_occurrence() {
        let identity = EntitySchema::team_member().identity;
        let mut store = MemoryStore::new();

        let mut second = member_data(1);
        second.insert("dailyRate".into(), json!(700));
        let rows = vec![
            row(2, member_data(1), ImportRowStatus::Valid, None),
            row(3, second, ImportRowStatus::Duplicate, Some(DuplicateInfo::in_file(2, None))),
        ];
        let selection = CommitSelection {
            skip_duplicates: false,
            update_existing: true,
            row_numbers: None,
        };

        let result = execute_commit(&rows, &selection, target(&identity), &mut store).unwrap();

        assert_eq!((result.created, result.updated), (1, 1));
        let records = store.records_in_scope(EntityKind::TeamMember, "vendor-1").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields["dailyRate"], json!(700));
    }

    #[test]
    fn test_row_selection() {
        let identity = EntitySchema::team_member().identity;
        let mut store = MemoryStore::new();
        let selection = CommitSelection {
            row_numbers: Some(vec![2, 4]),
            ..Default::default()
        };

        let result = execute_commit(&valid_rows(5), &selection, target(&identity), &mut store).unwrap();

        assert_eq!(result.created, 2);
        assert_eq!(store.len(), 2);
    }
}
