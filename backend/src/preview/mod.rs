//! Preview Builder: fold per-row results into an [`ImportPreview`].
//!
//! Pure aggregation. The status of each row is decided here, once, by
//! [`resolve_status`], and the stats are counted from those statuses, so the
//! per-status views and the totals cannot disagree.

use crate::mapping::MappedHeaders;
use crate::models::{
    DuplicateInfo, ImportPreview, ImportPreviewStats, ImportRow, ImportRowStatus, RawRow,
};
use crate::validation::RowValidation;

/// Everything known about one row before its status is resolved.
#[derive(Debug, Clone)]
pub struct RowOutcome {
    pub raw: RawRow,
    pub validation: RowValidation,
    pub duplicate: Option<DuplicateInfo>,
}

/// `invalid` > `duplicate` > `warning` > `valid`.
pub fn resolve_status(validation: &RowValidation, duplicate: Option<&DuplicateInfo>) -> ImportRowStatus {
    if !validation.errors.is_empty() {
        ImportRowStatus::Invalid
    } else if duplicate.is_some() {
        ImportRowStatus::Duplicate
    } else if !validation.warnings.is_empty() {
        ImportRowStatus::Warning
    } else {
        ImportRowStatus::Valid
    }
}

/// Count rows per status.
pub fn compute_stats(rows: &[ImportRow]) -> ImportPreviewStats {
    rows.iter().fold(
        ImportPreviewStats {
            total: rows.len(),
            ..Default::default()
        },
        |mut stats, row| {
            match row.status {
                ImportRowStatus::Valid => stats.valid += 1,
                ImportRowStatus::Warning => stats.warnings += 1,
                ImportRowStatus::Invalid => stats.invalid += 1,
                ImportRowStatus::Duplicate => stats.duplicates += 1,
            }
            stats
        },
    )
}

/// Build the preview document.
///
/// With missing required headers, rows are dropped: none of them could be
/// classified meaningfully.
pub fn build_preview(file_name: &str, headers: MappedHeaders, outcomes: Vec<RowOutcome>) -> ImportPreview {
    let rows: Vec<ImportRow> = if headers.is_complete() {
        outcomes.into_iter().map(into_import_row).collect()
    } else {
        Vec::new()
    };

    let stats = compute_stats(&rows);

    ImportPreview {
        file_name: file_name.to_string(),
        header_mappings: headers.mapping,
        missing_required_headers: headers.missing_required,
        rows,
        stats,
    }
}

fn into_import_row(outcome: RowOutcome) -> ImportRow {
    let status = resolve_status(&outcome.validation, outcome.duplicate.as_ref());
    let RowValidation {
        canonical_data,
        errors,
        warnings,
    } = outcome.validation;

    ImportRow {
        row_number: outcome.raw.row_number,
        original_data: outcome.raw,
        canonical_data,
        status,
        errors,
        warnings,
        duplicate_info: outcome.duplicate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldIssue, HeaderMapping};

    fn validation(errors: usize, warnings: usize) -> RowValidation {
        RowValidation {
            canonical_data: Default::default(),
            errors: (0..errors).map(|i| FieldIssue::new(format!("e{}", i), "bad")).collect(),
            warnings: (0..warnings).map(|i| FieldIssue::new(format!("w{}", i), "odd")).collect(),
        }
    }

    fn outcome(row_number: usize, errors: usize, warnings: usize, duplicate: bool) -> RowOutcome {
        RowOutcome {
            raw: RawRow::new(row_number, vec![]),
            validation: validation(errors, warnings),
            duplicate: duplicate.then(|| DuplicateInfo::in_file(2, None)),
        }
    }

    fn complete_headers() -> MappedHeaders {
        MappedHeaders {
            mapping: HeaderMapping::default(),
            missing_required: vec![],
        }
    }

    #[test]
    fn test_status_precedence() {
        let dup = DuplicateInfo::in_file(2, None);
        assert_eq!(resolve_status(&validation(1, 1), Some(&dup)), ImportRowStatus::Invalid);
        assert_eq!(resolve_status(&validation(0, 1), Some(&dup)), ImportRowStatus::Duplicate);
        assert_eq!(resolve_status(&validation(0, 1), None), ImportRowStatus::Warning);
        assert_eq!(resolve_status(&validation(0, 0), None), ImportRowStatus::Valid);
    }

    #[test]
    fn test_stats_cover_every_row() {
        let outcomes = vec![
            outcome(2, 0, 0, false),
            outcome(3, 0, 1, false),
            outcome(4, 2, 0, true),
            outcome(5, 0, 0, true),
            outcome(6, 1, 0, false),
        ];
        let preview = build_preview("members.csv", complete_headers(), outcomes);

        let stats = &preview.stats;
        assert_eq!(stats.total, preview.rows.len());
        assert_eq!(stats.valid + stats.invalid + stats.warnings + stats.duplicates, stats.total);
        assert_eq!((stats.valid, stats.warnings, stats.invalid, stats.duplicates), (1, 1, 2, 1));

        // Duplicate rows keep their own issues
        let row4 = &preview.rows[2];
        assert_eq!(row4.status, ImportRowStatus::Invalid);
        assert_eq!(row4.errors.len(), 2);
        assert!(row4.duplicate_info.is_some());

        assert_eq!(preview.rows_with_status(ImportRowStatus::Invalid).count(), stats.invalid);
    }

    #[test]
    fn test_missing_headers_drop_rows() {
        let headers = MappedHeaders {
            mapping: HeaderMapping::default(),
            missing_required: vec!["firstName".into()],
        };
        let preview = build_preview("members.csv", headers, vec![outcome(2, 0, 0, false)]);

        assert!(preview.is_blocked());
        assert!(preview.rows.is_empty());
        assert_eq!(preview.stats, ImportPreviewStats::default());
    }
}
