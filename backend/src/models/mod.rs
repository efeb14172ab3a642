//! Domain models for the Rosterload import pipeline.
//!
//! This module contains the data structures shared by every pipeline stage:
//!
//! - [`RawRow`] - one data line of the uploaded file, keyed by original header
//! - [`HeaderMapping`] - original header to canonical field key
//! - [`ImportRow`] - a row after validation and duplicate classification
//! - [`ImportPreview`] - the read-only result handed to the caller before commit
//! - [`CommitSelection`] - the caller's decision on what to persist
//! - [`ImportResult`] - per-row outcome summary of a commit
//!
//! Everything serializes in camelCase, matching the JSON consumed by the UI.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Canonical field key to coerced value (strings, numbers, ISO dates).
pub type CanonicalData = BTreeMap<String, Value>;

// =============================================================================
// Entity Kind
// =============================================================================

/// Kind of record an upload creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    /// Vendor team member (consultant, contractor).
    TeamMember,
    /// One day of time reported by a team member.
    Timesheet,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::TeamMember, EntityKind::Timesheet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TeamMember => "team-member",
            Self::Timesheet => "timesheet",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "team-member" | "team-members" | "member" | "members" => Ok(Self::TeamMember),
            "timesheet" | "timesheets" | "time-entry" | "time-entries" => Ok(Self::Timesheet),
            other => Err(format!(
                "unknown entity type '{}' (expected team-member or timesheet)",
                other
            )),
        }
    }
}

// =============================================================================
// Raw Rows
// =============================================================================

/// One data line of the uploaded file.
///
/// `row_number` is the spreadsheet line: the header is line 1, so the first
/// data row is 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRow {
    pub row_number: usize,
    /// Original header to cell value, in column order.
    #[serde(with = "ordered_cells")]
    pub cells: Vec<(String, String)>,
}

impl RawRow {
    pub fn new(row_number: usize, cells: Vec<(String, String)>) -> Self {
        Self { row_number, cells }
    }

    /// Cell value for an original header.
    pub fn get(&self, header: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }

    /// True when every cell is blank.
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|(_, v)| v.trim().is_empty())
    }
}

/// Serializes `Vec<(String, String)>` as a JSON object without losing column order.
mod ordered_cells {
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(cells: &[(String, String)], serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(cells.len()))?;
        for (header, value) in cells {
            map.serialize_entry(header, value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<(String, String)>, D::Error> {
        struct CellsVisitor;

        impl<'de> Visitor<'de> for CellsVisitor {
            type Value = Vec<(String, String)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of header to cell value")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut cells = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((header, value)) = access.next_entry::<String, String>()? {
                    cells.push((header, value));
                }
                Ok(cells)
            }
        }

        deserializer.deserialize_map(CellsVisitor)
    }
}

// =============================================================================
// Header Mapping
// =============================================================================

/// How one original header was interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderMappingEntry {
    pub original: String,
    /// Canonical key, or the original header itself when unrecognized.
    pub mapped: String,
    /// Whether `mapped` is a canonical field of the schema.
    pub recognized: bool,
}

impl HeaderMappingEntry {
    /// Original and mapped are identical (informational only).
    pub fn is_unchanged(&self) -> bool {
        self.original == self.mapped
    }
}

/// Mapping of every original header, in file order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderMapping {
    pub entries: Vec<HeaderMappingEntry>,
}

impl HeaderMapping {
    /// Canonical key for an original header, if recognized.
    pub fn canonical_for(&self, original: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.original == original && e.recognized)
            .map(|e| e.mapped.as_str())
    }

    /// Whether any original header maps to the canonical key.
    pub fn is_mapped(&self, canonical: &str) -> bool {
        self.entries.iter().any(|e| e.recognized && e.mapped == canonical)
    }

    /// Headers that were not recognized and will be ignored.
    pub fn ignored(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| !e.recognized)
            .map(|e| e.original.as_str())
    }
}

// =============================================================================
// Row Status and Issues
// =============================================================================

/// Final classification of a previewed row.
///
/// Precedence when several conditions apply:
/// `Invalid` > `Duplicate` > `Warning` > `Valid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportRowStatus {
    Valid,
    Warning,
    Invalid,
    Duplicate,
}

impl ImportRowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Warning => "warning",
            Self::Invalid => "invalid",
            Self::Duplicate => "duplicate",
        }
    }
}

impl FromStr for ImportRowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "valid" => Ok(Self::Valid),
            "warning" | "warnings" => Ok(Self::Warning),
            "invalid" => Ok(Self::Invalid),
            "duplicate" | "duplicates" => Ok(Self::Duplicate),
            other => Err(format!("unknown row status '{}'", other)),
        }
    }
}

/// A problem attached to one field of one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl FieldIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

// =============================================================================
// Duplicates
// =============================================================================

/// Where the colliding record lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateKind {
    /// An already-persisted record.
    Database,
    /// An earlier row of the same upload.
    File,
}

/// Duplicate classification details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateInfo {
    #[serde(rename = "type")]
    pub kind: DuplicateKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_email: Option<String>,
    /// First occurrence in the file (`File` duplicates only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_row_number: Option<usize>,
    /// Persisted record id (`Database` duplicates only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_record_id: Option<String>,
}

impl DuplicateInfo {
    pub fn in_file(first_row: usize, email: Option<String>) -> Self {
        Self {
            kind: DuplicateKind::File,
            matched_email: email,
            matched_row_number: Some(first_row),
            matched_record_id: None,
        }
    }

    pub fn in_store(record_id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            kind: DuplicateKind::Database,
            matched_email: email,
            matched_row_number: None,
            matched_record_id: Some(record_id.into()),
        }
    }
}

// =============================================================================
// Preview
// =============================================================================

/// A row after validation and duplicate classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRow {
    pub row_number: usize,
    pub original_data: RawRow,
    pub canonical_data: CanonicalData,
    pub status: ImportRowStatus,
    pub errors: Vec<FieldIssue>,
    pub warnings: Vec<FieldIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_info: Option<DuplicateInfo>,
}

/// Row counts per status. `valid + invalid + warnings + duplicates == total`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPreviewStats {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub warnings: usize,
    pub duplicates: usize,
}

/// Read-only result of validating and classifying an upload.
///
/// When `missing_required_headers` is non-empty the import is blocked: `rows`
/// is empty and the file has to be corrected and uploaded again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPreview {
    pub file_name: String,
    pub header_mappings: HeaderMapping,
    pub missing_required_headers: Vec<String>,
    pub rows: Vec<ImportRow>,
    pub stats: ImportPreviewStats,
}

impl ImportPreview {
    pub fn is_blocked(&self) -> bool {
        !self.missing_required_headers.is_empty()
    }

    /// Rows with the given status, in file order.
    pub fn rows_with_status(&self, status: ImportRowStatus) -> impl Iterator<Item = &ImportRow> {
        self.rows.iter().filter(move |r| r.status == status)
    }

    /// Number of rows that would be written without any opt-in.
    pub fn importable_count(&self) -> usize {
        self.stats.valid + self.stats.warnings
    }
}

// =============================================================================
// Commit
// =============================================================================

/// Caller decision on which previewed rows to persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSelection {
    /// Leave duplicate rows untouched (counted as skipped).
    #[serde(default = "default_true")]
    pub skip_duplicates: bool,
    /// When duplicates are not skipped, overwrite the matched record.
    #[serde(default)]
    pub update_existing: bool,
    /// Restrict the commit to these row numbers. `None` selects every row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_numbers: Option<Vec<usize>>,
}

fn default_true() -> bool {
    true
}

impl Default for CommitSelection {
    fn default() -> Self {
        Self {
            skip_duplicates: true,
            update_existing: false,
            row_numbers: None,
        }
    }
}

impl CommitSelection {
    pub fn includes(&self, row_number: usize) -> bool {
        match &self.row_numbers {
            Some(numbers) => numbers.contains(&row_number),
            None => true,
        }
    }

    /// Whether a row takes part in the commit at all. Invalid rows never do.
    pub fn is_eligible(&self, row: &ImportRow) -> bool {
        row.status != ImportRowStatus::Invalid && self.includes(row.row_number)
    }
}

/// A row that failed at commit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFailure {
    pub row_number: usize,
    pub error: String,
}

/// Outcome of a commit. `success` is false as soon as one row failed, even
/// when other rows were written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<RowFailure>,
}

impl ImportResult {
    /// Rows that reached an outcome bucket.
    pub fn attempted(&self) -> usize {
        self.created + self.updated + self.skipped + self.failed
    }

    pub fn record_failure(&mut self, row_number: usize, error: impl Into<String>) {
        self.failed += 1;
        self.errors.push(RowFailure {
            row_number,
            error: error.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_row_preserves_column_order() {
        let row = RawRow::new(
            2,
            vec![
                ("Zeta".to_string(), "1".to_string()),
                ("Alpha".to_string(), "2".to_string()),
            ],
        );
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"rowNumber":2,"cells":{"Zeta":"1","Alpha":"2"}}"#);

        let back: RawRow = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cells[0].0, "Zeta");
        assert_eq!(back.get("Alpha"), Some("2"));
    }

    #[test]
    fn test_duplicate_info_wire_format() {
        let info = DuplicateInfo::in_file(2, Some("a@b.com".into()));
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(
            value,
            json!({ "type": "file", "matchedEmail": "a@b.com", "matchedRowNumber": 2 })
        );
    }

    #[test]
    fn test_commit_selection_defaults() {
        let selection: CommitSelection = serde_json::from_value(json!({})).unwrap();
        assert!(selection.skip_duplicates);
        assert!(!selection.update_existing);
        assert!(selection.includes(42));

        let selection: CommitSelection =
            serde_json::from_value(json!({ "rowNumbers": [2, 4] })).unwrap();
        assert!(selection.includes(4));
        assert!(!selection.includes(3));
    }

    #[test]
    fn test_entity_kind_parsing() {
        assert_eq!("team_member".parse::<EntityKind>(), Ok(EntityKind::TeamMember));
        assert_eq!("Timesheets".parse::<EntityKind>(), Ok(EntityKind::Timesheet));
        assert!("invoice".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_result_failure_accounting() {
        let mut result = ImportResult {
            created: 9,
            ..Default::default()
        };
        result.record_failure(7, "store error");
        assert_eq!(result.attempted(), 10);
        assert_eq!(result.errors[0].row_number, 7);
    }
}
