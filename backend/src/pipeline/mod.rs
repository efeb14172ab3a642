//! Two-phase import API: [`preview`] then [`confirm`].
//!
//! ```text
//!            preview()                                   confirm()
//! ┌───────┐  ┌────────┐  ┌─────────┐  ┌───────────┐     ┌──────────────┐
//! │ bytes │─▶│ parser │─▶│ mapping │─▶│ validate  │─┐   │ re-analyse   │
//! └───────┘  └────────┘  └─────────┘  │ + dedup   │ │   │ (store now)  │
//!                                     └───────────┘ │   └──────┬───────┘
//!                                                   ▼          ▼
//!                                           ┌────────────┐ ┌────────┐
//!                                           │  preview   │ │ commit │
//!                                           └────────────┘ └────────┘
//! ```
//!
//! Preview only reads the store. Confirm never trusts the earlier preview:
//! it re-runs mapping, validation and duplicate detection on the parsed file
//! against the store as it is at commit time, then hands the result to the
//! commit executor.
//!
//! # Example
//!
//! ```rust,ignore
//! use rosterload::pipeline::{preview, confirm, ImportContext, PipelineOptions};
//! use rosterload::{EntityKind, EntitySchema, MemoryStore, CommitSelection};
//!
//! let context = ImportContext::new(EntityKind::TeamMember, "vendor-42");
//! let schema = EntitySchema::builtin(context.entity);
//! let mut store = MemoryStore::new();
//!
//! let outcome = preview("team.csv", &bytes, &context, &schema, &store, &PipelineOptions::default())?;
//! println!("{} rows importable", outcome.preview.importable_count());
//!
//! let result = confirm(
//!     "team.csv", &outcome.file, &CommitSelection::default(),
//!     &context, &schema, &mut store, &PipelineOptions::default(),
//! )?;
//! ```

use serde::{Deserialize, Serialize};

use crate::api::logs::{log_info, log_success, log_warning};
use crate::commit::{execute_commit, CommitTarget};
use crate::dedup::{detect_duplicates, MatchStrategy, StoreIndex};
use crate::error::{PipelineError, PipelineResult};
use crate::mapping::map_headers;
use crate::models::{CanonicalData, CommitSelection, EntityKind, ImportPreview, ImportResult};
use crate::parser::{parse_bytes, ParsedFile};
use crate::preview::{build_preview, RowOutcome};
use crate::schema::{EntitySchema, ReportingPeriod};
use crate::store::RecordStore;
use crate::validation::{validate_row, RowValidation};

/// Who the upload is for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportContext {
    pub entity: EntityKind,
    /// Parent entity the records belong to (e.g. vendor id).
    pub scope: String,
    /// Reporting period that bounds period-checked dates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<ReportingPeriod>,
}

impl ImportContext {
    pub fn new(entity: EntityKind, scope: impl Into<String>) -> Self {
        Self {
            entity,
            scope: scope.into(),
            period: None,
        }
    }

    pub fn with_period(mut self, period: ReportingPeriod) -> Self {
        self.period = Some(period);
        self
    }
}

/// Tuning knobs shared by both phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOptions {
    pub match_strategy: MatchStrategy,
}

/// Result of the preview phase.
#[derive(Debug, Clone)]
pub struct PreviewOutcome {
    pub preview: ImportPreview,
    /// Parsed upload, kept server-side for [`confirm`].
    pub file: ParsedFile,
}

/// Parse, map, validate and classify an upload. No store writes.
pub fn preview<S: RecordStore + ?Sized>(
    file_name: &str,
    bytes: &[u8],
    context: &ImportContext,
    schema: &EntitySchema,
    store: &S,
    options: &PipelineOptions,
) -> PipelineResult<PreviewOutcome> {
    check_context(context)?;

    log_info(format!("📖 Reading {}...", file_name));
    let file = parse_bytes(bytes)?;
    log_success(format!(
        "Detected encoding {} and separator '{}', {} rows",
        file.encoding,
        format_delimiter(file.delimiter),
        file.rows.len()
    ));

    let preview = analyse(file_name, &file, context, schema, store, options)?;

    if preview.is_blocked() {
        log_warning(format!(
            "Missing required columns: {}",
            preview.missing_required_headers.join(", ")
        ));
    } else {
        let stats = &preview.stats;
        log_success(format!(
            "{} rows: {} valid, {} warnings, {} invalid, {} duplicates",
            stats.total, stats.valid, stats.warnings, stats.invalid, stats.duplicates
        ));
    }

    Ok(PreviewOutcome { preview, file })
}

/// Re-analyse a previewed file against the current store and commit the
/// selected rows.
pub fn confirm<S: RecordStore + ?Sized>(
    file_name: &str,
    file: &ParsedFile,
    selection: &CommitSelection,
    context: &ImportContext,
    schema: &EntitySchema,
    store: &mut S,
    options: &PipelineOptions,
) -> PipelineResult<ImportResult> {
    check_context(context)?;

    log_info(format!("🔁 Re-validating {} against current records...", file_name));
    let preview = analyse(file_name, file, context, schema, &*store, options)?;
    if preview.is_blocked() {
        return Err(PipelineError::MissingHeaders(preview.missing_required_headers));
    }

    let target = CommitTarget {
        entity: context.entity,
        scope: &context.scope,
        identity: &schema.identity,
    };
    Ok(execute_commit(&preview.rows, selection, target, store)?)
}

/// Mapping, validation, duplicate detection and preview building.
fn analyse<S: RecordStore + ?Sized>(
    file_name: &str,
    file: &ParsedFile,
    context: &ImportContext,
    schema: &EntitySchema,
    store: &S,
    options: &PipelineOptions,
) -> PipelineResult<ImportPreview> {
    let headers = map_headers(&file.headers, schema);
    if !headers.is_complete() {
        return Ok(build_preview(file_name, headers, Vec::new()));
    }

    let validations: Vec<RowValidation> = file
        .rows
        .iter()
        .map(|row| validate_row(row, &headers.mapping, schema, context.period.as_ref()))
        .collect();

    let existing = store.records_in_scope(context.entity, &context.scope)?;
    let index = StoreIndex::build(&existing, &schema.identity);
    log_info(format!("Checking duplicates against {} existing records", index.len()));

    let keyed: Vec<(usize, &CanonicalData)> = file
        .rows
        .iter()
        .zip(&validations)
        .map(|(row, validation)| (row.row_number, &validation.canonical_data))
        .collect();
    let duplicates = detect_duplicates(
        &keyed,
        &context.scope,
        &schema.identity,
        &index,
        options.match_strategy,
    );

    let outcomes = file
        .rows
        .iter()
        .cloned()
        .zip(validations)
        .zip(duplicates)
        .map(|((raw, validation), duplicate)| RowOutcome {
            raw,
            validation,
            duplicate,
        })
        .collect();

    Ok(build_preview(file_name, headers, outcomes))
}

fn check_context(context: &ImportContext) -> PipelineResult<()> {
    if context.scope.trim().is_empty() {
        return Err(PipelineError::MissingScope);
    }
    Ok(())
}

/// Format delimiter for display
fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "\\t".to_string(),
        c => c.to_string(),
    }
}
