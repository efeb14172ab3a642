//! # Rosterload - two-phase CSV import of vendor team members and timesheets
//!
//! Rosterload reconciles a spreadsheet upload with an entity schema, shows a
//! per-row preview, and commits only the rows the caller approves.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌────────────┐   ┌─────────┐
//! │ CSV file │──▶│ Parser  │──▶│  Header  │──▶│ Validator  │──▶│ Preview │
//! │ (bytes)  │   │(enc/sep)│   │  Mapper  │   │ + Dedup    │   │ Builder │
//! └──────────┘   └─────────┘   └──────────┘   └────────────┘   └────┬────┘
//!                                                                    │ confirm
//!                                  ┌─────────────┐   ┌────────────┐  │
//!                                  │ RecordStore │◀──│   Commit   │◀─┘
//!                                  └─────────────┘   │  Executor  │
//!                                                    └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rosterload::{preview, confirm, CommitSelection, EntityKind, EntitySchema,
//!                  ImportContext, MemoryStore, PipelineOptions};
//!
//! let context = ImportContext::new(EntityKind::TeamMember, "vendor-42");
//! let schema = EntitySchema::builtin(context.entity);
//! let mut store = MemoryStore::new();
//! let options = PipelineOptions::default();
//!
//! let outcome = preview("team.csv", &bytes, &context, &schema, &store, &options)?;
//! let result = confirm("team.csv", &outcome.file, &CommitSelection::default(),
//!                      &context, &schema, &mut store, &options)?;
//! println!("created {}, failed {}", result.created, result.failed);
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per concern
//! - [`config`] - Environment configuration
//! - [`models`] - Rows, preview, selection and result models
//! - [`parser`] - CSV decoding with auto-detection
//! - [`schema`] - Entity schemas and CSV templates
//! - [`mapping`] - Header Mapper
//! - [`validation`] - Row Validator
//! - [`dedup`] - Duplicate Detector
//! - [`preview`] - Preview Builder
//! - [`store`] - Record store seam and implementations
//! - [`commit`] - Commit Executor
//! - [`pipeline`] - Two-phase preview / confirm API
//! - [`session`] - Import Orchestrator state machine
//! - [`api`] - HTTP API server

// Core modules
pub mod config;
pub mod error;
pub mod models;

// Reading and reconciling uploads
pub mod mapping;
pub mod parser;
pub mod schema;

// Row analysis
pub mod dedup;
pub mod preview;
pub mod validation;

// Persistence
pub mod commit;
pub mod store;

// Orchestration
pub mod pipeline;
pub mod session;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Errors and config
// =============================================================================

pub use config::AppConfig;
pub use error::{
    CommitError, ConfigError, CsvError, PipelineError, SchemaError, ServerError, SessionError,
    StoreError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    CanonicalData, CommitSelection, DuplicateInfo, DuplicateKind, EntityKind, FieldIssue,
    HeaderMapping, ImportPreview, ImportPreviewStats, ImportResult, ImportRow, ImportRowStatus,
    RawRow,
};

// =============================================================================
// Re-exports - Stages
// =============================================================================

pub use commit::execute_commit;
pub use dedup::{detect_duplicates, MatchStrategy, StoreIndex};
pub use mapping::{map_headers, MappedHeaders};
pub use parser::{parse_bytes, parse_file, ParsedFile};
pub use preview::build_preview;
pub use schema::{EntitySchema, FieldKind, FieldSpec, IdentitySpec, ReportingPeriod};
pub use validation::{parse_date, validate_row};

// =============================================================================
// Re-exports - Pipeline and orchestration
// =============================================================================

pub use pipeline::{confirm, preview, ImportContext, PipelineOptions, PreviewOutcome};
pub use session::{transition, CompleteOutcome, ImportEvent, ImportSession, ImportState};
pub use store::{JsonFileStore, MemoryStore, RecordStore, StoredRecord};

// Server
pub mod server {
    pub use crate::api::server::{router, start_server, AppState};
}
