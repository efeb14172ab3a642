//! Import Orchestrator: the upload → preview → importing → complete cycle.
//!
//! ```text
//!            PreviewReady (ok)              ConfirmRequested
//!   ┌────────┐ ─────────────▶ ┌─────────┐ ───────────────▶ ┌───────────┐
//!   │ upload │                │ preview │                  │ importing │
//!   └────────┘ ◀───────────── └─────────┘                  └───────────┘
//!     ▲   │      Cancel          │    ▲                          │
//!     │   └─┐                    └────┘                          │ CommitFinished
//!     │     │ PreviewFailed /    PreviewFailed /                 │ CommitAborted
//!     │     │ blocked preview    not confirmable                 ▼
//!     │     └─▶ (stay, error)    (stay, error)             ┌──────────┐
//!     └────────────────────────── Close ──────────────────  │ complete │
//!                                                           └──────────┘
//! ```
//!
//! [`transition`] is a pure function over immutable states. [`ImportSession`]
//! runs the pipeline effects and feeds their outcome back as events.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::logs::{LogEntry, LogLevel, LOG_BROADCASTER};
use crate::error::SessionError;
use crate::models::{CommitSelection, ImportPreview, ImportResult};
use crate::pipeline::{self, ImportContext, PipelineOptions, PreviewOutcome};
use crate::schema::EntitySchema;
use crate::store::RecordStore;

// =============================================================================
// States and Events
// =============================================================================

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CompleteOutcome {
    /// The commit executor returned, possibly with per-row failures.
    Finished(ImportResult),
    /// Infrastructure failure; the commit was rolled back.
    Aborted { error: String },
}

#[derive(Debug, Clone)]
pub enum ImportState {
    Upload {
        error: Option<String>,
    },
    Preview {
        outcome: Arc<PreviewOutcome>,
        error: Option<String>,
    },
    Importing {
        outcome: Arc<PreviewOutcome>,
        selection: CommitSelection,
    },
    Complete(CompleteOutcome),
}

impl ImportState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Upload { .. } => "upload",
            Self::Preview { .. } => "preview",
            Self::Importing { .. } => "importing",
            Self::Complete(_) => "complete",
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Upload { error } | Self::Preview { error, .. } => error.as_deref(),
            Self::Complete(CompleteOutcome::Aborted { error }) => Some(error.as_str()),
            _ => None,
        }
    }

    /// The preview shown in this state, if any.
    pub fn preview(&self) -> Option<&ImportPreview> {
        match self {
            Self::Preview { outcome, .. } | Self::Importing { outcome, .. } => Some(&outcome.preview),
            _ => None,
        }
    }
}

impl Default for ImportState {
    fn default() -> Self {
        Self::Upload { error: None }
    }
}

#[derive(Debug, Clone)]
pub enum ImportEvent {
    PreviewReady(Arc<PreviewOutcome>),
    PreviewFailed(String),
    ConfirmRequested(CommitSelection),
    CommitFinished(ImportResult),
    CommitAborted(String),
    Cancel,
    Close,
}

impl ImportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PreviewReady(_) => "preview-ready",
            Self::PreviewFailed(_) => "preview-failed",
            Self::ConfirmRequested(_) => "confirm",
            Self::CommitFinished(_) => "commit-finished",
            Self::CommitAborted(_) => "commit-aborted",
            Self::Cancel => "cancel",
            Self::Close => "close",
        }
    }
}

/// A preview can be confirmed when its headers are complete and at least
/// one row is `valid` or `warning`.
pub fn can_confirm(preview: &ImportPreview) -> bool {
    !preview.is_blocked() && preview.importable_count() > 0
}

// =============================================================================
// Transition
// =============================================================================

/// Compute the next state. Never mutates `state`.
pub fn transition(state: &ImportState, event: ImportEvent) -> Result<ImportState, SessionError> {
    use ImportEvent as E;
    use ImportState as S;

    let next = match (state, event) {
        (S::Upload { .. }, E::PreviewReady(outcome)) => match blocked_reason(&outcome.preview) {
            Some(error) => S::Upload { error: Some(error) },
            None => S::Preview { outcome, error: None },
        },
        (S::Upload { .. }, E::PreviewFailed(error)) => S::Upload { error: Some(error) },

        // Re-upload from the preview screen; a failure keeps the current preview
        (S::Preview { outcome: current, .. }, E::PreviewReady(outcome)) => {
            match blocked_reason(&outcome.preview) {
                Some(error) => S::Preview {
                    outcome: current.clone(),
                    error: Some(error),
                },
                None => S::Preview { outcome, error: None },
            }
        }
        (S::Preview { outcome, .. }, E::PreviewFailed(error)) => S::Preview {
            outcome: outcome.clone(),
            error: Some(error),
        },

        (S::Preview { outcome, .. }, E::ConfirmRequested(selection)) => {
            if can_confirm(&outcome.preview) {
                S::Importing {
                    outcome: outcome.clone(),
                    selection,
                }
            } else {
                S::Preview {
                    outcome: outcome.clone(),
                    error: Some("Nothing to import: no valid or warning rows".to_string()),
                }
            }
        }

        (S::Importing { .. }, E::CommitFinished(result)) => S::Complete(CompleteOutcome::Finished(result)),
        (S::Importing { .. }, E::CommitAborted(error)) => S::Complete(CompleteOutcome::Aborted { error }),

        (S::Upload { .. } | S::Preview { .. }, E::Cancel) => S::default(),
        (S::Upload { .. } | S::Preview { .. } | S::Complete(_), E::Close) => S::default(),

        (state, event) => {
            return Err(SessionError::InvalidTransition {
                state: state.name(),
                event: event.name(),
            })
        }
    };

    Ok(next)
}

fn blocked_reason(preview: &ImportPreview) -> Option<String> {
    preview.is_blocked().then(|| {
        format!(
            "Missing required columns: {}",
            preview.missing_required_headers.join(", ")
        )
    })
}

// =============================================================================
// Session Driver
// =============================================================================

/// One caller's import, from upload to result.
#[derive(Debug, Clone)]
pub struct ImportSession {
    id: Uuid,
    schema: EntitySchema,
    options: PipelineOptions,
    context: Option<ImportContext>,
    state: ImportState,
    created_at: DateTime<Utc>,
}

impl ImportSession {
    pub fn new(schema: EntitySchema, options: PipelineOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema,
            options,
            context: None,
            state: ImportState::default(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &ImportState {
        &self.state
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    pub fn context(&self) -> Option<&ImportContext> {
        self.context.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn can_confirm(&self) -> bool {
        matches!(&self.state, ImportState::Preview { outcome, .. } if can_confirm(&outcome.preview))
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, ImportState::Complete(_))
    }

    /// Submit a file with its context and compute the preview.
    pub fn submit<S: RecordStore + ?Sized>(
        &mut self,
        file_name: &str,
        bytes: &[u8],
        context: ImportContext,
        store: &S,
    ) -> Result<&ImportState, SessionError> {
        let event = if context.entity != self.schema.entity {
            ImportEvent::PreviewFailed(format!(
                "Context is for {} but the session imports {}",
                context.entity, self.schema.entity
            ))
        } else {
            match pipeline::preview(file_name, bytes, &context, &self.schema, store, &self.options) {
                Ok(outcome) => ImportEvent::PreviewReady(Arc::new(outcome)),
                Err(e) => ImportEvent::PreviewFailed(e.to_string()),
            }
        };

        self.apply(event)?;
        if matches!(self.state, ImportState::Preview { error: None, .. }) {
            self.context = Some(context);
        }
        Ok(&self.state)
    }

    /// Confirm the current preview and run the commit.
    ///
    /// When the preview cannot be confirmed the session stays in `preview`
    /// with an error and no store access happens.
    pub fn confirm<S: RecordStore + ?Sized>(
        &mut self,
        selection: CommitSelection,
        store: &mut S,
    ) -> Result<&ImportState, SessionError> {
        self.apply(ImportEvent::ConfirmRequested(selection))?;

        let (outcome, selection) = match &self.state {
            ImportState::Importing { outcome, selection } => (outcome.clone(), selection.clone()),
            _ => return Ok(&self.state),
        };
        let Some(context) = self.context.clone() else {
            return self.apply(ImportEvent::CommitAborted("Session has no import context".to_string()));
        };

        let event = match pipeline::confirm(
            &outcome.preview.file_name,
            &outcome.file,
            &selection,
            &context,
            &self.schema,
            store,
            &self.options,
        ) {
            Ok(result) => ImportEvent::CommitFinished(result),
            Err(e) => ImportEvent::CommitAborted(e.to_string()),
        };
        self.apply(event)
    }

    /// Abandon the preview before confirming.
    pub fn cancel(&mut self) -> Result<&ImportState, SessionError> {
        self.context = None;
        self.apply(ImportEvent::Cancel)
    }

    /// Discard all transient state; the session restarts at `upload`.
    pub fn close(&mut self) -> Result<&ImportState, SessionError> {
        self.apply(ImportEvent::Close)?;
        self.context = None;
        Ok(&self.state)
    }

    fn apply(&mut self, event: ImportEvent) -> Result<&ImportState, SessionError> {
        let event_name = event.name();
        self.state = transition(&self.state, event)?;

        let level = if self.state.error().is_some() {
            LogLevel::Warning
        } else {
            LogLevel::Info
        };
        let message = match self.state.error() {
            Some(error) => format!("{} → {}: {}", event_name, self.state.name(), error),
            None => format!("{} → {}", event_name, self.state.name()),
        };
        LOG_BROADCASTER.log(LogEntry::new(level, message).for_session(self.id.to_string()));

        Ok(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StoreError, StoreResult};
    use crate::models::{CanonicalData, EntityKind};
    use crate::store::{MemoryStore, NewRecord, StoredRecord};

    const MEMBERS: &str = "firstName,lastName,email,dailyRate\nAda,Lovelace,ada@example.com,650\nAlan,Turing,alan@example.com,600\n";
    const ONLY_INVALID: &str = "firstName,lastName,email,dailyRate\nAda,Lovelace,nope,650\n";

    fn context() -> ImportContext {
        ImportContext::new(EntityKind::TeamMember, "vendor-1")
    }

    fn session() -> ImportSession {
        ImportSession::new(EntitySchema::team_member(), PipelineOptions::default())
    }

    fn outcome(csv: &str) -> Arc<PreviewOutcome> {
        let schema = EntitySchema::team_member();
        let outcome = pipeline::preview(
            "team.csv",
            csv.as_bytes(),
            &context(),
            &schema,
            &MemoryStore::new(),
            &PipelineOptions::default(),
        )
        .unwrap();
        Arc::new(outcome)
    }

    /// Store whose writes always fail at the infrastructure level.
    struct DownStore(MemoryStore);

    impl RecordStore for DownStore {
        fn records_in_scope(&self, entity: EntityKind, scope: &str) -> StoreResult<Vec<StoredRecord>> {
            self.0.records_in_scope(entity, scope)
        }
        fn begin(&mut self) -> StoreResult<()> {
            self.0.begin()
        }
        fn create(&mut self, _record: NewRecord) -> StoreResult<StoredRecord> {
            Err(StoreError::Unavailable("connection lost".into()))
        }
        fn update(&mut self, id: Uuid, fields: CanonicalData, identity_key: Option<String>) -> StoreResult<StoredRecord> {
            self.0.update(id, fields, identity_key)
        }
        fn commit(&mut self) -> StoreResult<()> {
            self.0.commit()
        }
        fn rollback(&mut self) -> StoreResult<()> {
            self.0.rollback()
        }
    }

    #[test]
    fn test_full_cycle() {
        let mut store = MemoryStore::new();
        let mut session = session();
        assert_eq!(session.state().name(), "upload");

        session.submit("team.csv", MEMBERS.as_bytes(), context(), &store).unwrap();
        assert_eq!(session.state().name(), "preview");
        assert!(session.can_confirm());

        let state = session.confirm(CommitSelection::default(), &mut store).unwrap();
        match state {
            ImportState::Complete(CompleteOutcome::Finished(result)) => {
                assert_eq!(result.created, 2);
                assert!(result.success);
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(store.len(), 2);

        session.close().unwrap();
        assert_eq!(session.state().name(), "upload");
        assert!(session.context().is_none());
    }

    #[test]
    fn test_blocked_preview_stays_in_upload() {
        let mut session = session();
        let state = session
            .submit("team.csv", b"Name,Email,Rate\nAda,ada@example.com,1\n", context(), &MemoryStore::new())
            .unwrap();

        assert_eq!(state.name(), "upload");
        assert!(state.error().unwrap().contains("firstName"));
        assert!(state.preview().is_none());
    }

    #[test]
    fn test_parse_failure_stays_in_upload() {
        let mut session = session();
        let state = session.submit("team.csv", b"", context(), &MemoryStore::new()).unwrap();
        assert_eq!(state.name(), "upload");
        assert!(state.error().is_some());

        let mut missing_scope = context();
        missing_scope.scope.clear();
        let state = session
            .submit("team.csv", MEMBERS.as_bytes(), missing_scope, &MemoryStore::new())
            .unwrap();
        assert!(state.error().unwrap().contains("scope"));
    }

    #[test]
    fn test_only_invalid_rows_cannot_be_confirmed() {
        let mut store = MemoryStore::new();
        let mut session = session();
        session.submit("team.csv", ONLY_INVALID.as_bytes(), context(), &store).unwrap();
        assert!(!session.can_confirm());

        let state = session.confirm(CommitSelection::default(), &mut store).unwrap();
        assert_eq!(state.name(), "preview");
        assert!(state.error().is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_infrastructure_failure_completes_as_aborted() {
        let mut store = DownStore(MemoryStore::new());
        let mut session = session();
        session.submit("team.csv", MEMBERS.as_bytes(), context(), &store).unwrap();

        let state = session.confirm(CommitSelection::default(), &mut store).unwrap();
        assert!(matches!(state, ImportState::Complete(CompleteOutcome::Aborted { .. })));
        assert!(state.error().unwrap().contains("connection lost"));
        assert!(store.0.is_empty());
    }

    #[test]
    fn test_cancel_returns_to_upload() {
        let state = ImportState::Preview {
            outcome: outcome(MEMBERS),
            error: None,
        };
        let next = transition(&state, ImportEvent::Cancel).unwrap();
        assert!(matches!(next, ImportState::Upload { error: None }));
        // The original snapshot is untouched
        assert_eq!(state.name(), "preview");
    }

    #[test]
    fn test_importing_rejects_cancel() {
        let state = ImportState::Importing {
            outcome: outcome(MEMBERS),
            selection: CommitSelection::default(),
        };
        assert_eq!(
            transition(&state, ImportEvent::Cancel).unwrap_err(),
            SessionError::InvalidTransition {
                state: "importing",
                event: "cancel",
            }
        );
        assert!(transition(&state, ImportEvent::Close).is_err());
    }

    #[test]
    fn test_confirm_requires_preview() {
        let err = transition(&ImportState::default(), ImportEvent::ConfirmRequested(CommitSelection::default()))
            .unwrap_err();
        assert!(err.to_string().contains("upload"));

        let done = ImportState::Complete(CompleteOutcome::Finished(ImportResult::default()));
        assert!(transition(&done, ImportEvent::PreviewFailed("x".into())).is_err());
    }

    #[test]
    fn test_failed_reupload_keeps_preview() {
        let state = ImportState::Preview {
            outcome: outcome(MEMBERS),
            error: None,
        };
        let next = transition(&state, ImportEvent::PreviewFailed("CSV error".into())).unwrap();
        assert_eq!(next.name(), "preview");
        assert_eq!(next.error(), Some("CSV error"));
        assert_eq!(next.preview().unwrap().stats.total, 2);
    }
}
