//! REST API types for the import UI.
//!
//! Every session endpoint answers with a [`SessionView`], so the client
//! renders whatever state the orchestrator is in without tracking it itself.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{PipelineError, ServerError};
use crate::models::{ImportPreview, ImportResult, ImportRow, ImportRowStatus};
use crate::pipeline::ImportContext;
use crate::session::{CompleteOutcome, ImportSession, ImportState};

/// Snapshot of one import session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: String,
    /// `upload`, `preview`, `importing` or `complete`
    pub state: &'static str,
    pub can_confirm: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ImportContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<ImportPreview>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ImportResult>,
    pub created_at: DateTime<Utc>,
}

impl SessionView {
    /// Build a view. The preview is only embedded when asked for, since the
    /// client already holds it after the preview call.
    pub fn from_session(session: &ImportSession, with_preview: bool) -> Self {
        let state = session.state();
        let result = match state {
            ImportState::Complete(CompleteOutcome::Finished(result)) => Some(result.clone()),
            _ => None,
        };

        Self {
            session_id: session.id().to_string(),
            state: state.name(),
            can_confirm: session.can_confirm(),
            error: state.error().map(str::to_string),
            context: session.context().cloned(),
            preview: if with_preview { state.preview().cloned() } else { None },
            result,
            created_at: session.created_at(),
        }
    }
}

/// Query string of the rows endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RowsQuery {
    pub status: Option<String>,
}

/// Previewed rows, optionally filtered by status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowsResponse {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ImportRowStatus>,
    pub count: usize,
    pub rows: Vec<ImportRow>,
}

impl RowsResponse {
    pub fn filtered(session_id: String, preview: &ImportPreview, status: Option<ImportRowStatus>) -> Self {
        let rows: Vec<ImportRow> = preview
            .rows
            .iter()
            .filter(|row| status.map_or(true, |s| row.status == s))
            .cloned()
            .collect();

        Self {
            session_id,
            status,
            count: rows.len(),
            rows,
        }
    }
}

/// Create a JSON error body
pub fn error_response(message: &str) -> Value {
    json!({
        "error": true,
        "message": message
    })
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Pipeline(PipelineError::Store(_) | PipelineError::Commit(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Pipeline(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Session(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{}", self);
        }
        (status, Json(error_response(&self.to_string()))).into_response()
    }
}
