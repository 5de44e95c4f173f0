use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, header},
    response::Json,
};
use serde::{Deserialize, Serialize};
use sheetsync_core::{Mutation, Revision, UpdateOutcome, UpdateRequest};
use tracing::info;

use super::ApiError;
use crate::form::FormData;
use crate::state::AppState;

/// Body of POST /api/documents/{document_id}/update
#[derive(Debug, Deserialize)]
pub struct UpdateBody {
    #[serde(default)]
    pub mutations: Vec<Mutation>,
    #[serde(default)]
    pub expected_revision: Option<Revision>,
}

/// Reply to a form submission
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct FormReply {
    pub status: &'static str,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<Revision>,
}

/// POST /api/documents/{document_id}/update - Apply a mutation batch
pub async fn update_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Json(body): Json<UpdateBody>,
) -> Result<Json<UpdateOutcome>, ApiError> {
    info!(
        "Update for '{}': {} mutation(s), pinned revision {:?}",
        document_id,
        body.mutations.len(),
        body.expected_revision
    );

    let mut request = UpdateRequest::new(document_id, body.mutations);
    request.expected_revision = body.expected_revision;

    let outcome = state.engine.update(request).await?;
    Ok(Json(outcome))
}

/// POST /update-excel - Apply a JSON form submission
pub async fn update_excel(State(state): State<AppState>, body: Bytes) -> Result<Json<FormReply>, ApiError> {
    let data = FormData::from_json_bytes(&body);
    submit_form(&state, data).await
}

/// POST / - Webhook variant of /update-excel accepting form or JSON bodies
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<FormReply>, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    tracing::debug!("Webhook body ({:?}, {} bytes)", content_type, body.len());

    let data = FormData::from_webhook(content_type, &body);
    submit_form(&state, data).await
}

/// Validate a submission, map its fields and run the update.
pub async fn submit_form(state: &AppState, data: FormData) -> Result<Json<FormReply>, ApiError> {
    if data.is_empty() {
        return Err(ApiError::BadRequest("No data provided"));
    }
    let Some(file_id) = data.file_id() else {
        return Err(ApiError::BadRequest("No file ID provided"));
    };
    info!("Form submission for file '{}' with {} field(s)", file_id, data.len());

    let mutations = state.field_map.mutations(&data);
    if mutations.is_empty() {
        tracing::warn!("No mappable data found in submission; nothing to update");
        return Ok(Json(FormReply {
            status: "success",
            message: "No updates were made",
            revision: None,
        }));
    }

    let outcome = state
        .engine
        .update(UpdateRequest::new(file_id, mutations))
        .await?;
    info!(
        "Updated '{}' to {} in {} attempt(s)",
        file_id, outcome.revision, outcome.attempts
    );

    Ok(Json(FormReply {
        status: "success",
        message: "Excel file updated successfully",
        revision: Some(outcome.revision),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::{FILE_ID_FIELD, FieldMap};
    use crate::state::SharedStore;
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use sheetsync_core::{
        Cell, CellCoord, Document, DocumentId, MemoryStore, Sheet, UpdateEngine,
    };
    use std::sync::Arc;

    const FILE_ID: &str = "1AbC";

    fn state() -> (AppState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let doc = Document::from_sheets(
            Revision::new("r0"),
            vec![Sheet::new("Project Setup Form").with_cell(CellCoord::new(5, 3), "South")],
        )
        .unwrap();
        store
            .insert_document(DocumentId::new(FILE_ID), "Project Setup.xlsx", &doc)
            .unwrap();

        let shared: SharedStore = store.clone();
        let state = AppState::new(UpdateEngine::new(shared), FieldMap::default());
        (state, store)
    }

    fn cell(store: &MemoryStore, a1: &str) -> Cell {
        let fetched = store.snapshot(&DocumentId::new(FILE_ID)).unwrap();
        let doc = Document::decode(&fetched.bytes, fetched.revision).unwrap();
        doc.sheet("Project Setup Form")
            .unwrap()
            .cell(CellCoord::parse_a1(a1).unwrap())
            .clone()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_form_submission_updates_cells() {
        let (state, store) = state();
        let data: FormData = [
            (FILE_ID_FIELD, FILE_ID),
            ("projectName", "Harbour Bridge"),
            ("projectNumber", "P-104"),
        ]
        .into_iter()
        .collect();

        let Json(reply) = submit_form(&state, data).await.unwrap();
        assert_eq!(reply.message, "Excel file updated successfully");
        assert_eq!(reply.revision, Some(Revision::new("r2")));
        assert_eq!(cell(&store, "D29"), Cell::Text("Harbour Bridge".into()));
        assert_eq!(cell(&store, "D8"), Cell::Text("P-104".into()));
        assert_eq!(cell(&store, "D6"), Cell::Text("South".into()));
    }

    #[tokio::test]
    async fn test_unmapped_submission_touches_nothing() {
        let (state, store) = state();
        let data: FormData = [(FILE_ID_FIELD, FILE_ID), ("notes", "hello")].into_iter().collect();

        let Json(reply) = submit_form(&state, data).await.unwrap();
        assert_eq!(reply.message, "No updates were made");
        assert_eq!(store.fetch_count(), 0);
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_form_validation() {
        let (state, _) = state();

        let response = submit_form(&state, FormData::default()).await.unwrap_err().into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["message"], "No data provided");

        let data: FormData = [("projectName", "Harbour Bridge")].into_iter().collect();
        let response = submit_form(&state, data).await.unwrap_err().into_response();
        assert_eq!(body_json(response).await["message"], "No file ID provided");
    }

    #[tokio::test]
    async fn test_missing_sheet_is_bad_request() {
        let (state, store) = state();
        let state = AppState {
            field_map: Arc::new(FieldMap {
                sheet: "Intake".to_string(),
                ..FieldMap::default()
            }),
            ..state
        };
        let data: FormData = [(FILE_ID_FIELD, FILE_ID), ("branch", "North")].into_iter().collect();

        let response = submit_form(&state, data).await.unwrap_err().into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["kind"], "Apply");
        assert_eq!(body["document_id"], FILE_ID);
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_webhook_accepts_form_body() {
        let (state, store) = state();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded".parse().unwrap(),
        );

        let Json(reply) = webhook(
            State(state),
            headers,
            Bytes::from_static(b"Current+File+ID=1AbC&branch=North"),
        )
        .await
        .unwrap();
        assert_eq!(reply.status, "success");
        assert_eq!(cell(&store, "D6"), Cell::Text("North".into()));
    }

    #[tokio::test]
    async fn test_update_document_endpoint() {
        let (state, store) = state();
        let body: UpdateBody = serde_json::from_value(serde_json::json!({
            "mutations": [
                {"sheet": "Project Setup Form", "cell": "A1", "value": {"type": "number", "value": 7.0}},
                {"sheet": "Project Setup Form", "cell": "D6"}
            ]
        }))
        .unwrap();

        let Json(outcome) = update_document(State(state.clone()), Path(FILE_ID.to_string()), Json(body))
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(cell(&store, "A1"), Cell::Number(7.0));
        assert_eq!(cell(&store, "D6"), Cell::Empty);

        let pinned: UpdateBody = serde_json::from_value(serde_json::json!({
            "mutations": [{"sheet": "Project Setup Form", "cell": "A1", "value": {"type": "text", "value": "x"}}],
            "expected_revision": "r1"
        }))
        .unwrap();
        let response = update_document(State(state), Path(FILE_ID.to_string()), Json(pinned))
            .await
            .unwrap_err()
            .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["kind"], "RevisionConflict");
    }

    #[tokio::test]
    async fn test_unknown_document_is_not_found() {
        let (state, _) = state();
        let data: FormData = [(FILE_ID_FIELD, "missing"), ("branch", "North")].into_iter().collect();

        let response = submit_form(&state, data).await.unwrap_err().into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
