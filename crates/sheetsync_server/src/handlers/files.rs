use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use sheetsync_core::{DocumentId, DocumentInfo, RemoteStore};
use tracing::{error, info};

use crate::state::AppState;

/// Documents returned by GET /list_files
pub const LIST_PAGE_SIZE: usize = 10;

/// Query for GET /test_file_access
#[derive(Debug, Deserialize)]
pub struct FileAccessQuery {
    pub file_id: Option<String>,
}

/// Result of a file access check
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct FileAccessResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /test_file_access?file_id= - Check the credentials can see a file
pub async fn test_file_access(
    State(state): State<AppState>,
    Query(query): Query<FileAccessQuery>,
) -> Json<FileAccessResponse> {
    let Some(file_id) = query.file_id.filter(|id| !id.trim().is_empty()) else {
        return Json(FileAccessResponse {
            success: false,
            file_name: None,
            error: Some("No file ID provided".to_string()),
        });
    };
    info!("Testing file access for '{}'", file_id);

    match state.engine.store().describe(&DocumentId::new(file_id.trim())).await {
        Ok(file) => Json(FileAccessResponse {
            success: true,
            file_name: Some(file.name),
            error: None,
        }),
        Err(e) => {
            error!("File access check failed: {}", e);
            Json(FileAccessResponse {
                success: false,
                file_name: None,
                error: Some(e.to_string()),
            })
        }
    }
}

/// Files visible to the store credentials
#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub files: Vec<DocumentInfo>,
}

#[derive(Serialize)]
struct ListError {
    error: String,
}

/// GET /list_files - First page of files visible to the store credentials
pub async fn list_files(State(state): State<AppState>) -> Response {
    match state.engine.store().list(LIST_PAGE_SIZE).await {
        Ok(files) => Json(FileListResponse { files }).into_response(),
        Err(e) => {
            error!("List files failed: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(ListError {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::FieldMap;
    use crate::state::SharedStore;
    use axum::body::to_bytes;
    use sheetsync_core::{MemoryStore, UpdateEngine};
    use std::sync::Arc;

    fn state(store: Arc<MemoryStore>) -> AppState {
        let shared: SharedStore = store;
        AppState::new(UpdateEngine::new(shared), FieldMap::default())
    }

    #[tokio::test]
    async fn test_access_check() {
        let store = Arc::new(MemoryStore::new());
        store.insert(DocumentId::new("1AbC"), "Project Setup.xlsx", Vec::new());
        let state = state(store);

        let Json(found) = test_file_access(
            State(state.clone()),
            Query(FileAccessQuery {
                file_id: Some("1AbC".to_string()),
            }),
        )
        .await;
        assert!(found.success);
        assert_eq!(found.file_name.as_deref(), Some("Project Setup.xlsx"));

        let Json(missing) = test_file_access(
            State(state.clone()),
            Query(FileAccessQuery {
                file_id: Some("nope".to_string()),
            }),
        )
        .await;
        assert!(!missing.success);
        assert!(missing.error.unwrap().contains("not found"));

        let Json(blank) = test_file_access(State(state), Query(FileAccessQuery { file_id: None })).await;
        assert_eq!(blank.error.as_deref(), Some("No file ID provided"));
    }

    #[tokio::test]
    async fn test_list_files_is_capped() {
        let store = Arc::new(MemoryStore::new());
        for n in 0..12 {
            store.insert(DocumentId::new(format!("doc-{n:02}")), format!("{n}.xlsx"), Vec::new());
        }

        let response = list_files(State(state(store))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let files = body["files"].as_array().unwrap();
        assert_eq!(files.len(), LIST_PAGE_SIZE);
        assert_eq!(files[0]["id"], "doc-00");
        assert_eq!(files[0]["revision"], "r1");
    }
}
