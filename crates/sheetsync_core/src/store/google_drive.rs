//! Google Drive v3 remote store.
//!
//! The revision tag is the file's `headRevisionId`. Drive has no native
//! conditional upload, so a commit re-reads `headRevisionId` immediately before
//! uploading and reports a conflict when it moved. Writers coordinated by the
//! same [`crate::lock::DocumentLocks`] never race inside that window.

use reqwest::StatusCode;
use serde::Deserialize;

use super::{BoxFuture, DocumentInfo, FetchedDocument, RemoteStore, StoreError};
use crate::auth::{AccessToken, AuthError, TokenProvider};
use crate::document::{DocumentId, Revision};

/// Drive metadata API base.
pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Drive media upload API base.
pub const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// MIME type of an XLSX workbook.
pub const XLSX_MIME_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const FILE_FIELDS: &str = "id,name,mimeType,headRevisionId";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    head_revision_id: Option<String>,
}

impl From<DriveFile> for DocumentInfo {
    fn from(file: DriveFile) -> Self {
        DocumentInfo {
            id: DocumentId::new(file.id),
            name: file.name,
            mime_type: file.mime_type,
            revision: file.head_revision_id.map(Revision::new),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// Google Drive store for binary spreadsheet files (shared drives included).
pub struct GoogleDriveStore<T: TokenProvider> {
    client: reqwest::Client,
    tokens: T,
    api_base: String,
    upload_base: String,
}

impl<T: TokenProvider> GoogleDriveStore<T> {
    /// Create a store against the public Drive endpoints.
    pub fn new(tokens: T) -> Self {
        Self {
            client: reqwest::Client::new(),
            tokens,
            api_base: DEFAULT_API_BASE.to_string(),
            upload_base: DEFAULT_UPLOAD_BASE.to_string(),
        }
    }

    /// Point the store at different API endpoints (proxies, emulators).
    pub fn with_endpoints(mut self, api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self.upload_base = upload_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Share an existing HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// `{base}/{segments...}` with every segment percent-encoded.
    fn endpoint(base: &str, segments: &[&str]) -> Result<reqwest::Url, StoreError> {
        let invalid = || StoreError::Transport(format!("Invalid endpoint '{}'", base));
        let mut url = reqwest::Url::parse(base).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// URL of one file under `base`. Ids that are not a single path segment
    /// cannot name a Drive file.
    fn file_url(&self, base: &str, id: &DocumentId) -> Result<reqwest::Url, StoreError> {
        if matches!(id.as_str(), "" | "." | "..") {
            return Err(StoreError::NotFound(id.clone()));
        }
        Self::endpoint(base, &["files", id.as_str()])
    }

    async fn token(&self) -> Result<AccessToken, StoreError> {
        Ok(self.tokens.access_token().await?)
    }

    async fn metadata(&self, id: &DocumentId, token: &AccessToken) -> Result<DriveFile, StoreError> {
        let response = self
            .client
            .get(self.file_url(&self.api_base, id)?)
            .bearer_auth(token.secret())
            .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
            .send()
            .await
            .map_err(|e| StoreError::Transport(format!("Failed to get file metadata: {}", e)))?;

        let response = check_status(response, Some(id)).await?;
        response
            .json()
            .await
            .map_err(|e| StoreError::Transport(format!("Failed to parse metadata: {}", e)))
    }

    fn head_revision(file: &DriveFile) -> Result<Revision, StoreError> {
        // Native Google Sheets have no binary revisions and cannot be updated here.
        file.head_revision_id
            .clone()
            .map(Revision::new)
            .ok_or_else(|| StoreError::Service {
                status: 422,
                message: format!(
                    "file '{}' ({}) has no binary revision",
                    file.name,
                    file.mime_type.as_deref().unwrap_or("unknown type")
                ),
            })
    }
}

/// Map a non-success response onto the store error taxonomy.
///
/// `id` is the file the request addressed; without one a 404 is a service error.
async fn check_status(
    response: reqwest::Response,
    id: Option<&DocumentId>,
) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    log::warn!(
        "[Google Drive] {} for {}: {}",
        status,
        id.map_or_else(|| "file list".to_string(), |id| format!("file '{}'", id)),
        message
    );
    Err(status_error(status, id, message))
}

fn status_error(status: StatusCode, id: Option<&DocumentId>, message: String) -> StoreError {
    match (status, id) {
        (StatusCode::NOT_FOUND, Some(id)) => StoreError::NotFound(id.clone()),
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => {
            StoreError::Auth(AuthError::Unauthorized(format!("{}: {}", status, message)))
        }
        _ => StoreError::Service {
            status: status.as_u16(),
            message,
        },
    }
}

impl<T: TokenProvider> RemoteStore for GoogleDriveStore<T> {
    fn name(&self) -> &str {
        "Google Drive"
    }

    fn fetch<'a>(&'a self, id: &'a DocumentId) -> BoxFuture<'a, Result<FetchedDocument, StoreError>> {
        Box::pin(async move {
            let token = self.token().await?;

            // Metadata before content: the revision can be older than the bytes
            // but never newer, so a racing writer surfaces as a commit conflict.
            let file = self.metadata(id, &token).await?;
            let revision = Self::head_revision(&file)?;
            log::info!(
                "[Google Drive] Downloading '{}' ({}) at revision {}",
                file.name,
                id,
                revision
            );

            let response = self
                .client
                .get(self.file_url(&self.api_base, id)?)
                .bearer_auth(token.secret())
                .query(&[("alt", "media"), ("supportsAllDrives", "true")])
                .send()
                .await
                .map_err(|e| StoreError::Transport(format!("Failed to download file: {}", e)))?;
            let response = check_status(response, Some(id)).await?;

            let bytes = response
                .bytes()
                .await
                .map_err(|e| StoreError::Transport(format!("Failed to read response: {}", e)))?
                .to_vec();

            Ok(FetchedDocument { bytes, revision })
        })
    }

    fn commit_if_revision<'a>(
        &'a self,
        id: &'a DocumentId,
        bytes: Vec<u8>,
        expected: &'a Revision,
    ) -> BoxFuture<'a, Result<Revision, StoreError>> {
        Box::pin(async move {
            let token = self.token().await?;

            let current = Self::head_revision(&self.metadata(id, &token).await?)?;
            if &current != expected {
                return Err(StoreError::Conflict {
                    expected: expected.clone(),
                    actual: Some(current),
                });
            }

            log::info!("[Google Drive] Uploading {} bytes to '{}'", bytes.len(), id);
            let response = self
                .client
                .patch(self.file_url(&self.upload_base, id)?)
                .bearer_auth(token.secret())
                .query(&[
                    ("uploadType", "media"),
                    ("supportsAllDrives", "true"),
                    ("fields", FILE_FIELDS),
                ])
                .header(reqwest::header::CONTENT_TYPE, XLSX_MIME_TYPE)
                .body(bytes)
                .send()
                .await
                .map_err(|e| StoreError::Transport(format!("Failed to upload file: {}", e)))?;

            if matches!(
                response.status(),
                StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED
            ) {
                return Err(StoreError::Conflict {
                    expected: expected.clone(),
                    actual: None,
                });
            }
            let response = check_status(response, Some(id)).await?;

            let file: DriveFile = response
                .json()
                .await
                .map_err(|e| StoreError::Transport(format!("Failed to parse response: {}", e)))?;
            let revision = Self::head_revision(&file)?;
            log::info!("[Google Drive] Upload complete, '{}' now at {}", id, revision);
            Ok(revision)
        })
    }

    fn describe<'a>(&'a self, id: &'a DocumentId) -> BoxFuture<'a, Result<DocumentInfo, StoreError>> {
        Box::pin(async move {
            let token = self.token().await?;
            Ok(self.metadata(id, &token).await?.into())
        })
    }

    fn list(&self, page_size: usize) -> BoxFuture<'_, Result<Vec<DocumentInfo>, StoreError>> {
        Box::pin(async move {
            let token = self.token().await?;
            let page_size = page_size.clamp(1, 1000).to_string();
            let fields = format!("files({})", FILE_FIELDS);

            let response = self
                .client
                .get(Self::endpoint(&self.api_base, &["files"])?)
                .bearer_auth(token.secret())
                .query(&[
                    ("pageSize", page_size.as_str()),
                    ("fields", fields.as_str()),
                    ("includeItemsFromAllDrives", "true"),
                    ("supportsAllDrives", "true"),
                    ("q", "trashed = false"),
                ])
                .send()
                .await
                .map_err(|e| StoreError::Transport(format!("Failed to list files: {}", e)))?;

            let response = check_status(response, None).await?;

            let list: FileList = response
                .json()
                .await
                .map_err(|e| StoreError::Transport(format!("Failed to parse response: {}", e)))?;
            Ok(list.files.into_iter().map(DocumentInfo::from).collect())
        })
    }
}
