//! sheetsync server
//!
//! HTTP front end for [`sheetsync_core`]: accepts cell mutation batches and
//! form webhooks, and applies them to spreadsheets in the configured remote
//! store.
//!
//! ## Environment Variables
//!
//! - `HOST`: Server host (default: 0.0.0.0)
//! - `PORT`: Server port (default: 5000)
//! - `STORE`: `google-drive` (default) or `memory`
//! - `GOOGLE_CLIENT_ID`: OAuth client id (required for google-drive)
//! - `GOOGLE_CLIENT_SECRET`: OAuth client secret (required for google-drive)
//! - `GOOGLE_REFRESH_TOKEN`: OAuth refresh token (required for google-drive)
//! - `GOOGLE_TOKEN_URI`: OAuth token endpoint
//! - `DRIVE_API_BASE`: Drive metadata API base URL
//! - `DRIVE_UPLOAD_BASE`: Drive upload API base URL
//! - `UPDATE_MAX_ATTEMPTS`: Attempts per update on conflict (default: 5)
//! - `UPDATE_INITIAL_BACKOFF_MS`: First retry delay (default: 100)
//! - `UPDATE_MAX_BACKOFF_MS`: Retry delay cap (default: 5000)
//! - `FETCH_TIMEOUT_SECS`: Download timeout (default: 30)
//! - `COMMIT_TIMEOUT_SECS`: Upload timeout (default: 120)
//! - `FIELD_MAP_PATH`: TOML file mapping form fields to cells

pub mod config;
pub mod form;
pub mod handlers;
pub mod state;

pub use config::Config;
pub use state::AppState;
