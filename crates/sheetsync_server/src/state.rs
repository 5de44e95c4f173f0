use std::sync::Arc;

use sheetsync_core::auth::{OAuthClientConfig, RefreshTokenProvider};
use sheetsync_core::store::GoogleDriveStore;
use sheetsync_core::{MemoryStore, RemoteStore, UpdateEngine};
use tracing::{info, warn};

use crate::config::{Config, StoreBackend};
use crate::form::{FieldMap, FieldMapError};

/// Store type shared by every handler
pub type SharedStore = Arc<dyn RemoteStore>;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<UpdateEngine<SharedStore>>,
    pub field_map: Arc<FieldMap>,
}

impl AppState {
    /// Wrap an engine and field map.
    pub fn new(engine: UpdateEngine<SharedStore>, field_map: FieldMap) -> Self {
        Self {
            engine: Arc::new(engine),
            field_map: Arc::new(field_map),
        }
    }

    /// Build the store, engine and field map described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, FieldMapError> {
        let field_map = match &config.field_map_path {
            Some(path) => {
                info!("Loading field map from {:?}", path);
                FieldMap::load(path)?
            }
            None => FieldMap::default(),
        };
        info!(
            "Form fields map to sheet '{}': {:?}",
            field_map.sheet,
            field_map.fields.keys().collect::<Vec<_>>()
        );

        let engine = UpdateEngine::new(build_store(config)).with_config(config.engine.clone());
        Ok(Self::new(engine, field_map))
    }
}

/// Construct the configured remote store.
pub fn build_store(config: &Config) -> SharedStore {
    match config.store {
        StoreBackend::GoogleDrive => {
            let google = &config.google;
            info!(
                "Using Google Drive store (client id {}, refresh token length {})",
                google.client_id,
                google.refresh_token.len()
            );
            let tokens = RefreshTokenProvider::new(OAuthClientConfig {
                client_id: google.client_id.clone(),
                client_secret: google.client_secret.clone(),
                refresh_token: google.refresh_token.clone(),
                token_uri: google.token_uri.clone(),
            });
            Arc::new(
                GoogleDriveStore::new(tokens)
                    .with_endpoints(google.api_base.clone(), google.upload_base.clone()),
            )
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; documents are lost on shutdown");
            Arc::new(MemoryStore::new())
        }
    }
}
