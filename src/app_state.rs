use anyhow::Result;

use crate::{
    annotate::CitationAnnotator,
    backend::BackendClient,
    config::AppConfig,
    session::{ChatController, SessionStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub controller: ChatController,
}

impl AppState {
    /// Construye el cliente del backend, el anotador de citas y el almacén de sesiones.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let backend = BackendClient::from_config(&config)?;
        let annotator = CitationAnnotator::from_config(&config.viewer)?;
        let controller = ChatController::new(
            SessionStore::with_idle_ttl(config.session_idle_ttl),
            backend,
            annotator,
            config.defaults.clone(),
        );
        Ok(Self { config, controller })
    }
}
