//! Carga y gestión de configuración de la aplicación (backend GraphRAG + visor PDF).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

/// Ruta fija donde los despliegues en contenedor montan los documentos.
pub const CONTAINER_DOCUMENTS_PATH: &str = "/app/documents";

/// Estrategia de búsqueda del backend GraphRAG.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Local,
    Global,
    Drift,
}

impl SearchMode {
    pub const ALL: [SearchMode; 3] = [SearchMode::Local, SearchMode::Global, SearchMode::Drift];

    pub fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "global" => Ok(Self::Global),
            "drift" => Ok(Self::Drift),
            other => Err(anyhow!("Modo de búsqueda no soportado: {other}")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Global => "global",
            Self::Drift => "drift",
        }
    }
}

/// Configuración del visor y de la resolución de citas.
#[derive(Clone, Debug)]
pub struct ViewerConfig {
    pub enabled: bool,
    pub documents_path: PathBuf,
    /// Raíz preferida si existe en el sistema de ficheros (contenedores).
    pub container_path: Option<PathBuf>,
}

/// Valores por defecto de la barra lateral de ajustes.
#[derive(Clone, Debug, Serialize)]
pub struct QueryDefaults {
    pub mode: SearchMode,
    pub k: u32,
    pub include_context: bool,
    pub include_citations: bool,
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub app_title: String,
    pub server_addr: String,
    pub open_browser: bool,

    pub api_base_url: String,
    pub api_timeout: Duration,
    /// Se lee y se expone, pero el cliente hace un único intento por consulta.
    pub api_max_retries: u32,

    pub defaults: QueryDefaults,
    pub viewer: ViewerConfig,

    /// Inactividad tras la cual se descarta una sesión de chat.
    pub session_idle_ttl: Duration,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Construye la configuración a partir de una fuente clave → valor arbitraria.
    pub fn from_source<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let api_base_url = var("API_BASE_URL", "http://127.0.0.1:9000");
        Url::parse(&api_base_url)
            .map_err(|e| anyhow!("API_BASE_URL no es una URL válida ({api_base_url}): {e}"))?;
        let api_base_url = api_base_url.trim_end_matches('/').to_string();

        let api_timeout = parse_number::<u64>("API_TIMEOUT", &var("API_TIMEOUT", "30"))?;
        let api_max_retries = parse_number::<u32>("API_MAX_RETRIES", &var("API_MAX_RETRIES", "3"))?;

        let mode_str = var("DEFAULT_SEARCH_MODE", "local");
        let mode = SearchMode::from_str(&mode_str).unwrap_or_else(|e| {
            warn!("{e}. Se usa 'local' por defecto.");
            SearchMode::Local
        });

        let session_idle_ttl =
            parse_number::<u64>("SESSION_IDLE_TIMEOUT", &var("SESSION_IDLE_TIMEOUT", "3600"))?;

        let k = parse_number::<u32>("DEFAULT_K_VALUE", &var("DEFAULT_K_VALUE", "20"))?.clamp(1, 100);

        let container_path = match lookup("CONTAINER_DOCUMENTS_PATH") {
            Some(p) if p.trim().is_empty() => None,
            Some(p) => Some(PathBuf::from(p)),
            None => Some(PathBuf::from(CONTAINER_DOCUMENTS_PATH)),
        };

        Ok(Self {
            app_title: var("APP_TITLE", "GraphRAG Chat Interface for Paletten-Gigant"),
            server_addr: var("SERVER_ADDR", "127.0.0.1:8501"),
            open_browser: parse_flag(&var("OPEN_BROWSER", "true")),
            api_base_url,
            api_timeout: Duration::from_secs(api_timeout),
            api_max_retries,
            defaults: QueryDefaults {
                mode,
                k,
                include_context: parse_flag(&var("DEFAULT_INCLUDE_CONTEXT", "false")),
                include_citations: parse_flag(&var("DEFAULT_INCLUDE_CITATIONS", "true")),
            },
            viewer: ViewerConfig {
                enabled: parse_flag(&var("ENABLE_PDF_VIEWER", "true")),
                documents_path: expand_home(&var("DOCUMENTS_PATH", "./documents")),
                container_path,
            },
            session_idle_ttl: Duration::from_secs(session_idle_ttl),
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| anyhow!("{key} debe ser un número entero, se recibió '{raw}'"))
}

/// Sólo "true" (sin distinguir mayúsculas) activa una opción.
fn parse_flag(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}
