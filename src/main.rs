use anyhow::{Context, Result};
use graphrag_chat::{api, AppConfig, AppState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // 2. Cargar configuración
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;
    info!("Backend GraphRAG: {}", cfg.api_base_url);
    if cfg.viewer.enabled {
        info!("Documentos: {}", cfg.viewer.documents_path.display());
    } else {
        info!("Visor de PDF desactivado; las citas no se enlazarán.");
    }

    // 3. Crear estado compartido de la aplicación
    let app_state = AppState::from_config(cfg).context("Error inicializando la aplicación")?;

    // 4. Configurar el router de la API y el servicio de ficheros estáticos
    let app = api::create_app(app_state.clone(), "frontend");

    // 5. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    let server_url = format!("http://{}", server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    // Abrir el frontend en el navegador por defecto
    if app_state.config.open_browser && webbrowser::open(&server_url).is_err() {
        warn!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    // Apagado ordenado con Ctrl-C.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
