//! Interfaz web de chat para un backend GraphRAG con enlaces de citas a un visor PDF.

pub mod annotate;
pub mod api;
pub mod app_state;
pub mod backend;
pub mod citations;
pub mod config;
pub mod models;
pub mod resolver;
pub mod session;

pub use app_state::AppState;
pub use config::AppConfig;
