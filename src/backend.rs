//! Cliente HTTP del backend GraphRAG (`POST {API_BASE_URL}/query`).
//!
//! Nunca devuelve `Err`: todo fallo se normaliza en `QueryResult::Failure`.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, Client, StatusCode};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::models::{FailureKind, QueryRequest, QueryResponse, QueryResult};

#[derive(Clone, Debug)]
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("No se pudo crear el cliente HTTP del backend")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Self::new(cfg.api_base_url.clone(), cfg.api_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Un único intento por consulta; no hay reintentos automáticos.
    pub async fn query(&self, request: &QueryRequest) -> QueryResult {
        let url = format!("{}/query", self.base_url);
        info!(
            "Consultando backend ({}, k={}): {}",
            request.mode.as_str(),
            request.k,
            request.query
        );

        let response = match self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return transport_failure(&e),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return transport_failure(&e),
        };

        if status != StatusCode::OK {
            warn!("El backend respondió {status}");
            return QueryResult::failure(
                FailureKind::Backend,
                format!("API Error: {} - {}", status.as_u16(), body),
            );
        }

        decode_success(&body)
    }
}

fn transport_failure(err: &reqwest::Error) -> QueryResult {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        warn!("Error de conexión con el backend: {err}");
        QueryResult::failure(FailureKind::Transport, format!("Connection error: {err}"))
    } else {
        warn!("Error inesperado consultando el backend: {err}");
        QueryResult::failure(FailureKind::Unexpected, format!("Unexpected error: {err}"))
    }
}

/// Interpreta un cuerpo HTTP 200; un campo `error` no nulo también es un fallo.
fn decode_success(body: &str) -> QueryResult {
    let parsed: QueryResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Respuesta del backend con forma inesperada: {e}");
            return QueryResult::failure(FailureKind::Unexpected, format!("Unexpected error: {e}"));
        }
    };

    match &parsed.error {
        Some(serde_json::Value::String(message)) => {
            QueryResult::failure(FailureKind::Backend, message.clone())
        }
        Some(other) => QueryResult::failure(FailureKind::Backend, other.to_string()),
        None => QueryResult::Success(parsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchMode;

    #[test]
    fn success_body_is_decoded() {
        let result = decode_success(
            r#"{"response": "Found in [a.pdf]", "completion_time": 1.2, "llm_calls": 2, "prompt_tokens": 500}"#,
        );
        match result {
            QueryResult::Success(resp) => {
                assert_eq!(resp.response, "Found in [a.pdf]");
                assert_eq!(resp.llm_calls, 2);
                assert_eq!(resp.prompt_tokens, 500);
            }
            other => panic!("se esperaba éxito, llegó {other:?}"),
        }
    }

    #[test]
    fn error_field_turns_success_into_failure() {
        let result = decode_success(r#"{"response": "", "error": "index not loaded"}"#);
        assert_eq!(
            result,
            QueryResult::failure(FailureKind::Backend, "index not loaded")
        );
    }

    #[test]
    fn malformed_body_is_unexpected() {
        for body in [r#"{"response": 42}"#, "<html>Bad Gateway</html>"] {
            let result = decode_success(body);
            assert!(matches!(
                result,
                QueryResult::Failure {
                    kind: FailureKind::Unexpected,
                    ..
                }
            ));
        }
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transport_failure() {
        // Puerto 9 (discard) en loopback: conexión rechazada.
        let client = BackendClient::new("http://127.0.0.1:9/", Duration::from_secs(2)).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:9");

        let request = QueryRequest {
            query: "¿Qué es X?".into(),
            mode: SearchMode::Local,
            k: 20,
            include_context: false,
            include_citations: true,
        };
        match client.query(&request).await {
            QueryResult::Failure { kind, message } => {
                assert_eq!(kind, FailureKind::Transport);
                assert!(message.starts_with("Connection error"));
            }
            other => panic!("se esperaba fallo, llegó {other:?}"),
        }
    }
}
