//! Modelos de dominio: peticiones al backend, turnos de chat y estado del visor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::SearchMode;

/// Cuerpo JSON enviado a `POST {API_BASE_URL}/query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub mode: SearchMode,
    /// Sólo tiene efecto en modo `local`.
    pub k: u32,
    pub include_context: bool,
    pub include_citations: bool,
}

/// Respuesta correcta del backend (HTTP 200).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default = "missing_response", deserialize_with = "response_or_placeholder")]
    pub response: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub completion_time: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub llm_calls: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub prompt_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_data: Option<serde_json::Value>,
    /// Un valor no nulo indica fallo aunque el estado HTTP sea 200.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

fn missing_response() -> String {
    "No response received".to_string()
}

/// Los backends en Python envían `null` en los campos opcionales.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn response_or_placeholder<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(missing_response))
}

/// Origen de un fallo al consultar el backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeout, conexión rechazada o reiniciada.
    Transport,
    /// Estado HTTP distinto de 200 o campo `error` no nulo.
    Backend,
    /// Cuerpo con forma inesperada u otro fallo imprevisto.
    Unexpected,
}

/// Resultado normalizado de una consulta: o bien éxito, o bien fallo.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Success(QueryResponse),
    Failure { kind: FailureKind, message: String },
}

impl QueryResult {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Detalles de la respuesta que se muestran bajo cada turno del asistente.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnMetadata {
    pub completion_time: f64,
    pub llm_calls: u64,
    pub prompt_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_data: Option<serde_json::Value>,
}

impl From<&QueryResponse> for TurnMetadata {
    fn from(resp: &QueryResponse) -> Self {
        Self {
            completion_time: resp.completion_time,
            llm_calls: resp.llm_calls,
            prompt_tokens: resp.prompt_tokens,
            context_data: resp.context_data.clone(),
        }
    }
}

/// Cómo debe pintar el frontend el contenido de un turno.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    /// Texto literal; se pinta sin interpretar HTML.
    #[default]
    Text,
    /// HTML ya escapado con marcadores de cita.
    Html,
}

/// Un mensaje del historial de chat.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    pub format: ContentFormat,
    /// Citas candidatas detectadas en la respuesta (botones "Fuentes").
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TurnMetadata>,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            format: ContentFormat::Text,
            citations: Vec::new(),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        format: ContentFormat,
        citations: Vec<String>,
        metadata: Option<TurnMetadata>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            format,
            citations,
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// Estado del visor de documentos de una sesión.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ViewerState {
    pub citation: Option<String>,
    pub open: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_with_only_text_uses_zero_metadata() {
        let resp: QueryResponse = serde_json::from_str(r#"{"response": "Hola"}"#).unwrap();
        assert_eq!(resp.response, "Hola");
        assert_eq!(resp.llm_calls, 0);
        assert_eq!(resp.completion_time, 0.0);
        assert!(resp.error.is_none());
    }

    #[test]
    fn missing_response_text_gets_placeholder() {
        let resp: QueryResponse = serde_json::from_str(r#"{"llm_calls": 1}"#).unwrap();
        assert_eq!(resp.response, "No response received");
    }

    #[test]
    fn explicit_null_error_is_none() {
        let resp: QueryResponse =
            serde_json::from_str(r#"{"response": "ok", "error": null, "llm_calls": 2}"#).unwrap();
        assert!(resp.error.is_none());
        assert_eq!(resp.llm_calls, 2);
    }

    #[test]
    fn explicit_null_metadata_falls_back_to_zero() {
        let resp: QueryResponse = serde_json::from_str(
            r#"{"response": "ok", "completion_time": null, "llm_calls": null, "prompt_tokens": null}"#,
        )
        .unwrap();
        assert_eq!(resp.response, "ok");
        assert_eq!(resp.completion_time, 0.0);
        assert_eq!(resp.llm_calls, 0);
        assert_eq!(resp.prompt_tokens, 0);

        let resp: QueryResponse = serde_json::from_str(r#"{"response": null}"#).unwrap();
        assert_eq!(resp.response, "No response received");
    }

    #[test]
    fn user_turns_are_plain_text() {
        let turn = ChatTurn::user("<b>hola</b>");
        assert_eq!(turn.format, ContentFormat::Text);
        assert_eq!(serde_json::to_value(&turn).unwrap()["format"], "text");
    }

    #[test]
    fn request_serializes_mode_in_lowercase() {
        let req = QueryRequest {
            query: "¿Qué es X?".into(),
            mode: SearchMode::Drift,
            k: 20,
            include_context: false,
            include_citations: true,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["mode"], "drift");
        assert_eq!(json["include_citations"], true);
    }
}
