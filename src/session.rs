//! Sesiones de chat: historial, estado del visor y turnos pregunta/respuesta.
//!
//! Cada sesión es independiente; el almacén no comparte estado entre sesiones.
//! El mutex nunca se mantiene durante la llamada al backend.
//! Las sesiones inactivas se eliminan al crear sesiones nuevas.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::annotate::{AnnotatedAnswer, CitationAnnotator};
use crate::backend::BackendClient;
use crate::config::{QueryDefaults, SearchMode};
use crate::models::{ChatTurn, ContentFormat, QueryRequest, QueryResult, TurnMetadata, ViewerState};

/// Inactividad tras la cual una sesión se descarta.
pub const DEFAULT_SESSION_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Sesión no encontrada: {0}")]
    NotFound(Uuid),
    #[error("Ya hay una consulta en curso en esta sesión")]
    Busy,
    #[error("La consulta está vacía")]
    EmptyQuery,
    #[error("Error interno: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    AwaitingResponse,
}

/// Resultado de una consulta, ya anotado, listo para añadirse al historial.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Answered {
        annotated: AnnotatedAnswer,
        metadata: TurnMetadata,
    },
    Failed(String),
}

/// Estado de una sesión de chat.
#[derive(Debug, Clone)]
pub struct ChatSession {
    id: Uuid,
    created_at: DateTime<Utc>,
    turns: Vec<ChatTurn>,
    viewer: ViewerState,
    phase: SessionPhase,
    /// Cambia en cada reinicio; invalida respuestas de consultas anteriores.
    epoch: u64,
    last_activity: Instant,
}

impl ChatSession {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            turns: Vec::new(),
            viewer: ViewerState::default(),
            phase: SessionPhase::Idle,
            epoch: 0,
            last_activity: Instant::now(),
        }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn viewer(&self) -> &ViewerState {
        &self.viewer
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Añade el turno del usuario y pasa a esperar respuesta.
    pub fn begin_query(&mut self, text: &str) -> Result<u64, SessionError> {
        if self.phase == SessionPhase::AwaitingResponse {
            return Err(SessionError::Busy);
        }
        if text.trim().is_empty() {
            return Err(SessionError::EmptyQuery);
        }
        self.turns.push(ChatTurn::user(text));
        self.phase = SessionPhase::AwaitingResponse;
        Ok(self.epoch)
    }

    /// Devuelve `false` si la sesión se reinició mientras se esperaba.
    pub fn finish_query(&mut self, epoch: u64, outcome: TurnOutcome) -> bool {
        if epoch != self.epoch {
            warn!("Sesión {}: respuesta descartada tras reinicio", self.id);
            return false;
        }
        let turn = match outcome {
            TurnOutcome::Answered {
                annotated,
                metadata,
            } => ChatTurn::assistant(
                annotated.text,
                annotated.format,
                annotated.citations,
                Some(metadata),
            ),
            // El mensaje puede traer el cuerpo HTML de una página de error.
            TurnOutcome::Failed(message) => ChatTurn::assistant(
                format!("❌ Error: {message}"),
                ContentFormat::Text,
                Vec::new(),
                None,
            ),
        };
        self.turns.push(turn);
        self.phase = SessionPhase::Idle;
        true
    }

    pub fn open_viewer(&mut self, citation: impl Into<String>) {
        self.viewer = ViewerState {
            citation: Some(citation.into()),
            open: true,
        };
    }

    pub fn close_viewer(&mut self) {
        self.viewer = ViewerState::default();
    }

    /// Vacía el historial y cierra el visor, en cualquier estado.
    pub fn reset(&mut self) {
        self.turns.clear();
        self.viewer = ViewerState::default();
        self.phase = SessionPhase::Idle;
        self.epoch += 1;
    }

    /// Una sesión esperando respuesta nunca caduca.
    fn is_expired(&self, ttl: Duration) -> bool {
        self.phase == SessionPhase::Idle && self.last_activity.elapsed() >= ttl
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            created_at: self.created_at,
            phase: self.phase,
            turns: self.turns.clone(),
            viewer: self.viewer.clone(),
        }
    }
}

/// Vista serializable de una sesión para el frontend.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub phase: SessionPhase,
    pub turns: Vec<ChatTurn>,
    pub viewer: ViewerState,
}

/// Ajustes de búsqueda enviados desde la barra lateral; los ausentes toman el valor por defecto.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuerySettings {
    pub mode: Option<SearchMode>,
    pub k: Option<u32>,
    pub include_context: Option<bool>,
    pub include_citations: Option<bool>,
}

impl QuerySettings {
    /// `k` sólo se respeta en modo local; en el resto se usa el valor por defecto.
    pub fn to_request(&self, query: &str, defaults: &QueryDefaults) -> QueryRequest {
        let mode = self.mode.unwrap_or(defaults.mode);
        let k = match mode {
            SearchMode::Local => self.k.unwrap_or(defaults.k).clamp(1, 100),
            _ => defaults.k,
        };
        QueryRequest {
            query: query.to_string(),
            mode,
            k,
            include_context: self.include_context.unwrap_or(defaults.include_context),
            include_citations: self.include_citations.unwrap_or(defaults.include_citations),
        }
    }
}

/// Sesiones activas, aisladas entre sí.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<Uuid, ChatSession>>>,
    idle_ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_idle_ttl(DEFAULT_SESSION_IDLE_TTL)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_ttl(idle_ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            idle_ttl,
        }
    }

    pub fn create(&self) -> Result<Uuid, SessionError> {
        let id = Uuid::new_v4();
        let mut sessions = self.lock()?;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(self.idle_ttl));
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!("{evicted} sesiones inactivas eliminadas");
        }
        sessions.insert(id, ChatSession::new(id));
        info!("Nueva sesión de chat {id}");
        Ok(id)
    }

    /// Elimina una sesión, por ejemplo al cerrar la pestaña.
    pub fn remove(&self, id: Uuid) -> Result<(), SessionError> {
        self.lock()?
            .remove(&id)
            .map(|_| info!("Sesión {id} cerrada"))
            .ok_or(SessionError::NotFound(id))
    }

    pub fn count(&self) -> Result<usize, SessionError> {
        Ok(self.lock()?.len())
    }

    /// Ejecuta `f` sobre la sesión con el mutex tomado. Cuenta como actividad.
    pub fn with_session<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut ChatSession) -> R,
    ) -> Result<R, SessionError> {
        let mut sessions = self.lock()?;
        let session = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        session.last_activity = Instant::now();
        Ok(f(session))
    }

    pub fn snapshot(&self, id: Uuid) -> Result<SessionSnapshot, SessionError> {
        self.with_session(id, |s| s.snapshot())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, ChatSession>>, SessionError> {
        self.sessions
            .lock()
            .map_err(|_| SessionError::Internal("lock poisoned".to_string()))
    }
}

/// Orquesta un turno: pregunta → backend → anotación → historial.
#[derive(Clone)]
pub struct ChatController {
    store: SessionStore,
    backend: BackendClient,
    annotator: CitationAnnotator,
    defaults: QueryDefaults,
}

impl ChatController {
    pub fn new(
        store: SessionStore,
        backend: BackendClient,
        annotator: CitationAnnotator,
        defaults: QueryDefaults,
    ) -> Self {
        Self {
            store,
            backend,
            annotator,
            defaults,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn annotator(&self) -> &CitationAnnotator {
        &self.annotator
    }

    pub async fn submit(
        &self,
        id: Uuid,
        text: &str,
        settings: &QuerySettings,
    ) -> Result<SessionSnapshot, SessionError> {
        let epoch = self.store.with_session(id, |s| s.begin_query(text))??;
        let request = settings.to_request(text, &self.defaults);

        // El turno se completa en su propia tarea: si el cliente se desconecta
        // y este futuro se descarta, la sesión vuelve igualmente a `Idle`.
        let controller = self.clone();
        let turn = tokio::spawn(async move {
            let outcome = controller.run_query(id, &request).await;
            controller
                .store
                .with_session(id, |s| s.finish_query(epoch, outcome))
        });

        match turn.await {
            Ok(finished) => {
                finished?;
            }
            Err(e) => {
                error!("Sesión {id}: la tarea de consulta falló: {e}");
                let outcome = TurnOutcome::Failed(format!("Unexpected error: {e}"));
                self.store
                    .with_session(id, |s| s.finish_query(epoch, outcome))?;
            }
        }
        self.store.snapshot(id)
    }

    async fn run_query(&self, id: Uuid, request: &QueryRequest) -> TurnOutcome {
        let result = self.backend.query(request).await;
        if !result.is_success() {
            warn!("Sesión {id}: la consulta no obtuvo respuesta válida");
        }
        match result {
            QueryResult::Success(response) => {
                let metadata = TurnMetadata::from(&response);
                let annotated = self.annotate_blocking(response.response).await;
                TurnOutcome::Answered {
                    annotated,
                    metadata,
                }
            }
            QueryResult::Failure { message, .. } => TurnOutcome::Failed(message),
        }
    }

    /// El recorrido del directorio de documentos es síncrono.
    async fn annotate_blocking(&self, text: String) -> AnnotatedAnswer {
        let annotator = self.annotator.clone();
        let fallback = text.clone();
        match tokio::task::spawn_blocking(move || annotator.annotate(&text)).await {
            Ok(annotated) => annotated,
            Err(e) => {
                error!("Fallo anotando citas: {e}");
                AnnotatedAnswer {
                    text: fallback,
                    ..Default::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answered(text: &str) -> TurnOutcome {
        TurnOutcome::Answered {
            annotated: AnnotatedAnswer {
                text: text.to_string(),
                ..Default::default()
            },
            metadata: TurnMetadata {
                completion_time: 1.2,
                llm_calls: 2,
                prompt_tokens: 500,
                context_data: None,
            },
        }
    }

    #[test]
    fn a_turn_appends_user_then_assistant() {
        let mut session = ChatSession::new(Uuid::new_v4());
        let epoch = session.begin_query("What is X?").unwrap();
        assert_eq!(session.phase(), SessionPhase::AwaitingResponse);

        assert!(session.finish_query(epoch, answered("X is Y")));
        assert_eq!(session.phase(), SessionPhase::Idle);
        let turns = session.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, crate::models::Role::User);
        assert_eq!(turns[1].content, "X is Y");
        assert_eq!(turns[1].metadata.as_ref().unwrap().llm_calls, 2);
    }

    #[test]
    fn second_submission_while_awaiting_is_rejected() {
        let mut session = ChatSession::new(Uuid::new_v4());
        session.begin_query("uno").unwrap();
        assert!(matches!(session.begin_query("dos"), Err(SessionError::Busy)));
        assert_eq!(session.turns().len(), 1);
    }

    #[test]
    fn blank_queries_are_rejected() {
        let mut session = ChatSession::new(Uuid::new_v4());
        assert!(matches!(session.begin_query("   "), Err(SessionError::EmptyQuery)));
        assert!(session.turns().is_empty());
    }

    #[test]
    fn failures_become_visible_error_turns() {
        let mut session = ChatSession::new(Uuid::new_v4());
        let epoch = session.begin_query("hola").unwrap();
        session.finish_query(epoch, TurnOutcome::Failed("API Error: 500 - boom".into()));
        let last = session.turns().last().unwrap();
        assert_eq!(last.content, "❌ Error: API Error: 500 - boom");
        assert_eq!(last.format, ContentFormat::Text);
        assert!(last.metadata.is_none());
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[test]
    fn viewer_opens_closes_and_resets() {
        let mut session = ChatSession::new(Uuid::new_v4());
        session.begin_query("hola").unwrap();
        session.open_viewer("a.pdf");
        assert_eq!(
            session.viewer(),
            &ViewerState {
                citation: Some("a.pdf".into()),
                open: true
            }
        );
        assert_eq!(session.phase(), SessionPhase::AwaitingResponse);

        session.close_viewer();
        assert_eq!(session.viewer(), &ViewerState::default());

        session.open_viewer("b.pdf");
        session.reset();
        assert_eq!(session.viewer(), &ViewerState::default());
        assert!(session.turns().is_empty());
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[test]
    fn responses_after_reset_are_discarded() {
        let mut session = ChatSession::new(Uuid::new_v4());
        let stale = session.begin_query("vieja").unwrap();
        session.reset();
        let fresh = session.begin_query("nueva").unwrap();

        assert!(!session.finish_query(stale, answered("tarde")));
        assert_eq!(session.phase(), SessionPhase::AwaitingResponse);
        assert!(session.finish_query(fresh, answered("a tiempo")));
        let contents: Vec<&str> = session.turns().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["nueva", "a tiempo"]);
    }

    #[test]
    fn k_only_applies_to_local_mode() {
        let defaults = QueryDefaults {
            mode: SearchMode::Local,
            k: 20,
            include_context: false,
            include_citations: true,
        };
        let local = QuerySettings {
            k: Some(7),
            ..Default::default()
        }
        .to_request("q", &defaults);
        assert_eq!((local.mode, local.k), (SearchMode::Local, 7));

        let global = QuerySettings {
            mode: Some(SearchMode::Global),
            k: Some(7),
            include_context: Some(true),
            ..Default::default()
        }
        .to_request("q", &defaults);
        assert_eq!((global.mode, global.k), (SearchMode::Global, 20));
        assert!(global.include_context);
        assert!(global.include_citations);
    }

    #[test]
    fn sessions_are_isolated() {
        let store = SessionStore::new();
        let a = store.create().unwrap();
        let b = store.create().unwrap();
        store
            .with_session(a, |s| s.begin_query("nur in a"))
            .unwrap()
            .unwrap();
        assert_eq!(store.snapshot(a).unwrap().turns.len(), 1);
        assert!(store.snapshot(b).unwrap().turns.is_empty());
        assert!(matches!(
            store.snapshot(Uuid::new_v4()),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn idle_sessions_are_evicted_on_create() {
        let store = SessionStore::with_idle_ttl(Duration::ZERO);
        let waiting = store.create().unwrap();
        let epoch = store
            .with_session(waiting, |s| s.begin_query("läuft noch"))
            .unwrap()
            .unwrap();

        let idle = store.create().unwrap();
        assert!(store.snapshot(waiting).is_ok());
        assert_eq!(store.count().unwrap(), 2);

        store
            .with_session(waiting, |s| s.finish_query(epoch, answered("fertig")))
            .unwrap();
        let fresh = store.create().unwrap();
        assert!(matches!(store.snapshot(waiting), Err(SessionError::NotFound(_))));
        assert!(matches!(store.snapshot(idle), Err(SessionError::NotFound(_))));
        assert!(store.snapshot(fresh).is_ok());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn active_sessions_survive_eviction() {
        let store = SessionStore::with_idle_ttl(Duration::from_secs(3600));
        let a = store.create().unwrap();
        store.create().unwrap();
        assert!(store.snapshot(a).is_ok());
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn removed_sessions_are_gone() {
        let store = SessionStore::new();
        let id = store.create().unwrap();
        store.remove(id).unwrap();
        assert!(matches!(store.snapshot(id), Err(SessionError::NotFound(_))));
        assert!(matches!(store.remove(id), Err(SessionError::NotFound(_))));
    }
}
