use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde_json::json;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

use crate::{
    app_state::{AppState, Status},
    scheduler::JobKind,
};

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/ingest", post(ingest_handler))
        .route("/api/analysis", post(analysis_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Result<Json<Status>, StatusCode> {
    state
        .status
        .lock()
        .map(|status| Json(status.clone()))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[axum::debug_handler]
async fn ingest_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    enqueue(&state, JobKind::Ingestion)
}

#[axum::debug_handler]
async fn analysis_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    enqueue(&state, JobKind::Analysis)
}

/// Encola un arranque manual. El bucle lo ejecutará cuando termine el job en
/// curso, nunca en paralelo.
fn enqueue(state: &AppState, kind: JobKind) -> Result<impl IntoResponse, ApiError> {
    match state.triggers.try_send(kind) {
        Ok(()) => {
            info!("Arranque manual de {kind:?} encolado.");
            Ok((
                StatusCode::ACCEPTED,
                Json(json!({ "message": format!("{kind:?} encolado.") })),
            ))
        }
        Err(TrySendError::Full(_)) => {
            warn!("Cola de arranques manuales llena; se descarta {kind:?}.");
            Err((
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({"error": "Ya hay arranques manuales pendientes."})),
            ))
        }
        Err(TrySendError::Closed(_)) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "El planificador no está en marcha."})),
        )),
    }
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    // Sin receptores vivos no queda nada que apagar.
    let _ = state.shutdown.send(true);
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::sync::{mpsc, watch};

    fn state_with_queue(capacity: usize) -> (AppState, mpsc::Receiver<JobKind>, watch::Receiver<bool>) {
        let (triggers, trigger_rx) = mpsc::channel(capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let state = AppState {
            status: Arc::new(Mutex::new(Status {
                message: "En espera".into(),
                ..Default::default()
            })),
            triggers,
            shutdown: Arc::new(shutdown),
        };
        (state, trigger_rx, shutdown_rx)
    }

    #[tokio::test]
    async fn manual_starts_are_queued_for_the_loop() {
        let (state, mut rx, _shutdown) = state_with_queue(2);

        let response = ingest_handler(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let response = analysis_handler(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        assert_eq!(rx.recv().await, Some(JobKind::Ingestion));
        assert_eq!(rx.recv().await, Some(JobKind::Analysis));
    }

    #[tokio::test]
    async fn full_queue_rejects_extra_starts() {
        let (state, _rx, _shutdown) = state_with_queue(1);

        let first = ingest_handler(State(state.clone())).await.into_response();
        let second = ingest_handler(State(state)).await.into_response();

        assert_eq!(first.status(), StatusCode::ACCEPTED);
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn status_reports_current_message() {
        let (state, _rx, _shutdown) = state_with_queue(1);
        let Json(status) = status_handler(State(state)).await.unwrap();
        assert_eq!(status.message, "En espera");
        assert!(!status.is_busy);
    }

    #[tokio::test]
    async fn shutdown_signals_receivers() {
        let (state, _rx, shutdown_rx) = state_with_queue(1);
        let response = shutdown_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(*shutdown_rx.borrow());
    }
}
