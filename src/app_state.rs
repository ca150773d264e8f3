use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};

use crate::scheduler::JobKind;

/// Estado compartido entre el planificador y la API de control.
#[derive(Clone)]
pub struct AppState {
    pub status: Arc<Mutex<Status>>,
    /// Arranques manuales; el bucle los ejecuta en orden, nunca en paralelo.
    pub triggers: mpsc::Sender<JobKind>,
    pub shutdown: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
    pub last_job: Option<String>,
}

/// Aplica `update` al estado; si el mutex quedó envenenado se ignora la actualización.
pub fn update_status(status: &Mutex<Status>, update: impl FnOnce(&mut Status)) {
    if let Ok(mut guard) = status.lock() {
        update(&mut guard);
    }
}
