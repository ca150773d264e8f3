//! Taxonomía de fallos del pipeline.
//!
//! Ningún fallo de este tipo es fatal para el proceso una vez arrancado el bucle:
//! se devuelven como valores, el planificador los registra y sigue adelante.
//! Sólo `Misconfiguration` aborta, y únicamente antes de arrancar.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    /// Una llamada de lectura a un colaborador externo ha fallado.
    #[error("fuente no disponible ({source_name}): {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    /// La salida del modelo no valida contra el esquema. Sólo se usa
    /// internamente en el extractor; el llamante recibe el registro de reserva.
    #[error("salida del modelo mal formada: {0}")]
    MalformedModelOutput(String),

    /// No se pudo escribir un resultado tras una extracción correcta.
    #[error("fallo de persistencia en '{destination}': {reason}")]
    PersistenceFailure { destination: String, reason: String },

    /// El resultado se persistió pero el documento no pudo marcarse como consumido.
    #[error("no se pudo marcar como consumido el documento {document_id}: {reason}")]
    MarkConsumedFailure { document_id: String, reason: String },

    /// Configuración inválida detectada al arrancar.
    #[error("configuración inválida: {0}")]
    Misconfiguration(String),
}

impl PipelineError {
    pub fn source_unavailable(source_name: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            reason: format!("{err:#}"),
        }
    }

    pub fn persistence(destination: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::PersistenceFailure {
            destination: destination.into(),
            reason: format!("{err:#}"),
        }
    }

    /// Etiqueta corta para logs y para el estado expuesto por la API.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::MalformedModelOutput(_) => "malformed_model_output",
            Self::PersistenceFailure { .. } => "persistence_failure",
            Self::MarkConsumedFailure { .. } => "mark_consumed_failure",
            Self::Misconfiguration(_) => "misconfiguration",
        }
    }
}
