//! Ingesta de documentos no leídos: fetch → extracción → persistencia → marcar
//! consumido, documento a documento y en orden.
//!
//! Un fallo en un documento no detiene el lote: el documento queda sin consumir
//! y el siguiente ciclo lo vuelve a procesar (al menos una vez, no exactamente una).

use std::{fmt, sync::Mutex};

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    app_state::{update_status, Status},
    connectors::{DocumentSource, TabularSink},
    error::PipelineError,
    extractor::{ExtractedRecord, StructuredExtractor},
    llm::LanguageModel,
    models::{EmailInsights, ReviewInsights, SourceDocument},
    scheduler::Job,
    schema::RecordKind,
};

/// Un canal de entrada con su tipo de registro y su destino tabular.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub name: &'static str,
    pub destination: &'static str,
    /// Procedencia que se pasa al extractor como contexto.
    pub source_label: Option<&'static str>,
}

pub const EMAILS: Channel = Channel {
    name: "emails",
    destination: "Emails",
    source_label: None,
};

pub const REVIEWS: Channel = Channel {
    name: "reviews",
    destination: "Reviews",
    source_label: Some("store"),
};

/// Resultado de un documento concreto.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Processed { well_formed: bool },
    Failed(PipelineError),
}

/// Resumen de un ciclo sobre un canal.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CycleReport {
    pub channel: String,
    pub fetched: usize,
    pub consumed: usize,
    pub fallbacks: usize,
    /// (id del documento, tipo de fallo)
    pub failed: Vec<(String, String)>,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} leídos, {} consumidos ({} con reserva), {} fallidos",
            self.channel,
            self.fetched,
            self.consumed,
            self.fallbacks,
            self.failed.len()
        )
    }
}

/// Resumen del job completo: un resultado por canal.
#[derive(Debug)]
pub struct IngestionReport {
    pub cycle_id: Uuid,
    pub channels: Vec<(&'static str, Result<CycleReport, PipelineError>)>,
}

impl fmt::Display for IngestionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ingesta {}:", self.cycle_id)?;
        for (name, result) in &self.channels {
            match result {
                Ok(report) => write!(f, " {report};")?,
                Err(e) => write!(f, " [{name}] abandonado ({e});")?,
            }
        }
        Ok(())
    }
}

/// Fila persistida: marca temporal, identificación del documento, campos en orden
/// del esquema y el indicador de registro bien formado.
pub fn record_row<R: RecordKind>(
    document: &SourceDocument,
    record: &ExtractedRecord<R>,
    processed_at: &str,
) -> Result<Vec<String>, serde_json::Error> {
    let fields = serde_json::to_value(&record.fields)?;
    let mut row = vec![
        processed_at.to_string(),
        document.id.clone(),
        document.sender.clone(),
        document.subject.clone().unwrap_or_default(),
    ];
    row.extend(R::schema().row_values(&fields));
    row.push(record.well_formed.to_string());
    Ok(row)
}

/// Procesa un documento: extrae, persiste y, sólo si se persistió, lo marca consumido.
pub async fn process_document<R, M, D, S>(
    channel: &Channel,
    document: &mut SourceDocument,
    extractor: &StructuredExtractor<M>,
    source: &D,
    sink: &S,
) -> ItemOutcome
where
    R: RecordKind,
    M: LanguageModel,
    D: DocumentSource,
    S: TabularSink,
{
    let context: Vec<(&str, &str)> = channel
        .source_label
        .map(|label| vec![("source", label)])
        .unwrap_or_default();
    let record: ExtractedRecord<R> = extractor.extract(&document.body, &context).await;

    let processed_at = Utc::now().to_rfc3339();
    let row = match record_row(document, &record, &processed_at) {
        Ok(row) => row,
        Err(e) => {
            return ItemOutcome::Failed(PipelineError::PersistenceFailure {
                destination: channel.destination.to_string(),
                reason: e.to_string(),
            })
        }
    };

    if let Err(e) = sink.append_row(channel.destination, &row).await {
        return ItemOutcome::Failed(PipelineError::persistence(channel.destination, &e));
    }

    if let Err(e) = source.mark_consumed(&document.id).await {
        return ItemOutcome::Failed(PipelineError::MarkConsumedFailure {
            document_id: document.id.clone(),
            reason: format!("{e:#}"),
        });
    }

    document.consumed = true;
    ItemOutcome::Processed {
        well_formed: record.well_formed,
    }
}

/// Un ciclo sobre un canal. Sólo devuelve error si el fetch falla; los fallos
/// por documento quedan en el informe.
pub async fn run_cycle<R, M, D, S>(
    channel: &Channel,
    extractor: &StructuredExtractor<M>,
    source: &D,
    sink: &S,
    batch_size: usize,
    status: &Mutex<Status>,
) -> Result<CycleReport, PipelineError>
where
    R: RecordKind,
    M: LanguageModel,
    D: DocumentSource,
    S: TabularSink,
{
    let mut documents = source
        .fetch_unread(batch_size)
        .await
        .map_err(|e| PipelineError::source_unavailable(channel.name, &e))?;

    let mut report = CycleReport {
        channel: channel.name.to_string(),
        fetched: documents.len(),
        ..Default::default()
    };
    if documents.is_empty() {
        return Ok(report);
    }
    info!("[{}] {} documentos sin leer", channel.name, documents.len());

    let total = documents.len();
    for (index, document) in documents.iter_mut().enumerate() {
        update_status(status, |s| {
            s.message = format!("[{}] [{}/{}] Procesando: {}...", channel.name, index + 1, total, document.id);
            s.progress = index as f32 / total as f32;
        });

        match process_document::<R, _, _, _>(channel, document, extractor, source, sink).await {
            ItemOutcome::Processed { well_formed } => {
                report.consumed += 1;
                if !well_formed {
                    report.fallbacks += 1;
                }
            }
            ItemOutcome::Failed(err) => {
                error!(
                    "[{}] Documento {} sin consumir ({}): {}",
                    channel.name,
                    document.id,
                    err.kind(),
                    err
                );
                report.failed.push((document.id.clone(), err.kind().to_string()));
            }
        }
    }

    update_status(status, |s| s.progress = 1.0);
    Ok(report)
}

/// Job de ingesta recurrente: emails y reseñas, en ese orden.
pub struct IngestionJob<M, D, S> {
    pub extractor: StructuredExtractor<M>,
    pub emails: D,
    pub reviews: D,
    pub sink: S,
    pub batch_size: usize,
}

impl<M, D, S> Job for IngestionJob<M, D, S>
where
    M: LanguageModel,
    D: DocumentSource,
    S: TabularSink,
{
    type Report = IngestionReport;

    fn name(&self) -> &'static str {
        "ingesta"
    }

    async fn run(&self, status: &Mutex<Status>) -> Result<IngestionReport, PipelineError> {
        let cycle_id = Uuid::new_v4();
        info!("Iniciando ciclo de ingesta {cycle_id}");

        let emails = run_cycle::<EmailInsights, _, _, _>(
            &EMAILS,
            &self.extractor,
            &self.emails,
            &self.sink,
            self.batch_size,
            status,
        )
        .await;
        let reviews = run_cycle::<ReviewInsights, _, _, _>(
            &REVIEWS,
            &self.extractor,
            &self.reviews,
            &self.sink,
            self.batch_size,
            status,
        )
        .await;

        for result in [&emails, &reviews] {
            match result {
                Ok(report) => info!("Ciclo {cycle_id}: {report}"),
                Err(e) => warn!("Ciclo {cycle_id}: canal abandonado hasta el próximo disparo: {e}"),
            }
        }

        Ok(IngestionReport {
            cycle_id,
            channels: vec![(EMAILS.name, emails), (REVIEWS.name, reviews)],
        })
    }
}
