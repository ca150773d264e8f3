//! Colaboradores externos vistos por el núcleo: origen de documentos, destino
//! tabular y origen de analítica. Se incluyen implementaciones sobre el
//! sistema de archivos que sustituyen al buzón, la hoja de cálculo y la
//! exportación de analítica.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::models::{AnalyticsRow, DateRange, SourceDocument};

pub trait DocumentSource {
    /// Documentos aún no consumidos, como mucho `max_count`.
    async fn fetch_unread(&self, max_count: usize) -> Result<Vec<SourceDocument>>;

    async fn mark_consumed(&self, document_id: &str) -> Result<()>;
}

/// Destino sólo de anexado; acepta filas duplicadas.
pub trait TabularSink {
    async fn append_row(&self, destination: &str, values: &[String]) -> Result<()>;
}

pub trait AnalyticsSource {
    async fn fetch_metrics(&self, entity_scope: &str, date_range: DateRange) -> Result<Vec<AnalyticsRow>>;
}

// ---------------------------------------------------------------------
// Buzón en directorio
// ---------------------------------------------------------------------

/// Fichero de mensaje tal y como se deposita en `inbox/`.
#[derive(Debug, Deserialize)]
struct MailFile {
    sender: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body: String,
}

/// Buzón sobre disco: `<root>/inbox/<id>.json` pendientes, `<root>/processed/`
/// consumidos y `<root>/rejected/` ficheros que nunca podrán procesarse.
#[derive(Debug, Clone)]
pub struct MailboxDir {
    inbox: PathBuf,
    processed: PathBuf,
    rejected: PathBuf,
}

/// Un id válido se puede leer, marcar y mover sin salir del buzón.
fn is_valid_document_id(document_id: &str) -> bool {
    !document_id.is_empty() && !document_id.contains(['/', '\\']) && !document_id.starts_with('.')
}

impl MailboxDir {
    pub fn open(root: &Path) -> Result<Self> {
        let inbox = root.join("inbox");
        let processed = root.join("processed");
        let rejected = root.join("rejected");
        for dir in [&inbox, &processed, &rejected] {
            fs::create_dir_all(dir)
                .with_context(|| format!("No se pudo crear el buzón {}", dir.display()))?;
        }
        Ok(Self { inbox, processed, rejected })
    }

    fn pending_path(&self, document_id: &str) -> Result<PathBuf> {
        if !is_valid_document_id(document_id) {
            return Err(anyhow!("Identificador de documento inválido: '{document_id}'"));
        }
        Ok(self.inbox.join(format!("{document_id}.json")))
    }

    /// Aparta un fichero inutilizable para que no se relea en cada ciclo.
    fn reject(&self, path: &Path, reason: &str) {
        let Some(name) = path.file_name() else {
            return;
        };
        let to = self.rejected.join(name);
        match fs::rename(path, &to) {
            Ok(()) => warn!("Mensaje rechazado ({reason}): movido a {}", to.display()),
            Err(e) => warn!("Mensaje rechazado ({reason}), pero no se pudo mover {}: {e}", path.display()),
        }
    }
}

impl DocumentSource for MailboxDir {
    async fn fetch_unread(&self, max_count: usize) -> Result<Vec<SourceDocument>> {
        if !self.inbox.is_dir() {
            return Err(anyhow!("El buzón no existe: {}", self.inbox.display()));
        }

        let mut documents = Vec::new();
        let entries = WalkDir::new(&self.inbox)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"));

        for entry in entries {
            if documents.len() >= max_count {
                break;
            }
            let path = entry.path();
            let id = match path.file_stem().and_then(|s| s.to_str()) {
                Some(id) if is_valid_document_id(id) => id.to_string(),
                _ => {
                    self.reject(path, "identificador inválido");
                    continue;
                }
            };
            let mail: MailFile = match fs::read_to_string(path)
                .map_err(anyhow::Error::from)
                .and_then(|raw| serde_json::from_str(&raw).map_err(anyhow::Error::from))
            {
                Ok(mail) => mail,
                Err(e) => {
                    self.reject(path, &format!("ilegible: {e}"));
                    continue;
                }
            };
            documents.push(SourceDocument {
                id,
                sender: mail.sender,
                subject: mail.subject,
                body: mail.body,
                consumed: false,
            });
        }

        debug!("{} mensajes pendientes leídos de {}", documents.len(), self.inbox.display());
        Ok(documents)
    }

    async fn mark_consumed(&self, document_id: &str) -> Result<()> {
        let from = self.pending_path(document_id)?;
        if !from.is_file() {
            return Err(anyhow!("Documento no encontrado en el buzón: {document_id}"));
        }
        let to = self.processed.join(format!("{document_id}.json"));
        fs::rename(&from, &to)
            .with_context(|| format!("No se pudo mover {} a {}", from.display(), to.display()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Destino tabular JSONL
// ---------------------------------------------------------------------

/// Cada destino es `<root>/<destination>.jsonl`, una fila (array JSON) por línea.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    root: PathBuf,
}

impl JsonlSink {
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("No se pudo crear el directorio de salida {}", root.display()))?;
        Ok(Self { root: root.to_path_buf() })
    }

    pub fn path_for(&self, destination: &str) -> PathBuf {
        self.root.join(format!("{destination}.jsonl"))
    }
}

impl TabularSink for JsonlSink {
    async fn append_row(&self, destination: &str, values: &[String]) -> Result<()> {
        if destination.is_empty() || destination.contains(['/', '\\', '.']) {
            return Err(anyhow!("Destino inválido: '{destination}'"));
        }
        let line = serde_json::to_string(values)?;
        let path = self.path_for(destination);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("No se pudo abrir {}", path.display()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Exportaciones de analítica
// ---------------------------------------------------------------------

/// Lee `<root>/<scope>.json`: un array de filas de analítica.
#[derive(Debug, Clone)]
pub struct AnalyticsExportDir {
    root: PathBuf,
}

impl AnalyticsExportDir {
    pub fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf() }
    }
}

impl AnalyticsSource for AnalyticsExportDir {
    async fn fetch_metrics(&self, entity_scope: &str, date_range: DateRange) -> Result<Vec<AnalyticsRow>> {
        let path = self.root.join(format!("{entity_scope}.json"));
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("No se pudo leer la exportación {}", path.display()))?;
        let rows: Vec<AnalyticsRow> = serde_json::from_str(&raw)
            .with_context(|| format!("Exportación con formato inválido: {}", path.display()))?;

        // Las filas sin fecha se conservan.
        Ok(rows
            .into_iter()
            .filter(|r| r.date.map_or(true, |d| date_range.contains(d)))
            .collect())
    }
}

/// Dobles en memoria para tests del pipeline.
#[cfg(test)]
pub mod testing {
    use std::{collections::HashMap, sync::Mutex};

    use anyhow::{anyhow, Result};

    use super::{AnalyticsSource, DocumentSource, TabularSink};
    use crate::models::{AnalyticsRow, DateRange, SourceDocument};

    #[derive(Default)]
    pub struct InMemorySource {
        documents: Mutex<Vec<SourceDocument>>,
        fail_fetch: Mutex<bool>,
        fail_mark: Mutex<Option<String>>,
    }

    impl InMemorySource {
        pub fn with_documents(docs: &[(&str, &str)]) -> Self {
            let documents = docs
                .iter()
                .map(|(id, body)| SourceDocument {
                    id: id.to_string(),
                    sender: "sender@example.com".to_string(),
                    subject: None,
                    body: body.to_string(),
                    consumed: false,
                })
                .collect();
            Self {
                documents: Mutex::new(documents),
                ..Default::default()
            }
        }

        pub fn fail_fetches(&self, fail: bool) {
            *self.fail_fetch.lock().unwrap() = fail;
        }

        pub fn fail_marking(&self, id: &str) {
            *self.fail_mark.lock().unwrap() = Some(id.to_string());
        }

        pub fn consumed_ids(&self) -> Vec<String> {
            self.documents
                .lock()
                .unwrap()
                .iter()
                .filter(|d| d.consumed)
                .map(|d| d.id.clone())
                .collect()
        }
    }

    impl DocumentSource for InMemorySource {
        async fn fetch_unread(&self, max_count: usize) -> Result<Vec<SourceDocument>> {
            if *self.fail_fetch.lock().unwrap() {
                return Err(anyhow!("buzón caído"));
            }
            Ok(self
                .documents
                .lock()
                .unwrap()
                .iter()
                .filter(|d| !d.consumed)
                .take(max_count)
                .cloned()
                .collect())
        }

        async fn mark_consumed(&self, document_id: &str) -> Result<()> {
            if self.fail_mark.lock().unwrap().as_deref() == Some(document_id) {
                return Err(anyhow!("no se pudo marcar {document_id}"));
            }
            let mut docs = self.documents.lock().unwrap();
            let doc = docs
                .iter_mut()
                .find(|d| d.id == document_id)
                .ok_or_else(|| anyhow!("desconocido: {document_id}"))?;
            doc.consumed = true;
            Ok(())
        }
    }

    /// Destino que guarda las filas; puede fallar en las filas que contengan un valor.
    #[derive(Default)]
    pub struct RecordingSink {
        rows: Mutex<HashMap<String, Vec<Vec<String>>>>,
        fail_on: Mutex<Option<String>>,
    }

    impl RecordingSink {
        pub fn failing_when_row_contains(value: &str) -> Self {
            Self {
                fail_on: Mutex::new(Some(value.to_string())),
                ..Default::default()
            }
        }

        pub fn stop_failing(&self) {
            *self.fail_on.lock().unwrap() = None;
        }

        pub fn rows(&self, destination: &str) -> Vec<Vec<String>> {
            self.rows
                .lock()
                .unwrap()
                .get(destination)
                .cloned()
                .unwrap_or_default()
        }
    }

    impl TabularSink for RecordingSink {
        async fn append_row(&self, destination: &str, values: &[String]) -> Result<()> {
            if let Some(needle) = self.fail_on.lock().unwrap().as_deref() {
                if values.iter().any(|v| v == needle) {
                    return Err(anyhow!("cuota de escritura agotada"));
                }
            }
            self.rows
                .lock()
                .unwrap()
                .entry(destination.to_string())
                .or_default()
                .push(values.to_vec());
            Ok(())
        }
    }

    /// Analítica fija; `None` simula una fuente caída.
    pub struct StaticAnalytics(pub Option<Vec<AnalyticsRow>>);

    impl AnalyticsSource for StaticAnalytics {
        async fn fetch_metrics(&self, _entity_scope: &str, _date_range: DateRange) -> Result<Vec<AnalyticsRow>> {
            self.0.clone().ok_or_else(|| anyhow!("API de analítica no disponible"))
        }
    }
}
