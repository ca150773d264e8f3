//! Modelos de dominio: documentos de entrada, registros extraídos y filas de analítica.

use chrono::{Days, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Unidad de entrada no estructurada (un email, una reseña).
/// Pertenece al colaborador de origen; el núcleo sólo la lee.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub id: String,
    pub sender: String,
    pub subject: Option<String>,
    pub body: String,
    /// Sólo pasa a `true` después de persistir el resultado.
    pub consumed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Señales extraídas de un email de cliente.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EmailInsights {
    pub customer_name: String,
    pub product: String,
    pub sentiment: Sentiment,
    pub main_issue: String,
    pub priority: Priority,
}

/// Señales extraídas de una reseña de producto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReviewInsights {
    pub product_name: String,
    pub rating: u8,
    pub sentiment: Sentiment,
    pub positive_points: Vec<String>,
    pub negative_points: Vec<String>,
    pub suggestions: Vec<String>,
    pub summary: String,
}

/// Métricas en bruto de una entidad (p. ej. una ruta de página) tal y como
/// llegan de la exportación de analítica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRow {
    #[serde(alias = "page_path")]
    pub entity_key: String,
    #[serde(default)]
    pub sessions: u64,
    #[serde(default, alias = "pageviews")]
    pub views: u64,
    /// Porcentaje 0–100.
    #[serde(default)]
    pub bounce_rate: Option<f64>,
    /// Segundos.
    #[serde(default)]
    pub avg_duration: Option<f64>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl AnalyticsRow {
    pub fn new(entity_key: &str, views: u64, bounce_rate: f64, avg_duration: f64) -> Self {
        Self {
            entity_key: entity_key.to_string(),
            sessions: 0,
            views,
            bounce_rate: Some(bounce_rate),
            avg_duration: Some(avg_duration),
            date: None,
        }
    }
}

/// Fila de analítica anotada con sus puntuaciones derivadas.
/// Invariante: `performance_score == (bounce_score + duration_score) / 2`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRow {
    pub row: AnalyticsRow,
    pub bounce_score: f64,
    pub duration_score: f64,
    pub performance_score: f64,
}

/// Un paso del embudo de conversión, relativo sólo a su predecesor inmediato.
#[derive(Debug, Clone, Serialize)]
pub struct FunnelStep {
    /// 1-based.
    pub step_index: usize,
    pub entity_key: String,
    pub views: u64,
    pub previous_step: Option<String>,
    /// NaN cuando el paso anterior no tiene fila.
    pub conversion_rate: f64,
    pub dropoff_rate: f64,
}

/// Rango de fechas inclusivo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Los últimos `days` días terminando en `today`.
    pub fn last_days(days: u32, today: NaiveDate) -> Self {
        let start = today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end: today }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
