//! Job diario de analítica: exportación → puntuación → embudo → persistencia.

use std::{fmt, sync::Mutex};

use chrono::{Local, Utc};
use tracing::{info, warn};

use crate::{
    analytics,
    app_state::{update_status, Status},
    config::AnalysisConfig,
    connectors::{AnalyticsSource, TabularSink},
    error::PipelineError,
    models::{DateRange, FunnelStep, ScoredRow},
    scheduler::Job,
};

pub const UNDERPERFORMING_DESTINATION: &str = "UnderperformingPages";
pub const FUNNEL_DESTINATION: &str = "Funnel";

#[derive(Debug, Default)]
pub struct AnalysisReport {
    pub rows_fetched: usize,
    pub underperforming: Vec<ScoredRow>,
    pub funnel: Vec<FunnelStep>,
    pub persistence_failures: usize,
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Análisis: {} filas, {} páginas por debajo del umbral, {} pasos de embudo, {} escrituras fallidas",
            self.rows_fetched,
            self.underperforming.len(),
            self.funnel.len(),
            self.persistence_failures
        )
    }
}

pub struct AnalysisJob<A, S> {
    pub analytics: A,
    pub sink: S,
    pub config: AnalysisConfig,
}

fn scored_row_values(processed_at: &str, scored: &ScoredRow) -> Vec<String> {
    let fmt_opt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    vec![
        processed_at.to_string(),
        scored.row.entity_key.clone(),
        scored.row.sessions.to_string(),
        scored.row.views.to_string(),
        fmt_opt(scored.row.bounce_rate),
        fmt_opt(scored.row.avg_duration),
        format!("{:.4}", scored.bounce_score),
        format!("{:.4}", scored.duration_score),
        format!("{:.4}", scored.performance_score),
    ]
}

fn funnel_row_values(processed_at: &str, step: &FunnelStep) -> Vec<String> {
    // NaN se escribe tal cual ("NaN").
    vec![
        processed_at.to_string(),
        step.step_index.to_string(),
        step.entity_key.clone(),
        step.views.to_string(),
        step.previous_step.clone().unwrap_or_default(),
        format!("{:.2}", step.conversion_rate),
        format!("{:.2}", step.dropoff_rate),
    ]
}

impl<A, S> AnalysisJob<A, S>
where
    A: AnalyticsSource,
    S: TabularSink,
{
    async fn persist(&self, destination: &str, rows: Vec<Vec<String>>) -> usize {
        let mut failures = 0;
        for row in rows {
            if let Err(e) = self.sink.append_row(destination, &row).await {
                let err = PipelineError::persistence(destination, &e);
                warn!("{err}");
                failures += 1;
            }
        }
        failures
    }
}

impl<A, S> Job for AnalysisJob<A, S>
where
    A: AnalyticsSource,
    S: TabularSink,
{
    type Report = AnalysisReport;

    fn name(&self) -> &'static str {
        "análisis"
    }

    async fn run(&self, status: &Mutex<Status>) -> Result<AnalysisReport, PipelineError> {
        let range = DateRange::last_days(self.config.lookback_days, Local::now().date_naive());
        info!("Iniciando análisis de '{}' para {range}", self.config.scope);
        update_status(status, |s| s.message = format!("Descargando analítica de '{}'...", self.config.scope));

        let rows = self
            .analytics
            .fetch_metrics(&self.config.scope, range)
            .await
            .map_err(|e| PipelineError::source_unavailable("analytics", &e))?;
        if rows.is_empty() {
            info!("La exportación de '{}' no contiene filas", self.config.scope);
        }

        let underperforming = analytics::score(&rows, self.config.performance_threshold);
        let funnel = if self.config.funnel_steps.is_empty() {
            Vec::new()
        } else {
            analytics::compute_funnel(&rows, self.config.funnel_steps.as_slice())
        };

        update_status(status, |s| {
            s.message = "Guardando resultados del análisis...".to_string();
            s.progress = 0.5;
        });
        let processed_at = Utc::now().to_rfc3339();
        let mut persistence_failures = self
            .persist(
                UNDERPERFORMING_DESTINATION,
                underperforming.iter().map(|s| scored_row_values(&processed_at, s)).collect(),
            )
            .await;
        persistence_failures += self
            .persist(
                FUNNEL_DESTINATION,
                funnel.iter().map(|s| funnel_row_values(&processed_at, s)).collect(),
            )
            .await;
        update_status(status, |s| s.progress = 1.0);

        Ok(AnalysisReport {
            rows_fetched: rows.len(),
            underperforming,
            funnel,
            persistence_failures,
        })
    }
}
