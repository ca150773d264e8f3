//! Bucle de planificación cooperativo.
//!
//! Un único bucle comprueba en cada tick (intervalo de sondeo grueso) qué
//! disparadores han vencido y ejecuta cada job hasta el final antes de volver a
//! comprobar. Los jobs nunca se solapan ni se interrumpen; el bucle sólo se
//! suspende en la espera entre ticks. Ningún fallo de un job termina el bucle.
//!
//! Riesgo abierto: no hay timeout a este nivel. Una llamada bloqueada al modelo
//! o a un colaborador detiene el ciclo hasta que responda.

use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{Days, Local, NaiveDateTime, NaiveTime, TimeDelta};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::{
    app_state::{update_status, Status},
    config::SchedulerConfig,
    error::PipelineError,
};

/// Un job planificable. Devuelve un resultado tipado que el bucle registra.
pub trait Job {
    type Report: fmt::Display;

    fn name(&self) -> &'static str;

    async fn run(&self, status: &Mutex<Status>) -> Result<Self::Report, PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Ingestion,
    Analysis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Cada `Duration` desde el final de la ejecución anterior.
    Every(Duration),
    /// Una vez al día a la hora local indicada.
    DailyAt(NaiveTime),
}

impl Trigger {
    /// Próximo vencimiento estrictamente posterior a `after`.
    pub fn next_due(&self, after: NaiveDateTime) -> NaiveDateTime {
        match self {
            Trigger::Every(interval) => {
                let delta = TimeDelta::from_std(*interval).unwrap_or(TimeDelta::MAX);
                after.checked_add_signed(delta).unwrap_or(NaiveDateTime::MAX)
            }
            Trigger::DailyAt(time) => {
                let today = after.date().and_time(*time);
                if today > after {
                    today
                } else {
                    today.checked_add_days(Days::new(1)).unwrap_or(NaiveDateTime::MAX)
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct ScheduledJob {
    kind: JobKind,
    trigger: Trigger,
    next_due: NaiveDateTime,
}

type Clock = Box<dyn Fn() -> NaiveDateTime>;

pub struct Scheduler<I, A> {
    ingestion: I,
    analysis: A,
    schedule: Vec<ScheduledJob>,
    poll_interval: Duration,
    status: Arc<Mutex<Status>>,
    clock: Clock,
}

impl<I, A> Scheduler<I, A>
where
    I: Job,
    A: Job,
{
    pub fn new(config: &SchedulerConfig, ingestion: I, analysis: A, status: Arc<Mutex<Status>>) -> Self {
        Self::with_clock(config, ingestion, analysis, status, Box::new(|| Local::now().naive_local()))
    }

    pub fn with_clock(
        config: &SchedulerConfig,
        ingestion: I,
        analysis: A,
        status: Arc<Mutex<Status>>,
        clock: Clock,
    ) -> Self {
        let now = clock();
        let schedule = [
            (JobKind::Ingestion, Trigger::Every(config.ingest_interval)),
            (JobKind::Analysis, Trigger::DailyAt(config.analysis_time)),
        ]
        .into_iter()
        .map(|(kind, trigger)| ScheduledJob {
            kind,
            trigger,
            next_due: trigger.next_due(now),
        })
        .collect();

        Self {
            ingestion,
            analysis,
            schedule,
            poll_interval: config.poll_interval,
            status,
            clock,
        }
    }

    pub fn next_due(&self, kind: JobKind) -> Option<NaiveDateTime> {
        self.schedule.iter().find(|j| j.kind == kind).map(|j| j.next_due)
    }

    /// Ejecuta, de uno en uno, los jobs vencidos y los vuelve a planificar
    /// respecto al momento en que terminan. Devuelve los jobs ejecutados.
    pub async fn run_pending(&mut self) -> Vec<JobKind> {
        let mut ran = Vec::new();
        loop {
            let now = (self.clock)();
            let due = self
                .schedule
                .iter()
                .enumerate()
                .filter(|(_, j)| j.next_due <= now && !ran.contains(&j.kind))
                .min_by_key(|(_, j)| j.next_due)
                .map(|(idx, j)| (idx, j.kind));
            let Some((idx, kind)) = due else {
                break;
            };

            self.run_job(kind).await;
            ran.push(kind);

            let finished = (self.clock)();
            let job = &mut self.schedule[idx];
            job.next_due = job.trigger.next_due(finished);
        }
        ran
    }

    /// Ejecuta un job hasta el final. Nunca propaga el fallo: lo registra y
    /// lo deja visible en el estado.
    pub async fn run_job(&self, kind: JobKind) -> bool {
        let name = match kind {
            JobKind::Ingestion => self.ingestion.name(),
            JobKind::Analysis => self.analysis.name(),
        };
        update_status(&self.status, |s| {
            s.is_busy = true;
            s.message = format!("Ejecutando {name}...");
            s.progress = 0.0;
        });

        let outcome = match kind {
            JobKind::Ingestion => self.ingestion.run(&self.status).await.map(|r| r.to_string()),
            JobKind::Analysis => self.analysis.run(&self.status).await.map(|r| r.to_string()),
        };

        let ok = outcome.is_ok();
        let summary = match outcome {
            Ok(summary) => {
                info!("Job {name} completado. {summary}");
                summary
            }
            Err(e) => {
                error!("Job {name} fallido ({}): {e}", e.kind());
                format!("Error en {name}: {e}")
            }
        };
        update_status(&self.status, |s| {
            s.is_busy = false;
            s.progress = 0.0;
            s.message = format!("En espera. Último job: {name}");
            s.last_job = Some(summary);
        });
        ok
    }

    /// Bucle principal: termina sólo al recibir la señal de apagado.
    pub async fn run(mut self, mut manual: mpsc::Receiver<JobKind>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Planificador iniciado (sondeo cada {:?}; ingesta prevista {:?}; análisis previsto {:?})",
            self.poll_interval,
            self.next_due(JobKind::Ingestion),
            self.next_due(JobKind::Analysis)
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.run_pending().await;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                Some(kind) = manual.recv() => {
                    info!("Arranque manual de {kind:?}");
                    self.run_job(kind).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Planificador detenido.");
    }
}
