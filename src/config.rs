//! Carga y gestión de configuración de la aplicación (LLM + planificador + analítica).
//!
//! La configuración se construye una sola vez al arrancar y es inmutable a partir
//! de ahí; cada componente recibe en su constructor la parte que necesita.

use std::{env, path::PathBuf, time::Duration};

use anyhow::{anyhow, Context, Result};
use chrono::NaiveTime;

use crate::analytics::DEFAULT_THRESHOLD;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub data_dir: PathBuf,
    pub log_level: String,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,

    pub scheduler: SchedulerConfig,
    pub analysis: AnalysisConfig,
}

/// Parámetros del bucle de planificación y del job de ingesta.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub ingest_interval: Duration,
    pub analysis_time: NaiveTime,
    pub poll_interval: Duration,
    pub batch_size: usize,
}

/// Parámetros del job diario de analítica.
#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    pub scope: String,
    pub lookback_days: u32,
    pub performance_threshold: f64,
    pub funnel_steps: Vec<String>,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Construye la configuración a partir de cualquier fuente clave → valor.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let server_addr = var_or("SERVER_ADDR", "127.0.0.1:3322");
        let log_level = var_or("LOG_LEVEL", "info");

        let data_dir = match lookup("DATA_DIR").filter(|v| !v.trim().is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_local_dir()
                .map(|d| d.join("bi-signals"))
                .unwrap_or_else(|| PathBuf::from("data")),
        };

        let llm_provider = LlmProvider::from_str(&var_or("LLM_PROVIDER", "openai"))?;
        let llm_chat_model = var_or("LLM_CHAT_MODEL", "gpt-4o-mini");

        let ingest_secs: u64 = parse_var(&var_or("DATA_REFRESH_INTERVAL", "3600"), "DATA_REFRESH_INTERVAL")?;
        let poll_secs: u64 = parse_var(&var_or("POLL_INTERVAL_SECS", "60"), "POLL_INTERVAL_SECS")?;
        let batch_size: usize = parse_var(&var_or("FETCH_BATCH_SIZE", "10"), "FETCH_BATCH_SIZE")?;
        if ingest_secs == 0 || poll_secs == 0 || batch_size == 0 {
            return Err(anyhow!(
                "DATA_REFRESH_INTERVAL, POLL_INTERVAL_SECS y FETCH_BATCH_SIZE deben ser mayores que cero"
            ));
        }

        let analysis_time_str = var_or("ANALYSIS_TIME", "07:00");
        let analysis_time = NaiveTime::parse_from_str(analysis_time_str.trim(), "%H:%M")
            .with_context(|| format!("ANALYSIS_TIME inválido (se espera HH:MM): {analysis_time_str}"))?;

        let performance_threshold: f64 = parse_var(
            &var_or("PERFORMANCE_THRESHOLD", &DEFAULT_THRESHOLD.to_string()),
            "PERFORMANCE_THRESHOLD",
        )?;
        if !performance_threshold.is_finite() {
            return Err(anyhow!("PERFORMANCE_THRESHOLD debe ser un número finito"));
        }

        let lookback_days: u32 =
            parse_var(&var_or("ANALYTICS_LOOKBACK_DAYS", "30"), "ANALYTICS_LOOKBACK_DAYS")?;
        if lookback_days == 0 {
            return Err(anyhow!("ANALYTICS_LOOKBACK_DAYS debe ser mayor que cero"));
        }

        let funnel_steps = lookup("FUNNEL_STEPS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            server_addr,
            data_dir,
            log_level,
            llm_provider,
            llm_chat_model,
            scheduler: SchedulerConfig {
                ingest_interval: Duration::from_secs(ingest_secs),
                analysis_time,
                poll_interval: Duration::from_secs(poll_secs),
                batch_size,
            },
            analysis: AnalysisConfig {
                scope: var_or("ANALYTICS_SCOPE", "pages"),
                lookback_days,
                performance_threshold,
                funnel_steps,
            },
        })
    }
}

fn parse_var<T>(raw: &str, key: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow!("Valor inválido para {key} ('{raw}'): {e}"))
}
