// Módulos de la aplicación
mod analysis;
mod analytics;
mod api;
mod app_state;
mod config;
mod connectors;
mod error;
mod extractor;
mod ingest;
mod llm;
mod models;
mod scheduler;
mod schema;

use crate::{
    analysis::AnalysisJob,
    app_state::{AppState, Status},
    connectors::{AnalyticsExportDir, JsonlSink, MailboxDir},
    extractor::StructuredExtractor,
    ingest::IngestionJob,
    models::{EmailInsights, ReviewInsights},
    scheduler::{JobKind, Scheduler},
};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // 1. Cargar .env y configuración
    dotenvy::dotenv().ok();
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 2. Inicializar logging (RUST_LOG tiene prioridad sobre LOG_LEVEL)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level)),
        )
        .init();

    // 3. Comprobar que los esquemas de extracción casan con los registros
    schema::verify_record_kind::<EmailInsights>().expect("Esquema de emails inconsistente");
    schema::verify_record_kind::<ReviewInsights>().expect("Esquema de reseñas inconsistente");

    // 4. Inicializar gestor de LLMs y colaboradores
    let llm_manager = llm::LlmManager::from_config(&cfg).expect("Error inicializando LLM Manager");
    let data_dir = &cfg.data_dir;
    let emails = MailboxDir::open(&data_dir.join("emails")).expect("Error abriendo el buzón de emails");
    let reviews = MailboxDir::open(&data_dir.join("reviews")).expect("Error abriendo el buzón de reseñas");
    let sheets = JsonlSink::open(&data_dir.join("sheets")).expect("Error abriendo el directorio de salida");
    let analytics = AnalyticsExportDir::new(&data_dir.join("analytics"));
    info!("📂 Datos en {}", data_dir.display());

    let ingestion = IngestionJob {
        extractor: StructuredExtractor::new(llm_manager),
        emails,
        reviews,
        sink: sheets.clone(),
        batch_size: cfg.scheduler.batch_size,
    };
    let analysis = AnalysisJob {
        analytics,
        sink: sheets,
        config: cfg.analysis.clone(),
    };

    // 5. Crear estado compartido y canales de control
    let (trigger_tx, trigger_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app_state = AppState {
        status: Arc::new(Mutex::new(Status {
            message: "Servidor listo.".to_string(),
            ..Default::default()
        })),
        triggers: trigger_tx,
        shutdown: Arc::new(shutdown_tx),
    };

    // Ingesta inicial al arrancar, antes de esperar al primer intervalo.
    if app_state.triggers.try_send(JobKind::Ingestion).is_err() {
        warn!("No se pudo encolar la ingesta inicial.");
    }

    // 6. Iniciar el servidor de control
    let app = api::create_router(app_state.clone()).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .expect("No se pudo abrir el puerto del servidor");
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    let mut server_shutdown = app_state.shutdown.subscribe();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
                info!("Señal de apagado recibida, iniciando cierre del servidor.");
            })
            .await
    });

    // Ctrl+C equivale a POST /api/shutdown.
    let ctrl_c_shutdown = app_state.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_c_shutdown.send(true);
        }
    });

    // 7. Bucle de planificación en la tarea principal
    let scheduler = Scheduler::new(&cfg.scheduler, ingestion, analysis, app_state.status.clone());
    scheduler.run(trigger_rx, shutdown_rx).await;

    match server.await {
        Ok(Ok(())) => info!("✅ Servidor cerrado correctamente."),
        Ok(Err(e)) => warn!("El servidor terminó con error: {e}"),
        Err(e) => warn!("La tarea del servidor falló: {e}"),
    }
}
