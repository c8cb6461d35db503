mod alerts;
mod config;
mod core;
mod db;
mod error;
mod http;
mod retry;
mod signals;
mod sink;
mod source;
mod wallets;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::alerts::OpsAlerter;
use crate::config::Config;
use crate::core::consumer::StreamConsumer;
use crate::core::counters::PipelineCounters;
use crate::core::lifecycle::{PipelineState, StateHandle};
use crate::core::pipeline::{Coordinator, PipelineParts};
use crate::core::quarantine::Quarantine;
use crate::db::SharedDatabase;
use crate::signals::ScoringEngine;
use crate::signals::model::ModelRegistry;
use crate::sink::publisher::Publisher;
use crate::wallets::WalletStore;
use crate::wallets::features::AggregationParams;

const DEFAULT_SCORES_PATH: &str = "data/scores.jsonl";
const DEFAULT_QUARANTINE_PATH: &str = "data/quarantine.jsonl";

fn main() -> ExitCode {
    let config_path = config_path();
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            init_logging("pretty");
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.logging.format);

    info!("repscore {} starting", http::SERVICE_VERSION);
    if config_path.exists() {
        info!("Config loaded from {}", config_path.display());
    } else {
        info!("Config file {} not found, using defaults", config_path.display());
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    match rt.block_on(run(config)) {
        Ok(PipelineState::Stopped) => ExitCode::SUCCESS,
        Ok(state) => {
            error!("Pipeline ended in state {}", state.as_str());
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Startup failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// First CLI argument, then `REPSCORE_CONFIG`, then `config.toml`.
fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("REPSCORE_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

fn init_logging(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("repscore=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_database(path: &str) -> Result<SharedDatabase, Box<dyn std::error::Error>> {
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(SharedDatabase::open(db_path)?)
}

async fn run(config: Config) -> Result<PipelineState, Box<dyn std::error::Error>> {
    let counters = Arc::new(PipelineCounters::new());
    let state = StateHandle::new();

    let db = match &config.database.path {
        Some(path) => {
            let db = open_database(path)?;
            info!("Database opened at {path}");
            match db.quarantine_count() {
                Ok(n) => info!("{n} quarantined messages on record"),
                Err(e) => warn!("Failed to count quarantined messages: {e}"),
            }
            Some(db)
        }
        None => None,
    };

    let store = Arc::new(WalletStore::new(
        config.wallet_state.shards,
        config.wallet_state.capacity,
        AggregationParams {
            activity_half_life_secs: config.wallet_state.activity_half_life_secs,
            max_tracked_protocols: config.wallet_state.max_tracked_protocols,
        },
    ));
    if let Some(db) = &db {
        match db.load_snapshot() {
            Ok(wallets) => info!("Restored {} wallet feature vectors", store.restore(wallets)),
            Err(e) => warn!("Failed to load wallet snapshot, starting empty: {e}"),
        }
    }

    let engine = Arc::new(ScoringEngine::new(ModelRegistry::from_config(&config.scoring.models)));
    info!("Scoring models loaded: {:?}", engine.model_versions());

    let score_sink = sink::build_sink(&config.sink, DEFAULT_SCORES_PATH)?;
    let dead_letter = sink::build_sink(&config.dead_letter, DEFAULT_QUARANTINE_PATH)?;
    info!("Output sink: {}, dead letter: {}", score_sink.kind(), dead_letter.kind());

    let publisher = Arc::new(Publisher::new(
        score_sink,
        counters.clone(),
        &config.publisher,
        std::time::Duration::from_millis(config.sink.timeout_ms),
    ));
    let quarantine = Arc::new(Quarantine::new(Some(dead_letter), db.clone(), counters.clone()));
    let alerter = Arc::new(OpsAlerter::new(&config.alerts, counters.clone()));
    let consumer = StreamConsumer::new(source::build_event_log(&config.source)?, &config.pipeline, &config.source);

    let mut coordinator = Coordinator::new(
        PipelineParts {
            consumer,
            engine,
            store: store.clone(),
            publisher,
            quarantine,
            alerter,
            counters: counters.clone(),
            state: state.clone(),
        },
        &config.scoring.model_version,
        config.pipeline.worker_concurrency,
        config.pipeline.drain_timeout(),
    );

    let app = http::router(http::AppState {
        counters,
        state,
        store: store.clone(),
        model_version: config.scoring.model_version.clone(),
        started_at: Utc::now(),
    });
    let listener = tokio::net::TcpListener::bind(&config.http.bind).await?;
    info!("HTTP surface listening on {}", config.http.bind);

    let (stop_tx, stop_rx) = watch::channel(false);

    let signal_tx = stop_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {e}"),
        }
        let _ = signal_tx.send(true);
    });

    let mut http_stop = stop_rx.clone();
    let server = tokio::spawn(async move {
        let shutdown = async move {
            let _ = http_stop.wait_for(|stop| *stop).await;
        };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
            error!("HTTP server error: {e}");
        }
    });

    let final_state = coordinator.run(stop_rx).await;

    // The pipeline is done either way; take the HTTP surface down with it.
    let _ = stop_tx.send(true);
    if let Err(e) = server.await {
        warn!("HTTP task ended abnormally: {e}");
    }

    if let Some(db) = &db {
        match db.save_snapshot(&store.snapshot()) {
            Ok(n) => info!("Saved {n} wallet feature vectors"),
            Err(e) => error!("Failed to save wallet snapshot: {e}"),
        }
    }

    info!("repscore exiting in state {}", final_state.as_str());
    Ok(final_state)
}
