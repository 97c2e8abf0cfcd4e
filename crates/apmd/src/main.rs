//! apmd: APM agent daemon.
//!
//! Assembles the telemetry core in one process:
//! - Transaction recorder (shared metrics table + event sink)
//! - Span streaming transport (when infinite tracing is on)
//! - Harvest loop
//! - Synthetic transaction load
//!
//! # Usage
//!
//! ```text
//! apmd run --config apm.toml
//! apmd simulate --transactions 500 --capacity 100
//! ```

mod load;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use apm_core::{AgentConfig, SpanEvent};
use apm_events::{ChannelTransport, SpanTransport};
use apm_recorder::{HarvestPayload, Harvester, LogReporter, Reporter, TransactionRecorder};
use apm_stats::MetricEntry;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "apmd", about = "APM agent daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the harvest loop against synthetic load until Ctrl-C.
    Run {
        /// Path to apm.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Harvest interval in seconds (overrides the config file).
        #[arg(long)]
        harvest_interval: Option<u64>,

        /// Milliseconds between synthetic transactions.
        #[arg(long, default_value = "250")]
        load_interval_ms: u64,
    },
    /// Run a batch of concurrent transactions, harvest once, print JSON.
    Simulate {
        /// Path to apm.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of transactions.
        #[arg(long, default_value = "100")]
        transactions: usize,

        /// Span event buffer capacity (overrides the config file).
        #[arg(long)]
        capacity: Option<usize>,

        /// Stream spans instead of sampling them.
        #[arg(long)]
        streaming: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,apmd=debug,apm=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            harvest_interval,
            load_interval_ms,
        } => {
            let mut config = load_config(config)?;
            if let Some(secs) = harvest_interval {
                config.harvest.interval_secs = secs;
            }
            config.validate()?;
            run(config, Duration::from_millis(load_interval_ms)).await
        }
        Command::Simulate {
            config,
            transactions,
            capacity,
            streaming,
        } => {
            let mut config = load_config(config)?;
            if let Some(capacity) = capacity {
                config.span_events.max_samples_stored = capacity;
            }
            if streaming {
                config.infinite_tracing.enabled = true;
            }
            config.validate()?;
            simulate(config, transactions).await
        }
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<AgentConfig> {
    match path {
        Some(path) => {
            let config = AgentConfig::from_file(&path)?;
            info!(path = ?path, "configuration loaded");
            Ok(config)
        }
        None => Ok(AgentConfig::default()),
    }
}

/// Spawn the task that consumes streamed spans. Stands in for the
/// network stream to the trace observer.
fn spawn_stream_consumer(
    queue_size: usize,
) -> anyhow::Result<(Arc<dyn SpanTransport<SpanEvent>>, JoinHandle<u64>)> {
    let (transport, mut rx) = ChannelTransport::<SpanEvent>::new(queue_size)?;
    info!(queue_size, "span stream queue created");
    let handle = tokio::spawn(async move {
        let mut streamed = 0u64;
        while let Some(span) = rx.recv().await {
            streamed += 1;
            debug!(name = %span.name, guid = %span.guid, "span streamed");
        }
        streamed
    });
    Ok((Arc::new(transport), handle))
}

fn build_recorder(
    config: &AgentConfig,
) -> anyhow::Result<(Arc<TransactionRecorder>, Option<JoinHandle<u64>>)> {
    let (transport, consumer) = if config.infinite_tracing.enabled {
        let (transport, handle) = spawn_stream_consumer(config.infinite_tracing.span_queue_size)?;
        (Some(transport), Some(handle))
    } else {
        (None, None)
    };
    let recorder = TransactionRecorder::from_config(config, transport)?;
    Ok((Arc::new(recorder), consumer))
}

async fn run(config: AgentConfig, load_interval: Duration) -> anyhow::Result<()> {
    info!(app_name = %config.app_name, "apmd starting");

    let (recorder, consumer) = build_recorder(&config)?;
    let harvester = Harvester::new(
        &recorder,
        Arc::new(LogReporter),
        Duration::from_secs(config.harvest.interval_secs),
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut load_shutdown = shutdown_rx.clone();

    // ── Background tasks ───────────────────────────────────────

    let harvest_handle = tokio::spawn(async move {
        harvester.run(shutdown_rx).await;
    });

    let load_recorder = recorder.clone();
    let load_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(load_interval) => {
                    if let Err(e) = load::run_transaction(&load_recorder) {
                        warn!(error = %e, "synthetic transaction failed");
                    }
                }
                _ = load_shutdown.changed() => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = load_handle.await;
    let _ = harvest_handle.await;

    // Closing the transport ends the consumer.
    drop(recorder);
    if let Some(consumer) = consumer {
        let streamed = consumer.await.unwrap_or_default();
        info!(streamed, "span stream closed");
    }

    info!("apmd stopped");
    Ok(())
}

/// Holds the last payload's metrics for printing.
#[derive(Default)]
struct CapturingReporter {
    entries: Mutex<Vec<MetricEntry>>,
}

impl Reporter for CapturingReporter {
    fn report(&self, payload: &HarvestPayload) -> anyhow::Result<()> {
        *self.entries.lock().unwrap_or_else(PoisonError::into_inner) = payload.metrics.entries();
        Ok(())
    }
}

#[derive(Serialize)]
struct SimulationSummary {
    app_name: String,
    sink: &'static str,
    transactions: usize,
    finalized: u64,
    failed: u64,
    span_events_kept: usize,
    span_events_seen: u64,
    span_events_dropped: u64,
    span_events_streamed: u64,
    metrics: Vec<MetricEntry>,
}

async fn simulate(config: AgentConfig, transactions: usize) -> anyhow::Result<()> {
    let (recorder, consumer) = build_recorder(&config)?;
    let reporter = Arc::new(CapturingReporter::default());
    let harvester = Harvester::new(
        &recorder,
        reporter.clone(),
        Duration::from_secs(config.harvest.interval_secs),
    );

    let mut handles = Vec::with_capacity(transactions);
    for _ in 0..transactions {
        let recorder = recorder.clone();
        handles.push(tokio::spawn(async move { load::run_transaction(&recorder) }));
    }
    for handle in handles {
        if let Err(e) = handle.await? {
            warn!(error = %e, "synthetic transaction failed");
        }
    }

    let harvest = harvester.harvest_once()?;
    let sink = recorder.sink().mode_name();
    let finalized = recorder.finalized_count();
    let failed = recorder.failed_count();

    drop(harvester);
    drop(recorder);
    let streamed = match consumer {
        Some(consumer) => consumer.await?,
        None => 0,
    };

    let metrics = std::mem::take(
        &mut *reporter
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner),
    );
    let summary = SimulationSummary {
        app_name: config.app_name,
        sink,
        transactions,
        finalized,
        failed,
        span_events_kept: harvest.span_events,
        span_events_seen: harvest.events_seen,
        span_events_dropped: harvest.events_dropped,
        span_events_streamed: streamed,
        metrics,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
