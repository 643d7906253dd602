//! cmd-dispatch: many concurrent publishers, one serialized channel.
//!
//! Spawns producer tasks that publish through a single dispatcher backed by
//! the in-memory channel, optionally dropping the connection at random, then
//! shuts the dispatcher down and prints what happened.

mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

use cmd_dispatch_core::impls::{ChannelError, InMemoryChannelProvider, Journal};
use cmd_dispatch_core::{BuildError, DispatchError, Dispatcher, DispatcherBuilder};

use crate::telemetry::LogFormat;

const QUEUE: &str = "demo.events";

type DemoDispatcher = Dispatcher<InMemoryChannelProvider>;

#[derive(Debug, Parser)]
#[command(
    name = "cmd-dispatch",
    about = "Drive concurrent publishers through one serialized channel"
)]
struct Cli {
    /// Number of concurrent producer tasks.
    #[arg(long, default_value_t = 4)]
    producers: u32,

    /// Messages each producer publishes.
    #[arg(long, default_value_t = 25)]
    commands: u32,

    /// Drop the connection on roughly one in N commands (0 disables).
    #[arg(long, default_value_t = 0)]
    outage_every: u32,

    /// Progress report interval in milliseconds.
    #[arg(long, default_value_t = 500)]
    report_interval_ms: u64,

    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// tracing `EnvFilter` directive.
    #[arg(long, default_value = "info")]
    log_filter: String,

    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Telemetry(#[from] telemetry::TelemetryError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("failed to declare the demo queue: {0}")]
    Declare(DispatchError<ChannelError>),

    #[error("failed to encode summary: {0}")]
    Summary(#[from] serde_json::Error),

    #[error("shutdown task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Default)]
struct Tally {
    sent: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl Tally {
    fn record<T>(&self, result: &Result<T, DispatchError<ChannelError>>) {
        let counter = match result {
            Ok(_) => &self.sent,
            Err(DispatchError::Failed(_) | DispatchError::Panicked(_)) => &self.failed,
            Err(DispatchError::Cancelled) => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    sent: u64,
    failed: u64,
    cancelled: u64,
    reconnects: u64,
    queue_depth: Option<u64>,
}

impl Summary {
    fn collect(tally: &Tally, journal: &Journal) -> Self {
        Self {
            sent: tally.sent.load(Ordering::Relaxed),
            failed: tally.failed.load(Ordering::Relaxed),
            cancelled: tally.cancelled.load(Ordering::Relaxed),
            reconnects: journal.reconnects(),
            queue_depth: journal.queue_depth(QUEUE),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("cmd-dispatch: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    telemetry::init(&cli.log_filter, cli.log_format)?;

    let provider = InMemoryChannelProvider::new();
    let journal = provider.journal();
    let dispatcher = Arc::new(DispatcherBuilder::new(provider).name("demo").build()?);

    dispatcher
        .call(|channel| channel.declare_queue(QUEUE))
        .await
        .map_err(CliError::Declare)?;

    let tally = Arc::new(Tally::default());
    let reporter = tokio::spawn(report(
        Arc::clone(&tally),
        Duration::from_millis(cli.report_interval_ms),
    ));

    let producers: Vec<_> = (0..cli.producers)
        .map(|producer| {
            tokio::spawn(produce(
                producer,
                cli.commands,
                cli.outage_every,
                Arc::clone(&dispatcher),
                journal.clone(),
                Arc::clone(&tally),
            ))
        })
        .collect();

    tokio::select! {
        _ = wait_all(producers) => info!("all producers finished"),
        _ = tokio::signal::ctrl_c() => info!("interrupted; shutting down"),
    }
    reporter.abort();

    // shutdown() joins the loop thread, so keep it off the async workers.
    let stopping = Arc::clone(&dispatcher);
    tokio::task::spawn_blocking(move || stopping.shutdown()).await?;

    let summary = Summary::collect(&tally, &journal);
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "sent={} failed={} cancelled={} reconnects={} queue_depth={}",
            summary.sent,
            summary.failed,
            summary.cancelled,
            summary.reconnects,
            summary.queue_depth.unwrap_or_default()
        );
    }
    Ok(())
}

async fn produce(
    producer: u32,
    commands: u32,
    outage_every: u32,
    dispatcher: Arc<DemoDispatcher>,
    journal: Journal,
    tally: Arc<Tally>,
) {
    for n in 0..commands {
        let outage = outage_every > 0 && rand::thread_rng().gen_ratio(1, outage_every);
        if outage {
            journal.drop_connection();
        }

        let body = format!("producer-{producer} message-{n}");
        let result = dispatcher
            .call(move |channel| channel.publish("", QUEUE, body))
            .await;
        tally.record(&result);

        if matches!(result, Err(DispatchError::Cancelled)) {
            break;
        }
    }
}

async fn wait_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(err) = handle.await {
            error!(error = %err, "producer task failed");
        }
    }
}

async fn report(tally: Arc<Tally>, every: Duration) {
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(10)));
    // interval の最初の tick は即時に完了するので読み捨てる
    ticker.tick().await;
    loop {
        ticker.tick().await;
        info!(
            sent = tally.sent.load(Ordering::Relaxed),
            failed = tally.failed.load(Ordering::Relaxed),
            cancelled = tally.cancelled.load(Ordering::Relaxed),
            "progress"
        );
    }
}
