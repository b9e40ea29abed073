use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use ratewatch::{Renderer, Settings};
use ratewatch_adapters::http::HttpProvider;
use ratewatch_monitor::{Flag, History, Monitor, Output, SessionHandle, Snapshot, SourceMode};
use tokio::sync::mpsc;
use tracing::info;

/// One tick as handed from the session callback to the render loop.
struct Update {
    snapshot: Snapshot,
    flags: Vec<Flag>,
    mode: SourceMode,
    history: Option<History>,
}

#[derive(Parser, Debug)]
#[command(name = "ratewatch")]
#[command(about = "Watch exchange rates and flag sudden moves")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rates endpoint returning a JSON `rates` map
    #[arg(short, long)]
    url: Option<String>,

    /// Comma-separated keys to track (e.g. "EUR,GBP,JPY")
    #[arg(short, long, value_delimiter = ',')]
    keys: Option<Vec<String>>,

    /// Refresh interval (e.g. "30s", "500ms")
    #[arg(short, long)]
    interval: Option<String>,

    /// Anomaly threshold as a fraction (0.10 flags moves above 10%)
    #[arg(short, long)]
    threshold: Option<f64>,

    /// How long a flag stays active (e.g. "10s")
    #[arg(long)]
    flag_ttl: Option<String>,

    /// Consecutive live failures before switching to hybrid mode
    #[arg(long)]
    max_failures: Option<u32>,

    /// Upper bound on a single fetch (e.g. "8s")
    #[arg(long)]
    fetch_timeout: Option<String>,

    /// Seed for reproducible synthetic rates
    #[arg(long)]
    seed: Option<u64>,

    /// Mirror the latest state to this JSON file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Stop after this many updates
    #[arg(long)]
    ticks: Option<u64>,

    /// Print updates as JSON lines instead of tables
    #[arg(long)]
    json: bool,
}

impl Args {
    /// Command-line flags take precedence over file and environment.
    fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(url) = &self.url {
            settings.url = url.clone();
        }
        if let Some(keys) = &self.keys {
            settings.keys = keys.clone();
        }
        if let Some(interval) = &self.interval {
            settings.interval = interval.clone();
        }
        if let Some(threshold) = self.threshold {
            settings.threshold = threshold;
        }
        if let Some(ttl) = &self.flag_ttl {
            settings.flag_ttl = ttl.clone();
        }
        if let Some(failures) = self.max_failures {
            settings.max_failures = failures;
        }
        if let Some(timeout) = &self.fetch_timeout {
            settings.fetch_timeout = timeout.clone();
        }
        if self.seed.is_some() {
            settings.seed = self.seed;
        }
        if self.output.is_some() {
            settings.output = self.output.clone();
        }
        settings
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let settings = args.apply(Settings::load(args.config.as_deref())?);
    let config = settings.monitor_config()?;

    let mut provider = HttpProvider::builder()
        .url(&settings.url)
        .rates_field(&settings.rates_field)
        .timeout(config.fetch_timeout);
    if let Some(token) = &settings.bearer_token {
        provider = provider.bearer_token(token);
    }
    let provider = provider
        .build()
        .with_context(|| format!("Failed to create HTTP provider for {}", settings.url))?;

    let mut builder = Monitor::builder()
        .config(config.clone())
        .provider(Arc::new(provider));
    for rule in settings.alerts.iter().cloned() {
        builder = builder.alert(rule);
    }
    if let Some(path) = &settings.output {
        builder = builder.output(Output::file(path));
    }
    let monitor = builder.build().context("Invalid monitor configuration")?;

    // The session publishes its state before each callback, so reading it
    // here pairs the snapshot with the mode and history of the same tick.
    // Sessions start in normal mode, which covers a tick that runs before
    // the handle is stored.
    let session: Arc<OnceLock<SessionHandle>> = Arc::new(OnceLock::new());
    let (tx, mut rx) = mpsc::unbounded_channel::<Update>();
    let handle = {
        let session = session.clone();
        monitor.start(move |snapshot, flags| {
            let (mode, history) = match session.get() {
                Some(handle) => (handle.state().mode, Some(handle.history())),
                None => (SourceMode::Normal, None),
            };
            let _ = tx.send(Update {
                snapshot: snapshot.clone(),
                flags: flags.to_vec(),
                mode,
                history,
            });
        })
    };
    let _ = session.set(handle.clone());

    let mut renderer = Renderer::new(config.threshold, args.json);
    let mut seen = 0u64;

    loop {
        tokio::select! {
            update = rx.recv() => {
                let Some(update) = update else {
                    break;
                };
                seen += 1;

                let line = renderer.render(
                    &update.snapshot,
                    &update.flags,
                    update.mode,
                    update.history.as_ref(),
                )?;
                println!("{}", line);
                if !args.json {
                    println!();
                }

                if args.ticks.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    handle.shutdown().await;
    info!(updates = seen, "Done");
    Ok(())
}
