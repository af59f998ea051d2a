//! Pulse Reseed CLI
//!
//! Command-line interface for deriving seeds from beacon output and for
//! running a reseeding generator against replayed pulses.

use clap::{Parser, Subcommand};
use pulse_reseed::{
    beacon::ReplayBeacon,
    derivation::{derive, derive_with_clock, FixedClock},
    metrics::{MetricsRegistry, MetricsSnapshot},
    reseeding::{channel, FailurePolicy, FileConfig, ReseedingGenerator, SentinelState},
};
use rand_chacha::ChaCha20Rng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "pulse-reseed", version, about = "Beacon-reseeded random number generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Derive a seed from a pulse output value and print its trace.
    Derive {
        /// Hex pulse output (at least 9 digits).
        pulse: String,
        /// Pin the clock to the Unix epoch for reproducible output.
        #[arg(long)]
        epoch: bool,
    },
    /// Run a reseeding generator against pulses replayed from a file.
    Run {
        /// JSON array of pulses; overrides the config file.
        #[arg(long)]
        pulses: Option<PathBuf>,
        /// TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Values to draw after each pulse; overrides the config file.
        #[arg(long)]
        draws: Option<u32>,
        /// Retry failed fetches with backoff instead of halting.
        #[arg(long)]
        retry: bool,
    },
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Derive { pulse, epoch } => run_derive(&pulse, epoch),
        Command::Run {
            pulses,
            config,
            draws,
            retry,
        } => run_generator(pulses, config, draws, retry),
    };
    std::process::exit(code);
}

fn run_derive(pulse: &str, epoch: bool) -> i32 {
    let derived = if epoch {
        derive_with_clock(pulse, &FixedClock::epoch())
    } else {
        derive(pulse)
    };

    match derived {
        Ok(derived) => {
            println!("seed: {}", derived.seed());
            for (i, part) in derived.trace().iter().enumerate() {
                println!("  [{:3}] {:#010x} ({})", i, part, part);
            }
            0
        }
        Err(e) => {
            eprintln!("Derivation failed: {}", e);
            2
        }
    }
}

fn run_generator(
    pulses: Option<PathBuf>,
    config_path: Option<PathBuf>,
    draws: Option<u32>,
    retry: bool,
) -> i32 {
    let mut config = match config_path {
        Some(path) => match FileConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path.display(), e);
                return 1;
            }
        },
        None => FileConfig::default(),
    };
    if retry {
        config.reseed.failure_policy = FailurePolicy::retry();
    }
    let draws = draws.unwrap_or(config.output.draws_per_pulse);

    let Some(pulse_path) = pulses.or(config.beacon.pulses.clone()) else {
        eprintln!("No pulse source: pass --pulses or set [beacon] pulses in the config");
        return 1;
    };
    let beacon = match ReplayBeacon::from_file(&pulse_path) {
        Ok(beacon) => beacon,
        Err(e) => {
            eprintln!("Failed to load pulses from {}: {}", pulse_path.display(), e);
            return 1;
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        if let Err(e) = ctrlc::set_handler(move || running.store(false, Ordering::SeqCst)) {
            warn!("Failed to install Ctrl-C handler: {}", e);
        }
    }

    info!("Pulse Reseed v{}", pulse_reseed::VERSION);

    // Notifications are delivered on this thread via the dispatch queue.
    let (dispatcher, queue) = channel(64, Duration::from_millis(250));
    let generator = ReseedingGenerator::<ChaCha20Rng>::builder(beacon)
        .config(config.reseed.clone())
        .dispatcher(dispatcher)
        .on_pulse(move |event| {
            let values: Vec<String> = (0..draws)
                .map(|_| event.generator.next().to_string())
                .collect();
            println!(
                "pulse {} seed={} draws=[{}]",
                event
                    .pulse
                    .metadata()
                    .pulse_index
                    .map_or_else(|| "-".to_string(), |i| i.to_string()),
                event.seed,
                values.join(", ")
            );
        })
        .create();

    let registry = match MetricsRegistry::new() {
        Ok(registry) => registry,
        Err(e) => {
            error!("Failed to create metrics registry: {}", e);
            return 1;
        }
    };

    #[cfg(feature = "metrics")]
    let server_state = spawn_metrics_server(config.output.metrics_port);

    while running.load(Ordering::SeqCst) {
        queue.run_for(Duration::from_millis(200));

        let stats = generator.stats();
        let snapshot = MetricsSnapshot::from(&stats);
        registry.update(&snapshot);
        #[cfg(feature = "metrics")]
        {
            if let Some(state) = &server_state {
                state.blocking_write().update(&snapshot);
            }
        }

        if stats.state == SentinelState::Faulted {
            warn!("Sentinel halted after a fetch failure; rerun with --retry to keep polling");
            break;
        }
    }

    generator.stop_sentinel();
    queue.run_pending();

    let stats = generator.stats();
    registry.update(&MetricsSnapshot::from(&stats));
    match registry.encode() {
        Ok(text) => debug!(metrics = %text, "Final metrics"),
        Err(e) => warn!("Failed to encode metrics: {}", e),
    }
    info!(
        "Done. Reseed count: {}, fetch failures: {}, final state: {:?}",
        stats.reseed_count, stats.fetch_failures, stats.state
    );
    0
}

#[cfg(feature = "metrics")]
fn spawn_metrics_server(port: u16) -> Option<pulse_reseed::metrics::SharedMetrics> {
    use pulse_reseed::metrics::{MetricsServer, MetricsServerConfig};

    if port == 0 {
        return None;
    }
    let registry = match MetricsRegistry::new() {
        Ok(registry) => registry,
        Err(e) => {
            error!("Failed to create metrics registry: {}", e);
            return None;
        }
    };
    let server = MetricsServer::new(MetricsServerConfig::with_port(port), registry);
    let state = server.state();

    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Failed to start metrics runtime: {}", e);
                return;
            }
        };
        if let Err(e) = runtime.block_on(server.run()) {
            error!("Metrics server stopped: {}", e);
        }
    });

    Some(state)
}
