//! Velvet Pattern Engine CLI
//!
//! Runs the detection pipeline against a JSONL signal stream on stdin and
//! prints interventions as they dispatch.

use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use velvet_pattern_engine::{
    EngineConfig, PatternEngine, RawSignalEvent, PRIVACY_DECLARATION, VERSION,
};

#[derive(Parser)]
#[command(name = "velvet-patterns")]
#[command(author = "Velvet")]
#[command(version = VERSION)]
#[command(about = "Real-time behavioral pattern detection and intervention engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine, reading JSONL signal events from stdin
    Run {
        /// Configuration file (defaults to the standard config location)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the batch tick interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Override the intervention cooldown in milliseconds
        #[arg(long)]
        cooldown_ms: Option<u64>,
    },

    /// Run the HTTP ingest server for local adapters
    #[cfg(feature = "server")]
    Serve {
        /// Port to bind on 127.0.0.1 (0 for random)
        #[arg(long, default_value = "4876")]
        port: u16,

        /// Configuration file (defaults to the standard config location)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show the active configuration
    Config,

    /// Display privacy declaration
    Privacy,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            interval_ms,
            cooldown_ms,
        } => cmd_run(config, interval_ms, cooldown_ms),
        #[cfg(feature = "server")]
        Commands::Serve { port, config } => cmd_serve(port, config),
        Commands::Config => cmd_config(),
        Commands::Privacy => cmd_privacy(),
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

fn load_config(path: Option<PathBuf>) -> EngineConfig {
    let result = match path {
        Some(path) => std::fs::read_to_string(&path)
            .map_err(|e| format!("read {path:?}: {e}"))
            .and_then(|content| {
                serde_json::from_str::<EngineConfig>(&content)
                    .map_err(|e| format!("parse {path:?}: {e}"))
            }),
        None => EngineConfig::load().map_err(|e| e.to_string()),
    };

    match result {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_run(config_path: Option<PathBuf>, interval_ms: Option<u64>, cooldown_ms: Option<u64>) {
    init_tracing();

    println!("Velvet Pattern Engine v{VERSION}");
    println!();

    let mut config = load_config(config_path);
    if let Some(interval) = interval_ms {
        config.batch.interval_ms = interval;
    }
    if let Some(cooldown) = cooldown_ms {
        config.dispatch.cooldown_ms = cooldown;
    }

    let engine = match PatternEngine::start(config.clone()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error starting engine: {e}");
            std::process::exit(1);
        }
    };

    println!("Features:");
    for feature in &config.features {
        println!("  {} ({} detectors)", feature.id, feature.detectors.len());
    }
    println!("  Batch interval: {}ms", config.batch.interval_ms);
    println!("  Cooldown: {}ms", config.dispatch.cooldown_ms);
    println!();
    println!("Reading JSONL signal events from stdin. Press Ctrl+C to stop.");
    println!();

    let (_subscription, interventions) = engine.subscribe();

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");

    // Stdin adapter: one JSON event per line.
    let sender = engine.sender();
    let reader_running = running.clone();
    // Detached on purpose: the thread parks on stdin and dies with the
    // process.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            if !reader_running.load(Ordering::SeqCst) {
                break;
            }
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RawSignalEvent>(&line) {
                Ok(event) => {
                    if sender.push(event).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    eprintln!("Warning: skipping unparseable event: {e}");
                }
            }
        }
    });

    // Print interventions as they dispatch.
    while running.load(Ordering::SeqCst) {
        match interventions.recv_timeout(Duration::from_millis(100)) {
            Ok(intervention) => {
                println!(
                    "[{}] {} :: {} (key: {})",
                    intervention.created_at.format("%H:%M:%S"),
                    intervention.priority,
                    intervention.message,
                    intervention.dedup_key
                );
                for line in &intervention.evidence {
                    println!("    - {line}");
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    println!();
    println!("Stopping engine...");
    println!();
    println!("{}", engine.summary());
    engine.shutdown();
}

#[cfg(feature = "server")]
fn cmd_serve(port: u16, config_path: Option<PathBuf>) {
    use velvet_pattern_engine::server::{run_server, ServerConfig, ServerState};

    init_tracing();

    println!("Velvet Pattern Engine v{VERSION}");
    println!();

    let config = load_config(config_path);
    let engine = match PatternEngine::start(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error starting engine: {e}");
            std::process::exit(1);
        }
    };

    // Print interventions while the server runs.
    let (_subscription, interventions) = engine.subscribe();
    std::thread::spawn(move || {
        while let Ok(intervention) = interventions.recv() {
            println!(
                "[{}] {} :: {}",
                intervention.created_at.format("%H:%M:%S"),
                intervention.priority,
                intervention.message
            );
        }
    });

    let state = Arc::new(ServerState::new(
        engine.sender(),
        engine.metrics_handle(),
        engine.clock(),
    ));

    let runtime = tokio::runtime::Runtime::new().expect("Error creating tokio runtime");
    if let Err(e) = runtime.block_on(run_server(ServerConfig::new(port), state)) {
        eprintln!("Server error: {e}");
    }

    println!();
    println!("{}", engine.summary());
    engine.shutdown();
}

fn cmd_config() {
    let config = EngineConfig::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", EngineConfig::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

fn cmd_privacy() {
    println!("{PRIVACY_DECLARATION}");
}
