//! Nebula Station CLI
//!
//! Entry point for the `station` command-line tool.

use clap::{Parser, Subcommand};
use nebula_station::config::EffectiveConfig;
use nebula_station::logging::{self, LoggingConfig};
use nebula_station::{
    AcceptAll, AlgorithmFactory, ChannelSink, CommandVerifierFactory, ErrorCode, JobState,
    Station, StatusEvent, TimedWait,
};
use serde_json::json;
use station_classifier::{check_rules, RulesError};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{mpsc, Arc};
use std::thread;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "station")]
#[command(about = "Hardware test station: remote control and verification per device", version)]
struct Cli {
    /// Path to station config file (TOML)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for one device
    Run {
        /// Device name passed to the control script
        #[arg(long)]
        device: String,

        /// Data directory the device writes its captures to
        #[arg(long)]
        path: PathBuf,

        /// Override the control script path
        #[arg(long)]
        script: Option<PathBuf>,

        /// Override the run watchdog in seconds
        #[arg(long)]
        watchdog: Option<u64>,

        /// Print status events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Check a data directory against the capture rules
    CheckRules {
        /// Data directory to check
        dir: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

fn main() {
    let cli = Cli::parse();

    let overrides = cli_overrides(&cli);
    let effective = match EffectiveConfig::build(cli.config.as_deref(), overrides) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(e.code().exit_code());
        }
    };

    match LoggingConfig::from_log_config(&effective.station.log).and_then(logging::init) {
        Ok(()) => {}
        Err(e) => eprintln!("Warning: {}", e),
    }

    let code = match cli.command {
        Commands::Run { device, path, json, .. } => run_device(effective, &device, path, json),
        Commands::CheckRules { dir, json } => run_check_rules(&effective, &dir, json),
        Commands::Config => run_config(&effective),
    };
    process::exit(code);
}

/// CLI flags that override config values, in config-file shape.
fn cli_overrides(cli: &Cli) -> Option<serde_json::Value> {
    let mut overrides = serde_json::Map::new();

    if let Some(level) = &cli.log_level {
        overrides.insert("log".into(), json!({ "level": level }));
    }
    if let Commands::Run {
        script, watchdog, ..
    } = &cli.command
    {
        if let Some(script) = script {
            overrides.insert("script".into(), json!({ "path": script }));
        }
        if let Some(seconds) = watchdog {
            overrides.insert("watchdog".into(), json!({ "overall_seconds": seconds }));
        }
    }

    if overrides.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(overrides))
    }
}

fn run_device(effective: EffectiveConfig, device: &str, path: PathBuf, json_output: bool) -> i32 {
    let config = effective.station;
    let watchdog_seconds = config.watchdog.overall_seconds;

    let factory: Arc<dyn AlgorithmFactory> = match &config.verifier.program {
        Some(program) => Arc::new(CommandVerifierFactory::new(program)),
        None => Arc::new(AcceptAll),
    };

    let (tx, rx) = mpsc::channel::<StatusEvent>();
    let printer = thread::spawn(move || {
        for event in rx {
            if json_output {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => eprintln!("Error serializing event: {}", e),
                }
            } else {
                println!("{:<12} {:<18} {}", event.device, event.stage, event.value);
            }
        }
    });

    let station = Arc::new(Station::new(config, Arc::new(ChannelSink::new(tx)), factory));
    station.set_path(path);

    let weak = Arc::downgrade(&station);
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nReceived interrupt signal, stopping device jobs...");
        if let Some(station) = weak.upgrade() {
            station.request_stop_all();
        }
    }) {
        warn!(error = %e, "failed to install signal handler");
    }

    let mut watchdog = TimedWait::new("watchdog");
    let overrun_device = device.to_string();
    if let Err(e) = watchdog.arm_secs(watchdog_seconds, move || {
        warn!(device = %overrun_device, seconds = watchdog_seconds, "device run overran the watchdog");
    }) {
        warn!(error = %e, "watchdog not armed");
    }

    let code = match station.attach(device).and_then(|()| station.wait(device)) {
        Ok(status) => {
            info!(state = ?status.state, result = ?status.result, "device run complete");
            match status.state {
                JobState::Succeeded => 0,
                _ => ErrorCode::TestFailed.exit_code(),
            }
        }
        Err(e) => {
            error!(error = %e, "device run failed");
            eprintln!("Error: {}", e);
            e.code().exit_code()
        }
    };
    watchdog.cancel();

    if let Err(e) = station.detach(device) {
        warn!(error = %e, "detach failed");
    }
    // Last strong reference: dropping it closes the status channel.
    drop(station);
    if printer.join().is_err() {
        warn!("status printer thread panicked");
    }

    code
}

fn run_check_rules(effective: &EffectiveConfig, dir: &Path, json_output: bool) -> i32 {
    let rules = &effective.station.rules;
    let outcome = check_rules(dir, rules);

    let (report, code) = match outcome {
        Ok(report) => (report, 0),
        Err(RulesError::CountMismatch { report, .. }) => (report, ErrorCode::TestFailed.exit_code()),
        Err(e @ RulesError::NotADirectory(_)) => {
            eprintln!("Error: {}", e);
            return ErrorCode::NotFound.exit_code();
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            return ErrorCode::Propagated.exit_code();
        }
    };

    if json_output {
        let output = json!({
            "passed": report.passed(),
            "matched": report.matched(),
            "report": report,
        });
        match serde_json::to_string_pretty(&output) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                return ErrorCode::Propagated.exit_code();
            }
        }
    } else {
        println!("Directory: {}", report.dir.display());
        println!("  Primary camera:       {}", report.primary_camera);
        println!("  Secondary camera:     {}", report.secondary_camera);
        println!("  Dual-cam calibration: {}", report.dual_camera_calibration);
        println!("  Matched: {} / required {}", report.matched(), report.required);
        println!("  Result: {}", if report.passed() { "PASS" } else { "FAIL" });
    }

    code
}

fn run_config(effective: &EffectiveConfig) -> i32 {
    match effective.to_json() {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            ErrorCode::Propagated.exit_code()
        }
    }
}
