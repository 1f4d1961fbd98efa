use anyhow::Result;
use clap::Parser;
use gaitstream::{
    Collaborators, DetectionMode, DirectoryFrameSource, EventBus, EventFilter, FallbackSessionStore,
    GaitConfig, GaitEvent, GaitOrchestrator, InMemorySessionStore, JsonPresetStore, OrchestratorHandle,
    ShutdownReason, WebSocketConnector,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "gaitstream")]
#[command(about = "Real-time canine gait analysis client")]
#[command(version)]
#[command(long_about = "Streams camera frames to a remote pose-inference service, \
tracks the returned keypoints and derives joint angles and gait metrics for one \
recording session. Supports AI pose estimation and coloured-marker tracking.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "gaitstream.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without connecting")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Dog the session is recorded for
    #[arg(long, default_value = "unknown", help = "Identifier of the dog being recorded")]
    dog_id: String,

    /// Free-form session notes
    #[arg(long)]
    notes: Option<String>,

    /// Detection mode override
    #[arg(long, value_name = "MODE", help = "Detection mode: ai_pose or color_marker")]
    mode: Option<DetectionMode>,

    /// Marker preset applied before the session starts
    #[arg(long, value_name = "ID")]
    preset: Option<String>,

    /// Stop automatically after this many seconds
    #[arg(long, value_name = "SECS")]
    duration_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting gaitstream v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = match GaitConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    if let Some(mode) = args.mode {
        config.calibration.default_mode = mode;
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        if args.validate_config {
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
        return Err(e.into());
    }
    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let collaborators = Collaborators {
        connector: Arc::new(WebSocketConnector::new(config.connection.connect_timeout())),
        frame_source: Box::new(DirectoryFrameSource::new(
            &config.capture.source_dir,
            config.capture.loop_source,
        )),
        preset_store: Arc::new(JsonPresetStore::new(&config.calibration.presets_path)),
        session_store: Arc::new(FallbackSessionStore::new(Arc::new(InMemorySessionStore::new()))),
    };

    let mut orchestrator = GaitOrchestrator::new(config, collaborators);
    orchestrator.start().await.map_err(|e| {
        error!("Failed to start pipeline: {}", e);
        e
    })?;

    spawn_update_logger(orchestrator.event_bus());
    spawn_session_driver(orchestrator.handle(), args.dog_id, args.notes, args.preset, args.duration_secs);

    let reason = orchestrator.run().await.map_err(|e| {
        error!("Pipeline error during execution: {}", e);
        e
    })?;

    let exit_code = match reason {
        ShutdownReason::Error(_) => 1,
        _ => 0,
    };
    info!("gaitstream exited with code: {}", exit_code);
    std::process::exit(exit_code);
}

/// Queue the session commands; they run once the event loop starts
fn spawn_session_driver(
    handle: OrchestratorHandle,
    dog_id: String,
    notes: Option<String>,
    preset: Option<String>,
    duration_secs: Option<u64>,
) {
    tokio::spawn(async move {
        if let Some(id) = preset {
            match handle.load_preset(&id).await {
                Ok(()) => info!("Applied marker preset '{}'", id),
                Err(e) => warn!("Could not apply marker preset '{}': {}", id, e),
            }
        }

        if let Err(e) = handle.start_session(&dog_id, notes).await {
            error!("Failed to start session: {}", e);
            let _ = handle
                .shutdown(ShutdownReason::Error(e.to_string()))
                .await;
            return;
        }

        if let Some(secs) = duration_secs {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            info!("Recording duration of {}s elapsed", secs);
            let _ = handle.shutdown(ShutdownReason::Timeout).await;
        }
    });
}

fn spawn_update_logger(bus: EventBus) {
    let mut receiver = bus.receiver(
        EventFilter::EventTypes(vec!["analysis_updated", "session_ended"]),
        "cli",
    );
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(GaitEvent::AnalysisUpdated { update }) => match update.gait_metrics {
                    Some(metrics) => info!(
                        "speed {:.2} px/s, stride {:.2} px, cadence {:.0}/min, symmetry {:.3}, smoothness {:.3}",
                        metrics.speed, metrics.stride_length, metrics.cadence, metrics.symmetry, metrics.smoothness
                    ),
                    None => info!("Frame {} analysed (confidence {:.2})", update.timestamp, update.confidence),
                },
                Ok(GaitEvent::SessionEnded { session }) => {
                    if let Some(summary) = session.metrics_summary {
                        info!(
                            "Session {} summary over {} samples: speed {:.2}, stride {:.2}, cadence {:.0}, symmetry {:.3}, smoothness {:.3}",
                            session.id,
                            summary.samples,
                            summary.avg_speed,
                            summary.avg_stride_length,
                            summary.avg_cadence,
                            summary.avg_symmetry,
                            summary.avg_smoothness
                        );
                    }
                }
                Ok(_) => {}
                Err(gaitstream::error::EventBusError::Lagged { .. }) => continue,
                Err(_) => break,
            }
        }
    });
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gaitstream={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print the default configuration as TOML
fn print_default_config() -> Result<()> {
    println!("# gaitstream configuration file");
    println!("# Every key can also be set through GAITSTREAM_<SECTION>__<KEY>,");
    println!("# e.g. GAITSTREAM_CONNECTION__RECONNECT_INTERVAL_MS=5000");
    println!();
    println!("{}", toml::to_string_pretty(&GaitConfig::default())?);
    Ok(())
}
