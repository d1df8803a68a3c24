use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use tag_loader::config::{self, SchedulerConfig};
use tag_loader::log::parse_log_level;
use tag_loader::manifest::{load_manifest, ManifestRegistry};
use tag_loader::{log_error, log_info, log_warn};
use tag_loader::{spawn_scheduler, AssetRegistry, LoadOptions, SchedulerEvent};

const DEFAULT_CONFIG_FILE: &str = "tag-loader.toml";

#[derive(Parser)]
#[command(name = "tag-loader", about = "Tag-driven adaptive asset load scheduler")]
struct Cli {
    /// Log verbosity level (error, warn, info, debug)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load tagged assets from a manifest under a simulated frame clock
    Simulate {
        /// TOML manifest describing assets, their tags and simulated latency
        #[arg(long)]
        manifest: PathBuf,
        /// Tag to load (can be specified multiple times)
        #[arg(long = "tag", required = true, action = clap::ArgAction::Append)]
        tags: Vec<String>,
        /// Scheduler config file (defaults to ./tag-loader.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Batch priority
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        priority: i32,
        /// Phase label echoed in progress output
        #[arg(long)]
        phase: Option<String>,
        /// Simulated frame rate
        #[arg(long, default_value = "60")]
        fps: u32,
        /// Inject a frame hitch every N frames (0 disables)
        #[arg(long, default_value = "0")]
        hitch_every: u32,
        /// Extra milliseconds added to a hitched frame
        #[arg(long, default_value = "120")]
        hitch_ms: u64,
        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Validate a scheduler config file
    CheckConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

/// Global shutdown flag shared with signal handlers.
fn shutdown_flag() -> &'static Arc<AtomicBool> {
    static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    FLAG.get_or_init(|| Arc::new(AtomicBool::new(false)))
}

fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

fn install_signal_handlers() -> Result<(), String> {
    let flag = Arc::clone(shutdown_flag());
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))
        .map_err(|e| format!("Failed to register SIGTERM handler: {}", e))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, flag)
        .map_err(|e| format!("Failed to register SIGINT handler: {}", e))?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match parse_log_level(&cli.log_level) {
        Ok(level) => tag_loader::log::set_log_level(level),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    let result = match cli.command {
        Commands::Simulate {
            manifest,
            tags,
            config,
            priority,
            phase,
            fps,
            hitch_every,
            hitch_ms,
            json,
        } => {
            let params = SimulateParams {
                tags,
                priority,
                phase,
                fps,
                hitch_every,
                hitch: Duration::from_millis(hitch_ms),
                json,
            };
            handle_simulate(&manifest, config.as_deref(), params).await
        }
        Commands::CheckConfig { config } => handle_check_config(&config),
    };

    if let Err(e) = result {
        log_error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn resolve_config(path: Option<&Path>) -> Result<SchedulerConfig, String> {
    let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
    config::load_config(path).map_err(|e| e.to_string())
}

fn handle_check_config(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Err(format!("{} does not exist", path.display()));
    }
    let config = resolve_config(Some(path))?;
    log_info!(
        "{} is valid (min={}, base={}, max={}, adaptive={})",
        path.display(),
        config.concurrency.min,
        config.concurrency.base,
        config.concurrency.max,
        config.adaptive.enabled
    );
    Ok(())
}

struct SimulateParams {
    tags: Vec<String>,
    priority: i32,
    phase: Option<String>,
    fps: u32,
    hitch_every: u32,
    hitch: Duration,
    json: bool,
}

fn print_event(event: &SchedulerEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => log_warn!("Failed to serialize event: {}", e),
        }
        return;
    }
    match event {
        SchedulerEvent::BatchProgress(p) => {
            println!("[{}] {}/{} {:?}", p.id, p.loaded, p.total, p.tags)
        }
        SchedulerEvent::GlobalProgress {
            loaded,
            total,
            errors,
            asset,
            error,
        } => match error {
            Some(message) => println!(
                "[global] {}/{} ({} errors) {} failed: {}",
                loaded, total, errors, asset, message
            ),
            None => println!("[global] {}/{} ({} errors) {} ready", loaded, total, errors, asset),
        },
        SchedulerEvent::ConcurrencyChanged { current, base, cap } => {
            println!("[concurrency] current={} base={} cap={}", current, base, cap)
        }
    }
}

async fn handle_simulate(
    manifest_path: &Path,
    config_path: Option<&Path>,
    params: SimulateParams,
) -> Result<(), String> {
    let config = resolve_config(config_path)?;
    let manifest = load_manifest(manifest_path)?;
    let registry = Arc::new(ManifestRegistry::new(manifest));
    for tag in &params.tags {
        if registry.find_by_tag(tag.trim()).is_empty() {
            log_warn!(
                "Tag '{}' matches no assets (manifest tags: {})",
                tag,
                registry.tag_names().join(", ")
            );
        }
    }

    install_signal_handlers()?;

    let (handle, scheduler_task) = spawn_scheduler(registry, config);
    let mut events = handle.subscribe();

    // Set up cancellation for graceful shutdown
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        loop {
            if is_shutdown_requested() {
                cancel_clone.cancel();
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    });

    let mut options = LoadOptions::with_priority(params.priority);
    options.phase = params.phase.clone();
    let ticket = handle
        .submit(params.tags.as_slice(), options)
        .await
        .map_err(|e| e.to_string())?;
    log_info!("Submitted {} for tags {:?}", ticket.id(), params.tags);

    let frame = Duration::from_secs_f64(1.0 / f64::from(params.fps.max(1)));
    let mut clock = tokio::time::interval(frame);
    let mut last_frame = Instant::now();
    let mut frame_index: u64 = 0;
    let mut cancel_sent = false;

    let wait = ticket.wait();
    tokio::pin!(wait);

    let result = loop {
        tokio::select! {
            result = &mut wait => break result,
            _ = clock.tick() => {
                frame_index += 1;
                let now = Instant::now();
                let mut delta = now.duration_since(last_frame);
                last_frame = now;
                if params.hitch_every > 0 && frame_index % u64::from(params.hitch_every) == 0 {
                    delta += params.hitch;
                }
                handle
                    .tick(delta.as_secs_f64())
                    .await
                    .map_err(|e| e.to_string())?;
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event, params.json),
                Err(RecvError::Lagged(skipped)) => log_warn!("Dropped {} events", skipped),
                Err(RecvError::Closed) => {}
            },
            _ = cancel.cancelled(), if !cancel_sent => {
                cancel_sent = true;
                log_info!("Shutdown requested, cancelling outstanding batches...");
                handle.cancel_all().await.map_err(|e| e.to_string())?;
            }
        }
    };

    // Flush whatever progress arrived alongside settlement.
    while let Ok(event) = events.try_recv() {
        print_event(&event, params.json);
    }

    let snapshot = handle.snapshot().await.map_err(|e| e.to_string())?;
    drop(handle);
    if let Err(e) = scheduler_task.await {
        log_warn!("Scheduler task ended abnormally: {:?}", e);
    }

    match result {
        Ok(outcome) => {
            log_info!(
                "Loaded {}/{} assets for {:?} in {} frames (final concurrency {})",
                outcome.loaded,
                outcome.total,
                outcome.tags,
                frame_index,
                snapshot.current_concurrency
            );
            Ok(())
        }
        Err(e) => Err(format!(
            "{} ({} of {} tracked assets failed)",
            e, snapshot.progress.errors, snapshot.progress.total
        )),
    }
}
