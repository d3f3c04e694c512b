//! morning-tasks-rs: spoken checklist reminders.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use morning_tasks::cache::AnnouncementCache;
use morning_tasks::config::Config;
use morning_tasks::history::{self, HistoryStore, JsonlHistoryStore};
use morning_tasks::notifier::Notifier;
use morning_tasks::rollover::DayRollover;
use morning_tasks::schedule::Schedule;
use morning_tasks::scheduler::SystemClock;
use morning_tasks::service::{AlertService, ScheduleUpdate};
use morning_tasks::speech::kokoro::KokoroSynthesizer;
use morning_tasks::speech::native::NativeSpeaker;
use morning_tasks::speech::output::{NoOutput, RodioOutput};
use morning_tasks::speech::{AudioOutput, SpeechGateway};

#[derive(Parser, Debug)]
#[command(name = "morning-tasks-rs", about = "Spoken checklist reminders")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Checklist JSON file (overrides schedule.path)
    #[arg(short, long)]
    schedule: Option<PathBuf>,

    /// Print the completion report and exit
    #[arg(long)]
    report: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy ort internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,ort=info")
    } else {
        EnvFilter::new("info,ort=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(args.config.as_deref());
    let store: Arc<dyn HistoryStore> = Arc::new(JsonlHistoryStore::new(&config.history.path));

    if args.report {
        let today = chrono::Local::now().date_naive();
        println!("{}", history::generate_report(&store.load(), today));
        return Ok(());
    }

    info!("morning-tasks-rs starting");

    let schedule_path = args.schedule.unwrap_or_else(|| config.schedule.path.clone());
    let schedule = match Schedule::load(&schedule_path) {
        Ok(schedule) => schedule,
        Err(e) => {
            warn!("Failed to load {}: {e}, starting empty", schedule_path.display());
            Schedule::default()
        }
    };

    let output: Option<Arc<dyn AudioOutput>> = match RodioOutput::open() {
        Ok(output) => Some(Arc::new(output)),
        Err(e) => {
            warn!("{e}");
            None
        }
    };

    let mut gateway = SpeechGateway::new(
        output.clone().unwrap_or_else(|| Arc::new(NoOutput)),
        config.baseline.voice_params(),
    );
    if config.tts.enabled && output.is_some() {
        gateway = gateway.with_neural(Arc::new(KokoroSynthesizer::new(&config.tts)));
    }
    if config.baseline.enabled {
        match NativeSpeaker::start() {
            Ok(speaker) => gateway = gateway.with_baseline(Arc::new(speaker)),
            Err(e) => warn!("Failed to start platform speech: {e}"),
        }
    }
    let gateway = Arc::new(gateway);

    // Warm up the neural model in the background; alerts wait on the same init
    tokio::spawn({
        let gateway = gateway.clone();
        async move {
            gateway.initialize().await;
        }
    });

    let cache = Arc::new(AnnouncementCache::new(gateway));
    let rollover = DayRollover::new(store);
    let mut service = AlertService::new(schedule, cache, rollover, Arc::new(SystemClock))
        .with_notifier(Notifier::new(config.feedback.notifications))
        .with_preload_lead(config.schedule.preload_lead_minutes);

    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(watch_schedule(
        schedule_path,
        Duration::from_secs(config.schedule.reload_secs.max(1)),
        tx,
    ));

    tokio::select! {
        _ = service.run(Duration::from_millis(config.schedule.tick_ms.max(10)), rx) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }
    service.shutdown().await;

    Ok(())
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Reload the checklist file whenever its mtime changes.
async fn watch_schedule(path: PathBuf, every: Duration, tx: mpsc::Sender<ScheduleUpdate>) {
    let mut seen = modified(&path);
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;
        let current = modified(&path);
        if current == seen {
            continue;
        }
        seen = current;

        match Schedule::load(&path) {
            Ok(schedule) => {
                info!("Reloaded {}", path.display());
                if tx.send(ScheduleUpdate::Replace(schedule.into())).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("Failed to reload {}: {e}", path.display()),
        }
    }
}
