use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use home_exit_monitor::{
    run_background_task, Alert, AppLifecycle, ChannelSink, ForegroundTracker, HomeExitEngine,
    JsonFileStore, KeyValueStore, LogSink, MonitorConfig, MonitorStatus, PermissionStatus,
    Position, TrackerEvent,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

#[derive(Parser, Debug)]
#[command(name = "home_monitor")]
#[command(about = "Home-exit monitor - one-shot alert when leaving the home zone", long_about = None)]
struct Args {
    /// Persisted state file (home anchor, threshold, alert flag)
    #[arg(long, default_value = "home_monitor_state.json")]
    store: PathBuf,

    /// JSON config file (missing file = defaults)
    #[arg(long, default_value = "home_monitor.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a JSON track through the foreground tracker at a fixed rate
    Replay {
        /// JSON array of positions
        #[arg(long)]
        track: PathBuf,

        /// Fixes per second (0 = as fast as possible)
        #[arg(long, default_value = "2.0")]
        rate_hz: f64,

        /// Write the final status snapshot here
        #[arg(long)]
        status_out: Option<PathBuf>,
    },
    /// Run a track through the background relay as one batch
    Relay {
        #[arg(long)]
        track: PathBuf,
    },
    /// Store a new home anchor and re-arm
    SetHome {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long)]
        accuracy: Option<f64>,
    },
    /// Store a new home zone radius
    SetThreshold {
        #[arg(value_name = "METERS")]
        meters: f64,
    },
    /// Re-arm the alert
    Reset,
    /// Print persisted state as JSON
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = MonitorConfig::load(&args.config)?.with_env_overrides()?;
    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(&args.store)?);

    match args.command {
        Command::Replay {
            track,
            rate_hz,
            status_out,
        } => replay(store, config, &track, rate_hz, status_out.as_deref()).await,
        Command::Relay { track } => {
            let positions = load_track(&track)?;
            let decisions =
                run_background_task(store, config, Arc::new(LogSink), &positions);
            let alerts = decisions.iter().filter(|d| d.is_alert()).count();
            println!(
                "[{}] Relay evaluated {} fix(es), {} alert(s)",
                ts_now(),
                decisions.len(),
                alerts
            );
            Ok(())
        }
        Command::SetHome { lat, lon, accuracy } => {
            let mut position = Position::new(lat, lon);
            if let Some(acc) = accuracy {
                position = position.with_accuracy(acc);
            }
            let mut engine = HomeExitEngine::new(store, config);
            let anchor = engine.set_home(&position)?;
            println!(
                "[{}] Home set to ({:.6}, {:.6})",
                ts_now(),
                anchor.latitude,
                anchor.longitude
            );
            Ok(())
        }
        Command::SetThreshold { meters } => {
            let mut engine = HomeExitEngine::new(store, config);
            engine.set_threshold(meters)?;
            println!("[{}] Threshold set to {:.1} m", ts_now(), meters);
            Ok(())
        }
        Command::Reset => {
            let mut engine = HomeExitEngine::new(store, config);
            engine.rearm()?;
            println!("[{}] Alert re-armed", ts_now());
            Ok(())
        }
        Command::Status => {
            let engine = HomeExitEngine::new(store, config);
            let mut status = MonitorStatus::new();
            status.refresh(&engine);
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

async fn replay(
    store: Arc<dyn KeyValueStore>,
    config: MonitorConfig,
    track: &Path,
    rate_hz: f64,
    status_out: Option<&Path>,
) -> Result<()> {
    let period = tick_period(rate_hz)?;
    let positions = load_track(track)?;
    println!(
        "[{}] Replaying {} fixes from {}",
        ts_now(),
        positions.len(),
        track.display()
    );

    let (alert_tx, alert_rx) = crossbeam::channel::bounded::<Alert>(64);
    let printer = std::thread::spawn(move || {
        for alert in alert_rx {
            println!(
                "[{}] ALERT {}: {} ({:.1} m)",
                ts_now(),
                alert.title,
                alert.body,
                alert.distance_meters
            );
        }
    });

    let (tx, mut rx) = mpsc::channel::<TrackerEvent>(100);
    let producer = tokio::spawn(replay_loop(tx, positions, period));

    let mut tracker = ForegroundTracker::new(store, config, Arc::new(ChannelSink::new(alert_tx)));
    let tracker = tokio::task::spawn_blocking(move || {
        tracker.run(std::iter::from_fn(move || rx.blocking_recv()));
        tracker
    })
    .await
    .context("tracker task panicked")?;

    producer.await.context("replay task panicked")?;
    let status = tracker.status().clone();
    // Drops the last alert sender so the printer drains and exits
    drop(tracker);
    let _ = printer.join();

    println!("\n=== Replay Stats ===");
    println!("Fixes received: {}", status.fixes_received);
    println!("Fixes evaluated: {}", status.fixes_evaluated);
    println!("Alerts sent: {}", status.alerts_sent);
    if let Some(d) = status.distance_meters {
        println!("Distance from home: {:.1} m", d);
    }

    if let Some(path) = status_out {
        status.save(path)?;
        println!("[{}] Status written to {}", ts_now(), path.display());
    }
    Ok(())
}

/// Interval between replayed fixes; `None` replays as fast as possible
fn tick_period(rate_hz: f64) -> Result<Option<Duration>> {
    if !rate_hz.is_finite() || rate_hz < 0.0 {
        bail!("--rate-hz must be a finite non-negative number, got {}", rate_hz);
    }
    if rate_hz == 0.0 {
        return Ok(None);
    }
    match Duration::try_from_secs_f64(1.0 / rate_hz) {
        Ok(period) if !period.is_zero() => Ok(Some(period)),
        _ => bail!("--rate-hz {} is out of range", rate_hz),
    }
}

async fn replay_loop(
    tx: mpsc::Sender<TrackerEvent>,
    positions: Vec<Position>,
    period: Option<Duration>,
) {
    let mut ticker = period.map(interval);

    let preamble = [
        TrackerEvent::Permission(PermissionStatus::Granted),
        TrackerEvent::Lifecycle(AppLifecycle::Foreground),
    ];
    for event in preamble {
        if tx.send(event).await.is_err() {
            return;
        }
    }

    for position in positions {
        if let Some(ticker) = ticker.as_mut() {
            ticker.tick().await;
        }
        if tx.send(TrackerEvent::Fix(position)).await.is_err() {
            log::warn!("Tracker gone, stopping replay");
            return;
        }
    }
    let _ = tx.send(TrackerEvent::Stop).await;
}

fn load_track(path: &Path) -> Result<Vec<Position>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading track {}", path.display()))?;
    let positions: Vec<Position> = serde_json::from_str(&text)
        .with_context(|| format!("parsing track {}", path.display()))?;
    Ok(positions)
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
