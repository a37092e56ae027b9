//! Sleep Arousal Monitor CLI
//!
//! Runs a simulated night through a wearable and companion pair, and
//! inspects the locally stored event log.

use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use sleep_arousal_monitor::{
    alert::LogAlertSink,
    config::{Config, Role},
    device::{Device, Platform},
    models::{AlertResponse, MealTiming, SensitivityPreset, Settings, TimeOfDay},
    sensor::{AccelerometerReading, HeartRateSample, SensorEvent, SensorFeed},
    stats::{create_shared_stats, create_shared_stats_with_persistence, MonitorStats},
    store::{
        EventLimits, EventStore, ExportFormat, FileStore, KeyValueStore, MemoryStore,
        SessionHistory, SettingsStore,
    },
    sync::LoopbackTransport,
    DISCLAIMER, VERSION,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "arousal-monitor")]
#[command(version = VERSION)]
#[command(about = "Nocturnal heart-rate arousal detection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic night through a wearable and companion pair
    Simulate {
        /// Simulated minutes of sleep
        #[arg(long, default_value = "60")]
        minutes: u32,

        /// Seconds between heart-rate samples
        #[arg(long, default_value = "5")]
        interval: u32,

        /// Minutes between simulated arousals (0 disables them)
        #[arg(long, default_value = "15")]
        arousal_every: u32,

        /// Real-time delay per sample in milliseconds
        #[arg(long, default_value = "0")]
        pace_ms: u64,

        /// Take the link down halfway through the night
        #[arg(long)]
        drop_link: bool,

        /// Honour the configured sleep window instead of monitoring all day
        #[arg(long)]
        respect_window: bool,

        /// Hours since the last meal, recorded with the session
        #[arg(long)]
        meal_hours_ago: Option<f64>,

        /// Store the wearable's results in the data directory
        #[arg(long)]
        persist: bool,
    },

    /// List recorded events
    Events {
        /// Number of most recent events to show
        #[arg(long, short, default_value = "20")]
        limit: usize,

        /// Only events from the last N hours
        #[arg(long)]
        since_hours: Option<i64>,
    },

    /// Export recorded events
    Export {
        /// Output directory
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Export format (json or csv)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Record the response to an event
    Respond {
        /// Event id
        id: Uuid,

        /// acknowledged, snoozed or dismissed
        response: AlertResponse,
    },

    /// Delete recorded events
    Clear {
        /// Also delete session history
        #[arg(long)]
        sessions: bool,
    },

    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Show stored data and statistics
    Status,

    /// Show configuration
    Config,

    /// Display the disclaimer
    Disclaimer,
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    Set {
        /// Sleep window start (HH:MM)
        #[arg(long)]
        window_start: Option<TimeOfDay>,

        /// Sleep window end (HH:MM)
        #[arg(long)]
        window_end: Option<TimeOfDay>,

        /// low, medium, high or custom
        #[arg(long)]
        preset: Option<SensitivityPreset>,

        #[arg(long)]
        custom_absolute: Option<f64>,

        #[arg(long)]
        custom_relative: Option<f64>,

        #[arg(long)]
        haptics: Option<bool>,

        #[arg(long)]
        audible_alarm: Option<bool>,

        #[arg(long)]
        notifications: Option<bool>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;

    match cli.command {
        Commands::Simulate {
            minutes,
            interval,
            arousal_every,
            pace_ms,
            drop_link,
            respect_window,
            meal_hours_ago,
            persist,
        } => cmd_simulate(
            &config,
            Night {
                minutes,
                interval,
                arousal_every,
            },
            SimulateOptions {
                pace: Duration::from_millis(pace_ms),
                drop_link,
                respect_window,
                meal_hours_ago,
                persist,
            },
        ),
        Commands::Events { limit, since_hours } => cmd_events(&config, limit, since_hours),
        Commands::Export { output, format } => cmd_export(&config, output, &format),
        Commands::Respond { id, response } => cmd_respond(&config, id, response),
        Commands::Clear { sessions } => cmd_clear(&config, sessions),
        Commands::Settings { action } => cmd_settings(&config, action),
        Commands::Status => cmd_status(&config),
        Commands::Config => cmd_config(&config),
        Commands::Disclaimer => {
            println!("{DISCLAIMER}");
            Ok(())
        }
    }
}

/// Shape of the synthetic night.
struct Night {
    minutes: u32,
    interval: u32,
    arousal_every: u32,
}

impl Night {
    /// Deterministic sensor stream starting at `start`.
    fn events(&self, start: chrono::DateTime<Utc>) -> Vec<SensorEvent> {
        let interval = self.interval.max(1);
        let total = self.minutes * 60 / interval;
        let arousal_period = self.arousal_every * 60 / interval;
        let mut events = Vec::with_capacity(total as usize * 2);

        for i in 0..total {
            let ts = start + ChronoDuration::seconds(i64::from(i * interval));
            let phase = f64::from(i) / 12.0;

            // Resting rhythm with slow drift
            let mut heart_rate = 60.0 + 3.0 * phase.sin() + 1.5 * (phase * 0.37).cos();
            let mut hrv = 48.0 + 4.0 * (phase * 0.5).sin();

            let in_arousal =
                arousal_period > 0 && i >= arousal_period && i % arousal_period < 4;
            if in_arousal {
                heart_rate = 92.0 + f64::from(i % arousal_period) * 2.0;
                hrv = 26.0;
            }

            // Occasional turn in bed just before an arousal
            if arousal_period > 0 && i % (arousal_period * 2) == arousal_period - 1 {
                events.push(SensorEvent::Motion(AccelerometerReading::new(
                    ts,
                    0.25,
                    0.1,
                    0.05,
                )));
            } else {
                events.push(SensorEvent::Motion(AccelerometerReading::new(
                    ts, 0.01, 0.0, 0.02,
                )));
            }

            events.push(SensorEvent::HeartRate(
                HeartRateSample::new(ts, heart_rate).with_hrv(hrv),
            ));
        }

        events
    }
}

struct SimulateOptions {
    pace: Duration,
    drop_link: bool,
    respect_window: bool,
    meal_hours_ago: Option<f64>,
    persist: bool,
}

fn cmd_simulate(config: &Config, night: Night, options: SimulateOptions) -> Result<()> {
    println!("Sleep Arousal Monitor v{VERSION}");
    println!();

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    runtime.block_on(simulate(config, night, options))
}

async fn simulate(config: &Config, night: Night, options: SimulateOptions) -> Result<()> {
    let ((wearable_link, wearable_rx), (companion_link, companion_rx)) = LoopbackTransport::pair();
    let wearable_link = Arc::new(wearable_link);

    let (wearable_kv, wearable_stats) = if options.persist {
        config.ensure_directories()?;
        let kv: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&config.data_path)?);
        (
            kv,
            create_shared_stats_with_persistence(config.data_path.join("stats.json")),
        )
    } else {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        (kv, create_shared_stats())
    };

    let wearable = Device::assemble(
        &Config {
            role: Role::Wearable,
            ..config.clone()
        },
        Platform {
            kv: wearable_kv,
            transport: wearable_link.clone(),
            transport_events: wearable_rx,
            alerts: Arc::new(LogAlertSink::new("wearable")),
            stats: wearable_stats,
        },
    )?;
    let companion = Device::assemble(
        &Config {
            role: Role::Companion,
            ..config.clone()
        },
        Platform {
            kv: Arc::new(MemoryStore::new()),
            transport: Arc::new(companion_link),
            transport_events: companion_rx,
            alerts: Arc::new(LogAlertSink::new("companion")),
            stats: create_shared_stats(),
        },
    )?;

    wearable.connect();
    companion.connect();
    tokio::time::sleep(Duration::from_millis(100)).await;

    if !options.respect_window {
        wearable.settings.update(|mut s: Settings| {
            s.sleep_window_start = TimeOfDay { hour: 0, minute: 0 };
            s.sleep_window_end = TimeOfDay { hour: 23, minute: 59 };
            s
        })?;
    }

    let meal = options
        .meal_hours_ago
        .map(|h| MealTiming::at(Utc::now() - ChronoDuration::minutes((h * 60.0) as i64)));

    let mut feed = SensorFeed::new();
    wearable.monitor.start(meal, &mut feed)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))
        .context("setting Ctrl+C handler")?;

    let consumer = {
        let monitor = wearable.monitor.clone();
        let receiver = feed.receiver().clone();
        let running = running.clone();
        tokio::task::spawn_blocking(move || monitor.run_feed(&receiver, &running))
    };

    let start = Utc::now() - ChronoDuration::minutes(i64::from(night.minutes));
    let stream = night.events(start);
    let halfway = stream.len() / 2;
    let producer = feed.producer();

    println!(
        "Simulating {} minutes ({} sensor readings). Press Ctrl+C to stop",
        night.minutes,
        stream.len()
    );
    println!();

    for (i, event) in stream.into_iter().enumerate() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        if options.drop_link && i == halfway {
            println!("-- link down --");
            wearable_link.set_reachable(false);
        }
        producer.push(event);
        if options.pace.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(options.pace).await;
        }
    }

    while running.load(Ordering::SeqCst) && !feed.receiver().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    running.store(false, Ordering::SeqCst);
    let handled = consumer.await.context("joining sensor loop")?;

    if options.drop_link {
        println!("-- link up --");
        wearable_link.set_reachable(true);
    }

    let session = wearable.monitor.stop(&mut feed)?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    if let Err(e) = companion.handler.refresh_from_peer().await {
        eprintln!("Warning: companion refresh failed: {e}");
    }

    println!();
    println!("Handled {handled} sensor readings");
    println!();
    print_events("Wearable events", &wearable.events.all());
    print_events("Companion events", &companion.events.all());

    if let Some(summary) = session.as_ref().and_then(|s| s.summary()) {
        println!("Night summary:");
        println!("  Duration: {} min", summary.duration().num_minutes());
        println!(
            "  Events: {} ({} acknowledged)",
            summary.total_events, summary.acknowledged_events
        );
        println!(
            "  Heart rate: avg {:.1}, min {:.1}, max {:.1} bpm",
            summary.average_heart_rate, summary.min_heart_rate, summary.max_heart_rate
        );
        if let Some(hrv) = summary.average_hrv {
            println!("  HRV: avg {hrv:.1} ms");
        }
        if let Some(meal) = session.as_ref().and_then(|s| s.meal_timing.as_ref()) {
            if let Some(hours) = meal.hours_since_last_meal(summary.monitoring_start_time) {
                println!("  Last meal: {hours:.1} h before sleep");
            }
        }
        println!();
    }

    let status = companion.link.status();
    println!("Companion link: {:?}", status.state);
    println!("  Handshake ok: {:?}", status.last_handshake_succeeded);
    if let Some(reason) = &status.last_handshake_error {
        println!("  Last error: {reason}");
    }
    println!("  Peer monitoring: {}", status.peer_is_monitoring);
    if let Some(hr) = status.peer_heart_rate {
        println!("  Peer heart rate: {:.0} bpm", hr.bpm);
    }
    println!();

    println!("{}", wearable.stats.summary());
    if options.persist {
        if let Err(e) = wearable.stats.save() {
            eprintln!("Warning: could not save statistics: {e}");
        }
    }

    wearable.shutdown();
    companion.shutdown();
    Ok(())
}

fn print_events(title: &str, events: &[sleep_arousal_monitor::DetectionEvent]) {
    println!("{title} ({}):", events.len());
    for event in events {
        println!(
            "  {} [{}] {:<22} {:>5.1} bpm  confidence {:.2}  {}",
            event.id,
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.detection_type.label(),
            event.heart_rate_at_detection,
            event.confidence,
            event.alert_response
        );
    }
    println!();
}

/// Stores backed by the data directory.
fn open_local(config: &Config) -> Result<(Arc<EventStore>, SettingsStore, SessionHistory)> {
    config.ensure_directories()?;
    let kv: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&config.data_path)?);
    let events = EventStore::open(kv.clone(), EventLimits::from(&config.storage))?;
    let settings = SettingsStore::open(kv.clone())?;
    let sessions = SessionHistory::open(kv)?;
    Ok((Arc::new(events), settings, sessions))
}

fn cmd_events(config: &Config, limit: usize, since_hours: Option<i64>) -> Result<()> {
    let (events, _, _) = open_local(config)?;

    let selected = match since_hours {
        Some(hours) => {
            let now = Utc::now();
            let mut recent = events.between(now - ChronoDuration::hours(hours), now);
            let skip = recent.len().saturating_sub(limit);
            recent.drain(..skip);
            recent
        }
        None => events.recent(limit),
    };

    if selected.is_empty() {
        println!("No events recorded.");
        println!("Run 'arousal-monitor simulate --persist' to record a synthetic night.");
        return Ok(());
    }

    print_events("Events", &selected);
    Ok(())
}

fn cmd_export(config: &Config, output: Option<PathBuf>, format: &str) -> Result<()> {
    let format: ExportFormat = format.parse()?;
    let (events, _, _) = open_local(config)?;
    let export_dir = output.unwrap_or_else(|| config.export_path.clone());
    std::fs::create_dir_all(&export_dir)?;

    let content = match format {
        ExportFormat::Json => events.export_json()?,
        ExportFormat::Csv => events.export_csv(),
    };

    let output_path = export_dir.join(format!(
        "events_{}.{}",
        Utc::now().format("%Y%m%d_%H%M%S"),
        format.extension()
    ));
    std::fs::write(&output_path, content)
        .with_context(|| format!("writing {}", output_path.display()))?;

    println!("Exported {} event(s) to {output_path:?}", events.len());
    Ok(())
}

fn cmd_respond(config: &Config, id: Uuid, response: AlertResponse) -> Result<()> {
    if response == AlertResponse::NotResponded {
        bail!("response must be acknowledged, snoozed or dismissed");
    }
    let (events, _, _) = open_local(config)?;
    let event = events.respond(id, response, Utc::now())?;
    println!("Event {} marked {}", event.id, event.alert_response);
    Ok(())
}

fn cmd_clear(config: &Config, sessions: bool) -> Result<()> {
    let (events, _, history) = open_local(config)?;
    let count = events.len();
    events.clear()?;
    println!("Deleted {count} event(s).");

    if sessions {
        let count = history.sessions().len();
        history.clear()?;
        println!("Deleted {count} session(s).");
    }
    Ok(())
}

fn cmd_settings(config: &Config, action: SettingsAction) -> Result<()> {
    let (_, settings, _) = open_local(config)?;

    let current = match action {
        SettingsAction::Show => settings.get(),
        SettingsAction::Set {
            window_start,
            window_end,
            preset,
            custom_absolute,
            custom_relative,
            haptics,
            audible_alarm,
            notifications,
        } => settings.update(|mut s| {
            if let Some(v) = window_start {
                s.sleep_window_start = v;
            }
            if let Some(v) = window_end {
                s.sleep_window_end = v;
            }
            if let Some(v) = preset {
                s.sensitivity_preset = v;
            }
            if custom_absolute.is_some() {
                s.custom_absolute_threshold = custom_absolute;
            }
            if custom_relative.is_some() {
                s.custom_relative_delta = custom_relative;
            }
            if let Some(v) = haptics {
                s.enable_haptics = v;
            }
            if let Some(v) = audible_alarm {
                s.enable_audible_alarm = v;
            }
            if let Some(v) = notifications {
                s.notifications_enabled = v;
            }
            s
        })?,
    };

    println!("Settings");
    println!("========");
    println!();
    println!(
        "  Sleep window: {} - {}",
        current.sleep_window_start, current.sleep_window_end
    );
    println!(
        "  Sensitivity: {} (absolute {:.0} bpm, relative +{:.0} bpm)",
        current.sensitivity_preset,
        current.effective_absolute_threshold(),
        current.effective_relative_delta()
    );
    println!("  Haptics: {}", current.enable_haptics);
    println!("  Audible alarm: {}", current.enable_audible_alarm);
    println!("  Notifications: {}", current.notifications_enabled);
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    let (events, _, sessions) = open_local(config)?;
    let device = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    println!("Sleep Arousal Monitor Status");
    println!("============================");
    println!();
    println!("Device: {device} ({})", config.role);
    println!("Data: {:?}", config.data_path);
    println!();
    println!("Stored events: {}", events.len());
    if let Some(last) = events.recent(1).first() {
        println!(
            "  Last: {} at {}",
            last.detection_type.label(),
            last.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
    }

    let summaries = sessions.summaries();
    println!("Recorded nights: {}", summaries.len());
    if let Some(last) = summaries.last() {
        println!(
            "  Last: {} min, {} event(s), avg {:.1} bpm",
            last.duration().num_minutes(),
            last.total_events,
            last.average_heart_rate
        );
    }
    println!();

    let stats_path = config.data_path.join("stats.json");
    if stats_path.exists() {
        let stats = MonitorStats::with_persistence(stats_path);
        println!("{}", stats.summary());
    } else {
        println!("No statistics recorded yet.");
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
