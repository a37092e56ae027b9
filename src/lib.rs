//! Sleep Arousal Monitor - nocturnal heart-rate arousal detection for a
//! wearable and its companion device.
//!
//! The wearable consumes heart-rate and accelerometer streams, classifies
//! each heart-rate sample against its recent history and alerts the wearer
//! when an arousal is detected. Detected events, settings and the latest
//! heart rate are kept in sync with a companion device over a best-effort
//! peer link.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Device                                 │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌────────────┐   ┌────────────┐   ┌───────────┐  │
//! │  │  Sensor  │──▶│  Monitor   │──▶│ EventStore │──▶│ PeerLink  │◀─┼─▶ peer
//! │  │   feed   │   │ (engine +  │   │ Settings   │   │ (sync)    │  │
//! │  └──────────┘   │  buffers)  │   │ Sessions   │   └───────────┘  │
//! │                 └────────────┘   └────────────┘         │        │
//! │                       │                                 ▼        │
//! │                       ▼                          ┌─────────────┐ │
//! │                 ┌────────────┐                   │ SyncHandler │ │
//! │                 │ AlertSink  │                   │  (merge)    │ │
//! │                 └────────────┘                   └─────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sleep_arousal_monitor::{config::Config, core::DetectionEngine, sensor::HeartRateSample};
//! use sleep_arousal_monitor::core::SampleBuffer;
//! use sleep_arousal_monitor::models::Settings;
//!
//! let config = Config::default();
//! let mut engine = DetectionEngine::new(config.detection_params(), config.zone().unwrap());
//! let mut history = SampleBuffer::new();
//!
//! let sample = HeartRateSample::new(chrono::Utc::now(), 72.0);
//! let outcome = engine.evaluate(&sample, &history, false, &Settings::default());
//! history.push(sample);
//! println!("{outcome:?}");
//! ```

pub mod alert;
pub mod config;
pub mod core;
pub mod device;
pub mod models;
pub mod monitor;
pub mod sensor;
pub mod stats;
pub mod store;
pub mod sync;

// Re-export key types at crate root for convenience
pub use alert::{AlertSink, LogAlertSink};
pub use config::{Config, Role};
pub use core::{DetectionEngine, Evaluation, SampleBuffer};
pub use device::{Device, DeviceError, Platform};
pub use models::{AlertResponse, DetectionEvent, DetectionType, Settings};
pub use monitor::{LocalStatus, Monitor, MonitorError};
pub use sensor::{HeartRateSample, SensorEvent, SensorFeed};
pub use stats::{MonitorStats, SharedStats};
pub use store::{EventStore, FileStore, MemoryStore, SettingsStore};
pub use sync::{LoopbackTransport, PeerLink, SyncHandler, SyncMessage};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Disclaimer shown to users before monitoring.
pub const DISCLAIMER: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║              SLEEP AROUSAL MONITOR - DISCLAIMER                  ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This tool flags heart-rate patterns that may indicate a         ║
║  nocturnal arousal. It is NOT A MEDICAL DEVICE.                  ║
║                                                                  ║
║  ✓ WHAT IT DOES:                                                 ║
║    • Watches heart rate and HRV during your sleep window         ║
║    • Alerts you when heart rate rises sharply                    ║
║    • Keeps a local log of detected events                        ║
║                                                                  ║
║  ✗ WHAT IT DOES NOT DO:                                          ║
║    • Diagnose, treat or prevent any condition                    ║
║    • Replace advice from a qualified clinician                   ║
║    • Send your data anywhere except your paired device           ║
║                                                                  ║
║  Detections are heuristic and can be wrong in both directions.   ║
║                                                                  ║
║  You can review recorded events anytime with:                    ║
║    arousal-monitor events                                        ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
