//! Configuration for the sleep arousal monitor.

use crate::core::{DetectionParams, LocalZone, ZoneError, DEFAULT_MOVEMENT_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const APP_DIR: &str = "sleep-arousal-monitor";

/// Upper bound on `storage.retention_days` (about a century).
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Which side of the peer link this install plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Wears the sensor and runs detection
    #[default]
    Wearable,
    /// Mirrors events and settings, raises fallback notifications
    Companion,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Wearable => write!(f, "wearable"),
            Role::Companion => write!(f, "companion"),
        }
    }
}

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path for persisted settings, events and sessions
    pub data_path: PathBuf,

    /// Path for JSON/CSV exports
    pub export_path: PathBuf,

    pub role: Role,

    /// IANA zone for the sleep window; the system zone when absent
    #[serde(default)]
    pub timezone: Option<String>,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub movement: MovementConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Minimum spacing between fired events
    #[serde(with = "duration_serde")]
    pub alert_cooldown: Duration,

    /// Look-back window for the relative rise check
    #[serde(with = "duration_serde")]
    pub relative_window: Duration,

    pub hrv_drop_threshold_pct: f64,

    /// Keep evaluating while the wearer moves (debugging aid)
    pub ignore_movement: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            alert_cooldown: Duration::from_secs(300),
            relative_window: Duration::from_secs(60),
            hrv_drop_threshold_pct: 30.0,
            ignore_movement: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementConfig {
    /// Acceleration magnitude (g) above which a reading is significant
    pub threshold_g: f64,

    #[serde(with = "duration_serde")]
    pub suppression_window: Duration,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            threshold_g: DEFAULT_MOVEMENT_THRESHOLD,
            suppression_window: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub max_stored_events: usize,
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_stored_events: 1000,
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Tick of the activation retry loop
    #[serde(with = "duration_serde")]
    pub retry_interval: Duration,

    pub max_activation_retries: u32,

    /// Merged peer events younger than this raise a fallback notification
    #[serde(with = "duration_serde")]
    pub fallback_recency: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(2),
            max_activation_retries: 5,
            fallback_recency: Duration::from_secs(300),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            export_path: data_dir.join("exports"),
            data_path: data_dir,
            role: Role::default(),
            timezone: None,
            detection: DetectionConfig::default(),
            movement: MovementConfig::default(),
            storage: StorageConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content).map_err(ConfigError::Parse)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)?;
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    /// Reject values the detector or stores cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.zone()?;

        if !(self.movement.threshold_g.is_finite() && self.movement.threshold_g > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "movement.threshold_g must be positive, got {}",
                self.movement.threshold_g
            )));
        }
        if !(self.detection.hrv_drop_threshold_pct > 0.0
            && self.detection.hrv_drop_threshold_pct <= 100.0)
        {
            return Err(ConfigError::Invalid(format!(
                "detection.hrv_drop_threshold_pct must be in (0, 100], got {}",
                self.detection.hrv_drop_threshold_pct
            )));
        }
        if self.storage.max_stored_events == 0 {
            return Err(ConfigError::Invalid(
                "storage.max_stored_events must be at least 1".to_string(),
            ));
        }
        if self.storage.retention_days > MAX_RETENTION_DAYS {
            return Err(ConfigError::Invalid(format!(
                "storage.retention_days must be at most {MAX_RETENTION_DAYS}, got {}",
                self.storage.retention_days
            )));
        }
        if self.sync.retry_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "sync.retry_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Zone used for the sleep window.
    pub fn zone(&self) -> Result<LocalZone, ConfigError> {
        Ok(LocalZone::parse(self.timezone.as_deref())?)
    }

    /// Engine tuning derived from the detection and movement sections.
    pub fn detection_params(&self) -> DetectionParams {
        DetectionParams {
            alert_cooldown: to_chrono(self.detection.alert_cooldown),
            relative_window: to_chrono(self.detection.relative_window),
            hrv_drop_threshold_pct: self.detection.hrv_drop_threshold_pct,
            movement_suppression_window: to_chrono(self.movement.suppression_window),
            ignore_movement: self.detection.ignore_movement,
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(serde_json::Error),
    #[error("Serialize error: {0}")]
    Serialize(serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Zone(#[from] ZoneError),
}

/// Serde support for Duration as whole seconds.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
