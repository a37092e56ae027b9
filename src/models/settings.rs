//! User settings: sleep window, sensitivity and alert preferences.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Absolute threshold used by the Custom preset when no custom value is set.
pub const DEFAULT_ABSOLUTE_THRESHOLD: f64 = 80.0;

/// Relative delta used by the Custom preset when no custom value is set.
pub const DEFAULT_RELATIVE_DELTA: f64 = 15.0;

/// Settings validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("Invalid time of day '{0}', expected HH:MM")]
    InvalidTime(String),
    #[error("Unknown sensitivity preset '{0}'")]
    UnknownPreset(String),
    #[error("Threshold must be a positive number, got {0}")]
    InvalidThreshold(f64),
}

/// A wall-clock time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Result<Self, SettingsError> {
        if hour > 23 || minute > 59 {
            return Err(SettingsError::InvalidTime(format!("{hour:02}:{minute:02}")));
        }
        Ok(Self { hour, minute })
    }

    /// Minutes since midnight.
    pub fn minutes(&self) -> u32 {
        u32::from(self.hour) * 60 + u32::from(self.minute)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SettingsError::InvalidTime(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour = h.parse::<u8>().map_err(|_| invalid())?;
        let minute = m.parse::<u8>().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }
}

/// Named threshold bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensitivityPreset {
    Low,
    #[default]
    Medium,
    High,
    Custom,
}

impl SensitivityPreset {
    /// Default absolute heart-rate threshold in bpm.
    pub fn absolute_threshold(&self) -> f64 {
        match self {
            SensitivityPreset::Low => 90.0,
            SensitivityPreset::Medium => 80.0,
            SensitivityPreset::High => 70.0,
            SensitivityPreset::Custom => DEFAULT_ABSOLUTE_THRESHOLD,
        }
    }

    /// Default relative rise threshold in bpm.
    pub fn relative_delta(&self) -> f64 {
        match self {
            SensitivityPreset::Low => 20.0,
            SensitivityPreset::Medium => 15.0,
            SensitivityPreset::High => 10.0,
            SensitivityPreset::Custom => DEFAULT_RELATIVE_DELTA,
        }
    }
}

impl fmt::Display for SensitivityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensitivityPreset::Low => "low",
            SensitivityPreset::Medium => "medium",
            SensitivityPreset::High => "high",
            SensitivityPreset::Custom => "custom",
        };
        f.write_str(name)
    }
}

impl FromStr for SensitivityPreset {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(SensitivityPreset::Low),
            "medium" => Ok(SensitivityPreset::Medium),
            "high" => Ok(SensitivityPreset::High),
            "custom" => Ok(SensitivityPreset::Custom),
            other => Err(SettingsError::UnknownPreset(other.to_string())),
        }
    }
}

/// The single settings record for an install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub sleep_window_start: TimeOfDay,
    pub sleep_window_end: TimeOfDay,

    pub sensitivity_preset: SensitivityPreset,
    pub custom_absolute_threshold: Option<f64>,
    pub custom_relative_delta: Option<f64>,

    pub enable_haptics: bool,
    pub enable_audible_alarm: bool,
    pub enable_power_saving_mode: bool,

    pub enable_cloud_sync: bool,
    pub enable_telemetry: bool,

    pub notifications_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sleep_window_start: TimeOfDay { hour: 22, minute: 0 },
            sleep_window_end: TimeOfDay { hour: 7, minute: 0 },
            sensitivity_preset: SensitivityPreset::Medium,
            custom_absolute_threshold: None,
            custom_relative_delta: None,
            enable_haptics: true,
            enable_audible_alarm: false,
            enable_power_saving_mode: false,
            enable_cloud_sync: false,
            enable_telemetry: false,
            notifications_enabled: true,
        }
    }
}

impl Settings {
    /// Custom value when the preset is Custom and one is set, else the preset default.
    pub fn effective_absolute_threshold(&self) -> f64 {
        match (self.sensitivity_preset, self.custom_absolute_threshold) {
            (SensitivityPreset::Custom, Some(custom)) => custom,
            (preset, _) => preset.absolute_threshold(),
        }
    }

    pub fn effective_relative_delta(&self) -> f64 {
        match (self.sensitivity_preset, self.custom_relative_delta) {
            (SensitivityPreset::Custom, Some(custom)) => custom,
            (preset, _) => preset.relative_delta(),
        }
    }

    /// Whether `minute_of_day` falls inside the sleep window, bounds inclusive.
    ///
    /// A window whose start is after its end wraps past midnight.
    pub fn is_within_sleep_window(&self, minute_of_day: u32) -> bool {
        let start = self.sleep_window_start.minutes();
        let end = self.sleep_window_end.minutes();

        if start > end {
            minute_of_day >= start || minute_of_day <= end
        } else {
            minute_of_day >= start && minute_of_day <= end
        }
    }

    /// Check custom thresholds are usable.
    pub fn validate(&self) -> Result<(), SettingsError> {
        for value in [self.custom_absolute_threshold, self.custom_relative_delta]
            .into_iter()
            .flatten()
        {
            if !value.is_finite() || value <= 0.0 {
                return Err(SettingsError::InvalidThreshold(value));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hour: u32, minute: u32) -> u32 {
        hour * 60 + minute
    }

    #[test]
    fn test_overnight_window() {
        let settings = Settings::default();
        assert!(settings.is_within_sleep_window(at(23, 30)));
        assert!(settings.is_within_sleep_window(at(6, 59)));
        assert!(!settings.is_within_sleep_window(at(12, 0)));
        assert!(settings.is_within_sleep_window(at(7, 0)));
        assert!(settings.is_within_sleep_window(at(22, 0)));
        assert!(!settings.is_within_sleep_window(at(21, 59)));
        assert!(!settings.is_within_sleep_window(at(7, 1)));
    }

    #[test]
    fn test_daytime_window() {
        let settings = Settings {
            sleep_window_start: TimeOfDay::new(13, 0).unwrap(),
            sleep_window_end: TimeOfDay::new(15, 30).unwrap(),
            ..Settings::default()
        };
        assert!(settings.is_within_sleep_window(at(13, 0)));
        assert!(settings.is_within_sleep_window(at(15, 30)));
        assert!(!settings.is_within_sleep_window(at(23, 0)));
    }

    #[test]
    fn test_effective_thresholds() {
        let mut settings = Settings::default();
        assert_eq!(settings.effective_absolute_threshold(), 80.0);
        assert_eq!(settings.effective_relative_delta(), 15.0);

        settings.sensitivity_preset = SensitivityPreset::High;
        settings.custom_absolute_threshold = Some(100.0);
        assert_eq!(settings.effective_absolute_threshold(), 70.0);

        settings.sensitivity_preset = SensitivityPreset::Custom;
        assert_eq!(settings.effective_absolute_threshold(), 100.0);
        assert_eq!(settings.effective_relative_delta(), DEFAULT_RELATIVE_DELTA);
    }

    #[test]
    fn test_time_of_day_parsing() {
        assert_eq!("22:15".parse::<TimeOfDay>().unwrap().minutes(), 22 * 60 + 15);
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("7".parse::<TimeOfDay>().is_err());
        assert_eq!(TimeOfDay::new(7, 5).unwrap().to_string(), "07:05");
    }

    #[test]
    fn test_validate_rejects_non_positive() {
        let settings = Settings {
            custom_relative_delta: Some(0.0),
            ..Settings::default()
        };
        assert_eq!(settings.validate(), Err(SettingsError::InvalidThreshold(0.0)));
    }
}
