//! Domain records shared by the detector, the stores and the sync protocol.

pub mod event;
pub mod session;
pub mod settings;

// Re-export commonly used types
pub use event::{AlertResponse, DetectionEvent, DetectionType};
pub use session::{MealTiming, NightSummary, Session};
pub use settings::{SensitivityPreset, Settings, SettingsError, TimeOfDay};
