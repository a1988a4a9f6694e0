use serde::{Deserialize, Serialize};

use crate::{
    config::{LedBrightness, PersistedSettings},
    led::LedStates,
    schedule::ScheduleEntry,
};

/// Originator tag of a transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionSource {
    ButtonOn,
    ButtonOff,
    Dashboard,
    AutoOff,
    Initial,
    Query,
}

impl TransitionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ButtonOn => "button-on",
            Self::ButtonOff => "button-off",
            Self::Dashboard => "dashboard",
            Self::AutoOff => "auto-off",
            Self::Initial => "initial",
            Self::Query => "query",
        }
    }

    /// Bookkeeping tags that never show up in the activity log.
    pub fn is_internal(self) -> bool {
        matches!(self, Self::Initial | Self::Query)
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::ButtonOn | Self::ButtonOff => "physical button",
            Self::Dashboard => "dashboard",
            Self::AutoOff => "auto-off timer",
            Self::Initial => "startup",
            Self::Query => "status query",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    pub on: bool,
    pub source: TransitionSource,
}

impl ResourceState {
    pub fn initial() -> Self {
        Self {
            on: false,
            source: TransitionSource::Initial,
        }
    }

    pub fn label(self) -> &'static str {
        if self.on {
            "ON"
        } else {
            "OFF"
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoOffStatus {
    pub enabled: bool,
    #[serde(rename = "durationMinutes")]
    pub duration_minutes: u32,
    pub active: bool,
    #[serde(rename = "remainingSeconds")]
    pub remaining_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedStatus {
    pub lit: LedStates,
    pub brightness: LedBrightness,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    #[serde(rename = "wifiOn")]
    pub wifi_on: bool,
    pub source: TransitionSource,
    #[serde(rename = "autoOff")]
    pub auto_off: AutoOffStatus,
    pub leds: LedStatus,
    #[serde(rename = "activeSchedule")]
    pub active_schedule: Option<ScheduleEntry>,
    #[serde(rename = "executorEnabled")]
    pub executor_enabled: bool,
}

impl AutoOffStatus {
    pub fn new(settings: &PersistedSettings, active: bool, remaining_seconds: u64) -> Self {
        Self {
            enabled: settings.auto_off_enabled,
            duration_minutes: settings.auto_off_minutes,
            active,
            remaining_seconds,
        }
    }
}
