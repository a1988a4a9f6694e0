//! Notifications pushed to every observer (WebSocket clients, MQTT).
//!
//! On the wire each notification is `{"event": "<name>", "data": {...}}`.

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::{
    activity::ActivityEntry,
    led::LedId,
    schedule::ScheduleEntry,
    types::TransitionSource,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Notification {
    StateChanged {
        state: bool,
        source: TransitionSource,
        timestamp: DateTime<Local>,
    },
    CountdownProgress {
        remaining_seconds: u64,
        remaining_minutes: u64,
    },
    CountdownFired {
        timestamp: DateTime<Local>,
    },
    LedBrightnessChanged {
        led: LedId,
        brightness: u8,
    },
    ScheduleChanged {
        entries: Vec<ScheduleEntry>,
    },
    ExecutionError {
        message: String,
        timestamp: DateTime<Local>,
    },
    ActivityLogged {
        entry: ActivityEntry,
    },
    ActivityHistory {
        entries: Vec<ActivityEntry>,
    },
    SettingsUpdated {
        auto_off_enabled: bool,
        auto_off_duration_minutes: u32,
        executor_enabled: bool,
    },
    EventsDropped {
        count: u64,
    },
}

impl Notification {
    pub fn state_changed(state: bool, source: TransitionSource) -> Self {
        Self::StateChanged {
            state,
            source,
            timestamp: Local::now(),
        }
    }

    pub fn countdown_progress(remaining_seconds: u64) -> Self {
        Self::CountdownProgress {
            remaining_seconds,
            remaining_minutes: remaining_seconds / 60,
        }
    }

    pub fn execution_error(message: impl Into<String>) -> Self {
        Self::ExecutionError {
            message: message.into(),
            timestamp: Local::now(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state-changed",
            Self::CountdownProgress { .. } => "countdown-progress",
            Self::CountdownFired { .. } => "countdown-fired",
            Self::LedBrightnessChanged { .. } => "led-brightness-changed",
            Self::ScheduleChanged { .. } => "schedule-changed",
            Self::ExecutionError { .. } => "execution-error",
            Self::ActivityLogged { .. } => "activity-logged",
            Self::ActivityHistory { .. } => "activity-history",
            Self::SettingsUpdated { .. } => "settings-updated",
            Self::EventsDropped { .. } => "events-dropped",
        }
    }
}
