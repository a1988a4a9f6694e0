pub mod activity;
pub mod config;
pub mod cooldown;
pub mod events;
pub mod hardware;
pub mod led;
pub mod schedule;
pub mod topics;
pub mod types;

pub use activity::{ActivityEntry, ActivityLog};
pub use config::{
    ControllerConfig, ExecutorConfig, HardwareConfig, LedBrightness, NetworkConfig,
    PersistedSettings, RuntimeConfig,
};
pub use cooldown::CooldownGate;
pub use events::Notification;
pub use hardware::{GpioPort, HardwareError};
pub use led::{BrightnessWrite, InvalidBrightness, LedBank, LedId, LedStates};
pub use schedule::{
    DayOfWeek, Schedule, ScheduleDraft, ScheduleEntry, ScheduleUpdate, ScheduleValidationError,
};
pub use topics::*;
pub use types::{AutoOffStatus, ControllerStatus, LedStatus, ResourceState, TransitionSource};
