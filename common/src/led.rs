//! Indicator LEDs.
//!
//! Three LEDs mirror the controller state:
//!
//! - `always_on` is lit while WiFi is on.
//! - `scheduled` is lit while WiFi is off.
//! - `status` is lit while WiFi is on, or while it is off but a schedule
//!   window is active.
//!
//! [`LedBank`] remembers what it last wrote so reapplying the same states
//! never touches the hardware.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::{HardwareConfig, LedBrightness},
    hardware::{GpioPort, HardwareError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedId {
    Status,
    AlwaysOn,
    Scheduled,
}

impl LedId {
    pub const ALL: [LedId; 3] = [LedId::Status, LedId::AlwaysOn, LedId::Scheduled];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::AlwaysOn => "always_on",
            Self::Scheduled => "scheduled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "status" => Some(Self::Status),
            "always_on" => Some(Self::AlwaysOn),
            "scheduled" => Some(Self::Scheduled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedStates {
    pub status: bool,
    pub always_on: bool,
    pub scheduled: bool,
}

impl LedStates {
    pub fn derive(wifi_on: bool, within_schedule: bool) -> Self {
        Self {
            status: wifi_on || within_schedule,
            always_on: wifi_on,
            scheduled: !wifi_on,
        }
    }

    pub fn get(&self, led: LedId) -> bool {
        match led {
            LedId::Status => self.status,
            LedId::AlwaysOn => self.always_on,
            LedId::Scheduled => self.scheduled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("brightness {0} is out of range (0-100)")]
pub struct InvalidBrightness(pub u16);

#[derive(Debug, Clone)]
pub struct LedBank {
    pins: HardwareConfig,
    brightness: LedBrightness,
    // Last successfully written state per LED; `None` until first write.
    applied: [Option<bool>; 3],
}

impl LedBank {
    pub fn new(pins: HardwareConfig, mut brightness: LedBrightness) -> Self {
        brightness.sanitize();
        Self {
            pins,
            brightness,
            applied: [None; 3],
        }
    }

    pub fn brightness(&self) -> LedBrightness {
        self.brightness
    }

    /// Lit state as last written; unknown LEDs read as off.
    pub fn lit(&self) -> LedStates {
        LedStates {
            status: self.is_lit(LedId::Status),
            always_on: self.is_lit(LedId::AlwaysOn),
            scheduled: self.is_lit(LedId::Scheduled),
        }
    }

    pub fn is_lit(&self, led: LedId) -> bool {
        self.applied[Self::slot(led)].unwrap_or(false)
    }

    /// Writes only the LEDs whose lit state changed. Every LED is attempted
    /// even if one fails; the first error is returned.
    pub fn apply(&mut self, gpio: &dyn GpioPort, desired: LedStates) -> Result<usize, HardwareError> {
        let mut writes = 0;
        let mut first_error = None;

        for led in LedId::ALL {
            let want = desired.get(led);
            if self.applied[Self::slot(led)] == Some(want) {
                continue;
            }

            let duty = if want { self.brightness.get(led) } else { 0 };
            match gpio.write_duty(self.pins.led_pin(led), duty) {
                Ok(()) => {
                    self.applied[Self::slot(led)] = Some(want);
                    writes += 1;
                }
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(writes),
        }
    }

    /// Stores the new brightness and rewrites the LED only if it is lit. A
    /// failed rewrite forgets the lit state so the next apply retries it.
    pub fn set_brightness(
        &mut self,
        gpio: &dyn GpioPort,
        led: LedId,
        percent: u16,
    ) -> Result<BrightnessWrite, InvalidBrightness> {
        let percent = u8::try_from(percent)
            .ok()
            .filter(|value| *value <= 100)
            .ok_or(InvalidBrightness(percent))?;

        self.brightness.set(led, percent);
        if !self.is_lit(led) {
            return Ok(BrightnessWrite::Deferred);
        }

        match gpio.write_duty(self.pins.led_pin(led), percent) {
            Ok(()) => Ok(BrightnessWrite::Written),
            Err(err) => {
                self.applied[Self::slot(led)] = None;
                Ok(BrightnessWrite::Failed(err))
            }
        }
    }

    fn slot(led: LedId) -> usize {
        match led {
            LedId::Status => 0,
            LedId::AlwaysOn => 1,
            LedId::Scheduled => 2,
        }
    }
}

/// What a brightness change did to the hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrightnessWrite {
    /// The LED is off; the level is used the next time it lights.
    Deferred,
    Written,
    Failed(HardwareError),
}
