use serde::{Deserialize, Serialize};

use crate::led::LedId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub button_cooldown_ms: u64,
    pub button_poll_ms: u64,
    pub schedule_check_ms: u64,
    pub countdown_progress_ms: u64,
    pub activity_capacity: usize,
    pub event_buffer: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            button_cooldown_ms: 5_000,
            button_poll_ms: 10,
            schedule_check_ms: 30_000,
            countdown_progress_ms: 60_000,
            activity_capacity: 25,
            event_buffer: 256,
        }
    }
}

impl ControllerConfig {
    pub fn sanitize(&mut self) {
        self.button_poll_ms = self.button_poll_ms.clamp(1, 1_000);
        self.schedule_check_ms = self.schedule_check_ms.clamp(1_000, 3_600_000);
        self.countdown_progress_ms = self.countdown_progress_ms.clamp(1_000, 3_600_000);
        self.activity_capacity = self.activity_capacity.clamp(1, 1_000);
        self.event_buffer = self.event_buffer.clamp(16, 4_096);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSettings {
    pub auto_off_enabled: bool,
    pub auto_off_minutes: u32,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            auto_off_enabled: true,
            auto_off_minutes: 180,
        }
    }
}

impl PersistedSettings {
    pub const MAX_AUTO_OFF_MINUTES: u32 = 1_440;

    pub fn sanitize(&mut self) {
        self.auto_off_minutes = self.auto_off_minutes.clamp(1, Self::MAX_AUTO_OFF_MINUTES);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareConfig {
    pub button_on_pin: u8,
    pub button_off_pin: u8,
    pub status_led_pin: u8,
    pub always_on_led_pin: u8,
    pub scheduled_led_pin: u8,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            button_on_pin: 23,
            button_off_pin: 24,
            status_led_pin: 17,
            always_on_led_pin: 27,
            scheduled_led_pin: 22,
        }
    }
}

impl HardwareConfig {
    pub fn led_pin(&self, led: LedId) -> u8 {
        match led {
            LedId::Status => self.status_led_pin,
            LedId::AlwaysOn => self.always_on_led_pin,
            LedId::Scheduled => self.scheduled_led_pin,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub wifi_on_command: String,
    pub wifi_off_command: String,
    pub connect_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "192.168.1.1".to_string(),
            port: 22,
            username: "root".to_string(),
            wifi_on_command: "# e.g. uci set wireless.radio0.disabled=0 && wifi".to_string(),
            wifi_off_command: "# e.g. uci set wireless.radio0.disabled=1 && wifi".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub http_port: u16,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            http_port: 5000,
            mqtt_host: String::new(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

/// Per-LED brightness in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedBrightness {
    pub status: u8,
    pub always_on: u8,
    pub scheduled: u8,
}

impl Default for LedBrightness {
    fn default() -> Self {
        Self {
            status: 100,
            always_on: 100,
            scheduled: 100,
        }
    }
}

impl LedBrightness {
    pub fn get(&self, led: LedId) -> u8 {
        match led {
            LedId::Status => self.status,
            LedId::AlwaysOn => self.always_on,
            LedId::Scheduled => self.scheduled,
        }
    }

    pub fn set(&mut self, led: LedId, percent: u8) {
        match led {
            LedId::Status => self.status = percent,
            LedId::AlwaysOn => self.always_on = percent,
            LedId::Scheduled => self.scheduled = percent,
        }
    }

    pub fn sanitize(&mut self) {
        self.status = self.status.min(100);
        self.always_on = self.always_on.min(100);
        self.scheduled = self.scheduled.min(100);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub settings: PersistedSettings,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.controller.sanitize();
        self.settings.sanitize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_off_minutes_are_clamped() {
        let mut settings = PersistedSettings {
            auto_off_enabled: true,
            auto_off_minutes: 0,
        };
        settings.sanitize();
        assert_eq!(settings.auto_off_minutes, 1);

        settings.auto_off_minutes = 10_000;
        settings.sanitize();
        assert_eq!(settings.auto_off_minutes, PersistedSettings::MAX_AUTO_OFF_MINUTES);
    }

    #[test]
    fn partial_runtime_file_falls_back_to_defaults() {
        let raw = r#"{ "settings": { "auto_off_enabled": false, "auto_off_minutes": 30 } }"#;
        let runtime: RuntimeConfig = serde_json::from_str(raw).unwrap();

        assert!(!runtime.settings.auto_off_enabled);
        assert_eq!(runtime.settings.auto_off_minutes, 30);
        assert_eq!(runtime.hardware, HardwareConfig::default());
        assert_eq!(runtime.controller.button_cooldown_ms, 5_000);
        assert!(!runtime.executor.enabled);
    }

    #[test]
    fn brightness_sanitize_caps_at_full_duty() {
        let mut brightness = LedBrightness {
            status: 250,
            always_on: 40,
            scheduled: 101,
        };
        brightness.sanitize();
        assert_eq!(brightness.status, 100);
        assert_eq!(brightness.always_on, 40);
        assert_eq!(brightness.scheduled, 100);
    }
}
