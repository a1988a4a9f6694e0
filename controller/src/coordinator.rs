//! Authoritative WiFi on/off state.
//!
//! Every trigger funnels into [`Coordinator::request_transition`]. The state
//! lock only covers the compare-and-commit; the executor call, LED update,
//! activity entry, countdown and notification happen afterwards, in that
//! order, without holding it.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, info, warn};
use wifi_switch_common::{
    ActivityEntry, AutoOffStatus, BrightnessWrite, ControllerStatus, GpioPort, InvalidBrightness,
    LedBank, LedId, LedStates, LedStatus, Notification, PersistedSettings, ResourceState, RuntimeConfig,
    TransitionSource,
};

use crate::{
    activity::ActivityRecorder,
    countdown::AutoOffCountdown,
    executor::Executor,
    relay::EventRelay,
    scheduler::{local_now, ScheduleService},
    store::Store,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("auto-off duration must be between 1 and {max} minutes, got {0}", max = PersistedSettings::MAX_AUTO_OFF_MINUTES)]
pub struct InvalidAutoOff(pub u32);

pub struct CoordinatorParts {
    pub runtime: RuntimeConfig,
    pub executor: Arc<dyn Executor>,
    pub gpio: Arc<dyn GpioPort>,
    pub leds: LedBank,
    pub scheduler: Arc<ScheduleService>,
    pub activity: Arc<ActivityRecorder>,
    pub relay: EventRelay,
    pub store: Arc<Store>,
    /// Wall-clock length of one auto-off minute.
    pub minute: Duration,
}

pub struct Coordinator {
    state: Mutex<ResourceState>,
    runtime: Mutex<RuntimeConfig>,
    executor: Arc<dyn Executor>,
    gpio: Arc<dyn GpioPort>,
    leds: Mutex<LedBank>,
    scheduler: Arc<ScheduleService>,
    activity: Arc<ActivityRecorder>,
    countdown: AutoOffCountdown,
    relay: EventRelay,
    store: Arc<Store>,
    minute: Duration,
}

impl Coordinator {
    pub fn new(parts: CoordinatorParts) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let this = this.clone();
            let progress =
                Duration::from_millis(parts.runtime.controller.countdown_progress_ms);
            let countdown = AutoOffCountdown::new(parts.relay.clone(), progress, move || {
                if let Some(coordinator) = this.upgrade() {
                    coordinator.request_transition(false, TransitionSource::AutoOff);
                }
            });

            Self {
                state: Mutex::new(ResourceState::initial()),
                runtime: Mutex::new(parts.runtime),
                executor: parts.executor,
                gpio: parts.gpio,
                leds: Mutex::new(parts.leds),
                scheduler: parts.scheduler,
                activity: parts.activity,
                countdown,
                relay: parts.relay,
                store: parts.store,
                minute: parts.minute,
            }
        })
    }

    pub fn get_state(&self) -> ResourceState {
        *self.state()
    }

    /// Returns `false` without side effects when `desired` already holds.
    pub fn request_transition(&self, desired: bool, source: TransitionSource) -> bool {
        {
            let mut state = self.state();
            if state.on == desired {
                debug!(
                    "wifi already {} ({} request ignored)",
                    state.label(),
                    source.as_str()
                );
                return false;
            }
            *state = ResourceState {
                on: desired,
                source,
            };
        }
        info!(
            "wifi -> {} via {}",
            if desired { "ON" } else { "OFF" },
            source.as_str()
        );

        let outcome = self.executor.apply(desired);
        if outcome.ok {
            debug!("executor: {}", outcome.detail);
        } else {
            warn!("executor failed, keeping requested state: {}", outcome.detail);
            self.relay
                .publish(Notification::execution_error(outcome.detail));
        }

        let within_schedule = !desired && self.scheduler.is_active(local_now());
        self.sync_leds(within_schedule);

        if !source.is_internal() {
            self.activity
                .record(ActivityEntry::for_transition(desired, source));
        }

        if desired {
            let settings = self.auto_off_settings();
            if settings.auto_off_enabled {
                self.countdown
                    .arm(self.minute * settings.auto_off_minutes);
            }
        } else {
            self.countdown.cancel();
        }

        self.relay
            .publish(Notification::state_changed(desired, source));
        true
    }

    /// Only adjusts the status LED while WiFi is off.
    pub fn refresh_schedule_indicator(&self, now: NaiveDateTime) {
        if self.get_state().on {
            return;
        }
        let within_schedule = self.scheduler.is_active(now);
        self.sync_leds(within_schedule);
    }

    pub fn initialize_indicators(&self) {
        let on = self.get_state().on;
        let within_schedule = !on && self.scheduler.is_active(local_now());
        self.sync_leds(within_schedule);
        info!("indicators initialized (wifi {})", if on { "ON" } else { "OFF" });
    }

    /// The new level is kept and published even if the LED could not be
    /// driven; the next indicator update rewrites it.
    pub fn set_led_brightness(&self, led: LedId, percent: u16) -> Result<(), InvalidBrightness> {
        let (brightness, write) = {
            let mut leds = self.leds();
            let write = leds.set_brightness(self.gpio.as_ref(), led, percent)?;
            (leds.brightness(), write)
        };
        match write {
            BrightnessWrite::Written => {
                info!("{} LED brightness -> {}%", led.as_str(), brightness.get(led))
            }
            BrightnessWrite::Deferred => info!(
                "{} LED brightness -> {}% (applies when lit)",
                led.as_str(),
                brightness.get(led)
            ),
            BrightnessWrite::Failed(err) => warn!(
                "{} LED brightness -> {}% but the write failed, will retry on next change: {err}",
                led.as_str(),
                brightness.get(led)
            ),
        }

        if let Err(err) = self.store.save_led_brightness(&brightness) {
            warn!("failed to persist LED brightness: {err:#}");
        }
        self.relay.publish(Notification::LedBrightnessChanged {
            led,
            brightness: brightness.get(led),
        });
        Ok(())
    }

    pub fn auto_off_settings(&self) -> PersistedSettings {
        self.runtime().settings.clone()
    }

    /// Disabling cancels a running countdown. A new duration takes effect
    /// the next time WiFi turns on.
    pub fn update_auto_off(
        &self,
        enabled: Option<bool>,
        minutes: Option<u32>,
    ) -> Result<PersistedSettings, InvalidAutoOff> {
        if let Some(minutes) = minutes {
            if !(1..=PersistedSettings::MAX_AUTO_OFF_MINUTES).contains(&minutes) {
                return Err(InvalidAutoOff(minutes));
            }
        }

        let (settings, snapshot) = {
            let mut runtime = self.runtime();
            if let Some(enabled) = enabled {
                runtime.settings.auto_off_enabled = enabled;
            }
            if let Some(minutes) = minutes {
                runtime.settings.auto_off_minutes = minutes;
            }
            (runtime.settings.clone(), runtime.clone())
        };

        if let Err(err) = self.store.save_runtime_config(&snapshot) {
            warn!("failed to persist auto-off settings: {err:#}");
        }
        if !settings.auto_off_enabled {
            self.countdown.cancel();
        }

        let message = if settings.auto_off_enabled {
            format!(
                "Auto-off duration updated to {} minutes",
                settings.auto_off_minutes
            )
        } else {
            "Auto-off disabled".to_string()
        };
        self.activity.record(ActivityEntry::new(message, "settings"));
        self.relay.publish(self.settings_notification());
        Ok(settings)
    }

    /// `settings-updated` carrying the current auto-off and executor settings.
    pub fn settings_notification(&self) -> Notification {
        let runtime = self.runtime();
        Notification::SettingsUpdated {
            auto_off_enabled: runtime.settings.auto_off_enabled,
            auto_off_duration_minutes: runtime.settings.auto_off_minutes,
            executor_enabled: runtime.executor.enabled,
        }
    }

    pub fn auto_off_status(&self) -> AutoOffStatus {
        AutoOffStatus::new(
            &self.auto_off_settings(),
            self.countdown.is_active(),
            self.countdown.remaining().as_secs(),
        )
    }

    pub fn led_status(&self) -> LedStatus {
        let leds = self.leds();
        LedStatus {
            lit: leds.lit(),
            brightness: leds.brightness(),
        }
    }

    pub fn status(&self) -> ControllerStatus {
        let state = self.get_state();
        let executor_enabled = self.runtime().executor.enabled;
        ControllerStatus {
            wifi_on: state.on,
            source: state.source,
            auto_off: self.auto_off_status(),
            leds: self.led_status(),
            active_schedule: self.scheduler.active_entry(local_now()),
            executor_enabled,
        }
    }

    pub fn shutdown(&self) {
        self.countdown.cancel();
        self.activity.flush();
        info!(
            "coordinator stopped ({} events published, {} undeliverable)",
            self.relay.published(),
            self.relay.undeliverable()
        );
    }

    /// LEDs follow the state committed at the time of the write, so a later
    /// transition that finishes first is not overwritten by a stale one.
    fn sync_leds(&self, within_schedule: bool) {
        let mut leds = self.leds();
        let on = self.get_state().on;
        match leds.apply(self.gpio.as_ref(), LedStates::derive(on, within_schedule)) {
            Ok(0) => {}
            Ok(writes) => debug!("updated {writes} LED(s)"),
            Err(err) => warn!("LED update failed, will retry on next change: {err}"),
        }
    }

    fn state(&self) -> MutexGuard<'_, ResourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn runtime(&self) -> MutexGuard<'_, RuntimeConfig> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn leds(&self) -> MutexGuard<'_, LedBank> {
        self.leds.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use wifi_switch_common::{HardwareConfig, LedBrightness, Schedule};

    use super::*;
    use crate::{executor::ExecutionOutcome, gpio::SimulatedGpio, relay::RelayReceiver};

    #[derive(Default)]
    pub(crate) struct CountingExecutor {
        pub calls: AtomicUsize,
        pub requested: Mutex<Vec<bool>>,
        pub fail: bool,
    }

    impl Executor for CountingExecutor {
        fn apply(&self, desired: bool) -> ExecutionOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().unwrap().push(desired);
            if self.fail {
                ExecutionOutcome::failure("ssh: connect to host 192.168.1.1 port 22: timed out")
            } else {
                ExecutionOutcome::success("")
            }
        }
    }

    pub(crate) struct Harness {
        pub coordinator: Arc<Coordinator>,
        pub executor: Arc<CountingExecutor>,
        pub gpio: Arc<SimulatedGpio>,
        pub activity: Arc<ActivityRecorder>,
        pub receiver: RelayReceiver,
        pub dir: TempDir,
    }

    impl Harness {
        pub fn names(&mut self) -> Vec<&'static str> {
            self.receiver.drain().iter().map(Notification::name).collect()
        }
    }

    pub(crate) fn harness_with(executor: CountingExecutor, minute: Duration) -> Harness {
        harness_from(executor, minute, RuntimeConfig::default())
    }

    fn harness_from(executor: CountingExecutor, minute: Duration, runtime: RuntimeConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_path_buf();
        build_harness(executor, minute, runtime, dir, data_dir)
    }

    /// Every store write fails: the data directory sits below a plain file.
    fn unwritable_harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        build_harness(
            CountingExecutor::default(),
            Duration::from_secs(60),
            RuntimeConfig::default(),
            dir,
            blocker.join("data"),
        )
    }

    fn build_harness(
        executor: CountingExecutor,
        minute: Duration,
        runtime: RuntimeConfig,
        dir: TempDir,
        data_dir: std::path::PathBuf,
    ) -> Harness {
        let store = Arc::new(Store::new(data_dir));
        let (relay, receiver) = EventRelay::new();
        let executor = Arc::new(executor);
        let gpio = Arc::new(SimulatedGpio::new());
        let scheduler = Arc::new(ScheduleService::new(
            Schedule::default(),
            Arc::clone(&store),
            relay.clone(),
        ));
        let activity = Arc::new(ActivityRecorder::new(Arc::clone(&store), relay.clone(), 25));

        let coordinator = Coordinator::new(CoordinatorParts {
            runtime,
            executor: executor.clone(),
            gpio: gpio.clone(),
            leds: LedBank::new(HardwareConfig::default(), LedBrightness::default()),
            scheduler,
            activity: Arc::clone(&activity),
            relay,
            store,
            minute,
        });

        Harness {
            coordinator,
            executor,
            gpio,
            activity,
            receiver,
            dir,
        }
    }

    pub(crate) fn harness() -> Harness {
        harness_with(CountingExecutor::default(), Duration::from_secs(60))
    }

    #[test]
    fn repeated_request_is_a_no_op() {
        let mut h = harness();

        assert!(h.coordinator.request_transition(true, TransitionSource::Dashboard));
        assert!(!h.coordinator.request_transition(true, TransitionSource::ButtonOn));

        assert_eq!(h.executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.coordinator.get_state().source, TransitionSource::Dashboard);
        let state_changes = h.names().iter().filter(|n| **n == "state-changed").count();
        assert_eq!(state_changes, 1);
    }

    #[test]
    fn dashboard_turn_on_updates_every_observer() {
        let mut h = harness();
        let pins = HardwareConfig::default();

        assert!(h.coordinator.request_transition(true, TransitionSource::Dashboard));

        let status = h.coordinator.status();
        assert!(status.wifi_on);
        assert_eq!(
            status.leds.lit,
            LedStates {
                status: true,
                always_on: true,
                scheduled: false,
            }
        );
        assert_eq!(h.gpio.duty(pins.always_on_led_pin), Some(100));
        assert_eq!(h.gpio.duty(pins.scheduled_led_pin), Some(0));

        let history = h.activity.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "WiFi turned ON (via dashboard)");

        assert!(status.auto_off.active);
        assert!((179 * 60..=180 * 60).contains(&status.auto_off.remaining_seconds));

        let events = h.receiver.drain();
        let changes: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                Notification::StateChanged { state, source, .. } => Some((*state, *source)),
                _ => None,
            })
            .collect();
        assert_eq!(changes, vec![(true, TransitionSource::Dashboard)]);
        assert_eq!(events.last().map(Notification::name), Some("state-changed"));
    }

    #[test]
    fn dashboard_turn_on_without_auto_off() {
        let mut runtime = RuntimeConfig::default();
        runtime.settings.auto_off_enabled = false;
        let mut h = harness_from(CountingExecutor::default(), Duration::from_secs(60), runtime);

        assert!(h.coordinator.request_transition(true, TransitionSource::Dashboard));

        assert_eq!(*h.executor.requested.lock().unwrap(), vec![true]);
        assert_eq!(
            h.coordinator.led_status().lit,
            LedStates {
                status: true,
                always_on: true,
                scheduled: false,
            }
        );
        assert_eq!(h.activity.history().len(), 1);
        assert!(!h.coordinator.auto_off_status().active);
        assert_eq!(h.names(), vec!["activity-logged", "state-changed"]);
    }

    #[test]
    fn auto_off_expiry_turns_wifi_off_once() {
        // 180 default minutes of 1ms each.
        let mut h = harness_with(CountingExecutor::default(), Duration::from_millis(1));

        assert!(h.coordinator.request_transition(true, TransitionSource::ButtonOn));
        thread::sleep(Duration::from_millis(700));

        let state = h.coordinator.get_state();
        assert!(!state.on);
        assert_eq!(state.source, TransitionSource::AutoOff);
        assert_eq!(h.coordinator.auto_off_status().remaining_seconds, 0);
        assert!(!h.coordinator.auto_off_status().active);

        let events = h.receiver.drain();
        let fired = events
            .iter()
            .filter(|event| matches!(event, Notification::CountdownFired { .. }))
            .count();
        let auto_off_changes = events
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    Notification::StateChanged {
                        state: false,
                        source: TransitionSource::AutoOff,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(fired, 1);
        assert_eq!(auto_off_changes, 1);
        assert_eq!(
            h.activity.history().last().map(|entry| entry.message.as_str()),
            Some("WiFi turned OFF (via auto-off timer)")
        );
    }

    #[test]
    fn turning_off_cancels_the_countdown() {
        let h = harness_with(CountingExecutor::default(), Duration::from_millis(1));

        h.coordinator.request_transition(true, TransitionSource::Dashboard);
        h.coordinator.request_transition(false, TransitionSource::ButtonOff);
        thread::sleep(Duration::from_millis(400));

        assert_eq!(h.coordinator.get_state().source, TransitionSource::ButtonOff);
        assert_eq!(h.executor.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn executor_failure_keeps_state_and_reports() {
        let mut h = harness_with(
            CountingExecutor {
                fail: true,
                ..CountingExecutor::default()
            },
            Duration::from_secs(60),
        );

        assert!(h.coordinator.request_transition(true, TransitionSource::Dashboard));
        assert!(h.coordinator.get_state().on);

        let names = h.names();
        assert!(names.contains(&"execution-error"));
        assert_eq!(names.last(), Some(&"state-changed"));
    }

    #[test]
    fn internal_sources_skip_the_activity_log() {
        let h = harness();
        h.coordinator.request_transition(true, TransitionSource::Query);
        assert!(h.activity.history().is_empty());
    }

    #[test]
    fn disabling_auto_off_cancels_and_persists() {
        let mut h = harness();
        h.coordinator.request_transition(true, TransitionSource::Dashboard);
        assert!(h.coordinator.auto_off_status().active);
        h.receiver.drain();

        let settings = h.coordinator.update_auto_off(Some(false), None).unwrap();
        assert!(!settings.auto_off_enabled);
        assert!(!h.coordinator.auto_off_status().active);
        assert_eq!(h.names(), vec!["activity-logged", "settings-updated"]);

        let saved = Store::new(h.dir.path()).load_runtime_config().unwrap();
        assert!(!saved.settings.auto_off_enabled);
    }

    #[test]
    fn auto_off_duration_is_validated() {
        let h = harness();

        assert_eq!(
            h.coordinator.update_auto_off(None, Some(0)),
            Err(InvalidAutoOff(0))
        );
        assert!(h.coordinator.update_auto_off(None, Some(1_441)).is_err());

        let settings = h.coordinator.update_auto_off(None, Some(90)).unwrap();
        assert_eq!(settings.auto_off_minutes, 90);
        assert_eq!(
            h.activity.history()[0].message,
            "Auto-off duration updated to 90 minutes"
        );
    }

    #[test]
    fn brightness_change_is_persisted_and_published() {
        let mut h = harness();
        let pins = HardwareConfig::default();
        h.coordinator.initialize_indicators();
        h.receiver.drain();

        h.coordinator.set_led_brightness(LedId::Scheduled, 25).unwrap();
        assert_eq!(h.gpio.duty(pins.scheduled_led_pin), Some(25));
        assert_eq!(h.names(), vec!["led-brightness-changed"]);

        let saved = Store::new(h.dir.path()).load_led_brightness().unwrap();
        assert_eq!(saved.scheduled, 25);

        assert!(matches!(
            h.coordinator.set_led_brightness(LedId::Status, 150),
            Err(InvalidBrightness(150))
        ));
    }

    #[test]
    fn brightness_survives_a_failed_led_write() {
        let mut h = harness();
        let pins = HardwareConfig::default();
        h.coordinator.initialize_indicators();
        h.receiver.drain();

        h.gpio.set_jammed(pins.scheduled_led_pin, true);
        h.coordinator.set_led_brightness(LedId::Scheduled, 10).unwrap();

        assert_eq!(h.gpio.duty(pins.scheduled_led_pin), Some(100));
        let leds = h.coordinator.led_status();
        assert_eq!(leds.brightness.scheduled, 10);
        assert!(!leds.lit.scheduled);
        assert_eq!(h.names(), vec!["led-brightness-changed"]);
        let saved = Store::new(h.dir.path()).load_led_brightness().unwrap();
        assert_eq!(saved.scheduled, 10);

        h.gpio.set_jammed(pins.scheduled_led_pin, false);
        h.coordinator.initialize_indicators();
        assert_eq!(h.gpio.duty(pins.scheduled_led_pin), Some(10));
        assert!(h.coordinator.led_status().lit.scheduled);
    }

    #[test]
    fn brightness_applies_when_store_is_unwritable() {
        let mut h = unwritable_harness();
        let pins = HardwareConfig::default();
        h.coordinator.initialize_indicators();
        h.receiver.drain();

        h.coordinator.set_led_brightness(LedId::Scheduled, 40).unwrap();

        assert_eq!(h.gpio.duty(pins.scheduled_led_pin), Some(40));
        assert_eq!(h.coordinator.led_status().brightness.scheduled, 40);
        assert_eq!(h.names(), vec!["led-brightness-changed"]);
    }

    #[test]
    fn auto_off_update_applies_when_store_is_unwritable() {
        let mut h = unwritable_harness();

        let settings = h.coordinator.update_auto_off(Some(true), Some(45)).unwrap();

        assert_eq!(settings.auto_off_minutes, 45);
        assert_eq!(h.coordinator.auto_off_settings().auto_off_minutes, 45);
        assert_eq!(h.names(), vec!["activity-logged", "settings-updated"]);

        h.coordinator.request_transition(true, TransitionSource::Dashboard);
        let remaining = h.coordinator.auto_off_status().remaining_seconds;
        assert!((44 * 60..=45 * 60).contains(&remaining));
    }

    #[test]
    fn schedule_indicator_only_moves_while_off() {
        use chrono::NaiveDate;
        use wifi_switch_common::ScheduleDraft;

        let h = harness();
        let pins = HardwareConfig::default();
        h.coordinator
            .scheduler
            .add(ScheduleDraft {
                days: vec!["FRI".to_string()],
                start: "22:00".to_string(),
                end: "02:00".to_string(),
                description: String::new(),
            })
            .unwrap();
        let friday = NaiveDate::from_ymd_opt(2026, 1, 9).unwrap();

        h.coordinator
            .refresh_schedule_indicator(friday.and_hms_opt(23, 30, 0).unwrap());
        assert_eq!(h.gpio.duty(pins.status_led_pin), Some(100));

        h.coordinator
            .refresh_schedule_indicator(friday.and_hms_opt(10, 0, 0).unwrap());
        assert_eq!(h.gpio.duty(pins.status_led_pin), Some(0));

        h.coordinator.request_transition(true, TransitionSource::Dashboard);
        h.coordinator
            .refresh_schedule_indicator(friday.and_hms_opt(10, 0, 0).unwrap());
        assert_eq!(h.gpio.duty(pins.status_led_pin), Some(100));
    }

    #[test]
    fn concurrent_requests_switch_exactly_once() {
        let h = harness();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = Arc::clone(&h.coordinator);
                thread::spawn(move || coordinator.request_transition(true, TransitionSource::Dashboard))
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|accepted| *accepted)
            .count();

        assert_eq!(accepted, 1);
        assert_eq!(h.executor.calls.load(Ordering::SeqCst), 1);
    }
}
