use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};
use wifi_switch_common::{CooldownGate, GpioPort, HardwareConfig, TransitionSource};

use crate::coordinator::Coordinator;

struct Button {
    pin: u8,
    desired: bool,
    source: TransitionSource,
    // Pull-up input: high while released.
    last_level: bool,
    read_failing: bool,
}

impl Button {
    fn new(pin: u8, desired: bool, source: TransitionSource) -> Self {
        Self {
            pin,
            desired,
            source,
            last_level: true,
            read_failing: false,
        }
    }
}

/// Edge-detecting poller for the two physical buttons.
pub struct ButtonPoller {
    gpio: Arc<dyn GpioPort>,
    coordinator: Arc<Coordinator>,
    gate: CooldownGate,
    buttons: [Button; 2],
}

impl ButtonPoller {
    pub fn new(
        gpio: Arc<dyn GpioPort>,
        coordinator: Arc<Coordinator>,
        pins: &HardwareConfig,
        cooldown: Duration,
    ) -> Self {
        Self {
            gpio,
            coordinator,
            gate: CooldownGate::new(cooldown),
            buttons: [
                Button::new(pins.button_on_pin, true, TransitionSource::ButtonOn),
                Button::new(pins.button_off_pin, false, TransitionSource::ButtonOff),
            ],
        }
    }

    /// Returns how many presses were accepted past the cooldown gate.
    pub fn poll_once(&mut self, now_ms: u64) -> usize {
        let mut accepted = 0;

        for button in &mut self.buttons {
            let level = match self.gpio.read_pin(button.pin) {
                Ok(level) => {
                    if button.read_failing {
                        info!("GPIO{} readable again", button.pin);
                        button.read_failing = false;
                    }
                    level
                }
                Err(err) => {
                    if !button.read_failing {
                        warn!("button read failed: {err}");
                        button.read_failing = true;
                    }
                    continue;
                }
            };

            let pressed = button.last_level && !level;
            button.last_level = level;
            if !pressed {
                continue;
            }

            if !self.gate.can_press(button.pin, now_ms) {
                debug!(
                    "{} ignored, cooldown {}ms remaining",
                    button.source.as_str(),
                    self.gate.remaining(button.pin, now_ms).as_millis()
                );
                continue;
            }

            self.gate.register_press(button.pin, now_ms);
            accepted += 1;
            info!("{} pressed", button.source.as_str());
            self.coordinator
                .request_transition(button.desired, button.source);
        }

        accepted
    }

    pub fn spawn(mut self, interval: Duration, running: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("button-poll".into())
            .spawn(move || {
                info!(
                    "polling buttons on GPIO{} / GPIO{} ({} ms cooldown)",
                    self.buttons[0].pin,
                    self.buttons[1].pin,
                    self.gate.window().as_millis()
                );
                while running.load(Ordering::Relaxed) {
                    let tick =
                        panic::catch_unwind(AssertUnwindSafe(|| self.poll_once(monotonic_ms())));
                    if tick.is_err() {
                        warn!("button poll iteration panicked, continuing");
                    }
                    thread::sleep(interval);
                }
                debug!("button poll stopped");
            })
    }
}

pub fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::coordinator::tests::harness;

    #[test]
    fn falling_edge_triggers_once_while_held() {
        let h = harness();
        let pins = HardwareConfig::default();
        let mut poller = ButtonPoller::new(
            h.gpio.clone(),
            Arc::clone(&h.coordinator),
            &pins,
            Duration::from_secs(5),
        );

        assert_eq!(poller.poll_once(0), 0);

        h.gpio.set_input(pins.button_on_pin, false);
        assert_eq!(poller.poll_once(10), 1);
        assert!(h.coordinator.get_state().on);

        // Still held: no new edge.
        assert_eq!(poller.poll_once(20), 0);
        assert_eq!(poller.poll_once(10_000), 0);
    }

    #[test]
    fn bounce_inside_cooldown_is_suppressed() {
        let h = harness();
        let pins = HardwareConfig::default();
        let mut poller = ButtonPoller::new(
            h.gpio.clone(),
            Arc::clone(&h.coordinator),
            &pins,
            Duration::from_secs(5),
        );

        let mut accepted = 0;
        for (step, level) in [false, true, false, true, false].into_iter().enumerate() {
            h.gpio.set_input(pins.button_off_pin, level);
            accepted += poller.poll_once(1_000 + step as u64 * 100);
        }
        assert_eq!(accepted, 1);

        h.gpio.set_input(pins.button_off_pin, true);
        poller.poll_once(6_000);
        h.gpio.set_input(pins.button_off_pin, false);
        assert_eq!(poller.poll_once(6_010), 1);
    }

    #[test]
    fn each_button_requests_its_own_state() {
        let h = harness();
        let pins = HardwareConfig::default();
        let mut poller = ButtonPoller::new(
            h.gpio.clone(),
            Arc::clone(&h.coordinator),
            &pins,
            Duration::from_secs(5),
        );

        h.gpio.set_input(pins.button_on_pin, false);
        poller.poll_once(100);
        h.gpio.set_input(pins.button_off_pin, false);
        poller.poll_once(200);

        let state = h.coordinator.get_state();
        assert!(!state.on);
        assert_eq!(state.source, TransitionSource::ButtonOff);
        assert_eq!(h.executor.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn poll_thread_stops_when_flag_clears() {
        let h = harness();
        let running = Arc::new(AtomicBool::new(true));
        let handle = ButtonPoller::new(
            h.gpio.clone(),
            Arc::clone(&h.coordinator),
            &HardwareConfig::default(),
            Duration::from_secs(5),
        )
        .spawn(Duration::from_millis(5), Arc::clone(&running))
        .unwrap();

        thread::sleep(Duration::from_millis(30));
        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
