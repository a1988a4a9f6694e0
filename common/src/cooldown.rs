use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Per-trigger minimum interval between accepted presses.
///
/// Timestamps are caller-supplied monotonic milliseconds. Querying never
/// consumes a press; the caller registers only once it decides to act.
#[derive(Debug)]
pub struct CooldownGate {
    window_ms: u64,
    last_press_ms: Mutex<HashMap<u8, u64>>,
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: window.as_millis().try_into().unwrap_or(u64::MAX),
            last_press_ms: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn can_press(&self, trigger: u8, now_ms: u64) -> bool {
        self.remaining_ms(trigger, now_ms) == 0
    }

    pub fn register_press(&self, trigger: u8, now_ms: u64) {
        self.records().insert(trigger, now_ms);
    }

    pub fn remaining(&self, trigger: u8, now_ms: u64) -> Duration {
        Duration::from_millis(self.remaining_ms(trigger, now_ms))
    }

    fn remaining_ms(&self, trigger: u8, now_ms: u64) -> u64 {
        match self.records().get(&trigger) {
            Some(last) => self
                .window_ms
                .saturating_sub(now_ms.saturating_sub(*last)),
            // Never pressed counts as infinitely long ago.
            None => 0,
        }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<u8, u64>> {
        self.last_press_ms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
