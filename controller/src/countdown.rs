//! Single-shot auto-off deadline.
//!
//! ```text
//!        arm()               deadline reached
//! Idle ─────────▶ Armed ─────────────────────▶ Fired ──▶ Idle
//!   ▲               │
//!   └── cancel() ───┘
//! ```
//!
//! Every `arm` bumps a generation counter and starts one worker thread that
//! sleeps on a condvar, emitting progress until the deadline. The worker
//! only fires if, under the lock, its generation and deadline are still the
//! live ones; it clears them before running the callback. A `cancel` that
//! wins the lock first turns the worker into a no-op, one that loses cannot
//! stop the callback.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use chrono::Local;
use tracing::{debug, info, warn};
use wifi_switch_common::Notification;

use crate::relay::EventRelay;

type OffCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Default)]
struct Armed {
    generation: u64,
    deadline: Option<Instant>,
}

struct Shared {
    armed: Mutex<Armed>,
    wake: Condvar,
    progress_interval: Duration,
    relay: EventRelay,
    on_fire: OffCallback,
}

impl Shared {
    fn armed(&self) -> MutexGuard<'_, Armed> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Step {
    Stale,
    Fire,
    Progress(Duration),
}

pub struct AutoOffCountdown {
    shared: Arc<Shared>,
}

impl AutoOffCountdown {
    pub fn new(
        relay: EventRelay,
        progress_interval: Duration,
        on_fire: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                armed: Mutex::new(Armed::default()),
                wake: Condvar::new(),
                progress_interval: progress_interval.max(Duration::from_millis(1)),
                relay,
                on_fire: Box::new(on_fire),
            }),
        }
    }

    /// Replaces any running deadline.
    pub fn arm(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let generation = {
            let mut armed = self.shared.armed();
            armed.generation = armed.generation.wrapping_add(1);
            armed.deadline = Some(deadline);
            armed.generation
        };
        self.shared.wake.notify_all();

        info!("auto-off armed for {}s", duration.as_secs());
        self.shared
            .relay
            .publish(Notification::countdown_progress(duration.as_secs()));

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("auto-off".into())
            .spawn(move || run_worker(&shared, generation, deadline));
        if let Err(err) = spawned {
            warn!("failed to spawn auto-off worker, countdown will not fire: {err}");
        }
    }

    /// No-op when idle.
    pub fn cancel(&self) {
        let cancelled = {
            let mut armed = self.shared.armed();
            if armed.deadline.take().is_some() {
                armed.generation = armed.generation.wrapping_add(1);
                true
            } else {
                false
            }
        };

        if cancelled {
            self.shared.wake.notify_all();
            info!("auto-off cancelled");
        }
    }

    pub fn remaining(&self) -> Duration {
        self.shared
            .armed()
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_active(&self) -> bool {
        self.shared.armed().deadline.is_some()
    }
}

fn run_worker(shared: &Shared, generation: u64, deadline: Instant) {
    let mut next_progress = Instant::now() + shared.progress_interval;

    loop {
        let step = {
            let mut armed = shared.armed();
            loop {
                if armed.generation != generation || armed.deadline != Some(deadline) {
                    break Step::Stale;
                }

                let now = Instant::now();
                if now >= deadline {
                    armed.deadline = None;
                    break Step::Fire;
                }
                if now >= next_progress {
                    break Step::Progress(deadline - now);
                }

                let wait = deadline.min(next_progress) - now;
                armed = shared
                    .wake
                    .wait_timeout(armed, wait)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        };

        match step {
            Step::Stale => {
                debug!("auto-off worker generation {generation} retired");
                return;
            }
            Step::Fire => {
                info!("auto-off deadline reached");
                (shared.on_fire)();
                shared.relay.publish(Notification::CountdownFired {
                    timestamp: Local::now(),
                });
                return;
            }
            Step::Progress(remaining) => {
                shared
                    .relay
                    .publish(Notification::countdown_progress(remaining.as_secs()));
                next_progress += shared.progress_interval;
            }
        }
    }
}
