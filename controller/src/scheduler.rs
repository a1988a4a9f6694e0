use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::{Local, NaiveDateTime};
use thiserror::Error;
use tracing::{debug, info, warn};
use wifi_switch_common::{
    Notification, Schedule, ScheduleDraft, ScheduleEntry, ScheduleUpdate, ScheduleValidationError,
};

use crate::{
    coordinator::Coordinator,
    relay::EventRelay,
    store::{Store, StoreError},
};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Invalid(#[from] ScheduleValidationError),
    #[error("schedule change was not saved: {0}")]
    Persistence(#[from] StoreError),
}

pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Owns the live entry set. Every mutation is staged on a copy and only
/// committed once the whole set has been written to disk.
pub struct ScheduleService {
    schedule: Mutex<Schedule>,
    store: Arc<Store>,
    relay: EventRelay,
}

impl ScheduleService {
    pub fn new(mut schedule: Schedule, store: Arc<Store>, relay: EventRelay) -> Self {
        schedule.normalize();
        Self {
            schedule: Mutex::new(schedule),
            store,
            relay,
        }
    }

    pub fn list(&self) -> Vec<ScheduleEntry> {
        self.schedule().entries().to_vec()
    }

    pub fn add(&self, draft: ScheduleDraft) -> Result<ScheduleEntry, ScheduleError> {
        self.mutate(|staged| staged.add(draft))
    }

    pub fn remove(&self, id: u32) -> Result<bool, ScheduleError> {
        self.mutate(|staged| Ok(staged.remove(id)))
    }

    pub fn update(&self, id: u32, update: &ScheduleUpdate) -> Result<bool, ScheduleError> {
        self.mutate(|staged| staged.update(id, update))
    }

    pub fn active_entry(&self, now: NaiveDateTime) -> Option<ScheduleEntry> {
        self.schedule().active_entry(now).cloned()
    }

    pub fn is_active(&self, now: NaiveDateTime) -> bool {
        self.schedule().is_active(now)
    }

    /// Nothing is written or published when `change` leaves the staged
    /// copy equal to the live set.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Schedule) -> Result<T, ScheduleValidationError>,
    ) -> Result<T, ScheduleError> {
        let (result, entries) = {
            let mut live = self.schedule();
            let mut staged = live.clone();
            let result = change(&mut staged)?;
            if staged == *live {
                return Ok(result);
            }

            self.store.save_schedule(&staged)?;
            *live = staged;
            (result, live.entries().to_vec())
        };

        info!("schedule updated ({} entries)", entries.len());
        self.relay.publish(Notification::ScheduleChanged { entries });
        Ok(result)
    }

    fn schedule(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Re-evaluates the schedule indicator on a fixed interval. Never switches
/// the resource itself.
pub fn spawn_schedule_check(
    coordinator: Arc<Coordinator>,
    interval: Duration,
    running: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("schedule-check".into())
        .spawn(move || {
            info!("schedule check every {}s", interval.as_secs());
            while running.load(Ordering::Relaxed) {
                let tick = panic::catch_unwind(AssertUnwindSafe(|| {
                    coordinator.refresh_schedule_indicator(local_now());
                }));
                if tick.is_err() {
                    warn!("schedule check iteration panicked, continuing");
                }
                thread::sleep(interval);
            }
            debug!("schedule check stopped");
        })
}
