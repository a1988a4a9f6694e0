use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};
use wifi_switch_common::{ActivityEntry, ActivityLog, Notification};

use crate::{relay::EventRelay, store::Store};

/// Bounded activity history, persisted after every append.
pub struct ActivityRecorder {
    log: Mutex<ActivityLog>,
    store: Arc<Store>,
    relay: EventRelay,
}

impl ActivityRecorder {
    pub fn new(store: Arc<Store>, relay: EventRelay, capacity: usize) -> Self {
        let history = store.load_activity().unwrap_or_else(|err| {
            warn!("failed to load activity history, starting empty: {err:#}");
            Vec::new()
        });
        let log = ActivityLog::with_history(capacity, history);
        info!("activity history loaded ({} entries)", log.len());

        Self {
            log: Mutex::new(log),
            store,
            relay,
        }
    }

    /// A failed write keeps the entry in memory; it is written again with
    /// the next append or on flush.
    pub fn record(&self, entry: ActivityEntry) {
        info!("activity: {}", entry.message);
        {
            let mut log = self.log();
            log.push(entry.clone());
            if let Err(err) = self.store.save_activity(&log.entries()) {
                warn!("failed to persist activity log: {err:#}");
            }
        }
        self.relay.publish(Notification::ActivityLogged { entry });
    }

    pub fn history(&self) -> Vec<ActivityEntry> {
        self.log().entries()
    }

    pub fn flush(&self) {
        let log = self.log();
        if let Err(err) = self.store.save_activity(&log.entries()) {
            warn!("failed to flush activity log: {err:#}");
        }
    }

    fn log(&self) -> MutexGuard<'_, ActivityLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
