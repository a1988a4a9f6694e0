//! Hand-off of notifications from blocking threads into the tokio runtime.
//!
//! ```text
//! button-poll thread ─┐
//! auto-off worker    ─┼─▶ unbounded mpsc ─▶ relay task ─▶ broadcast ─▶ ws sessions
//! blocking handlers  ─┘                                              └▶ mqtt bridge
//! ```
//!
//! The queue is unbounded, so `publish` never blocks and never fails from
//! the producer's point of view. Overload shows up one hop later: broadcast
//! subscribers that lag lose their oldest events and are told how many.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info};
use wifi_switch_common::Notification;

#[derive(Debug, Default)]
struct RelayCounters {
    published: AtomicU64,
    undeliverable: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct EventRelay {
    tx: mpsc::UnboundedSender<Notification>,
    counters: Arc<RelayCounters>,
}

#[derive(Debug)]
pub struct RelayReceiver {
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl EventRelay {
    pub fn new() -> (Self, RelayReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                counters: Arc::new(RelayCounters::default()),
            },
            RelayReceiver { rx },
        )
    }

    /// Safe from any thread, inside or outside the runtime.
    pub fn publish(&self, notification: Notification) {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = self.tx.send(notification) {
            self.counters.undeliverable.fetch_add(1, Ordering::Relaxed);
            debug!("relay consumer gone, dropping {}", err.0.name());
        }
    }

    pub fn published(&self) -> u64 {
        self.counters.published.load(Ordering::Relaxed)
    }

    pub fn undeliverable(&self) -> u64 {
        self.counters.undeliverable.load(Ordering::Relaxed)
    }
}

impl RelayReceiver {
    /// Re-emits queued notifications in arrival order until every producer
    /// handle is dropped.
    pub fn spawn(mut self, fanout: broadcast::Sender<Notification>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(notification) = self.rx.recv().await {
                let name = notification.name();
                match fanout.send(notification) {
                    Ok(subscribers) => debug!("relayed {name} to {subscribers} subscriber(s)"),
                    Err(_) => debug!("relayed {name} with no subscribers"),
                }
            }
            info!("event relay stopped");
        })
    }

    #[cfg(test)]
    pub fn drain(&mut self) -> Vec<Notification> {
        let mut drained = Vec::new();
        while let Ok(notification) = self.rx.try_recv() {
            drained.push(notification);
        }
        drained
    }
}
