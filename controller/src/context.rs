use std::{sync::Arc, time::Duration};

use tokio::sync::broadcast;
use wifi_switch_common::{GpioPort, LedBank, LedBrightness, Notification, RuntimeConfig, Schedule};

use crate::{
    activity::ActivityRecorder,
    coordinator::{Coordinator, CoordinatorParts},
    executor::Executor,
    relay::{EventRelay, RelayReceiver},
    scheduler::ScheduleService,
    store::Store,
};

/// Everything a thread, task or request handler needs, built once at
/// startup and cloned freely.
#[derive(Clone)]
pub struct SwitchContext {
    pub coordinator: Arc<Coordinator>,
    pub scheduler: Arc<ScheduleService>,
    pub activity: Arc<ActivityRecorder>,
    pub events: broadcast::Sender<Notification>,
}

pub struct ContextParts {
    pub runtime: RuntimeConfig,
    pub schedule: Schedule,
    pub brightness: LedBrightness,
    pub store: Arc<Store>,
    pub executor: Arc<dyn Executor>,
    pub gpio: Arc<dyn GpioPort>,
    pub minute: Duration,
}

impl SwitchContext {
    /// The returned receiver must be spawned on the runtime for events to
    /// reach subscribers of `events`.
    pub fn build(parts: ContextParts) -> (Self, RelayReceiver) {
        let (relay, receiver) = EventRelay::new();
        let (events, _) = broadcast::channel(parts.runtime.controller.event_buffer);

        let scheduler = Arc::new(ScheduleService::new(
            parts.schedule,
            Arc::clone(&parts.store),
            relay.clone(),
        ));
        let activity = Arc::new(ActivityRecorder::new(
            Arc::clone(&parts.store),
            relay.clone(),
            parts.runtime.controller.activity_capacity,
        ));
        let leds = LedBank::new(parts.runtime.hardware.clone(), parts.brightness);

        let coordinator = Coordinator::new(CoordinatorParts {
            runtime: parts.runtime,
            executor: parts.executor,
            gpio: parts.gpio,
            leds,
            scheduler: Arc::clone(&scheduler),
            activity: Arc::clone(&activity),
            relay,
            store: parts.store,
            minute: parts.minute,
        });

        (
            Self {
                coordinator,
                scheduler,
                activity,
                events,
            },
            receiver,
        )
    }
}
