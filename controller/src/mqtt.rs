use std::time::Duration;

use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use wifi_switch_common::{event_topic, Notification, TransitionSource, TOPIC_STATE};

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Serialize)]
struct StatePayload {
    on: bool,
    source: TransitionSource,
}

#[derive(Debug, PartialEq)]
struct Outgoing {
    topic: String,
    retain: bool,
    payload: Vec<u8>,
}

/// Mirrors every notification to the broker. Does nothing when no broker
/// host is configured.
pub fn spawn_bridge(broker: BrokerSettings, events: broadcast::Receiver<Notification>) {
    if broker.host.trim().is_empty() {
        info!("mqtt bridge disabled (no broker host configured)");
        return;
    }

    let mut options = MqttOptions::new("wifi-switch-controller", broker.host, broker.port);
    options.set_keep_alive(Duration::from_secs(30));
    if !broker.user.is_empty() {
        options.set_credentials(broker.user, broker.pass);
    }

    let (client, eventloop) = AsyncClient::new(options, 64);
    spawn_connection_loop(eventloop);
    spawn_forwarder(client, events);
}

fn spawn_connection_loop(mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_forwarder(client: AsyncClient, mut events: broadcast::Receiver<Notification>) {
    tokio::spawn(async move {
        loop {
            let notification = match events.recv().await {
                Ok(notification) => notification,
                Err(RecvError::Lagged(count)) => {
                    warn!("mqtt bridge lagged, {count} event(s) not mirrored");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            for message in outgoing(&notification) {
                if let Err(err) = client
                    .publish(message.topic, QoS::AtLeastOnce, message.retain, message.payload)
                    .await
                {
                    warn!("mqtt publish of {} failed: {err}", notification.name());
                }
            }
        }
        info!("mqtt bridge stopped");
    });
}

fn outgoing(notification: &Notification) -> Vec<Outgoing> {
    let mut messages = Vec::with_capacity(2);

    match serde_json::to_vec(notification) {
        Ok(payload) => messages.push(Outgoing {
            topic: event_topic(notification.name()),
            retain: false,
            payload,
        }),
        Err(err) => warn!("failed to serialize {}: {err}", notification.name()),
    }

    if let Notification::StateChanged { state, source, .. } = notification {
        match serde_json::to_vec(&StatePayload {
            on: *state,
            source: *source,
        }) {
            Ok(payload) => messages.push(Outgoing {
                topic: TOPIC_STATE.to_string(),
                retain: true,
                payload,
            }),
            Err(err) => warn!("failed to serialize state payload: {err}"),
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_change_is_also_retained() {
        let messages = outgoing(&Notification::state_changed(true, TransitionSource::ButtonOn));

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].topic, "wifi-switch/event/state-changed");
        assert!(!messages[0].retain);

        assert_eq!(messages[1].topic, TOPIC_STATE);
        assert!(messages[1].retain);
        let state: serde_json::Value = serde_json::from_slice(&messages[1].payload).unwrap();
        assert_eq!(state, serde_json::json!({ "on": true, "source": "button-on" }));
    }

    #[test]
    fn other_events_go_to_their_own_topic() {
        let messages = outgoing(&Notification::countdown_progress(90));

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "wifi-switch/event/countdown-progress");
        let body: serde_json::Value = serde_json::from_slice(&messages[0].payload).unwrap();
        assert_eq!(body["data"]["remaining_minutes"], 1);
    }
}
