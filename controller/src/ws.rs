//! Live event feed for dashboard clients at `/api/events`.
//!
//! Server → client frames are serialized [`Notification`]s:
//!
//! ```json
//! { "event": "state-changed", "data": { "state": true, "source": "dashboard", "timestamp": "..." } }
//! ```
//!
//! Client → server frames:
//!
//! ```json
//! { "type": "get-current-state" }
//! { "type": "toggle-wifi", "desired_state": true }
//! { "type": "update-auto-off-duration", "duration_minutes": 90 }
//! ```

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use wifi_switch_common::{Notification, TransitionSource};

use crate::context::SwitchContext;

#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ClientMessage {
    GetCurrentState,
    ToggleWifi { desired_state: bool },
    UpdateAutoOffDuration { duration_minutes: u32 },
}

pub async fn handle_events(ws: WebSocketUpgrade, State(ctx): State<SwitchContext>) -> Response {
    ws.on_upgrade(move |socket| session(socket, ctx))
}

async fn session(socket: WebSocket, ctx: SwitchContext) {
    let (mut sink, mut stream) = socket.split();
    // Subscribe before taking the snapshot so nothing falls in between.
    let mut events = ctx.events.subscribe();
    info!("event client connected ({} subscribers)", ctx.events.receiver_count());

    let snapshot = {
        let ctx = ctx.clone();
        tokio::task::spawn_blocking(move || initial_snapshot(&ctx)).await
    };
    let snapshot = match snapshot {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!("failed to build initial snapshot: {err}");
            return;
        }
    };
    for notification in snapshot {
        if send(&mut sink, &notification).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let notification = match event {
                    Ok(notification) => notification,
                    Err(RecvError::Lagged(count)) => {
                        warn!("event client lagged, dropped {count} event(s)");
                        Notification::EventsDropped { count }
                    }
                    Err(RecvError::Closed) => break,
                };
                if send(&mut sink, &notification).await.is_err() {
                    break;
                }
            }

            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let replies = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(message) => handle_client_message(&ctx, message).await,
                            Err(err) => {
                                debug!("ignoring client frame: {err}");
                                Vec::new()
                            }
                        };
                        let mut delivered = true;
                        for reply in &replies {
                            if send(&mut sink, reply).await.is_err() {
                                delivered = false;
                                break;
                            }
                        }
                        if !delivered {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!("event client error: {err}");
                        break;
                    }
                }
            }
        }
    }

    info!("event client disconnected");
}

/// Current state, a running countdown, auto-off settings and the activity
/// history, in that order.
fn initial_snapshot(ctx: &SwitchContext) -> Vec<Notification> {
    let state = ctx.coordinator.get_state();
    let auto_off = ctx.coordinator.auto_off_status();

    let mut snapshot = vec![Notification::state_changed(
        state.on,
        TransitionSource::Initial,
    )];
    if auto_off.active {
        snapshot.push(Notification::countdown_progress(auto_off.remaining_seconds));
    }
    snapshot.push(ctx.coordinator.settings_notification());
    snapshot.push(Notification::ActivityHistory {
        entries: ctx.activity.history(),
    });
    snapshot
}

/// Replies go to the requesting client only; state changes reach everyone
/// through the broadcast.
async fn handle_client_message(ctx: &SwitchContext, message: ClientMessage) -> Vec<Notification> {
    let coordinator = ctx.coordinator.clone();
    let outcome = tokio::task::spawn_blocking(move || match message {
        ClientMessage::GetCurrentState => {
            let state = coordinator.get_state();
            let auto_off = coordinator.auto_off_status();
            let mut reply = vec![Notification::state_changed(state.on, TransitionSource::Query)];
            if auto_off.active {
                reply.push(Notification::countdown_progress(auto_off.remaining_seconds));
            }
            reply
        }
        ClientMessage::ToggleWifi { desired_state } => {
            coordinator.request_transition(desired_state, TransitionSource::Dashboard);
            Vec::new()
        }
        ClientMessage::UpdateAutoOffDuration { duration_minutes } => {
            match coordinator.update_auto_off(None, Some(duration_minutes)) {
                Ok(_) => Vec::new(),
                Err(err) => {
                    warn!("rejected auto-off update: {err}");
                    vec![coordinator.settings_notification()]
                }
            }
        }
    })
    .await;

    outcome.unwrap_or_else(|err| {
        warn!("client request task failed: {err}");
        Vec::new()
    })
}

async fn send<S>(sink: &mut S, notification: &Notification) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let body = match serde_json::to_string(notification) {
        Ok(body) => body,
        Err(err) => {
            warn!("failed to serialize {}: {err}", notification.name());
            return Ok(());
        }
    };
    sink.send(Message::Text(body.into())).await.map_err(|_| ())
}
