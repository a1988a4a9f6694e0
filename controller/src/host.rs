use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use wifi_switch_common::{
    ControllerStatus, GpioPort, LedBrightness, LedId, RuntimeConfig, Schedule, ScheduleDraft,
    ScheduleUpdate, TransitionSource,
};

use crate::{
    buttons::ButtonPoller,
    context::{ContextParts, SwitchContext},
    executor::SshExecutor,
    gpio::SimulatedGpio,
    mqtt::{self, BrokerSettings},
    scheduler::{local_now, spawn_schedule_check, ScheduleError},
    store::Store,
    ws,
};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct WifiResponse {
    changed: bool,
    status: ControllerStatus,
}

#[derive(Debug, Deserialize)]
struct AutoOffUpdate {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(rename = "durationMinutes", default)]
    duration_minutes: Option<u32>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = Arc::new(Store::from_env());
    let mut runtime = store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();
    if let Some(enabled) = env_flag("WIFI_SWITCH_EXECUTOR_ENABLED") {
        runtime.executor.enabled = enabled;
    }

    let schedule = store.load_schedule().unwrap_or_else(|err| {
        warn!("failed to load schedule from store: {err:#}");
        Schedule::default()
    });
    let brightness = store.load_led_brightness().unwrap_or_else(|err| {
        warn!("failed to load LED brightness from store: {err:#}");
        LedBrightness::default()
    });

    let broker = BrokerSettings {
        host: std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone()),
        port: std::env::var("MQTT_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(runtime.network.mqtt_port),
        user: std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone()),
        pass: std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone()),
    };
    let port = std::env::var("WIFI_SWITCH_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.http_port);

    let controller = runtime.controller.clone();
    let hardware = runtime.hardware.clone();
    info!(
        "executor {} for {}@{}",
        if runtime.executor.enabled { "enabled" } else { "disabled (test mode)" },
        runtime.executor.username,
        runtime.executor.host
    );

    let gpio: Arc<dyn GpioPort> = Arc::new(SimulatedGpio::new());
    let (ctx, relay_receiver) = SwitchContext::build(ContextParts {
        executor: Arc::new(SshExecutor::new(runtime.executor.clone())),
        runtime,
        schedule,
        brightness,
        store,
        gpio: Arc::clone(&gpio),
        minute: Duration::from_secs(60),
    });

    relay_receiver.spawn(ctx.events.clone());
    mqtt::spawn_bridge(broker, ctx.events.subscribe());
    ctx.coordinator.initialize_indicators();

    let running = Arc::new(AtomicBool::new(true));
    ButtonPoller::new(
        gpio,
        Arc::clone(&ctx.coordinator),
        &hardware,
        Duration::from_millis(controller.button_cooldown_ms),
    )
    .spawn(
        Duration::from_millis(controller.button_poll_ms),
        Arc::clone(&running),
    )
    .context("failed to start button poll thread")?;
    spawn_schedule_check(
        Arc::clone(&ctx.coordinator),
        Duration::from_millis(controller.schedule_check_ms),
        Arc::clone(&running),
    )
    .context("failed to start schedule check thread")?;

    let web_root = format!("{}/web", env!("CARGO_MANIFEST_DIR"));
    let app = router(ctx.clone()).fallback_service(ServeDir::new(web_root));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    running.store(false, Ordering::Relaxed);
    ctx.coordinator.shutdown();
    info!("controller stopped");
    Ok(())
}

fn router(ctx: SwitchContext) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/wifi", post(handle_set_wifi))
        .route(
            "/api/auto-off",
            get(handle_get_auto_off).put(handle_put_auto_off),
        )
        .route(
            "/api/schedule",
            get(handle_get_schedule).post(handle_post_schedule),
        )
        .route(
            "/api/schedule/{id}",
            put(handle_put_schedule_entry).delete(handle_delete_schedule_entry),
        )
        .route("/api/leds", get(handle_get_leds))
        .route("/api/leds/{led}", put(handle_put_led))
        .route("/api/activity", get(handle_get_activity))
        .route("/api/events", get(ws::handle_events))
        .with_state(ctx)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown requested");
}

async fn handle_get_status(State(ctx): State<SwitchContext>) -> axum::response::Response {
    match blocking(move || ctx.coordinator.status()).await {
        Ok(status) => Json(status).into_response(),
        Err(response) => response,
    }
}

async fn handle_set_wifi(
    State(ctx): State<SwitchContext>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(desired) = parse_on_off(value) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid value. Use 'on' or 'off'");
    };

    let result = blocking(move || {
        let changed = ctx
            .coordinator
            .request_transition(desired, TransitionSource::Dashboard);
        WifiResponse {
            changed,
            status: ctx.coordinator.status(),
        }
    })
    .await;

    match result {
        Ok(body) => Json(body).into_response(),
        Err(response) => response,
    }
}

async fn handle_get_auto_off(State(ctx): State<SwitchContext>) -> axum::response::Response {
    match blocking(move || ctx.coordinator.auto_off_status()).await {
        Ok(status) => Json(status).into_response(),
        Err(response) => response,
    }
}

async fn handle_put_auto_off(
    State(ctx): State<SwitchContext>,
    Json(update): Json<AutoOffUpdate>,
) -> axum::response::Response {
    let result = blocking(move || {
        ctx.coordinator
            .update_auto_off(update.enabled, update.duration_minutes)
            .map(|_| ctx.coordinator.auto_off_status())
    })
    .await;

    match result {
        Ok(Ok(status)) => Json(status).into_response(),
        Ok(Err(err)) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
        Err(response) => response,
    }
}

async fn handle_get_schedule(State(ctx): State<SwitchContext>) -> axum::response::Response {
    match blocking(move || ctx.scheduler.list()).await {
        Ok(entries) => Json(entries).into_response(),
        Err(response) => response,
    }
}

async fn handle_post_schedule(
    State(ctx): State<SwitchContext>,
    Json(draft): Json<ScheduleDraft>,
) -> axum::response::Response {
    let result = blocking(move || {
        let entry = ctx.scheduler.add(draft)?;
        ctx.coordinator.refresh_schedule_indicator(local_now());
        Ok::<_, ScheduleError>(entry)
    })
    .await;

    match result {
        Ok(Ok(entry)) => (StatusCode::CREATED, Json(entry)).into_response(),
        Ok(Err(err)) => schedule_error_response(err),
        Err(response) => response,
    }
}

async fn handle_put_schedule_entry(
    State(ctx): State<SwitchContext>,
    Path(id): Path<u32>,
    Json(update): Json<ScheduleUpdate>,
) -> axum::response::Response {
    let result = blocking(move || {
        if !ctx.scheduler.update(id, &update)? {
            return Ok(None);
        }
        ctx.coordinator.refresh_schedule_indicator(local_now());
        Ok::<_, ScheduleError>(ctx.scheduler.list().into_iter().find(|entry| entry.id == id))
    })
    .await;

    match result {
        Ok(Ok(Some(entry))) => Json(entry).into_response(),
        Ok(Ok(None)) => error_response(StatusCode::NOT_FOUND, "Schedule entry not found"),
        Ok(Err(err)) => schedule_error_response(err),
        Err(response) => response,
    }
}

async fn handle_delete_schedule_entry(
    State(ctx): State<SwitchContext>,
    Path(id): Path<u32>,
) -> axum::response::Response {
    let result = blocking(move || {
        let removed = ctx.scheduler.remove(id)?;
        if removed {
            ctx.coordinator.refresh_schedule_indicator(local_now());
        }
        Ok::<_, ScheduleError>(removed)
    })
    .await;

    match result {
        Ok(Ok(true)) => StatusCode::NO_CONTENT.into_response(),
        Ok(Ok(false)) => error_response(StatusCode::NOT_FOUND, "Schedule entry not found"),
        Ok(Err(err)) => schedule_error_response(err),
        Err(response) => response,
    }
}

async fn handle_get_leds(State(ctx): State<SwitchContext>) -> axum::response::Response {
    match blocking(move || ctx.coordinator.led_status()).await {
        Ok(leds) => Json(leds).into_response(),
        Err(response) => response,
    }
}

async fn handle_put_led(
    State(ctx): State<SwitchContext>,
    Path(led): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some(led) = LedId::parse(&led) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Unknown LED. Use 'status', 'always_on' or 'scheduled'",
        );
    };
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(percent) = value.trim().parse::<u16>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid brightness value");
    };

    let result = blocking(move || {
        ctx.coordinator
            .set_led_brightness(led, percent)
            .map(|()| ctx.coordinator.led_status())
    })
    .await;

    match result {
        Ok(Ok(leds)) => Json(leds).into_response(),
        Ok(Err(err)) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
        Err(response) => response,
    }
}

async fn handle_get_activity(State(ctx): State<SwitchContext>) -> axum::response::Response {
    match blocking(move || ctx.activity.history()).await {
        Ok(entries) => Json(entries).into_response(),
        Err(response) => response,
    }
}

/// Runs coordinator work off the async executor threads.
async fn blocking<T, F>(work: F) -> Result<T, axum::response::Response>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        warn!("blocking request task failed: {err}");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
    })
}

fn schedule_error_response(err: ScheduleError) -> axum::response::Response {
    match err {
        ScheduleError::Invalid(err) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
        ScheduleError::Persistence(err) => {
            warn!("failed to persist schedule: {err:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to persist schedule")
        }
    }
}

fn parse_on_off(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    let parsed = parse_on_off(&value).or(match value.trim().to_ascii_lowercase().as_str() {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    });
    if parsed.is_none() {
        warn!("ignoring {name}={value:?}, expected a boolean");
    }
    parsed
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
