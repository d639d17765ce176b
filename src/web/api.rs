//! Defines the Axum API routes and handlers.
//!
//! Handlers only gate requests (control, configuration); every guard on the
//! motion itself lives in the windlass state machine.

use crate::communication::{Action, EventLog};
use crate::config::{AppConfig, BoatConfig, Config};
use crate::telemetry::TelemetryChannel;
use crate::web::control::{CallerId, ControlArbiter, register_caller};
use crate::web::models::{
    AnchorRequest, AnchorResponse, ControlResponse, QuitResponse, SettingsRequest, SettingsResponse, StatusResponse,
    TargetRequest, TargetResponse,
};
use crate::windlass::{Direction, Windlass, WindlassError};
use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct AppStateInner {
    pub windlass: Windlass,
    pub arbiter: ControlArbiter,
    pub telemetry: TelemetryChannel,
    pub app: RwLock<AppConfig>,
    pub events: EventLog,
}

pub type AppState = Arc<AppStateInner>;

type ApiResult<T> = Result<Json<T>, Response>;

/// Creates the Axum router with all the API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/control", post(take_control))
        .route("/api/v1/anchor/{action}", post(anchor_action))
        .route("/api/v1/target", post(set_target))
        .route("/api/v1/settings", post(update_settings))
        .route("/api/v1/stream", get(stream_actual))
        .route("/api/v1/quit", post(quit))
        .layer(middleware::from_fn_with_state(state.clone(), register_caller))
        .with_state(state)
}

fn json_error(message: impl Into<String>, status: StatusCode) -> Response {
    let body = Json(serde_json::json!({ "error": message.into() }));
    (status, body).into_response()
}

fn command_error(e: WindlassError) -> Response {
    match e {
        WindlassError::InvalidCommand(reason) => json_error(reason, StatusCode::CONFLICT),
        WindlassError::Hardware(e) => {
            tracing::error!("Hardware fault while handling command: {}", e);
            json_error(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn require_control(state: &AppState, caller: &CallerId) -> Result<(), Response> {
    if state.arbiter.has_control(&caller.0).await {
        Ok(())
    } else {
        tracing::debug!("Command from {} refused, not in control", caller.0);
        Err(json_error("Not in control", StatusCode::FORBIDDEN))
    }
}

fn retract_disabled() -> Response {
    let msg = "Anchor up is disabled (Config)";
    tracing::error!("{}", msg);
    json_error(msg, StatusCode::CONFLICT)
}

async fn get_status(State(state): State<AppState>, Extension(caller): Extension<CallerId>) -> Json<StatusResponse> {
    let windlass = &state.windlass;
    let in_control = state.arbiter.has_control(&caller.0).await;
    let completed = in_control && windlass.take_completion().await;
    Json(StatusResponse {
        status: windlass.status().await,
        message: windlass.status_message().await,
        in_control,
        completed,
        set_enabled: windlass.set_enabled().await,
        pause_enabled: windlass.pause_enabled().await,
        resume_enabled: windlass.resume_enabled().await,
    })
}

async fn take_control(State(state): State<AppState>, Extension(caller): Extension<CallerId>) -> Json<ControlResponse> {
    state.arbiter.take_control(&caller.0).await;
    tracing::info!("{} has taken control", caller.0);
    let status = state.windlass.status().await;
    state
        .events
        .record(Action::TakeControl, Some(&caller.0), status.target_length, status.actual_length);
    Json(ControlResponse {
        identity: caller.0,
        in_control: true,
    })
}

async fn anchor_action(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    Path(action): Path<String>,
    body: Bytes,
) -> ApiResult<AnchorResponse> {
    require_control(&state, &caller).await?;
    let request: AnchorRequest = if body.is_empty() {
        AnchorRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| json_error(e.to_string(), StatusCode::BAD_REQUEST))?
    };
    let app = state.app.read().await.clone();
    let meters = request.meters.unwrap_or(app.manual_range).min(app.max_manual_range);
    let windlass = &state.windlass;
    tracing::info!("Anchor action: {}", action);

    let (accepted, manual_target) = match action.as_str() {
        "down" => {
            let target = windlass.try_manual_extend(meters).await.map_err(command_error)?;
            (true, Some(target))
        }
        "up" => {
            if !app.allow_retract {
                return Err(retract_disabled());
            }
            let target = windlass.try_manual_retract(meters).await.map_err(command_error)?;
            (true, Some(target))
        }
        "pause" => (windlass.pause().await, None),
        "resume" => {
            if windlass.run_direction().await == Direction::Retracting && !app.allow_retract {
                return Err(retract_disabled());
            }
            if !windlass.resume_enabled().await {
                return Err(json_error("Nothing to resume", StatusCode::CONFLICT));
            }
            (windlass.resume().await, None)
        }
        other => {
            let msg = format!("Invalid anchor action: \"{}\"", other);
            tracing::error!("{}", msg);
            return Err(json_error(msg, StatusCode::BAD_REQUEST));
        }
    };
    let status = windlass.status().await;
    Ok(Json(AnchorResponse {
        action,
        accepted,
        manual_target,
        target_length: status.target_length,
        actual_length: status.actual_length,
    }))
}

async fn set_target(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    Json(request): Json<TargetRequest>,
) -> ApiResult<TargetResponse> {
    require_control(&state, &caller).await?;
    let windlass = &state.windlass;
    if windlass.status().await.running {
        return Err(json_error("Anchor is running, pause first", StatusCode::CONFLICT));
    }
    let (length, adjusted) = match (request.target_length, request.depth) {
        (Some(length), _) => (length, true),
        (None, Some(depth)) => {
            let min_remain = state.app.read().await.min_length_remain;
            (windlass.deploy_length(depth, request.use_safety, min_remain).await, false)
        }
        (None, None) => {
            return Err(json_error("Either target_length or depth is required", StatusCode::BAD_REQUEST));
        }
    };
    if !length.is_finite() || length < 0.0 {
        return Err(json_error(format!("Invalid target length {}", length), StatusCode::BAD_REQUEST));
    }
    let target_length = if adjusted {
        windlass.adjust_target_length(length).await
    } else {
        windlass.set_target_length(length).await
    };
    Ok(Json(TargetResponse { target_length }))
}

/// Boat parameters and operator limits. Boat parameters apply to a run in
/// progress from its next tick.
async fn update_settings(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    Json(request): Json<SettingsRequest>,
) -> ApiResult<SettingsResponse> {
    require_control(&state, &caller).await?;
    if let Some(value) = request.lengths().find(|v| !v.is_finite()) {
        return Err(json_error(format!("Invalid setting {}", value), StatusCode::BAD_REQUEST));
    }
    let windlass = &state.windlass;
    let mut app = state.app.write().await;
    let mut params = windlass.parameters().await;
    let mut next = app.clone();
    params.chain_length = request.chain_length.unwrap_or(params.chain_length);
    params.down_speed = request.down_speed.unwrap_or(params.down_speed);
    params.up_speed = request.up_speed.unwrap_or(params.up_speed);
    params.boat_length = request.boat_length.unwrap_or(params.boat_length);
    params.min_length_up = request.min_length_up.unwrap_or(params.min_length_up);
    next.min_length_up = params.min_length_up;
    next.manual_range = request.manual_range.unwrap_or(next.manual_range);
    next.allow_retract = request.allow_retract.unwrap_or(next.allow_retract);

    let candidate = Config {
        boat: BoatConfig {
            chain_length: params.chain_length,
            down_speed: params.down_speed,
            up_speed: params.up_speed,
            boat_length: params.boat_length,
            ..BoatConfig::default()
        },
        app: next.clone(),
        ..Config::default()
    };
    if let Err(e) = candidate.validate() {
        tracing::warn!("Settings from {} rejected: {}", caller.0, e);
        return Err(json_error(e.to_string(), StatusCode::BAD_REQUEST));
    }

    if request.changes_boat() {
        windlass.update_parameters(params).await;
    }
    let status = windlass.status().await;
    if next.manual_range != app.manual_range {
        tracing::info!("Manual range set to {}m", next.manual_range);
        state
            .events
            .record(Action::SetManualRange, Some(&caller.0), status.target_length, status.actual_length);
    }
    if next.allow_retract != app.allow_retract || next.min_length_up != app.min_length_up {
        tracing::info!(
            "Limits updated: allow_retract={} min_length_up={}m",
            next.allow_retract, next.min_length_up
        );
        state
            .events
            .record(Action::Config, Some(&caller.0), status.target_length, status.actual_length);
    }
    *app = next;

    Ok(Json(SettingsResponse {
        chain_length: params.chain_length,
        down_speed: params.down_speed,
        up_speed: params.up_speed,
        boat_length: params.boat_length,
        min_length_up: app.min_length_up,
        manual_range: app.manual_range,
        allow_retract: app.allow_retract,
    }))
}

async fn stream_actual(State(state): State<AppState>) -> impl IntoResponse {
    let readings = state
        .telemetry
        .subscribe()
        .map(|reading| Ok::<Event, Infallible>(Event::default().data(reading.to_event_data())));
    Sse::new(readings).keep_alive(KeepAlive::default())
}

/// Pause, zero the chain count when the anchor is (almost) up, and stop the
/// background listener.
async fn quit(State(state): State<AppState>, Extension(caller): Extension<CallerId>) -> ApiResult<QuitResponse> {
    require_control(&state, &caller).await?;
    let windlass = &state.windlass;
    windlass.pause().await;
    // The run loop stops within one tick of the pause.
    for _ in 0..10 {
        if !windlass.status().await.running {
            break;
        }
        tokio::time::sleep(windlass.tick()).await;
    }
    if windlass.anchor_is_almost_up().await {
        windlass.set_actual_length(0.0).await.map_err(command_error)?;
    }
    windlass.quit_listener().await;
    let status = windlass.status().await;
    Ok(Json(QuitResponse {
        quit: status.quit,
        actual_length: status.actual_length,
    }))
}
