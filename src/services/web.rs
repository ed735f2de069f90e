//! Axum-based HTTP server for the controller's user actions.
//!
//! Every endpoint answers with the [`ApiResponse`] envelope. Failures carry
//! the error text in `error` and use `404` for unknown ids, `503` when the
//! hardware refuses track power, `500` for storage failures and `400` for
//! everything else. Broadcast events are not part of this surface; they go through
//! whatever [`ClientBroadcast`](crate::traits::ClientBroadcast) the
//! [`TrainSystem`] was built with.
//!
//! | Method | Path | Action |
//! |--------|------|--------|
//! | GET | `/api/state` | Hardware, power, locos, running automations |
//! | GET | `/api/layout` | Turnouts, destinations, links, locked components |
//! | POST | `/api/turnouts/:id` | Set a turnout |
//! | GET/POST | `/api/routes` | List / set routes |
//! | DELETE | `/api/routes/:id` | Release a route |
//! | POST | `/api/nodes/:id/coordinate` | Move a node on the diagram |
//! | GET/POST | `/api/locos` | List / add locos |
//! | PUT/DELETE | `/api/locos/:loco` | Edit / delete a loco |
//! | POST | `/api/throttle/:loco/{speed,direction,toggle,function}` | Drive a loco |
//! | POST | `/api/power` | Track power |
//! | GET/POST | `/api/automations` | Catalog / upload a script file |
//! | DELETE | `/api/automations/:id` | Delete a script |
//! | PUT | `/api/automations/:id/description` | Describe a script |
//! | POST | `/api/automations/:id/run` | Start a script |
//! | GET | `/api/running` | Live automations |
//! | POST | `/api/running/:pid/{pause,resume,stop}` | Control a run (`#` as `%23`) |
//! | GET | `/api/hardware` | Active device, drivers, devices |
//! | POST | `/api/hardware/{driver,device}` | Switch hardware |

use std::fmt::Display;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::adapter::{HardwareAdapter, HardwareDevice};
use crate::allocator::Pid;
use crate::automation::{AutomationSummary, RunningAutomation, RuntimeError};
use crate::config::WebConfig;
use crate::layout::{Coordinate, InitialLayoutState, NodeId, RouteError, RouteId};
use crate::locos::{Loco, LocoError, LocoIdentifier};
use crate::system::TrainSystem;
use crate::traits::Direction;

use super::api::{
    AddLocoRequest, ApiResponse, DescriptionRequest, EditLocoRequest, HardwareResponse,
    RouteResponse, RunRequest, SelectDriverRequest, SetDirectionRequest, SetFunctionRequest,
    SetPowerRequest, SetRouteRequest, SetSpeedRequest, SetTurnoutRequest, StateResponse,
    UploadRequest, UploadResponse,
};

type AppState = State<Arc<TrainSystem>>;
type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn ok<T>(data: T) -> Reply<T> {
    (StatusCode::OK, Json(ApiResponse::ok(data)))
}

fn fail<T>(status: StatusCode, err: impl Display) -> Reply<T> {
    (status, Json(ApiResponse::err(err.to_string())))
}

fn loco_status(err: &LocoError) -> StatusCode {
    match err {
        LocoError::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn route_status(err: &RouteError) -> StatusCode {
    match err {
        RouteError::UnknownNode(_) | RouteError::UnknownTurnout(_) | RouteError::UnknownRoute(_) => {
            StatusCode::NOT_FOUND
        }
        RouteError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn runtime_status(err: &RuntimeError) -> StatusCode {
    match err {
        RuntimeError::ScriptNotFound(_) | RuntimeError::PidNotFound(_) => StatusCode::NOT_FOUND,
        RuntimeError::Loco(err) => loco_status(err),
        RuntimeError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        RuntimeError::Automation(_) => StatusCode::BAD_REQUEST,
    }
}

fn loco_result<T>(result: Result<T, LocoError>) -> Reply<T> {
    match result {
        Ok(data) => ok(data),
        Err(err) => fail(loco_status(&err), err),
    }
}

fn route_result<T>(result: Result<T, RouteError>) -> Reply<T> {
    match result {
        Ok(data) => ok(data),
        Err(err) => fail(route_status(&err), err),
    }
}

fn runtime_result<T>(result: Result<T, RuntimeError>) -> Reply<T> {
    match result {
        Ok(data) => ok(data),
        Err(err) => fail(runtime_status(&err), err),
    }
}

// ============================================================================
// State / Layout Handlers
// ============================================================================

/// GET /api/state
async fn get_state(State(system): AppState) -> Reply<StateResponse> {
    ok(StateResponse {
        hardware: system.adapter().snapshot(),
        track_power: system.track_power(),
        locos: system.locos().all(),
        running: system.runtime().running_automations(),
    })
}

/// GET /api/layout
async fn get_layout(State(system): AppState) -> Reply<InitialLayoutState> {
    ok(system.turnouts().initial_state())
}

/// POST /api/turnouts/:id
async fn set_turnout(
    State(system): AppState,
    Path(id): Path<NodeId>,
    Json(req): Json<SetTurnoutRequest>,
) -> Reply<()> {
    route_result(system.turnouts().set_turnout(id, req.state).await)
}

/// GET /api/routes
async fn list_routes(State(system): AppState) -> Reply<Vec<RouteResponse>> {
    ok(system
        .turnouts()
        .active_routes()
        .into_iter()
        .map(|(id, route)| RouteResponse { id, route })
        .collect())
}

/// POST /api/routes
async fn set_route(
    State(system): AppState,
    Json(req): Json<SetRouteRequest>,
) -> Reply<RouteResponse> {
    route_result(
        system
            .turnouts()
            .set_route(req.start, req.end)
            .await
            .map(|(id, route)| RouteResponse { id, route }),
    )
}

/// DELETE /api/routes/:id
async fn clear_route(State(system): AppState, Path(id): Path<RouteId>) -> Reply<()> {
    route_result(system.turnouts().clear_route(id).map(|_| ()))
}

/// POST /api/nodes/:id/coordinate
async fn move_node(
    State(system): AppState,
    Path(id): Path<NodeId>,
    Json(coordinate): Json<Coordinate>,
) -> Reply<()> {
    route_result(system.turnouts().update_coordinate(id, coordinate))
}

// ============================================================================
// Loco / Throttle Handlers
// ============================================================================

/// GET /api/locos
async fn list_locos(State(system): AppState) -> Reply<Vec<Loco>> {
    ok(system.locos().all())
}

/// POST /api/locos
async fn add_loco(State(system): AppState, Json(req): Json<AddLocoRequest>) -> Reply<Loco> {
    loco_result(system.locos().add(&req.name, req.address))
}

/// PUT /api/locos/:loco
async fn edit_loco(
    State(system): AppState,
    Path(loco): Path<String>,
    Json(req): Json<EditLocoRequest>,
) -> Reply<Loco> {
    let identifier = LocoIdentifier::from_text(&loco);
    loco_result(
        system
            .locos()
            .update(&identifier, req.name.as_deref(), req.address),
    )
}

/// DELETE /api/locos/:loco
async fn delete_loco(State(system): AppState, Path(loco): Path<String>) -> Reply<Loco> {
    loco_result(system.locos().delete(&LocoIdentifier::from_text(&loco)))
}

/// POST /api/throttle/:loco/speed
async fn set_speed(
    State(system): AppState,
    Path(loco): Path<String>,
    Json(req): Json<SetSpeedRequest>,
) -> Reply<()> {
    loco_result(
        system
            .set_speed(&LocoIdentifier::from_text(&loco), req.speed)
            .await,
    )
}

/// POST /api/throttle/:loco/direction
async fn set_direction(
    State(system): AppState,
    Path(loco): Path<String>,
    Json(req): Json<SetDirectionRequest>,
) -> Reply<()> {
    loco_result(
        system
            .set_direction(&LocoIdentifier::from_text(&loco), req.direction)
            .await,
    )
}

/// POST /api/throttle/:loco/toggle
async fn toggle_direction(State(system): AppState, Path(loco): Path<String>) -> Reply<Direction> {
    loco_result(
        system
            .toggle_direction(&LocoIdentifier::from_text(&loco))
            .await,
    )
}

/// POST /api/throttle/:loco/function
async fn set_function(
    State(system): AppState,
    Path(loco): Path<String>,
    Json(req): Json<SetFunctionRequest>,
) -> Reply<()> {
    loco_result(
        system
            .set_function(&LocoIdentifier::from_text(&loco), req.function, req.state)
            .await,
    )
}

/// POST /api/power
async fn set_power(State(system): AppState, Json(req): Json<SetPowerRequest>) -> Reply<bool> {
    match system.set_track_power(req.state).await {
        Ok(()) => ok(req.state),
        Err(err) => fail(StatusCode::SERVICE_UNAVAILABLE, err),
    }
}

// ============================================================================
// Automation Handlers
// ============================================================================

/// GET /api/automations
async fn list_automations(State(system): AppState) -> Reply<Vec<AutomationSummary>> {
    ok(system.runtime().all_automations())
}

/// POST /api/automations
async fn upload_script(
    State(system): AppState,
    Json(req): Json<UploadRequest>,
) -> Reply<UploadResponse> {
    runtime_result(
        system
            .runtime()
            .add_script_file(&req.script)
            .map(|ids| UploadResponse { ids }),
    )
}

/// DELETE /api/automations/:id
async fn delete_automation(State(system): AppState, Path(id): Path<i64>) -> Reply<()> {
    runtime_result(system.runtime().delete_automation(id))
}

/// PUT /api/automations/:id/description
async fn describe_automation(
    State(system): AppState,
    Path(id): Path<i64>,
    Json(req): Json<DescriptionRequest>,
) -> Reply<()> {
    runtime_result(system.runtime().set_description(id, &req.description))
}

/// POST /api/automations/:id/run
async fn run_automation(
    State(system): AppState,
    Path(id): Path<i64>,
    body: Option<Json<RunRequest>>,
) -> Reply<Pid> {
    let loco = body.and_then(|Json(req)| req.loco);
    runtime_result(system.runtime().run_script(id, loco))
}

/// GET /api/running
async fn list_running(State(system): AppState) -> Reply<Vec<RunningAutomation>> {
    ok(system.runtime().running_automations())
}

fn parse_pid<T>(text: &str) -> Result<Pid, Reply<T>> {
    text.parse::<Pid>()
        .map_err(|err| fail(StatusCode::BAD_REQUEST, err))
}

/// POST /api/running/:pid/pause
async fn pause_automation(State(system): AppState, Path(pid): Path<String>) -> Reply<()> {
    let pid = match parse_pid(&pid) {
        Ok(pid) => pid,
        Err(reply) => return reply,
    };
    runtime_result(system.runtime().pause_automation(pid).await)
}

/// POST /api/running/:pid/resume
async fn resume_automation(State(system): AppState, Path(pid): Path<String>) -> Reply<()> {
    let pid = match parse_pid(&pid) {
        Ok(pid) => pid,
        Err(reply) => return reply,
    };
    runtime_result(system.runtime().resume_automation(pid))
}

/// POST /api/running/:pid/stop
async fn stop_automation(State(system): AppState, Path(pid): Path<String>) -> Reply<()> {
    let pid = match parse_pid(&pid) {
        Ok(pid) => pid,
        Err(reply) => return reply,
    };
    runtime_result(system.runtime().stop_automation(pid).await)
}

// ============================================================================
// Hardware Handlers
// ============================================================================

fn hardware_response(system: &TrainSystem) -> HardwareResponse {
    HardwareResponse {
        active: system.adapter().snapshot(),
        drivers: HardwareAdapter::available_drivers()
            .iter()
            .map(|name| name.to_string())
            .collect(),
        devices: system.adapter().available_devices(),
    }
}

/// GET /api/hardware
async fn get_hardware(State(system): AppState) -> Reply<HardwareResponse> {
    ok(hardware_response(&system))
}

/// POST /api/hardware/driver
async fn select_driver(
    State(system): AppState,
    Json(req): Json<SelectDriverRequest>,
) -> Reply<HardwareResponse> {
    system
        .adapter()
        .select_driver(&req.driver, req.address.as_deref())
        .await;
    ok(hardware_response(&system))
}

/// POST /api/hardware/device
async fn select_device(
    State(system): AppState,
    Json(device): Json<HardwareDevice>,
) -> Reply<HardwareResponse> {
    system.adapter().select_device(device).await;
    ok(hardware_response(&system))
}

/// Fallback handler for 404
async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::err("Not found")),
    )
}

// ============================================================================
// Server Builder
// ============================================================================

/// Build the Axum router with all routes
pub fn build_router(system: Arc<TrainSystem>, config: &WebConfig) -> Router {
    let mut router = Router::new()
        .route("/api/state", get(get_state))
        .route("/api/layout", get(get_layout))
        .route("/api/turnouts/:id", post(set_turnout))
        .route("/api/routes", get(list_routes).post(set_route))
        .route("/api/routes/:id", delete(clear_route))
        .route("/api/nodes/:id/coordinate", post(move_node))
        .route("/api/locos", get(list_locos).post(add_loco))
        .route("/api/locos/:loco", put(edit_loco).delete(delete_loco))
        .route("/api/throttle/:loco/speed", post(set_speed))
        .route("/api/throttle/:loco/direction", post(set_direction))
        .route("/api/throttle/:loco/toggle", post(toggle_direction))
        .route("/api/throttle/:loco/function", post(set_function))
        .route("/api/power", post(set_power))
        .route("/api/automations", get(list_automations).post(upload_script))
        .route("/api/automations/:id", delete(delete_automation))
        .route("/api/automations/:id/description", put(describe_automation))
        .route("/api/automations/:id/run", post(run_automation))
        .route("/api/running", get(list_running))
        .route("/api/running/:pid/pause", post(pause_automation))
        .route("/api/running/:pid/resume", post(resume_automation))
        .route("/api/running/:pid/stop", post(stop_automation))
        .route("/api/hardware", get(get_hardware))
        .route("/api/hardware/driver", post(select_driver))
        .route("/api/hardware/device", post(select_device))
        .fallback(not_found)
        .with_state(system);

    // Add CORS if requested
    if config.cors_permissive {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

/// Start the web server
///
/// This function runs until the server is shut down.
pub async fn run_server(system: Arc<TrainSystem>, config: &WebConfig) -> std::io::Result<()> {
    let router = build_router(system, config);
    let address = config.socket_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(%address, "Web server listening");
    axum::serve(listener, router).await
}
