//! Integration tests for the web API.
//!
//! These tests drive the router directly with `oneshot`; no socket is bound.

#![cfg(feature = "web")]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use rs_trainlink::adapter::{HardwareAdapter, HardwareDevice};
use rs_trainlink::config::WebConfig;
use rs_trainlink::hal::{DriverCall, MockDriver, RecordingBroadcaster};
use rs_trainlink::layout::{Destination, MapPoint, Turnout, TurnoutLink};
use rs_trainlink::services::{build_router, ApiResponse};
use rs_trainlink::storage::MemoryStore;
use rs_trainlink::traits::ClientBroadcast;
use rs_trainlink::{Direction, LocoIdentifier, SyncLevel, TrainSystem, TurnoutState};

fn create_test_app() -> (axum::Router, Arc<TrainSystem>, MockDriver) {
    let store = MemoryStore::new()
        .with_node(MapPoint::Destination(Destination::new(1, "Yard")))
        .with_node(MapPoint::Destination(Destination::new(2, "Platform")))
        .with_node(MapPoint::Destination(Destination::new(3, "Shed")))
        .with_node(MapPoint::Turnout(Turnout::new(10, "Throat", 101, 102)))
        .with_link(TurnoutLink::new(100, 5, 1, 10))
        .with_link(TurnoutLink::new(101, 5, 10, 2))
        .with_link(TurnoutLink::new(102, 5, 10, 3))
        .with_loco("Flyer", 3);
    let driver = MockDriver::new();
    let broadcaster: Arc<dyn ClientBroadcast> = Arc::new(RecordingBroadcaster::new());
    let adapter = Arc::new(HardwareAdapter::with_driver(
        Arc::new(driver.clone()),
        HardwareDevice::virtual_device(),
        Arc::clone(&broadcaster),
    ));
    let system = Arc::new(
        TrainSystem::assemble(Arc::new(store), adapter, broadcaster, SyncLevel::All).unwrap(),
    );
    let router = build_router(Arc::clone(&system), &WebConfig::default());
    (router, system, driver)
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<&str>,
) -> (StatusCode, ApiResponse<Value>) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("Content-Type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

// ===== State Tests =====

#[tokio::test]
async fn test_get_state() {
    let (app, _system, _) = create_test_app();
    let (status, json) = send(&app, "GET", "/api/state", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(json.success);
    let data = json.data.unwrap();
    assert_eq!(data["trackPower"], false);
    assert_eq!(data["hardware"]["driver"], "Mock");
    assert_eq!(data["locos"][0]["name"], "Flyer");
    assert_eq!(data["running"], Value::Array(vec![]));
}

#[tokio::test]
async fn test_get_layout() {
    let (app, _system, _) = create_test_app();
    let (status, json) = send(&app, "GET", "/api/layout", None).await;

    assert_eq!(status, StatusCode::OK);
    let data = json.data.unwrap();
    assert_eq!(data["turnouts"].as_array().unwrap().len(), 1);
    assert_eq!(data["destinations"].as_array().unwrap().len(), 3);
    assert_eq!(data["links"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let (app, _system, _) = create_test_app();
    let (status, json) = send(&app, "GET", "/api/nothing-here", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!json.success);
    assert_eq!(json.error.as_deref(), Some("Not found"));
}

// ===== Layout Tests =====

#[tokio::test]
async fn test_set_turnout() {
    let (app, system, driver) = create_test_app();
    let (status, _) = send(&app, "POST", "/api/turnouts/10", Some(r#"{"state": "thrown"}"#)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(system.turnouts().turnout_state(10), Some(TurnoutState::Thrown));
    assert_eq!(driver.turnout_calls(), vec![(10, TurnoutState::Thrown)]);

    let (status, _) = send(&app, "POST", "/api/turnouts/77", Some(r#"{"state": "closed"}"#)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_set_list_and_clear_route() {
    let (app, system, _) = create_test_app();

    let (status, json) = send(&app, "POST", "/api/routes", Some(r#"{"start": 1, "end": 3}"#)).await;
    assert_eq!(status, StatusCode::OK);
    let data = json.data.unwrap();
    assert_eq!(data["id"], 1);
    assert_eq!(data["route"]["end"]["name"], "Shed");
    assert_eq!(system.turnouts().turnout_state(10), Some(TurnoutState::Thrown));

    let (_, json) = send(&app, "GET", "/api/routes", None).await;
    assert_eq!(json.data.unwrap().as_array().unwrap().len(), 1);

    let (status, _) = send(&app, "DELETE", "/api/routes/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(system.turnouts().active_routes().is_empty());

    let (status, _) = send(&app, "DELETE", "/api/routes/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_route_errors() {
    let (app, _system, _) = create_test_app();

    let (status, json) = send(&app, "POST", "/api/routes", Some(r#"{"start": 1, "end": 1}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!json.success);
    assert!(json.error.is_some());

    let (status, _) = send(&app, "POST", "/api/routes", Some(r#"{"start": 1, "end": 40}"#)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_move_node() {
    let (app, system, _) = create_test_app();
    let (status, _) = send(
        &app,
        "POST",
        "/api/nodes/2/coordinate",
        Some(r#"{"x": 4.5, "y": -2.0}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let platform = system.turnouts().destination(2).unwrap();
    assert_eq!((platform.coordinate.x, platform.coordinate.y), (4.5, -2.0));
}

// ===== Loco Tests =====

#[tokio::test]
async fn test_add_edit_and_delete_loco() {
    let (app, system, _) = create_test_app();

    let (status, json) = send(
        &app,
        "POST",
        "/api/locos",
        Some(r#"{"name": "Pug", "address": 12}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.data.unwrap()["address"], 12);

    let (status, _) = send(
        &app,
        "POST",
        "/api/locos",
        Some(r#"{"name": "Pug", "address": 13}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(&app, "PUT", "/api/locos/Pug", Some(r#"{"address": 14}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.data.unwrap()["name"], "Pug");

    let (status, _) = send(&app, "DELETE", "/api/locos/14", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(system.locos().len(), 1);

    let (status, _) = send(&app, "DELETE", "/api/locos/14", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_throttle() {
    let (app, system, driver) = create_test_app();

    let (status, _) = send(
        &app,
        "POST",
        "/api/throttle/Flyer/direction",
        Some(r#"{"direction": "forward"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "POST", "/api/throttle/3/speed", Some(r#"{"speed": 45}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        driver.calls().last(),
        Some(&DriverCall::SetSpeed {
            address: 3,
            speed: 45,
            direction: Direction::Forward
        })
    );

    let (status, json) = send(&app, "POST", "/api/throttle/3/toggle", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.data.unwrap(), "reverse");

    let loco = system.locos().loco(&LocoIdentifier::Address(3)).unwrap();
    assert_eq!((loco.speed, loco.direction), (45, Direction::Reverse));
}

#[tokio::test]
async fn test_throttle_errors() {
    let (app, _system, _) = create_test_app();

    let (status, _) = send(
        &app,
        "POST",
        "/api/throttle/3/function",
        Some(r#"{"function": 29, "state": true}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", "/api/throttle/Nobody/speed", Some(r#"{"speed": 5}"#)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_track_power() {
    let (app, system, driver) = create_test_app();
    let (status, json) = send(&app, "POST", "/api/power", Some(r#"{"state": true}"#)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.data.unwrap(), true);
    assert!(system.track_power());
    assert_eq!(driver.calls(), vec![DriverCall::TrackPower(true)]);
}

// ===== Automation Tests =====

#[tokio::test]
async fn test_upload_and_list_scripts() {
    let (app, _system, _) = create_test_app();

    let (status, json) = send(
        &app,
        "POST",
        "/api/automations",
        Some(r#"{"script": "SEQUENCE(1, Shunt) FWD(10) DONE ONCLOSE(10) DONE"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.data.unwrap()["ids"], serde_json::json!([1, -21]));

    let (_, json) = send(&app, "GET", "/api/automations", None).await;
    let list = json.data.unwrap();
    assert_eq!(list.as_array().unwrap().len(), 2);
    let shunt = list
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["id"] == 1)
        .unwrap()
        .clone();
    assert_eq!(shunt["name"], "Shunt");
    assert_eq!(shunt["type"], "sequence");
    assert_eq!(shunt["description"], "Add a description");

    let (status, _) = send(
        &app,
        "PUT",
        "/api/automations/1/description",
        Some(r#"{"description": "Yard shunt"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "DELETE", "/api/automations/-21", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "DELETE", "/api/automations/-21", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_error_is_reported() {
    let (app, system, _) = create_test_app();
    let (status, json) = send(
        &app,
        "POST",
        "/api/automations",
        Some(r#"{"script": "SEQUENCE(1) FWD(fast) DONE"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json.error.unwrap().contains("Incorrect data type"));
    assert!(system.runtime().all_automations().is_empty());
}

#[tokio::test]
async fn test_run_pause_and_stop() {
    let (app, system, _) = create_test_app();
    system
        .runtime()
        .add_script_file("SEQUENCE(7) FWD(20) DELAY(60000) DONE")
        .unwrap();

    let (status, json) = send(
        &app,
        "POST",
        "/api/automations/7/run",
        Some(r#"{"loco": "Flyer"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.data.unwrap(), "7#0");

    let (_, json) = send(&app, "GET", "/api/running", None).await;
    let running = json.data.unwrap();
    assert_eq!(running[0]["pid"], "7#0");
    assert_eq!(running[0]["locoAddress"], 3);

    let (status, _) = send(&app, "POST", "/api/running/7%230/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = send(&app, "GET", "/api/running", None).await;
    assert_eq!(json.data.unwrap()[0]["status"], "paused");

    let (status, _) = send(&app, "POST", "/api/running/7%230/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(system.runtime().running_automations().is_empty());

    let (status, _) = send(&app, "POST", "/api/running/7%230/resume", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_run_errors() {
    let (app, system, _) = create_test_app();
    system.runtime().add_script_file("ROUTE(2) DONE").unwrap();

    let (status, json) = send(&app, "POST", "/api/automations/2/run", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.data.unwrap(), "2#0");

    let (status, _) = send(&app, "POST", "/api/automations/99/run", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", "/api/running/not-a-pid/stop", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ===== Hardware Tests =====

#[tokio::test]
async fn test_get_hardware() {
    let (app, _system, _) = create_test_app();
    let (status, json) = send(&app, "GET", "/api/hardware", None).await;

    assert_eq!(status, StatusCode::OK);
    let data = json.data.unwrap();
    assert_eq!(data["drivers"], serde_json::json!(["Virtual", "DCC-EX"]));
    assert_eq!(data["devices"][0]["name"], "Virtual Device");
    assert_eq!(data["active"]["status"], "available");
}

#[tokio::test]
async fn test_select_virtual_driver() {
    let (app, system, driver) = create_test_app();
    let (status, _) = send(
        &app,
        "POST",
        "/api/hardware/driver",
        Some(r#"{"driver": "Virtual"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(driver.calls(), vec![DriverCall::Close]);
    // The new driver comes up in the background.
    for _ in 0..100 {
        if system.adapter().snapshot().driver == "Virtual" {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(system.adapter().snapshot().driver, "Virtual");
}
