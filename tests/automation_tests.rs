//! End-to-end script runs against an assembled system.
//!
//! Layout: Yard(1) ──100── T10 ──101── Platform(2)
//!                          \──102── T11 ──103── Goods(3)
//!                                    \──104── Shed(4)

use std::sync::Arc;
use std::time::Duration;

use rs_trainlink::adapter::{HardwareAdapter, HardwareDevice};
use rs_trainlink::automation::AutomationStatus;
use rs_trainlink::config::{Config, StorageConfig};
use rs_trainlink::hal::{DriverCall, MockDriver, RecordingBroadcaster};
use rs_trainlink::layout::{Destination, MapPoint, Turnout, TurnoutLink};
use rs_trainlink::storage::MemoryStore;
use rs_trainlink::traits::{ClientBroadcast, ClientEvent, NullBroadcast};
use rs_trainlink::{
    Direction, LocoIdentifier, RuntimeError, SyncLevel, TrainSystem, TurnoutState,
};

struct Harness {
    system: TrainSystem,
    driver: MockDriver,
    recorder: RecordingBroadcaster,
}

fn layout() -> MemoryStore {
    MemoryStore::new()
        .with_node(MapPoint::Destination(Destination::new(1, "Yard")))
        .with_node(MapPoint::Destination(Destination::new(2, "Platform")))
        .with_node(MapPoint::Destination(Destination::new(3, "Goods")))
        .with_node(MapPoint::Destination(Destination::new(4, "Shed")))
        .with_node(MapPoint::Turnout(Turnout::new(10, "Throat", 101, 102)))
        .with_node(MapPoint::Turnout(Turnout::new(11, "Goods lead", 103, 104)))
        .with_link(TurnoutLink::new(100, 5, 1, 10))
        .with_link(TurnoutLink::new(101, 5, 10, 2))
        .with_link(TurnoutLink::new(102, 5, 10, 11))
        .with_link(TurnoutLink::new(103, 5, 11, 3))
        .with_link(TurnoutLink::new(104, 5, 11, 4))
        .with_loco("Flyer", 3)
        .with_loco("Shunter", 7)
}

fn harness() -> Harness {
    let driver = MockDriver::new();
    let recorder = RecordingBroadcaster::new();
    let broadcaster: Arc<dyn ClientBroadcast> = Arc::new(recorder.clone());
    let adapter = Arc::new(HardwareAdapter::with_driver(
        Arc::new(driver.clone()),
        HardwareDevice::virtual_device(),
        Arc::clone(&broadcaster),
    ));
    let system = TrainSystem::assemble(Arc::new(layout()), adapter, broadcaster, SyncLevel::All)
        .unwrap();
    Harness {
        system,
        driver,
        recorder,
    }
}

fn speed_of(h: &Harness, address: u16) -> (u8, Direction) {
    let loco = h
        .system
        .locos()
        .loco(&LocoIdentifier::Address(address))
        .unwrap();
    (loco.speed, loco.direction)
}

// ===== Sequence Tests =====

#[tokio::test(start_paused = true)]
async fn shunting_sequence_moves_the_loco_and_the_points() {
    let h = harness();
    let runtime = h.system.runtime();
    runtime
        .add_script_file(
            "SEQUENCE(1, \"Shunt to the shed\")
                THROW(10)
                THROW(11)
                FWD(30)
                DELAY(2000)
                FON(0)
                STOP
            DONE",
        )
        .unwrap();

    runtime.run_script(1, Some("Flyer".into())).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(speed_of(&h, 3), (30, Direction::Forward));
    assert_eq!(h.system.turnouts().turnout_state(10), Some(TurnoutState::Thrown));
    assert_eq!(h.system.turnouts().turnout_state(11), Some(TurnoutState::Thrown));

    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(speed_of(&h, 3).0, 0);
    assert!(h
        .system
        .locos()
        .loco(&LocoIdentifier::Address(3))
        .unwrap()
        .function(0));
    assert!(h.driver.calls().contains(&DriverCall::Function {
        address: 3,
        function: 0,
        on: true
    }));
    assert!(runtime.running_automations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn conditions_follow_turnout_state() {
    let h = harness();
    let runtime = h.system.runtime();
    runtime
        .add_script_file(
            "AUTOMATION(4)
                IFTHROWN(10)
                    FWD(10)
                ENDIF
                IFCLOSED(10)
                    REV(20)
                ENDIF
            DONE",
        )
        .unwrap();

    runtime.run_script(4, Some(LocoIdentifier::Address(7))).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(speed_of(&h, 7), (20, Direction::Reverse));

    h.system
        .turnouts()
        .set_turnout(10, TurnoutState::Thrown)
        .await
        .unwrap();
    runtime.run_script(4, Some(LocoIdentifier::Address(7))).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(speed_of(&h, 7), (10, Direction::Forward));
}

#[tokio::test(start_paused = true)]
async fn condition_sees_the_turnout_the_script_just_threw() {
    let h = harness();
    let runtime = h.system.runtime();
    runtime
        .add_script_file(
            "AUTOMATION(2) THROW(10) IFTHROWN(10) FWD(80) DONE ENDIF DONE
            ONTHROW(10) FON(1) DONE",
        )
        .unwrap();

    runtime.run_script(2, Some(LocoIdentifier::Address(3))).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(speed_of(&h, 3), (80, Direction::Forward));
    assert_eq!(h.recorder.count("routes/turnoutUpdate"), 1);
    // The handler ran too, but without a loco.
    assert!(!h
        .system
        .locos()
        .loco(&LocoIdentifier::Address(3))
        .unwrap()
        .function(1));
    assert!(runtime.running_automations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn routes_ignore_the_loco_argument() {
    let h = harness();
    let runtime = h.system.runtime();
    runtime.add_script_file("ROUTE(9) THROW(10) DONE").unwrap();
    runtime.run_script(9, Some(LocoIdentifier::Address(3))).unwrap();
    assert_eq!(runtime.running_automations()[0].loco_address, None);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.system.turnouts().turnout_state(10), Some(TurnoutState::Thrown));
}

#[tokio::test(start_paused = true)]
async fn script_releases_a_route_it_cuts_through() {
    let h = harness();
    let turnouts = h.system.turnouts();
    turnouts.set_route(1, 4).await.unwrap();
    assert_eq!(turnouts.active_routes().len(), 1);

    h.system.runtime().add_script_file("ROUTE(2) CLOSE(11) DONE").unwrap();
    h.system.runtime().run_script(2, None).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(turnouts.active_routes().is_empty());
    assert_eq!(h.recorder.count("routes/unsetRouteComponents"), 1);
}

// ===== Pause Tests =====

#[tokio::test(start_paused = true)]
async fn paused_delay_resumes_with_the_remaining_time() {
    let h = harness();
    let runtime = h.system.runtime();
    runtime
        .add_script_file("SEQUENCE(1) FWD(30) DELAY(1000) REV(20) DONE")
        .unwrap();
    let pid = runtime.run_script(1, Some(LocoIdentifier::Address(3))).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    runtime.pause_automation(pid).await.unwrap();
    assert_eq!(speed_of(&h, 3), (0, Direction::Stopped));
    assert_eq!(
        h.driver.calls().last(),
        Some(&DriverCall::SetSpeed {
            address: 3,
            speed: 0,
            direction: Direction::Stopped
        })
    );

    // Nothing moves while paused, however long it lasts.
    tokio::time::sleep(Duration::from_millis(5000)).await;
    assert_eq!(speed_of(&h, 3), (0, Direction::Stopped));
    assert_eq!(runtime.running_automations()[0].status, AutomationStatus::Paused);

    runtime.resume_automation(pid).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(speed_of(&h, 3), (30, Direction::Forward));
    assert_eq!(runtime.running_automations()[0].status, AutomationStatus::Running);

    // About 700ms were left of the delay.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(speed_of(&h, 3), (30, Direction::Forward));
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(speed_of(&h, 3), (20, Direction::Reverse));
    assert!(runtime.running_automations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn pausing_twice_and_resuming_a_running_script_do_nothing() {
    let h = harness();
    let runtime = h.system.runtime();
    runtime
        .add_script_file("AUTOMATION(1) FWD(10) DELAY(1000) DONE")
        .unwrap();
    let pid = runtime.run_script(1, Some(LocoIdentifier::Address(3))).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    runtime.resume_automation(pid).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(runtime.running_automations()[0].status, AutomationStatus::Running);

    runtime.pause_automation(pid).await.unwrap();
    h.driver.clear();
    runtime.pause_automation(pid).await.unwrap();
    assert!(h.driver.calls().is_empty());
    assert_eq!(runtime.running_automations()[0].status, AutomationStatus::Paused);
}

#[tokio::test(start_paused = true)]
async fn stopping_a_paused_run_ends_it() {
    let h = harness();
    let runtime = h.system.runtime();
    runtime
        .add_script_file("SEQUENCE(1) FWD(30) DELAY(1000) FWD(90) DONE")
        .unwrap();
    let pid = runtime.run_script(1, Some(LocoIdentifier::Address(3))).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    runtime.pause_automation(pid).await.unwrap();

    runtime.stop_automation(pid).await.unwrap();
    assert!(runtime.running_automations().is_empty());
    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert_eq!(speed_of(&h, 3), (0, Direction::Stopped));
    assert!(matches!(
        runtime.resume_automation(pid),
        Err(RuntimeError::PidNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn stopping_a_moving_run_stops_the_loco_on_the_track() {
    let h = harness();
    let runtime = h.system.runtime();
    runtime
        .add_script_file("SEQUENCE(1) FWD(30) DELAY(5000) FWD(90) DONE")
        .unwrap();
    let pid = runtime.run_script(1, Some(LocoIdentifier::Address(3))).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(speed_of(&h, 3), (30, Direction::Forward));
    h.driver.clear();

    runtime.stop_automation(pid).await.unwrap();
    assert!(runtime.running_automations().is_empty());
    assert_eq!(speed_of(&h, 3), (0, Direction::Stopped));
    assert!(h.driver.calls().contains(&DriverCall::SetSpeed {
        address: 3,
        speed: 0,
        direction: Direction::Stopped
    }));

    // The DELAY runs out but nothing after it is sent.
    tokio::time::sleep(Duration::from_millis(6000)).await;
    assert!(!h
        .driver
        .calls()
        .iter()
        .any(|call| matches!(call, DriverCall::SetSpeed { speed: 90, .. })));
    assert_eq!(speed_of(&h, 3), (0, Direction::Stopped));
}

// ===== Event Tests =====

#[tokio::test(start_paused = true)]
async fn throwing_the_throat_sets_the_goods_lead() {
    let h = harness();
    let runtime = h.system.runtime();
    runtime
        .add_script_file(
            "ONTHROW(10)
                THROW(11)
            DONE
            ROUTE(5)
                THROW(10)
            DONE",
        )
        .unwrap();

    runtime.run_script(5, None).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.system.turnouts().turnout_state(11), Some(TurnoutState::Thrown));
    assert!(runtime.running_automations().is_empty());
    let calls = h.driver.turnout_calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.contains(&(10, TurnoutState::Thrown)));
    assert!(calls.contains(&(11, TurnoutState::Thrown)));
}

#[tokio::test(start_paused = true)]
async fn route_setting_fires_handlers_for_changed_turnouts_only() {
    let h = harness();
    let runtime = h.system.runtime();
    runtime
        .add_script_file("ONTHROW(11) DELAY(1000) DONE ONTHROW(10) DELAY(1000) DONE")
        .unwrap();

    h.system.turnouts().set_route(1, 3).await.unwrap();
    let running = runtime.running_automations();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].pid.to_string(), "-1#0");
    assert_eq!(running[0].name, "ONTHROW 10");
}

// ===== Catalog Tests =====

#[tokio::test]
async fn uploads_replace_scripts_and_report_errors() {
    let h = harness();
    let runtime = h.system.runtime();
    runtime.add_script_file("SEQUENCE(1, First) STOP DONE").unwrap();
    runtime.add_script_file("SEQUENCE(1, Second) STOP DONE").unwrap();
    assert_eq!(runtime.all_automations().len(), 1);
    assert_eq!(runtime.script(1).unwrap().name, "Second");
    assert_eq!(h.recorder.count("automation/fetchAllResponse"), 2);

    let err = runtime.add_script_file("SEQUENCE(2) FWD(10)").unwrap_err();
    assert!(matches!(err, RuntimeError::Automation(_)));
    assert!(runtime.script(2).is_none());
    match h.recorder.last("automation/processingError") {
        Some(ClientEvent::ProcessingError(_)) => {}
        other => panic!("expected processing error, got {:?}", other),
    }
}

#[tokio::test]
async fn scripts_survive_a_restart() {
    let path = std::env::temp_dir().join(format!("trainlink-scripts-{}.json", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let config = Config::default().with_storage(StorageConfig::default().with_path(&path));

    {
        let system = TrainSystem::from_config(&config, Arc::new(NullBroadcast))
            .await
            .unwrap();
        let runtime = system.runtime();
        runtime
            .add_script_file("SEQUENCE(3, Morning) FWD(5) DONE ONCLOSE(8) DONE")
            .unwrap();
        runtime.set_description(3, "First train out").unwrap();
        system.locos().add("Flyer", 3).unwrap();
    }

    let system = TrainSystem::from_config(&config, Arc::new(NullBroadcast))
        .await
        .unwrap();
    let runtime = system.runtime();
    assert_eq!(runtime.all_automations().len(), 2);
    assert_eq!(runtime.script(3).unwrap().description, "First train out");
    assert!(runtime.script(-17).is_some());
    assert_eq!(system.locos().len(), 1);

    let _ = std::fs::remove_file(&path);
}
