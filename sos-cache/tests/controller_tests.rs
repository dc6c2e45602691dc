//! Controller scenarios: sequential updates, blocked rebuilds, the rebuild
//! queue, failures and timeouts.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::*;
use sos_cache::request::DeleteSensorRequest;
use sos_cache::{CacheController, CacheError, ControllerConfig, RebuildState};

fn controller(source: &Arc<ScriptedSource>, config: ControllerConfig) -> Arc<CacheController> {
    Arc::new(CacheController::new(
        config.with_rebuild_threads(2),
        source.clone(),
        source.clone(),
    ))
}

fn spawn_rebuild(controller: &Arc<CacheController>) -> thread::JoinHandle<sos_cache::Result<()>> {
    let controller = controller.clone();
    thread::spawn(move || controller.update_cache_from_datasource())
}

#[test]
fn test_sequential_insert_observe_delete() {
    let source = ScriptedSource::new();
    let controller = controller(&source, ControllerConfig::default());

    let (req, resp) = sensor("P1", "O1", &["OP1"]);
    controller.update_after_sensor_insertion(req, resp).unwrap();
    let cache = controller.cache();
    assert_eq!(cache.offerings(), ids(&["O1"]));
    assert_eq!(cache.procedures_for_offering("O1"), ids(&["P1"]));

    controller
        .update_after_observation_insertion(observations("O1", vec![observation("P1", "OP1", "F1", 5)]))
        .unwrap();
    let cache = controller.cache();
    assert_eq!(cache.features_of_interest_for_offering("O1"), ids(&["F1"]));
    assert!(cache.phenomenon_time_for_offering("O1").unwrap().contains(at(5)));

    controller
        .update_after_sensor_deletion(DeleteSensorRequest { procedure: "P1".into() })
        .unwrap();
    let cache = controller.cache();
    assert!(!cache.offerings().contains("O1"));
    assert!(cache.global_phenomenon_time().is_none());
    assert!(cache.global_envelope().is_none());
    assert!(cache.integrity_violations().is_empty());
}

#[test]
fn test_readers_keep_their_snapshot() {
    let source = ScriptedSource::new();
    let controller = controller(&source, ControllerConfig::default());
    controller.update_cache_from_datasource().unwrap();

    let held = controller.cache();
    let (req, resp) = sensor("P1", "O1", &["OP1"]);
    controller.update_after_sensor_insertion(req, resp).unwrap();

    assert_eq!(held.offerings(), ids(&["O-db"]));
    assert_eq!(controller.cache().offerings(), ids(&["O-db", "O1"]));
}

#[test]
fn test_partial_during_rebuild_is_replayed() {
    let source = ScriptedSource::new();
    let gate = source.gate();
    let controller = controller(&source, ControllerConfig::default());

    let rebuild = spawn_rebuild(&controller);
    assert!(wait_until(|| gate.entered() > 0));
    let status = controller.rebuild_state();
    assert_eq!(status.running.as_ref().map(|r| r.state), Some(RebuildState::Running));

    let (req, resp) = sensor("P2", "O2", &["OP2"]);
    controller.update_after_sensor_insertion(req, resp).unwrap();

    // visible before the rebuild finishes
    let cache = controller.cache();
    assert_eq!(cache.offerings(), ids(&["O2"]));
    assert_eq!(controller.rebuild_state().running.unwrap().pending_partials, 1);

    gate.open();
    rebuild.join().unwrap().unwrap();

    let cache = controller.cache();
    assert_eq!(cache.offerings(), ids(&["O-db", "O2"]));
    assert_eq!(cache.procedures_for_offering("O2"), ids(&["P2"]));
    assert_eq!(cache.name_for_offering("O-db"), Some("O-db offering"));
    assert!(cache.integrity_violations().is_empty());

    let last = controller.rebuild_state().last.unwrap();
    assert_eq!(last.state, RebuildState::Finished);
    assert_eq!(last.pending_partials, 1);
    assert!(controller.is_initialized());
}

#[test]
fn test_second_rebuild_queues_and_third_waits() {
    let source = ScriptedSource::new();
    let gate = source.gate();
    let controller = controller(&source, ControllerConfig::default());

    let first = spawn_rebuild(&controller);
    assert!(wait_until(|| gate.entered() == 1));

    let second = spawn_rebuild(&controller);
    assert!(wait_until(|| controller.rebuild_state().queued.is_some()));

    let third = spawn_rebuild(&controller);
    thread::sleep(Duration::from_millis(30));
    let status = controller.rebuild_state();
    assert_eq!(status.running.unwrap().unit, 1);
    assert_eq!(status.queued.unwrap().unit, 2);
    assert_eq!(gate.entered(), 1);

    gate.open();
    first.join().unwrap().unwrap();
    second.join().unwrap().unwrap();
    third.join().unwrap().unwrap();

    // one fetch of the single offering per rebuild
    assert_eq!(gate.entered(), 3);
    let status = controller.rebuild_state();
    assert!(status.running.is_none());
    assert!(status.queued.is_none());
    assert_eq!(status.last.unwrap().unit, 3);
}

#[test]
fn test_queued_rebuild_replays_partials_accepted_while_queued() {
    let source = ScriptedSource::new();
    let gate = source.gate();
    let controller = controller(&source, ControllerConfig::default());

    let first = spawn_rebuild(&controller);
    assert!(wait_until(|| gate.entered() == 1));
    let second = spawn_rebuild(&controller);
    assert!(wait_until(|| controller.rebuild_state().queued.is_some()));

    let (req, resp) = sensor("P2", "O2", &["OP2"]);
    controller.update_after_sensor_insertion(req, resp).unwrap();
    assert!(controller.cache().has_offering("O2"));
    let status = controller.rebuild_state();
    assert_eq!(status.running.unwrap().pending_partials, 1);
    assert_eq!(status.queued.unwrap().pending_partials, 1);

    gate.open();
    first.join().unwrap().unwrap();
    second.join().unwrap().unwrap();

    let cache = controller.cache();
    assert_eq!(cache.offerings(), ids(&["O-db", "O2"]));
    assert_eq!(cache.procedures_for_offering("O2"), ids(&["P2"]));
    assert!(cache.integrity_violations().is_empty());

    let last = controller.rebuild_state().last.unwrap();
    assert_eq!(last.unit, 2);
    assert_eq!(last.state, RebuildState::Finished);
    assert_eq!(last.pending_partials, 1);
}

#[test]
fn test_failed_rebuild_keeps_previous_cache() {
    let source = ScriptedSource::new();
    let controller = controller(&source, ControllerConfig::default());
    controller.update_cache_from_datasource().unwrap();
    let before = controller.cache();

    source.fail_offering("O-broken");
    let err = controller.update_cache_from_datasource().unwrap_err();
    match &err {
        CacheError::RebuildFailed { cause, .. } => match cause.as_ref() {
            CacheError::RebuildIncomplete { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].offering, "O-broken");
            }
            other => panic!("unexpected cause: {}", other),
        },
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.is_recoverable());
    assert_eq!(*controller.cache(), *before);
    assert_eq!(controller.rebuild_state().last.unwrap().state, RebuildState::Failed);

    source.heal();
    controller.update_cache_from_datasource().unwrap();
    assert_eq!(controller.rebuild_state().last.unwrap().state, RebuildState::Finished);
}

#[test]
fn test_partial_survives_failed_rebuild() {
    let source = ScriptedSource::new();
    source.fail_offering("O-broken");
    let gate = source.gate();
    let controller = controller(&source, ControllerConfig::default());

    let rebuild = spawn_rebuild(&controller);
    assert!(wait_until(|| gate.entered() > 0));
    let (req, resp) = sensor("P2", "O2", &["OP2"]);
    controller.update_after_sensor_insertion(req, resp).unwrap();

    gate.open();
    assert!(rebuild.join().unwrap().is_err());
    assert_eq!(controller.cache().offerings(), ids(&["O2"]));
    assert!(!controller.is_initialized());
}

#[test]
fn test_waiters_on_failed_unit_receive_its_error() {
    let source = ScriptedSource::new();
    source.fail_offering("O-broken");
    let gate = source.gate();
    let controller = controller(&source, ControllerConfig::default());

    let first = spawn_rebuild(&controller);
    assert!(wait_until(|| gate.entered() > 0));
    let second = spawn_rebuild(&controller);
    assert!(wait_until(|| controller.rebuild_state().queued.is_some()));
    let third = spawn_rebuild(&controller);
    thread::sleep(Duration::from_millis(30));

    gate.open();
    let errors: Vec<CacheError> = [first, second, third]
        .into_iter()
        .map(|h| h.join().unwrap().unwrap_err())
        .collect();

    // the third caller waited on the queued unit and sees its failure
    for err in &errors {
        assert_eq!(err.error_code(), "REBUILD_FAILED");
    }
    match &errors[2] {
        CacheError::RebuildFailed { unit, .. } => assert_eq!(*unit, 2),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_queued_rebuild_times_out_and_vacates_slot() {
    let source = ScriptedSource::new();
    let gate = source.gate();
    let controller = controller(
        &source,
        ControllerConfig::default().with_update_timeout(Duration::from_millis(100)),
    );

    let first = spawn_rebuild(&controller);
    assert!(wait_until(|| gate.entered() > 0));

    let err = controller.update_cache_from_datasource().unwrap_err();
    match err {
        CacheError::LockTimeout { waited_ms, .. } => assert!(waited_ms >= 90),
        other => panic!("unexpected error: {}", other),
    }
    assert!(controller.rebuild_state().queued.is_none());

    gate.open();
    first.join().unwrap().unwrap();
    assert!(controller.is_initialized());
}

#[test]
fn test_shutdown_rejects_new_work() {
    let source = ScriptedSource::new();
    let controller = controller(&source, ControllerConfig::default());
    controller.shutdown();

    let (req, resp) = sensor("P1", "O1", &["OP1"]);
    let err = controller.update_after_sensor_insertion(req, resp).unwrap_err();
    assert!(matches!(err, CacheError::ShutDown));
    assert!(controller.is_shut_down());
}
