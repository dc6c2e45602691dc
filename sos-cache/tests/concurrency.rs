//! Concurrent partial updates racing a full rebuild

mod common;

use std::sync::Arc;
use std::thread;

use common::*;
use sos_cache::{CacheController, ControllerConfig, RebuildState};

const WRITERS: usize = 16;

#[test]
fn test_partials_during_rebuild_are_reflected_once() {
    let source = ScriptedSource::new();
    let gate = source.gate();
    let controller = Arc::new(CacheController::new(
        ControllerConfig::default().with_rebuild_threads(4),
        source.clone(),
        source.clone(),
    ));

    let rebuild = {
        let controller = controller.clone();
        thread::spawn(move || controller.update_cache_from_datasource())
    };
    assert!(wait_until(|| gate.entered() > 0));

    let writers: Vec<_> = (0..WRITERS)
        .map(|i| {
            let controller = controller.clone();
            thread::spawn(move || {
                let request = observations(
                    "O-db",
                    vec![observation("P-db", "OP-db", &format!("F-{}", i), 10 + (i as u32 % 10))],
                );
                controller.update_after_observation_insertion(request)
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap().unwrap();
    }
    assert_eq!(controller.rebuild_state().running.unwrap().pending_partials, WRITERS);

    gate.open();
    rebuild.join().unwrap().unwrap();

    let cache = controller.cache();
    assert_eq!(cache.observation_identifiers_for_procedure("P-db").len(), WRITERS);
    assert_eq!(cache.observation_identifiers().len(), WRITERS);
    // F-db from the data source plus one feature per writer
    assert_eq!(cache.features_of_interest_for_offering("O-db").len(), WRITERS + 1);
    assert!(cache.integrity_violations().is_empty());

    let last = controller.rebuild_state().last.unwrap();
    assert_eq!(last.state, RebuildState::Finished);
    assert_eq!(last.pending_partials, WRITERS);
}

#[test]
fn test_readers_never_block_on_rebuild() {
    let source = ScriptedSource::new();
    let gate = source.gate();
    let controller = Arc::new(CacheController::new(
        ControllerConfig::default(),
        source.clone(),
        source.clone(),
    ));

    let rebuild = {
        let controller = controller.clone();
        thread::spawn(move || controller.update_cache_from_datasource())
    };
    assert!(wait_until(|| gate.entered() > 0));

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let controller = controller.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    assert!(controller.cache().offerings().is_empty());
                }
            })
        })
        .collect();
    for reader in readers {
        reader.join().unwrap();
    }

    gate.open();
    rebuild.join().unwrap().unwrap();
    assert_eq!(controller.cache().offerings(), ids(&["O-db"]));
}

#[test]
fn test_many_sequential_rebuilds_from_many_threads() {
    let source = ScriptedSource::new();
    let controller = Arc::new(CacheController::new(
        ControllerConfig::default().with_rebuild_threads(2),
        source.clone(),
        source.clone(),
    ));

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let controller = controller.clone();
            thread::spawn(move || controller.update_cache_from_datasource())
        })
        .collect();
    for caller in callers {
        caller.join().unwrap().unwrap();
    }

    let status = controller.rebuild_state();
    assert!(status.running.is_none());
    assert!(status.queued.is_none());
    assert_eq!(status.last.unwrap().state, RebuildState::Finished);
    assert_eq!(controller.cache().offerings(), ids(&["O-db"]));
}
