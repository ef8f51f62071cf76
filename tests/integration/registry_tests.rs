//! Registry lookup, singleton and validation behavior

use crate::common::{FakeClient, FakeState, TEST_PROJECT, fake_registry, test_bridge};
use pgbridge::db::ReadContext;
use pgbridge::error::ServiceError;
use pgbridge::service::{ServiceConfig, ServiceRegistry};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_equal_configs_share_one_handle() {
    let (registry, state) = fake_registry();

    let a = registry.get("i1", "d1", Some(10), None).unwrap();
    let b = registry
        .get_or_create(&ServiceConfig::new("i1", "d1").with_pool_size(10))
        .unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(state.databases_opened(), 1);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_concurrent_requests_build_one_pool() {
    let (registry, state) = fake_registry();
    let registry = Arc::new(registry);
    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));

    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.get("i1", "d1", Some(10), Some(5)).unwrap()
            })
        })
        .collect();

    let handles: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    for handle in &handles[1..] {
        assert!(Arc::ptr_eq(&handles[0], handle));
    }
    assert_eq!(state.databases_opened(), 1);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_distinct_pool_sizes_get_distinct_handles() {
    let (registry, state) = fake_registry();

    let small = registry.get("i1", "d1", Some(10), None).unwrap();
    let large = registry.get("i1", "d1", Some(20), None).unwrap();

    assert!(!Arc::ptr_eq(&small, &large));
    assert_eq!(small.pool_status().max_size, 10);
    assert_eq!(large.pool_status().max_size, 20);
    assert_eq!(state.databases_opened(), 2);
}

#[test]
fn test_every_field_distinguishes_configs() {
    let (registry, state) = fake_registry();
    let configs = [
        ServiceConfig::new("i1", "d1"),
        ServiceConfig::new("i2", "d1"),
        ServiceConfig::new("i1", "d2"),
        ServiceConfig::new("i1", "d1").with_pool_size(4),
        ServiceConfig::new("i1", "d1")
            .with_pool_size(4)
            .with_session_request_timeout(2),
    ];
    for config in &configs {
        registry.get_or_create(config).unwrap();
    }
    assert_eq!(registry.len(), configs.len());
    assert_eq!(state.databases_opened(), configs.len());
}

#[test]
fn test_empty_ids_fail_without_building_a_pool() {
    let (registry, state) = fake_registry();

    for (instance, database) in [("", "d1"), ("i1", ""), ("  ", "d1")] {
        match registry.get(instance, database, None, None) {
            Err(ServiceError::Configuration(_)) => {}
            other => panic!("Expected Configuration error, got {:?}", other),
        }
    }
    assert_eq!(state.databases_opened(), 0);
    assert!(registry.is_empty());
}

#[test]
fn test_zero_pool_size_is_rejected() {
    let (registry, state) = fake_registry();
    assert!(matches!(
        registry.get("i1", "d1", Some(0), None),
        Err(ServiceError::Configuration(_))
    ));
    assert_eq!(state.databases_opened(), 0);
}

#[test]
fn test_unknown_instance_or_database_is_configuration_error() {
    let (registry, _state) = fake_registry();

    match registry.get("nope", "d1", None, None) {
        Err(ServiceError::Configuration(msg)) => assert!(msg.contains("nope"), "{}", msg),
        other => panic!("Expected Configuration error, got {:?}", other),
    }
    assert!(matches!(
        registry.get("i1", "missing", None, None),
        Err(ServiceError::Configuration(_))
    ));
    assert!(registry.is_empty());
}

#[test]
fn test_project_mismatch_names_both_projects() {
    let state = FakeState::new();
    let registry = ServiceRegistry::new(Arc::new(FakeClient::new(Arc::clone(&state))), test_bridge())
        .with_project("billing-prod");

    let err = registry.get("i1", "d1", None, None).unwrap_err();
    match &err {
        ServiceError::Configuration(msg) => {
            assert!(msg.contains("billing-prod"), "{}", msg);
            assert!(msg.contains(TEST_PROJECT), "{}", msg);
        }
        other => panic!("Expected Configuration error, got {:?}", other),
    }
    assert_eq!(state.databases_opened(), 0);
    assert!(registry.is_empty());
}

#[test]
fn test_matching_project_is_accepted() {
    let state = FakeState::new();
    let registry = ServiceRegistry::new(Arc::new(FakeClient::new(state)), test_bridge())
        .with_project(TEST_PROJECT);
    assert!(registry.get("i1", "d1", None, None).is_ok());
}

#[test]
fn test_closed_handle_is_replaced() {
    let (registry, state) = fake_registry();
    let first = registry.get("i1", "d1", Some(2), None).unwrap();
    first.close();

    let second = registry.get("i1", "d1", Some(2), None).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(!second.is_closed());
    assert!(second.ping().is_ok());
    assert!(matches!(first.ping(), Err(ServiceError::Closed)));
    assert_eq!(state.databases_opened(), 2);
    assert_eq!(registry.len(), 1);

    let again = registry.get("i1", "d1", Some(2), None).unwrap();
    assert!(Arc::ptr_eq(&second, &again));
}

#[test]
fn test_shutdown_lets_in_flight_calls_finish() {
    let (registry, state) = fake_registry();
    let handle = registry.get("i1", "d1", Some(2), None).unwrap();
    let (started_tx, started_rx) = std::sync::mpsc::channel::<()>();

    let op = handle.run_in_snapshot(move |snapshot| {
        started_tx.send(()).ok();
        snapshot.execute_sql("SLEEP 200", &[])
    });
    started_rx
        .recv_timeout(std::time::Duration::from_secs(5))
        .unwrap();

    registry.shutdown();
    assert_eq!(registry.bridge().in_flight(), 0);
    let results = op.wait().unwrap();
    assert_eq!(results.single_value().and_then(|v| v.as_i64()), Some(200));
    assert_eq!(state.snapshots_released(), 1);
}

#[test]
fn test_shutdown_closes_everything() {
    let (registry, state) = fake_registry();
    let handle = registry.get("i1", "d1", Some(2), None).unwrap();
    registry.get("i1", "d2", Some(2), None).unwrap();

    registry.shutdown();
    registry.shutdown();

    assert!(registry.is_closed());
    assert!(registry.is_empty());
    assert!(handle.is_closed());
    assert_eq!(
        state
            .databases_closed
            .load(std::sync::atomic::Ordering::SeqCst),
        2
    );
    assert!(matches!(
        registry.get("i1", "d1", Some(2), None),
        Err(ServiceError::Closed)
    ));
    assert!(matches!(
        handle.run_in_snapshot(|_| Ok(())).wait(),
        Err(ServiceError::Closed)
    ));
}
