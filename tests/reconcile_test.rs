//! Reconciliation engine integration tests
//!
//! Covers reference data seeding, juvenile refresh, scan lookup and the
//! reactivation flow against a scripted backend.

mod common;

use common::{juvenile, remote_juvenile, MockApi};
use pbis_sync::{
    Activity, Behavior, Category, ConnectivityMonitor, DataStore, Endpoint, EventBus, Juvenile,
    Location, Notification, QueueTracker, ReconciliationEngine, SyncError,
};
use serde_json::json;
use std::sync::Arc;

fn setup(online: bool) -> (ReconciliationEngine, Arc<MockApi>, DataStore, EventBus, ConnectivityMonitor) {
    common::init_tracing();
    let connectivity = ConnectivityMonitor::new(online);
    let api = Arc::new(MockApi::new(connectivity.clone()));
    let store = DataStore::in_memory();
    let events = EventBus::default();
    let engine = ReconciliationEngine::new(store.clone(), api.clone(), connectivity.clone(), events.clone());
    (engine, api, store, events, connectivity)
}

// =============================================================================
// Reference data
// =============================================================================

#[tokio::test]
async fn test_reference_data_seeded_once() {
    let (engine, api, store, _, _) = setup(true);
    api.set_locations(&["Gym", "Cafeteria"]);
    api.set_behaviors(vec![
        json!({"id": 1, "title": "Walk", "location": "Gym", "category": "Safe"}),
        json!({"id": 2, "title": "Clean up", "location": "Cafeteria", "category": "Responsible"}),
        json!({"id": 3, "title": "Swim", "location": "Pool", "category": "Safe"}),
    ]);

    let locations = engine.sync_reference_entities::<Location>().await.unwrap();
    assert_eq!(locations.len(), 2);
    let behaviors = engine.sync_reference_entities::<Behavior>().await.unwrap();

    // The behavior at an unknown location is not stored
    assert_eq!(behaviors.len(), 2);
    assert_eq!(store.count::<Behavior>().await.unwrap(), 2);
    assert_eq!(behaviors[1].category, Category::Responsible);

    let names: Vec<String> = engine.locations().await.into_iter().map(|l| l.name).collect();
    assert_eq!(names, vec!["Cafeteria", "Gym"]);

    // Stored data is served without another request
    let before = api.request_count();
    engine.sync_reference_entities::<Location>().await.unwrap();
    engine.sync_reference_entities::<Behavior>().await.unwrap();
    assert_eq!(api.request_count(), before);
}

#[tokio::test]
async fn test_reference_sync_offline_with_empty_store() {
    let (engine, api, _, _, _) = setup(false);
    let locations = engine.sync_reference_entities::<Location>().await.unwrap();
    assert!(locations.is_empty());
    assert_eq!(api.request_count(), 0);
}

#[tokio::test]
async fn test_refresh_drops_locations_missing_remotely() {
    let (engine, api, store, _, _) = setup(true);
    for name in ["Gym", "Hall", "Library"] {
        store.save(&Location::named(name)).await.unwrap();
    }

    api.set_locations(&["Gym", "Library", "Bus"]);
    let report = engine.refresh_reference_entities::<Location>().await.unwrap();
    assert_eq!((report.created, report.deleted), (1, 1));

    let names: Vec<String> = engine.locations().await.into_iter().map(|l| l.name).collect();
    assert_eq!(names, vec!["Bus", "Gym", "Library"]);

    // Empty listing is a blip, not a wipe
    api.set_locations(&[]);
    let report = engine.refresh_reference_entities::<Location>().await.unwrap();
    assert_eq!(report.changes(), 0);
    assert_eq!(store.count::<Location>().await.unwrap(), 3);
}

// =============================================================================
// Juveniles
// =============================================================================

#[tokio::test]
async fn test_refresh_juveniles_keeps_queue_flag() {
    let (engine, api, store, _, _) = setup(true);
    store.save(&juvenile("1", 100, 1, true)).await.unwrap();
    store.save(&juvenile("2", 200, 1, false)).await.unwrap();

    api.set_juveniles(vec![remote_juvenile(1, 100, 1, 25), remote_juvenile(3, 300, 1, 0)]);
    let report = engine.refresh_juveniles().await.unwrap();
    assert_eq!((report.created, report.updated, report.deleted), (1, 1, 1));

    let stored: Vec<Juvenile> = store.query().await.unwrap();
    let first = stored.iter().find(|j| j.id == "1").unwrap();
    assert_eq!(first.points, 25);
    assert!(first.is_enqueued);
    assert!(stored.iter().all(|j| j.id != "2"));

    // Same listing again changes nothing
    let again = engine.refresh_juveniles().await.unwrap();
    assert_eq!(again.changes(), 0);
}

#[tokio::test]
async fn test_refresh_juveniles_offline() {
    let (engine, _, _, _, _) = setup(false);
    assert_eq!(engine.refresh_juveniles().await.unwrap_err(), SyncError::NotConnected);
}

#[tokio::test]
async fn test_scan_fetches_remote_and_enqueues_active() {
    let (engine, api, store, _, _) = setup(true);
    api.set_juveniles(vec![remote_juvenile(7, 555, 1, 10)]);

    let result = engine.fetch_by_event_code(555).await.unwrap();
    assert_eq!(result.activity, Activity::Active);
    assert!(result.juvenile.is_enqueued);

    let stored: Vec<Juvenile> = store.query().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].belongs_in_queue());

    // Second scan is served locally
    let before = api.request_count();
    engine.fetch_by_event_code(555).await.unwrap();
    assert_eq!(api.request_count(), before);
}

#[tokio::test]
async fn test_scan_unknown_code_is_not_found() {
    let (engine, api, _, _, _) = setup(true);
    api.set_juveniles(vec![remote_juvenile(7, 555, 1, 10)]);

    let err = engine.fetch_by_event_code(999).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

#[tokio::test]
async fn test_inactive_scan_then_activation() {
    let (engine, api, store, events, _) = setup(true);
    let mut notifications = events.subscribe();
    let tracker = QueueTracker::new(store.clone(), events.clone());
    tracker.initialize().await.unwrap();

    store.save(&juvenile("4", 10010, 0, false)).await.unwrap();
    api.set_juveniles(vec![remote_juvenile(4, 10010, 0, 3)]);

    let result = engine.fetch_by_event_code(10010).await.unwrap();
    assert_eq!(result.activity, Activity::Inactive);
    assert!(!result.juvenile.is_enqueued);
    assert_eq!(
        notifications.recv().await.unwrap(),
        Notification::ReactivationPrompt {
            event_id: 10010,
            name: "Kid4".into()
        }
    );
    tracker.wait_processed(2).await;
    assert!(tracker.is_empty());

    let activated = engine.activate(10010).await.unwrap();
    assert!(activated.is_enqueued);
    assert!(activated.is_active());
    assert_eq!(activated.points, 3);

    tracker.wait_processed(3).await;
    assert!(tracker.contains("4"));
    assert!(api
        .requests()
        .contains(&Endpoint::ActivateJuvenile { event_id: 10010, juvenile_id: "4".into() }));
}

#[tokio::test]
async fn test_failed_activation_leaves_local_state() {
    let (engine, api, store, _, _) = setup(true);
    store.save(&juvenile("4", 10010, 0, false)).await.unwrap();
    api.fail_activation();

    let err = engine.activate(10010).await.unwrap_err();
    assert!(err.is_retryable());

    let stored: Vec<Juvenile> = store.query().await.unwrap();
    assert_eq!(stored[0], juvenile("4", 10010, 0, false));
}

#[tokio::test]
async fn test_activation_requires_known_code() {
    let (engine, _, _, _, _) = setup(true);
    assert!(matches!(engine.activate(1).await, Err(SyncError::NotFound(_))));
}

#[tokio::test]
async fn test_history_decodes_purchases() {
    let (engine, api, _, _, _) = setup(true);
    api.set_purchases(vec![
        json!({"id": 1, "name": "Pencil", "quantity": 2, "unit_price": 5}),
        json!({"id": "2", "name": "Sticker", "quantity": 1, "unit_price": 3}),
    ]);

    let history = engine.juvenile_history("4").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].total(), 10);
    assert_eq!(history[1].id, "2");
}

#[tokio::test]
async fn test_clear_local_resets_cache() {
    let (engine, api, store, _, _) = setup(true);
    api.set_locations(&["Gym"]);
    engine.sync_reference_entities::<Location>().await.unwrap();

    assert_eq!(engine.clear_local::<Location>().await.unwrap(), 1);
    assert!(engine.locations().await.is_empty());
    assert_eq!(store.count::<Location>().await.unwrap(), 0);
}
