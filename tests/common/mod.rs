//! Shared fakes for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use pbis_sync::{
    ConnectivityMonitor, Endpoint, Juvenile, MemoryBackend, MutationEvent, MutationType,
    RemoteApi, Result, StoreBackend, SyncError,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn juvenile(id: &str, event_id: i64, active: i64, enqueued: bool) -> Juvenile {
    Juvenile {
        id: id.to_string(),
        first_name: format!("Kid{}", id),
        last_name: "Tester".to_string(),
        points: 0,
        event_id,
        active,
        is_enqueued: enqueued,
    }
}

/// Juvenile as the backend sends it: numeric id, no queue flag
pub fn remote_juvenile(id: i64, event_id: i64, active: i64, points: i64) -> Value {
    json!({
        "id": id,
        "first_name": format!("Kid{}", id),
        "last_name": "Tester",
        "points": points,
        "event_id": event_id,
        "active": active
    })
}

// =============================================================================
// Mock backend
// =============================================================================

#[derive(Default)]
struct MockState {
    locations: Vec<String>,
    behaviors: Vec<Value>,
    juveniles: Vec<Value>,
    purchases: Vec<Value>,
    failing_juvenile_ids: HashSet<i64>,
    fail_activation: bool,
    increments: Vec<(i64, i64)>,
    requests: Vec<Endpoint>,
}

/// Scripted backend that checks connectivity like the HTTP client
pub struct MockApi {
    connectivity: ConnectivityMonitor,
    state: Mutex<MockState>,
    increment_delay: Duration,
}

impl MockApi {
    pub fn new(connectivity: ConnectivityMonitor) -> Self {
        Self {
            connectivity,
            state: Mutex::new(MockState::default()),
            increment_delay: Duration::ZERO,
        }
    }

    pub fn with_increment_delay(mut self, delay: Duration) -> Self {
        self.increment_delay = delay;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_locations(&self, names: &[&str]) {
        self.state().locations = names.iter().map(|n| n.to_string()).collect();
    }

    pub fn set_behaviors(&self, behaviors: Vec<Value>) {
        self.state().behaviors = behaviors;
    }

    pub fn set_juveniles(&self, juveniles: Vec<Value>) {
        self.state().juveniles = juveniles;
    }

    pub fn set_purchases(&self, purchases: Vec<Value>) {
        self.state().purchases = purchases;
    }

    pub fn fail_increments_for(&self, juvenile_id: i64) {
        self.state().failing_juvenile_ids.insert(juvenile_id);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failing_juvenile_ids.clear();
        state.fail_activation = false;
    }

    pub fn fail_activation(&self) {
        self.state().fail_activation = true;
    }

    pub fn increments(&self) -> Vec<(i64, i64)> {
        self.state().increments.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state().requests.len()
    }

    pub fn requests(&self) -> Vec<Endpoint> {
        self.state().requests.clone()
    }
}

#[async_trait]
impl RemoteApi for MockApi {
    async fn request(&self, endpoint: &Endpoint) -> Result<Value> {
        if !self.connectivity.is_online() {
            return Err(SyncError::NotConnected);
        }
        self.state().requests.push(endpoint.clone());

        if let Endpoint::IncrementPoints { .. } = endpoint {
            if !self.increment_delay.is_zero() {
                tokio::time::sleep(self.increment_delay).await;
            }
        }

        let mut state = self.state();
        match endpoint {
            Endpoint::ListLocations => Ok(json!(state.locations)),
            Endpoint::ListBehaviors => Ok(Value::Array(state.behaviors.clone())),
            Endpoint::ListJuveniles => Ok(Value::Array(state.juveniles.clone())),
            Endpoint::JuvenileByEventId { event_id } => Ok(Value::Array(
                state
                    .juveniles
                    .iter()
                    .filter(|j| j["event_id"] == json!(event_id))
                    .cloned()
                    .collect(),
            )),
            Endpoint::ActivateJuvenile { event_id, .. } => {
                if state.fail_activation {
                    return Err(SyncError::Server {
                        status: Some(500),
                        message: "activation rejected".into(),
                    });
                }
                for j in state.juveniles.iter_mut() {
                    if j["event_id"] == json!(event_id) {
                        j["active"] = json!(1);
                    }
                }
                Ok(Value::Null)
            }
            Endpoint::IncrementPoints {
                juvenile_id,
                behavior_id,
            } => {
                if state.failing_juvenile_ids.contains(juvenile_id) {
                    return Err(SyncError::Server {
                        status: Some(502),
                        message: "bad gateway".into(),
                    });
                }
                state.increments.push((*juvenile_id, *behavior_id));
                Ok(Value::Null)
            }
            Endpoint::JuvenileTransactions { .. } => Ok(Value::Array(state.purchases.clone())),
        }
    }
}

// =============================================================================
// Store with injected failures
// =============================================================================

/// Memory backend whose saves fail for chosen ids or whole models
#[derive(Default)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    failing_ids: Mutex<HashSet<String>>,
    failing_models: Mutex<HashSet<String>>,
    rescanned_ids: Mutex<HashSet<String>>,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_saves_for(&self, id: &str) {
        self.failing_ids.lock().unwrap().insert(id.to_string());
    }

    pub fn fail_model(&self, model: &str) {
        self.failing_models.lock().unwrap().insert(model.to_string());
    }

    /// Clearing the queue flag of this juvenile is immediately followed by a
    /// second commit that sets it again, as a scan racing the removal would
    pub fn rescan_after_clear(&self, id: &str) {
        self.rescanned_ids.lock().unwrap().insert(id.to_string());
    }

    pub fn heal(&self) {
        self.failing_ids.lock().unwrap().clear();
        self.failing_models.lock().unwrap().clear();
    }

    fn should_fail(&self, model: &str, id: &str) -> bool {
        self.failing_ids.lock().unwrap().contains(id)
            || self.failing_models.lock().unwrap().contains(model)
    }
}

#[async_trait]
impl StoreBackend for FlakyBackend {
    async fn query(&self, model: &str) -> Result<Vec<Value>> {
        self.inner.query(model).await
    }

    async fn save(&self, model: &str, id: &str, record: Value) -> Result<MutationType> {
        if self.should_fail(model, id) {
            return Err(SyncError::Persistence(format!("injected failure for {}", id)));
        }
        let rescan = model == "Juvenile"
            && record["isEnqueued"] == json!(false)
            && self.rescanned_ids.lock().unwrap().contains(id);

        let mutation_type = self.inner.save(model, id, record.clone()).await?;
        if rescan {
            let mut requeued = record;
            requeued["isEnqueued"] = json!(true);
            self.inner.save(model, id, requeued).await?;
        }
        Ok(mutation_type)
    }

    async fn delete(&self, model: &str, id: &str) -> Result<bool> {
        self.inner.delete(model, id).await
    }

    async fn snapshot_and_subscribe(
        &self,
        model: &str,
    ) -> Result<(Vec<Value>, broadcast::Receiver<MutationEvent>)> {
        self.inner.snapshot_and_subscribe(model).await
    }

    fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.inner.subscribe()
    }

    async fn current_seq(&self, model: &str) -> Result<u64> {
        self.inner.current_seq(model).await
    }
}
