/*!

A [`ClusterClient`] that keeps resources in memory so that the tester can be exercised without a
Kubernetes cluster. Each resource's behavior is scripted by name: how many reads it takes to become
ready, whether it fails terminally, how long it takes to disappear after deletion, and so on.

!*/

use krtest_model::clients::Result;
use krtest_model::{ClientError, ClusterClient, ResourceIdentity};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// How a mock resource behaves once it has been applied.
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Reads before the resource reports `Ready` and `Synced`.
    pub ready_after: u32,
    /// Merged into `status` once the resource is ready.
    pub status: Value,
    pub never_ready: bool,
    /// Reports `Synced=False` with reason `ReconcileFailed` on the first read.
    pub terminal_failure: bool,
    /// Reads after deletion before the resource is gone.
    pub gone_after: u32,
    pub never_gone: bool,
    /// Delete calls that fail with a transient error before one succeeds.
    pub transient_delete_failures: u32,
    pub apply_error: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            ready_after: 1,
            status: json!({}),
            never_ready: false,
            terminal_failure: false,
            gone_after: 1,
            never_gone: false,
            transient_delete_failures: 0,
            apply_error: false,
        }
    }
}

#[derive(Debug)]
struct Object {
    body: Value,
    generation: i64,
    reads: u32,
    deleted: bool,
    reads_since_delete: u32,
}

#[derive(Debug, Default)]
struct Inner {
    behaviors: HashMap<String, Behavior>,
    objects: HashMap<String, Object>,
    calls: Vec<String>,
    applied: HashMap<String, Value>,
}

#[derive(Debug, Default)]
pub struct MockCluster {
    inner: Mutex<Inner>,
    /// How long each read takes.
    read_latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Counts a read as in flight until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn start(counter: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(self, name: &str, behavior: Behavior) -> Self {
        self.inner
            .lock()
            .unwrap()
            .behaviors
            .insert(name.to_string(), behavior);
        self
    }

    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = latency;
        self
    }

    /// The largest number of reads that were in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Every call made so far, e.g. `apply Database/db` or `get Database/db ready`.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    /// The last body applied or updated for the resource named `name`.
    pub fn applied(&self, name: &str) -> Option<Value> {
        self.inner.lock().unwrap().applied.get(name).cloned()
    }

    pub fn all_applied(&self) -> Vec<Value> {
        self.inner.lock().unwrap().applied.values().cloned().collect()
    }
}

impl Inner {
    fn behavior(&self, name: &str) -> Behavior {
        self.behaviors.get(name).cloned().unwrap_or_default()
    }

    fn write(&mut self, method: &str, identity: &ResourceIdentity, body: &Value) {
        self.calls.push(format!("{} {}", method, identity));
        self.applied.insert(identity.name.clone(), body.clone());
        let object = self
            .objects
            .entry(identity.name.clone())
            .or_insert_with(|| Object {
                body: body.clone(),
                generation: 0,
                reads: 0,
                deleted: false,
                reads_since_delete: 0,
            });
        object.body = body.clone();
        object.generation += 1;
        object.reads = 0;
    }
}

fn condition(condition_type: &str, status: &str, reason: &str, generation: i64) -> Value {
    json!({
        "type": condition_type,
        "status": status,
        "reason": reason,
        "observedGeneration": generation,
    })
}

#[async_trait::async_trait]
impl ClusterClient for MockCluster {
    async fn apply(&self, identity: &ResourceIdentity, body: &Value) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.behavior(&identity.name).apply_error {
            inner.calls.push(format!("apply {} rejected", identity));
            return Err(ClientError::other(
                "apply",
                identity.to_string(),
                "admission webhook denied the request",
            ));
        }
        inner.write("apply", identity, body);
        Ok(())
    }

    async fn get(&self, identity: &ResourceIdentity) -> Result<Value> {
        let _in_flight = InFlight::start(&self.in_flight, &self.max_in_flight);
        if !self.read_latency.is_zero() {
            tokio::time::sleep(self.read_latency).await;
        }
        self.read(identity)
    }

    async fn update(&self, identity: &ResourceIdentity, body: &Value) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.objects.contains_key(&identity.name) {
            return Err(ClientError::not_found("update", identity.to_string()));
        }
        inner.write("update", identity, body);
        Ok(())
    }

    async fn delete(&self, identity: &ResourceIdentity) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if let Some(behavior) = inner.behaviors.get_mut(&identity.name) {
            if behavior.transient_delete_failures > 0 {
                behavior.transient_delete_failures -= 1;
                inner.calls.push(format!("delete {} throttled", identity));
                return Err(ClientError::transient(
                    "delete",
                    identity.to_string(),
                    "too many requests",
                ));
            }
        }
        inner.calls.push(format!("delete {}", identity));
        match inner.objects.get_mut(&identity.name) {
            Some(object) => {
                object.deleted = true;
                Ok(())
            }
            None => Err(ClientError::not_found("delete", identity.to_string())),
        }
    }
}

impl MockCluster {
    fn read(&self, identity: &ResourceIdentity) -> Result<Value> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let behavior = inner.behavior(&identity.name);
        let object = match inner.objects.get_mut(&identity.name) {
            Some(object) => object,
            None => {
                inner.calls.push(format!("get {} missing", identity));
                return Err(ClientError::not_found("get", identity.to_string()));
            }
        };

        if object.deleted {
            object.reads_since_delete += 1;
            if !behavior.never_gone && object.reads_since_delete >= behavior.gone_after {
                inner.objects.remove(&identity.name);
                inner.calls.push(format!("get {} missing", identity));
                return Err(ClientError::not_found("get", identity.to_string()));
            }
        }

        object.reads += 1;
        let generation = object.generation;
        let ready = !behavior.never_ready && object.reads >= behavior.ready_after;
        let mut observed = object.body.clone();
        observed["metadata"]["generation"] = json!(generation);
        if object.deleted {
            observed["metadata"]["deletionTimestamp"] = json!("2024-01-01T00:00:00Z");
        }
        let conditions = if behavior.terminal_failure {
            vec![
                condition("Ready", "False", "Creating", generation),
                condition("Synced", "False", "ReconcileFailed", generation),
            ]
        } else if ready {
            vec![
                condition("Ready", "True", "Available", generation),
                condition("Synced", "True", "ReconcileSuccess", generation),
            ]
        } else {
            vec![
                condition("Ready", "False", "Creating", generation),
                condition("Synced", "True", "ReconcileSuccess", generation),
            ]
        };
        let mut status = json!({ "conditions": conditions });
        if ready {
            let extra = behavior.status.as_object();
            if let (Some(status), Some(extra)) = (status.as_object_mut(), extra) {
                for (key, value) in extra {
                    status.insert(key.clone(), value.clone());
                }
            }
        }
        observed["status"] = status;
        inner.calls.push(format!(
            "get {} {}",
            identity,
            if ready { "ready" } else { "pending" }
        ));
        Ok(observed)
    }
}
