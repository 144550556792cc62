//! In-memory cluster for tests.
//!
//! Simulates the parts of the control plane the engines touch: objects
//! keyed by kind/namespace/name, deployments that spawn pods with IPs,
//! revision history for `rollout undo`, per-workload probe health, and an
//! operation log for assertions. Failures are injected per verb.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{ClusterGateway, ExecOutput, ProbeOutcome, RolloutState};
use crate::manifest;

/// Handler for `exec` calls: `(pod, command) -> output`.
pub type ExecHandler =
    Arc<dyn Fn(&str, &[String]) -> GatewayResult<ExecOutput> + Send + Sync>;

/// A mutating or probing call recorded by the fake.
#[derive(Debug, Clone, PartialEq)]
pub enum FakeOp {
    Apply { kind: String, name: String },
    Patch { kind: String, name: String, patch: Value },
    SetImage { name: String, container: String, image: String },
    Delete { kind: String, name: String },
    RolloutStatus { name: String },
    Undo { name: String, revision: Option<u32> },
    Exec { pod: String, command: Vec<String> },
    Probe { url: String },
}

type ObjectKey = (String, String, String);

const OWNER_ANNOTATION: &str = "rollguard.io/owner";

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<ObjectKey, Value>,
    /// Prior revisions per `{ns}/{deployment}`, oldest first.
    history: HashMap<String, Vec<Value>>,
    stalled: HashSet<String>,
    unhealthy: HashSet<String>,
    scripted_probes: HashMap<String, VecDeque<bool>>,
    ready_override: HashMap<String, u32>,
    logs: HashMap<String, String>,
    injected: HashMap<String, VecDeque<GatewayError>>,
    exec_handler: Option<ExecHandler>,
    ops: Vec<FakeOp>,
    pod_seq: u32,
    probe_latency: Duration,
}

pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

fn key(kind: &str, namespace: &str, name: &str) -> ObjectKey {
    (
        manifest::normalize_kind(kind),
        namespace.to_string(),
        name.to_string(),
    )
}

fn owner_of(pod: &Value) -> Option<&str> {
    pod.pointer("/metadata/annotations")
        .and_then(|a| a.get(OWNER_ANNOTATION))
        .and_then(Value::as_str)
}

/// Build a minimal Deployment manifest.
pub fn deployment_manifest(
    namespace: &str,
    name: &str,
    container: &str,
    image: &str,
    replicas: u32,
    labels: &[(&str, &str)],
) -> Value {
    let labels: serde_json::Map<String, Value> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "namespace": namespace, "labels": labels},
        "spec": {
            "replicas": replicas,
            "selector": {"matchLabels": labels},
            "template": {
                "metadata": {"labels": labels},
                "spec": {"containers": [{"name": container, "image": image}]}
            }
        }
    })
}

/// Build a minimal Service manifest whose selector carries `labels`.
pub fn service_manifest(namespace: &str, name: &str, labels: &[(&str, &str)]) -> Value {
    let labels: serde_json::Map<String, Value> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {"name": name, "namespace": namespace, "labels": labels},
        "spec": {"selector": labels, "ports": [{"port": 80, "targetPort": 8080}]}
    })
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                probe_latency: Duration::from_millis(5),
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        // A panicking test thread must not hide the state from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Setup ──────────────────────────────────────────────────────

    /// Store an object without recording an operation.
    pub fn seed(&self, object: Value) {
        let mut state = self.lock();
        state.store(object);
    }

    /// Mark a deployment as never becoming ready.
    pub fn stall(&self, name: &str) {
        let mut state = self.lock();
        state.stalled.insert(name.to_string());
        state.refresh_all(name);
    }

    /// Make every probe to a workload's pods fail (or succeed again).
    pub fn set_healthy(&self, workload: &str, healthy: bool) {
        let mut state = self.lock();
        if healthy {
            state.unhealthy.remove(workload);
        } else {
            state.unhealthy.insert(workload.to_string());
        }
    }

    /// Queue probe results for a workload's pods, consumed one per probe
    /// before falling back to `set_healthy`.
    pub fn script_probes(&self, workload: &str, results: impl IntoIterator<Item = bool>) {
        let mut state = self.lock();
        state
            .scripted_probes
            .entry(workload.to_string())
            .or_default()
            .extend(results);
    }

    /// Override a deployment's ready replica count.
    pub fn set_ready_replicas(&self, namespace: &str, name: &str, ready: u32) {
        let mut state = self.lock();
        state.ready_override.insert(name.to_string(), ready);
        if let Some(obj) = state.objects.get_mut(&key("deployment", namespace, name)) {
            obj["status"]["readyReplicas"] = json!(ready);
        }
    }

    pub fn set_pod_restarts(&self, namespace: &str, pod: &str, restarts: u32) {
        let mut state = self.lock();
        if let Some(obj) = state.objects.get_mut(&key("pod", namespace, pod)) {
            obj["status"]["containerStatuses"] = json!([{"restartCount": restarts}]);
        }
    }

    /// Latency reported by every successful probe.
    pub fn set_probe_latency(&self, latency: Duration) {
        self.lock().probe_latency = latency;
    }

    pub fn set_logs(&self, pod: &str, text: &str) {
        self.lock().logs.insert(pod.to_string(), text.to_string());
    }

    pub fn on_exec(&self, handler: ExecHandler) {
        self.lock().exec_handler = Some(handler);
    }

    /// Make the next calls of `verb` fail with `errors`, in order.
    pub fn inject(&self, verb: &str, errors: impl IntoIterator<Item = GatewayError>) {
        self.lock()
            .injected
            .entry(verb.to_string())
            .or_default()
            .extend(errors);
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn object(&self, kind: &str, namespace: &str, name: &str) -> Option<Value> {
        self.lock().objects.get(&key(kind, namespace, name)).cloned()
    }

    /// Names of the pods a deployment currently owns.
    pub fn pods_of(&self, namespace: &str, workload: &str) -> Vec<String> {
        self.lock()
            .objects
            .iter()
            .filter(|((kind, ns, _), obj)| {
                kind == "pod" && ns == namespace && owner_of(obj) == Some(workload)
            })
            .map(|((_, _, name), _)| name.clone())
            .collect()
    }

    pub fn ops(&self) -> Vec<FakeOp> {
        self.lock().ops.clone()
    }

    pub fn probe_count(&self) -> usize {
        self.lock()
            .ops
            .iter()
            .filter(|op| matches!(op, FakeOp::Probe { .. }))
            .count()
    }

    /// Patches applied to the named object.
    pub fn patches_to(&self, kind: &str, name: &str) -> Vec<Value> {
        let kind = manifest::normalize_kind(kind);
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                FakeOp::Patch { kind: k, name: n, patch } if *k == kind && n == name => {
                    Some(patch.clone())
                }
                _ => None,
            })
            .collect()
    }
}

impl FakeState {
    fn take_injected(&mut self, verb: &str) -> GatewayResult<()> {
        match self.injected.get_mut(verb).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn store(&mut self, mut object: Value) {
        let kind = manifest::kind(&object).unwrap_or_default();
        let name = manifest::name(&object).unwrap_or_default().to_string();
        let namespace = manifest::namespace(&object).unwrap_or("default").to_string();
        object["metadata"]["namespace"] = Value::String(namespace.clone());
        let is_deployment = kind == "deployment";
        self.objects.insert(key(&kind, &namespace, &name), object);
        if is_deployment {
            self.refresh_pods(&namespace, &name);
        }
    }

    fn refresh_all(&mut self, name: &str) {
        let namespaces: Vec<String> = self
            .objects
            .keys()
            .filter(|(kind, _, n)| kind == "deployment" && n == name)
            .map(|(_, ns, _)| ns.clone())
            .collect();
        for ns in namespaces {
            self.refresh_pods(&ns, name);
        }
    }

    /// Recompute a deployment's status and replace its pods.
    fn refresh_pods(&mut self, namespace: &str, name: &str) {
        self.remove_pods(namespace, name);
        let Some(deployment) = self.objects.get(&key("deployment", namespace, name)).cloned() else {
            return;
        };
        let (desired, _) = manifest::replica_counts(&deployment);
        let ready = if self.stalled.contains(name) {
            0
        } else {
            self.ready_override.get(name).copied().unwrap_or(desired)
        };
        if let Some(obj) = self.objects.get_mut(&key("deployment", namespace, name)) {
            obj["status"] = json!({"replicas": desired, "readyReplicas": ready});
        }

        let labels = deployment
            .pointer("/spec/template/metadata/labels")
            .cloned()
            .unwrap_or_else(|| json!({}));
        for _ in 0..desired {
            self.pod_seq += 1;
            let pod_name = format!("{name}-{}", self.pod_seq);
            let pod = json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {
                    "name": pod_name,
                    "namespace": namespace,
                    "labels": labels,
                    "annotations": {OWNER_ANNOTATION: name}
                },
                "status": {
                    "phase": "Running",
                    "podIP": format!("10.0.{}.{}", self.pod_seq / 250, self.pod_seq % 250 + 1),
                    "containerStatuses": [{"restartCount": 0}]
                }
            });
            self.objects.insert(key("pod", namespace, &pod_name), pod);
        }
    }

    fn remove_pods(&mut self, namespace: &str, owner: &str) {
        self.objects.retain(|(kind, ns, _), obj| {
            !(kind == "pod" && ns == namespace && owner_of(obj) == Some(owner))
        });
    }

    fn pod_owner_by_ip(&self, ip: &str) -> Option<String> {
        self.objects.iter().find_map(|((kind, _, _), obj)| {
            if kind == "pod" && manifest::pod_ip(obj) == Some(ip) {
                owner_of(obj).map(str::to_string)
            } else {
                None
            }
        })
    }
}

#[async_trait]
impl ClusterGateway for FakeCluster {
    async fn get(&self, kind: &str, name: &str, namespace: &str) -> GatewayResult<Value> {
        let mut state = self.lock();
        state.take_injected("get")?;
        state
            .objects
            .get(&key(kind, namespace, name))
            .cloned()
            .ok_or_else(|| GatewayError::not_found(&manifest::normalize_kind(kind), name))
    }

    async fn list(
        &self,
        kind: &str,
        namespace: &str,
        selector: Option<&str>,
    ) -> GatewayResult<Vec<Value>> {
        let mut state = self.lock();
        state.take_injected("list")?;
        let kind = manifest::normalize_kind(kind);
        Ok(state
            .objects
            .iter()
            .filter(|((k, ns, _), obj)| {
                *k == kind
                    && ns == namespace
                    && selector.is_none_or(|s| manifest::selector_matches(s, &manifest::labels(obj)))
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn apply(&self, object: &Value) -> GatewayResult<()> {
        let mut state = self.lock();
        state.take_injected("apply")?;
        let kind = manifest::kind(object)
            .ok_or_else(|| GatewayError::InvalidManifest("missing kind".to_string()))?;
        let name = manifest::name(object)
            .ok_or_else(|| GatewayError::InvalidManifest("missing metadata.name".to_string()))?
            .to_string();
        state.ops.push(FakeOp::Apply {
            kind: kind.clone(),
            name: name.clone(),
        });
        let namespace = manifest::namespace(object).unwrap_or("default").to_string();
        if kind == "deployment"
            && let Some(previous) = state.objects.get(&key(&kind, &namespace, &name)).cloned()
        {
            state
                .history
                .entry(format!("{namespace}/{name}"))
                .or_default()
                .push(previous);
        }
        state.store(object.clone());
        Ok(())
    }

    async fn patch(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        patch: &Value,
    ) -> GatewayResult<()> {
        let mut state = self.lock();
        state.take_injected("patch")?;
        let k = key(kind, namespace, name);
        state.ops.push(FakeOp::Patch {
            kind: k.0.clone(),
            name: name.to_string(),
            patch: patch.clone(),
        });
        let Some(obj) = state.objects.get_mut(&k) else {
            return Err(GatewayError::not_found(&k.0, name));
        };
        manifest::merge_patch(obj, patch);
        Ok(())
    }

    async fn set_image(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        container: &str,
        image: &str,
    ) -> GatewayResult<()> {
        let mut state = self.lock();
        state.take_injected("set_image")?;
        state.ops.push(FakeOp::SetImage {
            name: name.to_string(),
            container: container.to_string(),
            image: image.to_string(),
        });
        let k = key(kind, namespace, name);
        let Some(current) = state.objects.get(&k).cloned() else {
            return Err(GatewayError::not_found(&k.0, name));
        };
        let mut updated = current.clone();
        if !manifest::set_container_image(&mut updated, container, image) {
            return Err(GatewayError::Permanent(format!(
                "unable to find container named {container:?}"
            )));
        }
        state
            .history
            .entry(format!("{namespace}/{name}"))
            .or_default()
            .push(current);
        state.store(updated);
        Ok(())
    }

    async fn delete(&self, kind: &str, name: &str, namespace: &str) -> GatewayResult<()> {
        let mut state = self.lock();
        state.take_injected("delete")?;
        let k = key(kind, namespace, name);
        state.ops.push(FakeOp::Delete {
            kind: k.0.clone(),
            name: name.to_string(),
        });
        if state.objects.remove(&k).is_none() {
            return Err(GatewayError::not_found(&k.0, name));
        }
        if k.0 == "deployment" {
            state.remove_pods(namespace, name);
        }
        Ok(())
    }

    async fn rollout_status(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        _timeout: Duration,
    ) -> GatewayResult<RolloutState> {
        let mut state = self.lock();
        state.take_injected("rollout_status")?;
        state.ops.push(FakeOp::RolloutStatus {
            name: name.to_string(),
        });
        let k = key(kind, namespace, name);
        if !state.objects.contains_key(&k) {
            return Err(GatewayError::not_found(&k.0, name));
        }
        if state.stalled.contains(name) {
            Ok(RolloutState::Timeout)
        } else {
            Ok(RolloutState::Ready)
        }
    }

    async fn rollout_undo(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        revision: Option<u32>,
    ) -> GatewayResult<()> {
        let mut state = self.lock();
        state.take_injected("rollout_undo")?;
        state.ops.push(FakeOp::Undo {
            name: name.to_string(),
            revision,
        });
        let k = key(kind, namespace, name);
        let Some(current) = state.objects.get(&k).cloned() else {
            return Err(GatewayError::not_found(&k.0, name));
        };
        let history_key = format!("{namespace}/{name}");
        let history = state.history.entry(history_key).or_default();
        let target = match revision {
            None => history.pop(),
            Some(n) => (n as usize)
                .checked_sub(1)
                .and_then(|i| history.get(i))
                .cloned(),
        };
        let Some(target) = target else {
            return Err(GatewayError::Permanent(format!(
                "no rollout history found for {name}"
            )));
        };
        history.push(current);
        state.store(target);
        Ok(())
    }

    async fn exec(
        &self,
        pod: &str,
        namespace: &str,
        command: &[String],
    ) -> GatewayResult<ExecOutput> {
        let handler = {
            let mut state = self.lock();
            state.take_injected("exec")?;
            state.ops.push(FakeOp::Exec {
                pod: pod.to_string(),
                command: command.to_vec(),
            });
            if !state.objects.contains_key(&key("pod", namespace, pod)) {
                return Err(GatewayError::not_found("pod", pod));
            }
            state.exec_handler.clone()
        };
        match handler {
            Some(handler) => handler(pod, command),
            None => Ok(ExecOutput {
                stdout: String::new(),
                stderr: format!("{}: command not found", command.first().map(String::as_str).unwrap_or("")),
                exit_code: 127,
            }),
        }
    }

    async fn logs(&self, pod: &str, _namespace: &str, _since: Duration) -> GatewayResult<String> {
        let mut state = self.lock();
        state.take_injected("logs")?;
        Ok(state.logs.get(pod).cloned().unwrap_or_default())
    }

    async fn probe_http(&self, url: &str, _timeout: Duration) -> GatewayResult<ProbeOutcome> {
        let mut state = self.lock();
        state.take_injected("probe_http")?;
        state.ops.push(FakeOp::Probe {
            url: url.to_string(),
        });
        let host = url
            .trim_start_matches("http://")
            .split(['/', ':'])
            .next()
            .unwrap_or_default()
            .to_string();
        let Some(owner) = state.pod_owner_by_ip(&host) else {
            return Err(GatewayError::Transient(format!("connect {host}: connection refused")));
        };
        let healthy = match state
            .scripted_probes
            .get_mut(&owner)
            .and_then(VecDeque::pop_front)
        {
            Some(scripted) => scripted,
            None => !state.unhealthy.contains(&owner),
        };
        Ok(ProbeOutcome {
            status: if healthy { 200 } else { 503 },
            latency: state.probe_latency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_with_api() -> FakeCluster {
        let fake = FakeCluster::new();
        fake.seed(deployment_manifest("prod", "api", "api", "api:v1", 2, &[("app", "api")]));
        fake
    }

    #[tokio::test]
    async fn deployments_spawn_ready_pods() {
        let fake = fake_with_api();
        let obj = fake.get("deployment", "api", "prod").await.unwrap();
        assert_eq!(manifest::replica_counts(&obj), (2, 2));
        let pods = fake.list("pods", "prod", Some("app=api")).await.unwrap();
        assert_eq!(pods.len(), 2);
        assert!(manifest::pod_ip(&pods[0]).is_some());
    }

    #[tokio::test]
    async fn set_image_then_undo_restores_previous() {
        let fake = fake_with_api();
        fake.set_image("deployment", "api", "prod", "api", "api:v2").await.unwrap();
        let obj = fake.get("deployment", "api", "prod").await.unwrap();
        assert_eq!(manifest::container_image(&obj, "api"), Some("api:v2"));

        fake.rollout_undo("deployment", "api", "prod", None).await.unwrap();
        let obj = fake.get("deployment", "api", "prod").await.unwrap();
        assert_eq!(manifest::container_image(&obj, "api"), Some("api:v1"));
    }

    #[tokio::test]
    async fn stalled_deployment_times_out() {
        let fake = fake_with_api();
        fake.stall("api");
        let state = fake
            .rollout_status("deployment", "api", "prod", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(state, RolloutState::Timeout);
        let obj = fake.get("deployment", "api", "prod").await.unwrap();
        assert_eq!(manifest::replica_counts(&obj), (2, 0));
    }

    #[tokio::test]
    async fn probes_follow_workload_health() {
        let fake = fake_with_api();
        let pods = fake.list("pod", "prod", None).await.unwrap();
        let url = format!("http://{}:8080/health", manifest::pod_ip(&pods[0]).unwrap());

        assert_eq!(fake.probe_http(&url, Duration::from_secs(1)).await.unwrap().status, 200);
        fake.set_healthy("api", false);
        assert_eq!(fake.probe_http(&url, Duration::from_secs(1)).await.unwrap().status, 503);
        fake.script_probes("api", [true]);
        assert_eq!(fake.probe_http(&url, Duration::from_secs(1)).await.unwrap().status, 200);
        assert_eq!(fake.probe_count(), 3);

        let err = fake
            .probe_http("http://10.9.9.9:8080/health", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn injected_errors_fire_once_in_order() {
        let fake = fake_with_api();
        fake.inject("get", [GatewayError::Transient("i/o timeout".to_string())]);
        assert!(fake.get("deployment", "api", "prod").await.unwrap_err().is_transient());
        assert!(fake.get("deployment", "api", "prod").await.is_ok());
    }

    #[tokio::test]
    async fn delete_removes_owned_pods() {
        let fake = fake_with_api();
        fake.delete("deploy", "api", "prod").await.unwrap();
        assert!(fake.pods_of("prod", "api").is_empty());
        assert!(
            fake.delete("deployment", "api", "prod")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn patch_merges_and_is_recorded() {
        let fake = FakeCluster::new();
        fake.seed(service_manifest("prod", "api", &[("app", "api"), ("color", "blue")]));
        fake.patch("service", "api", "prod", &json!({"spec": {"selector": {"color": "green"}}}))
            .await
            .unwrap();
        let svc = fake.object("svc", "prod", "api").unwrap();
        assert_eq!(svc.pointer("/spec/selector/color"), Some(&json!("green")));
        assert_eq!(svc.pointer("/spec/selector/app"), Some(&json!("api")));
        assert_eq!(fake.patches_to("service", "api").len(), 1);
    }
}
