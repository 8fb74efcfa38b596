//! ReplicaSet status: replica counts plus the owned pod set
//!
//! A ReplicaSet is either standalone (discovered from its own manifest and
//! synced with its own fetch) or a child fed its JSON by a parent
//! Deployment. Either way the owned pods are re-listed on every refresh.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::Result;
use crate::kubectl::{Kubectl, RunOptions};

use super::{owned_by, pod, selector_string, Found, KindState, Resource};

#[derive(Debug, Clone, Default)]
pub struct ReplicaSetState {
    pub uid: String,
    pub replicas: i64,
    pub available: i64,
    pub ready: i64,
    /// Pods owned by this ReplicaSet's UID, including non-running ones
    pub pods: Vec<Resource>,
    /// Container names from the pod template, for log collection
    pub containers: Vec<String>,
}

impl ReplicaSetState {
    pub fn succeeded(&self) -> bool {
        self.replicas == self.available && self.replicas == self.ready
    }

    pub fn failed(&self) -> bool {
        !self.pods.is_empty() && self.pods.iter().all(|pod| pod.deploy_failed())
    }
}

pub(super) fn sync(res: &mut Resource, kubectl: &Kubectl) -> Result<()> {
    let result = kubectl.run(
        &["get", "replicaset", &res.name, "--output=json"],
        RunOptions::default().log_failure(false),
    )?;
    if !result.success() {
        res.found = Found::Absent;
        res.status = "Not Found".to_string();
        res.state = KindState::ReplicaSet(ReplicaSetState::default());
        return Ok(());
    }
    let json: Value = serde_json::from_str(&result.stdout).unwrap_or(Value::Null);
    ingest(res, &json, kubectl)
}

/// Populate state from an already-fetched JSON blob, then list the owned
/// pods (the one extra fetch a refresh needs).
pub(super) fn ingest(res: &mut Resource, json: &Value, kubectl: &Kubectl) -> Result<()> {
    res.found = Found::Present;

    let status = &json["status"];
    let mut state = ReplicaSetState {
        uid: json["metadata"]["uid"].as_str().unwrap_or_default().to_string(),
        replicas: status["replicas"].as_i64().unwrap_or(0),
        available: status["availableReplicas"].as_i64().unwrap_or(0),
        ready: status["readyReplicas"].as_i64().unwrap_or(0),
        ..ReplicaSetState::default()
    };

    if let Some(containers) = json["spec"]["template"]["spec"]["containers"].as_array() {
        state.containers = containers
            .iter()
            .filter_map(|c| c["name"].as_str().map(String::from))
            .collect();
    }

    let selector = selector_string(&json["spec"]["selector"]["matchLabels"]);
    if !selector.is_empty() && !state.uid.is_empty() {
        let selector_arg = format!("--selector={}", selector);
        // -a includes pods that are no longer running
        let result = kubectl.run(
            &["get", "pods", "-a", &selector_arg, "--output=json"],
            RunOptions::default().log_failure(false),
        )?;
        if result.success() {
            let pod_list: Value = serde_json::from_str(&result.stdout).unwrap_or(Value::Null);
            if let Some(items) = pod_list["items"].as_array() {
                for item in items.iter().filter(|item| owned_by(item, &state.uid)) {
                    let pod_name = item["metadata"]["name"].as_str().unwrap_or_default();
                    let mut tracked =
                        Resource::for_kind("Pod", pod_name, &res.namespace, &res.context, None);
                    tracked.parent = Some(res.id());
                    tracked.deploy_started_at = res.deploy_started_at;
                    pod::ingest(&mut tracked, item);
                    state.pods.push(tracked);
                }
            }
        }
    }

    res.status = format!(
        "{} replicas, {} availableReplicas, {} readyReplicas",
        state.replicas, state.available, state.ready
    );
    res.state = KindState::ReplicaSet(state);
    Ok(())
}

/// Logs from the most interesting owned pod: the first failed one, or the
/// first one otherwise.
pub(super) fn fetch_logs(
    res: &Resource,
    state: &ReplicaSetState,
    kubectl: &Kubectl,
) -> Result<IndexMap<String, String>> {
    let pod = state
        .pods
        .iter()
        .find(|pod| pod.deploy_failed())
        .or_else(|| state.pods.first());
    let pod = match pod {
        Some(pod) => pod,
        None => return Ok(IndexMap::new()),
    };
    pod::fetch_logs(kubectl, &pod.name, &state.containers, res.deploy_started_at)
}
