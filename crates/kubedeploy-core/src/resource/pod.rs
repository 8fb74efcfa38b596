//! Pod status classification

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::Result;
use crate::kubectl::{Kubectl, RunOptions};

use super::{since_time, Found, KindState, Resource};

/// Container waiting reasons that will not resolve on their own
const FATAL_WAITING_REASONS: [&str; 5] = [
    "CrashLoopBackOff",
    "ImagePullBackOff",
    "ErrImagePull",
    "CreateContainerConfigError",
    "RunContainerError",
];

#[derive(Debug, Clone, Default)]
pub struct PodState {
    pub phase: String,
    /// The `Ready` condition is `True`
    pub ready: bool,
    pub restart_count: i64,
    /// `PodScheduled` is `False` with reason `Unschedulable`
    pub unschedulable: bool,
    /// `"container '<name>': <reason>"` for fatal waiting states
    pub container_failures: Vec<String>,
    /// Container names from the pod spec, for log collection
    pub containers: Vec<String>,
}

impl PodState {
    /// A managed pod (owned by a ReplicaSet) succeeds when running and
    /// ready; a bare pod succeeds when it ran to completion.
    pub fn succeeded(&self, managed: bool) -> bool {
        if managed {
            self.phase == "Running" && self.ready
        } else {
            self.phase == "Succeeded"
        }
    }

    pub fn failed(&self) -> bool {
        self.phase == "Failed" || !self.container_failures.is_empty()
    }
}

pub(super) fn sync(res: &mut Resource, kubectl: &Kubectl) -> Result<()> {
    let result = kubectl.run(
        &["get", "pod", &res.name, "--output=json"],
        RunOptions::default().log_failure(false),
    )?;
    if !result.success() {
        res.found = Found::Absent;
        res.status = "Not Found".to_string();
        res.state = KindState::Pod(PodState::default());
        return Ok(());
    }
    let json: Value = serde_json::from_str(&result.stdout).unwrap_or(Value::Null);
    ingest(res, &json);
    Ok(())
}

/// Populate pod state from an already-fetched JSON blob
pub(super) fn ingest(res: &mut Resource, json: &Value) {
    res.found = Found::Present;

    let mut state = PodState {
        phase: json["status"]["phase"].as_str().unwrap_or("Unknown").to_string(),
        ..PodState::default()
    };

    if let Some(conditions) = json["status"]["conditions"].as_array() {
        for condition in conditions {
            match condition["type"].as_str() {
                Some("Ready") => {
                    state.ready = condition["status"].as_str() == Some("True");
                }
                Some("PodScheduled") => {
                    state.unschedulable = condition["status"].as_str() == Some("False")
                        && condition["reason"].as_str() == Some("Unschedulable");
                }
                _ => {}
            }
        }
    }

    if let Some(statuses) = json["status"]["containerStatuses"].as_array() {
        for status in statuses {
            state.restart_count += status["restartCount"].as_i64().unwrap_or(0);
            if let Some(reason) = status["state"]["waiting"]["reason"].as_str() {
                if FATAL_WAITING_REASONS.contains(&reason) {
                    let container = status["name"].as_str().unwrap_or("unknown");
                    state
                        .container_failures
                        .push(format!("container '{}': {}", container, reason));
                }
            }
        }
    }

    if let Some(containers) = json["spec"]["containers"].as_array() {
        state.containers = containers
            .iter()
            .filter_map(|c| c["name"].as_str().map(String::from))
            .collect();
    }

    res.status = if !state.container_failures.is_empty() {
        format!("{} ({})", state.phase, state.container_failures.join(", "))
    } else if state.unschedulable {
        format!("{} (Unschedulable)", state.phase)
    } else if state.ready {
        format!("{} (Ready)", state.phase)
    } else {
        state.phase.clone()
    };
    res.state = KindState::Pod(state);
}

/// One `logs` invocation per container, keyed `"<pod>/<container>"`
pub(super) fn fetch_logs(
    kubectl: &Kubectl,
    pod_name: &str,
    containers: &[String],
    deploy_started_at: Option<DateTime<Utc>>,
) -> Result<IndexMap<String, String>> {
    let mut logs = IndexMap::new();
    for container in containers {
        let container_arg = format!("--container={}", container);
        let since_arg = deploy_started_at.map(|started| format!("--since-time={}", since_time(started)));
        let mut args: Vec<&str> = vec!["logs", pod_name, container_arg.as_str()];
        if let Some(since) = since_arg.as_deref() {
            args.push(since);
        }
        args.push("--tail=250");

        let result = kubectl.run(&args, RunOptions::default().log_failure(false))?;
        if result.success() {
            logs.insert(format!("{}/{}", pod_name, container), result.stdout);
        }
    }
    Ok(logs)
}
