//! Deployment rollout status
//!
//! Each refresh rebuilds the transient ownership tree: the deployment JSON
//! identifies its latest ReplicaSet (owner UID plus matching revision
//! annotation), and that child is fed the blob directly so it only pays for
//! its own pod listing.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::kubectl::{Kubectl, RunOptions};

use super::{owned_by, replica_set, selector_string, Found, KindState, Resource};

const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

/// Replica counts merged from `status`, missing fields count as zero
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RolloutCounts {
    pub replicas: i64,
    pub updated: i64,
    pub available: i64,
    pub unavailable: i64,
}

#[derive(Debug, Clone, Default)]
pub struct DeploymentState {
    pub rollout: RolloutCounts,
    /// The ReplicaSet for the current revision, if one was identified
    pub latest_rs: Option<Box<Resource>>,
}

impl DeploymentState {
    pub fn succeeded(&self) -> bool {
        match &self.latest_rs {
            Some(rs) => {
                rs.deploy_succeeded()
                    && self.rollout.updated == self.rollout.replicas
                    && self.rollout.available == self.rollout.replicas
            }
            None => false,
        }
    }

    pub fn failed(&self) -> bool {
        self.latest_rs.as_ref().map_or(false, |rs| rs.deploy_failed())
    }
}

pub(super) fn sync(res: &mut Resource, kubectl: &Kubectl) -> Result<()> {
    let result = kubectl.run(
        &["get", "deployment", &res.name, "--output=json"],
        RunOptions::default().log_failure(false),
    )?;
    if !result.success() {
        res.found = Found::Absent;
        res.status = "Not Found".to_string();
        res.state = KindState::Deployment(DeploymentState::default());
        return Ok(());
    }
    res.found = Found::Present;

    let json: Value = serde_json::from_str(&result.stdout).unwrap_or(Value::Null);
    let status = &json["status"];
    let mut state = DeploymentState {
        rollout: RolloutCounts {
            replicas: status["replicas"].as_i64().unwrap_or(0),
            updated: status["updatedReplicas"].as_i64().unwrap_or(0),
            available: status["availableReplicas"].as_i64().unwrap_or(0),
            unavailable: status["unavailableReplicas"].as_i64().unwrap_or(0),
        },
        latest_rs: None,
    };

    if let Some(rs_json) = find_latest_replica_set(res, &json, kubectl)? {
        let rs_name = rs_json["metadata"]["name"].as_str().unwrap_or_default();
        let mut rs = Resource::for_kind("ReplicaSet", rs_name, &res.namespace, &res.context, None);
        rs.parent = Some(res.id());
        rs.deploy_started_at = res.deploy_started_at;
        replica_set::ingest(&mut rs, &rs_json, kubectl)?;
        state.latest_rs = Some(Box::new(rs));
    }

    res.status = format!(
        "{} replicas, {} updatedReplicas, {} availableReplicas, {} unavailableReplicas",
        state.rollout.replicas,
        state.rollout.updated,
        state.rollout.available,
        state.rollout.unavailable
    );
    res.state = KindState::Deployment(state);
    Ok(())
}

/// The latest ReplicaSet is owned by this deployment's UID and carries the
/// same revision annotation. First match wins.
fn find_latest_replica_set(
    res: &Resource,
    deployment_json: &Value,
    kubectl: &Kubectl,
) -> Result<Option<Value>> {
    let uid = deployment_json["metadata"]["uid"].as_str().unwrap_or_default();
    let revision = deployment_json["metadata"]["annotations"][REVISION_ANNOTATION].as_str();
    let selector = selector_string(&deployment_json["spec"]["selector"]["matchLabels"]);
    if uid.is_empty() || selector.is_empty() {
        return Ok(None);
    }

    let selector_arg = format!("--selector={}", selector);
    let result = kubectl.run(
        &["get", "replicasets", &selector_arg, "--output=json"],
        RunOptions::default().log_failure(false),
    )?;
    if !result.success() {
        return Ok(None);
    }

    let list: Value = serde_json::from_str(&result.stdout).unwrap_or(Value::Null);
    let items = match list["items"].as_array() {
        Some(items) => items,
        None => return Ok(None),
    };

    Ok(items
        .iter()
        .find(|item| {
            owned_by(item, uid)
                && item["metadata"]["annotations"][REVISION_ANNOTATION].as_str() == revision
        })
        .cloned())
}
