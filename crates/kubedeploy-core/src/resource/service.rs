//! Service status: endpoint counting against the backing workload

use serde_json::Value;

use crate::error::Result;
use crate::kubectl::{Kubectl, RunOptions};

use super::{selector_string, Found, KindState, Resource};

#[derive(Debug, Clone, Default)]
pub struct ServiceState {
    /// Flattened count of subset addresses on the Endpoints object
    pub endpoint_count: usize,
    /// Desired endpoint count when the selector matches exactly one
    /// Deployment; otherwise any endpoint will do
    pub expected_endpoints: Option<i64>,
}

impl ServiceState {
    pub fn succeeded(&self) -> bool {
        match self.expected_endpoints {
            Some(expected) => self.endpoint_count as i64 == expected,
            None => self.endpoint_count > 0,
        }
    }

    pub fn failed(&self) -> bool {
        false
    }
}

pub(super) fn sync(res: &mut Resource, kubectl: &Kubectl) -> Result<()> {
    let result = kubectl.run(
        &["get", "service", &res.name, "--output=json"],
        RunOptions::default().log_failure(false),
    )?;
    if !result.success() {
        res.found = Found::Absent;
        res.status = "Not Found".to_string();
        res.state = KindState::Service(ServiceState::default());
        return Ok(());
    }
    res.found = Found::Present;

    let json: Value = serde_json::from_str(&result.stdout).unwrap_or(Value::Null);
    let mut state = ServiceState {
        endpoint_count: endpoint_count(res, kubectl)?,
        expected_endpoints: None,
    };

    let selector = selector_string(&json["spec"]["selector"]);
    if !selector.is_empty() {
        state.expected_endpoints = matching_deployment_replicas(&selector, kubectl)?;
    }

    res.status = match state.expected_endpoints {
        Some(expected) => format!("{} endpoints (expecting {})", state.endpoint_count, expected),
        None => format!("{} endpoints", state.endpoint_count),
    };
    res.state = KindState::Service(state);
    Ok(())
}

/// Flattened list of subset addresses, counted as whitespace tokens
fn endpoint_count(res: &Resource, kubectl: &Kubectl) -> Result<usize> {
    let result = kubectl.run(
        &[
            "get",
            "endpoints",
            &res.name,
            "--output=jsonpath={.subsets[*].addresses[*].ip}",
        ],
        RunOptions::default().log_failure(false),
    )?;
    if !result.success() {
        return Ok(0);
    }
    Ok(result.stdout.split_whitespace().count())
}

/// `spec.replicas` of the single Deployment selected by the service's
/// selector, if there is exactly one
fn matching_deployment_replicas(selector: &str, kubectl: &Kubectl) -> Result<Option<i64>> {
    let selector_arg = format!("--selector={}", selector);
    let result = kubectl.run(
        &["get", "deployments", &selector_arg, "--output=json"],
        RunOptions::default().log_failure(false),
    )?;
    if !result.success() {
        return Ok(None);
    }
    let list: Value = serde_json::from_str(&result.stdout).unwrap_or(Value::Null);
    match list["items"].as_array() {
        Some(items) if items.len() == 1 => Ok(items[0]["spec"]["replicas"].as_i64()),
        _ => Ok(None),
    }
}
