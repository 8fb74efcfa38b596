//! The central deploy entity and its per-kind status machinery
//!
//! A [`Resource`] is created per manifest document during discovery, or
//! transiently while syncing a parent (Deployment → ReplicaSet → Pod). The
//! kind-specific state lives in [`KindState`]; [`Resource::for_kind`] is the
//! only place kind tags are discriminated into state variants.

mod deployment;
mod pod;
mod replica_set;
mod service;

pub use deployment::{DeploymentState, RolloutCounts};
pub use pod::PodState;
pub use replica_set::ReplicaSetState;
pub use service::ServiceState;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::Result;
use crate::events::EventQuery;
use crate::kubectl::{Kubectl, RunOptions};

/// Timeout for ConfigMaps
const CONFIG_MAP_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for every other kind
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Whether the resource is known to exist on the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Found {
    #[default]
    Unknown,
    Present,
    Absent,
}

/// How the deployer submits this resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployMethod {
    /// Part of the single batched `apply -f …` call
    Apply,
    /// Individual `replace -f <file>`
    Replace,
    /// Individual `replace --force -f <file>`
    ReplaceForce,
}

/// Kind-specific state, rebuilt on every `sync`
#[derive(Debug, Clone)]
pub enum KindState {
    /// Unknown or custom kind: existence is verified, success is assumed
    Generic,
    /// Known kind whose success is its existence (ConfigMap, Ingress, …)
    Exists,
    Service(ServiceState),
    Deployment(DeploymentState),
    ReplicaSet(ReplicaSetState),
    Pod(PodState),
}

/// One deployable (or transitively discovered) cluster resource
#[derive(Debug, Clone)]
pub struct Resource {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub context: String,
    /// Materialized manifest; absent for transitively discovered children
    pub manifest_path: Option<PathBuf>,
    /// Display id of the owning resource, for children only
    pub parent: Option<String>,
    /// Set by the deployer immediately before the first CLI call
    pub deploy_started_at: Option<DateTime<Utc>>,
    /// Overrides the per-kind timeout table
    pub timeout_override: Option<Duration>,
    pub found: Found,
    /// Latest human-readable status line
    pub status: String,
    pub deploy_method: DeployMethod,
    pub state: KindState,
}

impl Resource {
    /// Dispatch a kind tag to the matching implementation. Unrecognized
    /// kinds get the generic treatment.
    pub fn for_kind(
        kind: &str,
        name: &str,
        namespace: &str,
        context: &str,
        manifest_path: Option<PathBuf>,
    ) -> Resource {
        let (canonical, state, method) = match kind.to_ascii_lowercase().as_str() {
            "configmap" => ("ConfigMap", KindState::Exists, DeployMethod::Apply),
            "ingress" => ("Ingress", KindState::Exists, DeployMethod::Apply),
            "persistentvolumeclaim" => {
                ("PersistentVolumeClaim", KindState::Exists, DeployMethod::Apply)
            }
            "podtemplate" => ("PodTemplate", KindState::Exists, DeployMethod::Apply),
            // apply cannot update PodDisruptionBudgets
            "poddisruptionbudget" => (
                "PodDisruptionBudget",
                KindState::Exists,
                DeployMethod::ReplaceForce,
            ),
            "service" => ("Service", KindState::Service(ServiceState::default()), DeployMethod::Apply),
            "deployment" => (
                "Deployment",
                KindState::Deployment(DeploymentState::default()),
                DeployMethod::Apply,
            ),
            "replicaset" => (
                "ReplicaSet",
                KindState::ReplicaSet(ReplicaSetState::default()),
                DeployMethod::Apply,
            ),
            "pod" => ("Pod", KindState::Pod(PodState::default()), DeployMethod::Apply),
            "cloudsql" => ("Cloudsql", KindState::Generic, DeployMethod::Replace),
            "redis" => ("Redis", KindState::Generic, DeployMethod::Replace),
            "bugsnag" => ("Bugsnag", KindState::Generic, DeployMethod::Replace),
            _ => (kind, KindState::Generic, DeployMethod::Apply),
        };

        Resource {
            kind: canonical.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            context: context.to_string(),
            manifest_path,
            parent: None,
            deploy_started_at: None,
            timeout_override: None,
            found: Found::Unknown,
            status: "Unknown".to_string(),
            deploy_method: method,
            state,
        }
    }

    /// Display id, unique per `(kind, name)` within the namespace
    pub fn id(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }

    /// Per-kind timeout (§ defaults: ConfigMap 30 s, everything else 5 min)
    pub fn timeout(&self) -> Duration {
        if let Some(timeout) = self.timeout_override {
            return timeout;
        }
        if self.kind == "ConfigMap" {
            CONFIG_MAP_TIMEOUT
        } else {
            DEFAULT_TIMEOUT
        }
    }

    pub fn is_generic(&self) -> bool {
        matches!(self.state, KindState::Generic)
    }

    /// Whether the resource is known to exist. A child ReplicaSet exists by
    /// construction: its parent just observed it.
    pub fn exists(&self) -> bool {
        match &self.state {
            KindState::ReplicaSet(_) if self.parent.is_some() => true,
            _ => self.found == Found::Present,
        }
    }

    /// Refresh status from the cluster. Idempotent and read-only.
    pub fn sync(&mut self, kubectl: &Kubectl) -> Result<()> {
        match self.state {
            KindState::Service(_) => service::sync(self, kubectl),
            KindState::Deployment(_) => deployment::sync(self, kubectl),
            KindState::ReplicaSet(_) => replica_set::sync(self, kubectl),
            KindState::Pod(_) => pod::sync(self, kubectl),
            KindState::Exists | KindState::Generic => self.sync_existence(kubectl),
        }
    }

    fn sync_existence(&mut self, kubectl: &Kubectl) -> Result<()> {
        let kind_arg = self.kind.to_lowercase();
        let result = kubectl.run(
            &["get", &kind_arg, &self.name],
            RunOptions::default().log_failure(false),
        )?;
        if result.success() {
            self.found = Found::Present;
            self.status = "Exists".to_string();
        } else {
            self.found = Found::Absent;
            self.status = "Not Found".to_string();
        }
        Ok(())
    }

    pub fn deploy_succeeded(&self) -> bool {
        match &self.state {
            KindState::Generic => true,
            KindState::Exists => self.exists(),
            KindState::Service(state) => state.succeeded(),
            KindState::Deployment(state) => state.succeeded(),
            KindState::ReplicaSet(state) => state.succeeded(),
            KindState::Pod(state) => state.succeeded(self.parent.is_some()),
        }
    }

    pub fn deploy_failed(&self) -> bool {
        match &self.state {
            KindState::Generic | KindState::Exists => false,
            KindState::Service(state) => state.failed(),
            KindState::Deployment(state) => state.failed(),
            KindState::ReplicaSet(state) => state.failed(),
            KindState::Pod(state) => state.failed(),
        }
    }

    pub fn deploy_timed_out(&self) -> bool {
        let started = match self.deploy_started_at {
            Some(started) => started,
            None => return false,
        };
        let limit = chrono::Duration::from_std(self.timeout())
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        if Utc::now().signed_duration_since(started) > limit {
            return true;
        }
        match &self.state {
            KindState::Deployment(state) => state
                .latest_rs
                .as_ref()
                .map_or(false, |rs| rs.deploy_timed_out()),
            KindState::ReplicaSet(state) => {
                !state.pods.is_empty() && state.pods.iter().all(|pod| pod.deploy_timed_out())
            }
            _ => false,
        }
    }

    /// The watcher stops polling a resource as soon as this is true
    pub fn deploy_finished(&self) -> bool {
        self.deploy_failed() || self.deploy_succeeded() || self.deploy_timed_out()
    }

    /// One status line for the logs
    pub fn pretty_status(&self) -> String {
        format!("{}: {}", self.id(), self.status)
    }

    /// Collect the seen cluster events for this resource. Read-only.
    pub fn fetch_events(&self, kubectl: &Kubectl) -> Result<IndexMap<String, Vec<String>>> {
        let query = EventQuery::new(&self.kind, &self.name);
        let template_arg = format!("--output=go-template={}", query.go_template());
        let result = kubectl.run(
            &["get", "events", &template_arg],
            RunOptions::default().log_failure(false),
        )?;
        if !result.success() {
            return Ok(IndexMap::new());
        }
        Ok(query.group_seen(&result.stdout, self.deploy_started_at))
    }

    /// Collect recent container logs, keyed `"<pod>/<container>"`.
    /// Deployments delegate to their latest ReplicaSet.
    pub fn fetch_logs(&self, kubectl: &Kubectl) -> Result<IndexMap<String, String>> {
        match &self.state {
            KindState::ReplicaSet(state) => replica_set::fetch_logs(self, state, kubectl),
            KindState::Pod(state) => {
                pod::fetch_logs(kubectl, &self.name, &state.containers, self.deploy_started_at)
            }
            KindState::Deployment(state) => match &state.latest_rs {
                Some(rs) => rs.fetch_logs(kubectl),
                None => Ok(IndexMap::new()),
            },
            _ => Ok(IndexMap::new()),
        }
    }

    /// Everything worth knowing about why this resource is not succeeding
    pub fn debug_message(&self, kubectl: &Kubectl) -> String {
        let reason = if self.deploy_failed() {
            "Deploy failed".to_string()
        } else if self.deploy_timed_out() {
            format!(
                "Timed out waiting for deploy to complete (timeout: {}s)",
                self.timeout().as_secs()
            )
        } else {
            "Deploy never succeeded".to_string()
        };

        let mut sections = vec![format!("{}: {}", self.id(), reason)];
        sections.push(format!("  - Status: {}", self.status));

        if let KindState::Service(state) = &self.state {
            if self.deploy_timed_out() {
                sections.push(format!(
                    "  - The service has {} endpoints; its selector is probably wrong \
                     or its pods never became ready",
                    state.endpoint_count
                ));
            }
        }

        if let Ok(events) = self.fetch_events(kubectl) {
            for (id, texts) in &events {
                sections.push(format!("  - Events for {}:", id));
                for text in texts {
                    sections.push(format!("      {}", text));
                }
            }
        }

        if let Ok(logs) = self.fetch_logs(kubectl) {
            for (source, text) in &logs {
                if text.trim().is_empty() {
                    continue;
                }
                sections.push(format!("  - Logs from {}:", source));
                for line in text.lines() {
                    sections.push(format!("      {}", line));
                }
            }
        }

        sections.join("\n")
    }
}

/// Format an RFC 3339 timestamp the CLI accepts for `--since-time`
pub(crate) fn since_time(started: DateTime<Utc>) -> String {
    started.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Render a label map as a `k=v,k=v` selector string
pub(crate) fn selector_string(labels: &Value) -> String {
    match labels.as_object() {
        Some(map) => map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|v| format!("{}={}", k, v)))
            .collect::<Vec<_>>()
            .join(","),
        None => String::new(),
    }
}

/// Whether `item` carries an ownerReference pointing at `uid`
pub(crate) fn owned_by(item: &Value, uid: &str) -> bool {
    item["metadata"]["ownerReferences"]
        .as_array()
        .map_or(false, |refs| {
            refs.iter().any(|r| r["uid"].as_str() == Some(uid))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(kind: &str) -> Resource {
        Resource::for_kind(kind, "app", "apps", "minikube", None)
    }

    #[test]
    fn test_factory_dispatches_known_kinds() {
        assert!(matches!(resource("ConfigMap").state, KindState::Exists));
        assert!(matches!(resource("Service").state, KindState::Service(_)));
        assert!(matches!(resource("Deployment").state, KindState::Deployment(_)));
        assert!(matches!(resource("ReplicaSet").state, KindState::ReplicaSet(_)));
        assert!(matches!(resource("Pod").state, KindState::Pod(_)));
        assert!(matches!(resource("Ingress").state, KindState::Exists));
    }

    #[test]
    fn test_factory_normalizes_kind_casing() {
        let res = resource("configmap");
        assert_eq!(res.kind, "ConfigMap");
        assert_eq!(res.id(), "ConfigMap/app");
    }

    #[test]
    fn test_factory_falls_back_to_generic() {
        let res = resource("Frobnicator");
        assert!(res.is_generic());
        assert_eq!(res.kind, "Frobnicator");
        assert_eq!(res.deploy_method, DeployMethod::Apply);
    }

    #[test]
    fn test_factory_is_idempotent() {
        let a = resource("Deployment");
        let b = resource("Deployment");
        assert_eq!(a.id(), b.id());
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.deploy_method, b.deploy_method);
        assert_eq!(a.timeout(), b.timeout());
        assert!(matches!(b.state, KindState::Deployment(_)));
    }

    #[test]
    fn test_custom_kinds_use_replace() {
        assert_eq!(resource("Cloudsql").deploy_method, DeployMethod::Replace);
        assert_eq!(resource("Redis").deploy_method, DeployMethod::Replace);
        assert_eq!(resource("Bugsnag").deploy_method, DeployMethod::Replace);
        assert_eq!(
            resource("PodDisruptionBudget").deploy_method,
            DeployMethod::ReplaceForce
        );
    }

    #[test]
    fn test_timeout_table() {
        assert_eq!(resource("ConfigMap").timeout(), Duration::from_secs(30));
        assert_eq!(resource("Deployment").timeout(), Duration::from_secs(300));
        assert_eq!(resource("Frobnicator").timeout(), Duration::from_secs(300));

        let mut overridden = resource("Cloudsql");
        overridden.timeout_override = Some(Duration::from_secs(60));
        assert_eq!(overridden.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_not_timed_out_before_deploy_started() {
        let mut res = resource("ConfigMap");
        res.timeout_override = Some(Duration::from_secs(0));
        assert!(!res.deploy_timed_out());

        res.deploy_started_at = Some(Utc::now() - chrono::Duration::seconds(5));
        assert!(res.deploy_timed_out());
    }

    #[test]
    fn test_generic_always_succeeds_and_never_fails() {
        let res = resource("Frobnicator");
        assert!(res.deploy_succeeded());
        assert!(!res.deploy_failed());
        assert!(res.deploy_finished());
    }

    #[test]
    fn test_exists_kind_success_tracks_existence() {
        let mut res = resource("ConfigMap");
        assert!(!res.deploy_succeeded());

        res.found = Found::Present;
        assert!(res.deploy_succeeded());
        assert!(!res.deploy_failed());
    }

    #[test]
    fn test_selector_string() {
        let labels = serde_json::json!({"app": "web", "tier": "frontend"});
        assert_eq!(selector_string(&labels), "app=web,tier=frontend");
        assert_eq!(selector_string(&serde_json::Value::Null), "");
    }

    #[test]
    fn test_owned_by() {
        let item = serde_json::json!({
            "metadata": {"ownerReferences": [{"uid": "abc-123"}]}
        });
        assert!(owned_by(&item, "abc-123"));
        assert!(!owned_by(&item, "other"));
        assert!(!owned_by(&serde_json::json!({"metadata": {}}), "abc-123"));
    }

    #[test]
    fn test_since_time_format() {
        let started = DateTime::parse_from_rfc3339("2017-05-12T18:23:26Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(since_time(started), "2017-05-12T18:23:26Z");
    }
}
