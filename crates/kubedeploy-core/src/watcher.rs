//! Polls in-flight resources until every one reports a terminal state
//!
//! Termination is guaranteed by per-resource timeouts: once a resource's
//! deploy has been running longer than its timeout, it counts as finished.

use std::collections::{HashMap, HashSet};
use std::thread;
use std::time::Duration;

use crate::error::Result;
use crate::kubectl::Kubectl;
use crate::logger::Logger;
use crate::resource::Resource;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);

pub struct ResourceWatcher<'a> {
    kubectl: &'a Kubectl,
    logger: &'a Logger,
    poll_interval: Duration,
}

impl<'a> ResourceWatcher<'a> {
    pub fn new(kubectl: &'a Kubectl, logger: &'a Logger) -> Self {
        Self {
            kubectl,
            logger,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Poll until every resource is finished, logging status transitions
    pub fn watch(&self, resources: &mut [&mut Resource]) -> Result<()> {
        let mut last_status: HashMap<String, String> = resources
            .iter()
            .map(|r| (r.id(), r.pretty_status()))
            .collect();
        let mut warned_generic: HashSet<String> = HashSet::new();

        loop {
            for resource in resources.iter().filter(|r| r.is_generic()) {
                if warned_generic.insert(resource.id()) {
                    self.logger.warn(&format!(
                        "Don't know how to monitor resources of type {}. Assuming {} deployed successfully.",
                        resource.kind,
                        resource.id()
                    ));
                }
            }

            if resources.iter().all(|r| r.deploy_finished()) {
                return Ok(());
            }

            thread::sleep(self.poll_interval);

            for resource in resources.iter_mut().filter(|r| !r.deploy_finished()) {
                resource.sync(self.kubectl)?;
                let status = resource.pretty_status();
                if last_status.get(&resource.id()).map(String::as_str) != Some(status.as_str()) {
                    self.logger.info(&status);
                    last_status.insert(resource.id(), status);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use chrono::Utc;

    use super::*;
    use crate::kubectl::testing::{FakeOutput, ScriptedExecutor};
    use crate::logger::{LogLevel, Logger};

    fn kubectl(executor: Arc<ScriptedExecutor>) -> Kubectl {
        Kubectl::with_executor("apps", "minikube", Logger::new(LogLevel::Error), false, executor)
    }

    fn fast_watcher<'a>(kubectl: &'a Kubectl, logger: &'a Logger) -> ResourceWatcher<'a> {
        ResourceWatcher::new(kubectl, logger).with_poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn test_watch_returns_once_resources_converge() {
        let executor = Arc::new(ScriptedExecutor::new());
        // Missing on the first poll, present afterwards
        executor.on(
            "get configmap app-config",
            FakeOutput::err("Error from server (NotFound)"),
        );
        executor.on("get configmap app-config", FakeOutput::ok("app-config   1   5s"));
        let kubectl = kubectl(executor.clone());
        let logger = Logger::new(LogLevel::Error);

        let mut cm = Resource::for_kind("ConfigMap", "app-config", "apps", "minikube", None);
        cm.deploy_started_at = Some(Utc::now());
        let mut resources = vec![&mut cm];
        fast_watcher(&kubectl, &logger).watch(&mut resources).unwrap();

        assert!(cm.deploy_succeeded());
        assert!(executor.calls_matching("get configmap").len() >= 2);
    }

    #[test]
    fn test_watch_terminates_on_timeout() {
        let executor = Arc::new(ScriptedExecutor::new());
        let kubectl = kubectl(executor);
        let logger = Logger::new(LogLevel::Error);

        let mut cm = Resource::for_kind("ConfigMap", "never-appears", "apps", "minikube", None);
        cm.timeout_override = Some(Duration::from_millis(20));
        cm.deploy_started_at = Some(Utc::now());

        let start = Instant::now();
        let mut resources = vec![&mut cm];
        fast_watcher(&kubectl, &logger).watch(&mut resources).unwrap();

        assert!(cm.deploy_timed_out());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_watch_returns_immediately_when_nothing_in_flight() {
        let executor = Arc::new(ScriptedExecutor::new());
        let kubectl = kubectl(executor.clone());
        let logger = Logger::new(LogLevel::Error);

        let mut cm = Resource::for_kind("ConfigMap", "app-config", "apps", "minikube", None);
        cm.found = crate::resource::Found::Present;
        let mut resources = vec![&mut cm];
        fast_watcher(&kubectl, &logger).watch(&mut resources).unwrap();

        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_generic_resources_are_assumed_successful() {
        let executor = Arc::new(ScriptedExecutor::new());
        let kubectl = kubectl(executor.clone());
        let logger = Logger::new(LogLevel::Error);

        let mut custom = Resource::for_kind("Frobnicator", "thing", "apps", "minikube", None);
        let mut resources = vec![&mut custom];
        fast_watcher(&kubectl, &logger).watch(&mut resources).unwrap();

        // Success was assumed without ever polling the cluster
        assert!(executor.calls.lock().unwrap().is_empty());
        assert!(custom.deploy_succeeded());
    }
}
