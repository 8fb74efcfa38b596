//! The top-level deploy state machine
//!
//! Phases run linearly: validate → confirm cluster → discover → initial
//! sync → secrets → predeploy priority kinds → main deploy → watch →
//! verdict. Any failure short-circuits into an error the CLI reports.

use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;

use crate::deployer::{Deployer, PROTECTED_NAMESPACES};
use crate::discovery::TemplateDiscovery;
use crate::error::{DeployError, Result};
use crate::kubectl::{Kubectl, RunOptions};
use crate::logger::Logger;
use crate::renderer::{Bindings, Renderer};
use crate::resource::Resource;
use crate::secrets::SecretsProvisioner;
use crate::watcher::{ResourceWatcher, DEFAULT_POLL_INTERVAL};

/// Kinds that must be fully converged, in this order, before the main
/// deploy begins
pub const PREDEPLOY_SEQUENCE: [&str; 6] = [
    "Cloudsql",
    "Redis",
    "Bugsnag",
    "ConfigMap",
    "PersistentVolumeClaim",
    "Pod",
];

/// Everything one deploy invocation needs to know
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub namespace: String,
    pub context: String,
    /// Current source commit, drives template bindings
    pub current_sha: String,
    pub template_dir: PathBuf,
    pub bindings: IndexMap<String, String>,
    pub kubeconfig: PathBuf,
    /// Watch the rollout and compute a verdict (off with `--skip-wait`)
    pub verify_result: bool,
    pub allow_protected_ns: bool,
    pub prune: bool,
}

pub struct DeployTask<'a> {
    config: DeployConfig,
    logger: &'a Logger,
    kubectl: Kubectl,
    renderer: &'a dyn Renderer,
    secrets: Option<&'a mut dyn SecretsProvisioner>,
    poll_interval: Duration,
}

impl<'a> DeployTask<'a> {
    pub fn new(config: DeployConfig, logger: &'a Logger, renderer: &'a dyn Renderer) -> Self {
        let kubectl = Kubectl::new(&config.namespace, &config.context, logger.clone(), true);
        Self::with_kubectl(config, logger, renderer, kubectl)
    }

    /// Create with a pre-built cluster client (used by tests to inject a
    /// scripted executor)
    pub fn with_kubectl(
        config: DeployConfig,
        logger: &'a Logger,
        renderer: &'a dyn Renderer,
        kubectl: Kubectl,
    ) -> Self {
        Self {
            config,
            logger,
            kubectl,
            renderer,
            secrets: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_secrets(mut self, provisioner: &'a mut dyn SecretsProvisioner) -> Self {
        self.secrets = Some(provisioner);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run the deploy to a verdict
    pub fn run(&mut self) -> Result<()> {
        self.logger.heading(&format!(
            "Deploying to namespace '{}' in context '{}'",
            self.config.namespace, self.config.context
        ));
        self.validate_configuration()?;
        self.confirm_cluster_reachable()?;

        self.logger.heading("Discovering templates");
        let bindings = Bindings::new(&self.config.current_sha, self.config.bindings.clone());
        let discovery =
            TemplateDiscovery::new(self.config.template_dir.clone(), bindings, self.renderer);
        let mut discovered = discovery.discover(&self.kubectl)?;
        let resources = &mut discovered.resources;
        for resource in resources.iter() {
            self.logger
                .info(&format!("Discovered template for {}", resource.id()));
        }

        self.logger.heading("Checking initial resource statuses");
        for resource in resources.iter_mut() {
            resource.sync(&self.kubectl)?;
            self.logger.info(&resource.pretty_status());
        }

        self.provision_secrets()?;
        self.predeploy_priority_resources(resources)?;

        self.logger.heading("Deploying all resources");
        {
            let mut all: Vec<&mut Resource> = resources.iter_mut().collect();
            Deployer::new(&self.kubectl, self.logger).deploy(&mut all, self.config.prune)?;
        }

        if !self.config.verify_result {
            self.logger
                .success("Deploy submitted (result verification skipped)");
            return Ok(());
        }

        self.logger.heading("Watching rollout");
        {
            let mut all: Vec<&mut Resource> = resources.iter_mut().collect();
            ResourceWatcher::new(&self.kubectl, self.logger)
                .with_poll_interval(self.poll_interval)
                .watch(&mut all)?;
        }

        let failing: Vec<&Resource> = resources
            .iter()
            .filter(|r| !r.deploy_succeeded())
            .collect();
        if failing.is_empty() {
            self.logger.success(&format!(
                "Successfully deployed {} resources",
                resources.len()
            ));
            return Ok(());
        }

        let failures = failing
            .iter()
            .map(|r| r.debug_message(&self.kubectl))
            .collect::<Vec<_>>();
        Err(DeployError::ResourceFailed {
            summary: format!("{} resources failed to deploy", failing.len()),
            failures,
        })
    }

    fn provision_secrets(&mut self) -> Result<()> {
        let logger = self.logger;
        if let Some(provisioner) = self.secrets.as_deref_mut() {
            if provisioner.changes_required()? {
                logger.heading("Provisioning secrets");
                provisioner.apply()?;
            }
        }
        Ok(())
    }

    /// Fully converge each priority kind before touching the next one
    fn predeploy_priority_resources(&self, resources: &mut Vec<Resource>) -> Result<()> {
        for kind in PREDEPLOY_SEQUENCE {
            let mut subset: Vec<&mut Resource> = resources
                .iter_mut()
                .filter(|r| r.kind == kind)
                .collect();
            if subset.is_empty() {
                continue;
            }

            self.logger
                .heading(&format!("Predeploying {} resources", kind));
            Deployer::new(&self.kubectl, self.logger).deploy(&mut subset, false)?;
            ResourceWatcher::new(&self.kubectl, self.logger)
                .with_poll_interval(self.poll_interval)
                .watch(&mut subset)?;

            let failures: Vec<String> = subset
                .iter()
                .filter(|r| !r.deploy_succeeded())
                .map(|r| r.debug_message(&self.kubectl))
                .collect();
            if !failures.is_empty() {
                return Err(DeployError::ResourceFailed {
                    summary: format!("predeploy of {} resources failed", kind),
                    failures,
                });
            }
        }
        Ok(())
    }

    /// Everything that can be rejected before any cluster contact
    fn validate_configuration(&self) -> Result<()> {
        if !self.config.kubeconfig.exists() {
            return Err(DeployError::invalid_config(format!(
                "kubeconfig not found at {}",
                self.config.kubeconfig.display()
            )));
        }
        if self.config.current_sha.trim().is_empty() {
            return Err(DeployError::invalid_config(
                "current SHA must be specified (set REVISION)",
            ));
        }
        if !self.config.template_dir.is_dir() {
            return Err(DeployError::invalid_config(format!(
                "template directory {} does not exist",
                self.config.template_dir.display()
            )));
        }
        if TemplateDiscovery::template_files(&self.config.template_dir).is_empty() {
            return Err(DeployError::invalid_config(format!(
                "no template files found in {}",
                self.config.template_dir.display()
            )));
        }
        if self.config.namespace.trim().is_empty() {
            return Err(DeployError::invalid_config("namespace must be specified"));
        }
        if PROTECTED_NAMESPACES.contains(&self.config.namespace.as_str()) {
            if self.config.prune {
                // Not even the override allows pruning a protected namespace
                return Err(DeployError::invalid_config(format!(
                    "refusing to deploy to protected namespace '{}' with prune enabled",
                    self.config.namespace
                )));
            }
            if !self.config.allow_protected_ns {
                return Err(DeployError::invalid_config(format!(
                    "namespace '{}' is protected; pass --allow-protected-ns to deploy to it anyway",
                    self.config.namespace
                )));
            }
            self.logger.warn(&format!(
                "deploying to protected namespace '{}'",
                self.config.namespace
            ));
        }
        if self.config.context.trim().is_empty() {
            return Err(DeployError::invalid_config("context must be specified"));
        }
        Ok(())
    }

    fn confirm_cluster_reachable(&self) -> Result<()> {
        let contexts = self
            .kubectl
            .run(&["config", "get-contexts", "-o", "name"], RunOptions::global())?;
        let context_known = contexts.success()
            && contexts
                .stdout
                .lines()
                .any(|line| line.trim() == self.config.context);
        if !context_known {
            return Err(DeployError::unreachable(format!(
                "context '{}' is not available in the kubeconfig",
                self.config.context
            )));
        }

        let namespace = self.kubectl.run(
            &["get", "namespace", &self.config.namespace],
            RunOptions::cluster_scoped(),
        )?;
        if !namespace.success() {
            return Err(DeployError::unreachable(format!(
                "namespace '{}' could not be confirmed: {}",
                self.config.namespace,
                namespace.stderr.trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::kubectl::testing::{FakeOutput, ScriptedExecutor};
    use crate::logger::{LogLevel, Logger};
    use crate::renderer::JinjaRenderer;

    struct Fixture {
        _dirs: (TempDir, TempDir),
        config: DeployConfig,
        executor: Arc<ScriptedExecutor>,
    }

    fn fixture(namespace: &str, templates: &[(&str, &str)]) -> Fixture {
        let template_dir = TempDir::new().unwrap();
        for (name, content) in templates {
            fs::write(template_dir.path().join(name), content).unwrap();
        }
        let home = TempDir::new().unwrap();
        let kubeconfig = home.path().join("kubeconfig");
        fs::write(&kubeconfig, "apiVersion: v1\n").unwrap();

        let config = DeployConfig {
            namespace: namespace.to_string(),
            context: "minikube".to_string(),
            current_sha: "abcdef0123456789".to_string(),
            template_dir: template_dir.path().to_path_buf(),
            bindings: IndexMap::new(),
            kubeconfig,
            verify_result: true,
            allow_protected_ns: false,
            prune: true,
        };
        Fixture {
            _dirs: (template_dir, home),
            config,
            executor: Arc::new(ScriptedExecutor::new()),
        }
    }

    fn reachable_cluster(executor: &ScriptedExecutor) {
        executor.on("config get-contexts", FakeOutput::ok("minikube\nother\n"));
        executor.on("get namespace", FakeOutput::ok("apps Active 1d"));
    }

    fn run_task(fixture: &mut Fixture) -> Result<()> {
        let logger = Logger::new(LogLevel::Error);
        let kubectl = Kubectl::with_executor(
            &fixture.config.namespace,
            &fixture.config.context,
            logger.clone(),
            false,
            fixture.executor.clone(),
        );
        let renderer = JinjaRenderer;
        let mut task =
            DeployTask::with_kubectl(fixture.config.clone(), &logger, &renderer, kubectl)
                .with_poll_interval(Duration::from_millis(1));
        task.run()
    }

    const CONFIG_MAP_TEMPLATE: &str = "kind: ConfigMap\nmetadata:\n  name: app-config\n";

    #[test]
    fn test_happy_path_config_map_only() {
        let mut fixture = fixture("apps", &[("cm.yml", CONFIG_MAP_TEMPLATE)]);
        fixture.config.prune = false;
        reachable_cluster(&fixture.executor);
        fixture
            .executor
            .on("cm-00.yml --dry-run", FakeOutput::ok("configmap/app-config\n"));
        fixture
            .executor
            .on("get configmap app-config", FakeOutput::ok("app-config 1 5s"));
        fixture.executor.on("apply", FakeOutput::ok("configured"));

        run_task(&mut fixture).unwrap();

        assert!(!fixture.executor.calls_matching("apply").is_empty());
    }

    #[test]
    fn test_protected_namespace_with_prune_rejected_before_cluster_contact() {
        let mut fixture = fixture("kube-system", &[("cm.yml", CONFIG_MAP_TEMPLATE)]);
        fixture.config.prune = true;
        fixture.config.allow_protected_ns = true;

        let err = run_task(&mut fixture).unwrap_err();
        assert!(matches!(err, DeployError::InvalidConfiguration(_)));
        assert!(fixture.executor.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_protected_namespace_requires_override() {
        let mut fixture = fixture("default", &[("cm.yml", CONFIG_MAP_TEMPLATE)]);
        fixture.config.prune = false;

        let err = run_task(&mut fixture).unwrap_err();
        assert!(matches!(err, DeployError::InvalidConfiguration(ref msg) if msg.contains("protected")));
    }

    #[test]
    fn test_missing_kubeconfig_is_invalid_configuration() {
        let mut fixture = fixture("apps", &[("cm.yml", CONFIG_MAP_TEMPLATE)]);
        fixture.config.kubeconfig = PathBuf::from("/definitely/not/here");

        let err = run_task(&mut fixture).unwrap_err();
        assert!(matches!(err, DeployError::InvalidConfiguration(ref msg) if msg.contains("kubeconfig")));
    }

    #[test]
    fn test_empty_template_dir_is_invalid_configuration() {
        let mut fixture = fixture("apps", &[]);
        let err = run_task(&mut fixture).unwrap_err();
        assert!(matches!(err, DeployError::InvalidConfiguration(ref msg) if msg.contains("template")));
    }

    #[test]
    fn test_unknown_context_is_cluster_unreachable() {
        let mut fixture = fixture("apps", &[("cm.yml", CONFIG_MAP_TEMPLATE)]);
        fixture.config.prune = false;
        fixture
            .executor
            .on("config get-contexts", FakeOutput::ok("other-context\n"));

        let err = run_task(&mut fixture).unwrap_err();
        assert!(matches!(err, DeployError::ClusterUnreachable(ref msg) if msg.contains("minikube")));
    }

    #[test]
    fn test_dry_run_rejection_surfaces_invalid_template() {
        let mut fixture = fixture(
            "apps",
            &[("bad.yml", "kind: Frobnicator\nmetadata:\n  name: what\n")],
        );
        fixture.config.prune = false;
        reachable_cluster(&fixture.executor);
        fixture.executor.on(
            "bad-00.yml --dry-run",
            FakeOutput::err("unknown kind Frobnicator"),
        );

        let err = run_task(&mut fixture).unwrap_err();
        match err {
            DeployError::InvalidTemplate { rendered, reason, .. } => {
                assert!(rendered.contains("Frobnicator"));
                assert!(reason.contains("Frobnicator"));
            }
            other => panic!("expected InvalidTemplate, got {:?}", other),
        }
        assert!(fixture.executor.calls_matching("apply").is_empty());
    }

    #[test]
    fn test_predeploy_converges_config_maps_before_main_apply() {
        let mut fixture = fixture(
            "apps",
            &[
                ("cm.yml", CONFIG_MAP_TEMPLATE),
                ("web.yml", "kind: Deployment\nmetadata:\n  name: web\n"),
            ],
        );
        fixture.config.prune = false;
        fixture.config.verify_result = false;
        reachable_cluster(&fixture.executor);
        fixture
            .executor
            .on("cm-00.yml --dry-run", FakeOutput::ok("configmap/app-config\n"));
        fixture
            .executor
            .on("web-00.yml --dry-run", FakeOutput::ok("deployment/web\n"));
        fixture
            .executor
            .on("get configmap app-config", FakeOutput::ok("app-config 1 5s"));
        fixture.executor.on("apply", FakeOutput::ok("configured"));

        run_task(&mut fixture).unwrap();

        let applies = fixture.executor.calls_matching("apply");
        assert_eq!(applies.len(), 2);
        // Predeploy batch carries only the ConfigMap; the Deployment waits
        // for the main apply
        assert!(applies[0].contains("cm-00.yml"));
        assert!(!applies[0].contains("web-00.yml"));
        assert!(applies[1].contains("web-00.yml"));

        let calls = fixture.executor.calls.lock().unwrap();
        let cm_status_check = calls
            .iter()
            .position(|c| c.contains("get configmap app-config"))
            .unwrap();
        let main_apply = calls
            .iter()
            .position(|c| c.contains("apply") && c.contains("web-00.yml"))
            .unwrap();
        assert!(cm_status_check < main_apply);
    }

    #[test]
    fn test_predeploy_kinds_run_in_priority_order() {
        let mut fixture = fixture(
            "apps",
            &[
                ("cm.yml", CONFIG_MAP_TEMPLATE),
                ("sql.yml", "kind: Cloudsql\nmetadata:\n  name: db\n"),
            ],
        );
        fixture.config.prune = false;
        fixture.config.verify_result = false;
        reachable_cluster(&fixture.executor);
        fixture
            .executor
            .on("cm-00.yml --dry-run", FakeOutput::ok("configmap/app-config\n"));
        fixture
            .executor
            .on("sql-00.yml --dry-run", FakeOutput::ok("cloudsql/db\n"));
        fixture
            .executor
            .on("get configmap app-config", FakeOutput::ok("app-config 1 5s"));
        fixture.executor.on("get cloudsql db", FakeOutput::ok("db 5s"));
        fixture.executor.on("replace", FakeOutput::ok("replaced"));
        fixture.executor.on("apply", FakeOutput::ok("configured"));

        run_task(&mut fixture).unwrap();

        // Cloudsql precedes ConfigMap in the priority sequence, so its
        // replace must land before the ConfigMap's predeploy apply
        let calls = fixture.executor.calls.lock().unwrap();
        let cloudsql_replace = calls
            .iter()
            .position(|c| c.contains("replace") && c.contains("sql-00.yml"))
            .unwrap();
        let config_map_apply = calls
            .iter()
            .position(|c| c.contains("apply") && c.contains("cm-00.yml"))
            .unwrap();
        assert!(cloudsql_replace < config_map_apply);
    }

    #[test]
    fn test_predeploy_sequence_is_stable() {
        assert_eq!(
            PREDEPLOY_SEQUENCE,
            [
                "Cloudsql",
                "Redis",
                "Bugsnag",
                "ConfigMap",
                "PersistentVolumeClaim",
                "Pod"
            ]
        );
    }

    #[test]
    fn test_skip_wait_succeeds_without_watching() {
        let mut fixture = fixture(
            "apps",
            &[("web.yml", "kind: Deployment\nmetadata:\n  name: web\n")],
        );
        fixture.config.prune = false;
        fixture.config.verify_result = false;
        reachable_cluster(&fixture.executor);
        fixture
            .executor
            .on("web-00.yml --dry-run", FakeOutput::ok("deployment/web\n"));
        fixture.executor.on("apply", FakeOutput::ok("configured"));

        // The deployment never becomes ready, but nobody asked
        run_task(&mut fixture).unwrap();
    }

    #[test]
    fn test_failed_predeploy_resource_aborts_with_debug_info() {
        let mut fixture = fixture(
            "apps",
            &[("migrate.yml", "kind: Pod\nmetadata:\n  name: migrate\n")],
        );
        fixture.config.prune = false;
        reachable_cluster(&fixture.executor);
        fixture
            .executor
            .on("migrate-00.yml --dry-run", FakeOutput::ok("pod/migrate\n"));
        fixture.executor.on("apply", FakeOutput::ok("configured"));
        let failed_pod = serde_json::json!({
            "status": {"phase": "Failed"},
            "spec": {"containers": [{"name": "migrate"}]}
        })
        .to_string();
        fixture
            .executor
            .on("get pod migrate", FakeOutput::ok(&failed_pod));

        let err = run_task(&mut fixture).unwrap_err();
        match err {
            DeployError::ResourceFailed { summary, failures } => {
                assert!(summary.contains("Pod"));
                assert_eq!(failures.len(), 1);
                assert!(failures[0].contains("Pod/migrate"));
            }
            other => panic!("expected ResourceFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_secrets_provisioner_applied_when_changes_required() {
        struct RecordingProvisioner {
            required: bool,
            applied: bool,
        }
        impl crate::secrets::SecretsProvisioner for RecordingProvisioner {
            fn changes_required(&self) -> Result<bool> {
                Ok(self.required)
            }
            fn apply(&mut self) -> Result<()> {
                self.applied = true;
                Ok(())
            }
        }

        let mut fixture = fixture("apps", &[("cm.yml", CONFIG_MAP_TEMPLATE)]);
        fixture.config.prune = false;
        reachable_cluster(&fixture.executor);
        fixture
            .executor
            .on("cm-00.yml --dry-run", FakeOutput::ok("configmap/app-config\n"));
        fixture
            .executor
            .on("get configmap app-config", FakeOutput::ok("app-config 1 5s"));
        fixture.executor.on("apply", FakeOutput::ok("configured"));

        let logger = Logger::new(LogLevel::Error);
        let kubectl = Kubectl::with_executor(
            "apps",
            "minikube",
            logger.clone(),
            false,
            fixture.executor.clone(),
        );
        let renderer = JinjaRenderer;
        let mut provisioner = RecordingProvisioner {
            required: true,
            applied: false,
        };
        let mut task =
            DeployTask::with_kubectl(fixture.config.clone(), &logger, &renderer, kubectl)
                .with_poll_interval(Duration::from_millis(1))
                .with_secrets(&mut provisioner);
        task.run().unwrap();

        assert!(provisioner.applied);
    }
}
