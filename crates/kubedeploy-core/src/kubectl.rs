//! Thin wrapper over the cluster CLI
//!
//! Every cluster interaction in this crate funnels through [`Kubectl::run`]:
//! one subprocess per call, stdout/stderr/exit captured, no retries. The
//! subprocess runner itself is injectable so tests can script responses.

use std::process::Command;
use std::sync::Arc;

use crate::error::{DeployError, Result};
use crate::logger::Logger;

/// Name of the cluster CLI binary
const KUBECTL_BINARY: &str = "kubectl";

/// Captured result of one CLI invocation
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Injectable subprocess runner
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, program: &str, args: &[String]) -> std::io::Result<ExecResult>;
}

/// Runs commands through `std::process`
pub struct SystemExecutor;

impl CommandExecutor for SystemExecutor {
    fn execute(&self, program: &str, args: &[String]) -> std::io::Result<ExecResult> {
        let output = Command::new(program).args(args).output()?;
        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code().unwrap_or(-1),
        })
    }
}

/// Per-call toggles for [`Kubectl::run`]
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Prepend `--namespace=<ns>` (off for e.g. `config get-contexts`)
    pub use_namespace: bool,
    /// Prepend `--context=<ctx>`
    pub use_context: bool,
    /// Echo non-zero exits to the logger; `None` uses the instance default
    pub log_failure: Option<bool>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            use_namespace: true,
            use_context: true,
            log_failure: None,
        }
    }
}

impl RunOptions {
    /// Options for calls that are scoped to neither namespace nor context
    pub fn global() -> Self {
        Self {
            use_namespace: false,
            use_context: false,
            log_failure: None,
        }
    }

    /// Options for context-scoped but not namespace-scoped calls
    pub fn cluster_scoped() -> Self {
        Self {
            use_namespace: false,
            use_context: true,
            log_failure: None,
        }
    }

    #[must_use]
    pub fn log_failure(mut self, log: bool) -> Self {
        self.log_failure = Some(log);
        self
    }
}

/// Structured access to the cluster CLI for one `(namespace, context)` pair
pub struct Kubectl {
    namespace: String,
    context: String,
    logger: Logger,
    log_failure_by_default: bool,
    executor: Arc<dyn CommandExecutor>,
}

impl Kubectl {
    pub fn new(namespace: &str, context: &str, logger: Logger, log_failure_by_default: bool) -> Self {
        Self::with_executor(
            namespace,
            context,
            logger,
            log_failure_by_default,
            Arc::new(SystemExecutor),
        )
    }

    /// Create with an injected subprocess runner
    pub fn with_executor(
        namespace: &str,
        context: &str,
        logger: Logger,
        log_failure_by_default: bool,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            context: context.to_string(),
            logger,
            log_failure_by_default,
            executor,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Run one CLI invocation. Exit status is surfaced as-is; no retries.
    pub fn run(&self, args: &[&str], opts: RunOptions) -> Result<ExecResult> {
        let mut full_args = Vec::with_capacity(args.len() + 2);
        if opts.use_namespace {
            full_args.push(format!("--namespace={}", self.namespace));
        }
        if opts.use_context {
            full_args.push(format!("--context={}", self.context));
        }
        full_args.extend(args.iter().map(|a| a.to_string()));

        self.logger
            .debug(&format!("Running: {} {}", KUBECTL_BINARY, full_args.join(" ")));

        let result = self.executor.execute(KUBECTL_BINARY, &full_args)?;

        if !result.success() && opts.log_failure.unwrap_or(self.log_failure_by_default) {
            self.logger.warn(&format!(
                "The following command failed: {} {}",
                KUBECTL_BINARY,
                full_args.join(" ")
            ));
            self.logger.warn(result.stderr.trim());
        }

        Ok(result)
    }

    /// Run with the default options (namespaced, in-context)
    pub fn run_default(&self, args: &[&str]) -> Result<ExecResult> {
        self.run(args, RunOptions::default())
    }

    /// Detect the cluster server version via `version --short`
    pub fn server_version(&self) -> Result<semver::Version> {
        let result = self.run(&["version", "--short"], RunOptions::cluster_scoped())?;
        if !result.success() {
            return Err(DeployError::unreachable(format!(
                "unable to detect server version: {}",
                result.stderr.trim()
            )));
        }

        for line in result.stdout.lines() {
            if let Some(raw) = line.strip_prefix("Server Version:") {
                let raw = raw.trim().trim_start_matches('v');
                return semver::Version::parse(raw).map_err(|e| {
                    DeployError::unreachable(format!("unparseable server version '{}': {}", raw, e))
                });
            }
        }

        Err(DeployError::unreachable(
            "server version missing from `version --short` output",
        ))
    }
}
