//! Deploy strategy execution
//!
//! Resources needing `replace` get individual CLI calls first; everything
//! else goes out in one monolithic `apply` batch. Each resource's
//! `deploy_started_at` is stamped immediately before its first CLI call,
//! which is the sole basis for timeout accounting.

use std::fs;

use chrono::Utc;
use regex::Regex;

use crate::error::{DeployError, Result};
use crate::kubectl::{Kubectl, RunOptions};
use crate::logger::Logger;
use crate::resource::{DeployMethod, Resource};

/// Namespaces that must never be deployed to with prune enabled
pub const PROTECTED_NAMESPACES: [&str; 3] = ["default", "kube-system", "kube-public"];

/// Kinds eligible for pruning, stable across server versions
const BASE_PRUNE_WHITELIST: [&str; 8] = [
    "core/v1/ConfigMap",
    "core/v1/Pod",
    "core/v1/Service",
    "batch/v1/Job",
    "extensions/v1beta1/DaemonSet",
    "extensions/v1beta1/Deployment",
    "extensions/v1beta1/Ingress",
    "apps/v1beta1/StatefulSet",
];

/// HPA moved API groups after server 1.5
const PRUNE_WHITELIST_HPA_1_5: &str = "extensions/v1beta1/HorizontalPodAutoscaler";
const PRUNE_WHITELIST_HPA_DEFAULT: &str = "autoscaling/v1/HorizontalPodAutoscaler";

pub struct Deployer<'a> {
    kubectl: &'a Kubectl,
    logger: &'a Logger,
}

impl<'a> Deployer<'a> {
    pub fn new(kubectl: &'a Kubectl, logger: &'a Logger) -> Self {
        Self { kubectl, logger }
    }

    /// Deploy the given resources: individual replaces first, then the
    /// apply batch. Prune is only ever attached to the batch.
    pub fn deploy(&self, resources: &mut [&mut Resource], prune: bool) -> Result<()> {
        if prune && PROTECTED_NAMESPACES.contains(&self.kubectl.namespace()) {
            return Err(DeployError::invalid_config(format!(
                "refusing to deploy to protected namespace '{}' with prune enabled",
                self.kubectl.namespace()
            )));
        }

        for resource in resources
            .iter_mut()
            .filter(|r| r.deploy_method != DeployMethod::Apply)
        {
            self.replace(resource)?;
        }
        self.apply_batch(resources, prune)
    }

    /// `replace` one resource, falling back to `create` when it does not
    /// exist yet
    fn replace(&self, resource: &mut Resource) -> Result<()> {
        let path = match &resource.manifest_path {
            Some(path) => path.clone(),
            None => return Ok(()),
        };
        let path_arg = path.to_string_lossy().into_owned();

        resource.deploy_started_at = Some(Utc::now());
        self.logger.info(&format!("Replacing {}", resource.id()));

        let args: Vec<&str> = match resource.deploy_method {
            DeployMethod::Replace => vec!["replace", "-f", &path_arg],
            DeployMethod::ReplaceForce => vec!["replace", "--force", "-f", &path_arg],
            DeployMethod::Apply => return Ok(()),
        };
        let result = self
            .kubectl
            .run(&args, RunOptions::default().log_failure(false))?;
        if result.success() {
            return Ok(());
        }

        if result.stderr.contains("NotFound") || result.stderr.contains("not found") {
            self.logger.info(&format!(
                "{} does not exist yet, creating it instead",
                resource.id()
            ));
            let created = self
                .kubectl
                .run(&["create", "-f", &path_arg], RunOptions::default().log_failure(false))?;
            if created.success() {
                return Ok(());
            }
            return Err(DeployError::ReplaceFailed {
                resource: resource.id(),
                message: created.stderr.trim().to_string(),
            });
        }

        Err(DeployError::ReplaceFailed {
            resource: resource.id(),
            message: result.stderr.trim().to_string(),
        })
    }

    /// The single batched apply call. Never split.
    fn apply_batch(&self, resources: &mut [&mut Resource], prune: bool) -> Result<()> {
        let mut args = vec!["apply".to_string()];
        let mut count = 0usize;
        for resource in resources
            .iter_mut()
            .filter(|r| r.deploy_method == DeployMethod::Apply)
        {
            let path = match &resource.manifest_path {
                Some(path) => path.clone(),
                None => continue,
            };
            resource.deploy_started_at = Some(Utc::now());
            args.push("-f".to_string());
            args.push(path.to_string_lossy().into_owned());
            count += 1;
        }
        if count == 0 {
            return Ok(());
        }

        if prune {
            args.push("--prune".to_string());
            args.push("--all".to_string());
            for entry in self.prune_whitelist() {
                args.push(format!("--prune-whitelist={}", entry));
            }
        }

        self.logger.info(&format!(
            "Applying {} resources{}",
            count,
            if prune { " with prune" } else { "" }
        ));
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let result = self
            .kubectl
            .run(&arg_refs, RunOptions::default().log_failure(false))?;
        if result.success() {
            return Ok(());
        }

        Err(DeployError::ApplyFailed {
            message: result.stderr.trim().to_string(),
            debug: Some(apply_failure_debug(&result.stderr)),
        })
    }

    /// Prunable kinds for the detected server version. New server versions
    /// fall into the default bucket.
    fn prune_whitelist(&self) -> Vec<String> {
        let hpa = match self.kubectl.server_version() {
            Ok(version) if version.major == 1 && version.minor == 5 => PRUNE_WHITELIST_HPA_1_5,
            _ => PRUNE_WHITELIST_HPA_DEFAULT,
        };
        BASE_PRUNE_WHITELIST
            .iter()
            .map(|entry| entry.to_string())
            .chain(std::iter::once(hpa.to_string()))
            .collect()
    }
}

/// Best-effort extraction of the offending template from apply stderr
fn apply_failure_debug(stderr: &str) -> String {
    let path_pattern = Regex::new(r"/\S+?\.ya?ml").expect("pattern is valid");
    if let Some(found) = path_pattern.find(stderr) {
        if let Ok(content) = fs::read_to_string(found.as_str()) {
            return format!("Offending template ({}):\n{}", found.as_str(), content);
        }
    }
    format!(
        "One of your templates is invalid. kubectl apply output:\n{}",
        stderr.trim()
    )
}
