//! kubedeploy-core - deploy Kubernetes manifests and verify the rollout
//!
//! This crate provides:
//! - **Cluster client**: structured invocations of the cluster CLI with an
//!   injectable subprocess runner
//! - **Template discovery**: enumerate, render, dry-run validate, and
//!   materialize manifest documents
//! - **Resources**: per-kind status interpretation with success/failure/
//!   timeout predicates and a transient Deployment → ReplicaSet → Pod tree
//! - **Deployer**: replace-then-apply strategy with a prune whitelist
//! - **Watcher**: timeout-bounded rollout polling
//! - **Orchestrator**: the validate → discover → predeploy → deploy →
//!   watch → verdict state machine

pub mod deployer;
pub mod discovery;
pub mod error;
pub mod events;
pub mod kubectl;
pub mod logger;
pub mod orchestrator;
pub mod renderer;
pub mod resource;
pub mod secrets;
pub mod watcher;

pub use deployer::{Deployer, PROTECTED_NAMESPACES};
pub use discovery::{DiscoveredResources, TemplateDiscovery};
pub use error::{DeployError, Result};
pub use events::{EventQuery, EventRecord};
pub use kubectl::{CommandExecutor, ExecResult, Kubectl, RunOptions, SystemExecutor};
pub use logger::{LogLevel, Logger};
pub use orchestrator::{DeployConfig, DeployTask, PREDEPLOY_SEQUENCE};
pub use renderer::{parse_binding_pairs, Bindings, JinjaRenderer, Renderer};
pub use resource::{DeployMethod, Found, KindState, Resource};
pub use secrets::{NoopProvisioner, SecretsProvisioner};
pub use watcher::ResourceWatcher;
