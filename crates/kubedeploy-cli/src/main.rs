//! kubernetes-deploy - apply a directory of manifests and verify the rollout

use std::path::PathBuf;

use clap::Parser;
use indexmap::IndexMap;
use kubedeploy_core::{
    parse_binding_pairs, DeployConfig, DeployTask, JinjaRenderer, Logger, NoopProvisioner,
};
use miette::{miette, Result};

mod exit_codes;

#[derive(Parser)]
#[command(name = "kubernetes-deploy")]
#[command(version)]
#[command(about = "Deploy Kubernetes manifests and verify the rollout", long_about = None)]
struct Cli {
    /// Target namespace
    namespace: String,

    /// Target kubeconfig context
    context: String,

    /// Directory containing the manifest templates
    /// (default: config/deploy/$ENVIRONMENT)
    #[arg(long = "template-dir", value_name = "PATH")]
    template_dir: Option<PathBuf>,

    /// Extra template bindings (k1=v1,k2=v2)
    #[arg(long, value_name = "PAIRS")]
    bindings: Option<String>,

    /// Submit the deploy without watching it to a verdict
    #[arg(long = "skip-wait")]
    skip_wait: bool,

    /// Allow deploying to default, kube-system, or kube-public
    #[arg(long = "allow-protected-ns")]
    allow_protected_ns: bool,

    /// Disable pruning of resources absent from this deploy
    #[arg(long = "no-prune")]
    no_prune: bool,

    /// Prefix every log line with [namespace/context]
    #[arg(long = "verbose-log-prefix")]
    verbose_log_prefix: bool,
}

fn main() -> Result<()> {
    miette::set_panic_hook();
    let cli = Cli::parse();

    let mut logger = Logger::from_env();
    if cli.verbose_log_prefix {
        logger = logger.with_prefix(&cli.namespace, &cli.context);
    }

    let config = build_config(&cli)?;
    let renderer = JinjaRenderer;
    let mut secrets = NoopProvisioner;
    let mut task = DeployTask::new(config, &logger, &renderer).with_secrets(&mut secrets);

    match task.run() {
        Ok(()) => Ok(()),
        Err(err) => {
            logger.error(&format!("Deploy failed: {}", err));
            if let Some(debug) = err.debug_info() {
                logger.error(&debug);
            }
            std::process::exit(exit_codes::ERROR);
        }
    }
}

/// Wire CLI flags and environment variables into a deploy configuration
fn build_config(cli: &Cli) -> Result<DeployConfig> {
    let current_sha = std::env::var("REVISION")
        .map_err(|_| miette!("REVISION must be set to the current commit SHA"))?;

    let template_dir = match &cli.template_dir {
        Some(dir) => dir.clone(),
        None => {
            let environment = std::env::var("ENVIRONMENT").map_err(|_| {
                miette!("set ENVIRONMENT or pass --template-dir to locate the templates")
            })?;
            PathBuf::from("config/deploy").join(environment)
        }
    };

    let kubeconfig = std::env::var("KUBECONFIG")
        .map(PathBuf::from)
        .map_err(|_| miette!("KUBECONFIG must point at a kubeconfig file"))?;

    let bindings: IndexMap<String, String> = match &cli.bindings {
        Some(raw) => parse_binding_pairs(raw).map_err(|e| miette!("{}", e))?,
        None => IndexMap::new(),
    };

    Ok(DeployConfig {
        namespace: cli.namespace.clone(),
        context: cli.context.clone(),
        current_sha,
        template_dir,
        bindings,
        kubeconfig,
        verify_result: !cli.skip_wait,
        allow_protected_ns: cli.allow_protected_ns,
        prune: !cli.no_prune,
    })
}
