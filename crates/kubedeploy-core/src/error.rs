//! Error types for kubedeploy-core

use thiserror::Error;

/// Result type for deploy operations
pub type Result<T> = std::result::Result<T, DeployError>;

/// Errors that can occur while running a deploy
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeployError {
    /// Configuration was rejected before any cluster contact
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The requested context or namespace could not be confirmed
    #[error("cluster unreachable: {0}")]
    ClusterUnreachable(String),

    /// A template failed to render, parse, or pass dry-run validation
    #[error("invalid template '{template}': {reason}")]
    InvalidTemplate {
        template: String,
        reason: String,
        /// The rendered content, for debugging
        rendered: String,
    },

    /// The batched `apply` call returned non-zero
    #[error("command `apply` failed: {message}")]
    ApplyFailed {
        message: String,
        /// Best-effort contents of the offending template
        debug: Option<String>,
    },

    /// An individual `replace` (and its create fallback) returned non-zero
    #[error("unable to replace {resource}: {message}")]
    ReplaceFailed { resource: String, message: String },

    /// At least one resource failed or timed out at the end of its phase
    #[error("{summary}")]
    ResourceFailed {
        summary: String,
        /// One debug message per failing resource
        failures: Vec<String>,
    },

    /// Template expansion error from the renderer
    #[error("failed to render template '{template}': {reason}")]
    Render { template: String, reason: String },

    /// Secrets provisioning error
    #[error("secrets provisioning failed: {0}")]
    Secrets(String),

    /// IO error (subprocess spawn, template read, temp file write)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// Create an invalid-configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        DeployError::InvalidConfiguration(message.into())
    }

    /// Create a cluster-unreachable error
    pub fn unreachable(message: impl Into<String>) -> Self {
        DeployError::ClusterUnreachable(message.into())
    }

    /// Additional debug payload worth printing after the primary message
    pub fn debug_info(&self) -> Option<String> {
        match self {
            DeployError::InvalidTemplate { rendered, .. } if !rendered.is_empty() => {
                Some(format!("Rendered template content:\n{}", rendered))
            }
            DeployError::ApplyFailed {
                debug: Some(debug), ..
            } => Some(debug.clone()),
            DeployError::ResourceFailed { failures, .. } if !failures.is_empty() => {
                Some(failures.join("\n\n"))
            }
            _ => None,
        }
    }
}
