//! Exit codes for the kubernetes-deploy binary

#![allow(dead_code)]

/// Success - the deploy converged (or was submitted with --skip-wait)
pub const SUCCESS: i32 = 0;

/// Failure - configuration, template, apply, or rollout error
pub const ERROR: i32 = 1;
