//! Secrets provisioning seam
//!
//! Secret material comes from outside this crate. The orchestrator only
//! needs two questions answered, so that is the whole contract.

use crate::error::Result;

/// External secrets provisioner
pub trait SecretsProvisioner {
    /// Whether the cluster's secrets are out of date with the source
    fn changes_required(&self) -> Result<bool>;

    /// Bring the cluster's secrets up to date
    fn apply(&mut self) -> Result<()>;
}

/// Provisioner for deploys that manage no secrets
pub struct NoopProvisioner;

impl SecretsProvisioner for NoopProvisioner {
    fn changes_required(&self) -> Result<bool> {
        Ok(false)
    }

    fn apply(&mut self) -> Result<()> {
        Ok(())
    }
}
