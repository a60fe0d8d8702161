//! Suspension of automated node healing for the duration of a run.
//!
//! Node healing replaces nodes it considers unhealthy. Left enabled, it races
//! with the recycler removing nodes from the pool on purpose.

use tracing::{info, warn};

use crate::client::HealingControl;
use crate::error::RecycleError;

/// Handle restoring the pool's healing configuration.
///
/// `release` consumes the handle, so restoration happens at most once.
#[derive(Debug)]
#[must_use = "healing stays disabled until the gate is released"]
pub struct HealthGate {
    pool: String,
    prior: Option<bool>,
    suspended: bool,
    released: bool,
}

impl HealthGate {
    /// Read the pool's current override and disable healing.
    pub async fn engage<H>(api: &H, pool: &str) -> Result<Self, RecycleError>
    where
        H: HealingControl + ?Sized,
    {
        let gate_error = |source| RecycleError::HealthGate {
            pool: pool.to_string(),
            source,
        };

        let prior = api.healing_override(pool).await.map_err(gate_error)?;
        if prior == Some(false) {
            info!(pool, "Node healing already disabled for pool");
            return Ok(Self {
                pool: pool.to_string(),
                prior,
                suspended: false,
                released: false,
            });
        }

        api.set_healing(pool, false).await.map_err(gate_error)?;
        info!(pool, prior = ?prior, "Node healing suspended");

        Ok(Self {
            pool: pool.to_string(),
            prior,
            suspended: true,
            released: false,
        })
    }

    /// Override in place before the gate was engaged.
    pub fn prior(&self) -> Option<bool> {
        self.prior
    }

    /// Put the pool's healing configuration back the way it was.
    pub async fn release<H>(mut self, api: &H) -> Result<(), RecycleError>
    where
        H: HealingControl + ?Sized,
    {
        self.released = true;
        if !self.suspended {
            return Ok(());
        }

        let restored = match self.prior {
            Some(enabled) => api.set_healing(&self.pool, enabled).await,
            None => api.clear_healing(&self.pool).await,
        };

        match restored {
            Ok(()) => {
                info!(pool = %self.pool, prior = ?self.prior, "Node healing restored");
                Ok(())
            }
            Err(source) => Err(RecycleError::HealthGate {
                pool: self.pool.clone(),
                source,
            }),
        }
    }
}

impl Drop for HealthGate {
    fn drop(&mut self) {
        if self.suspended && !self.released {
            warn!(pool = %self.pool, "Health gate dropped without restoring node healing");
        }
    }
}
