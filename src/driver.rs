//! Simulated traffic against a flood check.
//!
//! Sends a fixed number of requests for one identity with a random pause
//! between them, logging every decision. Errors are logged and the loop
//! carries on, leaving fail-open/fail-closed handling to the reader of the
//! log.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::config::DriverConfig;
use crate::floodcontrol::{Decision, FloodCheck, Identity};

/// Tally of a simulation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveSummary {
    pub allowed: u32,
    pub denied: u32,
    pub failed: u32,
}

impl DriveSummary {
    pub fn total(&self) -> u32 {
        self.allowed + self.denied + self.failed
    }
}

/// Run the simulation until all requests are sent or `shutdown` resolves.
pub async fn run<C, S>(check: &C, config: &DriverConfig, shutdown: S) -> DriveSummary
where
    C: FloodCheck + ?Sized,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let identity = Identity::new(config.identity.clone());
    let mut summary = DriveSummary::default();

    info!(
        identity = %identity,
        requests = config.request_count,
        "Running flood control simulation"
    );

    for i in 0..config.request_count {
        match check.check(&identity).await {
            Ok(Decision::Allowed) => {
                summary.allowed += 1;
                info!(i = i, identity = %identity, allowed = true, "Request checked");
            }
            Ok(Decision::Denied) => {
                summary.denied += 1;
                info!(i = i, identity = %identity, allowed = false, "Request checked");
            }
            Err(e) => {
                summary.failed += 1;
                warn!(i = i, identity = %identity, error = %e, "Request check failed");
            }
        }

        if i + 1 == config.request_count {
            break;
        }

        let pause = next_pause(config);
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = &mut shutdown => {
                info!("Simulation interrupted");
                break;
            }
        }
    }

    info!(
        allowed = summary.allowed,
        denied = summary.denied,
        failed = summary.failed,
        "Simulation finished"
    );
    summary
}

/// A uniformly random pause within the configured bounds.
fn next_pause(config: &DriverConfig) -> Duration {
    let ms = rand::thread_rng().gen_range(config.min_interval_ms..=config.max_interval_ms);
    Duration::from_millis(ms)
}
