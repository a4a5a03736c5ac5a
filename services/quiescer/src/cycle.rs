//! Quiesce cycle executor.
//!
//! One cycle is: quiesce the path and wait until it is quiesced, hold for the
//! chosen duration, release the set. A release is only ever sent for a set
//! whose quiesce was acknowledged.

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::actor::{ActorState, StateTracker};
use crate::client::{quiesce_args, release_args, LeaderClient};
use crate::config::ActorConfig;
use crate::error::QuiesceError;
use crate::shutdown::StopListener;

/// How a cycle ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The set was quiesced, held and released.
    Released { set_id: String },

    /// Stop was signaled; no release was sent.
    Aborted,
}

#[derive(Debug, Deserialize)]
struct QuiesceResponse {
    sets: serde_json::Map<String, serde_json::Value>,
}

/// Extract the quiesce set id from a successful quiesce response.
///
/// A single-path quiesce reports exactly one set. Should a response ever carry
/// several, the lexicographically smallest id is tracked so the choice does not
/// depend on map enumeration order.
pub fn parse_set_id(stdout: &str) -> Result<String, QuiesceError> {
    let response: QuiesceResponse = serde_json::from_str(stdout)
        .map_err(|e| QuiesceError::MalformedResponse(e.to_string()))?;

    if response.sets.len() > 1 {
        warn!(
            count = response.sets.len(),
            "Quiesce response reported several sets, tracking the smallest id"
        );
    }

    response
        .sets
        .keys()
        .min()
        .cloned()
        .ok_or_else(|| QuiesceError::MalformedResponse("response has no quiesce sets".to_string()))
}

/// Runs quiesce/hold/release cycles for one path.
pub struct QuiesceCycle {
    client: LeaderClient,
    stop: StopListener,
    state: StateTracker,
    path: String,
    quiesce_timeout: u64,
    release_grace: Duration,
}

impl QuiesceCycle {
    pub fn new(
        client: LeaderClient,
        config: &ActorConfig,
        stop: StopListener,
        state: StateTracker,
    ) -> Self {
        Self {
            client,
            stop,
            state,
            path: config.path.clone(),
            quiesce_timeout: config.quiesce_timeout,
            release_grace: config.release_grace(),
        }
    }

    /// Run one cycle holding the quiesce for `duration_secs`.
    pub async fn run_cycle(&mut self, duration_secs: f64) -> Result<CycleOutcome, QuiesceError> {
        self.state.set(ActorState::Quiescing);

        let expiration = duration_secs + self.release_grace.as_secs_f64();
        let args = quiesce_args(&self.path, self.quiesce_timeout, expiration);
        let output = self.client.send(&args).await?;

        let output = match output {
            Some(output) if !self.stop.is_stopped() => output,
            _ => {
                info!(path = %self.path, "Stop requested while quiescing, aborting cycle");
                return Ok(CycleOutcome::Aborted);
            }
        };

        if !output.exit_code.is_success() {
            error!(
                path = %self.path,
                exit_code = %output.exit_code,
                stdout = %output.stdout,
                "Couldn't quiesce"
            );
            return Err(QuiesceError::Quiesce {
                path: self.path.clone(),
                code: output.exit_code,
            });
        }

        let set_id = parse_set_id(&output.stdout).inspect_err(|e| {
            error!(error = %e, stdout = %output.stdout, "Couldn't parse quiesce response");
        })?;

        info!(
            set_id = %set_id,
            duration_secs, "Successfully quiesced"
        );

        self.state.set(ActorState::Holding);
        if self.stop.sleep_secs(duration_secs).await {
            info!(set_id = %set_id, "Stop requested while holding, leaving release to cancel");
            return Ok(CycleOutcome::Aborted);
        }

        self.state.set(ActorState::Releasing);
        let Some(output) = self.client.send(&release_args(&set_id)).await? else {
            info!(set_id = %set_id, "Stop requested while releasing, aborting cycle");
            return Ok(CycleOutcome::Aborted);
        };

        if !output.exit_code.is_success() {
            error!(
                set_id = %set_id,
                exit_code = %output.exit_code,
                stdout = %output.stdout,
                "Couldn't release"
            );
            return Err(QuiesceError::Release {
                set_id,
                code: output.exit_code,
            });
        }

        info!(set_id = %set_id, "Released");
        Ok(CycleOutcome::Released { set_id })
    }
}
