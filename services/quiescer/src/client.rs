//! Leader-redirect command client.
//!
//! Quiesce commands must reach the node currently coordinating the quiesce
//! database. The client keeps a local belief about that node, follows "wrong
//! target" redirects, and falls back to a topology lookup when it has no usable
//! belief. There is no retry limit: the loop ends on a non-redirect response or
//! when the stop signal is raised.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::error::QuiesceError;
use crate::shutdown::StopListener;
use crate::transport::{CommandOutput, CommandRequest, CommandTransport, NodeId, Topology};

/// Wait between coordinator lookups and after a redirect that can't be
/// followed.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Arguments for quiescing `path`.
pub fn quiesce_args(path: &str, timeout_secs: u64, expiration_secs: f64) -> Vec<String> {
    vec![
        "quiesce".to_string(),
        "db".to_string(),
        path.to_string(),
        "--timeout".to_string(),
        timeout_secs.to_string(),
        "--expiration".to_string(),
        expiration_secs.to_string(),
        "--await".to_string(),
    ]
}

/// Arguments for releasing a quiesce set.
pub fn release_args(set_id: &str) -> Vec<String> {
    vec![
        "quiesce".to_string(),
        "db".to_string(),
        "--set-id".to_string(),
        set_id.to_string(),
        "--release".to_string(),
        "--await".to_string(),
    ]
}

/// Arguments for cancelling every outstanding quiesce set.
pub fn cancel_all_args() -> Vec<String> {
    ["quiesce", "db", "--cancel", "--all"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize)]
struct RedirectResponse {
    leader: u64,
}

/// Sends commands to the current quiesce coordinator.
pub struct LeaderClient {
    transport: Arc<dyn CommandTransport>,
    topology: Arc<dyn Topology>,
    stop: StopListener,
    leader: Option<NodeId>,
}

impl LeaderClient {
    /// Create a client with no coordinator belief.
    pub fn new(
        transport: Arc<dyn CommandTransport>,
        topology: Arc<dyn Topology>,
        stop: StopListener,
    ) -> Self {
        Self {
            transport,
            topology,
            stop,
            leader: None,
        }
    }

    /// Seed the coordinator belief.
    pub fn with_leader(mut self, leader: NodeId) -> Self {
        self.leader = Some(leader);
        self
    }

    /// Current coordinator belief.
    pub fn leader(&self) -> Option<NodeId> {
        self.leader
    }

    /// Send `args` to the coordinator, following redirects.
    ///
    /// Returns `Ok(None)` if stop was signaled before a final response was
    /// obtained. Any non-redirect response, successful or not, is returned as
    /// is. Only a transport failure is an error.
    pub async fn send(&mut self, args: &[String]) -> Result<Option<CommandOutput>, QuiesceError> {
        loop {
            let Some(leader) = self.resolve_leader().await else {
                return Ok(None);
            };
            if self.stop.is_stopped() {
                return Ok(None);
            }

            let request = CommandRequest {
                target: leader,
                args: args.to_vec(),
                one_shot: true,
            };
            info!(leader = %leader, command = %args.join(" "), "Running quiesce db command");

            let output = self
                .transport
                .execute(&request)
                .await
                .map_err(QuiesceError::Transport)?;

            if !output.exit_code.is_redirect() {
                return Ok(Some(output));
            }

            match serde_json::from_str::<RedirectResponse>(&output.stdout) {
                Ok(redirect) if NodeId(redirect.leader) == leader => {
                    // leadership is still moving; don't spin on the same node
                    warn!(leader = %leader, "Redirected to the current target, backing off");
                    if self.stop.sleep(RETRY_BACKOFF).await {
                        return Ok(None);
                    }
                }
                Ok(redirect) => {
                    let leader = NodeId(redirect.leader);
                    info!(leader = %leader, "Retrying quiesce db command with new leader");
                    self.leader = Some(leader);
                }
                Err(e) => {
                    error!(
                        error = %e,
                        stdout = %output.stdout,
                        "Couldn't parse redirect response"
                    );
                    self.leader = None;
                    if self.stop.sleep(RETRY_BACKOFF).await {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Return the believed coordinator, looking it up until found.
    ///
    /// `None` means stop was signaled first.
    async fn resolve_leader(&mut self) -> Option<NodeId> {
        loop {
            if self.stop.is_stopped() {
                return None;
            }
            if let Some(leader) = self.leader {
                return Some(leader);
            }

            match self.topology.current_coordinator().await {
                Ok(Some(leader)) => {
                    info!(leader = %leader, "Resolved quiesce db leader");
                    self.leader = Some(leader);
                    continue;
                }
                Ok(None) => warn!("Couldn't get quiesce db leader from the cluster map"),
                Err(e) => warn!(error = %e, "Quiesce db leader lookup failed"),
            }

            if self.stop.sleep(RETRY_BACKOFF).await {
                return None;
            }
        }
    }
}
