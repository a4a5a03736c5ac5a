//! Cluster command transport and topology interfaces.
//!
//! The quiescer only depends on these seams:
//! - `CommandTransport` delivers an admin command to one cluster node
//! - `Topology` answers which node currently coordinates quiesce commands
//!
//! A scripted in-memory cluster is provided for testing and development.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ExitCode;

/// Identifier of a cluster node able to coordinate quiesce commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A command addressed to a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Node the command is sent to.
    pub target: NodeId,

    /// Command arguments, starting with `quiesce db`.
    pub args: Vec<String>,

    /// Bound the call so a node dying mid-command cannot block the caller forever.
    pub one_shot: bool,
}

impl CommandRequest {
    /// Value following `flag` in the arguments.
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    pub fn is_release(&self) -> bool {
        self.has_flag("--release")
    }

    pub fn is_cancel(&self) -> bool {
        self.has_flag("--cancel")
    }

    pub fn is_quiesce(&self) -> bool {
        !self.is_release() && !self.is_cancel()
    }
}

/// Result of running a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: ExitCode,
    pub stdout: String,
}

impl CommandOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>) -> Self {
        Self {
            exit_code: ExitCode(exit_code),
            stdout: stdout.into(),
        }
    }

    pub fn success(stdout: impl Into<String>) -> Self {
        Self::new(0, stdout)
    }

    /// "Wrong target" response pointing at `leader`.
    pub fn redirect(leader: NodeId) -> Self {
        Self {
            exit_code: ExitCode::WRONG_TARGET,
            stdout: serde_json::json!({ "leader": leader.0 }).to_string(),
        }
    }
}

/// Delivers admin commands to cluster nodes.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Execute a command on `request.target`.
    ///
    /// `Err` means the command could not be run at all; a command that ran and
    /// failed reports it through the exit code.
    async fn execute(&self, request: &CommandRequest) -> Result<CommandOutput>;
}

/// Cluster topology lookup.
#[async_trait]
pub trait Topology: Send + Sync {
    /// The node currently coordinating quiesce commands, if any.
    async fn current_coordinator(&self) -> Result<Option<NodeId>>;
}

// =============================================================================
// Mock Cluster
// =============================================================================

/// A command observed by [`MockCluster`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: CommandRequest,
    pub at: Instant,
}

type ExecuteHook = Box<dyn Fn(&CommandRequest) + Send + Sync>;

/// In-memory cluster for testing and development.
///
/// Behaves like a single coordinator: commands sent to any other node get a
/// redirect, quiesce requests create numbered sets, releases and cancels
/// succeed. Scripted responses queued with [`MockCluster::push_response`] take
/// precedence over the simulated behavior.
pub struct MockCluster {
    /// Node answering quiesce commands.
    leader: Mutex<Option<NodeId>>,

    /// Node reported by topology lookups, when it differs from the leader.
    advertised: Mutex<Option<Option<NodeId>>>,

    /// Responses returned before falling back to simulation.
    scripted: Mutex<VecDeque<CommandOutput>>,

    /// Exit code returned for every quiesce request, if set.
    quiesce_failure: Mutex<Option<i32>>,

    /// Invoked on every command before it is answered.
    hook: Mutex<Option<ExecuteHook>>,

    calls: Mutex<Vec<RecordedCall>>,
    topology_queries: AtomicU64,
    set_counter: AtomicU64,
}

impl MockCluster {
    /// Create a mock cluster coordinated by `leader`.
    pub fn new(leader: NodeId) -> Self {
        Self {
            leader: Mutex::new(Some(leader)),
            advertised: Mutex::new(None),
            scripted: Mutex::new(VecDeque::new()),
            quiesce_failure: Mutex::new(None),
            hook: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            topology_queries: AtomicU64::new(0),
            set_counter: AtomicU64::new(0),
        }
    }

    /// Change the coordinator.
    pub fn set_leader(&self, leader: Option<NodeId>) {
        *lock(&self.leader) = leader;
    }

    /// Make topology lookups report `node` regardless of the real coordinator.
    pub fn advertise(&self, node: Option<NodeId>) {
        *lock(&self.advertised) = Some(node);
    }

    /// Queue a response for the next command.
    pub fn push_response(&self, output: CommandOutput) {
        lock(&self.scripted).push_back(output);
    }

    /// Fail every quiesce request with `exit_code`.
    pub fn fail_quiesce_with(&self, exit_code: i32) {
        *lock(&self.quiesce_failure) = Some(exit_code);
    }

    /// Run `hook` on every command before answering it.
    pub fn on_execute(&self, hook: impl Fn(&CommandRequest) + Send + Sync + 'static) {
        *lock(&self.hook) = Some(Box::new(hook));
    }

    /// All commands observed so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn topology_queries(&self) -> u64 {
        self.topology_queries.load(Ordering::SeqCst)
    }

    fn simulate(&self, request: &CommandRequest) -> CommandOutput {
        let leader = *lock(&self.leader);
        match leader {
            Some(leader) if leader != request.target => return CommandOutput::redirect(leader),
            None => return CommandOutput::new(-libc::EHOSTUNREACH, ""),
            Some(_) => {}
        }

        if request.is_release() || request.is_cancel() {
            return CommandOutput::success("{}");
        }

        if let Some(code) = *lock(&self.quiesce_failure) {
            return CommandOutput::new(code, "");
        }

        let n = self.set_counter.fetch_add(1, Ordering::SeqCst);
        let set_id = format!("set_{:08x}", n);
        let mut sets = serde_json::Map::new();
        sets.insert(
            set_id,
            serde_json::json!({ "db_version": n, "state": "QUIESCED" }),
        );
        CommandOutput::success(serde_json::json!({ "sets": sets }).to_string())
    }
}

#[async_trait]
impl CommandTransport for MockCluster {
    async fn execute(&self, request: &CommandRequest) -> Result<CommandOutput> {
        lock(&self.calls).push(RecordedCall {
            request: request.clone(),
            at: Instant::now(),
        });

        if let Some(hook) = lock(&self.hook).as_ref() {
            hook(request);
        }

        let scripted = lock(&self.scripted).pop_front();
        let output = scripted.unwrap_or_else(|| self.simulate(request));

        debug!(
            target_node = %request.target,
            args = ?request.args,
            exit_code = output.exit_code.0,
            "[MOCK] Executed command"
        );
        Ok(output)
    }
}

#[async_trait]
impl Topology for MockCluster {
    async fn current_coordinator(&self) -> Result<Option<NodeId>> {
        self.topology_queries.fetch_add(1, Ordering::SeqCst);
        if let Some(advertised) = *lock(&self.advertised) {
            return Ok(advertised);
        }
        Ok(*lock(&self.leader))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
