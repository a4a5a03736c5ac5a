//! Quiesce thrasher actor.
//!
//! One actor runs per managed filesystem. Its loop waits the initial delay,
//! then repeats: pick a duration, run one quiesce cycle, stay active long
//! enough to keep the quiesced share of wall-clock time at the configured
//! factor.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle -> AwaitingInitialDelay -> (Quiescing -> Holding -> Releasing -> Idle)* -> Stopped
//!                                                            any state -> Failed
//! ```
//!
//! A failure inside the loop ends the loop and is kept by the handle. It is
//! never raised on the task that joins the actor; the group controller reads
//! it after `join`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::client::{cancel_all_args, LeaderClient};
use crate::config::ActorConfig;
use crate::cycle::{CycleOutcome, QuiesceCycle};
use crate::duration::DurationModel;
use crate::error::QuiesceError;
use crate::shutdown::{StopListener, StopSignal};
use crate::transport::{CommandTransport, Topology};

/// Actor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    /// Not started, or active between cycles.
    Idle,
    /// Waiting out the initial delay.
    AwaitingInitialDelay,
    /// Quiesce command in flight.
    Quiescing,
    /// Path quiesced, holding for the chosen duration.
    Holding,
    /// Release command in flight.
    Releasing,
    /// Loop exited after a stop request.
    Stopped,
    /// Loop exited on an error.
    Failed,
}

impl ActorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActorState::Stopped | ActorState::Failed)
    }
}

/// Shared view of an actor's current state.
#[derive(Debug, Clone)]
pub struct StateTracker {
    tx: Arc<watch::Sender<ActorState>>,
}

impl StateTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ActorState::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, state: ActorState) {
        let previous = self.tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "State transition");
        }
    }

    pub fn get(&self) -> ActorState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ActorState> {
        self.tx.subscribe()
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Quiesce thrasher for one filesystem, ready to start.
pub struct Quiescer {
    fs: String,
    config: ActorConfig,
    transport: Arc<dyn CommandTransport>,
    topology: Arc<dyn Topology>,
}

impl Quiescer {
    pub fn new(
        fs: impl Into<String>,
        config: ActorConfig,
        transport: Arc<dyn CommandTransport>,
        topology: Arc<dyn Topology>,
    ) -> Self {
        Self {
            fs: fs.into(),
            config,
            transport,
            topology,
        }
    }

    /// Actor name for logging.
    pub fn name(&self) -> String {
        thrasher_name(&self.fs)
    }

    /// Spawn the run loop and return a handle to it.
    pub fn start(self) -> QuiescerHandle {
        let stop = StopSignal::new();
        let state = StateTracker::new();
        let cycles = Arc::new(AtomicU64::new(0));
        let name = self.name();

        let span = info_span!("quiescer", fs = %self.fs);
        let task = tokio::spawn(
            run_actor_loop(
                self.config,
                Arc::clone(&self.transport),
                Arc::clone(&self.topology),
                stop.listener(),
                state.clone(),
                Arc::clone(&cycles),
            )
            .instrument(span),
        );

        info!(name = %name, "Started quiescer");

        QuiescerHandle {
            name,
            fs: self.fs,
            transport: self.transport,
            topology: self.topology,
            stop,
            state,
            cycles,
            task: Some(task),
            failure: None,
        }
    }
}

/// Handle to a running quiescer.
pub struct QuiescerHandle {
    name: String,
    fs: String,
    transport: Arc<dyn CommandTransport>,
    topology: Arc<dyn Topology>,
    stop: StopSignal,
    state: StateTracker,
    cycles: Arc<AtomicU64>,
    task: Option<JoinHandle<Result<(), QuiesceError>>>,
    failure: Option<QuiesceError>,
}

impl QuiescerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fs(&self) -> &str {
        &self.fs
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ActorState {
        self.state.get()
    }

    /// Wait until the actor reaches `state`.
    pub async fn wait_for_state(&self, state: ActorState) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == state).await;
    }

    /// Number of cycles that ended in a release.
    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Check if the actor task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Cancel every outstanding quiesce set, then signal the loop to stop.
    ///
    /// The cancel is best effort: failures are logged, not returned.
    pub async fn stop(&self) {
        info!(name = %self.name, "Stopping quiescer");

        let mut client = LeaderClient::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.topology),
            self.stop.listener(),
        );
        match client.send(&cancel_all_args()).await {
            Ok(Some(output)) if output.exit_code.is_success() => {
                debug!(name = %self.name, "Cancelled outstanding quiesce sets");
            }
            Ok(Some(output)) => warn!(
                name = %self.name,
                exit_code = %output.exit_code,
                stdout = %output.stdout,
                "Cancel of outstanding quiesce sets failed"
            ),
            Ok(None) => debug!(name = %self.name, "Quiescer already stopping, cancel skipped"),
            Err(e) => warn!(name = %self.name, error = %e, "Cancel of outstanding quiesce sets failed"),
        }

        self.stop.stop();
    }

    /// Wait for the run loop to exit and capture its failure, if any.
    ///
    /// Returns the captured failure. Calling again returns the same result.
    pub async fn join(&mut self) -> Option<&QuiesceError> {
        if let Some(task) = self.task.take() {
            self.failure = match task.await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(e) => {
                    self.state.set(ActorState::Failed);
                    Some(QuiesceError::Panicked(e.to_string()))
                }
            };
        }
        self.failure.as_ref()
    }

    /// Failure captured by [`QuiescerHandle::join`].
    pub fn exception(&self) -> Option<&QuiesceError> {
        self.failure.as_ref()
    }

    /// Take ownership of the captured failure.
    pub fn take_exception(&mut self) -> Option<QuiesceError> {
        self.failure.take()
    }
}

fn thrasher_name(fs: &str) -> String {
    format!("quiescer.fs.[{}]", fs)
}

/// Run the actor loop, recording the terminal state.
async fn run_actor_loop(
    config: ActorConfig,
    transport: Arc<dyn CommandTransport>,
    topology: Arc<dyn Topology>,
    stop: StopListener,
    state: StateTracker,
    cycles: Arc<AtomicU64>,
) -> Result<(), QuiesceError> {
    let result = run_cycles(config, transport, topology, stop, state.clone(), cycles).await;

    match &result {
        Ok(()) => {
            state.set(ActorState::Stopped);
            info!("Quiescer stopped");
        }
        Err(e) => {
            state.set(ActorState::Failed);
            error!(error = %e, "Quiescer failed");
        }
    }
    result
}

async fn run_cycles(
    config: ActorConfig,
    transport: Arc<dyn CommandTransport>,
    topology: Arc<dyn Topology>,
    mut stop: StopListener,
    state: StateTracker,
    cycles: Arc<AtomicU64>,
) -> Result<(), QuiesceError> {
    state.set(ActorState::AwaitingInitialDelay);
    debug!(initial_delay_secs = config.initial_delay, "Waiting before first quiesce");
    stop.sleep(Duration::from_secs(config.initial_delay)).await;

    let mut durations = DurationModel::new(config.min_quiesce, config.max_quiesce, config.seed);
    let client = LeaderClient::new(transport, topology, stop.clone());
    let mut cycle = QuiesceCycle::new(client, &config, stop.clone(), state.clone());

    while !stop.is_stopped() {
        let duration = durations.next_duration();

        if let CycleOutcome::Released { .. } = cycle.run_cycle(duration).await? {
            cycles.fetch_add(1, Ordering::SeqCst);
        }

        state.set(ActorState::Idle);
        let active = config.active_wait(duration);
        debug!(active_secs = active.as_secs_f64(), "Active until next quiesce");
        stop.sleep(active).await;
    }

    Ok(())
}
