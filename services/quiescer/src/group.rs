//! Thrasher group controller.
//!
//! Holds every thrasher started for a scenario and stops them together. This is
//! the one place where failures captured inside background thrashers become
//! visible to the scenario driver.

use async_trait::async_trait;
use tracing::{error, info};

use crate::actor::QuiescerHandle;
use crate::error::QuiesceError;

/// A background fault injector that can be stopped and joined.
#[async_trait]
pub trait Thrasher: Send {
    /// Thrasher name for logging.
    fn name(&self) -> &str;

    /// Ask the thrasher to stop.
    async fn stop(&mut self);

    /// Wait for the thrasher to exit.
    async fn join(&mut self);

    /// Take the failure the thrasher recorded, if any.
    fn take_exception(&mut self) -> Option<QuiesceError>;
}

#[async_trait]
impl Thrasher for QuiescerHandle {
    fn name(&self) -> &str {
        QuiescerHandle::name(self)
    }

    async fn stop(&mut self) {
        QuiescerHandle::stop(self).await;
    }

    async fn join(&mut self) {
        QuiescerHandle::join(self).await;
    }

    fn take_exception(&mut self) -> Option<QuiesceError> {
        QuiescerHandle::take_exception(self)
    }
}

/// Stop and join every thrasher, one after another.
///
/// All thrashers are stopped even when an earlier one failed. If any recorded a
/// failure, the first one is returned wrapped with the thrasher name and the
/// number of failed thrashers.
pub async fn stop_all(thrashers: &mut [Box<dyn Thrasher>]) -> Result<(), QuiesceError> {
    let total = thrashers.len();
    let mut first_failure: Option<(String, QuiesceError)> = None;
    let mut failed = 0;

    for thrasher in thrashers.iter_mut() {
        thrasher.stop().await;
        thrasher.join().await;

        if let Some(e) = thrasher.take_exception() {
            failed += 1;
            error!(name = %thrasher.name(), error = %e, "Thrasher recorded a failure");
            if first_failure.is_none() {
                first_failure = Some((thrasher.name().to_string(), e));
            }
        } else {
            info!(name = %thrasher.name(), "Thrasher joined");
        }
    }

    match first_failure {
        None => Ok(()),
        Some((name, source)) => Err(QuiesceError::ThrasherFailed {
            name,
            failed,
            total,
            source: Box::new(source),
        }),
    }
}

/// The set of thrashers running for a scenario.
#[derive(Default)]
pub struct ThrasherGroup {
    thrashers: Vec<Box<dyn Thrasher>>,
}

impl ThrasherGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a started thrasher.
    pub fn push(&mut self, thrasher: impl Thrasher + 'static) {
        self.thrashers.push(Box::new(thrasher));
    }

    pub fn len(&self) -> usize {
        self.thrashers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thrashers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.thrashers.iter().map(|t| t.name()).collect()
    }

    /// Stop and join all thrashers, surfacing any captured failure.
    ///
    /// The group is empty afterwards.
    pub async fn stop_all(&mut self) -> Result<(), QuiesceError> {
        info!(count = self.thrashers.len(), "Joining thrashers");
        let result = stop_all(&mut self.thrashers).await;
        self.thrashers.clear();
        info!("Done joining thrashers");
        result
    }
}
