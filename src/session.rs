//! Training orchestrator.
//!
//! A `TrainingSession` drives the epoch loop for either trainer and owns the
//! run state. After every epoch it synchronously delivers an `EpochReport`
//! to the registered observer before the next epoch may begin; that callback
//! is the sole channel for intermediate progress.
//!
//! There is no cancellation primitive: once `run` starts it proceeds to
//! completion or failure. A caller wanting to abort must discard the result
//! and drop the now-orphaned model. This is a known limitation, not a
//! feature.

use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::ml::TrainError;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No run has started yet.
    #[default]
    Idle,
    /// An epoch loop is executing.
    Running,
    /// All configured epochs finished.
    Completed,
    /// The run stopped early; the last finite report is retained.
    Failed,
}

/// Metrics produced by one full training pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    /// Mean training loss over the pass.
    pub loss: f32,
    /// Validation accuracy, when the trainer computes one.
    pub accuracy: Option<f32>,
}

/// Progress snapshot delivered to the observer after each epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochReport {
    /// Zero-based epoch index, strictly increasing across a run.
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: Option<f32>,
}

/// Errors surfaced by [`TrainingSession::run`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// `run` was called while a run was already executing. The second call
    /// is rejected, never queued or restarted.
    #[error("training already in progress")]
    AlreadyRunning,
    /// The underlying trainer failed inside an epoch.
    #[error("epoch {epoch} failed: {source}")]
    Train {
        epoch: usize,
        #[source]
        source: TrainError,
    },
    /// The loss became non-finite. The model is left in its last-updated
    /// state and the last finite report stays queryable on the session.
    #[error("loss became non-finite at epoch {epoch}")]
    Diverged { epoch: usize },
    /// The observer rejected an epoch report.
    #[error("observer rejected epoch {epoch}: {reason}")]
    Observer { epoch: usize, reason: String },
}

/// One full training pass, executed by a trainer on the session's behalf.
pub trait EpochRunner {
    /// Run epoch `epoch` and report its metrics.
    fn run_epoch(&mut self, epoch: usize) -> Result<EpochMetrics, TrainError>;
}

/// Observer invoked synchronously after every epoch, in epoch order.
///
/// Implementations must be safe to call every epoch and should not mutate
/// the dataset or model architecture mid-run. Returning an error fails the
/// run.
pub trait EpochObserver {
    fn on_epoch_end(&mut self, report: &EpochReport) -> Result<(), String>;
}

impl<F> EpochObserver for F
where
    F: FnMut(&EpochReport) -> Result<(), String>,
{
    fn on_epoch_end(&mut self, report: &EpochReport) -> Result<(), String> {
        self(report)
    }
}

/// The codified explicit no-op observer.
pub fn noop_observer() -> impl EpochObserver {
    |_: &EpochReport| -> Result<(), String> { Ok(()) }
}

/// Summary returned by a completed run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    /// Number of epochs that executed.
    pub epochs: usize,
    /// Report of the final epoch, absent only for zero-epoch runs.
    pub final_report: Option<EpochReport>,
}

/// Exclusive owner of one run's training state.
///
/// The session is an explicit value passed by reference to the trainers;
/// state lives behind a mutex so a shared handle (for example on a worker
/// thread) can query progress while a run executes.
#[derive(Debug, Default)]
pub struct TrainingSession {
    state: Mutex<SessionState>,
    last_report: Mutex<Option<EpochReport>>,
}

impl TrainingSession {
    /// Create a session in the `Idle` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Report of the most recent finite epoch, surviving a failed run.
    pub fn last_report(&self) -> Option<EpochReport> {
        *lock(&self.last_report)
    }

    /// Drive `epochs` passes of `runner`, reporting to `observer`.
    ///
    /// Starting a run replaces any previous run's state. No epoch is
    /// skipped or coalesced; the observer returns before the next pass
    /// starts.
    pub fn run(
        &self,
        epochs: usize,
        runner: &mut dyn EpochRunner,
        observer: &mut dyn EpochObserver,
    ) -> Result<RunSummary, SessionError> {
        self.begin()?;
        let mut final_report = None;
        for epoch in 0..epochs {
            let metrics = match runner.run_epoch(epoch) {
                Ok(metrics) => metrics,
                Err(source) => {
                    self.fail();
                    return Err(SessionError::Train { epoch, source });
                }
            };
            if !metrics.loss.is_finite() {
                self.fail();
                return Err(SessionError::Diverged { epoch });
            }
            let report = EpochReport {
                epoch,
                loss: metrics.loss,
                accuracy: metrics.accuracy,
            };
            *lock(&self.last_report) = Some(report);
            debug!(epoch, loss = report.loss, "Epoch finished");
            if let Err(reason) = observer.on_epoch_end(&report) {
                self.fail();
                return Err(SessionError::Observer { epoch, reason });
            }
            final_report = Some(report);
        }
        *lock(&self.state) = SessionState::Completed;
        Ok(RunSummary {
            epochs,
            final_report,
        })
    }

    fn begin(&self) -> Result<(), SessionError> {
        let mut state = lock(&self.state);
        if *state == SessionState::Running {
            return Err(SessionError::AlreadyRunning);
        }
        *state = SessionState::Running;
        drop(state);
        *lock(&self.last_report) = None;
        Ok(())
    }

    fn fail(&self) {
        *lock(&self.state) = SessionState::Failed;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
