//! # Worker Engine
//!
//! A concrete [`Engine`] that runs a [`Slicer`] on a dedicated thread.
//!
//! ## Design
//!
//! - Applied inputs are cached per plate, so switching between plates does
//!   not throw away the other plates' results
//! - The worker only sees the `Arc<PlateInput>` captured at `start`; it
//!   never touches the live document
//! - Cancellation is a shared flag the slicer polls; `stop` never blocks
//!   on a running slice

use crate::engine::{
    ApplyStatus, CompletionEvent, CompletionSender, Engine, PlateInput, RunOutcome, RunTicket,
    ValidationReport,
};
use plater_common::{ObjectId, PlateIndex};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Cooperative cancellation flag shared with the worker
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SliceFailure {
    pub message: String,
    pub critical: bool,
    pub objects: Vec<ObjectId>,
}

/// The slicing algorithm itself
pub trait Slicer: Send + Sync + 'static {
    fn validate(&self, input: &PlateInput) -> ValidationReport;

    /// Slice `input`, returning early once `cancel` is set
    fn slice(&self, input: &PlateInput, cancel: &CancelToken) -> Result<(), SliceFailure>;
}

struct AppliedPlate {
    input: Arc<PlateInput>,
    finished: Arc<AtomicBool>,
}

struct Job {
    ticket: RunTicket,
    cancel: CancelToken,
    /// Slicing is over and the outcome is being posted
    reported: Arc<AtomicBool>,
    /// The completion send returned; joining cannot block
    exited: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct WorkerEngine<S: Slicer> {
    slicer: Arc<S>,
    applied: BTreeMap<PlateIndex, AppliedPlate>,
    current: Option<PlateIndex>,
    completions: Option<CompletionSender>,
    job: Option<Job>,
}

impl<S: Slicer> WorkerEngine<S> {
    pub fn new(slicer: S) -> Self {
        Self {
            slicer: Arc::new(slicer),
            applied: BTreeMap::new(),
            current: None,
            completions: None,
            job: None,
        }
    }

    fn current_applied(&self) -> Option<&AppliedPlate> {
        self.current.and_then(|plate| self.applied.get(&plate))
    }

    /// Drop a job whose thread has reported back. A thread still blocked
    /// posting to a full queue is detached, not joined: this thread is the
    /// queue's consumer.
    fn reap(&mut self) {
        if !self.job.as_ref().map_or(false, |j| j.reported.load(Ordering::Acquire)) {
            return;
        }
        if let Some(job) = self.job.take() {
            if !job.exited.load(Ordering::Acquire) {
                tracing::debug!("detaching slicer thread for {}", job.ticket.plate);
            } else if job.handle.join().is_err() {
                tracing::error!("slicer thread for {} did not exit cleanly", job.ticket.plate);
            }
        }
    }

    fn run_job(
        slicer: &S,
        input: &PlateInput,
        cancel: &CancelToken,
        finished: &AtomicBool,
    ) -> RunOutcome {
        if cancel.is_cancelled() {
            return RunOutcome::Cancelled;
        }
        let result = slicer.slice(input, cancel);
        if cancel.is_cancelled() {
            return RunOutcome::Cancelled;
        }
        match result {
            Ok(()) => {
                finished.store(true, Ordering::Release);
                RunOutcome::Finished
            }
            Err(failure) => RunOutcome::Failed {
                message: failure.message,
                critical: failure.critical,
                objects: failure.objects,
            },
        }
    }
}

impl<S: Slicer> Engine for WorkerEngine<S> {
    fn bind(&mut self, completions: CompletionSender) {
        self.completions = Some(completions);
    }

    fn apply(&mut self, input: PlateInput) -> ApplyStatus {
        let plate = input.plate;
        self.current = Some(plate);

        if let Some(applied) = self.applied.get(&plate) {
            if *applied.input == input {
                return ApplyStatus::Unchanged;
            }
        }

        if self.job.as_ref().map_or(false, |j| j.ticket.plate == plate) {
            self.stop();
        }

        self.applied.insert(
            plate,
            AppliedPlate {
                input: Arc::new(input),
                finished: Arc::new(AtomicBool::new(false)),
            },
        );
        ApplyStatus::Invalidated
    }

    fn empty(&self) -> bool {
        self.current_applied().map_or(true, |a| a.input.is_empty())
    }

    fn validate(&self) -> ValidationReport {
        match self.current_applied() {
            Some(applied) => self.slicer.validate(&applied.input),
            None => ValidationReport::default(),
        }
    }

    fn start(&mut self, ticket: RunTicket) -> bool {
        self.reap();
        if self.job.is_some() {
            tracing::warn!("refusing to start {}: a run is still active", ticket.plate);
            return false;
        }

        let Some(applied) = self.current_applied() else {
            return false;
        };
        let Some(tx) = self.completions.clone() else {
            tracing::warn!("engine has no completion channel bound");
            return false;
        };

        if applied.input.is_empty() {
            // Nothing to slice; report the previous result as ready for export
            let event = CompletionEvent {
                ticket,
                outcome: RunOutcome::Finished,
            };
            if let Err(e) = tx.try_send(event) {
                tracing::warn!(error = ?e, "completion queue rejected export event");
                return false;
            }
            return true;
        }

        let input = Arc::clone(&applied.input);
        let finished = Arc::clone(&applied.finished);
        let slicer = Arc::clone(&self.slicer);
        let cancel = CancelToken::new();
        let reported = Arc::new(AtomicBool::new(false));
        let exited = Arc::new(AtomicBool::new(false));

        let worker_cancel = cancel.clone();
        let worker_reported = Arc::clone(&reported);
        let worker_exited = Arc::clone(&exited);
        let spawned = std::thread::Builder::new()
            .name(format!("slicer-{}", ticket.plate.index()))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    Self::run_job(&slicer, &input, &worker_cancel, &finished)
                }))
                .unwrap_or_else(|_| {
                    tracing::error!("slicer panicked on {}", ticket.plate);
                    RunOutcome::Failed {
                        message: "Slicer crashed".to_string(),
                        critical: true,
                        objects: Vec::new(),
                    }
                });
                worker_reported.store(true, Ordering::Release);
                if tx.blocking_send(CompletionEvent { ticket, outcome }).is_err() {
                    tracing::debug!("completion receiver dropped before {:?} finished", ticket);
                }
                worker_exited.store(true, Ordering::Release);
            });

        match spawned {
            Ok(handle) => {
                self.job = Some(Job {
                    ticket,
                    cancel,
                    reported,
                    exited,
                    handle,
                });
                true
            }
            Err(e) => {
                tracing::error!(error = ?e, "failed to spawn slicer thread");
                false
            }
        }
    }

    fn stop(&mut self) {
        if let Some(job) = &self.job {
            job.cancel.cancel();
        }
        self.reap();
    }

    fn running(&self) -> bool {
        self.job
            .as_ref()
            .map_or(false, |j| !j.reported.load(Ordering::Acquire))
    }

    fn finished(&self) -> bool {
        self.current_applied()
            .map_or(false, |a| a.finished.load(Ordering::Acquire))
    }

    fn holds_result(&self, input: &PlateInput) -> bool {
        self.applied.get(&input.plate).map_or(false, |a| {
            *a.input == *input && a.finished.load(Ordering::Acquire)
        })
    }

    fn current_plate(&self) -> Option<PlateIndex> {
        self.current
    }
}

impl<S: Slicer> Drop for WorkerEngine<S> {
    fn drop(&mut self) {
        if let Some(job) = &self.job {
            job.cancel.cancel();
        }
    }
}
