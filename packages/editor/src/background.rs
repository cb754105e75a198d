//! # Background Coordinator
//!
//! Decides when the slicing engine re-runs and maps run outcomes back onto
//! plate validity.
//!
//! ## State machine
//!
//! ```text
//!   Idle ──update──► Validating ──► Idle
//!     │
//!     └──restart──► Running ──completion──► Finished | Cancelled | Error ──► Idle
//!                      ▲                                  │
//!                      └──────── slice-all: next plate ◄──┘ (Finished only)
//! ```
//!
//! ## Invariants
//!
//! - At most one run is `Running`; `restart` refuses while one is
//! - Completions are matched against the ticket of the active run, so a
//!   late event from a superseded run is dropped
//! - Every entry point asserts it runs on the thread that created the
//!   coordinator

use crate::document::{Document, ModelObject};
use crate::engine::{
    completion_channel, ApplyStatus, CompletionEvent, CompletionReceiver, Engine, PlateInput,
    RunOutcome, RunTicket, ValidationIssue,
};
use crate::events::{EventBus, ProjectEvent};
use crate::notifications::{JumpTarget, NotificationKind, NotificationSink};
use crate::plates::PlateSet;
use bitflags::bitflags;
use plater_common::PlateIndex;
use std::collections::{BTreeMap, VecDeque};
use std::thread::{self, ThreadId};

bitflags! {
    /// Result of `update`, and input to `restart`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UpdateStatus: u8 {
        /// The engine dropped its result for the current plate
        const INVALIDATED = 1;
        /// Validation passed and background processing wants a new run
        const RESTART_NEEDED = 1 << 1;
        const REFRESH_SCENE = 1 << 2;
        /// Validation failed; no run may start
        const INVALID = 1 << 3;
        /// Start even without RESTART_NEEDED unless the plate already
        /// holds a finished, valid result
        const FORCE_RESTART = 1 << 4;
        const FORCE_EXPORT = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Idle,
    Validating,
    Running,
    Finished,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackgroundRun {
    pub state: RunState,
    pub target_plate: PlateIndex,
    pub applied_generation: u64,
}

/// Live project state the coordinator reads and updates
pub struct SliceContext<'a> {
    pub document: &'a Document,
    pub plates: &'a mut PlateSet,
    pub print_config: &'a BTreeMap<String, String>,
    pub notifications: &'a mut dyn NotificationSink,
}

impl SliceContext<'_> {
    /// Build the engine input for a plate: its printable instances and the
    /// merged print config
    pub fn plate_input(&self, plate: PlateIndex) -> PlateInput {
        let Ok(p) = self.plates.plate(plate) else {
            return PlateInput {
                plate,
                ..Default::default()
            };
        };

        let objects: Vec<ModelObject> = p
            .objects()
            .filter_map(|id| self.document.object(id))
            .filter(|o| o.has_printable_instances())
            .map(|o| {
                let mut object = o.clone();
                object.instances.retain(|i| i.printable);
                object
            })
            .collect();

        let mut config = self.print_config.clone();
        config.extend(p.config.iter().map(|(k, v)| (k.clone(), v.clone())));

        PlateInput {
            plate,
            objects,
            config,
        }
    }
}

struct SliceAllBatch {
    queue: VecDeque<PlateIndex>,
}

fn jump_target(issue: &ValidationIssue) -> Option<JumpTarget> {
    issue
        .object
        .map(JumpTarget::Object)
        .or_else(|| issue.option_key.clone().map(JumpTarget::Option))
}

pub struct BackgroundCoordinator<E: Engine> {
    engine: E,
    completions: CompletionReceiver,
    run: BackgroundRun,
    active_ticket: Option<RunTicket>,
    last_outcome: Option<RunOutcome>,
    generation: u64,
    background_processing: bool,
    ui_job_active: bool,
    batch: Option<SliceAllBatch>,
    events: EventBus,
    owner: ThreadId,
}

impl<E: Engine> BackgroundCoordinator<E> {
    pub fn new(
        mut engine: E,
        queue_capacity: usize,
        background_processing: bool,
        events: EventBus,
    ) -> Self {
        let (tx, rx) = completion_channel(queue_capacity);
        engine.bind(tx);

        Self {
            engine,
            completions: rx,
            run: BackgroundRun::default(),
            active_ticket: None,
            last_outcome: None,
            generation: 0,
            background_processing,
            ui_job_active: false,
            batch: None,
            events,
            owner: thread::current().id(),
        }
    }

    fn assert_owner(&self) {
        assert_eq!(
            thread::current().id(),
            self.owner,
            "background coordinator used off its owning thread"
        );
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn run(&self) -> BackgroundRun {
        self.run
    }

    pub fn state(&self) -> RunState {
        self.run.state
    }

    pub fn last_outcome(&self) -> Option<&RunOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.run.state == RunState::Running
    }

    /// A run or a slice-all batch is in progress
    pub fn is_busy(&self) -> bool {
        self.is_running() || self.batch.is_some()
    }

    /// Plates still queued by slice-all, excluding the running one
    pub fn batch_remaining(&self) -> Option<usize> {
        self.batch.as_ref().map(|b| b.queue.len())
    }

    pub fn background_processing(&self) -> bool {
        self.background_processing
    }

    pub fn set_background_processing(&mut self, enabled: bool) {
        self.background_processing = enabled;
    }

    pub fn set_ui_job_active(&mut self, active: bool) {
        self.ui_job_active = active;
    }

    pub fn ui_job_active(&self) -> bool {
        self.ui_job_active
    }

    /// Mark each plate valid exactly when the engine still holds a finished
    /// result for its current input. Plates with an external result keep
    /// their flag.
    pub fn sync_plate_results(&self, ctx: &mut SliceContext<'_>) {
        self.assert_owner();
        let indices: Vec<PlateIndex> = ctx
            .plates
            .plates()
            .iter()
            .filter(|p| !p.has_external_result)
            .map(|p| p.index)
            .collect();

        for index in indices {
            let holds = self.engine.holds_result(&ctx.plate_input(index));
            if let Ok(plate) = ctx.plates.plate_mut(index) {
                plate.slice_valid = holds;
                if holds {
                    plate.apply_result_invalid = false;
                }
            }
        }
    }

    /// Apply the current plate to the engine and validate it.
    pub fn update(&mut self, ctx: &mut SliceContext<'_>, force_validation: bool) -> UpdateStatus {
        self.assert_owner();
        if self.is_running() {
            tracing::debug!("update skipped: a run is in progress");
            return UpdateStatus::empty();
        }

        let plate = ctx.plates.current();
        let input = ctx.plate_input(plate);
        self.run.state = RunState::Validating;
        self.run.target_plate = plate;

        let mut status = UpdateStatus::empty();
        if self.engine.apply(input) == ApplyStatus::Invalidated {
            self.generation += 1;
            self.run.applied_generation = self.generation;
            status |= UpdateStatus::INVALIDATED | UpdateStatus::REFRESH_SCENE;
            ctx.plates.current_plate_mut().invalidate();
        }

        let invalidated = status.contains(UpdateStatus::INVALIDATED);
        if (invalidated || force_validation) && !self.engine.empty() {
            let report = self.engine.validate();

            ctx.notifications.clear(NotificationKind::Error);
            if report.is_ok() {
                ctx.plates.current_plate_mut().apply_result_invalid = false;
                if invalidated && self.background_processing {
                    status |= UpdateStatus::RESTART_NEEDED;
                }
            } else {
                ctx.plates.current_plate_mut().apply_result_invalid = true;
                for issue in &report.errors {
                    ctx.notifications.push_error(&issue.text, jump_target(issue));
                }
                status |= UpdateStatus::INVALID;
                tracing::warn!(
                    "{} failed validation with {} errors",
                    plate,
                    report.errors.len()
                );
            }

            ctx.notifications.clear(NotificationKind::Warning);
            for warning in &report.warnings {
                ctx.notifications.push_warning(&warning.text);
            }
        } else if self.engine.empty() {
            ctx.plates.current_plate_mut().apply_result_invalid = false;
        }

        self.run.state = RunState::Idle;
        if status.contains(UpdateStatus::REFRESH_SCENE) {
            self.events.publish(ProjectEvent::RefreshScene);
        }
        tracing::debug!("update of {} -> {:?}", plate, status);
        status
    }

    /// Start a run for the current plate if `status` calls for one.
    pub fn restart(&mut self, ctx: &mut SliceContext<'_>, status: UpdateStatus) -> bool {
        self.assert_owner();
        if self.ui_job_active {
            tracing::debug!("restart refused: a UI job is active");
            return false;
        }
        if self.is_running() || self.engine.running() {
            tracing::debug!("restart refused: a run is already active");
            return false;
        }
        if status.contains(UpdateStatus::INVALID) {
            return false;
        }

        let plate = ctx.plates.current();
        let plate_valid = ctx.plates.current_plate().slice_valid;
        let should_start = if !self.engine.empty() {
            (status.contains(UpdateStatus::FORCE_RESTART)
                && (!self.engine.finished() || !plate_valid))
                || status.contains(UpdateStatus::FORCE_EXPORT)
                || status.contains(UpdateStatus::RESTART_NEEDED)
        } else {
            // Nothing to slice, but a valid earlier result can still be exported
            status.contains(UpdateStatus::FORCE_RESTART) && plate_valid
        };
        if !should_start {
            return false;
        }

        let ticket = RunTicket {
            plate,
            generation: self.generation,
        };
        if !self.engine.start(ticket) {
            tracing::warn!("engine refused to start {}", plate);
            return false;
        }

        self.active_ticket = Some(ticket);
        self.run = BackgroundRun {
            state: RunState::Running,
            target_plate: plate,
            applied_generation: self.generation,
        };
        tracing::info!("slicing {} (generation {})", plate, self.generation);
        self.events.publish(ProjectEvent::SlicingBegan { plate });
        true
    }

    /// Slice the current plate now, bypassing the debounce
    pub fn slice_plate(&mut self, ctx: &mut SliceContext<'_>) -> bool {
        let status = self.update(ctx, true);
        self.restart(ctx, status | UpdateStatus::FORCE_RESTART)
    }

    /// Slice every plate holding printable instances, one after another.
    /// Returns the number of plates queued.
    pub fn slice_all(&mut self, ctx: &mut SliceContext<'_>) -> usize {
        self.assert_owner();
        if self.is_busy() || self.ui_job_active {
            tracing::debug!("slice-all refused: busy");
            return 0;
        }

        let queue: VecDeque<PlateIndex> = (0..ctx.plates.len())
            .map(PlateIndex)
            .filter(|p| ctx.plates.has_printable_instances(*p, ctx.document))
            .collect();
        let count = queue.len();
        if count == 0 {
            return 0;
        }

        tracing::info!("slice-all over {} plates", count);
        self.batch = Some(SliceAllBatch { queue });
        self.start_next(ctx);
        count
    }

    fn start_next(&mut self, ctx: &mut SliceContext<'_>) {
        loop {
            let Some(batch) = self.batch.as_mut() else {
                return;
            };
            let Some(next) = batch.queue.pop_front() else {
                self.batch = None;
                tracing::info!("slice-all finished");
                return;
            };

            if ctx.plates.select_plate(next).is_err() {
                continue;
            }
            self.events.publish(ProjectEvent::PlateSelected(next));

            let status = self.update(ctx, true);
            if !ctx.plates.can_slice(next, ctx.document) {
                let name = ctx
                    .plates
                    .plate(next)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|_| next.to_string());
                ctx.notifications
                    .push_error(&format!("{} cannot be sliced", name), None);
                self.batch = None;
                return;
            }
            if self.ui_job_active {
                self.batch = None;
                return;
            }
            if self.restart(ctx, status | UpdateStatus::FORCE_RESTART) {
                return;
            }
            tracing::debug!("{} already sliced, moving on", next);
        }
    }

    /// Cancel the active run and any remaining slice-all plates. The run's
    /// `Cancelled` completion arrives later.
    pub fn stop(&mut self) {
        self.assert_owner();
        if self.batch.take().is_some() {
            tracing::info!("slice-all cancelled");
        }
        if self.is_running() {
            tracing::info!("cancelling run on {}", self.run.target_plate);
            self.engine.stop();
        }
    }

    pub fn try_recv_completion(&mut self) -> Option<CompletionEvent> {
        self.completions.try_recv().ok()
    }

    pub async fn recv_completion(&mut self) -> Option<CompletionEvent> {
        self.completions.recv().await
    }

    /// Fold a completion event into plate state. Returns false for stale
    /// events.
    pub fn handle_completion(&mut self, ctx: &mut SliceContext<'_>, event: CompletionEvent) -> bool {
        self.assert_owner();
        if self.active_ticket != Some(event.ticket) {
            tracing::debug!("ignoring stale completion {:?}", event.ticket);
            return false;
        }

        self.engine.stop();
        self.active_ticket = None;
        let plate = event.ticket.plate;

        let state = match &event.outcome {
            RunOutcome::Finished => {
                if let Ok(p) = ctx.plates.plate_mut(plate) {
                    p.slice_valid = true;
                    p.apply_result_invalid = false;
                }
                RunState::Finished
            }
            RunOutcome::Cancelled => RunState::Cancelled,
            RunOutcome::Failed {
                message,
                critical,
                objects,
            } => {
                if let Ok(p) = ctx.plates.plate_mut(plate) {
                    p.slice_valid = false;
                    if *critical {
                        p.apply_result_invalid = true;
                    }
                }
                if *critical {
                    tracing::error!("critical engine failure on {}: {}", plate, message);
                    ctx.notifications.push_error(message, None);
                } else {
                    ctx.notifications
                        .push_error(message, objects.first().copied().map(JumpTarget::Object));
                }
                RunState::Error
            }
        };

        self.run.state = state;
        tracing::info!("run on {} ended: {:?}", plate, state);
        self.events.publish(ProjectEvent::SliceCompleted {
            plate,
            outcome: event.outcome.clone(),
        });
        self.last_outcome = Some(event.outcome.clone());
        self.run.state = RunState::Idle;

        if event.outcome.is_success() && self.batch.is_some() {
            self.start_next(ctx);
        } else if self.batch.take().is_some() {
            tracing::info!("slice-all stopped at {}", plate);
        }

        if !self.is_busy() {
            self.events.publish(ProjectEvent::RefreshPreview);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CompletionSender, ValidationReport};
    use crate::notifications::RecordingSink;
    use crate::Mutation;

    #[derive(Default)]
    struct FakeEngine {
        apply_status: Option<ApplyStatus>,
        report: ValidationReport,
        running: bool,
        finished: bool,
        starts: usize,
        input: Option<PlateInput>,
        tx: Option<CompletionSender>,
    }

    impl Engine for FakeEngine {
        fn bind(&mut self, completions: CompletionSender) {
            self.tx = Some(completions);
        }

        fn apply(&mut self, input: PlateInput) -> ApplyStatus {
            self.input = Some(input);
            self.apply_status.unwrap_or(ApplyStatus::Invalidated)
        }

        fn empty(&self) -> bool {
            self.input.as_ref().map_or(true, |i| i.is_empty())
        }

        fn validate(&self) -> ValidationReport {
            self.report.clone()
        }

        fn start(&mut self, _ticket: RunTicket) -> bool {
            if self.running {
                return false;
            }
            self.running = true;
            self.starts += 1;
            true
        }

        fn stop(&mut self) {
            self.running = false;
        }

        fn running(&self) -> bool {
            self.running
        }

        fn finished(&self) -> bool {
            self.finished
        }

        fn holds_result(&self, input: &PlateInput) -> bool {
            self.finished && self.input.as_ref() == Some(input)
        }

        fn current_plate(&self) -> Option<PlateIndex> {
            self.input.as_ref().map(|i| i.plate)
        }
    }

    struct Fixture {
        document: Document,
        plates: PlateSet,
        print_config: BTreeMap<String, String>,
        sink: RecordingSink,
    }

    impl Fixture {
        fn with_object() -> Self {
            let mut document = Document::new();
            let id = Mutation::AddObject {
                name: "cube".into(),
                instances: 1,
            }
            .apply(&mut document)
            .unwrap()
            .created
            .unwrap();
            let mut plates = PlateSet::new();
            plates.assign(id, PlateIndex(0)).unwrap();
            Self {
                document,
                plates,
                print_config: BTreeMap::new(),
                sink: RecordingSink::new(),
            }
        }

        fn ctx(&mut self) -> SliceContext<'_> {
            SliceContext {
                document: &self.document,
                plates: &mut self.plates,
                print_config: &self.print_config,
                notifications: &mut self.sink,
            }
        }
    }

    fn coordinator(engine: FakeEngine) -> BackgroundCoordinator<FakeEngine> {
        BackgroundCoordinator::new(engine, 4, true, EventBus::new(16))
    }

    #[test]
    fn test_invalidated_and_valid_requests_restart() {
        let mut fx = Fixture::with_object();
        let mut bg = coordinator(FakeEngine::default());

        let status = bg.update(&mut fx.ctx(), false);

        assert!(status.contains(UpdateStatus::INVALIDATED | UpdateStatus::RESTART_NEEDED));
        assert!(status.contains(UpdateStatus::REFRESH_SCENE));
        assert!(bg.restart(&mut fx.ctx(), status));
        assert_eq!(bg.state(), RunState::Running);
    }

    #[test]
    fn test_sync_follows_engine_results() {
        let mut fx = Fixture::with_object();
        let input = fx.ctx().plate_input(PlateIndex(0));
        let mut bg = coordinator(FakeEngine {
            finished: true,
            input: Some(input),
            ..Default::default()
        });

        fx.plates.current_plate_mut().apply_result_invalid = true;
        bg.sync_plate_results(&mut fx.ctx());
        assert!(fx.plates.current_plate().slice_valid);
        assert!(!fx.plates.current_plate().apply_result_invalid);

        bg.engine_mut().finished = false;
        bg.sync_plate_results(&mut fx.ctx());
        assert!(!fx.plates.current_plate().slice_valid);
    }

    #[test]
    fn test_background_processing_off_skips_restart_needed() {
        let mut fx = Fixture::with_object();
        let mut bg = coordinator(FakeEngine::default());
        bg.set_background_processing(false);

        let status = bg.update(&mut fx.ctx(), false);
        assert!(!status.contains(UpdateStatus::RESTART_NEEDED));
        assert!(!bg.restart(&mut fx.ctx(), status));
    }

    #[test]
    fn test_unchanged_without_force_skips_validation() {
        let mut fx = Fixture::with_object();
        let mut bg = coordinator(FakeEngine {
            apply_status: Some(ApplyStatus::Unchanged),
            report: ValidationReport {
                errors: vec![ValidationIssue::new("never seen")],
                warnings: Vec::new(),
            },
            ..Default::default()
        });

        assert_eq!(bg.update(&mut fx.ctx(), false), UpdateStatus::empty());
        assert_eq!(fx.sink.errors_pushed, 0);

        assert!(bg.update(&mut fx.ctx(), true).contains(UpdateStatus::INVALID));
        assert_eq!(fx.sink.errors_pushed, 1);
    }

    #[test]
    fn test_warnings_do_not_block_restart() {
        let mut fx = Fixture::with_object();
        let mut bg = coordinator(FakeEngine {
            report: ValidationReport {
                errors: Vec::new(),
                warnings: vec![ValidationIssue::new("thin walls")],
            },
            ..Default::default()
        });

        let status = bg.update(&mut fx.ctx(), false);
        assert!(status.contains(UpdateStatus::RESTART_NEEDED));
        assert_eq!(fx.sink.warnings().len(), 1);
        assert!(bg.restart(&mut fx.ctx(), status));
    }

    #[test]
    fn test_ui_job_blocks_restart() {
        let mut fx = Fixture::with_object();
        let mut bg = coordinator(FakeEngine::default());
        bg.set_ui_job_active(true);

        let status = bg.update(&mut fx.ctx(), false);
        assert!(!bg.restart(&mut fx.ctx(), status));
        assert_eq!(bg.engine().starts, 0);
    }

    #[test]
    fn test_forced_restart_skips_finished_result() {
        let mut fx = Fixture::with_object();
        let mut bg = coordinator(FakeEngine {
            apply_status: Some(ApplyStatus::Unchanged),
            finished: true,
            ..Default::default()
        });
        fx.plates.current_plate_mut().slice_valid = true;

        assert!(!bg.slice_plate(&mut fx.ctx()));
        assert_eq!(bg.engine().starts, 0);

        fx.plates.current_plate_mut().slice_valid = false;
        assert!(bg.slice_plate(&mut fx.ctx()));
    }

    #[test]
    fn test_empty_plate_exports_valid_result_on_force() {
        let mut fx = Fixture::with_object();
        fx.plates.add_plate(None);
        fx.plates.select_plate(PlateIndex(1)).unwrap();
        fx.plates.set_external_result(PlateIndex(1), true).unwrap();
        let mut bg = coordinator(FakeEngine::default());

        assert!(bg.slice_plate(&mut fx.ctx()));
    }

    #[test]
    fn test_stale_completion_is_ignored() {
        let mut fx = Fixture::with_object();
        let mut bg = coordinator(FakeEngine::default());
        let status = bg.update(&mut fx.ctx(), false);
        bg.restart(&mut fx.ctx(), status);

        let stale = CompletionEvent {
            ticket: RunTicket {
                plate: PlateIndex(0),
                generation: 0,
            },
            outcome: RunOutcome::Finished,
        };
        assert!(!bg.handle_completion(&mut fx.ctx(), stale));
        assert!(bg.is_running());
        assert!(!fx.plates.current_plate().slice_valid);
    }

    #[test]
    fn test_critical_failure_blocks_plate() {
        let mut fx = Fixture::with_object();
        let mut bg = coordinator(FakeEngine::default());
        let status = bg.update(&mut fx.ctx(), false);
        bg.restart(&mut fx.ctx(), status);
        let ticket = RunTicket {
            plate: PlateIndex(0),
            generation: bg.run().applied_generation,
        };

        let handled = bg.handle_completion(
            &mut fx.ctx(),
            CompletionEvent {
                ticket,
                outcome: RunOutcome::Failed {
                    message: "out of memory".into(),
                    critical: true,
                    objects: Vec::new(),
                },
            },
        );

        assert!(handled);
        assert_eq!(bg.state(), RunState::Idle);
        assert!(fx.plates.current_plate().apply_result_invalid);
        assert!(!fx.plates.can_slice(PlateIndex(0), &fx.document));
        assert_eq!(fx.sink.errors()[0].text, "out of memory");
    }

    #[test]
    fn test_plate_input_merges_plate_config_and_drops_unprintable() {
        let mut fx = Fixture::with_object();
        fx.print_config.insert("layer_height".into(), "0.2".into());
        fx.print_config.insert("infill".into(), "15%".into());
        fx.plates
            .current_plate_mut()
            .config
            .insert("infill".into(), "40%".into());

        let input = fx.ctx().plate_input(PlateIndex(0));
        assert_eq!(input.objects.len(), 1);
        assert_eq!(input.config["layer_height"], "0.2");
        assert_eq!(input.config["infill"], "40%");

        let second = fx.plates.add_plate(None);
        assert!(fx.ctx().plate_input(second).is_empty());
    }
}
