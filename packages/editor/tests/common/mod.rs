//! Shared fixtures: a scripted engine the tests drive by hand.

#![allow(dead_code)]

use plater_editor::{
    ApplyStatus, CompletionEvent, CompletionSender, Engine, Mutation, ObjectId, PlateIndex,
    PlateInput, Project, ProjectConfig, RecordingSink, RunOutcome, RunTicket, UpdateStatus,
    ValidationReport,
};
use std::collections::{BTreeMap, VecDeque};

/// Engine whose answers are set by the test and whose runs only finish
/// when the test calls [`ScriptedEngine::complete`].
#[derive(Default)]
pub struct ScriptedEngine {
    /// Forced answers for the next `apply` calls
    pub apply_results: VecDeque<ApplyStatus>,
    pub report: ValidationReport,
    pub finished: bool,
    pub running: bool,

    pub apply_calls: usize,
    pub validate_calls: usize,
    pub start_calls: usize,
    pub stop_calls: usize,
    /// `start` called while a run was active
    pub overlapping_starts: usize,

    pub last_input: Option<PlateInput>,
    pub ticket: Option<RunTicket>,
    /// Input of the last successful run per plate
    results: BTreeMap<PlateIndex, PlateInput>,
    pending: bool,
    tx: Option<CompletionSender>,
}

impl ScriptedEngine {
    /// Post the terminal event of the current run
    pub fn complete(&mut self, outcome: RunOutcome) -> bool {
        if !self.pending {
            return false;
        }
        let (Some(ticket), Some(tx)) = (self.ticket, self.tx.as_ref()) else {
            return false;
        };
        self.pending = false;
        if outcome.is_success() {
            self.finished = true;
            if let Some(input) = &self.last_input {
                self.results.insert(input.plate, input.clone());
            }
        }
        tx.try_send(CompletionEvent { ticket, outcome }).is_ok()
    }
}

impl Engine for ScriptedEngine {
    fn bind(&mut self, completions: CompletionSender) {
        self.tx = Some(completions);
    }

    fn apply(&mut self, input: PlateInput) -> ApplyStatus {
        self.apply_calls += 1;
        let status = self.apply_results.pop_front().unwrap_or_else(|| {
            if self.last_input.as_ref() == Some(&input) {
                ApplyStatus::Unchanged
            } else {
                ApplyStatus::Invalidated
            }
        });
        if status == ApplyStatus::Invalidated {
            self.finished = false;
        }
        self.last_input = Some(input);
        status
    }

    fn empty(&self) -> bool {
        self.last_input.as_ref().map_or(true, |i| i.is_empty())
    }

    fn validate(&self) -> ValidationReport {
        self.report.clone()
    }

    fn start(&mut self, ticket: RunTicket) -> bool {
        self.start_calls += 1;
        if self.running || self.pending {
            self.overlapping_starts += 1;
            return false;
        }
        self.running = true;
        self.pending = true;
        self.ticket = Some(ticket);
        true
    }

    fn stop(&mut self) {
        self.stop_calls += 1;
        self.running = false;
    }

    fn running(&self) -> bool {
        self.running
    }

    fn finished(&self) -> bool {
        self.finished
    }

    fn holds_result(&self, input: &PlateInput) -> bool {
        self.results.get(&input.plate) == Some(input)
    }

    fn current_plate(&self) -> Option<PlateIndex> {
        self.last_input.as_ref().map(|i| i.plate)
    }
}

pub type TestProject = Project<ScriptedEngine, RecordingSink>;

pub fn project() -> TestProject {
    Project::new(
        ProjectConfig::default(),
        ScriptedEngine::default(),
        RecordingSink::new(),
    )
}

pub fn add_object(project: &mut TestProject, name: &str) -> ObjectId {
    project
        .apply(Mutation::AddObject {
            name: name.to_string(),
            instances: 1,
        })
        .unwrap()
        .created
        .unwrap()
}

/// Run the debounced update as if its deadline just passed
pub fn fire_debounce(project: &mut TestProject) -> Option<UpdateStatus> {
    let deadline = project.next_deadline()?;
    project.poll_at(deadline)
}

/// Complete the running job and fold the event in
pub fn finish_run(project: &mut TestProject, outcome: RunOutcome) {
    assert!(project.engine_mut().complete(outcome));
    assert_eq!(project.drain_completions(), 1);
}
