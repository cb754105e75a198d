//! A project driving the threaded `WorkerEngine` with a test slicer.

use plater_editor::{
    CancelToken, Engine, JumpTarget, Mutation, ObjectId, PlateIndex, PlateInput, Project,
    ProjectConfig, RecordingSink, RunOutcome, SliceFailure, Slicer, ValidationIssue,
    ValidationReport, WorkerEngine,
};
use std::thread;
use std::time::{Duration, Instant};

/// Objects named "bad" fail validation, "fail" fail slicing and "crash"
/// panics the slicer
struct TestSlicer {
    steps: u32,
    step: Duration,
}

impl TestSlicer {
    fn quick() -> Self {
        Self {
            steps: 1,
            step: Duration::from_millis(1),
        }
    }

    fn slow() -> Self {
        Self {
            steps: 500,
            step: Duration::from_millis(10),
        }
    }
}

fn named<'a>(input: &'a PlateInput, name: &'a str) -> impl Iterator<Item = ObjectId> + 'a {
    input
        .objects
        .iter()
        .filter(move |o| o.name == name)
        .map(|o| o.id)
}

impl Slicer for TestSlicer {
    fn validate(&self, input: &PlateInput) -> ValidationReport {
        ValidationReport {
            errors: named(input, "bad")
                .map(|id| ValidationIssue::new("Object is outside the bed").on_object(id))
                .collect(),
            warnings: Vec::new(),
        }
    }

    fn slice(&self, input: &PlateInput, cancel: &CancelToken) -> Result<(), SliceFailure> {
        for _ in 0..self.steps {
            if cancel.is_cancelled() {
                return Ok(());
            }
            thread::sleep(self.step);
        }

        if named(input, "crash").next().is_some() {
            panic!("slicer blew up");
        }

        let failing: Vec<ObjectId> = named(input, "fail").collect();
        if failing.is_empty() {
            Ok(())
        } else {
            Err(SliceFailure {
                message: "Object has no layers".into(),
                critical: false,
                objects: failing,
            })
        }
    }
}

type WorkerProject = Project<WorkerEngine<TestSlicer>, RecordingSink>;

fn project(slicer: TestSlicer) -> WorkerProject {
    Project::new(
        ProjectConfig::default(),
        WorkerEngine::new(slicer),
        RecordingSink::new(),
    )
}

fn add(p: &mut WorkerProject, name: &str) -> ObjectId {
    p.apply(Mutation::AddObject {
        name: name.into(),
        instances: 1,
    })
    .unwrap()
    .created
    .unwrap()
}

/// Poll the completion queue until one event is handled
fn wait_for_completion(p: &mut WorkerProject) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if p.drain_completions() > 0 {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("no completion within 5s");
}

#[test]
fn test_slice_completes_on_worker_thread() {
    let mut p = project(TestSlicer::quick());
    add(&mut p, "cube");

    assert!(p.slice_plate().unwrap());
    wait_for_completion(&mut p);

    assert!(p.plates().current_plate().slice_valid);
    assert!(!p.is_busy());
    assert!(p.engine().finished());
    assert!(!p.engine().running());
    assert_eq!(p.coordinator().last_outcome(), Some(&RunOutcome::Finished));
}

#[test]
fn test_debounced_poll_starts_the_worker() {
    let mut p = project(TestSlicer::quick());
    add(&mut p, "cube");

    let deadline = p.next_deadline().unwrap();
    p.poll_at(deadline).unwrap();
    assert!(p.is_busy());

    wait_for_completion(&mut p);
    assert!(p.plates().current_plate().slice_valid);
}

#[test]
fn test_stop_cancels_a_running_slice() {
    let mut p = project(TestSlicer::slow());
    add(&mut p, "cube");

    assert!(p.slice_plate().unwrap());
    let started = Instant::now();
    p.stop();
    wait_for_completion(&mut p);

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(p.coordinator().last_outcome(), Some(&RunOutcome::Cancelled));
    assert!(!p.plates().current_plate().slice_valid);
    assert!(!p.is_busy());
}

#[test]
fn test_switching_plates_keeps_finished_results() {
    let mut p = project(TestSlicer::quick());
    add(&mut p, "a");
    assert!(p.slice_plate().unwrap());
    wait_for_completion(&mut p);

    let second = p.add_plate(None).unwrap();
    p.select_plate(second).unwrap();
    add(&mut p, "b");
    assert!(p.slice_plate().unwrap());
    wait_for_completion(&mut p);

    p.select_plate(PlateIndex(0)).unwrap();
    assert!(!p.slice_plate().unwrap());
    assert!(p.plates().plates().iter().all(|pl| pl.slice_valid));
}

#[test]
fn test_validation_error_never_reaches_the_worker() {
    let mut p = project(TestSlicer::quick());
    let id = add(&mut p, "bad");

    assert!(!p.slice_plate().unwrap());
    assert!(!p.is_busy());
    assert!(p.plates().current_plate().apply_result_invalid);

    let errors = p.notifications().errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].jump, Some(JumpTarget::Object(id)));
}

#[test]
fn test_slicing_failure_points_at_the_object() {
    let mut p = project(TestSlicer::quick());
    let id = add(&mut p, "fail");

    assert!(p.slice_plate().unwrap());
    wait_for_completion(&mut p);

    assert!(!p.plates().current_plate().slice_valid);
    assert_eq!(
        p.notifications().errors()[0].jump,
        Some(JumpTarget::Object(id))
    );
}

#[test]
fn test_dropping_the_project_mid_run() {
    let mut p = project(TestSlicer::slow());
    add(&mut p, "cube");
    assert!(p.slice_plate().unwrap());
    drop(p);
}

#[test]
fn test_slicer_panic_becomes_a_critical_error() {
    let mut p = project(TestSlicer::quick());
    add(&mut p, "crash");

    assert!(p.slice_plate().unwrap());
    wait_for_completion(&mut p);

    assert!(!p.is_busy());
    assert!(!p.plates().current_plate().slice_valid);
    assert!(matches!(
        p.coordinator().last_outcome(),
        Some(RunOutcome::Failed { critical: true, .. })
    ));
    assert_eq!(p.notifications().errors().len(), 1);
}
