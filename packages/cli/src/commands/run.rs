use crate::config;
use crate::script::{self, Step};
use crate::slicer::SimulatedSlicer;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use plater_editor::{
    CompletionEvent, EditorError, Engine, JumpTarget, NotificationKind, NotificationSink, Project,
    ProjectConfig, ProjectEvent, RunOutcome, WorkerEngine,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Edit script to replay
    pub script: PathBuf,

    /// Config file (defaults to plater.config.json in the working directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Simulated slicing time per layer, in milliseconds
    #[arg(long, default_value_t = 2)]
    pub layer_ms: u64,
}

/// Prints notifications as they arrive
#[derive(Debug, Default)]
struct ConsoleSink;

impl NotificationSink for ConsoleSink {
    fn push_error(&mut self, text: &str, jump: Option<JumpTarget>) {
        match jump {
            Some(JumpTarget::Object(object)) => {
                println!("    {} {} ({})", "✗".red(), text.red(), object)
            }
            Some(JumpTarget::Option(key)) => {
                println!("    {} {} (option {})", "✗".red(), text.red(), key)
            }
            None => println!("    {} {}", "✗".red(), text.red()),
        }
    }

    fn push_warning(&mut self, text: &str) {
        println!("    {} {}", "⚠️".yellow(), text.yellow());
    }

    fn clear(&mut self, kind: NotificationKind) {
        tracing::debug!("cleared {:?} notifications", kind);
    }
}

type CliProject = Project<WorkerEngine<SimulatedSlicer>, ConsoleSink>;

pub fn run(args: RunArgs, cwd: &str) -> Result<()> {
    let config = config::load(cwd, args.config.as_deref())?;
    let script_path = PathBuf::from(cwd).join(&args.script);
    let steps = script::load(&script_path)?;

    // The project must live on the thread that drives it
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(replay(config, steps, Duration::from_millis(args.layer_ms)))
}

async fn replay(config: ProjectConfig, steps: Vec<Step>, layer_time: Duration) -> Result<()> {
    let engine = WorkerEngine::new(SimulatedSlicer::new(layer_time));
    let mut project: CliProject = Project::new(config, engine, ConsoleSink);
    let mut events = project.subscribe();

    println!(
        "{}",
        format!("▶ Replaying {} steps...", steps.len()).bright_blue().bold()
    );

    let mut skipped = 0;
    for (i, step) in steps.iter().enumerate() {
        println!("{} {}", format!("[{:>3}]", i + 1).dimmed(), step.describe());

        match step {
            Step::Wait => settle(&mut project, &mut events).await,
            Step::History => print_history(&project),
            _ => {
                if let Err(err) = step.apply(&mut project) {
                    let busy = err
                        .downcast_ref::<EditorError>()
                        .map_or(false, EditorError::is_busy);
                    if busy {
                        println!("    {} busy, skipped", "…".yellow());
                    } else {
                        println!("    {} {}", "✗".red(), err);
                    }
                    skipped += 1;
                }
            }
        }
        print_events(&mut events);
    }

    settle(&mut project, &mut events).await;
    print_summary(&project, skipped);
    Ok(())
}

enum Wake {
    Completion(Option<CompletionEvent>),
    Deadline,
}

/// Drive debounced updates and completions until nothing is pending
async fn settle<E: Engine, N: NotificationSink>(
    project: &mut Project<E, N>,
    events: &mut broadcast::Receiver<ProjectEvent>,
) {
    loop {
        let busy = project.is_busy();
        let deadline = project.next_deadline();
        if !busy && deadline.is_none() {
            return;
        }

        let wake_at = deadline.map_or_else(Instant::now, Instant::from_std);
        let wake = tokio::select! {
            event = project.recv_completion(), if busy => Wake::Completion(event),
            _ = sleep_until(wake_at), if deadline.is_some() => Wake::Deadline,
        };

        match wake {
            Wake::Completion(Some(event)) => {
                project.handle_completion(event);
            }
            Wake::Completion(None) => {
                tracing::warn!("completion queue closed");
                return;
            }
            Wake::Deadline => {
                project.poll();
            }
        }
        print_events(events);
    }
}

fn print_events(events: &mut broadcast::Receiver<ProjectEvent>) {
    loop {
        let event = match events.try_recv() {
            Ok(event) => event,
            Err(TryRecvError::Lagged(missed)) => {
                tracing::warn!("missed {} project events", missed);
                continue;
            }
            Err(_) => return,
        };

        match event {
            ProjectEvent::SnapshotTaken { id, name } => {
                println!("    {} {} \"{}\"", "●".cyan(), id, name)
            }
            ProjectEvent::HistoryRestored { id, name } => {
                println!("    {} {} \"{}\"", "↺".cyan(), id, name)
            }
            ProjectEvent::SessionEntered { name } => println!("    {} {}", "»".cyan(), name),
            ProjectEvent::SessionLeft { name, changed } => {
                let note = if changed { "" } else { " (no changes)" };
                println!("    {} {}{}", "«".cyan(), name, note)
            }
            ProjectEvent::SlicingBegan { plate } => {
                println!("    {} slicing {}", "⚙".bright_blue(), plate)
            }
            ProjectEvent::SliceCompleted { plate, outcome } => match outcome {
                RunOutcome::Finished => println!("    {} {} sliced", "✓".green(), plate),
                RunOutcome::Cancelled => println!("    {} {} cancelled", "■".yellow(), plate),
                RunOutcome::Failed { .. } => println!("    {} {} failed", "✗".red(), plate),
            },
            ProjectEvent::DirtyChanged(dirty) => tracing::debug!("dirty: {}", dirty),
            ProjectEvent::PlateSelected(plate) => tracing::debug!("selected {}", plate),
            ProjectEvent::RefreshScene | ProjectEvent::RefreshPreview => {}
        }
    }
}

fn print_history(project: &CliProject) {
    for entry in project.history_entries() {
        let marker = if entry.is_active { "▶" } else { " " };
        println!(
            "    {} {} {:<36} {}",
            marker.green(),
            entry.id.to_string().dimmed(),
            entry.name,
            format!("{:?}", entry.kind).dimmed()
        );
    }
}

fn print_summary(project: &CliProject, skipped: usize) {
    println!();
    println!("{}", "Plates:".bold());
    for plate in project.plates().plates() {
        let state = if plate.slice_valid {
            "sliced".green()
        } else if plate.apply_result_invalid {
            "invalid".red()
        } else {
            "not sliced".yellow()
        };
        println!(
            "  {} {:<12} {} objects, {}",
            if plate.index == project.plates().current() { "▶" } else { " " },
            plate.name,
            plate.objects().count(),
            state
        );
    }

    println!();
    println!(
        "{} objects, {} history entries, {}",
        project.document().len(),
        project.history_entries().len(),
        if project.is_dirty() {
            "unsaved changes".yellow()
        } else {
            "saved".green()
        }
    );
    if skipped > 0 {
        println!("{} {} steps skipped", "⚠️".yellow(), skipped);
    }
    println!("{}", "✨ Done".green().bold());
}
