//! `cascade` command-line interface.
//!
//! Operates on `.cascade/` under `--root` (default: current directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use cascade::control::{ControlOp, ControlResponse, dispatch};
use cascade::controller::{Collaborators, Controller};
use cascade::core::extract::extract_tasks;
use cascade::core::split::split_into_phases;
use cascade::core::types::WorkflowState;
use cascade::exit_codes;
use cascade::io::context::WorkflowContext;
use cascade::io::init::{InitOptions, init_workflow};
use cascade::logging;
use cascade::session::{Phase, Session};

#[derive(Parser)]
#[command(
    name = "cascade",
    version,
    about = "Run a phased plan against an external coding agent"
)]
struct Cli {
    /// Project root containing `.cascade/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.cascade/` with a default config and a placeholder plan.
    Init {
        /// Overwrite cascade-owned files. The plan is never overwritten.
        #[arg(short, long)]
        force: bool,
    },
    /// Parse the plan into phases and store them in the session.
    Analyze {
        /// Plan to read instead of the configured `plan_file`.
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// Show how the plan would be split, without touching the session.
    Phases {
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// Print the session.
    Status {
        /// Print the full session as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Start (or keep) the workflow and watch it until it finishes or needs attention.
    Run,
    /// Mark a pending or failed phase as skipped.
    Skip { phase: String },
    /// Retry a failed phase.
    Retry { phase: String },
    /// Archive the session and start over.
    Reset,
}

fn main() {
    logging::init(logging::CLI_FILTER);
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = cli.root;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Analyze { plan } => cmd_analyze(&root, plan),
        Command::Phases { plan } => cmd_phases(&root, plan),
        Command::Status { json } => cmd_status(&root, json),
        Command::Run => cmd_run(&root),
        Command::Skip { phase } => cmd_control(&root, ControlOp::Skip { phase_id: phase }),
        Command::Retry { phase } => cmd_control(&root, ControlOp::Retry { phase_id: phase }),
        Command::Reset => cmd_control(&root, ControlOp::Reset),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_workflow(root, &InitOptions { force })?;
    println!("initialized {}", paths.cascade_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_analyze(root: &Path, plan: Option<PathBuf>) -> Result<i32> {
    let op = match plan {
        Some(path) => ControlOp::Analyze {
            plan_text: Some(read_plan(&path)?),
        },
        None => ControlOp::Analyze { plan_text: None },
    };
    cmd_control(root, op)
}

fn cmd_phases(root: &Path, plan: Option<PathBuf>) -> Result<i32> {
    let ctx = load_context(root)?;
    let plan_path = plan.unwrap_or_else(|| ctx.plan_path());
    let tasks = extract_tasks(&read_plan(&plan_path)?);
    if tasks.is_empty() {
        bail!("no tasks found in {}", plan_path.display());
    }
    let phases = split_into_phases(&tasks, ctx.config.split_limits());
    println!("{} tasks in {} phases", tasks.len(), phases.len());
    for phase in &phases {
        println!("{}", phase_line(phase));
    }
    Ok(exit_codes::OK)
}

fn cmd_status(root: &Path, json: bool) -> Result<i32> {
    let controller = open_controller(root)?;
    let session = controller.status();
    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        print_session(&session);
    }
    Ok(exit_codes::OK)
}

fn cmd_control(root: &Path, op: ControlOp) -> Result<i32> {
    let controller = open_controller(root)?;
    let response = dispatch(&controller, op);
    report(&controller, &response)
}

fn cmd_run(root: &Path) -> Result<i32> {
    let controller = open_controller(root)?;
    controller.resume_monitoring();

    let session = controller.status();
    match session.state {
        WorkflowState::Idle => bail!("no phases yet; run `cascade analyze` first"),
        WorkflowState::Completed => {
            println!("workflow already completed");
            return Ok(exit_codes::OK);
        }
        WorkflowState::WaitingForAgent | WorkflowState::Testing => {}
        _ => {
            if let Err(err) = controller.start() {
                eprintln!("{err}");
                return Ok(exit_codes::FAILED);
            }
        }
    }
    println!(
        "agent instructions: {}",
        controller.context().paths.command_path.display()
    );

    let code = watch(&controller);
    controller.shutdown();
    Ok(code)
}

/// Print progress until the workflow completes, pauses, or fails for good.
fn watch(controller: &Controller) -> i32 {
    let interval = controller.config().poll_interval();
    let mut last = None;
    loop {
        let session = controller.status();
        let key = (
            session.state,
            session.current_phase_index,
            session.current_phase().map(|phase| phase.state),
        );
        if last != Some(key) {
            println!("{}", progress_line(&session));
            last = Some(key);
        }
        match session.state {
            WorkflowState::Completed => return exit_codes::OK,
            WorkflowState::Paused => return exit_codes::PAUSED,
            WorkflowState::Error if !controller.retry_scheduled() => {
                if let Some(error) = session.errors.last() {
                    eprintln!("{}", error.message);
                }
                return exit_codes::FAILED;
            }
            _ => thread::sleep(interval),
        }
    }
}

fn report(controller: &Controller, response: &ControlResponse) -> Result<i32> {
    if response.success {
        print_session(&controller.status());
        Ok(exit_codes::OK)
    } else {
        eprintln!(
            "{} ({})",
            response.error.as_deref().unwrap_or("operation failed"),
            response.kind.as_deref().unwrap_or("internal")
        );
        Ok(exit_codes::INVALID)
    }
}

fn load_context(root: &Path) -> Result<WorkflowContext> {
    let ctx = WorkflowContext::load(root)?;
    if !ctx.paths.cascade_dir.is_dir() {
        bail!(
            "{} not found; run `cascade init` first",
            ctx.paths.cascade_dir.display()
        );
    }
    Ok(ctx)
}

fn open_controller(root: &Path) -> Result<Arc<Controller>> {
    let ctx = load_context(root)?;
    Ok(Controller::open(ctx, Collaborators::production())?)
}

fn read_plan(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))
}

fn print_session(session: &Session) {
    println!("{}", progress_line(session));
    for phase in &session.phases {
        println!("{}", phase_line(phase));
    }
}

fn progress_line(session: &Session) -> String {
    let mut line = format!(
        "{} {}: {}/{} tasks",
        session.id, session.state, session.completed_tasks, session.total_tasks
    );
    if let Some(phase) = session.current_phase() {
        line.push_str(&format!(", phase {} {}", phase.id, phase.state));
    }
    if session.paused {
        line.push_str(" (paused)");
    }
    line
}

fn phase_line(phase: &Phase) -> String {
    let mut line = format!(
        "  {:<3} {:<9} {} tasks, ~{} tokens ({})",
        phase.id,
        phase.state.as_str(),
        phase.tasks.len(),
        phase.estimated_tokens(),
        phase.task_ids().join(", ")
    );
    if phase.retry_count > 0 {
        line.push_str(&format!(", retries {}", phase.retry_count));
    }
    if let Some(error) = &phase.last_error {
        line.push_str(&format!(", error: {error}"));
    }
    line
}
