//! Interactive terminal session
//!
//! A line-oriented front end over the [`Coordinator`]. Each command maps to
//! one coordinator intent; output is rendered from the returned values and
//! the published [`WorkspaceState`].

use crate::coordinator::{Coordinator, EditChange, WorkspaceState};
use crate::diff::diff_edit;
use crate::error::ForgeError;
use crate::github::RepositoryEntry;
use crate::plan::{Plan, StepStatus};
use crate::util::{truncate, truncate_str};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

pub const HELP: &str = "\
Commands:
  plan <request>            Create a plan for a change
  steps                     Show the current plan
  run <id|all>              Execute a step (or every runnable step)
  ls [path]                 List a directory
  open <path>               Read a file (also reloads it)
  diff [path]               Show the staged change for a file
  edits                     List staged changes
  discard <path>            Drop a staged change
  commit <path> [message]   Commit a staged change
  log                       Show the activity log
  help                      Show this help
  quit                      Exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Plan(String),
    Steps,
    Run(RunTarget),
    List(String),
    Open(String),
    Diff(Option<String>),
    Edits,
    Discard(String),
    Commit { path: String, message: Option<String> },
    Log,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTarget {
    Step(String),
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

fn required(rest: &str, usage: &str) -> Result<String, String> {
    if rest.is_empty() {
        Err(format!("usage: {}", usage))
    } else {
        Ok(rest.to_string())
    }
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Option<Result<Command, String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };

    let cmd = match word.to_ascii_lowercase().as_str() {
        "plan" => required(rest, "plan <request>").map(Command::Plan),
        "steps" => Ok(Command::Steps),
        "run" => match rest {
            "" => Err("usage: run <id|all>".to_string()),
            "all" => Ok(Command::Run(RunTarget::All)),
            id => Ok(Command::Run(RunTarget::Step(id.to_string()))),
        },
        "ls" => Ok(Command::List(rest.to_string())),
        "open" | "reload" => required(rest, "open <path>").map(Command::Open),
        "diff" => Ok(Command::Diff((!rest.is_empty()).then(|| rest.to_string()))),
        "edits" => Ok(Command::Edits),
        "discard" => required(rest, "discard <path>").map(Command::Discard),
        "commit" => {
            let (path, message) = match rest.split_once(char::is_whitespace) {
                Some((p, m)) => (p, Some(m.trim().to_string()).filter(|m| !m.is_empty())),
                None => (rest, None),
            };
            required(path, "commit <path> [message]")
                .map(|path| Command::Commit { path, message })
        }
        "log" => Ok(Command::Log),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        other => Err(format!("unknown command '{}' (try 'help')", other)),
    };
    Some(cmd)
}

// ============================================================================
// Rendering
// ============================================================================

pub fn render_plan(plan: &Plan) -> String {
    let (done, total) = plan.progress();
    let mut out = format!("{} ({}/{} done)\n", plan.title, done, total);
    for step in &plan.steps {
        let _ = writeln!(
            out,
            "  {} [{}] {} {}  {}",
            step.status.icon(),
            step.id,
            step.operation,
            step.file_path,
            step.title
        );
        if !step.description.is_empty() {
            let _ = writeln!(out, "      {}", truncate(&step.description, 120));
        }
    }
    out
}

pub fn render_entries(entries: &[RepositoryEntry]) -> String {
    if entries.is_empty() {
        return "(empty)\n".to_string();
    }
    let mut sorted: Vec<&RepositoryEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| {
        b.kind
            .is_dir()
            .cmp(&a.kind.is_dir())
            .then_with(|| a.name.cmp(&b.name))
    });
    let mut out = String::new();
    for entry in sorted {
        if entry.kind.is_dir() {
            let _ = writeln!(out, "  {}/", entry.name);
        } else {
            let _ = writeln!(out, "  {}  ({} bytes)", entry.name, entry.size);
        }
    }
    out
}

pub fn render_edits(state: &WorkspaceState) -> String {
    if state.edits.is_empty() {
        return "No staged changes.\n".to_string();
    }
    let mut out = String::new();
    for (path, edit) in &state.edits {
        let current = state.file(path).and_then(|f| f.content.as_deref());
        let (adds, removes) = diff_edit(edit, current).stats();
        let kind = match edit.change {
            EditChange::Delete => "delete",
            EditChange::Replace(_) if current.is_none() => "create",
            EditChange::Replace(_) => "update",
        };
        let _ = writeln!(
            out,
            "  {}  {}  +{} -{}  (step {})",
            path, kind, adds, removes, edit.step_id
        );
    }
    out
}

pub fn render_log(state: &WorkspaceState) -> String {
    let mut out = String::new();
    for entry in &state.activity {
        let _ = writeln!(out, "  {}  {}", entry.at.format("%H:%M:%S"), entry.message);
    }
    if out.is_empty() {
        out.push_str("(no activity)\n");
    }
    out
}

/// Error line plus a hint for errors the user can act on.
pub fn render_error(err: &ForgeError) -> String {
    let hint = match err {
        ForgeError::WriteConflict { path, .. } => {
            format!("\n  hint: run 'open {}' to reload, then commit again", path)
        }
        ForgeError::Authentication(_) => "\n  hint: run 'forge --setup'".to_string(),
        ForgeError::NoPlan => "\n  hint: run 'plan <request>' first".to_string(),
        ForgeError::ModelUnavailable(_) => {
            "\n  hint: check planner_model / coder_model in the config file".to_string()
        }
        _ => String::new(),
    };
    format!("error: {}{}\n", err, hint)
}

// ============================================================================
// Session
// ============================================================================

pub struct Session {
    coordinator: Arc<Coordinator>,
}

impl Session {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    /// Run a command and return its rendered output.
    pub async fn handle(&self, command: Command) -> (String, Flow) {
        let coord = &self.coordinator;
        let out = match command {
            Command::Plan(prompt) => match coord.create_plan(&prompt).await {
                Ok(plan) => render_plan(&plan),
                Err(err) => render_error(&err),
            },
            Command::Steps => match coord.state().plan {
                Some(plan) => render_plan(&plan),
                None => render_error(&ForgeError::NoPlan),
            },
            Command::Run(RunTarget::Step(id)) => match coord.execute_step(&id).await {
                Ok(edit) => format!(
                    "Step {} completed; staged change for {} (see 'diff {}')\n",
                    id, edit.path, edit.path
                ),
                Err(err) => render_error(&err),
            },
            Command::Run(RunTarget::All) => self.run_all().await,
            Command::List(path) => match coord.list_directory(&path).await {
                Ok(entries) => render_entries(&entries),
                Err(err) => render_error(&err),
            },
            Command::Open(path) => match coord.open_file(&path).await {
                Ok(file) => {
                    let content = file.content.unwrap_or_default();
                    let mut out = format!(
                        "── {} ({})\n",
                        file.path,
                        file.version_token.as_deref().map(|t| truncate_str(t, 7)).unwrap_or_default()
                    );
                    out.push_str(&content);
                    if !content.ends_with('\n') {
                        out.push('\n');
                    }
                    out
                }
                Err(err) => render_error(&err),
            },
            Command::Diff(path) => self.diff(path),
            Command::Edits => render_edits(&coord.state()),
            Command::Discard(path) => match coord.discard(&path) {
                Ok(edit) => format!("Discarded staged change for {}\n", edit.path),
                Err(err) => render_error(&err),
            },
            Command::Commit { path, message } => {
                match coord.commit(&path, message.as_deref()).await {
                    Ok(result) => match result.new_version_token {
                        Some(token) => format!("Committed {} ({})\n", result.path, truncate_str(&token, 7)),
                        None => format!("Deleted {}\n", result.path),
                    },
                    Err(err) => render_error(&err),
                }
            }
            Command::Log => render_log(&coord.state()),
            Command::Help => format!("{}\n", HELP),
            Command::Quit => return (String::new(), Flow::Quit),
        };
        (out, Flow::Continue)
    }

    /// Execute runnable steps in order, stopping at the first failure.
    async fn run_all(&self) -> String {
        let Some(plan) = self.coordinator.state().plan else {
            return render_error(&ForgeError::NoPlan);
        };
        let mut out = String::new();
        for step in plan.steps.iter().filter(|s| s.status.is_runnable()) {
            match self.coordinator.execute_step(&step.id).await {
                Ok(edit) => {
                    let _ = writeln!(out, "Step {} completed: {}", step.id, edit.path);
                }
                Err(err) => {
                    out.push_str(&render_error(&err));
                    break;
                }
            }
        }
        if out.is_empty() {
            out.push_str("Nothing to run.\n");
        }
        out
    }

    fn diff(&self, path: Option<String>) -> String {
        let state = self.coordinator.state();
        let Some(path) = path.or_else(|| state.active_file.clone()) else {
            return "usage: diff <path>\n".to_string();
        };
        let path = path.trim_start_matches("./").trim_start_matches('/');
        let Some(edit) = state.edit(path) else {
            return render_error(&ForgeError::NoProposedEdit(path.to_string()));
        };
        let current = state.file(path).and_then(|f| f.content.as_deref());
        let diff = diff_edit(edit, current);
        if diff.is_empty() {
            return format!("{}: no changes\n", path);
        }
        let (adds, removes) = diff.stats();
        format!("{}+{} -{}\n", diff.render(), adds, removes)
    }
}

fn status_line(state: &WorkspaceState) -> String {
    let progress = state
        .plan
        .as_ref()
        .map(|p| {
            let (done, total) = p.progress();
            let running = p
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::InProgress)
                .count();
            if running > 0 {
                format!(" {}/{} ({} running)", done, total, running)
            } else {
                format!(" {}/{}", done, total)
            }
        })
        .unwrap_or_default();
    format!("{}{}> ", state.repo, progress)
}

/// Read commands from stdin until `quit` or end of input.
pub async fn run_session(coordinator: Arc<Coordinator>, initial_prompt: Option<String>) -> anyhow::Result<()> {
    let session = Session::new(coordinator.clone());

    println!("  Connected to {}", coordinator.repo());
    if let Err(err) = coordinator.load_context().await {
        print!("{}", render_error(&err));
        println!("  Planning will continue without repository context.");
    }
    println!("  Type 'help' for commands.");
    println!();

    if let Some(prompt) = initial_prompt.filter(|p| !p.trim().is_empty()) {
        let (out, _) = session.handle(Command::Plan(prompt)).await;
        print!("{}", out);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        {
            use std::io::Write;
            print!("{}", status_line(&coordinator.state()));
            std::io::stdout().flush()?;
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match parse_command(&line) {
            None => continue,
            Some(Err(msg)) => println!("{}", msg),
            Some(Ok(command)) => {
                let (out, flow) = session.handle(command).await;
                print!("{}", out);
                if flow == Flow::Quit {
                    break;
                }
            }
        }
    }
    Ok(())
}
