//! Plan / execute / commit workflow coordinator
//!
//! The coordinator owns every piece of session state: the current plan and
//! step statuses, the known repository files with their version tokens, and
//! the staged [`ProposedEdit`]s. The presentation layer only issues intents
//! (create a plan, execute a step, commit, discard) and renders the
//! [`WorkspaceState`] snapshots published after every mutation.
//!
//! State lives behind a `std::sync::Mutex` that is never held across an
//! `.await`. Network calls happen with the lock released, and results are
//! applied under the lock afterwards.

use crate::error::{ForgeError, ForgeResult};
use crate::github::{
    EntryKind, FileContent, FileWrite, RepoId, RepositoryEntry, RepositoryGateway,
};
use crate::llm::prompts::{execute_messages, plan_messages};
use crate::llm::{ChatGateway, Model, ModelSelection};
use crate::plan::{parse_plan, Plan, Step, StepOperation, StepStatus};
use crate::snapshot::{build_snapshot, SnapshotLimits, CONTEXT_UNAVAILABLE};
use crate::util::{normalize_repo_path, truncate, truncate_str};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use uuid::Uuid;

const MAX_ACTIVITY_ENTRIES: usize = 200;

// ============================================================================
// State types
// ============================================================================

/// A known path in the remote repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryFile {
    pub path: String,
    pub kind: EntryKind,
    /// Loaded lazily by a read
    pub content: Option<String>,
    /// Token observed at the most recent successful read or write
    pub version_token: Option<String>,
}

impl RepositoryFile {
    fn from_entry(entry: &RepositoryEntry) -> Self {
        Self {
            path: entry.path.clone(),
            kind: entry.kind,
            content: None,
            version_token: None,
        }
    }

    fn loaded(path: &str, file: FileContent) -> Self {
        Self {
            path: path.to_string(),
            kind: EntryKind::File,
            content: Some(file.content),
            version_token: Some(file.version_token),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditChange {
    /// Full replacement content
    Replace(String),
    Delete,
}

/// Staged change produced by a completed step, awaiting commit or discard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedEdit {
    pub id: Uuid,
    pub path: String,
    pub step_id: String,
    pub operation: StepOperation,
    pub change: EditChange,
}

impl ProposedEdit {
    pub fn is_delete(&self) -> bool {
        matches!(self.change, EditChange::Delete)
    }

    pub fn proposed_content(&self) -> Option<&str> {
        match &self.change {
            EditChange::Replace(text) => Some(text),
            EditChange::Delete => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    pub path: String,
    /// Absent after a deletion
    pub new_version_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Read-only view of the session published to subscribers.
#[derive(Debug, Clone)]
pub struct WorkspaceState {
    pub repo: RepoId,
    pub snapshot: String,
    pub plan: Option<Plan>,
    pub files: BTreeMap<String, RepositoryFile>,
    pub edits: BTreeMap<String, ProposedEdit>,
    pub active_file: Option<String>,
    pub activity: Vec<ActivityEntry>,
}

impl WorkspaceState {
    fn new(repo: RepoId) -> Self {
        Self {
            repo,
            snapshot: String::new(),
            plan: None,
            files: BTreeMap::new(),
            edits: BTreeMap::new(),
            active_file: None,
            activity: Vec::new(),
        }
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.plan.as_ref().and_then(|p| p.step(id))
    }

    pub fn file(&self, path: &str) -> Option<&RepositoryFile> {
        self.files.get(path)
    }

    pub fn edit(&self, path: &str) -> Option<&ProposedEdit> {
        self.edits.get(path)
    }

    fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(repo = %self.repo, "{}", message);
        self.activity.push(ActivityEntry {
            at: Utc::now(),
            message,
        });
        if self.activity.len() > MAX_ACTIVITY_ENTRIES {
            let excess = self.activity.len() - MAX_ACTIVITY_ENTRIES;
            self.activity.drain(..excess);
        }
    }

    fn record_read(&mut self, path: &str, file: FileContent) {
        self.files
            .insert(path.to_string(), RepositoryFile::loaded(path, file));
    }

    fn is_known_dir(&self, path: &str) -> bool {
        self.files.get(path).is_some_and(|f| f.kind.is_dir())
    }
}

struct Inner {
    view: WorkspaceState,
    /// Bumped whenever the plan is replaced
    plan_epoch: u64,
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct Coordinator {
    repo: RepoId,
    repository: Arc<dyn RepositoryGateway>,
    chat: Arc<dyn ChatGateway>,
    models: ModelSelection,
    limits: SnapshotLimits,
    inner: Mutex<Inner>,
    tx: watch::Sender<WorkspaceState>,
}

impl Coordinator {
    pub fn new(
        repo: RepoId,
        repository: Arc<dyn RepositoryGateway>,
        chat: Arc<dyn ChatGateway>,
    ) -> Self {
        let view = WorkspaceState::new(repo.clone());
        let (tx, _rx) = watch::channel(view.clone());
        Self {
            repo,
            repository,
            chat,
            models: ModelSelection::default(),
            limits: SnapshotLimits::default(),
            inner: Mutex::new(Inner {
                view,
                plan_epoch: 0,
            }),
            tx,
        }
    }

    pub fn with_models(mut self, models: ModelSelection) -> Self {
        self.models = models;
        self
    }

    pub fn with_snapshot_limits(mut self, limits: SnapshotLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn repo(&self) -> &RepoId {
        &self.repo
    }

    /// Current state snapshot.
    pub fn state(&self) -> WorkspaceState {
        self.lock().view.clone()
    }

    /// Receive a snapshot after every state change.
    pub fn subscribe(&self) -> watch::Receiver<WorkspaceState> {
        self.tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Mutate state under the lock and publish the result.
    fn update<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.lock();
        let out = f(&mut inner);
        self.tx.send_replace(inner.view.clone());
        out
    }

    fn log(&self, message: impl Into<String>) {
        self.update(|inner| inner.view.log(message));
    }

    // ------------------------------------------------------------------------
    // Repository browsing
    // ------------------------------------------------------------------------

    /// Build the planning snapshot and seed the file tree with the root
    /// listing. On failure the snapshot becomes a placeholder and the error
    /// is returned so the caller can report it.
    pub async fn load_context(&self) -> ForgeResult<String> {
        self.log(format!("Reading: {}", self.repo));
        match build_snapshot(self.repository.as_ref(), &self.repo, self.limits).await {
            Ok(snapshot) => {
                let text = snapshot.text.clone();
                self.update(|inner| {
                    for entry in &snapshot.root_entries {
                        inner
                            .view
                            .files
                            .entry(entry.path.clone())
                            .or_insert_with(|| RepositoryFile::from_entry(entry));
                    }
                    inner.view.snapshot = snapshot.text;
                    let count = snapshot.root_entries.len();
                    inner.view.log(format!("Loaded {} root entries", count));
                });
                Ok(text)
            }
            Err(err) => {
                let err = ForgeError::from_read("/", err);
                self.update(|inner| {
                    inner.view.snapshot = CONTEXT_UNAVAILABLE.to_string();
                    inner
                        .view
                        .log(format!("Failed to fetch repo details: {}", err));
                });
                Err(err)
            }
        }
    }

    /// List a directory and record its entries in the file tree.
    pub async fn list_directory(&self, path: &str) -> ForgeResult<Vec<RepositoryEntry>> {
        let path = normalize_repo_path(path).map_err(ForgeError::InvalidPath)?;
        let entries = self
            .repository
            .list_directory(&self.repo, &path)
            .await
            .map_err(|e| ForgeError::from_read(&path, e))?;

        self.update(|inner| {
            for entry in &entries {
                inner
                    .view
                    .files
                    .entry(entry.path.clone())
                    .and_modify(|f| f.kind = entry.kind)
                    .or_insert_with(|| RepositoryFile::from_entry(entry));
            }
        });
        Ok(entries)
    }

    /// Read (or re-read) a file, refresh its version token and make it the
    /// active file.
    pub async fn open_file(&self, path: &str) -> ForgeResult<RepositoryFile> {
        let path = normalize_repo_path(path).map_err(ForgeError::InvalidPath)?;
        if self.lock().view.is_known_dir(&path) {
            return Err(ForgeError::InvalidPath(format!("{} is a directory", path)));
        }
        self.read_remote(&path).await?;
        self.update(|inner| {
            inner.view.active_file = Some(path.clone());
            inner.view.files.get(&path).cloned()
        })
        .ok_or(ForgeError::NotFound(path))
    }

    /// Read `path`, recording the content and token on success and
    /// forgetting a stale token when the path no longer exists.
    async fn read_remote(&self, path: &str) -> ForgeResult<FileContent> {
        match self.repository.read_file(&self.repo, path).await {
            Ok(file) => {
                self.update(|inner| inner.view.record_read(path, file.clone()));
                Ok(file)
            }
            Err(err) if err.is_not_found() => {
                self.update(|inner| {
                    if !inner.view.is_known_dir(path) {
                        inner.view.files.remove(path);
                    }
                });
                Err(ForgeError::from_read(path, err))
            }
            Err(err) => Err(ForgeError::from_read(path, err)),
        }
    }

    // ------------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------------

    /// Generate a plan against the snapshot from [`load_context`](Self::load_context).
    pub async fn create_plan(&self, prompt: &str) -> ForgeResult<Plan> {
        let snapshot = {
            let inner = self.lock();
            if inner.view.snapshot.is_empty() {
                CONTEXT_UNAVAILABLE.to_string()
            } else {
                inner.view.snapshot.clone()
            }
        };
        self.create_plan_with_snapshot(prompt, &snapshot).await
    }

    /// Ask the planner model for a plan and make it the current plan.
    ///
    /// Unparseable model output yields a single manual-review step instead of
    /// an error. Gateway failures are returned and leave the current plan in
    /// place.
    pub async fn create_plan_with_snapshot(&self, prompt: &str, snapshot: &str) -> ForgeResult<Plan> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ForgeError::EmptyPrompt);
        }

        self.log(format!("Planning: {}", truncate(prompt, 80)));
        let messages = plan_messages(prompt, snapshot);
        let raw = match self
            .chat
            .complete(self.models.id(Model::Planner), &messages)
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                let err = ForgeError::from_model(err);
                self.log(format!("Planning failed: {}", err));
                return Err(err);
            }
        };

        let (plan, fell_back) = match parse_plan(&raw) {
            Ok(plan) => (plan, false),
            Err(err) => {
                tracing::warn!("falling back to manual review plan: {}", err);
                (Plan::fallback(prompt), true)
            }
        };

        self.update(|inner| {
            inner.plan_epoch += 1;
            inner.view.plan = Some(plan.clone());
            if fell_back {
                inner
                    .view
                    .log("Plan could not be parsed; created a manual review step");
            }
            inner.view.log(format!(
                "Plan: {} ({} step{})",
                plan.title,
                plan.steps.len(),
                if plan.steps.len() == 1 { "" } else { "s" }
            ));
        });
        Ok(plan)
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    /// Run one step and stage its result as a [`ProposedEdit`].
    ///
    /// The IN_PROGRESS transition is published before any network call. A
    /// step that is already running is rejected with `StepBusy` and nothing
    /// changes.
    pub async fn execute_step(&self, step_id: &str) -> ForgeResult<ProposedEdit> {
        let (step, epoch, known_dir) = self.update(|inner| {
            let plan = inner.view.plan.as_mut().ok_or(ForgeError::NoPlan)?;
            let step = plan
                .step_mut(step_id)
                .ok_or_else(|| ForgeError::UnknownStep(step_id.to_string()))?;
            step.transition(StepStatus::InProgress)?;
            let step = step.clone();
            inner
                .view
                .log(format!("Executing step {}: {}", step.id, step.title));
            let known_dir = inner.view.is_known_dir(&step.file_path);
            Ok::<_, ForgeError>((step, inner.plan_epoch, known_dir))
        })?;

        let outcome = self.produce_edit(&step, known_dir).await;
        self.finish_step(&step, epoch, outcome)
    }

    async fn produce_edit(&self, step: &Step, known_dir: bool) -> ForgeResult<ProposedEdit> {
        let path = &step.file_path;
        if known_dir {
            return Err(ForgeError::InvalidPath(format!("{} is a directory", path)));
        }

        let change = match step.operation {
            StepOperation::Delete => {
                self.read_remote(path).await?;
                EditChange::Delete
            }
            StepOperation::Create | StepOperation::Update => {
                let current = match self.read_remote(path).await {
                    Ok(file) => file.content,
                    Err(ForgeError::NotFound(_)) => String::new(),
                    Err(err) => return Err(err),
                };
                let messages = execute_messages(path, &step.description, &current);
                let content = self
                    .chat
                    .complete(self.models.id(Model::Coder), &messages)
                    .await
                    .map_err(ForgeError::from_model)?;
                EditChange::Replace(content)
            }
        };

        Ok(ProposedEdit {
            id: Uuid::new_v4(),
            path: path.clone(),
            step_id: step.id.clone(),
            operation: step.operation,
            change,
        })
    }

    fn finish_step(
        &self,
        step: &Step,
        epoch: u64,
        outcome: ForgeResult<ProposedEdit>,
    ) -> ForgeResult<ProposedEdit> {
        self.update(|inner| {
            let current = if inner.plan_epoch == epoch {
                inner
                    .view
                    .plan
                    .as_mut()
                    .and_then(|p| p.step_mut(&step.id))
            } else {
                None
            };
            let Some(current) = current else {
                inner.view.log(format!(
                    "Dropped result of step {}: the plan was replaced",
                    step.id
                ));
                return Err(ForgeError::PlanReplaced(step.id.clone()));
            };

            match outcome {
                Ok(edit) => {
                    current.transition(StepStatus::Completed)?;
                    inner.view.active_file = Some(edit.path.clone());
                    inner.view.edits.insert(edit.path.clone(), edit.clone());
                    inner.view.log(format!(
                        "Step {} completed: {} {}",
                        step.id,
                        step.operation.label(),
                        edit.path
                    ));
                    Ok(edit)
                }
                Err(err) => {
                    current.transition(StepStatus::Failed)?;
                    inner
                        .view
                        .log(format!("Step {} failed: {}", step.id, err));
                    Err(err)
                }
            }
        })
    }

    // ------------------------------------------------------------------------
    // Staged edits
    // ------------------------------------------------------------------------

    /// Drop the staged edit for `path`.
    pub fn discard(&self, path: &str) -> ForgeResult<ProposedEdit> {
        let path = normalize_repo_path(path).map_err(ForgeError::InvalidPath)?;
        self.update(|inner| {
            let edit = inner
                .view
                .edits
                .remove(&path)
                .ok_or_else(|| ForgeError::NoProposedEdit(path.clone()))?;
            inner.view.log(format!("Discarded changes to {}", path));
            Ok(edit)
        })
    }

    /// Commit the staged edit for `path` with the version token from the
    /// last read. A blank message gets a default.
    ///
    /// On failure nothing local changes and the edit stays staged. A stale
    /// token is reported as [`ForgeError::WriteConflict`].
    pub async fn commit(&self, path: &str, message: Option<&str>) -> ForgeResult<CommitResult> {
        let path = normalize_repo_path(path).map_err(ForgeError::InvalidPath)?;
        let (edit, token) = {
            let inner = self.lock();
            let edit = inner
                .view
                .edits
                .get(&path)
                .cloned()
                .ok_or_else(|| ForgeError::NoProposedEdit(path.clone()))?;
            let token = inner
                .view
                .files
                .get(&path)
                .and_then(|f| f.version_token.clone());
            (edit, token)
        };

        let message = message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_commit_message(&edit, token.is_some()));

        let result = match &edit.change {
            EditChange::Replace(content) => {
                let write = FileWrite {
                    path: path.clone(),
                    content: content.clone(),
                    message,
                    version_token: token,
                };
                self.repository
                    .write_file(&self.repo, &write)
                    .await
                    .map(|outcome| Some(outcome.new_version_token))
            }
            EditChange::Delete => match token.as_deref() {
                Some(token) => self
                    .repository
                    .delete_file(&self.repo, &path, &message, token)
                    .await
                    .map(|()| None),
                None => {
                    let err = ForgeError::WriteFailed {
                        path: path.clone(),
                        message: "no version token; open the file and retry".into(),
                    };
                    self.log(format!("Commit failed: {}", err));
                    return Err(err);
                }
            },
        };

        let new_token = match result {
            Ok(token) => token,
            Err(err) => {
                let err = ForgeError::from_write(&path, err);
                self.log(if err.is_conflict() {
                    format!("Conflict on {}: reload the file and retry", path)
                } else {
                    format!("Commit failed: {}", err)
                });
                return Err(err);
            }
        };

        self.update(|inner| {
            let view = &mut inner.view;
            match (&edit.change, &new_token) {
                (EditChange::Replace(content), Some(token)) => {
                    view.files.insert(
                        path.clone(),
                        RepositoryFile {
                            path: path.clone(),
                            kind: EntryKind::File,
                            content: Some(content.clone()),
                            version_token: Some(token.clone()),
                        },
                    );
                }
                _ => {
                    view.files.remove(&path);
                    if view.active_file.as_deref() == Some(path.as_str()) {
                        view.active_file = None;
                    }
                }
            }
            if view.edits.get(&path).is_some_and(|e| e.id == edit.id) {
                view.edits.remove(&path);
            }
            view.log(match &new_token {
                Some(token) => format!("Committed {} ({})", path, truncate_str(token, 7)),
                None => format!("Deleted {}", path),
            });
        });

        Ok(CommitResult {
            path,
            new_version_token: new_token,
        })
    }
}

fn default_commit_message(edit: &ProposedEdit, exists: bool) -> String {
    let verb = match (&edit.change, exists) {
        (EditChange::Delete, _) => "Delete",
        (EditChange::Replace(_), false) => "Create",
        (EditChange::Replace(_), true) => "Update",
    };
    format!("{} {} via Forge", verb, edit.path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayError;
    use crate::llm::normalize::strip_code_fences;
    use crate::testing::{FakeChat, FakeRepository, Reply};
    use tokio::sync::Notify;

    const LICENSE_PLAN: &str = r#"{"title": "Add license", "steps": [
        {"id": "1", "title": "Create LICENSE", "description": "Add the MIT license text",
         "file_path": "LICENSE", "operation": "CREATE"}
    ]}"#;

    fn repo() -> RepoId {
        RepoId::new("octo", "demo")
    }

    fn coordinator(repository: Arc<FakeRepository>, chat: Arc<FakeChat>) -> Coordinator {
        Coordinator::new(repo(), repository, chat)
    }

    fn plan_json(steps: &[(&str, &str, &str)]) -> String {
        let steps: Vec<_> = steps
            .iter()
            .map(|(id, path, op)| {
                serde_json::json!({
                    "id": id, "title": format!("Step {}", id),
                    "description": format!("change {}", path),
                    "file_path": path, "operation": op,
                })
            })
            .collect();
        serde_json::json!({"title": "Plan", "steps": steps}).to_string()
    }

    // ========================================================================
    // Planning
    // ========================================================================

    #[tokio::test]
    async fn test_empty_prompt_is_rejected() {
        let chat = Arc::new(FakeChat::new());
        let coord = coordinator(Arc::new(FakeRepository::new()), chat.clone());
        assert_eq!(coord.create_plan("   ").await, Err(ForgeError::EmptyPrompt));
        assert!(chat.calls().is_empty());
        assert!(coord.state().plan.is_none());
    }

    #[tokio::test]
    async fn test_plan_steps_start_pending() {
        let chat = Arc::new(FakeChat::new().reply(
            r#"{"title": "T", "steps": [{"id": "1", "title": "A", "file_path": "a.txt",
                "operation": "UPDATE", "status": "COMPLETED"}]}"#,
        ));
        let coord = coordinator(Arc::new(FakeRepository::new()), chat.clone());
        let plan = coord.create_plan("do it").await.unwrap();
        assert!(plan.steps.iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(chat.calls()[0].0, Model::Planner.default_id());
    }

    #[tokio::test]
    async fn test_unparseable_plan_falls_back() {
        let chat = Arc::new(FakeChat::new().reply("I cannot produce JSON today."));
        let coord = coordinator(Arc::new(FakeRepository::new()), chat);
        let plan = coord.create_plan("Add a LICENSE").await.unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].file_path, "docs/README.md");
        assert_eq!(plan.steps[0].operation, StepOperation::Update);
        assert_eq!(plan.steps[0].description, "Add a LICENSE");
        assert_eq!(coord.state().plan, Some(plan));
    }

    #[tokio::test]
    async fn test_plan_without_steps_falls_back() {
        let chat = Arc::new(FakeChat::new().reply(r#"{"title": "Add license"}"#));
        let coord = coordinator(Arc::new(FakeRepository::new()), chat);
        let plan = coord.create_plan("Add a LICENSE").await.unwrap();
        assert_eq!(plan.title, "Manual Review Required");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].file_path, "docs/README.md");
        assert_eq!(plan.steps[0].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_plan_gateway_failure_is_surfaced() {
        let chat = Arc::new(FakeChat::new().fail(GatewayError::auth_failed("401")));
        let coord = coordinator(Arc::new(FakeRepository::new()), chat);
        let err = coord.create_plan("Add a LICENSE").await.unwrap_err();
        assert!(matches!(err, ForgeError::Authentication(_)));
        assert!(coord.state().plan.is_none());
    }

    #[tokio::test]
    async fn test_plan_uses_loaded_snapshot() {
        let repository = Arc::new(FakeRepository::new().with_file("README.md", "# Demo"));
        let chat = Arc::new(FakeChat::new().reply(LICENSE_PLAN));
        let coord = coordinator(repository.clone(), chat.clone());

        coord.load_context().await.unwrap();
        let writes_before = repository.writes().len();
        coord.create_plan("Add a LICENSE").await.unwrap();

        let (_, messages) = &chat.calls()[0];
        assert!(messages[0].content.contains("Repo: octo/demo"));
        assert!(messages[0].content.contains("# Demo"));
        assert_eq!(messages[1].content, "Add a LICENSE");
        assert_eq!(repository.writes().len(), writes_before);
    }

    #[tokio::test]
    async fn test_load_context_failure_uses_placeholder() {
        let repository = Arc::new(FakeRepository::new());
        repository.fail_reads(Some(GatewayError::network("offline")));
        let coord = coordinator(repository, Arc::new(FakeChat::new()));

        let err = coord.load_context().await.unwrap_err();
        assert!(matches!(err, ForgeError::Network(_)));
        let state = coord.state();
        assert_eq!(state.snapshot, CONTEXT_UNAVAILABLE);
        assert!(state
            .activity
            .iter()
            .any(|a| a.message.starts_with("Failed to fetch repo details")));
    }

    // ========================================================================
    // Execution
    // ========================================================================

    #[tokio::test]
    async fn test_license_scenario_end_to_end() {
        let repository = Arc::new(FakeRepository::new().with_file("README.md", "# Demo"));
        let chat = Arc::new(
            FakeChat::new()
                .reply(LICENSE_PLAN)
                .reply("MIT License\n\nCopyright (c) 2026"),
        );
        let coord = coordinator(repository.clone(), chat.clone());

        coord.create_plan("Add a LICENSE").await.unwrap();
        let edit = coord.execute_step("1").await.unwrap();
        assert_eq!(edit.path, "LICENSE");
        assert_eq!(edit.proposed_content(), Some("MIT License\n\nCopyright (c) 2026"));

        let state = coord.state();
        assert_eq!(state.step("1").unwrap().status, StepStatus::Completed);
        assert_eq!(state.active_file.as_deref(), Some("LICENSE"));
        assert!(state.edit("LICENSE").is_some());

        let (model, messages) = &chat.calls()[1];
        assert_eq!(model, Model::Coder.default_id());
        assert!(messages[0].content.contains("(new file - no existing content)"));

        let result = coord.commit("LICENSE", None).await.unwrap();
        assert_eq!(result.path, "LICENSE");
        let token = result.new_version_token.unwrap();
        assert_eq!(repository.token("LICENSE"), Some(token.clone()));

        let writes = repository.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].version_token, None);
        assert_eq!(writes[0].message, "Create LICENSE via Forge");

        let state = coord.state();
        assert!(state.edit("LICENSE").is_none());
        let file = state.file("LICENSE").unwrap();
        assert_eq!(file.version_token.as_deref(), Some(token.as_str()));
        assert_eq!(file.content.as_deref(), Some("MIT License\n\nCopyright (c) 2026"));
    }

    #[tokio::test]
    async fn test_execute_reads_existing_content_and_token() {
        let repository = Arc::new(FakeRepository::new().with_file("src/lib.rs", "pub fn a() {}"));
        let chat = Arc::new(
            FakeChat::new()
                .reply(&plan_json(&[("1", "src/lib.rs", "UPDATE")]))
                .reply("pub fn a() {}\npub fn b() {}"),
        );
        let coord = coordinator(repository.clone(), chat.clone());

        coord.create_plan("add b").await.unwrap();
        coord.execute_step("1").await.unwrap();

        let (_, messages) = &chat.calls()[1];
        assert!(messages[0].content.contains("pub fn a() {}"));
        let state = coord.state();
        assert_eq!(
            state.file("src/lib.rs").unwrap().version_token,
            repository.token("src/lib.rs")
        );

        coord.commit("src/lib.rs", Some("Add b")).await.unwrap();
        let writes = repository.writes();
        assert_eq!(writes[0].message, "Add b");
        assert!(writes[0].version_token.is_some());
    }

    #[tokio::test]
    async fn test_unknown_step_and_no_plan() {
        let chat = Arc::new(FakeChat::new().reply(LICENSE_PLAN));
        let coord = coordinator(Arc::new(FakeRepository::new()), chat);
        assert_eq!(coord.execute_step("1").await, Err(ForgeError::NoPlan));
        coord.create_plan("Add a LICENSE").await.unwrap();
        assert_eq!(
            coord.execute_step("9").await,
            Err(ForgeError::UnknownStep("9".into()))
        );
    }

    #[tokio::test]
    async fn test_completed_step_cannot_rerun() {
        let chat = Arc::new(FakeChat::new().reply(LICENSE_PLAN).reply("MIT"));
        let coord = coordinator(Arc::new(FakeRepository::new()), chat);
        coord.create_plan("Add a LICENSE").await.unwrap();
        coord.execute_step("1").await.unwrap();
        assert!(matches!(
            coord.execute_step("1").await,
            Err(ForgeError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_step_keeps_prior_edit_and_can_retry() {
        let chat = Arc::new(
            FakeChat::new()
                .reply(&plan_json(&[("1", "a.txt", "CREATE"), ("2", "a.txt", "UPDATE")]))
                .reply("first")
                .fail(GatewayError::generic("model overloaded"))
                .reply("second"),
        );
        let coord = coordinator(Arc::new(FakeRepository::new()), chat);
        coord.create_plan("edit a").await.unwrap();

        let first = coord.execute_step("1").await.unwrap();
        let err = coord.execute_step("2").await.unwrap_err();
        assert_eq!(err, ForgeError::Gateway("model overloaded".into()));

        let state = coord.state();
        assert_eq!(state.step("2").unwrap().status, StepStatus::Failed);
        assert_eq!(state.edit("a.txt"), Some(&first));

        coord.execute_step("2").await.unwrap();
        let state = coord.state();
        assert_eq!(state.step("2").unwrap().status, StepStatus::Completed);
        assert_eq!(state.edit("a.txt").unwrap().proposed_content(), Some("second"));
    }

    #[tokio::test]
    async fn test_busy_step_is_rejected_without_state_change() {
        let gate = Arc::new(Notify::new());
        let chat = Arc::new(FakeChat::new().reply(LICENSE_PLAN));
        chat.push(Reply::Gated(gate.clone(), "MIT".into()));
        let coord = coordinator(Arc::new(FakeRepository::new()), chat.clone());
        coord.create_plan("Add a LICENSE").await.unwrap();

        let running = coord.execute_step("1");
        tokio::pin!(running);
        assert!(futures::poll!(&mut running).is_pending());
        assert_eq!(coord.state().step("1").unwrap().status, StepStatus::InProgress);

        let before = coord.state().activity.len();
        assert_eq!(
            coord.execute_step("1").await,
            Err(ForgeError::StepBusy("1".into()))
        );
        assert_eq!(coord.state().activity.len(), before);
        assert_eq!(chat.calls().len(), 2);

        gate.notify_one();
        running.await.unwrap();
        assert_eq!(coord.state().step("1").unwrap().status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_in_progress_is_published_before_network() {
        let gate = Arc::new(Notify::new());
        let chat = Arc::new(FakeChat::new().reply(LICENSE_PLAN));
        chat.push(Reply::Gated(gate.clone(), "MIT".into()));
        let repository = Arc::new(FakeRepository::new());
        let coord = coordinator(repository.clone(), chat);
        coord.create_plan("Add a LICENSE").await.unwrap();

        let mut rx = coord.subscribe();
        assert_eq!(
            rx.borrow_and_update().step("1").unwrap().status,
            StepStatus::Pending
        );
        let running = coord.execute_step("1");
        tokio::pin!(running);
        assert!(futures::poll!(&mut running).is_pending());

        assert!(rx.has_changed().unwrap());
        assert_eq!(
            rx.borrow_and_update().step("1").unwrap().status,
            StepStatus::InProgress
        );
        assert_eq!(repository.read_count(), 1);
        gate.notify_one();
        running.await.unwrap();
        let published = rx.borrow_and_update().clone();
        assert_eq!(published.step("1").unwrap().status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_steps_on_same_path_last_response_wins() {
        let gate = Arc::new(Notify::new());
        let chat = Arc::new(
            FakeChat::new().reply(&plan_json(&[("1", "a.txt", "CREATE"), ("2", "a.txt", "UPDATE")])),
        );
        chat.push(Reply::Gated(gate.clone(), "slow".into()));
        chat.push(Reply::Text("fast".into()));
        let coord = coordinator(Arc::new(FakeRepository::new()), chat);
        coord.create_plan("edit a").await.unwrap();

        let slow = coord.execute_step("1");
        tokio::pin!(slow);
        assert!(futures::poll!(&mut slow).is_pending());
        coord.execute_step("2").await.unwrap();
        assert_eq!(coord.state().edit("a.txt").unwrap().proposed_content(), Some("fast"));

        gate.notify_one();
        slow.await.unwrap();
        let state = coord.state();
        assert_eq!(state.edit("a.txt").unwrap().proposed_content(), Some("slow"));
        assert_eq!(state.edit("a.txt").unwrap().step_id, "1");
    }

    #[tokio::test]
    async fn test_plan_replaced_mid_run_drops_result() {
        let gate = Arc::new(Notify::new());
        let chat = Arc::new(FakeChat::new().reply(LICENSE_PLAN));
        chat.push(Reply::Gated(gate.clone(), "MIT".into()));
        chat.push(Reply::Text(plan_json(&[("1", "NOTICE", "CREATE")])));
        let coord = coordinator(Arc::new(FakeRepository::new()), chat);
        coord.create_plan("Add a LICENSE").await.unwrap();

        let running = coord.execute_step("1");
        tokio::pin!(running);
        assert!(futures::poll!(&mut running).is_pending());
        coord.create_plan("Add a NOTICE").await.unwrap();

        gate.notify_one();
        assert_eq!(running.await, Err(ForgeError::PlanReplaced("1".into())));
        let state = coord.state();
        assert!(state.edits.is_empty());
        assert_eq!(state.step("1").unwrap().status, StepStatus::Pending);
        assert_eq!(state.step("1").unwrap().file_path, "NOTICE");
    }

    #[tokio::test]
    async fn test_directory_target_fails_step() {
        let repository = Arc::new(FakeRepository::new().with_file("src/main.rs", "fn main() {}"));
        let chat = Arc::new(FakeChat::new().reply(&plan_json(&[("1", "src", "UPDATE")])));
        let coord = coordinator(repository, chat.clone());
        coord.load_context().await.unwrap();
        coord.create_plan("touch src").await.unwrap();

        let err = coord.execute_step("1").await.unwrap_err();
        assert!(matches!(err, ForgeError::InvalidPath(_)));
        assert_eq!(coord.state().step("1").unwrap().status, StepStatus::Failed);
        assert_eq!(chat.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_step_stages_deletion() {
        let repository = Arc::new(FakeRepository::new().with_file("old.txt", "bye"));
        let chat = Arc::new(FakeChat::new().reply(&plan_json(&[("1", "old.txt", "DELETE")])));
        let coord = coordinator(repository.clone(), chat.clone());
        coord.create_plan("remove old").await.unwrap();

        let edit = coord.execute_step("1").await.unwrap();
        assert!(edit.is_delete());
        assert_eq!(chat.calls().len(), 1);

        let result = coord.commit("old.txt", None).await.unwrap();
        assert_eq!(result.new_version_token, None);
        assert_eq!(repository.deletes(), vec!["old.txt".to_string()]);
        let state = coord.state();
        assert!(state.file("old.txt").is_none());
        assert!(state.edits.is_empty());
    }

    #[tokio::test]
    async fn test_delete_of_missing_file_fails_step() {
        let chat = Arc::new(FakeChat::new().reply(&plan_json(&[("1", "gone.txt", "DELETE")])));
        let coord = coordinator(Arc::new(FakeRepository::new()), chat);
        coord.create_plan("remove gone").await.unwrap();
        assert_eq!(
            coord.execute_step("1").await,
            Err(ForgeError::NotFound("gone.txt".into()))
        );
        assert_eq!(coord.state().step("1").unwrap().status, StepStatus::Failed);
    }

    // ========================================================================
    // Commit & discard
    // ========================================================================

    #[tokio::test]
    async fn test_stale_token_conflict_keeps_local_state() {
        let repository = Arc::new(FakeRepository::new().with_file("a.txt", "v1"));
        let chat = Arc::new(
            FakeChat::new()
                .reply(&plan_json(&[("1", "a.txt", "UPDATE")]))
                .reply("v2"),
        );
        let coord = coordinator(repository.clone(), chat);
        coord.create_plan("bump").await.unwrap();
        coord.execute_step("1").await.unwrap();
        let before = coord.state().file("a.txt").cloned().unwrap();

        repository.put("a.txt", "someone else");
        let err = coord.commit("a.txt", None).await.unwrap_err();
        assert!(err.is_conflict());

        let state = coord.state();
        assert_eq!(state.file("a.txt"), Some(&before));
        assert_eq!(state.edit("a.txt").unwrap().proposed_content(), Some("v2"));
        assert_eq!(repository.content("a.txt").as_deref(), Some("someone else"));

        // Reloading picks up the new token; the retry succeeds.
        coord.open_file("a.txt").await.unwrap();
        coord.commit("a.txt", None).await.unwrap();
        assert_eq!(repository.content("a.txt").as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_commit_keeps_trailing_newline_and_indentation() {
        let repository = Arc::new(FakeRepository::new().with_file("Cargo.toml", "[package]\n"));
        let body = strip_code_fences("```toml\n[package]\nname = \"demo\"\n\n  # indented\n```\n");
        let chat = Arc::new(
            FakeChat::new()
                .reply(&plan_json(&[("1", "Cargo.toml", "UPDATE")]))
                .reply(&body),
        );
        let coord = coordinator(repository.clone(), chat);

        coord.create_plan("name the package").await.unwrap();
        coord.execute_step("1").await.unwrap();
        coord.commit("Cargo.toml", None).await.unwrap();

        let expected = "[package]\nname = \"demo\"\n\n  # indented\n";
        assert_eq!(repository.content("Cargo.toml").as_deref(), Some(expected));
        assert_eq!(
            coord.state().file("Cargo.toml").unwrap().content.as_deref(),
            Some(expected)
        );
    }

    #[tokio::test]
    async fn test_sequential_commits_use_refreshed_token() {
        let repository = Arc::new(FakeRepository::new().with_file("a.txt", "v1"));
        let chat = Arc::new(
            FakeChat::new()
                .reply(&plan_json(&[("1", "a.txt", "UPDATE")]))
                .reply("v2")
                .reply(&plan_json(&[("1", "a.txt", "UPDATE")]))
                .reply("v3"),
        );
        let coord = coordinator(repository.clone(), chat);

        coord.create_plan("first").await.unwrap();
        coord.execute_step("1").await.unwrap();
        let first = coord.commit("a.txt", None).await.unwrap();

        coord.create_plan("second").await.unwrap();
        coord.execute_step("1").await.unwrap();
        let second = coord.commit("a.txt", None).await.unwrap();

        let writes = repository.writes();
        assert_eq!(writes[1].version_token, first.new_version_token);
        assert_ne!(first.new_version_token, second.new_version_token);
        assert_eq!(repository.content("a.txt").as_deref(), Some("v3"));
    }

    #[tokio::test]
    async fn test_commit_failure_retains_edit() {
        let repository = Arc::new(FakeRepository::new());
        let chat = Arc::new(FakeChat::new().reply(LICENSE_PLAN).reply("MIT"));
        let coord = coordinator(repository.clone(), chat);
        coord.create_plan("Add a LICENSE").await.unwrap();
        coord.execute_step("1").await.unwrap();

        repository.fail_writes(Some(GatewayError::generic("server error")));
        let err = coord.commit("LICENSE", None).await.unwrap_err();
        assert!(matches!(err, ForgeError::WriteFailed { .. }));
        assert!(coord.state().edit("LICENSE").is_some());
        assert!(coord.state().file("LICENSE").is_none());

        repository.fail_writes(Some(GatewayError::auth_failed("revoked")));
        assert!(matches!(
            coord.commit("LICENSE", None).await,
            Err(ForgeError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_without_edit() {
        let coord = coordinator(Arc::new(FakeRepository::new()), Arc::new(FakeChat::new()));
        assert_eq!(
            coord.commit("a.txt", None).await,
            Err(ForgeError::NoProposedEdit("a.txt".into()))
        );
    }

    #[tokio::test]
    async fn test_discard() {
        let chat = Arc::new(FakeChat::new().reply(LICENSE_PLAN).reply("MIT"));
        let coord = coordinator(Arc::new(FakeRepository::new()), chat);
        coord.create_plan("Add a LICENSE").await.unwrap();
        coord.execute_step("1").await.unwrap();

        let edit = coord.discard("./LICENSE").unwrap();
        assert_eq!(edit.path, "LICENSE");
        assert!(coord.state().edits.is_empty());
        assert_eq!(
            coord.discard("LICENSE"),
            Err(ForgeError::NoProposedEdit("LICENSE".into()))
        );
    }

    // ========================================================================
    // Browsing
    // ========================================================================

    #[tokio::test]
    async fn test_list_and_open() {
        let repository = Arc::new(
            FakeRepository::new()
                .with_file("src/main.rs", "fn main() {}")
                .with_file("src/lib.rs", "")
                .with_file("README.md", "hi"),
        );
        let coord = coordinator(repository.clone(), Arc::new(FakeChat::new()));

        let root = coord.list_directory("").await.unwrap();
        assert_eq!(root.len(), 2);
        let src = coord.list_directory("/src").await.unwrap();
        assert_eq!(src.len(), 2);

        assert!(matches!(
            coord.open_file("src").await,
            Err(ForgeError::InvalidPath(_))
        ));
        let file = coord.open_file("src/main.rs").await.unwrap();
        assert_eq!(file.content.as_deref(), Some("fn main() {}"));
        assert_eq!(file.version_token, repository.token("src/main.rs"));
        assert_eq!(coord.state().active_file.as_deref(), Some("src/main.rs"));

        assert!(matches!(
            coord.open_file("../secret").await,
            Err(ForgeError::InvalidPath(_))
        ));
        assert_eq!(
            coord.open_file("missing.rs").await,
            Err(ForgeError::NotFound("missing.rs".into()))
        );
    }

    #[test]
    fn test_default_commit_message() {
        let edit = ProposedEdit {
            id: Uuid::new_v4(),
            path: "a.txt".into(),
            step_id: "1".into(),
            operation: StepOperation::Update,
            change: EditChange::Replace("x".into()),
        };
        assert_eq!(default_commit_message(&edit, true), "Update a.txt via Forge");
        assert_eq!(default_commit_message(&edit, false), "Create a.txt via Forge");
        let delete = ProposedEdit {
            change: EditChange::Delete,
            ..edit
        };
        assert_eq!(default_commit_message(&delete, true), "Delete a.txt via Forge");
    }
}
