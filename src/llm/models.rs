use serde::{Deserialize, Serialize};

/// Model roles used by the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    /// Turns a prompt + repository snapshot into a plan.
    Planner,
    /// Produces full replacement file content for a single step.
    Coder,
}

impl Model {
    /// Default OpenRouter model id for this role (overridable in config).
    pub fn default_id(&self) -> &'static str {
        match self {
            Model::Planner => "mistralai/devstral-2512:free",
            Model::Coder => "openai/gpt-oss-120b:free",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Model::Planner => "planner",
            Model::Coder => "coder",
        }
    }
}

/// Chat message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Resolved model ids for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub planner: String,
    pub coder: String,
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self {
            planner: Model::Planner.default_id().to_string(),
            coder: Model::Coder.default_id().to_string(),
        }
    }
}

impl ModelSelection {
    pub fn id(&self, model: Model) -> &str {
        match model {
            Model::Planner => &self.planner,
            Model::Coder => &self.coder,
        }
    }
}
