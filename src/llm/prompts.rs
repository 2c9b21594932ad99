// ═══════════════════════════════════════════════════════════════════════════════
// PROMPTS
// ═══════════════════════════════════════════════════════════════════════════════

use super::models::ChatMessage;
use crate::util::truncate_str;

/// Repository context beyond this many characters is cut before planning.
pub const MAX_PLAN_CONTEXT_CHARS: usize = 2000;

/// User turn sent with every step execution
pub const EXECUTE_USER: &str = "Execute the changes.";

const PLAN_RESPONSE_FORMAT: &str = r#"Response Format:
{
  "title": "Short Plan Title",
  "steps": [
    {
      "id": "1",
      "title": "Task Title",
      "description": "Detailed description of what to change",
      "file_path": "src/App.tsx",
      "operation": "UPDATE"
    }
  ]
}

Rules:
- "operation" is one of CREATE, UPDATE, DELETE.
- "file_path" is relative to the repository root.
- One file per step. Order steps so each builds on the previous ones.
- Return ONLY the JSON. No markdown fences, no commentary."#;

/// System prompt for plan generation.
pub fn plan_system(repository_snapshot: &str) -> String {
    let context = truncate_str(repository_snapshot, MAX_PLAN_CONTEXT_CHARS);
    let marker = if context.len() < repository_snapshot.len() {
        "... (truncated for context limit)"
    } else {
        ""
    };
    format!(
        "You are a Principal Software Architect.\n\
         Analyze the following repository context and the user's request.\n\
         Generate a detailed, step-by-step implementation plan (JSON format).\n\n\
         Repository Context:\n{}{}\n\n{}",
        context, marker, PLAN_RESPONSE_FORMAT
    )
}

pub fn plan_messages(prompt: &str, repository_snapshot: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(plan_system(repository_snapshot)),
        ChatMessage::user(prompt.trim()),
    ]
}

/// System prompt for executing one step against the current file content.
pub fn execute_system(file_path: &str, step_description: &str, current_code: &str) -> String {
    let current = if current_code.is_empty() {
        "(new file - no existing content)"
    } else {
        current_code
    };
    format!(
        "You are a Senior Full-Stack Engineer.\n\
         You are executing a specific task from a plan.\n\n\
         File: {}\n\
         Task: {}\n\n\
         Current Code:\n{}\n\n\
         Output the FULL modified file content. Do not use markdown blocks, just the raw code.",
        file_path, step_description, current
    )
}

pub fn execute_messages(
    file_path: &str,
    step_description: &str,
    current_code: &str,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(execute_system(file_path, step_description, current_code)),
        ChatMessage::user(EXECUTE_USER),
    ]
}
