//! Repository snapshot used as planning context

use crate::gateway::GatewayError;
use crate::github::{RepoId, RepositoryEntry, RepositoryGateway};
use crate::util::truncate_str;

/// Placeholder planning context when the repository couldn't be read
pub const CONTEXT_UNAVAILABLE: &str = "// Context unavailable";

pub const DEFAULT_README_EXCERPT_CHARS: usize = 1000;
pub const DEFAULT_MAX_SNAPSHOT_CHARS: usize = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotLimits {
    pub readme_excerpt_chars: usize,
    pub max_chars: usize,
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self {
            readme_excerpt_chars: DEFAULT_README_EXCERPT_CHARS,
            max_chars: DEFAULT_MAX_SNAPSHOT_CHARS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RepositorySnapshot {
    pub text: String,
    pub root_entries: Vec<RepositoryEntry>,
}

fn is_readme(entry: &RepositoryEntry) -> bool {
    !entry.kind.is_dir() && entry.name.eq_ignore_ascii_case("readme.md")
}

/// Root listing plus a README excerpt, bounded to `limits.max_chars`.
///
/// A failed README read is logged and left out; a failed root listing is an
/// error.
pub async fn build_snapshot(
    gateway: &dyn RepositoryGateway,
    repo: &RepoId,
    limits: SnapshotLimits,
) -> Result<RepositorySnapshot, GatewayError> {
    let mut entries = gateway.list_directory(repo, "").await?;
    entries.sort_by(|a, b| {
        b.kind
            .is_dir()
            .cmp(&a.kind.is_dir())
            .then_with(|| a.path.cmp(&b.path))
    });

    let mut readme = String::new();
    if let Some(entry) = entries.iter().find(|e| is_readme(e)) {
        match gateway.read_file(repo, &entry.path).await {
            Ok(file) => readme = file.content,
            Err(err) => tracing::warn!(repo = %repo, "couldn't read README: {}", err),
        }
    }

    let file_list = entries
        .iter()
        .map(|e| format!("- {} ({})", e.path, e.kind.label()))
        .collect::<Vec<_>>()
        .join("\n");
    let excerpt = truncate_str(&readme, limits.readme_excerpt_chars);
    let ellipsis = if excerpt.len() < readme.len() { "..." } else { "" };

    let text = format!(
        "Repo: {}\nFiles:\n{}\nREADME:\n{}{}",
        repo, file_list, excerpt, ellipsis
    );
    Ok(RepositorySnapshot {
        text: truncate_str(&text, limits.max_chars).to_string(),
        root_entries: entries,
    })
}
