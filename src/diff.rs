//! Line diffs of staged edits against the last-read file content

use crate::coordinator::{EditChange, ProposedEdit};
use similar::{ChangeTag, TextDiff};
use std::fmt::Write as _;

/// Context lines kept around each change
pub const DEFAULT_CONTEXT: usize = 3;

/// A single line in a diff hunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Context(String),
    Add(String),
    Remove(String),
}

impl DiffLine {
    pub fn content(&self) -> &str {
        match self {
            DiffLine::Context(s) => s,
            DiffLine::Add(s) => s,
            DiffLine::Remove(s) => s,
        }
    }

    fn prefix(&self) -> char {
        match self {
            DiffLine::Context(_) => ' ',
            DiffLine::Add(_) => '+',
            DiffLine::Remove(_) => '-',
        }
    }
}

/// A hunk in a unified diff (1-based line numbers)
#[derive(Debug, Clone, PartialEq)]
pub struct DiffHunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// (additions, removals)
    pub fn summary(&self) -> (usize, usize) {
        let adds = self.lines.iter().filter(|l| matches!(l, DiffLine::Add(_))).count();
        let removes = self.lines.iter().filter(|l| matches!(l, DiffLine::Remove(_))).count();
        (adds, removes)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileDiff {
    pub path: String,
    /// No prior content (new file)
    pub created: bool,
    pub deleted: bool,
    pub hunks: Vec<DiffHunk>,
}

impl FileDiff {
    /// Total additions and removals
    pub fn stats(&self) -> (usize, usize) {
        self.hunks.iter().fold((0, 0), |acc, h| {
            let (a, r) = h.summary();
            (acc.0 + a, acc.1 + r)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    /// Render as unified diff text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let old = if self.created {
            "/dev/null".to_string()
        } else {
            format!("a/{}", self.path)
        };
        let new = if self.deleted {
            "/dev/null".to_string()
        } else {
            format!("b/{}", self.path)
        };
        let _ = writeln!(out, "--- {}", old);
        let _ = writeln!(out, "+++ {}", new);
        for hunk in &self.hunks {
            let _ = writeln!(
                out,
                "@@ -{},{} +{},{} @@",
                hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count
            );
            for line in &hunk.lines {
                let _ = writeln!(out, "{}{}", line.prefix(), line.content());
            }
        }
        out
    }
}

/// Diff `old` against `new` line by line.
pub fn diff_text(path: &str, old: Option<&str>, new: Option<&str>, context: usize) -> FileDiff {
    let before = old.unwrap_or("");
    let after = new.unwrap_or("");
    let diff = TextDiff::from_lines(before, after);

    let mut hunks = Vec::new();
    for group in diff.grouped_ops(context) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        let old_range = first.old_range().start..last.old_range().end;
        let new_range = first.new_range().start..last.new_range().end;

        let mut lines = Vec::new();
        for op in &group {
            for change in diff.iter_changes(op) {
                let text = change.value().trim_end_matches(['\n', '\r']).to_string();
                lines.push(match change.tag() {
                    ChangeTag::Equal => DiffLine::Context(text),
                    ChangeTag::Insert => DiffLine::Add(text),
                    ChangeTag::Delete => DiffLine::Remove(text),
                });
            }
        }

        hunks.push(DiffHunk {
            old_start: hunk_start(old_range.start, old_range.len()),
            old_count: old_range.len(),
            new_start: hunk_start(new_range.start, new_range.len()),
            new_count: new_range.len(),
            lines,
        });
    }

    FileDiff {
        path: path.to_string(),
        created: old.is_none(),
        deleted: new.is_none(),
        hunks,
    }
}

// Empty ranges point at the line before, as in `diff -u`.
fn hunk_start(start: usize, len: usize) -> usize {
    if len == 0 {
        start
    } else {
        start + 1
    }
}

/// Diff a staged edit against the content it would replace.
pub fn diff_edit(edit: &ProposedEdit, current: Option<&str>) -> FileDiff {
    let new = match &edit.change {
        EditChange::Replace(text) => Some(text.as_str()),
        EditChange::Delete => None,
    };
    diff_text(&edit.path, current, new, DEFAULT_CONTEXT)
}
