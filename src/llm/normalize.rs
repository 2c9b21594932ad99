//! Normalization of raw model output
//!
//! Every completion passes through [`strip_code_fences`] once, at the gateway
//! boundary. Structured payloads are then parsed with [`parse_json_payload`],
//! which salvages JSON that arrives wrapped in prose or stray braces.

use regex::Regex;
use std::sync::OnceLock;

fn opening_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\A```[\w+#.-]*[ \t]*\r?\n?").expect("valid fence regex"))
}

fn is_fence_line(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

/// Remove a markdown code fence wrapped around the whole response. Fences
/// inside the body are left alone, and the body keeps its own whitespace,
/// including the final newline before a closing fence.
///
/// A trailing fence is only dropped when it closes something: an opening
/// fence that was stripped, or an unbalanced fence left in the body.
pub fn strip_code_fences(content: &str) -> String {
    let start = content.trim_start();
    let (body, opened) = match opening_fence().find(start) {
        Some(m) => (&start[m.end()..], true),
        None => (content, false),
    };

    let end = body.trim_end();
    let last_line_start = end.rfind('\n').map_or(0, |i| i + 1);
    let last_line = &end[last_line_start..];
    let is_closing = last_line.trim() == "```";
    let unbalanced = || body.lines().filter(|l| is_fence_line(l)).count() % 2 == 1;

    if is_closing && (opened || unbalanced()) {
        body[..last_line_start].to_string()
    } else {
        body.to_string()
    }
}

fn push_unique_candidate(candidates: &mut Vec<String>, candidate: impl Into<String>) {
    let candidate = candidate.into();
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return;
    }
    if !candidates.iter().any(|existing| existing == trimmed) {
        candidates.push(trimmed.to_string());
    }
}

fn unwrap_outer_wrapper(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.len() < 3 {
        return None;
    }
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        let inner = &trimmed[1..trimmed.len() - 1];
        let inner_trimmed = inner.trim_start();
        if inner_trimmed.starts_with('{') || inner_trimmed.starts_with('[') {
            return Some(inner.trim().to_string());
        }
    }
    None
}

fn extract_balanced_json_from(content: &str, start: usize) -> Option<String> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
                continue;
            }
            if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    let end = start + offset + ch.len_utf8();
                    return Some(content[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn extract_json_objects(content: &str, max_candidates: usize) -> Vec<String> {
    let mut out = Vec::new();
    for (idx, ch) in content.char_indices() {
        if out.len() >= max_candidates {
            break;
        }
        if ch == '{' {
            if let Some(candidate) = extract_balanced_json_from(content, idx) {
                push_unique_candidate(&mut out, candidate);
            }
        }
    }
    out
}

/// Parse a JSON object out of model output, trying a few deterministic
/// salvage candidates before giving up.
pub fn parse_json_payload<T>(content: &str) -> Result<T, String>
where
    T: serde::de::DeserializeOwned,
{
    let mut candidates = Vec::new();
    push_unique_candidate(&mut candidates, content);
    push_unique_candidate(&mut candidates, strip_code_fences(content));

    let mut idx = 0usize;
    while idx < candidates.len() {
        let current = candidates[idx].clone();
        for extracted in extract_json_objects(&current, 4) {
            push_unique_candidate(&mut candidates, extracted);
        }
        if let Some(unwrapped) = unwrap_outer_wrapper(&current) {
            push_unique_candidate(&mut candidates, unwrapped);
        }
        idx += 1;
    }

    let mut last_err: Option<String> = None;
    for candidate in candidates {
        match serde_json::from_str::<T>(&candidate) {
            Ok(data) => return Ok(data),
            Err(err) => last_err = Some(err.to_string()),
        }
    }

    Err(last_err.unwrap_or_else(|| "empty response".to_string()))
}
