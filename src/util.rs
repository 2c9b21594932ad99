/// Maximum length for error body content in error messages
const MAX_ERROR_BODY_LEN: usize = 200;

pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Truncate a string without an ellipsis (Unicode-safe)
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    if s.chars().count() <= max_chars {
        s
    } else {
        let byte_idx = s
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        &s[..byte_idx]
    }
}

/// Sanitize a remote error body to prevent credential leakage.
/// Truncates long responses and redacts potential secrets.
pub fn sanitize_error_body(body: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-",         // OpenRouter key prefix
        "ghp_",        // GitHub personal access token prefix
        "gho_",        // GitHub OAuth token prefix
        "github_pat_", // GitHub fine-grained PAT prefix
    ];

    let trimmed = body.trim();
    let truncated = if trimmed.chars().count() > MAX_ERROR_BODY_LEN {
        format!(
            "{}... (truncated)",
            truncate_str(trimmed, MAX_ERROR_BODY_LEN)
        )
    } else {
        trimmed.to_string()
    };

    let lower = truncated.to_lowercase();
    for pattern in SECRET_PATTERNS {
        if lower.contains(pattern) {
            return "(error details redacted - may contain sensitive data)".to_string();
        }
    }

    truncated
}

/// Normalize a repository-relative path as GitHub expects it.
///
/// Strips leading `./` and `/`, collapses repeated separators and rejects
/// parent-directory components.
pub fn normalize_repo_path(path: &str) -> Result<String, String> {
    let mut parts = Vec::new();
    for part in path.trim().split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => return Err(format!("Path escapes the repository: {}", path)),
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}
