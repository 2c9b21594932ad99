//! First-run setup
//!
//! Collects the GitHub token (required) and an optional OpenRouter key,
//! stores them in the credential store, and checks the token against the API.
//! Settings in effect (for example a `--branch` override) are written to the
//! config file at the end.

use crate::credentials::{
    looks_like_github_token, looks_like_model_key, CredentialProvider, StoredCredentials,
    DEFAULT_API_KEY_ENV,
};
use crate::config::Config;
use crate::github::GitHubGateway;
use anyhow::{anyhow, Context, Result};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// What to do with the stored model key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyChoice {
    Keep,
    Clear,
    Set(String),
}

/// Empty input keeps the current key, `-` removes it.
pub fn parse_key_choice(input: &str) -> KeyChoice {
    match input.trim() {
        "" => KeyChoice::Keep,
        "-" => KeyChoice::Clear,
        key => KeyChoice::Set(key.to_string()),
    }
}

/// Setup is needed until a GitHub token is available.
pub fn needs_onboarding(credentials: &dyn CredentialProvider) -> bool {
    credentials.repository_token().is_none()
}

async fn prompt<R, W>(input: &mut R, output: &mut W, label: &str) -> io::Result<String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output.write_all(format!("  {}: ", label).as_bytes()).await?;
    output.flush().await?;
    let mut line = String::new();
    input.read_line(&mut line).await?;
    Ok(line.trim().to_string())
}

/// Store the token and read it back.
pub fn store_github_token(credentials: &StoredCredentials, token: &str) -> Result<(), String> {
    credentials.set_repository_token(token).map_err(|e| {
        format!(
            "Failed to store GitHub token in {}: {}. \
             You can set the GITHUB_TOKEN environment variable instead.",
            credentials.store_label(),
            e
        )
    })?;
    credentials.reload();
    match credentials.repository_token() {
        Some(stored) if stored == token.trim() => Ok(()),
        Some(_) => Err(format!(
            "Token verification failed: a different token is active. \
             Is GITHUB_TOKEN set? ({})",
            credentials.store_label()
        )),
        None => Err(format!(
            "Token verification failed: token was not persisted to {}.",
            credentials.store_label()
        )),
    }
}

/// Apply the model key choice; returns a short status line.
pub fn apply_key_choice(credentials: &StoredCredentials, choice: KeyChoice) -> Result<String, String> {
    let status = match choice {
        KeyChoice::Keep => match credentials.model_api_key() {
            Some(_) => "Keeping the stored OpenRouter key".to_string(),
            None => format!("No OpenRouter key stored; using {} if set", DEFAULT_API_KEY_ENV),
        },
        KeyChoice::Clear => {
            credentials.clear_model_api_key()?;
            "Removed the stored OpenRouter key".to_string()
        }
        KeyChoice::Set(key) => {
            credentials.set_model_api_key(&key)?;
            "Saved the OpenRouter key".to_string()
        }
    };
    credentials.reload();
    Ok(status)
}

/// Interactive setup on stdin/stdout.
pub async fn run_setup(
    credentials: &StoredCredentials,
    github: &GitHubGateway,
    config: &Config,
) -> Result<()> {
    let mut input = BufReader::new(tokio::io::stdin());
    let mut output = tokio::io::stdout();

    println!();
    println!("  ┌─────────────────────────────────────────────────────────┐");
    println!("  │  FORGE SETUP                                            │");
    println!("  └─────────────────────────────────────────────────────────┘");
    println!();
    println!("  Forge needs a GitHub personal access token with read/write");
    println!("  access to repository contents.");
    println!("    Create one at https://github.com/settings/tokens");
    println!();
    println!("  Credentials are stored in your {}.", credentials.store_label());
    println!();

    let current = credentials.repository_token();
    let label = if current.is_some() {
        "GitHub token (Enter to keep current)"
    } else {
        "GitHub token"
    };
    let token = prompt(&mut input, &mut output, label)
        .await
        .context("Failed to read token")?;

    if token.is_empty() {
        if current.is_none() {
            return Err(anyhow!("No GitHub token provided"));
        }
    } else {
        if !looks_like_github_token(&token) {
            println!("  Warning: that doesn't look like a GitHub token (ghp_..., github_pat_...)");
            println!("     Saving anyway...");
        }
        store_github_token(credentials, &token).map_err(|e| anyhow!(e))?;
    }

    match github.validate_token().await {
        Ok(login) => println!("  + Authenticated as {}", login),
        Err(err) if err.is_auth_failure() => {
            return Err(anyhow!("GitHub rejected the token: {}", err.message));
        }
        Err(err) => println!("  ! Couldn't verify the token right now: {}", err),
    }

    println!();
    println!("  Optional: your own OpenRouter key (https://openrouter.ai/keys).");
    println!("  Enter to keep the current setting, '-' to remove a stored key.");
    let key = prompt(&mut input, &mut output, "OpenRouter key")
        .await
        .context("Failed to read key")?;
    let choice = parse_key_choice(&key);
    if let KeyChoice::Set(ref k) = choice {
        if !looks_like_model_key(k) {
            println!("  Warning: OpenRouter keys usually start with sk-");
        }
    }
    let status = apply_key_choice(credentials, choice).map_err(|e| anyhow!(e))?;
    println!("  + {}", status);

    config.save().map_err(|e| anyhow!(e))?;
    println!("  + Settings saved to {}", Config::config_location());
    println!();
    Ok(())
}
