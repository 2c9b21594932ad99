//! Forge - plan, execute and commit repository changes from the terminal

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use forge_agent::config::Config;
use forge_agent::credentials::StoredCredentials;
use forge_agent::github::{GitHubGateway, RemoteRepository, RepoId};
use forge_agent::keyring::SystemStore;
use forge_agent::llm::{create_http_client, OpenRouterGateway, OpenRouterTransport};
use forge_agent::util::truncate;
use forge_agent::{app, logging, onboarding, Coordinator};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "forge",
    about = "Plan, execute and commit AI-assisted changes to a GitHub repository",
    version
)]
struct Args {
    /// Repository as owner/name or a GitHub URL
    repo: Option<String>,

    /// Branch to read from and commit to (defaults to the repository default)
    #[arg(short, long)]
    branch: Option<String>,

    /// Create a plan for this request right after connecting
    #[arg(short, long)]
    prompt: Option<String>,

    /// Set up the GitHub token and OpenRouter key, and save settings
    /// (including --branch) to the config file
    #[arg(long)]
    setup: bool,

    /// List repositories the token can access
    #[arg(long)]
    repos: bool,

    /// Filter for --repos (name, description or language)
    #[arg(long, requires = "repos")]
    search: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    let mut config = Config::load();
    if args.branch.is_some() {
        config.branch = args.branch.clone();
    }

    let credentials = Arc::new(StoredCredentials::from_env(Arc::new(SystemStore::from_env())));
    let http = create_http_client(config.request_timeout_secs)?;
    let github = Arc::new(
        GitHubGateway::new(http.clone(), &config.github_api_url, credentials.clone())?
            .with_branch(config.branch.clone()),
    );

    if args.setup {
        return onboarding::run_setup(&credentials, &github, &config).await;
    }

    if onboarding::needs_onboarding(credentials.as_ref()) {
        onboarding::run_setup(&credentials, &github, &config).await?;
    }

    if args.repos {
        return list_repositories(&github, args.search.as_deref()).await;
    }

    let repo_arg = args
        .repo
        .ok_or_else(|| anyhow!("No repository given. Usage: forge <owner/repo>, or forge --repos to list them"))?;
    let repo = RepoId::parse(&repo_arg)
        .with_context(|| format!("'{}' is not a GitHub repository (expected owner/repo)", repo_arg))?;

    let chat = OpenRouterGateway::new(
        OpenRouterTransport::new(http, config.openrouter_url.clone()),
        credentials.clone(),
    )
    .with_temperature(config.temperature);

    let coordinator = Coordinator::new(repo, github, Arc::new(chat))
        .with_models(config.models())
        .with_snapshot_limits(config.snapshot_limits());

    app::run_session(Arc::new(coordinator), args.prompt).await
}

async fn list_repositories(github: &GitHubGateway, search: Option<&str>) -> Result<()> {
    let repos = github
        .list_user_repositories()
        .await
        .map_err(|e| anyhow!("Failed to list repositories: {}", e))?;
    let query = search.unwrap_or("");
    let matching: Vec<&RemoteRepository> = repos.iter().filter(|r| r.matches(query)).collect();

    if matching.is_empty() {
        println!("  No repositories found.");
        return Ok(());
    }
    for repo in matching {
        let updated = repo
            .updated_at
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        println!(
            "  {:<40} {:>5}★ {:<12} {}{}",
            repo.full_name,
            repo.stargazers_count,
            repo.language.as_deref().unwrap_or("-"),
            updated,
            if repo.private { "  (private)" } else { "" }
        );
        if let Some(desc) = repo.description.as_deref().filter(|d| !d.is_empty()) {
            println!("      {}", truncate(desc, 90));
        }
    }
    Ok(())
}
