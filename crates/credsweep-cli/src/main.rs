mod display;
mod shortcuts;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, CommandFactory, Parser, Subcommand};
use credsweep_core::config::{EnumerationMode, ScanConfig};
use credsweep_core::providers::azure::AzureAdapter;
use credsweep_core::providers::gitea::GiteaAdapter;
use credsweep_core::providers::github::GitHubAdapter;
use credsweep_core::providers::gitlab::GitLabAdapter;
use credsweep_core::providers::ProviderAdapter;
use credsweep_core::http::HttpClient;
use credsweep_core::rules::Confidence;
use credsweep_core::{Reporter, ScanOrchestrator, ScanSession};

const DEFAULT_RULES_URL: &str = "https://raw.githubusercontent.com/credsweep/rules/main/rules.yml";

#[derive(Parser)]
#[command(
    name = "credsweep",
    version,
    about = "credsweep — scans CI/CD job logs and artifacts for leaked secrets",
    long_about = "Scans GitLab Pipelines, GitHub Actions, Gitea Actions, and Azure DevOps Pipelines for accidentally exposed credentials in job logs and build artifacts.\n\nCombines a regex pattern library with active credential verifiers."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan one or more repositories for leaked secrets
    #[command(group(
        ArgGroup::new("provider").required(true).args(["gitlab", "github", "gitea", "azure"])
    ))]
    #[command(group(
        ArgGroup::new("mode").required(true).args(["owned", "organization", "user", "repo", "search", "public"])
    ))]
    Scan {
        /// GitLab instance base URL (e.g. https://gitlab.com)
        #[arg(long, value_name = "URL")]
        gitlab: Option<String>,

        /// GitHub instance base URL (e.g. https://api.github.com)
        #[arg(long, value_name = "URL")]
        github: Option<String>,

        /// Gitea instance base URL
        #[arg(long, value_name = "URL")]
        gitea: Option<String>,

        /// Azure DevOps organization URL (e.g. https://dev.azure.com/my-org)
        #[arg(long, value_name = "URL")]
        azure: Option<String>,

        /// API token (falls back to GITLAB_TOKEN/GITHUB_TOKEN/GITEA_TOKEN/AZURE_DEVOPS_TOKEN)
        #[arg(long, env = "CREDSWEEP_TOKEN")]
        token: Option<String>,

        /// Scan every repository the token can see
        #[arg(long)]
        owned: bool,

        /// Scan every repository in this organization/group
        #[arg(long, value_name = "NAME")]
        organization: Option<String>,

        /// Scan every repository owned by this user
        #[arg(long, value_name = "NAME")]
        user: Option<String>,

        /// Scan a single repository, given as "owner/name"
        #[arg(long, value_name = "OWNER/NAME")]
        repo: Option<String>,

        /// Scan repositories matching a search query
        #[arg(long, value_name = "QUERY")]
        search: Option<String>,

        /// Scan every public repository on the instance
        #[arg(long)]
        public: bool,

        /// Also download and scan build artifacts, not just job logs
        #[arg(long)]
        artifacts: bool,

        /// Skip artifacts declared larger than this (e.g. "500Mb", "1GiB")
        #[arg(long, default_value = "500Mb", value_name = "SIZE")]
        max_artifact_size: String,

        /// Worker pool size for downloads and detection
        #[arg(long, default_value_t = 4)]
        threads: usize,

        /// Restrict regex findings to these confidence levels (comma-separated)
        #[arg(long, value_delimiter = ',', value_name = "LEVEL")]
        confidence: Vec<Confidence>,

        /// Drop unverified detector hits instead of reporting them at trufflehog-unverified
        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        truffle_hog_verification: Option<bool>,

        /// Cap on the number of runs processed
        #[arg(long, alias = "max-workflows", value_name = "N")]
        runs_limit: Option<usize>,

        /// Only scan runs with id <= this value (single-repo mode only)
        #[arg(long, value_name = "N")]
        start_run_id: Option<u64>,

        /// Directory for the scan's on-disk work queue
        #[arg(long, value_name = "DIR")]
        queue: Option<PathBuf>,

        /// Session cookie for the GitLab/Gitea UI-scraping fallback
        #[arg(long, value_name = "COOKIE")]
        cookie: Option<String>,

        /// Wall-clock timeout per detection call (e.g. "30s")
        #[arg(long, default_value = "30s", value_name = "DURATION")]
        hit_timeout: String,

        /// Write findings as JSON lines to this file in addition to the log
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Rules database URL
        #[arg(long, default_value = DEFAULT_RULES_URL, value_name = "URL")]
        rules_url: String,

        /// Local cache path for the downloaded rules database
        #[arg(long, default_value = "rules.yml", value_name = "PATH")]
        rules_cache: PathBuf,

        /// Verify TLS certificates instead of accepting anything
        #[arg(long)]
        verify_certs: bool,

        /// Never use HTTP_PROXY even if it is set
        #[arg(long)]
        proxy_ignore: bool,

        /// Increase log verbosity (repeatable)
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,

        /// Decrease log verbosity (repeatable)
        #[arg(short, long, action = clap::ArgAction::Count)]
        quiet: u8,

        /// Disable the interactive keypress shortcuts (useful when not attached to a TTY)
        #[arg(long)]
        no_interactive: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { .. } => {
            if let Err(e) = cmd_scan(cli.command).await {
                eprintln!("{}", display::error_line(&e));
                std::process::exit(1);
            }
            std::process::exit(0);
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
    }
}

#[allow(clippy::too_many_lines)]
async fn cmd_scan(command: Commands) -> Result<()> {
    let Commands::Scan {
        gitlab,
        github,
        gitea,
        azure,
        token,
        owned,
        organization,
        user,
        repo,
        search,
        public,
        artifacts,
        max_artifact_size,
        threads,
        confidence,
        truffle_hog_verification,
        runs_limit,
        start_run_id,
        queue,
        cookie,
        hit_timeout,
        output,
        rules_url,
        rules_cache,
        verify_certs,
        proxy_ignore,
        verbose,
        quiet,
        no_interactive,
    } = command
    else {
        unreachable!("cmd_scan only called for Commands::Scan")
    };

    let level = display::resolve_log_level(verbose, quiet);
    let reload_handle = display::init_tracing(level);

    let mode = if let Some(full_name) = repo {
        EnumerationMode::Single(full_name)
    } else if let Some(org) = organization {
        EnumerationMode::Organization(org)
    } else if let Some(u) = user {
        EnumerationMode::User(u)
    } else if let Some(q) = search {
        EnumerationMode::Search(q)
    } else if public {
        EnumerationMode::Everything
    } else if owned {
        EnumerationMode::Owned
    } else {
        bail!("exactly one of --owned/--organization/--user/--repo/--search/--public is required");
    };

    let (base_url, token_env, kind) = select_provider(&gitlab, &github, &gitea, &azure)?;
    let token = token.or_else(|| std::env::var(token_env).ok());

    let config = ScanConfig {
        token: token.clone(),
        base_url: base_url.clone(),
        mode,
        scan_artifacts: artifacts,
        max_artifact_size: ScanConfig::parse_size(&max_artifact_size)?,
        threads,
        confidence_filter: confidence.into_iter().collect(),
        verify: truffle_hog_verification.unwrap_or(false),
        runs_limit,
        start_run_id,
        queue_dir: queue.unwrap_or_else(std::env::temp_dir),
        cookie: cookie.clone(),
        hit_timeout: humantime::parse_duration(&hit_timeout).context("invalid --hit-timeout")?,
        ignore_certs: !verify_certs,
        proxy_ignore,
    };
    config.validate()?;

    let session = ScanSession::init(config, &rules_url, &rules_cache)
        .await
        .map_err(|e| anyhow::anyhow!(display::fatal_line(&e)))?;

    let provider = build_provider(kind, session.http.clone(), &base_url, cookie.is_some(), token.is_some())?;

    let reporter = Arc::new(match output {
        Some(path) => Reporter::with_hit_file(path)?,
        None => Reporter::new(),
    });

    let orchestrator = Arc::new(ScanOrchestrator::new(session, provider, reporter));

    let shortcuts_handle = if no_interactive {
        None
    } else {
        Some(shortcuts::spawn(reload_handle, orchestrator.status_notify()))
    };

    println!("{}", display::banner(&base_url));
    let status = orchestrator.run().await.map_err(|e| anyhow::anyhow!(display::fatal_line(&e)))?;

    if let Some(handle) = shortcuts_handle {
        handle.abort();
    }

    println!("{}", display::scan_finished_line(&status));
    Ok(())
}

fn select_provider(
    gitlab: &Option<String>,
    github: &Option<String>,
    gitea: &Option<String>,
    azure: &Option<String>,
) -> Result<(String, &'static str, ProviderKindArg)> {
    if let Some(url) = gitlab {
        Ok((url.trim_end_matches('/').to_string(), "GITLAB_TOKEN", ProviderKindArg::GitLab))
    } else if let Some(url) = github {
        Ok((url.trim_end_matches('/').to_string(), "GITHUB_TOKEN", ProviderKindArg::GitHub))
    } else if let Some(url) = gitea {
        Ok((url.trim_end_matches('/').to_string(), "GITEA_TOKEN", ProviderKindArg::Gitea))
    } else if let Some(url) = azure {
        Ok((url.trim_end_matches('/').to_string(), "AZURE_DEVOPS_TOKEN", ProviderKindArg::AzureDevOps))
    } else {
        bail!("exactly one of --gitlab/--github/--gitea/--azure is required")
    }
}

enum ProviderKindArg {
    GitLab,
    GitHub,
    Gitea,
    AzureDevOps,
}

fn build_provider(
    kind: ProviderKindArg,
    http: HttpClient,
    base_url: &str,
    cookie_configured: bool,
    has_token: bool,
) -> Result<Arc<dyn ProviderAdapter>> {
    match kind {
        ProviderKindArg::GitHub => {
            let api_base = if base_url.contains("api.github.com") || base_url.contains("api/v3") {
                base_url.to_string()
            } else {
                format!("{base_url}/api/v3")
            };
            Ok(Arc::new(GitHubAdapter::new(http, api_base)))
        }
        ProviderKindArg::GitLab => {
            let api_base = format!("{base_url}/api/v4");
            Ok(Arc::new(GitLabAdapter::new(http, api_base, base_url.to_string(), cookie_configured)))
        }
        ProviderKindArg::Gitea => {
            let api_base = format!("{base_url}/api/v1");
            Ok(Arc::new(GiteaAdapter::new(http, api_base, base_url.to_string(), cookie_configured)))
        }
        ProviderKindArg::AzureDevOps => {
            let (root, organization) = split_azure_org(base_url)?;
            if !has_token {
                bail!("--token is required for Azure DevOps (basic auth against the organization)");
            }
            Ok(Arc::new(AzureAdapter::new(http, root, organization)))
        }
    }
}

/// Azure DevOps organizations are part of the instance URL path
/// (`https://dev.azure.com/<org>`); split it into the API root and the
/// organization segment the adapter needs separately.
fn split_azure_org(base_url: &str) -> Result<(String, String)> {
    let url = url::Url::parse(base_url).context("invalid --azure URL")?;
    let mut segments = url.path_segments().context("--azure URL must include an organization path segment")?;
    let org = segments.next().filter(|s| !s.is_empty()).context("--azure URL must include an organization path segment")?;
    let root = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    Ok((root, org.to_string()))
}

