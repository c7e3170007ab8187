//! Strata CLI - Epic → Feature → Task orchestration on GitHub
//!
//! Usage:
//!   strata init                       Write a default .strata/config.toml
//!   strata hierarchy <plan>           Create a whole Epic tree from a plan file
//!   strata epic --title <t>           Create a single Epic
//!   strata feature --parent-epic <n>  Create a Feature under an Epic
//!   strata task --parent-feature <n>  Create a Task under a Feature
//!   strata doc save <path> <file>     Create or update a repository file
//!   strata doc read <path>            Print a repository file
//!   strata review <issue> ...         Comment and move an issue to review

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strata_core::fail_open::fail_open;
use strata_core::{StrataConfig, StrataError};
use strata_orchestrator::{
    BoardStatusSync, EventHub, Executor, HierarchyOptions, HierarchyOrchestrator, HierarchyPlan,
    HierarchyReport, ItemPlan, RemoteFileSync,
};
use strata_tracker::{get_auth_token, GitHubClient, TrackerClient};
use tracing::{debug, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about = "Epic → Feature → Task orchestration on GitHub")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Repository owner (overrides config)
    #[arg(long, global = true)]
    owner: Option<String>,

    /// Repository name (overrides config)
    #[arg(long, global = true)]
    repo: Option<String>,

    /// Config file (defaults to .strata/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Repository path (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Create an Epic with its Features and Tasks
    Hierarchy {
        /// Plan file (.json or .toml)
        plan: PathBuf,

        /// Also write the JSON report to this file
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Create a single Epic
    Epic(ItemArgs),

    /// Create a Feature under an existing Epic
    Feature {
        /// Issue number of the parent Epic
        #[arg(long, allow_negative_numbers = true)]
        parent_epic: i64,

        #[command(flatten)]
        item: ItemArgs,
    },

    /// Create a Task under an existing Feature
    Task {
        /// Issue number of the parent Feature
        #[arg(long, allow_negative_numbers = true)]
        parent_feature: i64,

        #[command(flatten)]
        item: ItemArgs,
    },

    /// Repository document sync
    Doc {
        #[command(subcommand)]
        action: DocCommands,
    },

    /// Comment on an issue and move it to a review status
    Review {
        /// Issue number
        issue: u64,

        /// Project board number
        #[arg(long)]
        board: u64,

        /// Link to the document under review
        #[arg(long)]
        doc_url: String,

        /// Title shown in the review comment
        #[arg(long)]
        title: String,
    },
}

#[derive(Args)]
struct ItemArgs {
    #[arg(long)]
    title: String,

    #[arg(long, default_value = "")]
    body: String,

    /// Label (repeatable); defaults to the item kind
    #[arg(long = "label")]
    labels: Vec<String>,
}

impl From<&ItemArgs> for ItemPlan {
    fn from(args: &ItemArgs) -> Self {
        ItemPlan::new(args.title.clone())
            .with_body(args.body.clone())
            .with_labels(args.labels.clone())
    }
}

#[derive(Subcommand)]
enum DocCommands {
    /// Create or update a repository file from a local file
    Save {
        /// Repository path
        path: String,

        /// Local file with the new content
        file: PathBuf,

        /// Commit message
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Print a repository file
    Read {
        /// Repository path
        path: String,
    },
}

/// Remote handles shared by every command
struct Session {
    config: StrataConfig,
    client: Arc<dyn TrackerClient>,
    executor: Executor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { ref path } => cmd_init(path),
        Commands::Hierarchy {
            ref plan,
            ref report,
        } => cmd_hierarchy(&cli, plan, report.as_deref()).await,
        Commands::Epic(ref item) => {
            let session = connect(&cli)?;
            let outcome = orchestrator(&session)
                .create_epic(&ItemPlan::from(item))
                .await?;
            finish_item(&cli, HierarchyReport::from_item(outcome))
        }
        Commands::Feature {
            parent_epic,
            ref item,
        } => {
            let session = connect(&cli)?;
            let outcome = orchestrator(&session)
                .create_feature(parent_epic, &ItemPlan::from(item))
                .await?;
            finish_item(&cli, HierarchyReport::from_item(outcome))
        }
        Commands::Task {
            parent_feature,
            ref item,
        } => {
            let session = connect(&cli)?;
            let outcome = orchestrator(&session)
                .create_task(parent_feature, &ItemPlan::from(item))
                .await?;
            finish_item(&cli, HierarchyReport::from_item(outcome))
        }
        Commands::Doc { ref action } => cmd_doc(&cli, action).await,
        Commands::Review {
            issue,
            board,
            ref doc_url,
            ref title,
        } => cmd_review(&cli, issue, board, doc_url, title).await,
    }
}

fn load_config(cli: &Cli) -> Result<StrataConfig> {
    let config = match &cli.config {
        Some(path) => StrataConfig::load(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => StrataConfig::load_or_default(Path::new("."))?,
    };
    let config = config.with_repository(cli.owner.clone(), cli.repo.clone());
    config.validate()?;
    Ok(config)
}

/// Resolve config and token before any remote call
fn connect(cli: &Cli) -> Result<Session> {
    let config = load_config(cli)?;
    let token = get_auth_token(&config.github.token_env)?;
    let client = GitHubClient::from_config(&config, token);

    let hub = Arc::new(EventHub::new());
    hub.subscribe(|event| {
        debug!(
            "{} success={} ({}ms)",
            event.event_name(),
            event.result.success,
            event.result.execution_time_ms.unwrap_or_default()
        );
    });

    let executor = Executor::new(Duration::from_millis(config.execution.timeout_ms)).with_hub(hub);
    info!(
        "Using {}/{}",
        config.github.owner, config.github.repo
    );

    Ok(Session {
        config,
        client: Arc::new(client),
        executor,
    })
}

fn orchestrator(session: &Session) -> HierarchyOrchestrator {
    HierarchyOrchestrator::new(
        session.client.clone(),
        session.executor.clone(),
        HierarchyOptions::from_config(&session.config),
    )
}

fn print_result<T: Serialize + Display>(cli: &Cli, value: &T) -> Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", value);
    }
    Ok(())
}

fn finish_item(cli: &Cli, report: HierarchyReport) -> Result<()> {
    print_result(cli, &report)?;
    if !report.success {
        bail!("work item was not created");
    }
    Ok(())
}

fn cmd_init(path: &Path) -> Result<()> {
    info!("Initializing Strata in {:?}", path);

    let config_path = path.join(".strata/config.toml");
    if config_path.exists() {
        println!("Already initialized: {:?}", config_path);
        return Ok(());
    }

    StrataConfig::write_default(path).context("Failed to write default config")?;

    println!("Initialized Strata in {:?}", path);
    println!("Created:");
    println!("  .strata/config.toml");
    println!("\nNext steps:");
    println!("  1. Set github.owner and github.repo in .strata/config.toml");
    println!("  2. Export GITHUB_TOKEN");
    println!("  3. Run 'strata hierarchy <plan.json>'");
    Ok(())
}

async fn cmd_hierarchy(cli: &Cli, plan_path: &Path, report_path: Option<&Path>) -> Result<()> {
    let plan = HierarchyPlan::load(plan_path)
        .with_context(|| format!("Failed to read plan {:?}", plan_path))?;
    plan.validate()?;

    let session = connect(cli)?;
    let report = orchestrator(&session).create_hierarchy(&plan).await?;

    print_result(cli, &report)?;

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report)?;
        let written = fail_open("report_writer", move || async move {
            tokio::fs::write(path, json).await.map_err(StrataError::from)
        })
        .await;
        if written.is_some() {
            info!("Report written to {:?}", path);
        }
    }

    if !report.success {
        bail!("epic was not created");
    }
    Ok(())
}

async fn cmd_doc(cli: &Cli, action: &DocCommands) -> Result<()> {
    let session = connect(cli)?;
    let sync = RemoteFileSync::new(session.client.clone(), session.executor.clone())
        .with_docs_dir(session.config.docs.dir.clone());

    match action {
        DocCommands::Save {
            path,
            file,
            message,
        } => {
            let content = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read {:?}", file))?;
            let outcome = sync
                .save_with_message(path, &content, message.as_deref())
                .await;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
            match (outcome.success, outcome.url, outcome.error) {
                (true, Some(url), _) => {
                    if !cli.json {
                        let verb = if outcome.created { "Created" } else { "Updated" };
                        println!("{} {}: {}", verb, path, url);
                    }
                    Ok(())
                }
                (_, _, error) => bail!(
                    "failed to save {}: {}",
                    path,
                    error.unwrap_or_else(|| "unknown error".to_string())
                ),
            }
        }
        DocCommands::Read { path } => {
            let outcome = sync.read(path).await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
            match outcome.content {
                Some(content) if outcome.success => {
                    if !cli.json {
                        print!("{}", content);
                    }
                    Ok(())
                }
                _ => bail!(
                    "failed to read {}: {}",
                    path,
                    outcome.error.unwrap_or_default()
                ),
            }
        }
    }
}

async fn cmd_review(cli: &Cli, issue: u64, board: u64, doc_url: &str, title: &str) -> Result<()> {
    let session = connect(cli)?;
    let sync = BoardStatusSync::with_status_options(
        session.client.clone(),
        session.executor.clone(),
        session.config.review.status_options.clone(),
    );

    let outcome = sync
        .complete_review_workflow(issue, board, doc_url, title)
        .await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else if outcome.success {
        println!(
            "Commented on #{}: {}",
            issue,
            outcome.comment_url.as_deref().unwrap_or_default()
        );
        if outcome.status_updated {
            println!("Moved #{} to review", issue);
        }
        if let Some(warning) = &outcome.warning {
            println!("Warning: {}", warning);
        }
    }

    if !outcome.success {
        bail!(
            "review workflow failed: {}",
            outcome.error.unwrap_or_default()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_feature() {
        let cli = Cli::try_parse_from([
            "strata",
            "--owner",
            "acme",
            "feature",
            "--parent-epic",
            "12",
            "--title",
            "OAuth",
            "--label",
            "auth",
            "--label",
            "p1",
        ])
        .unwrap();

        assert_eq!(cli.owner.as_deref(), Some("acme"));
        let Commands::Feature { parent_epic, item } = cli.command else {
            panic!("expected feature command");
        };
        assert_eq!(parent_epic, 12);
        let plan = ItemPlan::from(&item);
        assert_eq!(plan.labels, vec!["auth", "p1"]);
    }

    #[test]
    fn test_cli_parses_review() {
        let cli = Cli::try_parse_from([
            "strata",
            "review",
            "42",
            "--board",
            "3",
            "--doc-url",
            "https://example.com/doc",
            "--title",
            "Login",
            "--json",
        ])
        .unwrap();

        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Review { issue: 42, board: 3, .. }));
    }

    #[test]
    fn test_init_writes_config() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();

        let config = StrataConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.execution.timeout_ms, 30_000);
        assert!(dir.path().join(".strata/config.toml").exists());
    }

    #[test]
    fn test_config_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "[github]\nowner = \"file-owner\"\nrepo = \"app\"\n").unwrap();

        let cli = Cli::try_parse_from([
            "strata",
            "--config",
            path.to_str().unwrap(),
            "--owner",
            "flag-owner",
            "doc",
            "read",
            "docs/a.md",
        ])
        .unwrap();

        let config = load_config(&cli).unwrap();
        assert_eq!(config.github.owner, "flag-owner");
        assert_eq!(config.github.repo, "app");
    }
}
