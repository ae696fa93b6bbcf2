use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

use vulnscan::config::{Config, DEFAULT_API_URL, DEFAULT_USER_ID};
use vulnscan::{AnalysisRequest, AnalysisSession, HttpBackend, RepoCache};

/// vulnscan - drive repository analysis sessions and manage the clone cache
#[derive(Parser)]
#[command(name = "vulnscan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Analysis backend base URL
    #[arg(long, env = "VULNSCAN_API_URL", default_value = DEFAULT_API_URL, global = true)]
    api_url: String,

    /// User id sent when starting a session
    #[arg(long, env = "VULNSCAN_USER_ID", default_value = DEFAULT_USER_ID, global = true)]
    user_id: String,

    /// Repository cache root. Defaults to <cache dir>/vulnscan/repos
    #[arg(long, env = "VULNSCAN_CACHE_DIR", global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a repository and print events as JSON lines
    Analyze {
        /// Repository URL
        repo_url: String,

        /// Correlation id echoed in the session_created event
        #[arg(long)]
        correlation_id: Option<String>,
    },
    /// Manage the repository cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Clone or refresh a repository
    Materialize { url: String },
    /// Remove a repository from the cache
    Evict { url: String },
    /// Show commit and branch of a local checkout
    Info { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::new(&cli.api_url, &cli.user_id, cli.cache_dir)?;

    match cli.command {
        Commands::Analyze {
            repo_url,
            correlation_id,
        } => run_analyze(&config, repo_url, correlation_id).await,
        Commands::Cache { command } => run_cache(&config, command).await,
    }
}

async fn run_analyze(
    config: &Config,
    repo_url: String,
    correlation_id: Option<String>,
) -> Result<()> {
    let backend = Arc::new(HttpBackend::new(config)?);
    let mut request = AnalysisRequest::new(repo_url);
    if let Some(id) = correlation_id {
        request = request.with_correlation_id(id);
    }

    let mut session = AnalysisSession::new(backend, config.user_id.clone());
    session
        .start(request)
        .await
        .context("Failed to start analysis")?;

    loop {
        tokio::select! {
            item = session.next_event() => match item {
                Some(Ok(event)) => println!("{}", serde_json::to_string(&event)?),
                Some(Err(e)) => return Err(e).context("Analysis stream failed"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, ending session");
                session.cancel().await;
                break;
            }
        }
    }

    Ok(())
}

async fn run_cache(config: &Config, command: CacheCommands) -> Result<()> {
    let cache = RepoCache::with_git_cli(&config.cache_dir);

    match command {
        CacheCommands::Materialize { url } => {
            let entry = cache
                .materialize(&url)
                .await
                .with_context(|| format!("Failed to materialize {}", url))?;
            println!("Path:    {}", entry.path.display());
            println!("Commit:  {}", entry.commit);
            println!("Branch:  {}", entry.branch);
            println!("Updated: {}", entry.last_refreshed.to_rfc3339());
            if entry.stale {
                println!("⚠️  Refresh failed; this copy may be out of date.");
            }
        }
        CacheCommands::Evict { url } => {
            cache
                .evict_url(&url)
                .await
                .with_context(|| format!("Failed to evict {}", url))?;
            println!("✅ Evicted {}", url);
        }
        CacheCommands::Info { path } => {
            let info = cache.get_info(&path).await;
            println!("Commit: {}", info.commit);
            println!("Branch: {}", info.branch);
        }
    }

    Ok(())
}
