//! CLI argument parsing and command handlers

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bridge::{self, Bridge, BridgeOptions, ServeOptions};
use crate::cache::ResultCache;
use crate::client::CodeSearchClient;
use crate::config::{load_config, SearchConfig, SearchMode};
use crate::models::QueryType;
use crate::navigation::Navigator;
use crate::output;
use crate::remote::{DirectSearch, RemoteSearch};
use crate::repo::RepoInfo;
use crate::transport::search_endpoint;

/// fastnav: code navigation backed by a remote code-search index
#[derive(Parser, Debug)]
#[command(
    name = "fnav",
    version,
    about = "Go to definition and find references across a repository using its remote code-search index",
    long_about = "fnav asks the repository's Azure DevOps code-search index for matches and maps them \
                  onto the local checkout, so navigation works without loading the whole codebase.\n\n\
                  Settings are read from .fastnav/config.toml ([search] table) and FASTNAV_* \
                  environment variables."
)]
pub struct Cli {
    /// Enable verbose logging (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Directory inside the repository (defaults to current directory)
    #[arg(short = 'C', long, value_name = "DIR", default_value = ".", global = true)]
    pub dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

/// Output switches shared by result-printing commands
#[derive(clap::Args, Debug, Clone, Copy)]
pub struct OutputArgs {
    /// Output format as JSON
    #[arg(long)]
    pub json: bool,

    /// Pretty-print JSON output (only with --json)
    #[arg(long)]
    pub pretty: bool,

    /// Disable colors
    #[arg(long)]
    pub plain: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a raw query against the index
    ///
    /// Examples:
    ///   fnav query Widget --exact                      # references to Widget
    ///   fnav query Wid --type find-definitions         # definitions starting with Wid
    Query {
        /// Identifier (or identifier prefix without --exact)
        filter: String,

        /// find-definitions or find-references
        #[arg(short = 't', long = "type", default_value = "find-references")]
        query_type: QueryType,

        /// Case-sensitive full-token match instead of a case-insensitive prefix
        #[arg(short, long)]
        exact: bool,

        /// Files requested from the index (capped at 200)
        #[arg(short = 'n', long)]
        max_results: Option<usize>,

        /// Remote round-trip timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Go to the definition of the identifier at a position
    Definition {
        /// Source file
        file: PathBuf,

        /// Line number (1-based)
        line: usize,

        /// Column (1-based, in UTF-16 code units)
        column: usize,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Find references to an identifier
    References {
        symbol: String,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Search definitions by name prefix
    Symbols {
        filter: String,

        /// Maximum number of results
        #[arg(long, default_value_t = 50)]
        max_items: usize,

        /// Filters shorter than this return nothing
        #[arg(long, default_value_t = 2)]
        min_filter_length: usize,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Show the detected repository and effective search settings
    RepoInfo {
        /// Output format as JSON
        #[arg(long)]
        json: bool,
    },

    /// Internal command: serve queries for a bridge host (hidden from help)
    #[command(hide = true, name = "bridge-serve-internal")]
    BridgeServeInternal {
        #[arg(long)]
        root_dir: PathBuf,

        #[arg(long)]
        project_uri: String,

        #[arg(long)]
        project_name: String,

        #[arg(long)]
        repo_name: String,

        /// Channel name to connect to
        #[arg(long)]
        channel: String,
    },
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        let log_level = match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
            .init();

        match self.command {
            Command::Query { filter, query_type, exact, max_results, timeout_ms, output } => {
                handle_query(&self.dir, &filter, query_type, exact, max_results, timeout_ms, output)
            }
            Command::Definition { file, line, column, output } => {
                handle_definition(&self.dir, &file, line, column, output)
            }
            Command::References { symbol, output } => {
                handle_references(&self.dir, &symbol, output)
            }
            Command::Symbols { filter, max_items, min_filter_length, output } => {
                handle_symbols(&self.dir, &filter, max_items, min_filter_length, output)
            }
            Command::RepoInfo { json } => {
                handle_repo_info(&self.dir, json)
            }
            Command::BridgeServeInternal { root_dir, project_uri, project_name, repo_name, channel } => {
                handle_bridge_serve(ServeOptions { root_dir, project_uri, project_name, repo_name, channel })
            }
        }
    }
}

/// Detect the repository around `dir` and load its settings
fn load_context(dir: &Path) -> Result<(RepoInfo, SearchConfig)> {
    let repo = RepoInfo::detect(dir)?.with_context(|| {
        format!(
            "{} is not inside an Azure DevOps git repository.\n\
             \n\
             fnav needs a checkout whose 'origin' remote points at\n\
             https://<account>.visualstudio.com/... or https://dev.azure.com/...",
            dir.display()
        )
    })?;
    let config = load_config(&repo.root_dir)?;
    log::debug!("Using {} search for {}", config.mode, repo.root_dir.display());
    Ok((repo, config))
}

/// Backend for the configured mode
fn build_backend(repo: &RepoInfo, config: &SearchConfig) -> Result<Arc<dyn RemoteSearch>> {
    let backend: Arc<dyn RemoteSearch> = match config.mode {
        SearchMode::Direct => Arc::new(DirectSearch::from_repo(repo, config)?),
        SearchMode::Bridged => Arc::new(Bridge::new(BridgeOptions::from_config(repo.clone(), config)?)),
    };
    Ok(backend)
}

fn build_client(repo: &RepoInfo, config: &SearchConfig) -> Result<Arc<CodeSearchClient>> {
    let backend = build_backend(repo, config)?;
    Ok(Arc::new(CodeSearchClient::new(backend, ResultCache::new(config.cache_ttl()))))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to create async runtime")
}

fn print_results(symbols: &[crate::models::LocatedSymbol], output: OutputArgs) -> Result<()> {
    if output.json {
        output::print_json(symbols, output.pretty)
    } else {
        output::print_symbols(symbols, output.plain);
        Ok(())
    }
}

/// Handle the `query` subcommand
fn handle_query(
    dir: &Path,
    filter: &str,
    query_type: QueryType,
    exact: bool,
    max_results: Option<usize>,
    timeout_ms: Option<u64>,
    output: OutputArgs,
) -> Result<()> {
    let (repo, config) = load_context(dir)?;
    let client = build_client(&repo, &config)?;
    let max_results = max_results.unwrap_or(config.max_results);
    let timeout = timeout_ms.map(Duration::from_millis).unwrap_or_else(|| config.timeout());

    let start = Instant::now();
    let results = runtime()?.block_on(client.query(filter, max_results, timeout, exact, query_type));
    log::info!("Query completed in {}ms", start.elapsed().as_millis());

    print_results(&results, output)
}

/// Handle the `definition` subcommand
fn handle_definition(dir: &Path, file: &Path, line: usize, column: usize, output: OutputArgs) -> Result<()> {
    if line == 0 || column == 0 {
        anyhow::bail!("Line and column are 1-based");
    }
    let (repo, config) = load_context(dir)?;
    let navigator = Navigator::with_timeout(build_client(&repo, &config)?, config.timeout());

    let found = runtime()?.block_on(navigator.find_definition(file, line - 1, column - 1))?;
    let results: Vec<_> = found.into_iter().collect();
    print_results(&results, output)
}

/// Handle the `references` subcommand
fn handle_references(dir: &Path, symbol: &str, output: OutputArgs) -> Result<()> {
    let (repo, config) = load_context(dir)?;
    let navigator = Navigator::with_timeout(build_client(&repo, &config)?, config.timeout());

    let results = runtime()?.block_on(navigator.find_references(symbol, &[]));
    print_results(&results, output)
}

/// Handle the `symbols` subcommand
fn handle_symbols(dir: &Path, filter: &str, max_items: usize, min_filter_length: usize, output: OutputArgs) -> Result<()> {
    let (repo, config) = load_context(dir)?;
    let navigator = Navigator::with_timeout(build_client(&repo, &config)?, config.timeout());

    let results = runtime()?.block_on(navigator.find_symbols(filter, max_items, min_filter_length, &[]));
    print_results(&results, output)
}

/// Handle the `repo-info` subcommand
fn handle_repo_info(dir: &Path, as_json: bool) -> Result<()> {
    let (repo, config) = load_context(dir)?;
    let endpoint = config
        .endpoint
        .clone()
        .unwrap_or_else(|| search_endpoint(&repo.project_uri));

    if as_json {
        let value = serde_json::json!({
            "repo": repo,
            "mode": config.mode.to_string(),
            "endpoint": endpoint,
            "branch": config.branch,
        });
        return output::print_json(&value, true);
    }

    println!("Repository:   {}", repo.root_dir.display());
    println!("Project:      {} ({})", repo.project_name, repo.project_uri);
    println!("Remote repo:  {}", repo.repo_name);
    println!("Branch:       {}", config.branch);
    println!("Mode:         {}", config.mode);
    println!("Endpoint:     {}", endpoint);
    if config.personal_access_token.is_none() {
        output::warn("No personal access token configured (set FASTNAV_PAT or search.personal_access_token).");
    }
    Ok(())
}

/// Handle the internal `bridge-serve-internal` command
fn handle_bridge_serve(options: ServeOptions) -> Result<()> {
    let config = load_config(&options.root_dir)?;
    runtime()?.block_on(bridge::run_bridge_client(options, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_args() {
        let cli = Cli::try_parse_from(["fnav", "query", "Widget", "--type", "find-definitions", "--exact", "-n", "5"]).unwrap();
        match cli.command {
            Command::Query { filter, query_type, exact, max_results, .. } => {
                assert_eq!(filter, "Widget");
                assert_eq!(query_type, QueryType::FindDefinitions);
                assert!(exact);
                assert_eq!(max_results, Some(5));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_query_type_rejected() {
        assert!(Cli::try_parse_from(["fnav", "query", "Widget", "--type", "find-everything"]).is_err());
    }

    #[test]
    fn test_bridge_serve_args() {
        let cli = Cli::try_parse_from([
            "fnav",
            bridge::SERVE_SUBCOMMAND,
            "--root-dir",
            "/repo",
            "--project-uri",
            "https://contoso.visualstudio.com/Tools",
            "--project-name",
            "Tools",
            "--repo-name",
            "Widgets",
            "--channel",
            "fastnav-1-abc",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::BridgeServeInternal { ref channel, .. } if channel == "fastnav-1-abc"));
    }

    #[test]
    fn test_global_verbosity_after_subcommand() {
        let cli = Cli::try_parse_from(["fnav", "references", "Widget", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
