//! fastnav: code navigation backed by a remote code-search index
//!
//! Large repositories are rarely loaded into an editor in full, so go to
//! definition and find references stop at the edge of what is open. fastnav
//! asks the repository's remote code-search index instead and maps each hit
//! back onto the local checkout.
//!
//! # Architecture
//!
//! - **Client**: soft-failing, cached entry point ([`CodeSearchClient`])
//! - **Remote search**: in-process ([`DirectSearch`]) or in a child process
//!   reached over a JSON-RPC channel ([`bridge::Bridge`])
//! - **Fan-out engine**: reads each hit file once on a worker pool
//! - **Reconciler**: turns index offsets into line/column positions, trying
//!   each line-ending convention the index may have used
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use fastnav::{CodeSearchClient, DirectSearch, QueryType, RepoInfo, ResultCache};
//! use fastnav::config::load_config;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let repo = RepoInfo::detect(".")?.expect("Azure DevOps checkout");
//! let config = load_config(&repo.root_dir)?;
//! let backend = Arc::new(DirectSearch::from_repo(&repo, &config)?);
//! let client = CodeSearchClient::new(backend, ResultCache::default());
//!
//! let defs = client.query("Widget", 1, config.timeout(), true, QueryType::FindDefinitions).await;
//! println!("{} definition(s)", defs.len());
//! # Ok(())
//! # }
//! ```

pub mod background;
pub mod bridge;
pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod fanout;
pub mod match_filter;
pub mod models;
pub mod navigation;
pub mod output;
pub mod reconciler;
pub mod remote;
pub mod repo;
pub mod transport;

// Re-export commonly used types
pub use cache::{CachedResults, ResultCache};
pub use client::CodeSearchClient;
pub use fanout::FanOutEngine;
pub use models::{LocatedSymbol, QueryRequest, QueryType, RawHit};
pub use navigation::Navigator;
pub use reconciler::{LineEnding, OffsetReconciler};
pub use remote::{DirectSearch, RemoteSearch};
pub use repo::RepoInfo;
