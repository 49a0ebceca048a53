//! Out-of-process remote search
//!
//! A [`Bridge`] runs queries in a child process (`fnav bridge-serve-internal`)
//! reached over a local channel. On first use it binds a uniquely named
//! channel, launches the child with the repository identity and the channel
//! name, waits a bounded time for it to connect, and then keeps that one
//! session for its whole life.
//!
//! ```text
//! NotStarted ──first query──> Starting ──connected──> Connected
//!                                 │                       │
//!                                 └──failed──> Terminated <┘ channel closed
//! ```
//!
//! There is no relaunch: once terminated, every query fails fast and the
//! client above turns that into an empty result.

pub mod channel;
pub mod protocol;
pub mod rpc;
pub mod server;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strum::Display;
use tokio::process::{Child, Command};
use tokio::sync::watch;

use crate::background::spawn_logged;
use crate::config::SearchConfig;
use crate::models::{LocatedSymbol, QueryRequest};
use crate::remote::RemoteSearch;
use crate::repo::RepoInfo;
use channel::ChannelListener;
use protocol::{METHOD_SEARCH_CODE, METHOD_WARM_UP};
use rpc::RpcClient;

pub use server::{run_bridge_client, serve, ServeOptions};

/// Hidden CLI subcommand the child process is started with
pub const SERVE_SUBCOMMAND: &str = "bridge-serve-internal";

/// How the child process is launched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    pub executable: PathBuf,
    pub repo: RepoInfo,
    pub connect_timeout: Duration,
}

impl BridgeOptions {
    /// Options for `repo`, launching `config.client_executable` or the current executable
    pub fn from_config(repo: RepoInfo, config: &SearchConfig) -> Result<Self> {
        let executable = match &config.client_executable {
            Some(exe) => exe.clone(),
            None => std::env::current_exe().context("Failed to locate the current executable")?,
        };
        Ok(Self {
            executable,
            repo,
            connect_timeout: config.connect_timeout(),
        })
    }

    fn command(&self, channel_name: &str) -> Command {
        let mut command = Command::new(&self.executable);
        command
            .arg(SERVE_SUBCOMMAND)
            .arg("--root-dir")
            .arg(&self.repo.root_dir)
            .arg("--project-uri")
            .arg(&self.repo.project_uri)
            .arg("--project-name")
            .arg(&self.repo.project_name)
            .arg("--repo-name")
            .arg(&self.repo.repo_name)
            .arg("--channel")
            .arg(channel_name)
            .current_dir(&self.repo.root_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}

/// Lifecycle state reported by [`Bridge::status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum BridgeStatus {
    NotStarted,
    Starting,
    Connected,
    Terminated,
}

/// A live connection to the child process
struct Session {
    rpc: RpcClient,
    // Killed when the session is dropped
    _child: Mutex<Child>,
}

#[derive(Clone)]
enum BridgeState {
    NotStarted,
    Starting,
    Connected(Arc<Session>),
    Terminated,
}

impl BridgeState {
    fn status(&self) -> BridgeStatus {
        match self {
            BridgeState::NotStarted => BridgeStatus::NotStarted,
            BridgeState::Starting => BridgeStatus::Starting,
            BridgeState::Connected(_) => BridgeStatus::Connected,
            BridgeState::Terminated => BridgeStatus::Terminated,
        }
    }
}

/// [`RemoteSearch`] backed by a child process
pub struct Bridge {
    options: Arc<BridgeOptions>,
    state: Arc<watch::Sender<BridgeState>>,
}

impl Bridge {
    pub fn new(options: BridgeOptions) -> Self {
        let (state, _) = watch::channel(BridgeState::NotStarted);
        Self {
            options: Arc::new(options),
            state: Arc::new(state),
        }
    }

    pub fn status(&self) -> BridgeStatus {
        self.state.borrow().status()
    }

    /// Drop the session and kill the child; the bridge cannot be used again
    pub fn shutdown(&self) {
        let previous = self.state.send_replace(BridgeState::Terminated);
        if matches!(previous, BridgeState::Connected(_)) {
            log::info!("Search bridge shut down");
        }
    }

    /// Current session, starting the child on first use
    async fn session(&self) -> Result<Arc<Session>> {
        let first_use = self.state.send_if_modified(|state| {
            if matches!(state, BridgeState::NotStarted) {
                *state = BridgeState::Starting;
                true
            } else {
                false
            }
        });
        if first_use {
            self.launch();
        }

        let mut receiver = self.state.subscribe();
        let state = {
            let settled = receiver
                .wait_for(|state| !matches!(state, BridgeState::Starting))
                .await
                .context("Search bridge was dropped during start-up")?;
            (*settled).clone()
        };

        match state {
            BridgeState::Connected(session) if session.rpc.is_closed() => {
                self.terminate_closed(&session);
                anyhow::bail!("Search bridge channel is closed")
            }
            BridgeState::Connected(session) => Ok(session),
            _ => anyhow::bail!("Search bridge is not available"),
        }
    }

    /// Move a session whose channel died to `Terminated`, logging it once
    fn terminate_closed(&self, session: &Arc<Session>) {
        let terminated = self.state.send_if_modified(|state| {
            let is_current = matches!(state, BridgeState::Connected(current) if Arc::ptr_eq(current, session));
            if is_current {
                *state = BridgeState::Terminated;
            }
            is_current
        });
        if terminated {
            log::error!("Search bridge channel closed; remote search disabled for this session");
        }
    }

    /// Start the child in the background and publish the outcome
    fn launch(&self) {
        let options = Arc::clone(&self.options);
        let state = Arc::clone(&self.state);

        spawn_logged("bridge-startup", async move {
            match start_session(&options).await {
                Ok(session) => {
                    let session = Arc::new(session);
                    log::info!(
                        "Search bridge connected for {}/{}",
                        options.repo.project_name,
                        options.repo.repo_name
                    );
                    // A shutdown during start-up wins over the new session
                    let published = state.send_if_modified(|current| {
                        if matches!(current, BridgeState::Starting) {
                            *current = BridgeState::Connected(Arc::clone(&session));
                            true
                        } else {
                            false
                        }
                    });
                    if published {
                        let warm_up_timeout = options.connect_timeout;
                        spawn_logged("bridge-warm-up", async move {
                            tokio::time::timeout(warm_up_timeout, session.rpc.call(METHOD_WARM_UP, Value::Null))
                                .await
                                .context("Warm-up call timed out")??;
                            Ok(())
                        });
                    }
                    Ok(())
                }
                Err(e) => {
                    state.send_replace(BridgeState::Terminated);
                    Err(e.context("Failed to start search bridge"))
                }
            }
        });
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bind a channel, launch the child, and wait for it to connect
async fn start_session(options: &BridgeOptions) -> Result<Session> {
    let name = channel::channel_name();
    let listener = ChannelListener::bind(&name)?;

    log::info!("Launching search bridge {}", options.executable.display());
    let mut child = options
        .command(&name)
        .spawn()
        .with_context(|| format!("Failed to launch {}", options.executable.display()))?;
    log::debug!("Bridge child pid {:?} waiting on channel '{}'", child.id(), name);

    let stream = tokio::select! {
        accepted = tokio::time::timeout(options.connect_timeout, listener.accept()) => {
            accepted.map_err(|_| {
                anyhow::anyhow!("Bridge child did not connect within {} seconds", options.connect_timeout.as_secs())
            })??
        }
        status = child.wait() => {
            let status = status.context("Failed to wait for bridge child")?;
            anyhow::bail!("Bridge child exited before connecting ({})", status);
        }
    };

    let (reader, writer) = tokio::io::split(stream);
    Ok(Session {
        rpc: RpcClient::start(reader, writer),
        _child: Mutex::new(child),
    })
}

#[async_trait]
impl RemoteSearch for Bridge {
    async fn search(&self, request: &QueryRequest) -> Result<Vec<LocatedSymbol>> {
        let session = self.session().await?;
        // Dropping the call on expiry cancels it in the child; the channel stays up
        let value = tokio::time::timeout(request.timeout, session.rpc.call(METHOD_SEARCH_CODE, json!([request])))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Bridge searchCode call timed out after {} ms",
                    request.timeout.as_millis()
                )
            })??;
        serde_json::from_value(value).context("Invalid searchCode result from bridge")
    }

    async fn warm_up(&self) -> Result<()> {
        let session = self.session().await?;
        session.rpc.call(METHOD_WARM_UP, Value::Null).await?;
        Ok(())
    }
}
