//! Local duplex channel between the host and its bridge child
//!
//! Unix platforms use a socket file in the runtime directory; Windows uses
//! a named pipe. The host binds first, then launches the child with the
//! channel name, then accepts exactly one connection.

use anyhow::{Context, Result};
use uuid::Uuid;

/// Fresh channel name, unique per bridge instance
pub fn channel_name() -> String {
    format!("fastnav-{}-{}", std::process::id(), Uuid::new_v4().simple())
}

#[cfg(unix)]
pub use unix::{connect, socket_path, ChannelListener, ChildStream, HostStream};

#[cfg(windows)]
pub use windows::{connect, pipe_path, ChannelListener, ChildStream, HostStream};

#[cfg(unix)]
mod unix {
    use super::*;
    use std::path::PathBuf;
    use tokio::net::{UnixListener, UnixStream};

    pub type HostStream = UnixStream;
    pub type ChildStream = UnixStream;

    /// Socket file for `name`, in `$XDG_RUNTIME_DIR` when set, else the temp dir
    pub fn socket_path(name: &str) -> PathBuf {
        dirs::runtime_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(format!("{}.sock", name))
    }

    pub struct ChannelListener {
        listener: UnixListener,
        path: PathBuf,
    }

    impl ChannelListener {
        pub fn bind(name: &str) -> Result<Self> {
            let path = socket_path(name);
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
            }
            let listener = UnixListener::bind(&path)
                .with_context(|| format!("Failed to bind bridge socket {}", path.display()))?;
            log::debug!("Bridge listening on {}", path.display());
            Ok(Self { listener, path })
        }

        /// Wait for the child to connect; the socket file is removed afterwards
        pub async fn accept(self) -> Result<HostStream> {
            let (stream, _) = self
                .listener
                .accept()
                .await
                .context("Failed to accept bridge connection")?;
            Ok(stream)
        }
    }

    impl Drop for ChannelListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    pub async fn connect(name: &str) -> Result<ChildStream> {
        let path = socket_path(name);
        UnixStream::connect(&path)
            .await
            .with_context(|| format!("Failed to connect to bridge socket {}", path.display()))
    }
}

#[cfg(windows)]
mod windows {
    use super::*;
    use std::time::Duration;
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions};

    pub type HostStream = NamedPipeServer;
    pub type ChildStream = NamedPipeClient;

    const ERROR_PIPE_BUSY: i32 = 231;

    pub fn pipe_path(name: &str) -> String {
        format!(r"\\.\pipe\{}", name)
    }

    pub struct ChannelListener {
        server: NamedPipeServer,
    }

    impl ChannelListener {
        pub fn bind(name: &str) -> Result<Self> {
            let path = pipe_path(name);
            let server = ServerOptions::new()
                .first_pipe_instance(true)
                .create(&path)
                .with_context(|| format!("Failed to create bridge pipe {}", path))?;
            log::debug!("Bridge listening on {}", path);
            Ok(Self { server })
        }

        pub async fn accept(self) -> Result<HostStream> {
            self.server
                .connect()
                .await
                .context("Failed to accept bridge connection")?;
            Ok(self.server)
        }
    }

    pub async fn connect(name: &str) -> Result<ChildStream> {
        let path = pipe_path(name);
        loop {
            match ClientOptions::new().open(&path) {
                Ok(client) => return Ok(client),
                Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to connect to bridge pipe {}", path));
                }
            }
        }
    }
}
