//! Fire-and-forget background tasks
//!
//! Work such as bridge start-up and warm-up runs detached from any request.
//! Its outcome still has to surface somewhere, so every such task goes
//! through [`spawn_logged`], which reports errors and panics to the log and
//! never propagates them to the owning process.

use anyhow::Result;
use std::future::Future;
use tokio::task::JoinHandle;

/// Spawn `future` on the current runtime, logging its failure
pub fn spawn_logged<F>(name: &'static str, future: F) -> JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match tokio::spawn(future).await {
            Ok(Ok(())) => log::debug!("Background task '{}' completed", name),
            Ok(Err(e)) => log::error!("Background task '{}' failed: {:#}", name, e),
            Err(e) if e.is_cancelled() => log::debug!("Background task '{}' was cancelled", name),
            Err(e) => log::error!("Background task '{}' panicked: {}", name, e),
        }
    })
}
