//! Host side of the JSON-RPC session
//!
//! Outgoing frames go through a writer task; a reader task routes responses
//! back to the waiting caller by id. Dropping a call future before its
//! response arrives forgets the pending entry and tells the peer to cancel.

use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::protocol::{send_frame, write_loop, FrameSender, Message, RpcError};

type ResponseSender = oneshot::Sender<Result<Value, RpcError>>;

#[derive(Default)]
struct PendingCalls {
    closed: bool,
    calls: HashMap<u64, ResponseSender>,
}

type SharedPending = Arc<Mutex<PendingCalls>>;

fn lock(pending: &SharedPending) -> std::sync::MutexGuard<'_, PendingCalls> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mark the session closed and fail every waiting call
fn close(pending: &SharedPending) {
    let mut pending = lock(pending);
    pending.closed = true;
    // Dropping the senders wakes each waiter with a receive error
    pending.calls.clear();
}

pub struct RpcClient {
    outgoing: FrameSender,
    pending: SharedPending,
    next_id: AtomicU64,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl RpcClient {
    /// Start a session over an already connected stream pair
    pub fn start<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending = SharedPending::default();
        let (outgoing, frames) = mpsc::unbounded_channel();

        let on_write_failure = {
            let pending = Arc::clone(&pending);
            Arc::new(move || close(&pending)) as Arc<dyn Fn() + Send + Sync>
        };
        let writer_task = tokio::spawn(write_loop(writer, frames, Some(on_write_failure)));
        let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&pending)));

        Self {
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
            reader_task,
            writer_task,
        }
    }

    /// True once the channel has ended; no call can succeed afterwards
    pub fn is_closed(&self) -> bool {
        lock(&self.pending).closed
    }

    /// Send a request and wait for its response
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = lock(&self.pending);
            if pending.closed {
                anyhow::bail!("Bridge channel is closed");
            }
            pending.calls.insert(id, tx);
        }

        let mut guard = PendingCall {
            id,
            pending: &self.pending,
            outgoing: &self.outgoing,
            completed: false,
        };

        send_frame(&self.outgoing, &Message::request(id, method, params))?;
        log::debug!("Sent bridge request {} '{}'", id, method);

        let outcome = rx.await;
        guard.completed = true;

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(anyhow::Error::new(error).context(format!("Bridge call '{}' failed", method))),
            Err(_) => anyhow::bail!("Bridge channel closed while waiting for '{}'", method),
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

/// Cancels the request it guards unless its response was received
struct PendingCall<'a> {
    id: u64,
    pending: &'a SharedPending,
    outgoing: &'a FrameSender,
    completed: bool,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let was_pending = lock(self.pending).calls.remove(&self.id).is_some();
        if was_pending {
            log::debug!("Cancelling bridge request {}", self.id);
            let _ = send_frame(self.outgoing, &Message::cancel(self.id));
        }
    }
}

async fn read_loop<R>(reader: R, pending: SharedPending)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                log::trace!("Bridge input: {}", line);
                match serde_json::from_str::<Message>(&line) {
                    Ok(message) => dispatch(message, &pending),
                    Err(e) => log::warn!("Ignoring malformed bridge frame: {}", e),
                }
            }
            Ok(None) => {
                log::info!("Bridge channel closed by peer");
                break;
            }
            Err(e) => {
                log::error!("Failed to read from bridge channel: {}", e);
                break;
            }
        }
    }
    close(&pending);
}

fn dispatch(message: Message, pending: &SharedPending) {
    if !message.is_response() {
        log::debug!("Ignoring unexpected bridge message '{}'", message.method.unwrap_or_default());
        return;
    }
    let Some(id) = message.id else {
        log::warn!("Bridge response without id: {:?}", message.error);
        return;
    };

    let sender = lock(pending).calls.remove(&id);
    match sender {
        Some(sender) => {
            let _ = sender.send(message.into_outcome());
        }
        // Late response to a cancelled call
        None => log::debug!("Dropping response for unknown request {}", id),
    }
}
