//! Child side of the bridge
//!
//! The child process connects back to the host's channel and answers
//! `searchCode` and `warmUp` requests with a [`RemoteSearch`] backend,
//! normally a [`DirectSearch`]. Each request runs as its own task so a
//! `$/cancelRequest` can abort it without disturbing the others.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use super::channel;
use super::protocol::{
    error_codes, send_frame, write_loop, FrameSender, Message, RpcError, METHOD_CANCEL_REQUEST,
    METHOD_SEARCH_CODE, METHOD_WARM_UP,
};
use crate::config::SearchConfig;
use crate::models::QueryRequest;
use crate::remote::{DirectSearch, RemoteSearch};
use crate::repo::RepoInfo;

/// Arguments the host passes to the child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeOptions {
    pub root_dir: PathBuf,
    pub project_uri: String,
    pub project_name: String,
    pub repo_name: String,
    pub channel: String,
}

impl ServeOptions {
    pub fn repo_info(&self) -> RepoInfo {
        RepoInfo {
            root_dir: self.root_dir.clone(),
            project_uri: self.project_uri.clone(),
            project_name: self.project_name.clone(),
            repo_name: self.repo_name.clone(),
        }
    }
}

/// Entry point of the child process: connect to the host and serve until it hangs up
pub async fn run_bridge_client(options: ServeOptions, config: SearchConfig) -> Result<()> {
    log::info!(
        "Bridge client for {}/{} connecting to channel '{}'",
        options.project_name,
        options.repo_name,
        options.channel
    );

    let backend: Arc<dyn RemoteSearch> = Arc::new(DirectSearch::from_repo(&options.repo_info(), &config)?);
    let stream = channel::connect(&options.channel).await?;
    let (reader, writer) = tokio::io::split(stream);

    serve(reader, writer, backend).await?;
    log::info!("Bridge client stopped");
    Ok(())
}

type InFlight = Arc<Mutex<HashMap<u64, AbortHandle>>>;

/// Answer requests read from `reader` until it reaches end of stream
pub async fn serve<R, W>(reader: R, writer: W, backend: Arc<dyn RemoteSearch>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outgoing, frames) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_loop(writer, frames, None));
    let in_flight = InFlight::default();

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read from bridge channel")? {
        if line.trim().is_empty() {
            continue;
        }
        log::trace!("Bridge input: {}", line);

        let message = match serde_json::from_str::<Message>(&line) {
            Ok(message) => message,
            Err(e) => {
                log::error!("Failed to parse bridge request: {}", e);
                let error = RpcError::new(error_codes::PARSE_ERROR, format!("Parse error: {}", e));
                send_frame(&outgoing, &Message::response(None, Err(error)))?;
                continue;
            }
        };

        match (message.method.as_deref(), message.id) {
            (Some(METHOD_CANCEL_REQUEST), _) => {
                if let Some(id) = message.cancelled_id() {
                    cancel(&in_flight, &outgoing, id)?;
                }
            }
            (Some(method), Some(id)) => {
                let method = method.to_string();
                let params = message.params.clone();
                let backend = Arc::clone(&backend);
                let outgoing = outgoing.clone();
                let tracker = Arc::clone(&in_flight);

                // Registered before the task can finish and look itself up
                let mut in_flight = lock(&in_flight);
                let handle = tokio::spawn(async move {
                    let outcome = handle_request(backend.as_ref(), &method, params).await;
                    let still_wanted = lock(&tracker).remove(&id).is_some();
                    if still_wanted {
                        if let Err(e) = send_frame(&outgoing, &Message::response(Some(id), outcome)) {
                            log::debug!("Dropping response to request {}: {}", id, e);
                        }
                    }
                });
                in_flight.insert(id, handle.abort_handle());
            }
            (Some(method), None) => log::debug!("Ignoring notification '{}'", method),
            (None, _) => log::debug!("Ignoring unexpected response frame"),
        }
    }

    log::info!("Bridge host closed the channel");
    for (_, handle) in lock(&in_flight).drain() {
        handle.abort();
    }
    drop(outgoing);
    let _ = writer_task.await;
    Ok(())
}

fn lock(in_flight: &InFlight) -> std::sync::MutexGuard<'_, HashMap<u64, AbortHandle>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

fn cancel(in_flight: &InFlight, outgoing: &FrameSender, id: u64) -> Result<()> {
    let Some(handle) = lock(in_flight).remove(&id) else {
        return Ok(());
    };
    handle.abort();
    log::debug!("Cancelled bridge request {}", id);
    let error = RpcError::new(error_codes::REQUEST_CANCELLED, "Request cancelled");
    send_frame(outgoing, &Message::response(Some(id), Err(error)))
}

async fn handle_request(backend: &dyn RemoteSearch, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
    log::debug!("Bridge request: method={}", method);
    match method {
        METHOD_SEARCH_CODE => {
            let request = parse_search_params(params)?;
            let located = backend.search(&request).await.map_err(|e| RpcError::internal(&e))?;
            serde_json::to_value(located).map_err(|e| RpcError::internal(&e.into()))
        }
        METHOD_WARM_UP => {
            backend.warm_up().await.map_err(|e| RpcError::internal(&e))?;
            Ok(Value::Null)
        }
        _ => Err(RpcError::new(error_codes::METHOD_NOT_FOUND, format!("Unknown method: {}", method))),
    }
}

/// `searchCode` takes a single positional [`QueryRequest`]
fn parse_search_params(params: Option<Value>) -> Result<QueryRequest, RpcError> {
    let request = match params {
        Some(Value::Array(mut args)) if args.len() == 1 => args.remove(0),
        Some(Value::Object(map)) => Value::Object(map),
        _ => {
            return Err(RpcError::new(
                error_codes::INVALID_PARAMS,
                "searchCode expects a single query request",
            ));
        }
    };

    serde_json::from_value(request)
        .map_err(|e| RpcError::new(error_codes::INVALID_PARAMS, format!("Invalid query request: {}", e)))
}
