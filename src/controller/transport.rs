//! How task requests reach workers
//!
//! The controller only sees [`WorkerTransport`]. Errors come back as the typed
//! [`FederationError`] rebuilt from the reply envelope; a worker that cannot be
//! reached at all becomes `WorkerUnreachable`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::{FederationError, FederationResult};
use crate::metrics;
use crate::protocol::{TaskOutput, TaskReply, TaskRequest};
use crate::worker::WorkerNode;

// ─── Trait ───────────────────────────────────────────────────

#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// Sends one request to the worker at `socket_addr` and waits at most `timeout`
    async fn send(
        &self,
        socket_addr: &str,
        request: &TaskRequest,
        timeout: Duration,
    ) -> FederationResult<TaskOutput>;
}

fn unreachable(socket_addr: &str, message: impl ToString) -> FederationError {
    FederationError::WorkerUnreachable {
        socket_addr: socket_addr.to_string(),
        message: message.to_string(),
    }
}

// ─── HTTP ────────────────────────────────────────────────────

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerTransport for HttpTransport {
    async fn send(
        &self,
        socket_addr: &str,
        request: &TaskRequest,
        timeout: Duration,
    ) -> FederationResult<TaskOutput> {
        let url = format!("http://{}/tasks", socket_addr);
        debug!(%url, task = request.task.name(), "Sending task");

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    metrics::record_timeout();
                }
                unreachable(socket_addr, e)
            })?;

        // Error replies carry a non-2xx status but are still envelopes
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| unreachable(socket_addr, e))?;
        let reply: TaskReply = serde_json::from_str(&body).map_err(|_| {
            unreachable(
                socket_addr,
                format!("HTTP {} with an unreadable body: {}", status, body),
            )
        })?;
        reply.into_result()
    }
}

// ─── In-process ──────────────────────────────────────────────

/// Routes requests to in-process workers by socket address
///
/// Requests and replies still go through JSON so errors cross the same
/// boundary they cross over HTTP.
#[derive(Default)]
pub struct LocalTransport {
    workers: HashMap<String, Arc<WorkerNode>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker(mut self, node: Arc<WorkerNode>) -> Self {
        self.workers.insert(node.info().socket_addr(), node);
        self
    }
}

#[async_trait]
impl WorkerTransport for LocalTransport {
    async fn send(
        &self,
        socket_addr: &str,
        request: &TaskRequest,
        timeout: Duration,
    ) -> FederationResult<TaskOutput> {
        let node = self
            .workers
            .get(socket_addr)
            .ok_or_else(|| unreachable(socket_addr, "no worker at this address"))?;

        let encoded = serde_json::to_string(request)
            .map_err(|e| FederationError::bad_user_input(e.to_string()))?;
        let decoded: TaskRequest = serde_json::from_str(&encoded)
            .map_err(|e| FederationError::bad_user_input(e.to_string()))?;

        let reply = tokio::time::timeout(timeout, node.handle(decoded))
            .await
            .map_err(|_| {
                metrics::record_timeout();
                unreachable(socket_addr, format!("no reply within {:?}", timeout))
            })?;

        let wire = serde_json::to_string(&reply).map_err(|e| unreachable(socket_addr, e))?;
        let reply: TaskReply =
            serde_json::from_str(&wire).map_err(|e| unreachable(socket_addr, e))?;
        reply.into_result()
    }
}
