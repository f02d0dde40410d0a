//! Coordinator client
//!
//! JSON-over-HTTP client for the pool's `/v1` endpoints, shared by miners
//! and the block conductor.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{PoolError, Result};
use crate::protocol::*;

/// Configuration for the coordinator client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator base URL
    pub coordinator_addr: String,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            coordinator_addr: format!("http://localhost:{}", crate::DEFAULT_PORT_BASE),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Pool RPC client
///
/// Work, cancel and result requests block server-side, so requests carry
/// no overall timeout; callers that need one wrap the future themselves.
#[derive(Clone)]
pub struct PoolClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl PoolClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| PoolError::Internal {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.coordinator_addr.trim_end_matches('/'), path)
    }

    fn connection_error(&self, err: reqwest::Error) -> PoolError {
        PoolError::ConnectionFailed {
            endpoint: self.config.coordinator_addr.clone(),
            reason: err.to_string(),
        }
    }

    async fn call<Req, Rep>(&self, path: &str, body: &Req) -> Result<Rep>
    where
        Req: Serialize + ?Sized,
        Rep: DeserializeOwned,
    {
        debug!("POST {}", path);
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;
        decode(response).await
    }

    /// Log in and return the assigned id
    pub async fn login(&self, name: &str, credential: Option<Credential>) -> Result<u32> {
        let req = LoginRequest {
            name: name.to_string(),
            credential,
        };
        let reply: LoginReply = self.call("/v1/login", &req).await?;
        Ok(reply.id)
    }

    /// Block until the next round starts
    pub async fn get_work(&self, name: &str) -> Result<WorkAssignment> {
        let req = GetWorkRequest { name: name.to_string() };
        let reply: GetWorkReply = self.call("/v1/work", &req).await?;
        Ok(reply.work)
    }

    pub async fn announce(&self, solution: Solution) -> Result<bool> {
        let reply: AnnounceReply = self.call("/v1/announce", &AnnounceRequest { solution }).await?;
        Ok(reply.accepted)
    }

    /// Block until the exit barrier of `round` opens
    pub async fn get_cancel(&self, name: &str, round: Option<u64>) -> Result<CancelNotice> {
        let req = GetCancelRequest {
            name: name.to_string(),
            round,
        };
        self.call("/v1/cancel", &req).await
    }

    pub async fn issue_block(&self, template: BlockTemplate) -> Result<IssueBlockReply> {
        self.call("/v1/block", &IssueBlockRequest { template }).await
    }

    /// Block until a win record is available
    pub async fn get_result(&self, observer: &str) -> Result<WinRecord> {
        let req = GetResultRequest {
            observer: observer.to_string(),
        };
        let reply: GetResultReply = self.call("/v1/result", &req).await?;
        Ok(reply.record)
    }

    pub async fn status(&self) -> Result<CoordinatorStatus> {
        let response = self
            .http
            .get(self.url("/status"))
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;
        decode(response).await
    }
}

/// Parse a success body, or rebuild the typed error from an error body
async fn decode<Rep: DeserializeOwned>(response: reqwest::Response) -> Result<Rep> {
    let status = response.status();
    if status.is_success() {
        return response.json().await.map_err(|e| PoolError::InvalidMessage {
            reason: e.to_string(),
        });
    }

    let text = response.text().await.unwrap_or_default();
    Err(error_from_body(status, &text))
}

fn error_from_body(status: StatusCode, text: &str) -> PoolError {
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) => body.into_error(status.as_u16()),
        Err(_) => PoolError::Remote {
            status: status.as_u16(),
            message: text.to_string(),
        },
    }
}
