//! Peer RPC Client
//!
//! Thin typed wrapper over HTTP/JSON calls between nodes. Every call targets
//! a peer by its `NodeId` (which is its `address:port`) and goes through the
//! retry-with-backoff helpers, so transient network blips do not surface as
//! hard failures to the protocol layers above.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::gossip::protocol::{
    AddedToViewRequest, DataResponse, DisseminateRequest, ENDPOINT_ADDED_TO_VIEW, ENDPOINT_DATA,
    ENDPOINT_DISSEMINATE, ENDPOINT_HELLO, ENDPOINT_VIEW, ViewExchangeRequest, ViewExchangeResponse,
};
use crate::gossip::types::{GossipMessage, KeyValue, Node, NodeId, View};
use crate::job::protocol::{
    DoneRequest, ENDPOINT_JOB_DONE, ENDPOINT_JOB_RESULT, ENDPOINT_JOB_TASK, ENDPOINT_NEW_JOB,
    ENDPOINT_RECRUIT, NewJobRequest, NewJobResponse, RecruitRequest, RecruitResponse, ResultRequest,
    TaskRequest,
};
use crate::job::types::Job;

const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);
const REQUEST_ATTEMPTS: usize = 3;

/// Seam for the leader/worker dispatch plane, so the streaming pipeline can
/// be driven without a network in tests.
#[async_trait]
pub trait TaskTransport: Send + Sync {
    async fn send_task(&self, peer: &NodeId, request: &TaskRequest) -> Result<()>;
    async fn send_result(&self, peer: &NodeId, request: &ResultRequest) -> Result<()>;
    async fn send_done(&self, peer: &NodeId, request: &DoneRequest) -> Result<()>;
}

pub struct PeerClient {
    http_client: reqwest::Client,
}

impl PeerClient {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
        }
    }

    fn url(peer: &NodeId, endpoint: &str) -> String {
        format!("http://{}{}", peer.0, endpoint)
    }

    pub async fn exchange_view(&self, peer: &NodeId, view: &View) -> Result<View> {
        let response = self
            .post_with_retry(
                Self::url(peer, ENDPOINT_VIEW),
                &ViewExchangeRequest { view: view.clone() },
                REQUEST_TIMEOUT,
                REQUEST_ATTEMPTS,
            )
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("View exchange failed: {}", response.status()));
        }

        let exchanged: ViewExchangeResponse = response.json().await?;
        Ok(exchanged.view)
    }

    pub async fn disseminate(&self, peer: &NodeId, message: &GossipMessage) -> Result<()> {
        let response = self
            .post_with_retry(
                Self::url(peer, ENDPOINT_DISSEMINATE),
                &DisseminateRequest {
                    message: message.clone(),
                },
                REQUEST_TIMEOUT,
                REQUEST_ATTEMPTS,
            )
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Disseminate failed: {}", response.status()));
        }
        Ok(())
    }

    pub async fn get_data(&self, peer: &NodeId) -> Result<Vec<KeyValue>> {
        let response = self
            .get_with_retry(
                Self::url(peer, ENDPOINT_DATA),
                REQUEST_TIMEOUT,
                REQUEST_ATTEMPTS,
            )
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Data fetch failed: {}", response.status()));
        }

        let data: DataResponse = response.json().await?;
        Ok(data.entries)
    }

    pub async fn added_to_view(&self, peer: &NodeId, node: &Node) -> Result<()> {
        let response = self
            .post_with_retry(
                Self::url(peer, ENDPOINT_ADDED_TO_VIEW),
                &AddedToViewRequest { node: node.clone() },
                REQUEST_TIMEOUT,
                REQUEST_ATTEMPTS,
            )
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("added_to_view failed: {}", response.status()));
        }
        Ok(())
    }

    pub async fn hello(&self, peer: &NodeId) -> Result<()> {
        let response = self
            .post_with_retry(
                Self::url(peer, ENDPOINT_HELLO),
                &serde_json::json!({}),
                REQUEST_TIMEOUT,
                REQUEST_ATTEMPTS,
            )
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("hello failed: {}", response.status()));
        }
        Ok(())
    }

    pub async fn new_job(&self, peer: &NodeId, job: &Job) -> Result<NewJobResponse> {
        let response = self
            .post_with_retry(
                Self::url(peer, ENDPOINT_NEW_JOB),
                &NewJobRequest { job: job.clone() },
                REQUEST_TIMEOUT,
                REQUEST_ATTEMPTS,
            )
            .await?;

        Ok(response.json().await?)
    }

    pub async fn recruit(&self, peer: &NodeId, request: &RecruitRequest) -> Result<RecruitResponse> {
        let response = self
            .post_with_retry(
                Self::url(peer, ENDPOINT_RECRUIT),
                request,
                REQUEST_TIMEOUT,
                REQUEST_ATTEMPTS,
            )
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Recruit failed: {}", response.status()));
        }

        Ok(response.json().await?)
    }

    // --- HTTP helpers with backoff ---

    async fn post_with_retry<T: serde::Serialize>(
        &self,
        url: String,
        payload: &T,
        timeout: Duration,
        attempts: usize,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    // Simple jitter to prevent thundering herd
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }

    async fn get_with_retry(
        &self,
        url: String,
        timeout: Duration,
        attempts: usize,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http_client
                .get(url.clone())
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }
}

impl Default for PeerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskTransport for PeerClient {
    async fn send_task(&self, peer: &NodeId, request: &TaskRequest) -> Result<()> {
        let response = self
            .post_with_retry(
                Self::url(peer, ENDPOINT_JOB_TASK),
                request,
                REQUEST_TIMEOUT,
                REQUEST_ATTEMPTS,
            )
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Task dispatch failed: {}", response.status()));
        }
        Ok(())
    }

    async fn send_result(&self, peer: &NodeId, request: &ResultRequest) -> Result<()> {
        let response = self
            .post_with_retry(
                Self::url(peer, ENDPOINT_JOB_RESULT),
                request,
                REQUEST_TIMEOUT,
                REQUEST_ATTEMPTS,
            )
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Result delivery failed: {}", response.status()));
        }
        Ok(())
    }

    async fn send_done(&self, peer: &NodeId, request: &DoneRequest) -> Result<()> {
        let response = self
            .post_with_retry(
                Self::url(peer, ENDPOINT_JOB_DONE),
                request,
                REQUEST_TIMEOUT,
                REQUEST_ATTEMPTS,
            )
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Done signal failed: {}", response.status()));
        }
        Ok(())
    }
}
