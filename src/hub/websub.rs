//! HTTP hub engine: sends subscription requests to the hub and serves the
//! callback endpoint it verifies and delivers through.
//!
//! Every topic gets one lease with a stable random id; the callback URL is
//! `{callback_base}/push-callback/{id}`. Signature checking and lease renewal
//! are not handled here.

use super::{DeliveryHandler, HubEngine};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseState {
    /// Requested, waiting for the hub to verify.
    Pending,
    Active,
    /// Cancellation requested, waiting for the hub to verify.
    Unsubscribing,
}

struct Lease {
    id: String,
    /// Which subscribe call installed this lease; rollbacks only touch their own.
    attempt: u64,
    hub_url: String,
    handler: Arc<dyn DeliveryHandler>,
    state: LeaseState,
}

pub struct WebSubEngine {
    http: Client,
    callback_base: String,
    attempts: AtomicU64,
    /// Keyed by topic URL.
    leases: RwLock<HashMap<String, Lease>>,
}

impl fmt::Debug for WebSubEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSubEngine")
            .field("callback_base", &self.callback_base)
            .finish_non_exhaustive()
    }
}

impl WebSubEngine {
    pub fn new(callback_base: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("hubwatch/", env!("CARGO_PKG_VERSION")))
            .no_proxy()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            callback_base: callback_base.into().trim_end_matches('/').to_string(),
            attempts: AtomicU64::new(0),
            leases: RwLock::new(HashMap::new()),
        })
    }

    fn callback_url(&self, lease_id: &str) -> String {
        format!("{}/push-callback/{}", self.callback_base, lease_id)
    }

    /// Whether the hub has confirmed the lease for `topic_url`.
    pub async fn is_active(&self, topic_url: &str) -> bool {
        self.leases
            .read()
            .await
            .get(topic_url)
            .is_some_and(|l| l.state == LeaseState::Active)
    }

    /// Topics with a lease that has not been cancelled.
    pub async fn topics(&self) -> Vec<String> {
        self.leases
            .read()
            .await
            .iter()
            .filter(|(_, l)| l.state != LeaseState::Unsubscribing)
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    async fn send_request(&self, hub_url: &str, mode: &str, topic_url: &str, lease_id: &str) -> Result<()> {
        let callback = self.callback_url(lease_id);
        let res = self
            .http
            .post(hub_url)
            .form(&[
                ("hub.callback", callback.as_str()),
                ("hub.mode", mode),
                ("hub.topic", topic_url),
                ("hub.verify", "async"),
            ])
            .send()
            .await
            .with_context(|| format!("failed to reach hub {hub_url}"))?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("hub rejected {mode} for {topic_url}: {status} {body}"));
        }
        debug!(mode, topic_url, %status, "hub accepted request");
        Ok(())
    }

    async fn verify(&self, lease_id: &str, params: VerifyParams) -> Option<String> {
        let mut leases = self.leases.write().await;
        let lease = leases.get_mut(&params.topic).filter(|l| l.id == lease_id)?;
        match (params.mode.as_str(), lease.state) {
            ("subscribe", LeaseState::Pending | LeaseState::Active) => {
                lease.state = LeaseState::Active;
                info!(topic = %params.topic, lease_seconds = ?params.lease_seconds, "lease verified");
                Some(params.challenge)
            }
            ("unsubscribe", LeaseState::Unsubscribing) => {
                leases.remove(&params.topic);
                info!(topic = %params.topic, "lease cancelled");
                Some(params.challenge)
            }
            ("denied", _) => {
                warn!(topic = %params.topic, reason = ?params.reason, "hub denied subscription");
                leases.remove(&params.topic);
                Some(String::new())
            }
            _ => None,
        }
    }

    async fn handler_for(&self, lease_id: &str) -> Option<Arc<dyn DeliveryHandler>> {
        self.leases
            .read()
            .await
            .values()
            .find(|l| l.id == lease_id && l.state != LeaseState::Unsubscribing)
            .map(|l| l.handler.clone())
    }
}

#[async_trait]
impl HubEngine for WebSubEngine {
    async fn subscribe(
        &self,
        hub_url: &str,
        topic_url: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<()> {
        // Re-subscribing keeps the lease id so the hub sees the same callback.
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
        let (lease_id, previous) = {
            let mut leases = self.leases.write().await;
            let id = leases
                .get(topic_url)
                .map(|l| l.id.clone())
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
            let previous = leases.insert(
                topic_url.to_string(),
                Lease {
                    id: id.clone(),
                    attempt,
                    hub_url: hub_url.to_string(),
                    handler,
                    state: LeaseState::Pending,
                },
            );
            (id, previous)
        };

        if let Err(err) = self.send_request(hub_url, "subscribe", topic_url, &lease_id).await {
            let mut leases = self.leases.write().await;
            let ours = leases
                .get(topic_url)
                .is_some_and(|l| l.attempt == attempt && l.state == LeaseState::Pending);
            if ours {
                match previous {
                    Some(lease) => leases.insert(topic_url.to_string(), lease),
                    None => leases.remove(topic_url),
                };
            } else {
                debug!(topic_url, "lease changed during failed subscribe, keeping it");
            }
            return Err(err);
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic_url: &str) -> Result<()> {
        let (lease_id, attempt, hub_url, previous) = {
            let mut leases = self.leases.write().await;
            let Some(lease) = leases.get_mut(topic_url) else {
                debug!(topic_url, "no lease to cancel");
                return Ok(());
            };
            let previous = lease.state;
            lease.state = LeaseState::Unsubscribing;
            (lease.id.clone(), lease.attempt, lease.hub_url.clone(), previous)
        };

        if let Err(err) = self.send_request(&hub_url, "unsubscribe", topic_url, &lease_id).await {
            let mut leases = self.leases.write().await;
            if let Some(lease) = leases
                .get_mut(topic_url)
                .filter(|l| l.attempt == attempt && l.state == LeaseState::Unsubscribing)
            {
                lease.state = previous;
            }
            return Err(err);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: String,
    #[serde(rename = "hub.topic")]
    topic: String,
    #[serde(rename = "hub.challenge", default)]
    challenge: String,
    #[serde(rename = "hub.lease_seconds")]
    lease_seconds: Option<u64>,
    #[serde(rename = "hub.reason")]
    reason: Option<String>,
}

/// Callback endpoint to mount on the public HTTP server.
pub fn router(engine: Arc<WebSubEngine>) -> Router {
    Router::new()
        .route("/push-callback/:id", get(verify).post(receive))
        .with_state(engine)
}

async fn verify(
    State(engine): State<Arc<WebSubEngine>>,
    Path(id): Path<String>,
    Query(params): Query<VerifyParams>,
) -> Response {
    match engine.verify(&id, params).await {
        Some(challenge) => (StatusCode::OK, challenge).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn receive(
    State(engine): State<Arc<WebSubEngine>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(handler) = engine.handler_for(&id).await else {
        debug!(lease_id = %id, "delivery for unknown lease");
        return StatusCode::NOT_FOUND;
    };
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    handler.deliver(content_type, &body).await;
    StatusCode::OK
}
