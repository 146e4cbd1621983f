// ABOUTME: reqwest client for the host messaging platform's REST API
// ABOUTME: Implements RoomRelay and HostPlatform with a cached bot login that refreshes on 401

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::RwLock;

use tether_core::config::HostConfig;
use tether_core::traits::{CountdownSignal, HostAuth, HostPlatform, RoomRelay};

/// Client for the host platform, shared by the relay and control-plane
/// trait impls. Bot credentials are exchanged for an auth token lazily and
/// cached; a 401 on any call drops the cache and retries once.
pub struct HostClient {
    http: reqwest::Client,
    config: HostConfig,
    auth: RwLock<Option<HostAuth>>,
}

impl HostClient {
    pub fn new(config: HostConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client for host platform")?;
        Ok(Self {
            http,
            config,
            auth: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn perform_login(&self) -> Result<HostAuth> {
        let resp = self
            .http
            .post(self.url("/api/v1/login"))
            .json(&json!({
                "user": self.config.bot_username,
                "password": self.config.bot_password,
            }))
            .send()
            .await
            .context("Host platform unreachable: login")?;

        if !resp.status().is_success() {
            anyhow::bail!("Host platform rejected bot login: HTTP {}", resp.status());
        }

        let body: serde_json::Value = resp.json().await.context("Malformed login response")?;
        let data = body.get("data").cloned().unwrap_or_default();
        let field = |name: &str| -> Result<String> {
            data.get(name)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .with_context(|| format!("Login response missing '{}'", name))
        };

        Ok(HostAuth {
            token: field("authToken")?,
            user_id: field("userId")?,
        })
    }

    async fn cached_auth(&self) -> Result<HostAuth> {
        if let Some(auth) = self.auth.read().await.clone() {
            return Ok(auth);
        }
        let auth = self.perform_login().await?;
        *self.auth.write().await = Some(auth.clone());
        tracing::info!(bot = %self.config.bot_username, "Bot authenticated against host platform");
        Ok(auth)
    }

    /// POST an authenticated JSON body; on 401 the cached token is dropped
    /// and the call retried once with a fresh login.
    async fn authed_post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let mut retried = false;
        loop {
            let auth = self.cached_auth().await?;
            let resp = self
                .http
                .post(self.url(path))
                .header("X-Auth-Token", &auth.token)
                .header("X-User-Id", &auth.user_id)
                .json(&body)
                .send()
                .await
                .with_context(|| format!("Host platform unreachable: POST {}", path))?;

            if resp.status() == StatusCode::UNAUTHORIZED && !retried {
                tracing::debug!(path = %path, "Host auth token stale, re-authenticating");
                *self.auth.write().await = None;
                retried = true;
                continue;
            }
            if !resp.status().is_success() {
                anyhow::bail!("Host platform rejected POST {}: HTTP {}", path, resp.status());
            }
            return Ok(resp.json().await.unwrap_or_default());
        }
    }
}

#[async_trait]
impl RoomRelay for HostClient {
    async fn send_text(&self, room_id: &str, text: &str) -> Result<()> {
        self.authed_post(
            "/api/v1/chat.postMessage",
            json!({ "roomId": room_id, "text": text }),
        )
        .await?;
        Ok(())
    }

    async fn send_notice(&self, room_id: &str, text: &str) -> Result<()> {
        self.authed_post(
            "/api/v1/chat.postMessage",
            json!({ "roomId": room_id, "text": text, "alias": "tether-debug" }),
        )
        .await?;
        Ok(())
    }

    async fn set_typing(&self, room_id: &str, typing: bool) -> Result<()> {
        self.authed_post(
            "/api/v1/chat.typing",
            json!({ "roomId": room_id, "typing": typing }),
        )
        .await?;
        Ok(())
    }

    async fn signal_countdown(&self, room_id: &str, signal: CountdownSignal) -> Result<()> {
        let body = match signal {
            CountdownSignal::Start {
                warning_secs,
                timeout_secs,
            } => json!({
                "roomId": room_id,
                "action": "start",
                "warningSecs": warning_secs,
                "timeoutSecs": timeout_secs,
            }),
            CountdownSignal::Stop => json!({ "roomId": room_id, "action": "stop" }),
        };
        self.authed_post("/api/v1/chat.countdown", body).await?;
        Ok(())
    }
}

#[async_trait]
impl HostPlatform for HostClient {
    async fn login(&self) -> Result<HostAuth> {
        // Explicit login refreshes the cache so later calls reuse it
        let auth = self.perform_login().await?;
        *self.auth.write().await = Some(auth.clone());
        Ok(auth)
    }

    async fn set_presence(&self, auth: &HostAuth, status: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url("/api/v1/users.setStatus"))
            .header("X-Auth-Token", &auth.token)
            .header("X-User-Id", &auth.user_id)
            .json(&json!({ "status": status }))
            .send()
            .await
            .context("Host platform unreachable: set presence")?;

        if !resp.status().is_success() {
            anyhow::bail!("Presence update rejected: HTTP {}", resp.status());
        }
        Ok(())
    }

    async fn transfer_room(&self, room_id: &str, department: &str) -> Result<()> {
        self.authed_post(
            "/api/v1/rooms.transfer",
            json!({ "roomId": room_id, "department": department }),
        )
        .await?;
        Ok(())
    }

    async fn set_room_field(&self, room_id: &str, key: &str, value: &str) -> Result<()> {
        self.authed_post(
            "/api/v1/rooms.saveCustomField",
            json!({ "roomId": room_id, "field": key, "value": value }),
        )
        .await?;
        Ok(())
    }

    async fn close_room(&self, room_id: &str, comment: &str) -> Result<()> {
        self.authed_post(
            "/api/v1/rooms.close",
            json!({ "roomId": room_id, "comment": comment }),
        )
        .await?;
        Ok(())
    }

    async fn schedule_job(&self, room_id: &str, delay_secs: u64) -> Result<String> {
        let body = self
            .authed_post(
                "/api/v1/jobs.schedule",
                json!({ "roomId": room_id, "delaySecs": delay_secs }),
            )
            .await?;
        body.get("jobId")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .context("Job schedule response missing 'jobId'")
    }

    async fn cancel_job(&self, job_id: &str) -> Result<()> {
        self.authed_post("/api/v1/jobs.cancel", json!({ "jobId": job_id }))
            .await?;
        Ok(())
    }
}
