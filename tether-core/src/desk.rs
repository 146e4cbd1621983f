// ABOUTME: Client for the remote agent-desk chat backend over its REST long-poll API
// ABOUTME: Translates orchestrator intents into HTTP calls and normalizes responses; no retry of its own

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::DeskConfig;
use crate::events::{parse_poll_body, PollEvent};

/// Identifies one desk chat session. Owned exclusively by one room at a time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionTokens {
    pub session_id: String,
    pub affinity_token: String,
    pub session_key: String,
}

/// Visitor identity attached to a chat request as pre-chat fields.
#[derive(Debug, Clone)]
pub struct Visitor {
    pub name: String,
    pub email: Option<String>,
}

/// Cause tag forwarded to the desk when we end a session, for its analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndCause {
    Client,
    IdleTimeout,
}

impl EndCause {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::IdleTimeout => "idle_timeout",
        }
    }
}

/// Result of one long-poll round trip.
///
/// Callers must not conflate `EmptyRetry` ("nothing new, poll again
/// immediately") with `SessionExpired` ("the tokens are dead"); that
/// distinction is the central contract of the poll loop.
#[derive(Debug)]
pub enum PollOutcome {
    /// The desk returned events, in wire order
    Events(Vec<PollEvent>),
    /// HTTP 204/409: nothing new, re-poll immediately with no backoff
    EmptyRetry,
    /// HTTP 403: the session is gone; terminal
    SessionExpired,
    /// Network-level failure; retry policy belongs to the state machine
    TransportError(anyhow::Error),
}

/// The five-plus-presence operations the orchestrator needs from the desk.
///
/// All operations are side-effecting network calls with no retry of their
/// own. Tests script this trait instead of standing up a live desk.
#[async_trait]
pub trait DeskBackend: Send + Sync {
    /// Acquire fresh session tokens. No prior affinity.
    async fn create_session(&self) -> Result<SessionTokens>;

    /// Enter the agent queue, attaching visitor identification.
    async fn request_chat(&self, tokens: &SessionTokens, visitor: &Visitor) -> Result<()>;

    /// One long-poll round trip.
    async fn poll_events(&self, tokens: &SessionTokens) -> PollOutcome;

    /// Relay a visitor message into the established chat.
    async fn send_visitor_message(&self, tokens: &SessionTokens, text: &str) -> Result<()>;

    /// End the session, forwarding the cause for desk-side analytics.
    async fn end_session(&self, tokens: &SessionTokens, cause: EndCause) -> Result<()>;

    /// Plain typing indicator. Mutually exclusive with sneak peek per room.
    async fn set_typing(&self, tokens: &SessionTokens, is_typing: bool) -> Result<()>;

    /// Sneak peek: stream the visitor's in-progress text to the agent.
    async fn set_sneak_peek(&self, tokens: &SessionTokens, text: &str) -> Result<()>;
}

const API_VERSION_HEADER: &str = "X-LIVEAGENT-API-VERSION";
const AFFINITY_HEADER: &str = "X-LIVEAGENT-AFFINITY";
const SESSION_KEY_HEADER: &str = "X-LIVEAGENT-SESSION-KEY";

/// reqwest-backed desk client.
pub struct HttpDesk {
    http: reqwest::Client,
    config: DeskConfig,
}

impl HttpDesk {
    pub fn new(config: DeskConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            // Long polls are held open server-side; leave generous room
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client for desk")?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn with_session_headers(
        &self,
        req: reqwest::RequestBuilder,
        tokens: &SessionTokens,
    ) -> reqwest::RequestBuilder {
        req.header(API_VERSION_HEADER, &self.config.api_version)
            .header(AFFINITY_HEADER, &tokens.affinity_token)
            .header(SESSION_KEY_HEADER, &tokens.session_key)
    }

    async fn post_session_json(
        &self,
        path: &str,
        tokens: &SessionTokens,
        body: serde_json::Value,
    ) -> Result<()> {
        let resp = self
            .with_session_headers(self.http.post(self.url(path)), tokens)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Desk unreachable: POST {}", path))?;

        if !resp.status().is_success() {
            anyhow::bail!("Desk rejected POST {}: HTTP {}", path, resp.status());
        }
        Ok(())
    }
}

#[async_trait]
impl DeskBackend for HttpDesk {
    async fn create_session(&self) -> Result<SessionTokens> {
        let resp = self
            .http
            .get(self.url("/chat/rest/System/SessionId"))
            .header(API_VERSION_HEADER, &self.config.api_version)
            .header(AFFINITY_HEADER, "null")
            .send()
            .await
            .context("Desk unreachable: create session")?;

        if !resp.status().is_success() {
            anyhow::bail!("Desk rejected session creation: HTTP {}", resp.status());
        }

        // Defensive parse: a malformed body is a protocol error, not a panic
        let body: serde_json::Value = resp
            .json()
            .await
            .context("Malformed session creation response")?;

        let field = |name: &str| -> Result<String> {
            body.get(name)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .with_context(|| format!("Session creation response missing '{}'", name))
        };

        Ok(SessionTokens {
            session_id: field("id")?,
            affinity_token: field("affinityToken")?,
            session_key: field("key")?,
        })
    }

    async fn request_chat(&self, tokens: &SessionTokens, visitor: &Visitor) -> Result<()> {
        let mut prechat_details = vec![json!({
            "label": "Name",
            "value": visitor.name,
            "displayToAgent": true,
            "transcriptFields": [],
            "entityMaps": [],
        })];
        if let Some(email) = &visitor.email {
            prechat_details.push(json!({
                "label": "E-mail",
                "value": email,
                "displayToAgent": true,
                "transcriptFields": [],
                "entityMaps": [],
            }));
        }

        let body = json!({
            "organizationId": self.config.org_id,
            "deploymentId": self.config.deployment_id,
            "buttonId": self.config.button_id,
            "sessionId": tokens.session_id,
            "visitorName": visitor.name,
            "prechatDetails": prechat_details,
            "prechatEntities": [],
            "receiveQueueUpdates": true,
            "isPost": true,
        });

        self.post_session_json("/chat/rest/Chasitor/ChasitorInit", tokens, body)
            .await
    }

    async fn poll_events(&self, tokens: &SessionTokens) -> PollOutcome {
        let resp = match self
            .with_session_headers(
                self.http.get(self.url("/chat/rest/System/Messages")),
                tokens,
            )
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return PollOutcome::TransportError(e.into()),
        };

        match resp.status() {
            StatusCode::NO_CONTENT | StatusCode::CONFLICT => PollOutcome::EmptyRetry,
            StatusCode::FORBIDDEN => PollOutcome::SessionExpired,
            status if status.is_success() => {
                // Absent or unparseable fields yield an empty event list, never a crash
                let body: serde_json::Value = resp.json().await.unwrap_or_default();
                PollOutcome::Events(parse_poll_body(&body))
            }
            status => {
                PollOutcome::TransportError(anyhow::anyhow!("Desk poll returned HTTP {}", status))
            }
        }
    }

    async fn send_visitor_message(&self, tokens: &SessionTokens, text: &str) -> Result<()> {
        self.post_session_json(
            "/chat/rest/Chasitor/ChatMessage",
            tokens,
            json!({ "text": text }),
        )
        .await
    }

    async fn end_session(&self, tokens: &SessionTokens, cause: EndCause) -> Result<()> {
        self.post_session_json(
            "/chat/rest/Chasitor/ChatEnd",
            tokens,
            json!({ "reason": cause.as_wire() }),
        )
        .await
    }

    async fn set_typing(&self, tokens: &SessionTokens, is_typing: bool) -> Result<()> {
        let path = if is_typing {
            "/chat/rest/Chasitor/ChasitorTyping"
        } else {
            "/chat/rest/Chasitor/ChasitorNotTyping"
        };
        self.post_session_json(path, tokens, json!({})).await
    }

    async fn set_sneak_peek(&self, tokens: &SessionTokens, text: &str) -> Result<()> {
        self.post_session_json(
            "/chat/rest/Chasitor/ChasitorSneakPeek",
            tokens,
            json!({ "position": 0, "text": text }),
        )
        .await
    }
}
