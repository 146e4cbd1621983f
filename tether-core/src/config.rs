// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates required fields and provides sensible defaults for optional ones

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::messages::MessageCatalog;
use crate::tokens::IdleTimeoutConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub desk: DeskConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub handoff: HandoffConfig,
    #[serde(default)]
    pub idle: IdleTimeoutConfig,
    #[serde(default)]
    pub messages: MessageCatalog,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    /// When enabled, specific failure reasons and hand-off diagnostics are
    /// posted as notices; visitors only ever see the generic messages.
    #[serde(default)]
    pub debug: bool,
}

/// Connection settings for the agent-desk backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeskConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub deployment_id: String,
    #[serde(default)]
    pub button_id: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Send the visitor's in-progress text instead of a plain typing flag
    #[serde(default)]
    pub sneak_peek_enabled: bool,
}

fn default_api_version() -> String {
    "34".to_string()
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            org_id: String::new(),
            deployment_id: String::new(),
            button_id: String::new(),
            api_version: default_api_version(),
            sneak_peek_enabled: false,
        }
    }
}

/// Connection and bot identity for the host messaging platform.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub bot_username: String,
    #[serde(default)]
    pub bot_password: String,
}

// Custom Debug impl to redact the bot password
impl std::fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostConfig")
            .field("base_url", &self.base_url)
            .field("bot_username", &self.bot_username)
            .field("bot_password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandoffMode {
    /// Bot logs in, goes online, and transfers the room to a department queue
    Queue,
    /// Bot stays attached as the active agent; no transfer
    Direct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffConfig {
    #[serde(default = "default_handoff_mode")]
    pub mode: HandoffMode,
    /// Department that receives the room when an agent accepts (queue mode)
    #[serde(default)]
    pub target_department: Option<String>,
    /// Department that takes the room back when the chat ends; absent means
    /// the terminal message carries the close-chat affordance instead
    #[serde(default)]
    pub handback_department: Option<String>,
}

fn default_handoff_mode() -> HandoffMode {
    HandoffMode::Direct
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            mode: default_handoff_mode(),
            target_department: None,
            handback_department: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    13800
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_path")]
    pub path: String,
}

fn default_workspace_path() -> String {
    "./workspace".to_string()
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            path: default_workspace_path(),
        }
    }
}

impl Config {
    /// Load configuration from `tether.toml` (or `$TETHER_CONFIG`) with
    /// environment variable overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("TETHER_CONFIG").unwrap_or_else(|_| "tether.toml".to_string());
        Self::load_from(&path)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TETHER_DESK_BASE_URL") {
            self.desk.base_url = val;
        }
        if let Ok(val) = std::env::var("TETHER_DESK_ORG_ID") {
            self.desk.org_id = val;
        }
        if let Ok(val) = std::env::var("TETHER_DESK_DEPLOYMENT_ID") {
            self.desk.deployment_id = val;
        }
        if let Ok(val) = std::env::var("TETHER_DESK_BUTTON_ID") {
            self.desk.button_id = val;
        }
        if let Ok(val) = std::env::var("TETHER_HOST_BASE_URL") {
            self.host.base_url = val;
        }
        if let Ok(val) = std::env::var("TETHER_HOST_BOT_USERNAME") {
            self.host.bot_username = val;
        }
        if let Ok(val) = std::env::var("TETHER_HOST_BOT_PASSWORD") {
            self.host.bot_password = val;
        }
        if let Ok(val) = std::env::var("TETHER_SERVER_PORT") {
            match val.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => {
                    tracing::warn!(value = %val, "TETHER_SERVER_PORT is not a valid port, keeping configured value")
                }
            }
        }
        if let Ok(val) = std::env::var("TETHER_API_KEY") {
            self.server.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("TETHER_WORKSPACE_PATH") {
            self.workspace.path = val;
        }
        if let Ok(val) = std::env::var("TETHER_DEBUG") {
            self.debug = matches!(val.as_str(), "1" | "true" | "yes");
        }
    }

    fn validate(&self) -> Result<()> {
        if self.host.base_url.trim().is_empty() {
            anyhow::bail!(
                "host.base_url is required (set in tether.toml or TETHER_HOST_BASE_URL env var)"
            );
        }
        if self.handoff.mode == HandoffMode::Queue && self.handoff.target_department.is_none() {
            anyhow::bail!("handoff.target_department is required when handoff.mode = \"queue\"");
        }
        if self.idle.enabled && self.idle.warning_secs >= self.idle.timeout_secs {
            anyhow::bail!("idle.warning_secs must be smaller than idle.timeout_secs");
        }

        // An incomplete desk section is not fatal at startup: session starts
        // are refused per-request with a visitor-facing apology instead.
        if self.desk_ready().is_err() {
            tracing::warn!("Desk configuration incomplete; session starts will be refused");
        }

        Ok(())
    }

    /// Check that everything a session start needs is configured.
    ///
    /// Returns the specific missing field so it can go to the debug channel;
    /// the visitor only ever sees the generic apology.
    pub fn desk_ready(&self) -> Result<()> {
        let required = [
            ("desk.base_url", &self.desk.base_url),
            ("desk.org_id", &self.desk.org_id),
            ("desk.deployment_id", &self.desk.deployment_id),
            ("desk.button_id", &self.desk.button_id),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                anyhow::bail!("Missing required desk configuration: {}", name);
            }
        }
        Ok(())
    }
}
