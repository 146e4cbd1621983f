// ABOUTME: Hand-off strategies run when an agent accepts the chat or the session ends
// ABOUTME: Queue mode transfers the room to a department; direct mode leaves the bot attached

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Config, HandoffMode};
use crate::traits::{HostPlatform, RoomRelay};

/// Strategy seam for conversation hand-off.
///
/// Selected once at configuration time; the state machine calls it on
/// establishment and on every terminal transition. Errors are non-fatal to
/// the desk session: the caller degrades with an apology and a diagnostic.
#[async_trait]
pub trait HandoffStrategy: Send + Sync {
    /// A human agent accepted the chat.
    async fn on_established(&self, room_id: &str) -> Result<()>;

    /// The chat ended; `farewell` carries the end-reason message to relay.
    async fn on_ended(&self, room_id: &str, farewell: &str) -> Result<()>;
}

/// Authenticate the system bot, bring it online, and transfer the room to
/// the target department queue.
pub struct QueueHandoff {
    host: Arc<dyn HostPlatform>,
    relay: Arc<dyn RoomRelay>,
    target_department: String,
    handback_department: Option<String>,
    chat_ended_message: String,
}

impl QueueHandoff {
    pub fn new(
        host: Arc<dyn HostPlatform>,
        relay: Arc<dyn RoomRelay>,
        target_department: String,
        handback_department: Option<String>,
        chat_ended_message: String,
    ) -> Self {
        Self {
            host,
            relay,
            target_department,
            handback_department,
            chat_ended_message,
        }
    }
}

#[async_trait]
impl HandoffStrategy for QueueHandoff {
    async fn on_established(&self, room_id: &str) -> Result<()> {
        let auth = self.host.login().await.context("Bot login failed")?;
        self.host
            .set_presence(&auth, "online")
            .await
            .context("Bot presence update failed")?;
        self.host
            .transfer_room(room_id, &self.target_department)
            .await
            .with_context(|| format!("Transfer to department '{}' failed", self.target_department))?;

        tracing::info!(
            room_id = %room_id,
            department = %self.target_department,
            "Room transferred to agent department"
        );
        Ok(())
    }

    async fn on_ended(&self, room_id: &str, farewell: &str) -> Result<()> {
        self.relay.send_text(room_id, farewell).await?;

        match &self.handback_department {
            Some(department) => {
                self.host
                    .transfer_room(room_id, department)
                    .await
                    .with_context(|| format!("Hand-back to department '{}' failed", department))?;
                tracing::info!(room_id = %room_id, department = %department, "Room handed back");
            }
            None => {
                self.relay.send_text(room_id, &self.chat_ended_message).await?;
            }
        }
        Ok(())
    }
}

/// Leave the bot attached as the active agent; no department transfer.
pub struct DirectHandoff {
    relay: Arc<dyn RoomRelay>,
    chat_ended_message: String,
}

impl DirectHandoff {
    pub fn new(relay: Arc<dyn RoomRelay>, chat_ended_message: String) -> Self {
        Self {
            relay,
            chat_ended_message,
        }
    }
}

#[async_trait]
impl HandoffStrategy for DirectHandoff {
    async fn on_established(&self, room_id: &str) -> Result<()> {
        tracing::debug!(room_id = %room_id, "Direct hand-off: bot stays attached");
        Ok(())
    }

    async fn on_ended(&self, room_id: &str, farewell: &str) -> Result<()> {
        self.relay.send_text(room_id, farewell).await?;
        self.relay.send_text(room_id, &self.chat_ended_message).await?;
        Ok(())
    }
}

/// Build the configured strategy. Queue mode requires a target department,
/// which config validation has already guaranteed.
pub fn strategy_from_config(
    config: &Config,
    host: Arc<dyn HostPlatform>,
    relay: Arc<dyn RoomRelay>,
) -> Result<Arc<dyn HandoffStrategy>> {
    match config.handoff.mode {
        HandoffMode::Queue => {
            let target = config
                .handoff
                .target_department
                .clone()
                .context("handoff.target_department is required for queue mode")?;
            Ok(Arc::new(QueueHandoff::new(
                host,
                relay,
                target,
                config.handoff.handback_department.clone(),
                config.messages.chat_ended.clone(),
            )))
        }
        HandoffMode::Direct => Ok(Arc::new(DirectHandoff::new(
            relay,
            config.messages.chat_ended.clone(),
        ))),
    }
}
