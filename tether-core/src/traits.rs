// ABOUTME: Collaborator traits for the host messaging platform
// ABOUTME: Message relay toward the visitor room, and control-plane calls (auth, transfer, jobs)

use anyhow::Result;
use async_trait::async_trait;

/// Widget-side countdown contract for the inactivity timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownSignal {
    /// Start counting down; warn the visitor at `warning_secs` before close
    Start { warning_secs: u64, timeout_secs: u64 },
    /// Stop and hide any running countdown
    Stop,
}

/// Outbound relay toward the visitor-facing room.
///
/// All writes to the visitor room go through this trait; the orchestrator
/// never talks to the host platform's message API directly.
#[async_trait]
pub trait RoomRelay: Send + Sync {
    /// Post a visitor-visible message into the room.
    async fn send_text(&self, room_id: &str, text: &str) -> Result<()>;

    /// Post a diagnostic notice. Call sites gate this on the debug flag;
    /// the relay decides where notices land (same room, a debug room, logs).
    async fn send_notice(&self, room_id: &str, text: &str) -> Result<()>;

    /// Show or clear the agent typing indicator in the room.
    async fn set_typing(&self, room_id: &str, typing: bool) -> Result<()>;

    /// Drive the widget's inactivity countdown UI.
    async fn signal_countdown(&self, room_id: &str, signal: CountdownSignal) -> Result<()>;
}

/// Credentials returned by a host platform bot login.
#[derive(Debug, Clone)]
pub struct HostAuth {
    pub token: String,
    pub user_id: String,
}

/// Control-plane operations against the host messaging platform.
///
/// The concrete implementation authenticates internally where a call needs
/// it; `login` is exposed so the hand-off path can fail fast and set the
/// bot's presence before transferring.
#[async_trait]
pub trait HostPlatform: Send + Sync {
    /// Authenticate the system bot; yields an auth token and user id.
    async fn login(&self) -> Result<HostAuth>;

    /// Set the bot's presence (e.g. "online").
    async fn set_presence(&self, auth: &HostAuth, status: &str) -> Result<()>;

    /// Transfer the conversation to a queue/department, or back.
    async fn transfer_room(&self, room_id: &str, department: &str) -> Result<()>;

    /// Set a custom field on the room (e.g. `agentEndedChat`).
    async fn set_room_field(&self, room_id: &str, key: &str, value: &str) -> Result<()>;

    /// Close the visitor room with a closing comment.
    async fn close_room(&self, room_id: &str, comment: &str) -> Result<()>;

    /// Schedule a one-shot job that fires the room's idle timeout after
    /// `delay_secs`. Returns the job id for cancellation.
    async fn schedule_job(&self, room_id: &str, delay_secs: u64) -> Result<String>;

    /// Cancel a previously scheduled one-shot job.
    async fn cancel_job(&self, job_id: &str) -> Result<()>;
}
