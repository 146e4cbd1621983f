// ABOUTME: Visitor-facing message catalog with template substitution
// ABOUTME: Templates come from config; every %s occurrence is replaced with the same value

use serde::{Deserialize, Serialize};

/// Replace every `%s` occurrence in a template with the given value.
pub fn substitute(template: &str, value: &str) -> String {
    template.replace("%s", value)
}

/// All visitor-facing text the orchestrator can emit.
///
/// Every field has a default so a bare config file still produces a working
/// catalog; deployments override individual entries under `[messages]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCatalog {
    /// Rendered when queue position is N > 1; `%s` is replaced with N
    #[serde(default = "default_queue_position")]
    pub queue_position: String,
    /// Rendered when queue position is exactly 1
    #[serde(default = "default_queue_next")]
    pub queue_next: String,
    #[serde(default = "default_no_agent_available")]
    pub no_agent_available: String,
    /// Generic apology for any terminal failure without a specific message
    #[serde(default = "default_technical_difficulty")]
    pub technical_difficulty: String,
    #[serde(default = "default_session_expired")]
    pub session_expired: String,
    #[serde(default = "default_agent_ended")]
    pub agent_ended: String,
    #[serde(default = "default_idle_closed")]
    pub idle_closed: String,
    #[serde(default = "default_handoff_failed")]
    pub handoff_failed: String,
    /// Terminal message carrying the widget's close-chat affordance
    #[serde(default = "default_chat_ended")]
    pub chat_ended: String,
}

fn default_queue_position() -> String {
    "You are number %s in line. An agent will be with you as soon as possible.".to_string()
}

fn default_queue_next() -> String {
    "You are next in line. An agent will be with you shortly.".to_string()
}

fn default_no_agent_available() -> String {
    "No agents are available right now. Please try again later.".to_string()
}

fn default_technical_difficulty() -> String {
    "We are experiencing technical difficulties. Please try again later.".to_string()
}

fn default_session_expired() -> String {
    "Your chat session has expired.".to_string()
}

fn default_agent_ended() -> String {
    "The agent has ended the chat.".to_string()
}

fn default_idle_closed() -> String {
    "The chat was closed due to inactivity.".to_string()
}

fn default_handoff_failed() -> String {
    "We could not connect you to an agent workspace, but your chat is still active.".to_string()
}

fn default_chat_ended() -> String {
    "This chat has ended. You can close this window.".to_string()
}

impl Default for MessageCatalog {
    fn default() -> Self {
        Self {
            queue_position: default_queue_position(),
            queue_next: default_queue_next(),
            no_agent_available: default_no_agent_available(),
            technical_difficulty: default_technical_difficulty(),
            session_expired: default_session_expired(),
            agent_ended: default_agent_ended(),
            idle_closed: default_idle_closed(),
            handoff_failed: default_handoff_failed(),
            chat_ended: default_chat_ended(),
        }
    }
}

impl MessageCatalog {
    /// Render the queue-position announcement for a given position.
    ///
    /// Position 1 gets the distinct "you are next" variant; positions above 1
    /// get the template with the number substituted. Zero or negative
    /// positions are not a defined input and render nothing.
    pub fn render_queue_position(&self, position: i64) -> Option<String> {
        match position {
            1 => Some(self.queue_next.clone()),
            p if p > 1 => Some(substitute(&self.queue_position, &p.to_string())),
            _ => None,
        }
    }
}
