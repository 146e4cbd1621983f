// ABOUTME: Pure classification of desk poll responses into typed events.
// ABOUTME: No network or persistence access, so transition logic is testable without a live desk.

use serde_json::Value;

/// Why a chat request was rejected by the desk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailReason {
    /// No agent is available to take the chat
    Unavailable,
    /// The desk rejected the request body
    NoPost,
    /// The desk failed internally
    InternalFailure,
    /// Any reason we don't recognize, preserved verbatim for diagnostics
    Other(String),
}

impl FailReason {
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "Unavailable" => Self::Unavailable,
            "NoPost" => Self::NoPost,
            "InternalFailure" => Self::InternalFailure,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Unavailable => "Unavailable",
            Self::NoPost => "NoPost",
            Self::InternalFailure => "InternalFailure",
            Self::Other(s) => s,
        }
    }
}

/// Who (or what) ended an established chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The human agent closed the chat from the desk
    Agent,
    /// The visitor side ended the chat
    Client,
    Other(String),
}

impl EndReason {
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "agent" => Self::Agent,
            "client" => Self::Client,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One event extracted from a desk poll response.
///
/// A single poll response may carry zero or more of these; ordering within a
/// response is preserved and significant.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    QueueUpdate { position: i64 },
    ChatRequestSuccess { queue_position: Option<i64> },
    ChatRequestFail { reason: FailReason },
    ChatEstablished,
    ChatMessage { text: String },
    AgentTyping,
    AgentNotTyping,
    ChatEnded { reason: EndReason },
}

/// Discriminant-only view of [`PollEvent`] for presence queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEventKind {
    QueueUpdate,
    ChatRequestSuccess,
    ChatRequestFail,
    ChatEstablished,
    ChatMessage,
    AgentTyping,
    AgentNotTyping,
    ChatEnded,
}

impl PollEvent {
    pub fn kind(&self) -> PollEventKind {
        match self {
            Self::QueueUpdate { .. } => PollEventKind::QueueUpdate,
            Self::ChatRequestSuccess { .. } => PollEventKind::ChatRequestSuccess,
            Self::ChatRequestFail { .. } => PollEventKind::ChatRequestFail,
            Self::ChatEstablished => PollEventKind::ChatEstablished,
            Self::ChatMessage { .. } => PollEventKind::ChatMessage,
            Self::AgentTyping => PollEventKind::AgentTyping,
            Self::AgentNotTyping => PollEventKind::AgentNotTyping,
            Self::ChatEnded { .. } => PollEventKind::ChatEnded,
        }
    }
}

/// Parse a raw poll response body into ordered events.
///
/// Parsing is defensive: a body without a `messages` array, or entries with
/// missing/malformed payloads, yield fewer events rather than an error. The
/// desk occasionally interleaves event types we don't handle (e.g. agent
/// transfer notices); those are skipped.
pub fn parse_poll_body(body: &Value) -> Vec<PollEvent> {
    let Some(entries) = body.get("messages").and_then(Value::as_array) else {
        return Vec::new();
    };

    entries.iter().filter_map(parse_entry).collect()
}

fn parse_entry(entry: &Value) -> Option<PollEvent> {
    let kind = entry.get("type")?.as_str()?;
    // Payload is optional on the wire; treat a missing one as an empty object
    let empty = Value::Object(serde_json::Map::new());
    let message = entry.get("message").unwrap_or(&empty);

    match kind {
        "QueueUpdate" => {
            let position = message.get("position").and_then(Value::as_i64)?;
            Some(PollEvent::QueueUpdate { position })
        }
        "ChatRequestSuccess" => Some(PollEvent::ChatRequestSuccess {
            queue_position: message.get("queuePosition").and_then(Value::as_i64),
        }),
        "ChatRequestFail" => {
            let reason = message
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            Some(PollEvent::ChatRequestFail {
                reason: FailReason::from_wire(reason),
            })
        }
        "ChatEstablished" => Some(PollEvent::ChatEstablished),
        "ChatMessage" => {
            let text = message.get("text").and_then(Value::as_str)?;
            Some(PollEvent::ChatMessage {
                text: text.to_string(),
            })
        }
        "AgentTyping" => Some(PollEvent::AgentTyping),
        "AgentNotTyping" => Some(PollEvent::AgentNotTyping),
        "ChatEnded" => {
            let reason = message
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            Some(PollEvent::ChatEnded {
                reason: EndReason::from_wire(reason),
            })
        }
        _ => None,
    }
}

/// Does an event of the given kind occur? Short-circuits on first match.
pub fn has_event(events: &[PollEvent], kind: PollEventKind) -> bool {
    events.iter().any(|e| e.kind() == kind)
}

/// First event of the given kind, if any.
pub fn first_of(events: &[PollEvent], kind: PollEventKind) -> Option<&PollEvent> {
    events.iter().find(|e| e.kind() == kind)
}

/// First `ChatRequestFail` reason, if any.
pub fn first_fail_reason(events: &[PollEvent]) -> Option<&FailReason> {
    events.iter().find_map(|e| match e {
        PollEvent::ChatRequestFail { reason } => Some(reason),
        _ => None,
    })
}

/// First `ChatEnded` reason, if any.
pub fn first_end_reason(events: &[PollEvent]) -> Option<&EndReason> {
    events.iter().find_map(|e| match e {
        PollEvent::ChatEnded { reason } => Some(reason),
        _ => None,
    })
}
