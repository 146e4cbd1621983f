// ABOUTME: Scripted mock collaborators for testing - desk backend, room relay, host platform.
// ABOUTME: Allows deterministic state-machine tests without a live desk or host platform.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::desk::{DeskBackend, EndCause, PollOutcome, SessionTokens, Visitor};
use crate::traits::{CountdownSignal, HostAuth, HostPlatform, RoomRelay};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Every call a test can assert against the desk.
#[derive(Debug, Clone, PartialEq)]
pub enum DeskCall {
    CreateSession,
    RequestChat { visitor_name: String },
    Poll,
    SendMessage { text: String },
    EndSession { cause: EndCause },
    SetTyping { typing: bool },
    SneakPeek { text: String },
}

enum ScriptedPoll {
    Outcome(PollOutcome),
    /// Outcome delivered after a delay, like a long poll held open briefly
    Delayed(PollOutcome, u64),
    /// Simulates a long poll the desk holds open indefinitely
    Hang,
}

/// Mock desk backend driven by a scripted queue of poll outcomes.
///
/// Each `poll_events` call consumes the next scripted outcome; an exhausted
/// script returns `SessionExpired` so a runaway loop terminates
/// deterministically instead of spinning.
pub struct MockDesk {
    poll_script: Mutex<VecDeque<ScriptedPoll>>,
    calls: Mutex<Vec<DeskCall>>,
    fail_create: AtomicBool,
    fail_request: AtomicBool,
    fail_send: AtomicBool,
}

impl Default for MockDesk {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDesk {
    pub fn new() -> Self {
        Self {
            poll_script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
            fail_request: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
        }
    }

    /// Append one poll outcome to the script.
    pub fn with_poll(self, outcome: PollOutcome) -> Self {
        lock(&self.poll_script).push_back(ScriptedPoll::Outcome(outcome));
        self
    }

    /// Append a poll whose outcome arrives only after `delay_ms`.
    /// Useful for racing external actors against a poll in flight.
    pub fn with_poll_delayed(self, outcome: PollOutcome, delay_ms: u64) -> Self {
        lock(&self.poll_script).push_back(ScriptedPoll::Delayed(outcome, delay_ms));
        self
    }

    /// Append a poll the desk never answers (a held-open long poll).
    /// Useful for exercising timers while the loop is suspended.
    pub fn with_poll_hang(self) -> Self {
        lock(&self.poll_script).push_back(ScriptedPoll::Hang);
        self
    }

    /// Make `create_session` fail with a transport error.
    pub fn fail_create_session(self) -> Self {
        self.fail_create.store(true, Ordering::SeqCst);
        self
    }

    /// Make `request_chat` fail with a transport error.
    pub fn fail_request_chat(self) -> Self {
        self.fail_request.store(true, Ordering::SeqCst);
        self
    }

    /// Make `send_visitor_message` fail.
    pub fn fail_send_message(self) -> Self {
        self.fail_send.store(true, Ordering::SeqCst);
        self
    }

    /// The tokens this mock hands out.
    pub fn tokens() -> SessionTokens {
        SessionTokens {
            session_id: "mock-session".to_string(),
            affinity_token: "mock-affinity".to_string(),
            session_key: "mock-key".to_string(),
        }
    }

    pub fn calls(&self) -> Vec<DeskCall> {
        lock(&self.calls).clone()
    }

    pub fn poll_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| matches!(c, DeskCall::Poll))
            .count()
    }

    pub fn end_causes(&self) -> Vec<EndCause> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                DeskCall::EndSession { cause } => Some(*cause),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: DeskCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl DeskBackend for MockDesk {
    async fn create_session(&self) -> Result<SessionTokens> {
        self.record(DeskCall::CreateSession);
        if self.fail_create.load(Ordering::SeqCst) {
            anyhow::bail!("mock: desk unreachable");
        }
        Ok(Self::tokens())
    }

    async fn request_chat(&self, _tokens: &SessionTokens, visitor: &Visitor) -> Result<()> {
        self.record(DeskCall::RequestChat {
            visitor_name: visitor.name.clone(),
        });
        if self.fail_request.load(Ordering::SeqCst) {
            anyhow::bail!("mock: chat request refused");
        }
        Ok(())
    }

    async fn poll_events(&self, _tokens: &SessionTokens) -> PollOutcome {
        self.record(DeskCall::Poll);
        let scripted = lock(&self.poll_script).pop_front();
        match scripted {
            Some(ScriptedPoll::Outcome(outcome)) => outcome,
            Some(ScriptedPoll::Delayed(outcome, delay_ms)) => {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                outcome
            }
            Some(ScriptedPoll::Hang) => std::future::pending().await,
            None => PollOutcome::SessionExpired,
        }
    }

    async fn send_visitor_message(&self, _tokens: &SessionTokens, text: &str) -> Result<()> {
        self.record(DeskCall::SendMessage {
            text: text.to_string(),
        });
        if self.fail_send.load(Ordering::SeqCst) {
            anyhow::bail!("mock: message rejected");
        }
        Ok(())
    }

    async fn end_session(&self, _tokens: &SessionTokens, cause: EndCause) -> Result<()> {
        self.record(DeskCall::EndSession { cause });
        Ok(())
    }

    async fn set_typing(&self, _tokens: &SessionTokens, is_typing: bool) -> Result<()> {
        self.record(DeskCall::SetTyping { typing: is_typing });
        Ok(())
    }

    async fn set_sneak_peek(&self, _tokens: &SessionTokens, text: &str) -> Result<()> {
        self.record(DeskCall::SneakPeek {
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Recording relay: captures everything sent toward the visitor room.
#[derive(Default)]
pub struct MockRelay {
    texts: Mutex<Vec<(String, String)>>,
    notices: Mutex<Vec<(String, String)>>,
    typing: Mutex<Vec<(String, bool)>>,
    countdowns: Mutex<Vec<(String, CountdownSignal)>>,
}

impl MockRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visitor-visible texts sent to a room, in order.
    pub fn texts_for(&self, room_id: &str) -> Vec<String> {
        lock(&self.texts)
            .iter()
            .filter(|(room, _)| room == room_id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn notices_for(&self, room_id: &str) -> Vec<String> {
        lock(&self.notices)
            .iter()
            .filter(|(room, _)| room == room_id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn typing_for(&self, room_id: &str) -> Vec<bool> {
        lock(&self.typing)
            .iter()
            .filter(|(room, _)| room == room_id)
            .map(|(_, typing)| *typing)
            .collect()
    }

    pub fn countdowns_for(&self, room_id: &str) -> Vec<CountdownSignal> {
        lock(&self.countdowns)
            .iter()
            .filter(|(room, _)| room == room_id)
            .map(|(_, signal)| *signal)
            .collect()
    }
}

#[async_trait]
impl RoomRelay for MockRelay {
    async fn send_text(&self, room_id: &str, text: &str) -> Result<()> {
        lock(&self.texts).push((room_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_notice(&self, room_id: &str, text: &str) -> Result<()> {
        lock(&self.notices).push((room_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn set_typing(&self, room_id: &str, typing: bool) -> Result<()> {
        lock(&self.typing).push((room_id.to_string(), typing));
        Ok(())
    }

    async fn signal_countdown(&self, room_id: &str, signal: CountdownSignal) -> Result<()> {
        lock(&self.countdowns).push((room_id.to_string(), signal));
        Ok(())
    }
}

/// Recording host platform with optional login failure.
#[derive(Default)]
pub struct MockHost {
    login_count: AtomicUsize,
    fail_login: AtomicBool,
    job_counter: AtomicUsize,
    presence: Mutex<Vec<String>>,
    transfers: Mutex<Vec<(String, String)>>,
    fields: Mutex<Vec<(String, String, String)>>,
    closed: Mutex<Vec<(String, String)>>,
    scheduled: Mutex<Vec<(String, String, u64)>>,
    cancelled: Mutex<Vec<String>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_login(self) -> Self {
        self.fail_login.store(true, Ordering::SeqCst);
        self
    }

    pub fn login_count(&self) -> usize {
        self.login_count.load(Ordering::SeqCst)
    }

    pub fn presence_updates(&self) -> Vec<String> {
        lock(&self.presence).clone()
    }

    pub fn transfers(&self) -> Vec<(String, String)> {
        lock(&self.transfers).clone()
    }

    pub fn fields(&self) -> Vec<(String, String, String)> {
        lock(&self.fields).clone()
    }

    pub fn closed_rooms(&self) -> Vec<(String, String)> {
        lock(&self.closed).clone()
    }

    /// Scheduled one-shot jobs as (job_id, room_id, delay_secs).
    pub fn scheduled_jobs(&self) -> Vec<(String, String, u64)> {
        lock(&self.scheduled).clone()
    }

    pub fn cancelled_jobs(&self) -> Vec<String> {
        lock(&self.cancelled).clone()
    }
}

#[async_trait]
impl HostPlatform for MockHost {
    async fn login(&self) -> Result<HostAuth> {
        self.login_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_login.load(Ordering::SeqCst) {
            anyhow::bail!("mock: login rejected");
        }
        Ok(HostAuth {
            token: "mock-token".to_string(),
            user_id: "mock-bot".to_string(),
        })
    }

    async fn set_presence(&self, _auth: &HostAuth, status: &str) -> Result<()> {
        lock(&self.presence).push(status.to_string());
        Ok(())
    }

    async fn transfer_room(&self, room_id: &str, department: &str) -> Result<()> {
        lock(&self.transfers).push((room_id.to_string(), department.to_string()));
        Ok(())
    }

    async fn set_room_field(&self, room_id: &str, key: &str, value: &str) -> Result<()> {
        lock(&self.fields).push((room_id.to_string(), key.to_string(), value.to_string()));
        Ok(())
    }

    async fn close_room(&self, room_id: &str, comment: &str) -> Result<()> {
        lock(&self.closed).push((room_id.to_string(), comment.to_string()));
        Ok(())
    }

    async fn schedule_job(&self, room_id: &str, delay_secs: u64) -> Result<String> {
        let job_id = format!("mock-job-{}", self.job_counter.fetch_add(1, Ordering::SeqCst));
        lock(&self.scheduled).push((job_id.clone(), room_id.to_string(), delay_secs));
        Ok(job_id)
    }

    async fn cancel_job(&self, job_id: &str) -> Result<()> {
        lock(&self.cancelled).push(job_id.to_string());
        Ok(())
    }
}

/// Convenience: wrap pre-parsed events as a poll outcome.
pub fn events(events: Vec<crate::events::PollEvent>) -> PollOutcome {
    PollOutcome::Events(events)
}

/// Convenience: a poll outcome parsed from a raw JSON body, the way the
/// real desk client produces it.
pub fn events_from_json(body: serde_json::Value) -> PollOutcome {
    PollOutcome::Events(crate::events::parse_poll_body(&body))
}
