// ABOUTME: Per-room session state machine driving the desk long-poll loop
// ABOUTME: NoSession -> Requesting -> Queued -> Polling -> Terminated, with the token store as the cancellation mechanism

use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::Config;
use crate::desk::{DeskBackend, EndCause, PollOutcome, SessionTokens, Visitor};
use crate::events::{EndReason, FailReason, PollEvent};
use crate::handoff::HandoffStrategy;
use crate::idle::IdleTimeoutManager;
use crate::metrics;
use crate::tokens::{RoomSessionRecord, TimerHandle, TimerMode, TokenStore};
use crate::traits::{CountdownSignal, HostPlatform, RoomRelay};

/// Lifecycle phases of a room's desk session. `NoSession` is both the
/// initial and (after cleanup) the terminal resting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    NoSession,
    Requesting,
    Queued,
    Polling,
    Closed,
    Failed,
}

/// Registry enforcing at most one active poll loop per room.
///
/// The guard doubles as the pre-establishment cancellation channel: before
/// the session record exists there is nothing in the store to delete, so a
/// visitor closing the chat during the queue phase flips the guard's flag
/// instead.
#[derive(Clone, Default)]
pub struct ActivePolls {
    inner: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
}

impl ActivePolls {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AtomicBool>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the poll loop for a room. Returns `None` while another loop for
    /// the same room is outstanding.
    pub fn try_begin(&self, room_id: &str) -> Option<PollGuard> {
        let mut map = self.lock();
        if map.contains_key(room_id) {
            return None;
        }
        let cancel = Arc::new(AtomicBool::new(false));
        map.insert(room_id.to_string(), Arc::clone(&cancel));
        Some(PollGuard {
            room_id: room_id.to_string(),
            cancel,
            registry: self.clone(),
        })
    }

    /// Ask the room's active loop (if any) to stop at its next checkpoint.
    pub fn request_cancel(&self, room_id: &str) -> bool {
        match self.lock().get(room_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, room_id: &str) -> bool {
        self.lock().contains_key(room_id)
    }
}

/// RAII claim on a room's poll loop; released on drop.
pub struct PollGuard {
    room_id: String,
    cancel: Arc<AtomicBool>,
    registry: ActivePolls,
}

impl PollGuard {
    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.room_id);
    }
}

enum QueueOutcome {
    /// Agent accepted; carries any events that followed ChatEstablished in
    /// the same response, so in-order processing is preserved
    Established { trailing: Vec<PollEvent> },
    Failed,
    Cancelled,
}

/// Orchestrates one desk session per visitor room.
///
/// Generic over the desk backend so tests script it; the host-platform
/// collaborators are trait objects selected at wiring time. Cloning is
/// cheap (shared handles), so background tasks clone the whole thing.
pub struct SessionOrchestrator<D: DeskBackend> {
    desk: Arc<D>,
    relay: Arc<dyn RoomRelay>,
    host: Arc<dyn HostPlatform>,
    handoff: Arc<dyn HandoffStrategy>,
    store: TokenStore,
    idle: IdleTimeoutManager,
    config: Arc<Config>,
    active: ActivePolls,
}

impl<D: DeskBackend> Clone for SessionOrchestrator<D> {
    fn clone(&self) -> Self {
        Self {
            desk: Arc::clone(&self.desk),
            relay: Arc::clone(&self.relay),
            host: Arc::clone(&self.host),
            handoff: Arc::clone(&self.handoff),
            store: self.store.clone(),
            idle: self.idle.clone(),
            config: Arc::clone(&self.config),
            active: self.active.clone(),
        }
    }
}

impl<D: DeskBackend + 'static> SessionOrchestrator<D> {
    pub fn new(
        desk: Arc<D>,
        relay: Arc<dyn RoomRelay>,
        host: Arc<dyn HostPlatform>,
        handoff: Arc<dyn HandoffStrategy>,
        store: TokenStore,
        config: Arc<Config>,
    ) -> Self {
        Self {
            desk,
            relay,
            host,
            handoff,
            store,
            idle: IdleTimeoutManager::new(),
            config,
            active: ActivePolls::default(),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Whether the room has a live session or a poll loop still establishing
    /// one. The start endpoint uses this to refuse duplicates early.
    pub fn session_active(&self, room_id: &str) -> Result<bool> {
        Ok(self.store.get(room_id)?.is_some() || self.active.is_active(room_id))
    }

    pub fn idle_timers(&self) -> &IdleTimeoutManager {
        &self.idle
    }

    /// Spawn the full session lifecycle in the background. The HTTP start
    /// endpoint calls this; tests call [`run_session`](Self::run_session)
    /// directly for determinism.
    pub fn spawn_session(&self, room_id: &str, visitor: Visitor) {
        let this = self.clone();
        let room = room_id.to_string();
        tokio::spawn(async move {
            match this.run_session(&room, visitor).await {
                Ok(phase) => {
                    tracing::info!(room_id = %room, phase = ?phase, "Session finished");
                }
                Err(e) => {
                    tracing::error!(room_id = %room, error = %e, "Session task failed");
                }
            }
        });
    }

    /// Run one complete session lifecycle for a room and return its terminal
    /// phase. At most one of these may run per room at a time.
    pub async fn run_session(
        &self,
        room_id: &str,
        visitor: Visitor,
    ) -> Result<SessionPhase> {
        // Required configuration must be present before any network call
        if let Err(e) = self.config.desk_ready() {
            self.relay_apology(room_id).await;
            self.debug_notice(room_id, &format!("Refusing session start: {}", e))
                .await;
            metrics::record_session_failed("config_missing");
            return Ok(SessionPhase::Failed);
        }

        if self.store.get(room_id)?.is_some() {
            anyhow::bail!("Room {} already has a live session", room_id);
        }
        let Some(guard) = self.active.try_begin(room_id) else {
            anyhow::bail!("Room {} already has an active poll loop", room_id);
        };

        metrics::record_session_started();
        tracing::info!(room_id = %room_id, visitor = %visitor.name, phase = ?SessionPhase::Requesting, "Starting desk session");

        let tokens = match self.desk.create_session().await {
            Ok(tokens) => tokens,
            Err(e) => {
                self.fail_visibly(room_id, "create_session", &e).await;
                return Ok(SessionPhase::Failed);
            }
        };

        if let Err(e) = self.desk.request_chat(&tokens, &visitor).await {
            self.fail_visibly(room_id, "request_chat", &e).await;
            return Ok(SessionPhase::Failed);
        }

        tracing::debug!(room_id = %room_id, phase = ?SessionPhase::Queued, "Chat requested, entering queue");

        let trailing = match self.queue_phase(room_id, &tokens, &guard).await {
            QueueOutcome::Established { trailing } => trailing,
            QueueOutcome::Failed => return Ok(SessionPhase::Failed),
            QueueOutcome::Cancelled => return Ok(SessionPhase::Closed),
        };

        // Persist exactly once, on establishment; from here on, record
        // presence in the store is what keeps the poll loop alive.
        let record = RoomSessionRecord {
            room_id: room_id.to_string(),
            tokens,
            idle: self.config.idle.clone(),
            timer: TimerHandle::default(),
            sneak_peek_enabled: self.config.desk.sneak_peek_enabled,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        self.store.insert(&record)?;
        metrics::record_session_established();
        self.refresh_active_gauge();
        tracing::info!(room_id = %room_id, phase = ?SessionPhase::Polling, "Agent accepted chat");

        if let Err(e) = self.handoff.on_established(room_id).await {
            // Non-fatal to the desk session: apologize, diagnose, proceed
            metrics::record_handoff_error("established");
            tracing::error!(room_id = %room_id, error = %e, "Hand-off failed");
            if let Err(send_err) = self
                .relay
                .send_text(room_id, &self.config.messages.handoff_failed)
                .await
            {
                tracing::warn!(room_id = %room_id, error = %send_err, "Failed to send hand-off apology");
            }
            self.debug_notice(room_id, &format!("Hand-off failed: {:#}", e))
                .await;
        }

        self.established_phase(room_id, trailing).await
    }

    /// Poll until the queue resolves: agent accepts, the desk rejects, or
    /// the visitor gives up. Long-poll semantics: re-poll immediately, no
    /// client-side delay.
    async fn queue_phase(
        &self,
        room_id: &str,
        tokens: &SessionTokens,
        guard: &PollGuard,
    ) -> QueueOutcome {
        let mut last_announced: Option<i64> = None;

        loop {
            if guard.cancelled() {
                tracing::info!(room_id = %room_id, "Visitor closed chat while queued");
                if let Err(e) = self.desk.end_session(tokens, EndCause::Client).await {
                    tracing::warn!(room_id = %room_id, error = %e, "Failed to end queued session");
                }
                return QueueOutcome::Cancelled;
            }

            match self.desk.poll_events(tokens).await {
                PollOutcome::EmptyRetry => {
                    metrics::record_poll("empty_retry");
                }
                PollOutcome::SessionExpired => {
                    metrics::record_poll("session_expired");
                    tracing::warn!(room_id = %room_id, "Session expired while queued");
                    if let Err(e) = self
                        .relay
                        .send_text(room_id, &self.config.messages.session_expired)
                        .await
                    {
                        tracing::warn!(room_id = %room_id, error = %e, "Failed to send expiry message");
                    }
                    metrics::record_session_failed("expired_in_queue");
                    return QueueOutcome::Failed;
                }
                PollOutcome::TransportError(e) => {
                    // Transient while the session attempt is alive; the desk
                    // paces us via long-poll, so retry immediately
                    metrics::record_poll("transport_error");
                    tracing::warn!(room_id = %room_id, error = %e, "Queue poll transport error, retrying");
                }
                PollOutcome::Events(events) => {
                    metrics::record_poll("events");
                    for (i, event) in events.iter().enumerate() {
                        match event {
                            PollEvent::ChatEstablished => {
                                return QueueOutcome::Established {
                                    trailing: events[i + 1..].to_vec(),
                                };
                            }
                            PollEvent::ChatRequestFail { reason } => {
                                self.relay_queue_failure(room_id, reason).await;
                                return QueueOutcome::Failed;
                            }
                            PollEvent::ChatRequestSuccess { queue_position } => {
                                if let Some(position) = queue_position {
                                    self.announce_queue_position(
                                        room_id,
                                        *position,
                                        &mut last_announced,
                                    )
                                    .await;
                                }
                            }
                            PollEvent::QueueUpdate { position } => {
                                self.announce_queue_position(room_id, *position, &mut last_announced)
                                    .await;
                            }
                            // Established-phase events cannot precede establishment
                            _ => {}
                        }
                    }
                }
            }
        }
    }

    /// The established poll loop. Every iteration re-reads the persisted
    /// record: its absence means an external actor ended the session, and the
    /// loop must stop rather than spin against discarded tokens.
    async fn established_phase(
        &self,
        room_id: &str,
        trailing: Vec<PollEvent>,
    ) -> Result<SessionPhase> {
        if let Some(phase) = self.process_established_events(room_id, &trailing).await? {
            return Ok(phase);
        }

        loop {
            let Some(record) = self.store.get(room_id)? else {
                tracing::info!(room_id = %room_id, "Session record gone, stopping poll loop");
                self.idle.cancel(room_id);
                return Ok(SessionPhase::Closed);
            };

            match self.desk.poll_events(&record.tokens).await {
                PollOutcome::EmptyRetry => {
                    metrics::record_poll("empty_retry");
                }
                PollOutcome::SessionExpired => {
                    metrics::record_poll("session_expired");
                    tracing::info!(room_id = %room_id, "Desk session expired");
                    self.finish_session(room_id, &self.config.messages.session_expired)
                        .await?;
                    return Ok(SessionPhase::Closed);
                }
                PollOutcome::TransportError(e) => {
                    // Retried as long as the record persists; the re-read at
                    // the top of the loop is the exit if it was deleted
                    metrics::record_poll("transport_error");
                    tracing::warn!(room_id = %room_id, error = %e, "Poll transport error, retrying");
                }
                PollOutcome::Events(events) => {
                    metrics::record_poll("events");
                    if let Some(phase) = self.process_established_events(room_id, &events).await? {
                        return Ok(phase);
                    }
                }
            }
        }
    }

    /// Apply one batch of established-phase events in wire order. Returns a
    /// terminal phase if one of them ended the session.
    async fn process_established_events(
        &self,
        room_id: &str,
        events: &[PollEvent],
    ) -> Result<Option<SessionPhase>> {
        for event in events {
            match event {
                PollEvent::ChatMessage { text } => {
                    if let Err(e) = self.relay.send_text(room_id, text).await {
                        tracing::warn!(room_id = %room_id, error = %e, "Failed to relay agent message");
                    } else {
                        metrics::record_message_relayed("inbound");
                    }
                    self.on_agent_activity(room_id).await;
                }
                PollEvent::AgentTyping => {
                    if self.config.debug {
                        if let Err(e) = self.relay.set_typing(room_id, true).await {
                            tracing::warn!(room_id = %room_id, error = %e, "Failed to relay typing indicator");
                        }
                    }
                }
                PollEvent::AgentNotTyping => {
                    if self.config.debug {
                        if let Err(e) = self.relay.set_typing(room_id, false).await {
                            tracing::warn!(room_id = %room_id, error = %e, "Failed to clear typing indicator");
                        }
                    }
                }
                PollEvent::ChatEnded { reason } => {
                    tracing::info!(room_id = %room_id, reason = ?reason, "Desk ended the chat");
                    if *reason == EndReason::Agent {
                        if let Err(e) = self
                            .host
                            .set_room_field(room_id, "agentEndedChat", "true")
                            .await
                        {
                            tracing::warn!(room_id = %room_id, error = %e, "Failed to set agentEndedChat field");
                        }
                    }
                    self.finish_session(room_id, &self.config.messages.agent_ended)
                        .await?;
                    return Ok(Some(SessionPhase::Closed));
                }
                // Queue events after establishment carry nothing actionable
                _ => {}
            }
        }
        Ok(None)
    }

    /// Visitor sent a message while a session is live: forward it and reset
    /// the inactivity countdown. Returns false when no session exists.
    pub async fn visitor_message(&self, room_id: &str, text: &str) -> Result<bool> {
        let Some(record) = self.store.get(room_id)? else {
            return Ok(false);
        };

        if let Err(e) = self.desk.send_visitor_message(&record.tokens, text).await {
            tracing::warn!(room_id = %room_id, error = %e, "Failed to forward visitor message");
            self.debug_notice(room_id, &format!("Message delivery to agent failed: {:#}", e))
                .await;
        } else {
            metrics::record_message_relayed("outbound");
        }

        self.on_visitor_activity(room_id, &record).await;
        Ok(true)
    }

    /// Visitor typing state changed. Sends a sneak peek when the room has it
    /// enabled, a plain typing flag otherwise; the two are mutually exclusive.
    pub async fn visitor_typing(
        &self,
        room_id: &str,
        is_typing: bool,
        text: Option<&str>,
    ) -> Result<bool> {
        let Some(record) = self.store.get(room_id)? else {
            return Ok(false);
        };

        if record.sneak_peek_enabled {
            // An empty preview clears the peek when the visitor stops typing
            let preview = if is_typing { text.unwrap_or("") } else { "" };
            self.desk.set_sneak_peek(&record.tokens, preview).await?;
        } else {
            self.desk.set_typing(&record.tokens, is_typing).await?;
        }
        Ok(true)
    }

    /// Visitor explicitly closed the chat.
    ///
    /// With a persisted record: end the desk session once and tear down; the
    /// poll loop observes the deletion at its next re-read. Without one (still
    /// queued), flip the active loop's cancel flag instead.
    pub async fn visitor_closed(&self, room_id: &str) -> Result<()> {
        match self.store.get(room_id)? {
            Some(record) => {
                if let Err(e) = self.desk.end_session(&record.tokens, EndCause::Client).await {
                    tracing::warn!(room_id = %room_id, error = %e, "Failed to end session on visitor close");
                }
                self.cleanup(room_id).await?;
                tracing::info!(room_id = %room_id, "Session closed by visitor");
            }
            None => {
                if self.active.request_cancel(room_id) {
                    tracing::info!(room_id = %room_id, "Visitor close requested while queued");
                } else {
                    tracing::debug!(room_id = %room_id, "Visitor close with no active session");
                }
            }
        }
        Ok(())
    }

    /// The inactivity timeout elapsed for a room. Public because in
    /// host-scheduled mode the host's one-shot job calls back through the
    /// HTTP shell to land here.
    pub async fn fire_idle_timeout(&self, room_id: &str) -> Result<()> {
        // Tolerant check-then-act: the record may already be gone
        let Some(record) = self.store.get(room_id)? else {
            tracing::debug!(room_id = %room_id, "Idle timeout fired for a room with no session");
            return Ok(());
        };

        tracing::info!(room_id = %room_id, "Closing chat due to inactivity");
        metrics::record_idle_timeout_fired();

        if let Err(e) = self
            .desk
            .end_session(&record.tokens, EndCause::IdleTimeout)
            .await
        {
            tracing::warn!(room_id = %room_id, error = %e, "Failed to end session on idle timeout");
        }
        if let Err(e) = self
            .host
            .set_room_field(room_id, "idleTimeoutClosed", "true")
            .await
        {
            tracing::warn!(room_id = %room_id, error = %e, "Failed to set idleTimeoutClosed field");
        }

        self.cleanup(room_id).await?;

        let farewell = self.config.messages.idle_closed.clone();
        if let Err(e) = self.handoff.on_ended(room_id, &farewell).await {
            metrics::record_handoff_error("ended");
            self.debug_notice(room_id, &format!("Hand-back failed: {:#}", e))
                .await;
        }
        if let Err(e) = self.host.close_room(room_id, &farewell).await {
            tracing::warn!(room_id = %room_id, error = %e, "Failed to close room after idle timeout");
        }
        Ok(())
    }

    /// Terminal transition from the poll loop: clear state, then hand back.
    async fn finish_session(&self, room_id: &str, farewell: &str) -> Result<()> {
        self.cleanup(room_id).await?;

        if let Err(e) = self.handoff.on_ended(room_id, farewell).await {
            metrics::record_handoff_error("ended");
            tracing::error!(room_id = %room_id, error = %e, "Hand-back failed");
            self.debug_notice(room_id, &format!("Hand-back failed: {:#}", e))
                .await;
        }
        Ok(())
    }

    /// Delete the record and disarm any timer, in either ownership mode.
    async fn cleanup(&self, room_id: &str) -> Result<()> {
        if let Ok(Some(record)) = self.store.get(room_id) {
            if record.idle.handler_mode == TimerMode::HostScheduled && record.timer.scheduled {
                if let Some(job_id) = &record.timer.job_id {
                    if let Err(e) = self.host.cancel_job(job_id).await {
                        tracing::warn!(room_id = %room_id, job_id = %job_id, error = %e, "Failed to cancel host timeout job");
                    }
                }
            }
            if record.idle.enabled {
                if let Err(e) = self
                    .relay
                    .signal_countdown(room_id, CountdownSignal::Stop)
                    .await
                {
                    tracing::warn!(room_id = %room_id, error = %e, "Failed to stop countdown signal");
                }
            }
        }

        self.idle.cancel(room_id);
        self.store.delete(room_id)?;
        self.refresh_active_gauge();
        Ok(())
    }

    /// An agent message landed: re-arm the inactivity timer (cancel-then-
    /// rearm, never stacking) and start the widget countdown.
    async fn on_agent_activity(&self, room_id: &str) {
        let record = match self.store.get(room_id) {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(room_id = %room_id, error = %e, "Failed to read record for idle arm");
                return;
            }
        };
        if !record.idle.enabled {
            return;
        }

        let timer = match record.idle.handler_mode {
            TimerMode::AppScheduled => {
                let this = self.clone();
                let room = room_id.to_string();
                let job_id = self.idle.arm(
                    room_id,
                    Duration::from_secs(record.idle.timeout_secs),
                    async move {
                        if let Err(e) = this.fire_idle_timeout(&room).await {
                            tracing::error!(room_id = %room, error = %e, "Idle timeout handling failed");
                        }
                    },
                );
                TimerHandle {
                    scheduled: true,
                    job_id: Some(job_id),
                }
            }
            TimerMode::HostScheduled => {
                if record.timer.scheduled {
                    if let Some(job_id) = &record.timer.job_id {
                        if let Err(e) = self.host.cancel_job(job_id).await {
                            tracing::warn!(room_id = %room_id, job_id = %job_id, error = %e, "Failed to cancel previous timeout job");
                        }
                    }
                }
                match self
                    .host
                    .schedule_job(room_id, record.idle.timeout_secs)
                    .await
                {
                    Ok(job_id) => TimerHandle {
                        scheduled: true,
                        job_id: Some(job_id),
                    },
                    Err(e) => {
                        tracing::warn!(room_id = %room_id, error = %e, "Failed to schedule host timeout job");
                        return;
                    }
                }
            }
        };

        if let Err(e) = self.store.update_timer(room_id, &timer) {
            tracing::warn!(room_id = %room_id, error = %e, "Failed to persist timer state");
        }
        if let Err(e) = self
            .relay
            .signal_countdown(
                room_id,
                CountdownSignal::Start {
                    warning_secs: record.idle.warning_secs,
                    timeout_secs: record.idle.timeout_secs,
                },
            )
            .await
        {
            tracing::warn!(room_id = %room_id, error = %e, "Failed to start countdown signal");
        }
    }

    /// A visitor message landed: disarm the timer (nothing new is armed
    /// until the agent speaks again) and stop the widget countdown.
    async fn on_visitor_activity(&self, room_id: &str, record: &RoomSessionRecord) {
        if !record.idle.enabled {
            return;
        }

        match record.idle.handler_mode {
            TimerMode::AppScheduled => {
                self.idle.cancel(room_id);
            }
            TimerMode::HostScheduled => {
                if record.timer.scheduled {
                    if let Some(job_id) = &record.timer.job_id {
                        if let Err(e) = self.host.cancel_job(job_id).await {
                            tracing::warn!(room_id = %room_id, job_id = %job_id, error = %e, "Failed to cancel timeout job");
                        }
                    }
                }
            }
        }

        if let Err(e) = self.store.update_timer(room_id, &TimerHandle::default()) {
            tracing::warn!(room_id = %room_id, error = %e, "Failed to clear timer state");
        }
        if let Err(e) = self
            .relay
            .signal_countdown(room_id, CountdownSignal::Stop)
            .await
        {
            tracing::warn!(room_id = %room_id, error = %e, "Failed to stop countdown signal");
        }
    }

    async fn announce_queue_position(
        &self,
        room_id: &str,
        position: i64,
        last_announced: &mut Option<i64>,
    ) {
        // Re-announcing the same position is noise
        if *last_announced == Some(position) {
            return;
        }
        let Some(text) = self.config.messages.render_queue_position(position) else {
            // Zero/negative positions are not a defined input; treat as nothing-new
            return;
        };
        if let Err(e) = self.relay.send_text(room_id, &text).await {
            tracing::warn!(room_id = %room_id, error = %e, "Failed to announce queue position");
        } else {
            *last_announced = Some(position);
        }
    }

    /// `Unavailable` gets the specific no-agent message; every other fail
    /// reason gets the generic apology, with the raw reason kept to the
    /// debug channel.
    async fn relay_queue_failure(&self, room_id: &str, reason: &FailReason) {
        let text = match reason {
            FailReason::Unavailable => &self.config.messages.no_agent_available,
            _ => &self.config.messages.technical_difficulty,
        };
        if let Err(e) = self.relay.send_text(room_id, text).await {
            tracing::warn!(room_id = %room_id, error = %e, "Failed to send queue failure message");
        }
        self.debug_notice(room_id, &format!("Chat request failed: {}", reason.as_str()))
            .await;
        metrics::record_session_failed(reason.as_str());
        tracing::warn!(room_id = %room_id, reason = %reason.as_str(), "Chat request rejected by desk");
    }

    /// Exactly one visitor-visible apology per terminal setup failure; the
    /// specific error goes to the debug channel only.
    async fn fail_visibly(&self, room_id: &str, stage: &'static str, error: &anyhow::Error) {
        tracing::error!(room_id = %room_id, stage = %stage, error = %error, "Session setup failed");
        self.relay_apology(room_id).await;
        self.debug_notice(room_id, &format!("{} failed: {:#}", stage, error))
            .await;
        metrics::record_session_failed(stage);
    }

    async fn relay_apology(&self, room_id: &str) {
        if let Err(e) = self
            .relay
            .send_text(room_id, &self.config.messages.technical_difficulty)
            .await
        {
            tracing::warn!(room_id = %room_id, error = %e, "Failed to send apology message");
        }
    }

    async fn debug_notice(&self, room_id: &str, text: &str) {
        if !self.config.debug {
            return;
        }
        if let Err(e) = self.relay.send_notice(room_id, text).await {
            tracing::warn!(room_id = %room_id, error = %e, "Failed to send debug notice");
        }
    }

    fn refresh_active_gauge(&self) {
        match self.store.list_all() {
            Ok(records) => metrics::set_active_sessions(records.len() as u64),
            Err(e) => tracing::warn!(error = %e, "Failed to refresh active session gauge"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_polls_allow_one_loop_per_room() {
        let registry = ActivePolls::default();

        let guard = registry.try_begin("room-a").expect("first claim succeeds");
        assert!(registry.try_begin("room-a").is_none());
        assert!(registry.is_active("room-a"));

        // A different room is unaffected
        let other = registry.try_begin("room-b").expect("other room claims");
        drop(other);

        drop(guard);
        assert!(!registry.is_active("room-a"));
        assert!(registry.try_begin("room-a").is_some());
    }

    #[test]
    fn cancel_reaches_the_active_guard() {
        let registry = ActivePolls::default();
        let guard = registry.try_begin("room-a").unwrap();

        assert!(!guard.cancelled());
        assert!(registry.request_cancel("room-a"));
        assert!(guard.cancelled());

        // No active loop, nothing to cancel
        assert!(!registry.request_cancel("room-z"));
    }
}
