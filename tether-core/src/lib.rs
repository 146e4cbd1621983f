// ABOUTME: Platform-agnostic live-chat session orchestration
// ABOUTME: Provides the desk client, poll-event classifier, state machine, and idle timeout logic

pub mod config;
pub mod desk;
pub mod events;
pub mod handoff;
pub mod idle;
pub mod messages;
pub mod metrics;
pub mod session;
pub mod testing;
pub mod tokens;
pub mod traits;

// Re-export the types most callers need
pub use desk::{DeskBackend, EndCause, HttpDesk, PollOutcome, SessionTokens, Visitor};
pub use events::{EndReason, FailReason, PollEvent, PollEventKind};
pub use handoff::{DirectHandoff, HandoffStrategy, QueueHandoff};
pub use session::{SessionOrchestrator, SessionPhase};
pub use tokens::{IdleTimeoutConfig, RoomSessionRecord, TimerHandle, TimerMode, TokenStore};
pub use traits::{CountdownSignal, HostAuth, HostPlatform, RoomRelay};
