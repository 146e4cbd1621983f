// ABOUTME: Root library module exposing all public modules
// ABOUTME: Provides access to the host platform client, HTTP server, and re-exported core modules

// Host-facing modules (stay local)
pub mod host_client;
pub mod server;

// Re-export platform-agnostic modules from tether-core
pub use tether_core::config;
pub use tether_core::desk;
pub use tether_core::events;
pub use tether_core::handoff;
pub use tether_core::idle;
pub use tether_core::messages;
pub use tether_core::metrics;
pub use tether_core::session;
pub use tether_core::testing;
pub use tether_core::tokens;
pub use tether_core::traits;

// Re-export the types most callers need
pub use tether_core::{
    DeskBackend, HttpDesk, PollOutcome, SessionOrchestrator, SessionPhase, SessionTokens,
    TokenStore, Visitor,
};
