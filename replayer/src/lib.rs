//! Replay engine for recorded user-interface macros.
//!
//! This crate replays a timestamped sequence of captured input events back
//! onto a live screen. Each event becomes one goal-directed agent run: a
//! planner binds abstract intents (locate, apply, verify) to ranked skills,
//! a runtime cycles observe → act → verify with fallback and retry, and a
//! visual anchor-consensus locator re-resolves click targets after UI drift,
//! refusing rather than guessing when the evidence is weak. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (planning, skill ranking,
//!   consensus scoring). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting seams (session files, platform capabilities
//!   such as template matching and input injection). Injected as traits to
//!   enable mocking in tests.
//!
//! Orchestration modules ([`runtime`], [`locator`], [`dispatch`], [`replay`])
//! coordinate core logic with the platform seams to drive a full session
//! replay.

pub mod cancel;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod io;
pub mod locator;
pub mod logging;
pub mod replay;
pub mod runtime;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
