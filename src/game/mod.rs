//! Game Logic Module
//!
//! Everything that owns the rules. Synchronous and I/O-free: operations
//! mutate a [`state::Room`] under its lock and describe their side effects
//! (pushes, timers, settlements) in an [`engine::EngineOutput`] for the
//! network edge to apply.
//!
//! ## Module Structure
//!
//! - `state`: room, player and box state
//! - `banker`: offer computation
//! - `scoring`: points and leaderboard ranking
//! - `engine`: phase machine, turns, offers, settlement
//! - `projector`: per-recipient snapshot redaction

pub mod banker;
pub mod engine;
pub mod projector;
pub mod scoring;
pub mod state;

// Re-export key types
pub use engine::{EngineOutput, Push, TimerCommand};
pub use state::{ConnectionId, GamePhase, Player, PlayerId, PlayerRole, Room};
