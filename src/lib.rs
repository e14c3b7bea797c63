//! # Dealbox Game Server
//!
//! Authoritative multiplayer server for a Deal-or-No-Deal-style party game.
//! Clients are untrusted renderers; every rule, timer and transition is
//! owned by this process.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DEALBOX SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Transport-independent primitives          │
//! │  ├── constants.rs- Value ladder, round plan, limits          │
//! │  ├── rng.rs      - Seedable Xorshift128+ PRNG                │
//! │  └── names.rs    - Display-name sanitisation                 │
//! │                                                              │
//! │  game/           - Game logic (synchronous, no I/O)          │
//! │  ├── state.rs    - Room, player and box state                │
//! │  ├── banker.rs   - Offer computation                         │
//! │  ├── scoring.rs  - Points and leaderboard ranking            │
//! │  ├── engine.rs   - Phase machine, turns, offers, settlement  │
//! │  └── projector.rs- Per-recipient snapshot redaction          │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── protocol.rs - Wire message types                        │
//! │  ├── store.rs    - Room catalog, indexes, leaderboard, sweep │
//! │  └── server.rs   - WebSocket server and event dispatch       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency model
//!
//! Each room is a serialisable unit behind its own `RwLock`; the store's
//! locks guard the catalog and indexes. Lock order is always store first,
//! then room, and no operation holds two room locks at once. Engine
//! operations never perform I/O under a lock: they return an
//! [`game::engine::EngineOutput`] of snapshots and timer commands which the
//! dispatcher applies after the lock is released.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::rng::GameRng;
pub use game::state::{GamePhase, Player, PlayerId, PlayerRole, Room};
pub use network::server::{GameServer, ServerConfig};
pub use network::store::RoomStore;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
