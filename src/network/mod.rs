//! Network Layer
//!
//! WebSocket transport, wire protocol, the room store and the event
//! dispatcher. This layer is **non-deterministic** — all game rules live
//! in `game/` and run synchronously under each room's lock.

pub mod protocol;
pub mod server;
pub mod store;

pub use protocol::{ClientMessage, ServerMessage};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use store::{JoinError, ReconnectError, RoomStore, StoreConfig};
