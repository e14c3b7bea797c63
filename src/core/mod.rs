//! Transport-independent primitives.
//!
//! Constants, randomness and input sanitisation shared by the game logic
//! and the network edge. Nothing in this module performs I/O.

pub mod constants;
pub mod names;
pub mod rng;

// Re-export core types
pub use names::sanitize_name;
pub use rng::GameRng;
