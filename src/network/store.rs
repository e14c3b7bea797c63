//! Room Store
//!
//! In-memory catalog of live rooms plus the indexes that resolve inbound
//! traffic: connection -> player, player -> room, connection -> sender.
//! Also owns the process-lifetime global leaderboard and the TTL sweeper.
//!
//! Lock order is always a store map first, then a room; no operation holds
//! two room locks at once. A process restart discards everything.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::info;

use crate::core::constants::{
    FINISHED_TTL, GLOBAL_LEADERBOARD_LEN, MAX_CONTESTANTS, MAX_PASSWORD_LEN, SELECTION_TTL,
    WAITING_TTL,
};
use crate::core::names::sanitize_name;
use crate::core::rng::GameRng;
use crate::game::state::{ConnectionId, GamePhase, Player, PlayerId, Room};
use crate::network::protocol::{GlobalEntry, ServerMessage};

/// Sweeper TTLs, overridable from the environment.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Lifetime of a room that never started.
    pub waiting_ttl: Duration,
    /// Lifetime of a room stuck in box selection.
    pub selection_ttl: Duration,
    /// Lifetime of a finished room.
    pub finished_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            waiting_ttl: WAITING_TTL,
            selection_ttl: SELECTION_TTL,
            finished_ttl: FINISHED_TTL,
        }
    }
}

/// Join failures. The `Display` strings are the exact ack error texts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// No live room has this code.
    #[error("Room not found")]
    RoomNotFound,

    /// The room has a password and it did not match.
    #[error("Incorrect password")]
    BadPassword,

    /// Contestants may only join before the game starts.
    #[error("Game already in progress")]
    GameInProgress,

    /// The room already seats the maximum contestants.
    #[error("Room is full")]
    RoomFull,
}

/// Password-change failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PasswordError {
    /// No live room has this code.
    #[error("Room not found")]
    RoomNotFound,

    /// Only the host may change the password.
    #[error("Only the host can set the password")]
    NotHost,

    /// Passwords can only change in the lobby.
    #[error("The game has already started")]
    GameStarted,

    /// Password exceeds the length limit.
    #[error("Password is too long")]
    TooLong,
}

/// Reconnect failures. The `Display` string is the exact ack error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    /// The id does not belong to any resident player.
    #[error("Player not found")]
    PlayerNotFound,
}

/// One player's process-lifetime record.
#[derive(Debug, Clone)]
struct GlobalRecord {
    name: String,
    total_points: i64,
    games_played: u32,
    /// First-seen order; breaks total-point ties stably.
    seq: u64,
}

#[derive(Default)]
struct GlobalBoard {
    entries: BTreeMap<PlayerId, GlobalRecord>,
    next_seq: u64,
}

/// Owns every live room, the resolution indexes and the global
/// leaderboard.
pub struct RoomStore {
    config: StoreConfig,
    /// Live rooms by code.
    rooms: RwLock<BTreeMap<String, Arc<RwLock<Room>>>>,
    /// Which room a player is seated in.
    player_rooms: RwLock<BTreeMap<PlayerId, String>>,
    /// Which player a connection authenticated as.
    connection_players: RwLock<BTreeMap<ConnectionId, PlayerId>>,
    /// Outbound channel per live connection.
    connections: RwLock<BTreeMap<ConnectionId, mpsc::Sender<ServerMessage>>>,
    /// Process-lifetime leaderboard.
    global: RwLock<GlobalBoard>,
    /// Store randomness: room codes and per-room seed derivation.
    rng: Mutex<GameRng>,
}

impl RoomStore {
    /// Create a store with the given TTLs and entropy-seeded randomness.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_rng(config, GameRng::from_entropy())
    }

    /// Create a store with explicit randomness (tests).
    pub fn with_rng(config: StoreConfig, rng: GameRng) -> Self {
        Self {
            config,
            rooms: RwLock::new(BTreeMap::new()),
            player_rooms: RwLock::new(BTreeMap::new()),
            connection_players: RwLock::new(BTreeMap::new()),
            connections: RwLock::new(BTreeMap::new()),
            global: RwLock::new(GlobalBoard::default()),
            rng: Mutex::new(rng),
        }
    }

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    /// Register a connection's outbound channel.
    pub async fn register_connection(
        &self,
        connection_id: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
    ) {
        self.connections.write().await.insert(connection_id, sender);
    }

    /// The outbound channel for a connection, if still live.
    pub async fn sender(&self, connection_id: &ConnectionId) -> Option<mpsc::Sender<ServerMessage>> {
        self.connections.read().await.get(connection_id).cloned()
    }

    /// The player a connection resolved to, if any.
    pub async fn connection_player(&self, connection_id: &ConnectionId) -> Option<PlayerId> {
        self.connection_players.read().await.get(connection_id).cloned()
    }

    // =========================================================================
    // ROOM LIFECYCLE
    // =========================================================================

    /// Create a room with a fresh unique code, seating the caller as a
    /// contestant host.
    pub async fn create(
        &self,
        connection_id: ConnectionId,
        name: &str,
    ) -> (Arc<RwLock<Room>>, String, PlayerId) {
        let (code, room_rng) = {
            let mut rng = self.rng.lock().await;
            let rooms = self.rooms.read().await;
            let code = loop {
                let candidate = rng.room_code();
                if !rooms.contains_key(&candidate) {
                    break candidate;
                }
            };
            (code, GameRng::new(rng.next_u64()))
        };

        let mut room = Room::new(code.clone(), room_rng);
        let host = Player::contestant(sanitize_name(name), connection_id.clone(), true);
        let player_id = room.seat(host);

        let arc = Arc::new(RwLock::new(room));
        self.rooms.write().await.insert(code.clone(), arc.clone());
        self.player_rooms
            .write()
            .await
            .insert(player_id.clone(), code.clone());
        self.connection_players
            .write()
            .await
            .insert(connection_id, player_id.clone());

        info!("Room {} created by {}", code, player_id);
        (arc, code, player_id)
    }

    /// Join an existing room as a contestant or spectator.
    pub async fn join(
        &self,
        code: &str,
        connection_id: ConnectionId,
        name: &str,
        password: Option<&str>,
        as_spectator: bool,
    ) -> Result<(Arc<RwLock<Room>>, PlayerId), JoinError> {
        let code = code.trim().to_uppercase();
        let arc = self
            .rooms
            .read()
            .await
            .get(&code)
            .cloned()
            .ok_or(JoinError::RoomNotFound)?;

        let player_id = {
            let mut room = arc.write().await;

            if let Some(expected) = &room.password {
                if password != Some(expected.as_str()) {
                    return Err(JoinError::BadPassword);
                }
            }

            if as_spectator {
                room.seat(Player::spectator(
                    sanitize_name(name),
                    connection_id.clone(),
                ))
            } else {
                if room.phase != GamePhase::Waiting {
                    return Err(JoinError::GameInProgress);
                }
                if room.contestant_count() >= MAX_CONTESTANTS {
                    return Err(JoinError::RoomFull);
                }
                room.seat(Player::contestant(
                    sanitize_name(name),
                    connection_id.clone(),
                    false,
                ))
            }
        };

        self.player_rooms
            .write()
            .await
            .insert(player_id.clone(), code.clone());
        self.connection_players
            .write()
            .await
            .insert(connection_id, player_id.clone());

        info!("Player {} joined room {}", player_id, code);
        Ok((arc, player_id))
    }

    /// A transport dropped: unbind the connection and mark the player
    /// AFK. The player stays resident until the room is deleted.
    /// Returns the player's room for the advisory broadcast.
    pub async fn handle_disconnect(
        &self,
        connection_id: &ConnectionId,
    ) -> Option<(Arc<RwLock<Room>>, PlayerId)> {
        self.connections.write().await.remove(connection_id);
        let player_id = self.connection_players.write().await.remove(connection_id)?;

        let code = self.player_rooms.read().await.get(&player_id).cloned()?;
        let arc = self.rooms.read().await.get(&code).cloned()?;
        {
            let mut room = arc.write().await;
            if let Some(p) = room.player_mut(&player_id) {
                p.is_connected = false;
                p.connection_id = None;
            }
        }
        info!("Player {} disconnected from room {}", player_id, code);
        Some((arc, player_id))
    }

    /// Rebind a resident player to a new connection.
    pub async fn reconnect(
        &self,
        player_id: &PlayerId,
        connection_id: ConnectionId,
    ) -> Result<(Arc<RwLock<Room>>, String), ReconnectError> {
        let code = self
            .player_rooms
            .read()
            .await
            .get(player_id)
            .cloned()
            .ok_or(ReconnectError::PlayerNotFound)?;
        let arc = self
            .rooms
            .read()
            .await
            .get(&code)
            .cloned()
            .ok_or(ReconnectError::PlayerNotFound)?;

        let stale = {
            let mut room = arc.write().await;
            let Some(p) = room.player_mut(player_id) else {
                return Err(ReconnectError::PlayerNotFound);
            };
            let stale = p.connection_id.take();
            p.connection_id = Some(connection_id.clone());
            p.is_connected = true;
            stale
        };

        let mut index = self.connection_players.write().await;
        if let Some(old) = stale {
            index.remove(&old);
        }
        index.insert(connection_id, player_id.clone());

        info!("Player {} reconnected to room {}", player_id, code);
        Ok((arc, code))
    }

    /// Set or clear a room's password. Host only, lobby only.
    pub async fn set_password(
        &self,
        code: &str,
        actor: &PlayerId,
        password: Option<String>,
    ) -> Result<(), PasswordError> {
        if password.as_ref().is_some_and(|p| p.len() > MAX_PASSWORD_LEN) {
            return Err(PasswordError::TooLong);
        }
        let arc = self
            .rooms
            .read()
            .await
            .get(code)
            .cloned()
            .ok_or(PasswordError::RoomNotFound)?;

        let mut room = arc.write().await;
        if &room.host_id != actor {
            return Err(PasswordError::NotHost);
        }
        if !matches!(room.phase, GamePhase::Waiting | GamePhase::Selection) {
            return Err(PasswordError::GameStarted);
        }
        room.password = password;
        Ok(())
    }

    /// Look up a room by code.
    pub async fn room(&self, code: &str) -> Option<Arc<RwLock<Room>>> {
        self.rooms.read().await.get(code).cloned()
    }

    /// The room a player is seated in.
    pub async fn player_room(&self, player_id: &PlayerId) -> Option<(Arc<RwLock<Room>>, String)> {
        let code = self.player_rooms.read().await.get(player_id).cloned()?;
        let arc = self.rooms.read().await.get(&code).cloned()?;
        Some((arc, code))
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    // =========================================================================
    // GLOBAL LEADERBOARD
    // =========================================================================

    /// Upsert a finished contestant: accumulate points, bump games.
    pub async fn update_global(&self, player_id: &PlayerId, name: &str, points: i64) {
        let mut guard = self.global.write().await;
        let board = &mut *guard;
        if !board.entries.contains_key(player_id) {
            board.entries.insert(
                player_id.clone(),
                GlobalRecord {
                    name: name.to_string(),
                    total_points: 0,
                    games_played: 0,
                    seq: board.next_seq,
                },
            );
            board.next_seq += 1;
        }
        if let Some(entry) = board.entries.get_mut(player_id) {
            entry.name = name.to_string();
            entry.total_points += points;
            entry.games_played += 1;
        }
    }

    /// Ranked process-lifetime leaderboard, truncated to the top 100.
    pub async fn top_global(&self) -> Vec<GlobalEntry> {
        let board = self.global.read().await;
        let mut records: Vec<(&PlayerId, &GlobalRecord)> = board.entries.iter().collect();
        records.sort_by(|a, b| {
            b.1.total_points
                .cmp(&a.1.total_points)
                .then(a.1.seq.cmp(&b.1.seq))
        });

        records
            .into_iter()
            .take(GLOBAL_LEADERBOARD_LEN)
            .enumerate()
            .map(|(i, (id, rec))| GlobalEntry {
                rank: (i + 1) as u32,
                public_id: format!("{}#{}", rec.name, id.last4()),
                player_name: rec.name.clone(),
                total_points: rec.total_points,
                games_played: rec.games_played,
            })
            .collect()
    }

    // =========================================================================
    // SWEEP
    // =========================================================================

    /// Delete rooms that idled past their TTL. Rooms in `playing` or
    /// `offer` are never touched: the engine owns their timers and an
    /// abandoned live game intentionally persists.
    ///
    /// Returns the deleted codes.
    pub async fn sweep(&self, now: Instant) -> Vec<String> {
        let mut stale = Vec::new();
        {
            let rooms = self.rooms.read().await;
            for (code, arc) in rooms.iter() {
                let room = arc.read().await;
                let expired = match room.phase {
                    GamePhase::Waiting => now.duration_since(room.created_at) > self.config.waiting_ttl,
                    GamePhase::Selection => {
                        now.duration_since(room.created_at) > self.config.selection_ttl
                    }
                    GamePhase::Finished => {
                        let since = room.finished_at.unwrap_or(room.created_at);
                        now.duration_since(since) > self.config.finished_ttl
                    }
                    GamePhase::Playing | GamePhase::Offer => false,
                };
                if expired {
                    let residents: Vec<PlayerId> =
                        room.players.iter().map(|p| p.id.clone()).collect();
                    stale.push((code.clone(), residents));
                }
            }
        }

        if stale.is_empty() {
            return Vec::new();
        }

        let mut deleted = Vec::new();
        let mut rooms = self.rooms.write().await;
        let mut player_rooms = self.player_rooms.write().await;
        let mut connection_players = self.connection_players.write().await;
        for (code, residents) in stale {
            // Revalidate under the write lock: the room may have started
            // between the scan and the delete.
            let Some(arc) = rooms.get(&code).cloned() else { continue };
            {
                let room = arc.read().await;
                if matches!(room.phase, GamePhase::Playing | GamePhase::Offer) {
                    continue;
                }
            }
            rooms.remove(&code);
            for pid in &residents {
                player_rooms.remove(pid);
            }
            connection_players.retain(|_, pid| !residents.contains(pid));
            info!("Swept stale room {}", code);
            deleted.push(code);
        }
        deleted
    }
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
