//! Game State Definitions
//!
//! Room, player and box state for a single game. All mutation happens
//! under the room's lock; nothing here is async or touches the network.

use std::collections::VecDeque;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::constants::{BOX_COUNT, CHAT_HISTORY_LEN, VALUE_LADDER};
use crate::core::rng::GameRng;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Stable opaque player identifier. Survives reconnects; clients store it
/// to resume their seat.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap a client-supplied identity (reconnect path).
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Last four characters, uppercased. Used for the public id shown on
    /// the global leaderboard (`name#XXXX`).
    pub fn last4(&self) -> String {
        let start = self.0.len().saturating_sub(4);
        self.0[start..].to_uppercase()
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport connection identifier. Rebound on reconnect.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a fresh connection id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing id.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// PHASES AND ROLES
// =============================================================================

/// Room lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GamePhase {
    /// Lobby: players join, pick boxes and ready up.
    Waiting,
    /// Box selection underway (guards treat it like `Waiting`).
    Selection,
    /// Turn-based box opening.
    Playing,
    /// Banker offer on the table, responses being collected.
    Offer,
    /// Terminal. Everyone settled, leaderboard final.
    Finished,
}

/// Player role. A tagged variant, not a subclass: eligibility checks key
/// off this plus the capability predicates on [`Player`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerRole {
    /// May pick a box, open boxes, respond to offers and chat.
    Contestant,
    /// Receives state updates but cannot act or chat.
    Spectator,
}

// =============================================================================
// PLAYER
// =============================================================================

/// A player resident in a room. Created on create/join, lives until the
/// room is deleted; disconnects only flip `is_connected`.
#[derive(Clone, Debug)]
pub struct Player {
    /// Stable identity.
    pub id: PlayerId,
    /// Current transport binding, if connected.
    pub connection_id: Option<ConnectionId>,
    /// Sanitised display name. Immutable after creation.
    pub name: String,
    /// Room creator; may start the game and set the password.
    pub is_host: bool,
    /// Contestant or spectator.
    pub role: PlayerRole,
    /// Ready to start. Spectators are born ready so lobby checks skip them.
    pub is_ready: bool,
    /// Transport liveness.
    pub is_connected: bool,
    /// Personal box picked in the lobby. Frozen once ready.
    pub box_number: Option<u8>,
    /// Monotonic: once dealt, never opens boxes or sees offers again.
    pub has_dealt: bool,
    /// Settled winnings, once dealt.
    pub deal_amount: Option<f64>,
    /// Hidden value of the personal box, snapshotted at game start.
    pub box_value: Option<f64>,
    /// Round in which the player settled.
    pub round_dealt: Option<u32>,
    /// Settled via the last-standing auto-reveal.
    pub is_last_standing: bool,
    /// Missed turn and offer deadlines. Feeds the scoring penalty.
    pub timeout_count: u32,
    /// Final points, filled at settlement.
    pub points: i64,
}

impl Player {
    /// Create a contestant.
    pub fn contestant(name: String, connection_id: ConnectionId, is_host: bool) -> Self {
        Self {
            id: PlayerId::generate(),
            connection_id: Some(connection_id),
            name,
            is_host,
            role: PlayerRole::Contestant,
            is_ready: false,
            is_connected: true,
            box_number: None,
            has_dealt: false,
            deal_amount: None,
            box_value: None,
            round_dealt: None,
            is_last_standing: false,
            timeout_count: 0,
            points: 0,
        }
    }

    /// Create a spectator. Born ready and dealt, so every contestant-only
    /// check passes over them without special cases.
    pub fn spectator(name: String, connection_id: ConnectionId) -> Self {
        Self {
            role: PlayerRole::Spectator,
            is_ready: true,
            has_dealt: true,
            ..Self::contestant(name, connection_id, false)
        }
    }

    /// A contestant who holds a box and has not yet dealt.
    pub fn is_active(&self) -> bool {
        self.role == PlayerRole::Contestant && self.box_number.is_some() && !self.has_dealt
    }

    /// May send chat messages.
    pub fn can_chat(&self) -> bool {
        self.role == PlayerRole::Contestant
    }
}

// =============================================================================
// BOX
// =============================================================================

/// One of the twenty boxes, numbered 1..=20.
#[derive(Clone, Debug)]
pub struct BoxSlot {
    /// Box number shown to players.
    pub number: u8,
    /// Hidden ladder value. Never leaves the server until opened.
    pub value: f64,
    /// Monotonic once true.
    pub is_opened: bool,
    /// Who opened it. The owning contestant for personal-box reveals.
    pub opened_by: Option<PlayerId>,
}

// =============================================================================
// CHAT
// =============================================================================

/// A chat message in the room's bounded history.
#[derive(Clone, Debug)]
pub struct ChatEntry {
    /// Server-stamped unique id.
    pub id: String,
    /// Sender identity.
    pub sender_id: PlayerId,
    /// Sender display name at send time.
    pub sender_name: String,
    /// Truncated message body.
    pub content: String,
    /// Server receive time, epoch milliseconds.
    pub timestamp_ms: u64,
}

// =============================================================================
// ROOM
// =============================================================================

/// A single game room: the authoritative state for up to six contestants
/// and any number of spectators.
#[derive(Debug)]
pub struct Room {
    /// Six-character join code, unique among live rooms.
    pub code: String,
    /// The host's stable id.
    pub host_id: PlayerId,
    /// Optional join password (contestants only).
    pub password: Option<String>,
    /// Current lifecycle phase.
    pub phase: GamePhase,
    /// Players in insertion order. Turn derivation relies on this order.
    pub players: Vec<Player>,
    /// The twenty boxes, index 0 holding box number 1.
    pub boxes: Vec<BoxSlot>,
    /// 0 before start, then 1..N.
    pub current_round: u32,
    /// Box numbers opened since the last offer.
    pub boxes_opened_this_round: Vec<u8>,
    /// Ladder values still in play. Together with `eliminated_values`
    /// this always partitions the ladder.
    pub remaining_values: Vec<f64>,
    /// Ladder values knocked out by opened boxes.
    pub eliminated_values: Vec<f64>,
    /// Offer on the table, when `phase == Offer`.
    pub current_offer: Option<f64>,
    /// Offer deadline, epoch milliseconds.
    pub offer_expires_at: Option<u64>,
    /// Contestants active at offer generation; only they must respond.
    pub offer_eligible: Vec<PlayerId>,
    /// Responses collected so far (player -> accepted).
    pub offer_responses: Vec<(PlayerId, bool)>,
    /// Rotation basis: active contestants in insertion order.
    pub turn_order: Vec<PlayerId>,
    /// Rotation cursor into `turn_order`.
    pub current_turn_index: usize,
    /// Whose turn it is, when a turn is armed.
    pub current_turn_player: Option<PlayerId>,
    /// Turn deadline, epoch milliseconds.
    pub turn_expires_at: Option<u64>,
    /// Bounded chat history, oldest first.
    pub chat: VecDeque<ChatEntry>,
    /// Final leaderboard, kept for idempotent re-push to late joiners.
    pub final_leaderboard: Option<Vec<crate::network::protocol::LeaderEntry>>,
    /// Room randomness: banker jitter and turn-start selection.
    pub rng: GameRng,
    /// Creation time (sweep TTLs).
    pub created_at: Instant,
    /// Set on `start-game`.
    pub started_at: Option<Instant>,
    /// Set at finalisation.
    pub finished_at: Option<Instant>,
}

impl Room {
    /// Create a room with shuffled boxes and no players yet. The caller
    /// seats the host immediately after.
    pub fn new(code: String, mut rng: GameRng) -> Self {
        let mut values = VALUE_LADDER.to_vec();
        rng.shuffle(&mut values);

        let boxes = values
            .iter()
            .enumerate()
            .map(|(i, &value)| BoxSlot {
                number: (i + 1) as u8,
                value,
                is_opened: false,
                opened_by: None,
            })
            .collect();

        Self {
            code,
            host_id: PlayerId::from_string(""),
            password: None,
            phase: GamePhase::Waiting,
            players: Vec::new(),
            boxes,
            current_round: 0,
            boxes_opened_this_round: Vec::new(),
            remaining_values: values,
            eliminated_values: Vec::new(),
            current_offer: None,
            offer_expires_at: None,
            offer_eligible: Vec::new(),
            offer_responses: Vec::new(),
            turn_order: Vec::new(),
            current_turn_index: 0,
            current_turn_player: None,
            turn_expires_at: None,
            chat: VecDeque::with_capacity(CHAT_HISTORY_LEN),
            final_leaderboard: None,
            rng,
            created_at: Instant::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Seat a player. A host-flagged player becomes the room's host.
    pub fn seat(&mut self, player: Player) -> PlayerId {
        let id = player.id.clone();
        if player.is_host {
            self.host_id = id.clone();
        }
        self.players.push(player);
        id
    }

    /// Look up a player by id.
    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| &p.id == id)
    }

    /// Look up a player by id, mutably.
    pub fn player_mut(&mut self, id: &PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| &p.id == id)
    }

    /// Contestants in insertion order.
    pub fn contestants(&self) -> impl Iterator<Item = &Player> + '_ {
        self.players
            .iter()
            .filter(|p| p.role == PlayerRole::Contestant)
    }

    /// Number of seated contestants.
    pub fn contestant_count(&self) -> usize {
        self.contestants().count()
    }

    /// Contestants holding a box who have not yet dealt.
    pub fn active_contestants(&self) -> impl Iterator<Item = &Player> + '_ {
        self.players.iter().filter(|p| p.is_active())
    }

    /// The box slot for a box number, if in range.
    pub fn box_slot(&self, number: u8) -> Option<&BoxSlot> {
        if (1..=BOX_COUNT as u8).contains(&number) {
            self.boxes.get(number as usize - 1)
        } else {
            None
        }
    }

    /// The contestant whose personal box this is, if anyone's.
    pub fn box_owner(&self, number: u8) -> Option<&Player> {
        self.contestants().find(|p| p.box_number == Some(number))
    }

    /// A box that is unopened and not reserved as anyone's personal box.
    pub fn is_openable(&self, number: u8) -> bool {
        match self.box_slot(number) {
            Some(slot) => !slot.is_opened && self.box_owner(number).is_none(),
            None => false,
        }
    }

    /// How many boxes could legally be opened right now.
    pub fn openable_count(&self) -> usize {
        self.boxes
            .iter()
            .filter(|b| !b.is_opened && self.box_owner(b.number).is_none())
            .count()
    }

    /// Open a box: flip the flag, record the opener and move its value
    /// from the remaining to the eliminated multiset. Returns the value.
    ///
    /// Callers validate openability (or ownership, for personal reveals)
    /// first; this only performs the bookkeeping.
    pub fn open_box(&mut self, number: u8, opened_by: PlayerId) -> Option<f64> {
        if !(1..=BOX_COUNT as u8).contains(&number) {
            return None;
        }
        let slot = self.boxes.get_mut(number as usize - 1)?;
        if slot.is_opened {
            return None;
        }
        slot.is_opened = true;
        slot.opened_by = Some(opened_by);
        let value = slot.value;

        if let Some(pos) = self.remaining_values.iter().position(|&v| v == value) {
            self.remaining_values.remove(pos);
            self.eliminated_values.push(value);
        }
        Some(value)
    }

    /// Append a chat message, evicting the oldest past the ring bound.
    pub fn push_chat(&mut self, entry: ChatEntry) {
        if self.chat.len() == CHAT_HISTORY_LEN {
            self.chat.pop_front();
        }
        self.chat.push_back(entry);
    }
}
