//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket. All
//! messages are JSON with a `type` tag. Ack-bearing requests carry a
//! client-chosen `requestId` echoed back in the matching result message;
//! fire-and-forget game events have no ack and are silently dropped when
//! invalid (the next state broadcast is the authoritative correction).

use serde::{Deserialize, Serialize};

use crate::game::state::{GamePhase, PlayerRole};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Create a room and become its host. Acked.
    CreateRoom {
        /// Correlation id echoed in the ack.
        request_id: u64,
        /// Requested display name (sanitised server-side).
        player_name: String,
    },

    /// Join an existing room. Acked.
    JoinRoom {
        /// Correlation id echoed in the ack.
        request_id: u64,
        /// Six-character room code (uppercased server-side).
        room_code: String,
        /// Requested display name.
        player_name: String,
        /// Room password, if the room has one.
        #[serde(default)]
        password: Option<String>,
        /// Join as a spectator instead of a contestant.
        #[serde(default)]
        as_spectator: Option<bool>,
    },

    /// Resume a seat after a transport drop. Acked.
    ReconnectPlayer {
        /// Correlation id echoed in the ack.
        request_id: u64,
        /// The stable id handed out at create/join time.
        player_id: String,
    },

    /// Set or clear the room password. Host only, lobby only. Acked.
    SetRoomPassword {
        /// Correlation id echoed in the ack.
        request_id: u64,
        /// New password, or `null` to clear.
        #[serde(default)]
        password: Option<String>,
    },

    /// Fetch the process-lifetime leaderboard. Acked.
    GetGlobalLeaderboard {
        /// Correlation id echoed in the ack.
        request_id: u64,
    },

    /// Claim a personal box in the lobby.
    SelectBox {
        /// Box number, 1..=20.
        box_number: u8,
    },

    /// Toggle readiness.
    PlayerReady,

    /// Start the game. Host only.
    StartGame,

    /// Open a box on your turn.
    OpenBox {
        /// Box number, 1..=20.
        box_number: u8,
    },

    /// Answer the banker.
    DealResponse {
        /// Deal or no deal.
        accepted: bool,
    },

    /// Send a chat message. Contestants only.
    ChatMessage {
        /// Message body, truncated to 500 characters.
        content: String,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client: acks for the five request kinds,
/// plus pushes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Ack for `create-room`.
    CreateRoomResult {
        /// Correlation id from the request.
        request_id: u64,
        /// Whether the room was created.
        success: bool,
        /// The new room code, on success.
        room_code: Option<String>,
        /// The host's stable id, on success.
        player_id: Option<String>,
        /// Failure reason, on error.
        error: Option<String>,
    },

    /// Ack for `join-room`.
    JoinRoomResult {
        /// Correlation id from the request.
        request_id: u64,
        /// Whether the join succeeded.
        success: bool,
        /// The joined room code, on success.
        room_code: Option<String>,
        /// The joiner's stable id, on success.
        player_id: Option<String>,
        /// Failure reason, on error.
        error: Option<String>,
    },

    /// Ack for `reconnect-player`.
    ReconnectResult {
        /// Correlation id from the request.
        request_id: u64,
        /// Whether the seat was resumed.
        success: bool,
        /// The room the player is seated in, on success.
        room_code: Option<String>,
        /// Failure reason, on error.
        error: Option<String>,
    },

    /// Ack for `set-room-password`.
    SetPasswordResult {
        /// Correlation id from the request.
        request_id: u64,
        /// Whether the password was updated.
        success: bool,
        /// Failure reason, on error.
        error: Option<String>,
    },

    /// Ack for `get-global-leaderboard`.
    GlobalLeaderboardResult {
        /// Correlation id from the request.
        request_id: u64,
        /// Always true; the read cannot fail.
        success: bool,
        /// Ranked entries, truncated to the top 100.
        leaderboard: Vec<GlobalEntry>,
    },

    /// Personalised room snapshot.
    GameStateUpdate(GameStateUpdate),

    /// Chat fan-out.
    ChatMessage(ChatBroadcast),

    /// Provisional standings while a game is in progress.
    LeaderboardUpdate {
        /// Settled contestants so far, ranked.
        leaderboard: Vec<LeaderEntry>,
    },

    /// Terminal standings. Idempotent for late joiners.
    GameEnded {
        /// Final ranked leaderboard.
        leaderboard: Vec<LeaderEntry>,
    },

    /// Advisory: a player's transport dropped. The player stays seated.
    PlayerLeft {
        /// The disconnected player.
        player_id: String,
    },
}

// =============================================================================
// SNAPSHOT PAYLOADS
// =============================================================================

/// Per-recipient room snapshot. Unopened box values never appear.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateUpdate {
    /// Room lifecycle phase.
    pub phase: GamePhase,
    /// Players in seat order, public fields only.
    pub players: Vec<PlayerView>,
    /// All twenty boxes, redacted for the recipient.
    pub boxes: Vec<BoxView>,
    /// 0 before start, then 1..N.
    pub current_round: u32,
    /// Quota for the current round.
    pub boxes_to_open_this_round: u32,
    /// Box numbers opened since the last offer.
    pub boxes_opened_this_round: Vec<u8>,
    /// Ladder values still in play.
    pub remaining_values: Vec<f64>,
    /// Ladder values knocked out.
    pub eliminated_values: Vec<f64>,
    /// Offer on the table, during the offer phase.
    pub current_offer: Option<f64>,
    /// Offer deadline, epoch milliseconds.
    pub offer_expires_at: Option<u64>,
    /// Whose turn it is.
    pub current_turn_player_id: Option<String>,
    /// Turn deadline, epoch milliseconds.
    pub turn_expires_at: Option<u64>,
    /// Set only on the broadcast that first reveals a box.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recently_opened_box: Option<RecentlyOpenedBox>,
}

/// Public view of a player.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    /// Stable id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Room creator.
    pub is_host: bool,
    /// Contestant or spectator.
    pub role: PlayerRole,
    /// Ready to start.
    pub is_ready: bool,
    /// Transport liveness.
    pub is_connected: bool,
    /// Contestant holding a box who has not dealt.
    pub is_active: bool,
    /// Personal box number, once picked.
    pub box_number: Option<u8>,
    /// Has settled with the banker.
    pub has_dealt: bool,
    /// Settled amount, once dealt.
    pub deal_amount: Option<f64>,
}

/// Redacted view of a box.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxView {
    /// Box number, 1..=20.
    pub number: u8,
    /// Whether it has been opened.
    pub is_opened: bool,
    /// The hidden value — present only once opened.
    pub value: Option<f64>,
    /// True iff this is the recipient's own box.
    pub is_player_box: bool,
    /// The contestant who picked this box, if anyone.
    pub owner_id: Option<String>,
}

/// The box revealed by the broadcast carrying it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentlyOpenedBox {
    /// Box number.
    pub box_number: u8,
    /// Its revealed value.
    pub value: f64,
}

/// A chat message as fanned out to the room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBroadcast {
    /// Server-stamped unique id.
    pub id: String,
    /// Sender identity.
    pub sender_id: String,
    /// Sender display name.
    pub sender_name: String,
    /// Message body.
    pub content: String,
    /// Server receive time, epoch milliseconds.
    pub timestamp_ms: u64,
    /// Room the message belongs to.
    pub room_code: String,
}

/// One row of a per-game leaderboard (provisional or final).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderEntry {
    /// Stable player id.
    pub player_id: String,
    /// Display name.
    pub player_name: String,
    /// Winnings.
    pub amount: f64,
    /// Points per the scoring rules.
    pub points: i64,
    /// True iff the winnings came from the last-standing box reveal.
    pub was_box_value: bool,
    /// 1-based rank.
    pub rank: u32,
}

/// One row of the process-lifetime leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalEntry {
    /// 1-based rank.
    pub rank: u32,
    /// `name#XXXX` — display name plus the id's last four characters.
    pub public_id: String,
    /// Display name.
    pub player_name: String,
    /// Accumulated points across games.
    pub total_points: i64,
    /// Games finished.
    pub games_played: u32,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_json_roundtrip() {
        let msg = ClientMessage::JoinRoom {
            request_id: 7,
            room_code: "ABC234".to_string(),
            player_name: "Dana".to_string(),
            password: Some("secret".to_string()),
            as_spectator: None,
        };

        let json = msg.to_json().unwrap();
        let parsed = ClientMessage::from_json(&json).unwrap();

        if let ClientMessage::JoinRoom {
            request_id,
            room_code,
            ..
        } = parsed
        {
            assert_eq!(request_id, 7);
            assert_eq!(room_code, "ABC234");
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_event_names_are_kebab_case() {
        let msg = ClientMessage::SelectBox { box_number: 4 };
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"select-box""#));
        assert!(json.contains(r#""boxNumber":4"#));

        let msg = ClientMessage::GetGlobalLeaderboard { request_id: 1 };
        assert!(msg.to_json().unwrap().contains("get-global-leaderboard"));
    }

    #[test]
    fn test_client_events_parse_from_wire_form() {
        let parsed =
            ClientMessage::from_json(r#"{"type":"deal-response","accepted":true}"#).unwrap();
        assert!(matches!(
            parsed,
            ClientMessage::DealResponse { accepted: true }
        ));

        // Optional join fields may be omitted entirely
        let parsed = ClientMessage::from_json(
            r#"{"type":"join-room","requestId":1,"roomCode":"ABC234","playerName":"Bo"}"#,
        )
        .unwrap();
        assert!(matches!(
            parsed,
            ClientMessage::JoinRoom {
                password: None,
                as_spectator: None,
                ..
            }
        ));

        let parsed = ClientMessage::from_json(
            r#"{"type":"create-room","requestId":3,"playerName":"Bo"}"#,
        )
        .unwrap();
        assert!(matches!(parsed, ClientMessage::CreateRoom { request_id: 3, .. }));
    }

    #[test]
    fn test_server_push_names() {
        let msg = ServerMessage::PlayerLeft {
            player_id: "p1".to_string(),
        };
        assert!(msg.to_json().unwrap().contains(r#""type":"player-left""#));

        let msg = ServerMessage::GameEnded {
            leaderboard: vec![],
        };
        assert!(msg.to_json().unwrap().contains(r#""type":"game-ended""#));
    }

    #[test]
    fn test_phase_serializes_lowercase() {
        let update = GameStateUpdate {
            phase: GamePhase::Waiting,
            players: vec![],
            boxes: vec![],
            current_round: 0,
            boxes_to_open_this_round: 0,
            boxes_opened_this_round: vec![],
            remaining_values: vec![],
            eliminated_values: vec![],
            current_offer: None,
            offer_expires_at: None,
            current_turn_player_id: None,
            turn_expires_at: None,
            recently_opened_box: None,
        };

        let json = ServerMessage::GameStateUpdate(update).to_json().unwrap();
        assert!(json.contains(r#""type":"game-state-update""#));
        assert!(json.contains(r#""phase":"waiting""#));
        // absent piggyback is omitted entirely
        assert!(!json.contains("recentlyOpenedBox"));
    }

    #[test]
    fn test_recently_opened_box_serializes_when_present() {
        let update = GameStateUpdate {
            phase: GamePhase::Playing,
            players: vec![],
            boxes: vec![],
            current_round: 1,
            boxes_to_open_this_round: 5,
            boxes_opened_this_round: vec![12],
            remaining_values: vec![],
            eliminated_values: vec![],
            current_offer: None,
            offer_expires_at: None,
            current_turn_player_id: Some("p2".to_string()),
            turn_expires_at: Some(1_700_000_000_000),
            recently_opened_box: Some(RecentlyOpenedBox {
                box_number: 12,
                value: 750.0,
            }),
        };

        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains(r#""recentlyOpenedBox":{"boxNumber":12,"value":750.0}"#));
    }

    #[test]
    fn test_ack_roundtrip() {
        let msg = ServerMessage::JoinRoomResult {
            request_id: 9,
            success: false,
            room_code: None,
            player_id: None,
            error: Some("Room not found".to_string()),
        };

        let json = msg.to_json().unwrap();
        let parsed = ServerMessage::from_json(&json).unwrap();
        if let ServerMessage::JoinRoomResult { success, error, .. } = parsed {
            assert!(!success);
            assert_eq!(error.as_deref(), Some("Room not found"));
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_global_entry_shape() {
        let entry = GlobalEntry {
            rank: 1,
            public_id: "Dana#4F2A".to_string(),
            player_name: "Dana".to_string(),
            total_points: 1234,
            games_played: 3,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(r#""publicId":"Dana#4F2A""#));
        assert!(json.contains(r#""gamesPlayed":3"#));
    }
}
