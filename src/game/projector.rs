//! State Projector
//!
//! Converts authoritative room state into per-recipient snapshots.
//! Unopened box values never leave the server; the only recipient-specific
//! bit is the `is_player_box` marker. Read-only and idempotent — the
//! engine calls this once per recipient under the room lock.

use crate::core::constants::round_quota;
use crate::game::state::{PlayerId, Room};
use crate::network::protocol::{BoxView, GameStateUpdate, PlayerView, RecentlyOpenedBox};

/// Build the snapshot a recipient is allowed to see.
///
/// `recently_opened` is attached only to the broadcast that first reveals
/// that box; the caller passes it through, it is never stored.
pub fn project(
    room: &Room,
    recipient: &PlayerId,
    recently_opened: Option<RecentlyOpenedBox>,
) -> GameStateUpdate {
    let recipient_box = room
        .player(recipient)
        .and_then(|p| p.box_number);

    let players = room
        .players
        .iter()
        .map(|p| PlayerView {
            id: p.id.to_string(),
            name: p.name.clone(),
            is_host: p.is_host,
            role: p.role,
            is_ready: p.is_ready,
            is_connected: p.is_connected,
            is_active: p.is_active(),
            box_number: p.box_number,
            has_dealt: p.has_dealt,
            deal_amount: p.deal_amount,
        })
        .collect();

    let boxes = room
        .boxes
        .iter()
        .map(|b| BoxView {
            number: b.number,
            is_opened: b.is_opened,
            value: b.is_opened.then_some(b.value),
            is_player_box: recipient_box == Some(b.number),
            owner_id: room.box_owner(b.number).map(|p| p.id.to_string()),
        })
        .collect();

    GameStateUpdate {
        phase: room.phase,
        players,
        boxes,
        current_round: room.current_round,
        boxes_to_open_this_round: round_quota(room.current_round),
        boxes_opened_this_round: room.boxes_opened_this_round.clone(),
        remaining_values: room.remaining_values.clone(),
        eliminated_values: room.eliminated_values.clone(),
        current_offer: room.current_offer,
        offer_expires_at: room.offer_expires_at,
        current_turn_player_id: room.current_turn_player.as_ref().map(|p| p.to_string()),
        turn_expires_at: room.turn_expires_at,
        recently_opened_box: recently_opened,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::GameRng;
    use crate::game::state::{ConnectionId, Player};

    fn room_with_two() -> (Room, PlayerId, PlayerId) {
        let mut room = Room::new("PRJTST".to_string(), GameRng::new(11));
        let a = room.seat(Player::contestant(
            "A".to_string(),
            ConnectionId::generate(),
            true,
        ));
        let b = room.seat(Player::contestant(
            "B".to_string(),
            ConnectionId::generate(),
            false,
        ));
        (room, a, b)
    }

    #[test]
    fn test_unopened_boxes_never_leak_values() {
        let (room, a, _) = room_with_two();
        let snapshot = project(&room, &a, None);

        assert_eq!(snapshot.boxes.len(), 20);
        for view in &snapshot.boxes {
            assert!(!view.is_opened);
            assert!(view.value.is_none());
        }
    }

    #[test]
    fn test_opened_box_shows_value() {
        let (mut room, a, _) = room_with_two();
        let value = room.open_box(9, a.clone()).unwrap();

        let snapshot = project(&room, &a, None);
        let view = &snapshot.boxes[8];
        assert!(view.is_opened);
        assert_eq!(view.value, Some(value));
    }

    #[test]
    fn test_is_player_box_is_recipient_specific() {
        let (mut room, a, b) = room_with_two();
        room.player_mut(&a).unwrap().box_number = Some(4);
        room.player_mut(&b).unwrap().box_number = Some(17);

        let for_a = project(&room, &a, None);
        assert!(for_a.boxes[3].is_player_box);
        assert!(!for_a.boxes[16].is_player_box);

        let for_b = project(&room, &b, None);
        assert!(!for_b.boxes[3].is_player_box);
        assert!(for_b.boxes[16].is_player_box);

        // ownership is public either way
        assert_eq!(for_b.boxes[3].owner_id, Some(a.to_string()));
    }

    #[test]
    fn test_players_in_seat_order_with_activity() {
        let (mut room, a, b) = room_with_two();
        room.player_mut(&a).unwrap().box_number = Some(4);

        let snapshot = project(&room, &b, None);
        assert_eq!(snapshot.players[0].id, a.to_string());
        assert_eq!(snapshot.players[1].id, b.to_string());
        assert!(snapshot.players[0].is_active);
        assert!(!snapshot.players[1].is_active); // no box yet
    }

    #[test]
    fn test_projection_is_idempotent() {
        let (room, a, _) = room_with_two();
        let one = serde_json::to_string(&project(&room, &a, None)).unwrap();
        let two = serde_json::to_string(&project(&room, &a, None)).unwrap();
        assert_eq!(one, two);
    }

    #[test]
    fn test_round_quota_reflected() {
        let (mut room, a, _) = room_with_two();
        room.current_round = 2;
        let snapshot = project(&room, &a, None);
        assert_eq!(snapshot.boxes_to_open_this_round, 4);
    }
}
