//! Game Engine
//!
//! The phase machine: lobby, turn rotation, box opening, banker offers,
//! settlement and finalisation. Every operation runs synchronously under
//! the room's lock and returns an [`EngineOutput`] of already-projected
//! pushes and timer commands; the dispatcher performs the actual sends and
//! arms tokio timers after the lock is released.
//!
//! Invalid game-mutating inputs are dropped silently — the next state
//! broadcast is the authoritative contradiction. Timer entry points
//! revalidate the state they were armed against and no-op when stale.

use tracing::{debug, info};

use crate::core::constants::{
    round_quota, MAX_CHAT_LEN, MIN_CONTESTANTS, OFFER_TIMEOUT_MS, TURN_TIMEOUT_MS,
};
use crate::game::banker::compute_offer;
use crate::game::projector::project;
use crate::game::scoring::{assign_ranks, score_outcome, Outcome};
use crate::game::state::{ChatEntry, ConnectionId, GamePhase, PlayerId, PlayerRole, Room};
use crate::network::protocol::{
    ChatBroadcast, LeaderEntry, RecentlyOpenedBox, ServerMessage,
};

// =============================================================================
// OUTPUT
// =============================================================================

/// One outbound message bound for one connection.
#[derive(Debug)]
pub struct Push {
    /// Target connection.
    pub connection: ConnectionId,
    /// Message to deliver.
    pub message: ServerMessage,
}

/// Timer work the dispatcher must perform after releasing the room lock.
/// Arming a class replaces (and cancels) any existing timer of that class.
#[derive(Debug, Clone, PartialEq)]
pub enum TimerCommand {
    /// Arm the per-turn deadline for the given player.
    ArmTurn {
        /// Player whose turn it is.
        player_id: PlayerId,
        /// Deadline, epoch milliseconds.
        deadline_ms: u64,
    },
    /// Arm the cosmetic pause before the banker calls.
    ArmOfferPause {
        /// Round the pause was armed in, revalidated at fire time.
        round: u32,
    },
    /// Arm the per-offer deadline.
    ArmOffer {
        /// Deadline, epoch milliseconds.
        deadline_ms: u64,
    },
}

/// A finished contestant's contribution to the global leaderboard.
#[derive(Debug, Clone)]
pub struct GlobalSettlement {
    /// Stable identity.
    pub player_id: PlayerId,
    /// Display name at settlement time.
    pub name: String,
    /// Points earned this game.
    pub points: i64,
}

/// Result of one engine operation.
#[derive(Debug, Default)]
pub struct EngineOutput {
    /// Outbound messages, in order.
    pub pushes: Vec<Push>,
    /// Timer to arm, if any.
    pub timer: Option<TimerCommand>,
    /// Cancel both room timers (set at finalisation).
    pub cancel_timers: bool,
    /// Global-leaderboard upserts (set at finalisation).
    pub settlements: Vec<GlobalSettlement>,
}

impl EngineOutput {
    fn none() -> Self {
        Self::default()
    }
}

// =============================================================================
// LOBBY OPERATIONS
// =============================================================================

/// State fan-out plus the direct leaderboard snapshot after a join.
/// The snapshot guarantees late joiners never miss a terminal event.
pub fn after_join(room: &Room, joiner: &PlayerId) -> EngineOutput {
    let mut out = EngineOutput::none();
    broadcast_state(room, &mut out, None);
    push_to(room, &mut out, joiner, leaderboard_snapshot(room));
    out
}

/// Same shape as [`after_join`]: reconnecting players get a fresh
/// projection and the snapshot they may have missed.
pub fn after_reconnect(room: &Room, player: &PlayerId) -> EngineOutput {
    after_join(room, player)
}

/// Advise the room that a player's transport dropped. The player stays
/// seated; only `is_connected` changed (the store already flipped it).
pub fn after_disconnect(room: &Room, player_id: &PlayerId) -> EngineOutput {
    let mut out = EngineOutput::none();
    broadcast_message(
        room,
        &mut out,
        ServerMessage::PlayerLeft {
            player_id: player_id.to_string(),
        },
    );
    broadcast_state(room, &mut out, None);
    out
}

/// Claim (or move to) a personal box in the lobby.
pub fn select_box(room: &mut Room, actor: &PlayerId, box_number: u8) -> EngineOutput {
    if !matches!(room.phase, GamePhase::Waiting | GamePhase::Selection) {
        return EngineOutput::none();
    }
    if room.box_slot(box_number).is_none() {
        return EngineOutput::none();
    }
    // taken by someone else
    if room
        .box_owner(box_number)
        .is_some_and(|owner| &owner.id != actor)
    {
        return EngineOutput::none();
    }
    match room.player(actor) {
        Some(p) if p.role == PlayerRole::Contestant && !p.is_ready => {}
        _ => return EngineOutput::none(),
    }

    if let Some(p) = room.player_mut(actor) {
        p.box_number = Some(box_number);
    }

    let mut out = EngineOutput::none();
    broadcast_state(room, &mut out, None);
    out
}

/// Toggle readiness. Requires a picked box; readiness freezes the pick.
pub fn toggle_ready(room: &mut Room, actor: &PlayerId) -> EngineOutput {
    if !matches!(room.phase, GamePhase::Waiting | GamePhase::Selection) {
        return EngineOutput::none();
    }
    match room.player_mut(actor) {
        Some(p) if p.role == PlayerRole::Contestant && p.box_number.is_some() => {
            p.is_ready = !p.is_ready;
        }
        _ => return EngineOutput::none(),
    }

    let mut out = EngineOutput::none();
    broadcast_state(room, &mut out, None);
    out
}

/// Start the game. Host only; needs two ready contestants with boxes.
pub fn start_game(room: &mut Room, actor: &PlayerId, now_ms: u64) -> EngineOutput {
    if !matches!(room.phase, GamePhase::Waiting | GamePhase::Selection) {
        return EngineOutput::none();
    }
    if &room.host_id != actor {
        return EngineOutput::none();
    }
    if room.contestant_count() < MIN_CONTESTANTS {
        return EngineOutput::none();
    }
    if !room
        .contestants()
        .all(|p| p.is_ready && p.box_number.is_some())
    {
        return EngineOutput::none();
    }

    room.phase = GamePhase::Playing;
    room.started_at = Some(std::time::Instant::now());
    room.current_round = 1;

    // Freeze each contestant's hidden value
    let snapshots: Vec<(PlayerId, f64)> = room
        .contestants()
        .filter_map(|p| {
            p.box_number
                .and_then(|n| room.box_slot(n))
                .map(|slot| (p.id.clone(), slot.value))
        })
        .collect();
    for (id, value) in snapshots {
        if let Some(p) = room.player_mut(&id) {
            p.box_value = Some(value);
        }
    }

    room.turn_order = room.contestants().map(|p| p.id.clone()).collect();
    room.current_turn_index = room.rng.next_index(room.turn_order.len());

    info!(
        "Room {} started with {} contestants",
        room.code,
        room.turn_order.len()
    );

    let mut out = EngineOutput::none();
    arm_turn_or_offer(room, now_ms, &mut out);
    broadcast_state(room, &mut out, None);
    out
}

// =============================================================================
// TURNS
// =============================================================================

/// Open a box. Only the current turn player, only an openable box.
pub fn open_box(room: &mut Room, actor: &PlayerId, box_number: u8, now_ms: u64) -> EngineOutput {
    if room.phase != GamePhase::Playing {
        return EngineOutput::none();
    }
    if room.current_turn_player.as_ref() != Some(actor) {
        return EngineOutput::none();
    }
    if !room.is_openable(box_number) {
        return EngineOutput::none();
    }

    let Some(value) = room.open_box(box_number, actor.clone()) else {
        return EngineOutput::none();
    };
    room.boxes_opened_this_round.push(box_number);

    debug!(
        "Room {}: box {} opened for {} by {}",
        room.code, box_number, value, actor
    );

    let quota = round_quota(room.current_round);
    let complete = room.boxes_opened_this_round.len() as u32 >= quota
        || room.openable_count() == 0;

    // Advance the rotation cursor past the opener either way so the next
    // armed turn (this round or next) lands on the following contestant.
    let len = room.turn_order.len();
    if len > 0 {
        room.current_turn_index = (room.current_turn_index + 1) % len;
    }

    let mut out = EngineOutput::none();
    if complete {
        route_to_offer(room, &mut out);
    } else {
        arm_turn_or_offer(room, now_ms, &mut out);
    }
    broadcast_state(
        room,
        &mut out,
        Some(RecentlyOpenedBox { box_number, value }),
    );
    out
}

/// Turn deadline fired. Validates that the armed turn is still current;
/// a mutation between firing and dispatch makes this a benign no-op.
/// No box is auto-opened — the player is skipped and penalised.
pub fn handle_turn_timeout(
    room: &mut Room,
    expected_player: &PlayerId,
    expected_deadline_ms: u64,
    now_ms: u64,
) -> EngineOutput {
    if room.phase != GamePhase::Playing {
        return EngineOutput::none();
    }
    if room.current_turn_player.as_ref() != Some(expected_player) {
        return EngineOutput::none();
    }
    if room.turn_expires_at != Some(expected_deadline_ms) {
        return EngineOutput::none();
    }

    if let Some(p) = room.player_mut(expected_player) {
        p.timeout_count += 1;
    }
    info!("Room {}: turn timeout for {}", room.code, expected_player);

    let len = room.turn_order.len();
    if len > 0 {
        room.current_turn_index = (room.current_turn_index + 1) % len;
    }

    let mut out = EngineOutput::none();
    arm_turn_or_offer(room, now_ms, &mut out);
    broadcast_state(room, &mut out, None);
    out
}

/// Arm the next turn, or route to the banker when no contestant can act
/// or no openable box remains (the pre-turn deadlock check).
fn arm_turn_or_offer(room: &mut Room, now_ms: u64, out: &mut EngineOutput) {
    if room.turn_order.is_empty() || room.openable_count() == 0 {
        route_to_offer(room, out);
        return;
    }

    let len = room.turn_order.len();
    room.current_turn_index %= len;

    let mut armed = None;
    for step in 0..len {
        let idx = (room.current_turn_index + step) % len;
        let pid = room.turn_order[idx].clone();
        if room.player(&pid).is_some_and(|p| !p.has_dealt) {
            armed = Some((idx, pid));
            break;
        }
    }

    match armed {
        Some((idx, pid)) => {
            let deadline_ms = now_ms + TURN_TIMEOUT_MS;
            room.current_turn_index = idx;
            room.current_turn_player = Some(pid.clone());
            room.turn_expires_at = Some(deadline_ms);
            out.timer = Some(TimerCommand::ArmTurn {
                player_id: pid,
                deadline_ms,
            });
        }
        None => route_to_offer(room, out),
    }
}

/// Clear the turn and schedule the cosmetic pause; clients render
/// "awaiting banker" from the cleared turn fields.
fn route_to_offer(room: &mut Room, out: &mut EngineOutput) {
    room.current_turn_player = None;
    room.turn_expires_at = None;
    out.timer = Some(TimerCommand::ArmOfferPause {
        round: room.current_round,
    });
}

// =============================================================================
// OFFERS
// =============================================================================

/// The cosmetic pause fired: generate the banker's offer and open the
/// response window for every currently active contestant.
pub fn handle_offer_pause(room: &mut Room, expected_round: u32, now_ms: u64) -> EngineOutput {
    if room.phase != GamePhase::Playing
        || room.current_turn_player.is_some()
        || room.current_round != expected_round
    {
        return EngineOutput::none();
    }

    let offer = compute_offer(&room.remaining_values, room.current_round, &mut room.rng);
    let deadline_ms = now_ms + OFFER_TIMEOUT_MS;

    room.phase = GamePhase::Offer;
    room.current_offer = Some(offer);
    room.offer_expires_at = Some(deadline_ms);
    room.offer_eligible = room.active_contestants().map(|p| p.id.clone()).collect();
    room.offer_responses.clear();

    info!(
        "Room {}: banker offers {} in round {} to {} contestants",
        room.code,
        offer,
        room.current_round,
        room.offer_eligible.len()
    );

    let mut out = EngineOutput::none();
    out.timer = Some(TimerCommand::ArmOffer { deadline_ms });
    broadcast_state(room, &mut out, None);
    out
}

/// Record a deal response. Accepting settles the player immediately;
/// the offer resolves once every eligible contestant has answered.
pub fn deal_response(
    room: &mut Room,
    actor: &PlayerId,
    accepted: bool,
    now_ms: u64,
) -> EngineOutput {
    if room.phase != GamePhase::Offer {
        return EngineOutput::none();
    }
    if !room.offer_eligible.contains(actor) {
        return EngineOutput::none();
    }
    if room.offer_responses.iter().any(|(pid, _)| pid == actor) {
        return EngineOutput::none();
    }

    room.offer_responses.push((actor.clone(), accepted));

    let mut out = EngineOutput::none();
    if accepted {
        let offer = room.current_offer.unwrap_or(0.0);
        settle_deal(room, actor, offer);
        broadcast_state(room, &mut out, None);
        broadcast_message(
            room,
            &mut out,
            ServerMessage::LeaderboardUpdate {
                leaderboard: provisional_leaderboard(room),
            },
        );
    }

    let all_responded = room
        .offer_eligible
        .iter()
        .all(|pid| room.offer_responses.iter().any(|(r, _)| r == pid));
    if all_responded {
        resolve_offer(room, now_ms, &mut out);
    }
    out
}

/// Offer deadline fired. Non-responders become implicit "no deal" and
/// each accrues a timeout. No-ops when the offer already resolved.
pub fn handle_offer_timeout(
    room: &mut Room,
    expected_deadline_ms: u64,
    now_ms: u64,
) -> EngineOutput {
    if room.phase != GamePhase::Offer {
        return EngineOutput::none();
    }
    if room.offer_expires_at != Some(expected_deadline_ms) {
        return EngineOutput::none();
    }

    let silent: Vec<PlayerId> = room
        .offer_eligible
        .iter()
        .filter(|pid| !room.offer_responses.iter().any(|(r, _)| &r == pid))
        .cloned()
        .collect();
    for pid in silent {
        if let Some(p) = room.player_mut(&pid) {
            p.timeout_count += 1;
        }
        room.offer_responses.push((pid, false));
    }
    info!("Room {}: offer deadline expired", room.code);

    let mut out = EngineOutput::none();
    resolve_offer(room, now_ms, &mut out);
    out
}

/// Resolve a completed offer window: finalise, auto-reveal the last
/// contestant, or start the next round.
fn resolve_offer(room: &mut Room, now_ms: u64, out: &mut EngineOutput) {
    room.current_offer = None;
    room.offer_expires_at = None;
    room.offer_eligible.clear();
    room.offer_responses.clear();

    let undealt: Vec<PlayerId> = room.active_contestants().map(|p| p.id.clone()).collect();
    match undealt.len() {
        0 => finalize(room, out),
        1 => {
            settle_last_standing(room, &undealt[0]);
            finalize(room, out);
        }
        _ => {
            room.phase = GamePhase::Playing;
            room.current_round += 1;
            room.boxes_opened_this_round.clear();
            info!("Room {}: round {} begins", room.code, room.current_round);
            arm_turn_or_offer(room, now_ms, out);
            broadcast_state(room, out, None);
        }
    }
}

// =============================================================================
// SETTLEMENT
// =============================================================================

/// Settle an accepted deal: freeze winnings, open the personal box and
/// retire the player from the rotation.
fn settle_deal(room: &mut Room, actor: &PlayerId, offer: f64) {
    let round = room.current_round;
    let box_number = match room.player_mut(actor) {
        Some(p) => {
            p.has_dealt = true;
            p.deal_amount = Some(offer);
            p.round_dealt = Some(round);
            p.box_number
        }
        None => return,
    };
    if let Some(n) = box_number {
        room.open_box(n, actor.clone());
    }
    remove_from_turn_order(room, actor);
    info!("Room {}: {} deals for {}", room.code, actor, offer);
}

/// Auto-reveal the last undealt contestant's personal box as their
/// winnings.
fn settle_last_standing(room: &mut Room, actor: &PlayerId) {
    let round = room.current_round;
    let (box_number, value) = match room.player_mut(actor) {
        Some(p) => {
            let value = p.box_value.unwrap_or(0.0);
            p.has_dealt = true;
            p.deal_amount = Some(value);
            p.round_dealt = Some(round);
            p.is_last_standing = true;
            (p.box_number, value)
        }
        None => return,
    };
    if let Some(n) = box_number {
        room.open_box(n, actor.clone());
    }
    remove_from_turn_order(room, actor);
    info!(
        "Room {}: {} is last standing, box reveals {}",
        room.code, actor, value
    );
}

/// Drop a settled player from the rotation, shifting the cursor left when
/// their slot was at or before it so the next round stays fair.
fn remove_from_turn_order(room: &mut Room, actor: &PlayerId) {
    if let Some(pos) = room.turn_order.iter().position(|p| p == actor) {
        room.turn_order.remove(pos);
        if pos <= room.current_turn_index && room.current_turn_index > 0 {
            room.current_turn_index -= 1;
        }
    }
}

/// Terminal transition: score everyone, persist points, build the final
/// leaderboard and emit `game-ended`.
fn finalize(room: &mut Room, out: &mut EngineOutput) {
    room.phase = GamePhase::Finished;
    room.finished_at = Some(std::time::Instant::now());
    room.current_turn_player = None;
    room.turn_expires_at = None;

    let max_amount = room
        .contestants()
        .filter(|p| p.box_number.is_some())
        .filter_map(|p| p.deal_amount)
        .fold(0.0_f64, f64::max);

    let mut entries = Vec::new();
    let scored: Vec<(PlayerId, i64)> = room
        .contestants()
        .filter(|p| p.box_number.is_some())
        .map(|p| {
            let amount = p.deal_amount.unwrap_or(0.0);
            let points = score_outcome(&Outcome {
                final_winnings: amount,
                final_box_value: p.box_value.unwrap_or(0.0),
                round_dealt: p.round_dealt.unwrap_or(room.current_round.max(1)),
                is_last_standing: p.is_last_standing,
                is_highest_winnings: amount == max_amount,
                timeout_count: p.timeout_count,
            });
            entries.push(LeaderEntry {
                player_id: p.id.to_string(),
                player_name: p.name.clone(),
                amount,
                points,
                was_box_value: p.is_last_standing,
                rank: 0,
            });
            out.settlements.push(GlobalSettlement {
                player_id: p.id.clone(),
                name: p.name.clone(),
                points,
            });
            (p.id.clone(), points)
        })
        .collect();

    for (id, points) in scored {
        if let Some(p) = room.player_mut(&id) {
            p.points = points;
        }
    }

    assign_ranks(&mut entries);
    room.final_leaderboard = Some(entries.clone());
    out.cancel_timers = true;

    info!("Room {}: game over, {} settled", room.code, entries.len());

    broadcast_state(room, out, None);
    broadcast_message(room, out, ServerMessage::GameEnded { leaderboard: entries });
}

// =============================================================================
// CHAT
// =============================================================================

/// Fan a contestant's chat message out to the room. Spectators are
/// silently refused.
pub fn chat(room: &mut Room, actor: &PlayerId, content: &str, now_ms: u64) -> EngineOutput {
    let (sender_id, sender_name) = match room.player(actor) {
        Some(p) if p.can_chat() => (p.id.clone(), p.name.clone()),
        _ => return EngineOutput::none(),
    };

    let content: String = content.chars().take(MAX_CHAT_LEN).collect();
    if content.is_empty() {
        return EngineOutput::none();
    }

    let id = uuid::Uuid::new_v4().to_string();
    room.push_chat(ChatEntry {
        id: id.clone(),
        sender_id: sender_id.clone(),
        sender_name: sender_name.clone(),
        content: content.clone(),
        timestamp_ms: now_ms,
    });

    let mut out = EngineOutput::none();
    broadcast_message(
        room,
        &mut out,
        ServerMessage::ChatMessage(ChatBroadcast {
            id,
            sender_id: sender_id.to_string(),
            sender_name,
            content,
            timestamp_ms: now_ms,
            room_code: room.code.clone(),
        }),
    );
    out
}

// =============================================================================
// LEADERBOARDS
// =============================================================================

/// Provisional standings: contestants settled so far, scored with what is
/// known now (highest-winnings judged among the settled only).
pub fn provisional_leaderboard(room: &Room) -> Vec<LeaderEntry> {
    let settled: Vec<_> = room
        .contestants()
        .filter(|p| p.deal_amount.is_some())
        .collect();

    let max_amount = settled
        .iter()
        .filter_map(|p| p.deal_amount)
        .fold(0.0_f64, f64::max);

    let mut entries: Vec<LeaderEntry> = settled
        .iter()
        .map(|p| {
            let amount = p.deal_amount.unwrap_or(0.0);
            let points = score_outcome(&Outcome {
                final_winnings: amount,
                final_box_value: p.box_value.unwrap_or(0.0),
                round_dealt: p.round_dealt.unwrap_or(1),
                is_last_standing: p.is_last_standing,
                is_highest_winnings: amount == max_amount,
                timeout_count: p.timeout_count,
            });
            LeaderEntry {
                player_id: p.id.to_string(),
                player_name: p.name.clone(),
                amount,
                points,
                was_box_value: p.is_last_standing,
                rank: 0,
            }
        })
        .collect();
    assign_ranks(&mut entries);
    entries
}

/// The leaderboard message a joining or reconnecting player receives:
/// final if the game ended, else provisional.
pub fn leaderboard_snapshot(room: &Room) -> ServerMessage {
    match &room.final_leaderboard {
        Some(entries) => ServerMessage::GameEnded {
            leaderboard: entries.clone(),
        },
        None => ServerMessage::LeaderboardUpdate {
            leaderboard: provisional_leaderboard(room),
        },
    }
}

// =============================================================================
// FAN-OUT HELPERS
// =============================================================================

/// Personalised state snapshot to every connected member.
fn broadcast_state(room: &Room, out: &mut EngineOutput, recently: Option<RecentlyOpenedBox>) {
    for p in &room.players {
        if !p.is_connected {
            continue;
        }
        if let Some(conn) = &p.connection_id {
            out.pushes.push(Push {
                connection: conn.clone(),
                message: ServerMessage::GameStateUpdate(project(room, &p.id, recently.clone())),
            });
        }
    }
}

/// Identical message to every connected member.
fn broadcast_message(room: &Room, out: &mut EngineOutput, message: ServerMessage) {
    for p in &room.players {
        if !p.is_connected {
            continue;
        }
        if let Some(conn) = &p.connection_id {
            out.pushes.push(Push {
                connection: conn.clone(),
                message: message.clone(),
            });
        }
    }
}

/// Direct message to one player's connection.
fn push_to(room: &Room, out: &mut EngineOutput, player_id: &PlayerId, message: ServerMessage) {
    if let Some(p) = room.player(player_id) {
        if p.is_connected {
            if let Some(conn) = &p.connection_id {
                out.pushes.push(Push {
                    connection: conn.clone(),
                    message,
                });
            }
        }
    }
}
