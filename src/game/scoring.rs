//! Points Scoring
//!
//! Pure mapping from a contestant's outcome to points, plus the
//! leaderboard ranker. Same inputs, same output; the engine calls this at
//! settlement and for provisional standings.

use crate::network::protocol::LeaderEntry;

/// Everything the scorer needs to know about one contestant's game.
#[derive(Clone, Copy, Debug)]
pub struct Outcome {
    /// What the player walked away with.
    pub final_winnings: f64,
    /// The hidden value of their personal box.
    pub final_box_value: f64,
    /// Round in which they settled.
    pub round_dealt: u32,
    /// Settled via the last-standing auto-reveal.
    pub is_last_standing: bool,
    /// Walked away with the biggest amount in the room.
    pub is_highest_winnings: bool,
    /// Missed turn and offer deadlines.
    pub timeout_count: u32,
}

/// Base points cap: winnings beyond 300,000 stop earning.
const BASE_CAP: i64 = 3000;

/// Compute points for one outcome. Never negative.
pub fn score_outcome(o: &Outcome) -> i64 {
    let mut pts = ((o.final_winnings / 100.0).floor() as i64).min(BASE_CAP);

    // Smart deal: beat your own box
    if o.final_winnings > o.final_box_value {
        pts += 200;
    }
    // Guts: held out to round 4+
    if o.round_dealt >= 4 {
        pts += 150;
    }
    // Early exit: bailed in the first two rounds
    if o.round_dealt <= 2 {
        pts -= 50;
    }
    if o.is_last_standing {
        pts += 200;
    }
    if o.is_highest_winnings {
        pts += 200;
    }
    pts -= 50 * o.timeout_count as i64;

    pts.max(0)
}

/// Rank entries in place: points descending, ties broken by prior order
/// (the sort is stable), ranks assigned `1..=N`.
pub fn assign_ranks(entries: &mut [LeaderEntry]) {
    entries.sort_by(|a, b| b.points.cmp(&a.points));
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.rank = (i + 1) as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_outcome() -> Outcome {
        Outcome {
            final_winnings: 10_000.0,
            final_box_value: 50_000.0,
            round_dealt: 3,
            is_last_standing: false,
            is_highest_winnings: false,
            timeout_count: 0,
        }
    }

    #[test]
    fn test_base_points_from_winnings() {
        // 10_000 / 100 = 100 base, round 3 has no round bonus/penalty
        assert_eq!(score_outcome(&base_outcome()), 100);
    }

    #[test]
    fn test_base_points_cap() {
        let o = Outcome {
            final_winnings: 75_000.0,
            ..base_outcome()
        };
        // 750 would be under the cap; force past it
        let huge = Outcome {
            final_winnings: 500_000.0,
            ..base_outcome()
        };
        assert_eq!(score_outcome(&o), 750 + 200); // also beats the box
        assert_eq!(score_outcome(&huge), 3000 + 200);
    }

    #[test]
    fn test_smart_deal_bonus() {
        let smart = Outcome {
            final_winnings: 1_000.0,
            final_box_value: 10.0,
            ..base_outcome()
        };
        let unlucky = Outcome {
            final_winnings: 1_000.0,
            final_box_value: 35_000.0,
            ..base_outcome()
        };
        assert_eq!(score_outcome(&smart) - score_outcome(&unlucky), 200);
    }

    #[test]
    fn test_guts_and_early_exit() {
        let guts = Outcome {
            round_dealt: 4,
            ..base_outcome()
        };
        let early = Outcome {
            round_dealt: 2,
            ..base_outcome()
        };
        assert_eq!(score_outcome(&guts), 100 + 150);
        assert_eq!(score_outcome(&early), 100 - 50);
    }

    #[test]
    fn test_last_standing_and_highest_bonuses() {
        let o = Outcome {
            is_last_standing: true,
            is_highest_winnings: true,
            ..base_outcome()
        };
        assert_eq!(score_outcome(&o), 100 + 200 + 200);
    }

    #[test]
    fn test_early_exit_applies_even_to_last_standing() {
        // A last-standing player force-settled in round 2 still pays the
        // early-exit penalty.
        let o = Outcome {
            round_dealt: 2,
            is_last_standing: true,
            ..base_outcome()
        };
        assert_eq!(score_outcome(&o), 100 - 50 + 200);
    }

    #[test]
    fn test_timeout_penalty() {
        let o = Outcome {
            timeout_count: 3,
            ..base_outcome()
        };
        assert_eq!(score_outcome(&o), 100 - 150);
    }

    #[test]
    fn test_points_never_negative() {
        let o = Outcome {
            final_winnings: 0.01,
            final_box_value: 75_000.0,
            round_dealt: 1,
            is_last_standing: false,
            is_highest_winnings: false,
            timeout_count: 10,
        };
        assert_eq!(score_outcome(&o), 0);
    }

    #[test]
    fn test_scoring_is_pure() {
        let o = base_outcome();
        assert_eq!(score_outcome(&o), score_outcome(&o));
    }

    fn entry(id: &str, points: i64) -> LeaderEntry {
        LeaderEntry {
            player_id: id.to_string(),
            player_name: id.to_string(),
            amount: 0.0,
            points,
            was_box_value: false,
            rank: 0,
        }
    }

    #[test]
    fn test_ranks_are_dense_and_ordered() {
        let mut entries = vec![entry("a", 100), entry("b", 300), entry("c", 200)];
        assign_ranks(&mut entries);

        let order: Vec<&str> = entries.iter().map(|e| e.player_id.as_str()).collect();
        assert_eq!(order, ["b", "c", "a"]);
        let ranks: Vec<u32> = entries.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, [1, 2, 3]);
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let mut entries = vec![entry("first", 200), entry("second", 200), entry("third", 200)];
        assign_ranks(&mut entries);

        let order: Vec<&str> = entries.iter().map(|e| e.player_id.as_str()).collect();
        assert_eq!(order, ["first", "second", "third"]);
    }
}
