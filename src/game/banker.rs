//! Banker Offer Computation
//!
//! The offer is the mean of the values still in play, scaled by a round
//! modifier that grows as the game progresses, jittered by a uniform
//! factor. Deliberately non-monotonic: the jitter is part of the game.

use crate::core::rng::GameRng;

/// Round modifiers indexed by `min(round - 1, 5)`: the banker starts
/// stingy and converges on (slightly past) fair value.
const BASE_MODIFIERS: [f64; 6] = [0.70, 0.80, 0.90, 0.95, 1.00, 1.05];

/// Lower bound of the jitter factor.
pub const JITTER_MIN: f64 = 0.90;

/// Upper bound of the jitter factor.
pub const JITTER_MAX: f64 = 1.10;

/// Compute the banker's offer for the given remaining values and round.
///
/// Returns the raw amount rounded to the nearest 10 monetary units, or 0
/// when nothing remains. No side effects beyond advancing the RNG.
pub fn compute_offer(remaining: &[f64], round: u32, rng: &mut GameRng) -> f64 {
    if remaining.is_empty() {
        return 0.0;
    }

    let avg = remaining.iter().sum::<f64>() / remaining.len() as f64;
    let modifier = BASE_MODIFIERS[(round.saturating_sub(1) as usize).min(5)];
    let jitter = rng.next_f64_range(JITTER_MIN, JITTER_MAX);

    round_to_ten(avg * modifier * jitter)
}

#[inline]
fn round_to_ten(amount: f64) -> f64 {
    (amount / 10.0).round() * 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_remaining_offers_zero() {
        let mut rng = GameRng::new(1);
        assert_eq!(compute_offer(&[], 1, &mut rng), 0.0);
    }

    #[test]
    fn test_single_value_law() {
        // One value remaining: offer == value * modifier * jitter,
        // rounded to 10. Replay the jitter with a twin RNG.
        let mut rng = GameRng::new(77);
        let mut twin = GameRng::new(77);

        let offer = compute_offer(&[10_000.0], 3, &mut rng);
        let jitter = twin.next_f64_range(JITTER_MIN, JITTER_MAX);
        let expected = (10_000.0 * 0.90 * jitter / 10.0).round() * 10.0;

        assert_eq!(offer, expected);
    }

    #[test]
    fn test_offer_is_rounded_to_ten() {
        let mut rng = GameRng::new(9);
        for round in 1..=8 {
            let offer = compute_offer(&[0.01, 750.0, 35_000.0], round, &mut rng);
            assert_eq!(offer % 10.0, 0.0);
        }
    }

    #[test]
    fn test_offer_within_jitter_bounds() {
        for seed in 0..200 {
            let mut rng = GameRng::new(seed);
            let remaining = [100.0, 1_000.0, 50_000.0];
            let avg = remaining.iter().sum::<f64>() / 3.0;

            let offer = compute_offer(&remaining, 1, &mut rng);
            // round 1 modifier is 0.70; allow 5 for the rounding step
            assert!(offer >= avg * 0.70 * JITTER_MIN - 5.0);
            assert!(offer <= avg * 0.70 * JITTER_MAX + 5.0);
        }
    }

    #[test]
    fn test_modifier_saturates_after_round_six() {
        // Rounds 6 and beyond share the final modifier; with identical
        // seeds the offers must match exactly.
        let offer_r6 = compute_offer(&[500.0, 5_000.0], 6, &mut GameRng::new(4));
        let offer_r9 = compute_offer(&[500.0, 5_000.0], 9, &mut GameRng::new(4));
        assert_eq!(offer_r6, offer_r9);
    }

    #[test]
    fn test_round_zero_treated_as_first() {
        // Defensive: round 0 saturates to the first modifier.
        let a = compute_offer(&[1_000.0], 0, &mut GameRng::new(11));
        let b = compute_offer(&[1_000.0], 1, &mut GameRng::new(11));
        assert_eq!(a, b);
    }
}
