//! Weighted-random operator selection.
//!
//! The draw is intentionally non-deterministic across equal weights: a
//! candidate's probability is `routing_factor / total_weight` and nothing
//! else orders the result. Callers that need reproducibility (tests) pass a
//! seeded RNG.

use rand::Rng;

use crate::models::RoutingCandidate;

/// Sum of candidate weights. Negative factors count as zero; the sum is
/// widened to `u128` so no realistic weight set can overflow.
pub fn total_weight(candidates: &[RoutingCandidate]) -> u128 {
    candidates
        .iter()
        .map(|c| c.routing_factor.max(0) as u128)
        .sum()
}

/// Draw one candidate with probability proportional to its `routing_factor`.
///
/// Cumulative-weight walk over a uniform draw in `[0, total_weight)`. A
/// candidate with weight 0 occupies a slot in the iteration but can never be
/// selected. Returns `None` for an empty set or a zero total weight; both
/// mean "no available operator" to the caller.
pub fn pick_weighted<'a, R: Rng + ?Sized>(
    candidates: &'a [RoutingCandidate],
    rng: &mut R,
) -> Option<&'a RoutingCandidate> {
    let total = total_weight(candidates);
    if total == 0 {
        return None;
    }

    let mut draw = rng.random_range(0..total);
    for candidate in candidates {
        let weight = candidate.routing_factor.max(0) as u128;
        if draw < weight {
            return Some(candidate);
        }
        draw -= weight;
    }

    // Unreachable when total_weight is consistent with the walk above.
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn candidate(operator_id: i64, routing_factor: i64) -> RoutingCandidate {
        RoutingCandidate {
            operator_id,
            routing_factor,
        }
    }

    #[test]
    fn empty_set_yields_none() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(pick_weighted(&[], &mut rng), None);
    }

    #[test]
    fn all_zero_weights_yield_none() {
        let mut rng = StdRng::seed_from_u64(1);
        let candidates = [candidate(1, 0), candidate(2, 0)];
        assert_eq!(pick_weighted(&candidates, &mut rng), None);
        assert_eq!(total_weight(&candidates), 0);
    }

    #[test]
    fn single_candidate_always_wins() {
        let mut rng = StdRng::seed_from_u64(7);
        let candidates = [candidate(5, 1)];
        for _ in 0..100 {
            assert_eq!(
                pick_weighted(&candidates, &mut rng).unwrap().operator_id,
                5
            );
        }
    }

    #[test]
    fn zero_weight_candidate_is_never_drawn() {
        let mut rng = StdRng::seed_from_u64(11);
        let candidates = [candidate(1, 0), candidate(2, 3), candidate(3, 0)];
        for _ in 0..1000 {
            assert_eq!(
                pick_weighted(&candidates, &mut rng).unwrap().operator_id,
                2
            );
        }
    }

    #[test]
    fn draw_frequency_tracks_weight() {
        let mut rng = StdRng::seed_from_u64(42);
        let candidates = [candidate(1, 9), candidate(2, 1)];
        let mut heavy = 0u32;
        let trials = 10_000;
        for _ in 0..trials {
            if pick_weighted(&candidates, &mut rng).unwrap().operator_id == 1 {
                heavy += 1;
            }
        }
        // Expectation is 9000; a wide band keeps the test seed-independent.
        assert!(heavy > 8_500, "heavy candidate drawn only {} times", heavy);
        assert!(heavy < 9_500, "heavy candidate drawn {} times", heavy);
    }

    #[test]
    fn lopsided_weights_still_reach_the_light_candidate() {
        let mut rng = StdRng::seed_from_u64(3);
        let candidates = [candidate(1, 1_000_000_000), candidate(2, 1)];
        let mut saw_heavy = false;
        for _ in 0..100_000 {
            if pick_weighted(&candidates, &mut rng).unwrap().operator_id == 1 {
                saw_heavy = true;
                break;
            }
        }
        assert!(saw_heavy);
    }

    #[test]
    fn huge_weights_do_not_overflow() {
        let mut rng = StdRng::seed_from_u64(9);
        let candidates = [candidate(1, i64::MAX), candidate(2, i64::MAX)];
        assert_eq!(total_weight(&candidates), 2 * (i64::MAX as u128));
        assert!(pick_weighted(&candidates, &mut rng).is_some());
    }

    #[test]
    fn negative_weight_counts_as_zero() {
        let mut rng = StdRng::seed_from_u64(13);
        let candidates = [candidate(1, -5), candidate(2, 2)];
        for _ in 0..100 {
            assert_eq!(
                pick_weighted(&candidates, &mut rng).unwrap().operator_id,
                2
            );
        }
    }
}
