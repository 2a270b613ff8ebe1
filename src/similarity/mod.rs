//! Distance-to-similarity transforms.
//!
//! Every scorer sub-score funnels through one of these two functions: a
//! real-valued "distance from the ideal" goes in, a bounded [0,1] score
//! comes out. Both are pure and symmetric in the sign of the distance.

/// Seconds in a day, the mean range used for temporal proximity scoring.
pub const DAY_IN_SECONDS: f64 = 24.0 * 60.0 * 60.0;

/// Score a distance that can grow without bound (e.g. seconds until an event).
///
/// A distance of 0 scores exactly 1.0, a distance of `mean_range` scores
/// close to 0.5, and the score approaches 0 asymptotically as the distance
/// grows. `exponent` sharpens the falloff (1.0 = linear in the normalized
/// distance).
pub fn score_from_unbounded_distance(distance: f64, mean_range: f64, exponent: f64) -> f64 {
    (1.0 - normalize_unbounded_distance(distance, mean_range)).powf(exponent)
}

/// Score a distance that wraps modulo `period` (e.g. hours around a clock).
///
/// The wrapped distance is folded into `[0, period / 2]` and normalized
/// linearly, so opposite points on the cycle score 0 and coincident points
/// score 1. Periodic: adding any multiple of `period` to the distance leaves
/// the score unchanged.
pub fn score_from_cyclic_distance(distance: f64, period: f64, exponent: f64) -> f64 {
    (1.0 - normalize_cyclic_distance(distance, period)).powf(exponent)
}

/// Map an unbounded distance into [0,1), with `mean_range` mapping to 0.5.
fn normalize_unbounded_distance(distance: f64, mean_range: f64) -> f64 {
    2.0 / (1.0 + (-distance.abs() / mean_range).exp()) - 1.0
}

/// Map a cyclic distance into [0,1] by folding it into half a period.
fn normalize_cyclic_distance(distance: f64, period: f64) -> f64 {
    let half = period / 2.0;
    let wrapped = ((distance % period) + period) % period;
    let folded = if wrapped > half {
        period - wrapped
    } else {
        wrapped
    };
    folded / half
}
