//! Fractional-index allocation for block ordering.
//!
//! Blocks carry a real-valued `order`; inserting between two neighbours takes
//! their midpoint, so no sibling is ever renumbered.
//!
//! Known limitation: repeated midpoint inserts at the same spot halve the gap
//! each time, and after roughly 50 of them two `f64` neighbours have no value
//! strictly between them. Nothing rebalances; [`has_room_between`] lets a
//! caller detect the condition.

/// Order assigned to the first block of an empty conversation.
pub const FIRST_ORDER: f64 = 1.0;

/// Compute an order key between `prev` and `next`.
///
/// - both present: their mean
/// - only `prev` (append): `prev + 1`
/// - only `next` (prepend): `next - 1`
/// - neither: [`FIRST_ORDER`]
#[must_use]
pub fn allocate_order(prev: Option<f64>, next: Option<f64>) -> f64 {
    match (prev, next) {
        (Some(prev), Some(next)) => (prev + next) / 2.0,
        (Some(prev), None) => prev + 1.0,
        (None, Some(next)) => next - 1.0,
        (None, None) => FIRST_ORDER,
    }
}

/// Whether a value strictly between `prev` and `next` still exists.
#[must_use]
pub fn has_room_between(prev: f64, next: f64) -> bool {
    let mid = allocate_order(Some(prev), Some(next));
    prev < mid && mid < next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries() {
        assert!((allocate_order(Some(5.0), None) - 6.0).abs() < f64::EPSILON);
        assert!((allocate_order(None, Some(5.0)) - 4.0).abs() < f64::EPSILON);
        assert!((allocate_order(None, None) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_midpoint_strictly_between() {
        let pairs = [(1.0, 2.0), (-3.5, 7.25), (0.0, 1e-9), (1e12, 1e12 + 1.0)];
        for (prev, next) in pairs {
            let mid = allocate_order(Some(prev), Some(next));
            assert!(prev < mid && mid < next, "{prev} < {mid} < {next}");
        }
    }

    #[test]
    fn test_repeated_inserts_eventually_exhaust_precision() {
        let prev = 1.0;
        let mut next = 2.0;
        let mut inserts = 0;
        while has_room_between(prev, next) {
            next = allocate_order(Some(prev), Some(next));
            inserts += 1;
        }
        assert!(inserts >= 50);
    }
}
