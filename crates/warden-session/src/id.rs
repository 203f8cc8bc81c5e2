//! Session identifier generation.
//!
//! Identifiers are three uniform draws from `0..1_000_000` joined with dots.
//! This is a collision-avoidance loop, not a security boundary: callers must
//! hold exclusive access to the live map across generation and insertion.

use std::collections::HashMap;

use rand::Rng;

/// Exclusive upper bound of each identifier component.
pub const ID_PART_RANGE: u32 = 1_000_000;

/// Generate an identifier not currently present in `live`.
///
/// Re-draws until a free value is found.
pub fn generate_session_id<R, V>(rng: &mut R, live: &HashMap<String, V>) -> String
where
    R: Rng,
{
    loop {
        let candidate = format!(
            "{}.{}.{}",
            rng.random_range(0..ID_PART_RANGE),
            rng.random_range(0..ID_PART_RANGE),
            rng.random_range(0..ID_PART_RANGE),
        );
        if !live.contains_key(&candidate) {
            return candidate;
        }
    }
}
