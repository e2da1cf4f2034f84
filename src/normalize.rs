//! Consistent hashing used for gradual rollouts and variant distribution.
use std::io::Cursor;

use murmur3::murmur3_32;

/// Seed used by rollout strategies.
pub const STRATEGY_SEED: u32 = 0;

/// Seed used for variant distribution, so that a user's variant bucket is independent of its
/// rollout bucket.
pub const VARIANT_SEED: u32 = 86028157;

/// Map `identifier` within `group_id` onto `[1, modulus]`.
///
/// The result must be identical across client libraries for the same inputs, so that a given
/// user lands in the same rollout bucket regardless of the SDK that evaluates the toggle.
pub fn normalized_value(identifier: &str, group_id: &str, modulus: u32, seed: u32) -> u32 {
    if modulus == 0 {
        return 0;
    }
    let input = format!("{group_id}:{identifier}");
    // Reading from an in-memory buffer cannot fail.
    let hash = murmur3_32(&mut Cursor::new(input.as_bytes()), seed).unwrap_or(0);
    hash % modulus + 1
}
