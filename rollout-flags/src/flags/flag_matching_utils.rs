/// Maps an identifier to a stable bucket in `0..=99`.
///
/// Rolling 32-bit hash over the UTF-16 code units of the identifier
/// (`hash * 31 + unit`, wrapping), then `|hash| % 100`. The same identifier
/// lands in the same bucket across calls and restarts, which is what keeps a
/// user's rollout assignment sticky as the percentage grows. The empty string
/// is bucket 0.
pub fn calculate_bucket(identifier: &str) -> u8 {
    let hash = identifier.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit))
    });

    // unsigned_abs so i32::MIN doesn't overflow; < 100 always fits a u8
    (hash.unsigned_abs() % 100) as u8
}

/// True when the identifier's bucket falls below `rollout_percentage`.
pub fn is_in_rollout(identifier: &str, rollout_percentage: u8) -> bool {
    calculate_bucket(identifier) < rollout_percentage
}
