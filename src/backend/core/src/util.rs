//! Small internal helpers.

/// Simple pseudo-random number generator (0.0 to 1.0).
///
/// Used for retry jitter and the file-sweep coin flip; none of these call
/// sites need cryptographic or even statistical quality, just decorrelation.
pub(crate) fn rand_unit() -> f64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let state = RandomState::new();
    let mut hasher = state.build_hasher();
    hasher.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64,
    );
    (hasher.finish() as f64) / (u64::MAX as f64)
}

/// Current time as fractional unix seconds.
///
/// The file cache tier persists timestamps in this form so entries round-trip
/// across process restarts.
pub(crate) fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
