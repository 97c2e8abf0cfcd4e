//! Trace identifiers and sampling priorities.

/// Random 16-hex-digit span / transaction id.
pub fn new_guid() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

/// Random 32-hex-digit trace id.
pub fn new_trace_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// Sampling priority for a new trace.
///
/// A uniform draw in `[0, 1)` truncated to six decimals; sampled traces get
/// `+1.0` so they always outrank unsampled ones in the event reservoir.
pub fn new_priority(sampled: bool) -> f64 {
    let base = (rand::random::<f64>() * 1_000_000.0).trunc() / 1_000_000.0;
    if sampled { base + 1.0 } else { base }
}
