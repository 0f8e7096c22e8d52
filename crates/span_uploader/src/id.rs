//! Random hex identifiers for traces, spans and storage keys.

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

const MASK_63: u64 = i64::MAX as u64;

/// 16 lowercase hex chars from 63 random bits. Used for span ids and
/// attachment storage keys.
pub fn gen_16_char_id() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>() & MASK_63)
}

/// 32 lowercase hex chars; the high half is seeded with the current time.
pub fn gen_32_char_id() -> String {
    let mut rng = rand::thread_rng();
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let high = now.wrapping_add(rng.gen::<u64>()) & MASK_63;
    let low = rng.gen::<u64>() & MASK_63;
    format!("{high:016x}{low:016x}")
}
