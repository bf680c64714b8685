// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Crockford base32 alphabet (no I, L, O, U).
const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// 48-bit millisecond timestamp + 80 bits of entropy.
const RAND_BITS: u32 = 80;
const RAND_MASK: u128 = (1 << RAND_BITS) - 1;

/// (last timestamp, last random part) — guarded so ids produced within the
/// same millisecond still sort in generation order.
static LAST: Mutex<(u64, u128)> = Mutex::new((0, 0));

/// Generate a 26-character sortable id.
///
/// Lexicographic order equals generation order: the timestamp occupies the
/// high bits, and within one millisecond the random part is incremented
/// rather than redrawn.  Entropy comes from [`uuid::Uuid::new_v4`], which
/// is already this workspace's randomness source.
pub fn ulid() -> String {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let value = {
        let mut last = LAST.lock().unwrap_or_else(|p| p.into_inner());
        let rand = if last.0 == now_ms {
            // Same millisecond: bump instead of redraw.  Wrap-around after
            // 2^80 ids per ms is not a practical concern.
            last.1.wrapping_add(1) & RAND_MASK
        } else {
            uuid::Uuid::new_v4().as_u128() & RAND_MASK
        };
        *last = (now_ms, rand);
        ((now_ms as u128) << RAND_BITS) | rand
    };

    encode(value)
}

/// Encode a 128-bit value as 26 Crockford base32 characters (130 bits of
/// capacity; the leading character carries the 2 spare zero bits).
fn encode(value: u128) -> String {
    let mut out = [0u8; 26];
    for (i, slot) in out.iter_mut().enumerate() {
        // Top character's shift is 125, so the 2 spare bits are always 0.
        let shift = 5 * (25 - i) as u32;
        *slot = ALPHABET[((value >> shift) & 0x1f) as usize];
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
