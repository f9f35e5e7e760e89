//! Thin wrapper around the system RNG so call sites don't each pull in
//! `rand::Rng` directly.

use rand::RngCore;

/// Fills `out` with cryptographically-irrelevant-but-unpredictable random
/// bytes (used for the per-request/reply nonce, never for key material).
#[inline]
pub fn fill(out: &mut [u8]) {
    rand::thread_rng().fill_bytes(out);
}
