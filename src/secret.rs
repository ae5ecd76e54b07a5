//! Locking and zeroing primitives for the certificate's secret-key buffer.
//!
//! The secret key's bytes live in the record store like any other record
//! (the store stays the single authoritative owner, per the design notes
//! in spec.md §9), but the `sk` record's buffer additionally gets mlock'd
//! for as long as it exists and is explicitly zeroed before release. These
//! are free functions rather than a owning wrapper type for exactly that
//! reason: the `Vec<u8>` they operate on is owned by the record store, not
//! by a second secret-buffer object that would just duplicate it.
//!
//! `mlock` failures (e.g. `RLIMIT_MEMLOCK` exhaustion) are logged and
//! otherwise ignored, matching the original's treatment of
//! `sodium_mlock`'s return value as a best-effort measure, not a
//! correctness requirement.

use zeroize::Zeroize;

/// Locks `buf`'s backing memory against swap. Returns whether the lock
/// succeeded; callers are not required to act on failure.
pub fn lock(buf: &[u8]) -> bool {
    if buf.is_empty() {
        return true;
    }
    let ok = unsafe { memsec::mlock(buf.as_ptr() as *mut u8, buf.len()) };
    if !ok {
        log::debug!("mlock failed for a {}-byte secret buffer; continuing unlocked", buf.len());
    }
    ok
}

/// Zeroes `buf` and releases any `mlock` held on it. Idempotent: calling it
/// on an already-zeroed, unlocked buffer is harmless.
pub fn unlock_and_zero(buf: &mut [u8]) {
    if buf.is_empty() {
        return;
    }
    buf.zeroize();
    unsafe {
        memsec::munlock(buf.as_mut_ptr(), buf.len());
    }
}
