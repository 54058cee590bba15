//! Time-bucketed request signature (`Sec-MS-GEC`).
//!
//! The endpoint expects a signature it can recompute independently: the
//! current time as a Windows FILETIME tick counter, floored to a 5-minute
//! window, concatenated with the shared trusted-client token and hashed.
//! The derivation is pure and stateless; it is recomputed per connection
//! attempt rather than cached across windows.

use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use crate::TRUSTED_CLIENT_TOKEN;

/// Seconds between 1601-01-01T00:00:00Z (the FILETIME epoch) and the Unix
/// epoch.
const FILETIME_EPOCH_OFFSET_SECS: u64 = 11_644_473_600;

/// FILETIME resolution: 100 ns ticks.
const TICKS_PER_SECOND: u64 = 10_000_000;

/// Signature window: 3e9 ticks = 300 s = 5 minutes.
pub const SIGNATURE_WINDOW_TICKS: u64 = 3_000_000_000;

/// Converts a wall-clock time to 100-nanosecond ticks since the FILETIME
/// epoch.
pub fn filetime_ticks(now: SystemTime) -> u64 {
    let since_unix = now.duration_since(UNIX_EPOCH).unwrap_or_default();
    (since_unix.as_secs() + FILETIME_EPOCH_OFFSET_SECS) * TICKS_PER_SECOND
        + u64::from(since_unix.subsec_nanos()) / 100
}

/// Derives the `Sec-MS-GEC` signature for the window containing `now`.
///
/// The value is the uppercase hex SHA-256 digest of the floored tick count
/// (ASCII decimal) immediately followed by the trusted-client token, with no
/// separator. Any two times inside the same 5-minute window produce the same
/// signature; crossing a window boundary changes it deterministically.
pub fn sec_ms_gec(now: SystemTime) -> String {
    let ticks = filetime_ticks(now);
    let bucketed = ticks - ticks % SIGNATURE_WINDOW_TICKS;
    let digest = Sha256::digest(format!("{bucketed}{TRUSTED_CLIENT_TOKEN}").as_bytes());
    hex::encode_upper(digest)
}
