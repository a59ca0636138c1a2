use rand::{rngs::OsRng, RngCore};
use time::{Duration, OffsetDateTime};

/// Random bytes per one-time token (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Reset links stay valid this long.
pub const RESET_TOKEN_TTL: Duration = Duration::hours(1);

/// Opaque hex string for email verification and password reset links.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn reset_expiry(now: OffsetDateTime) -> OffsetDateTime {
    now + RESET_TOKEN_TTL
}
