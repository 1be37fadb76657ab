//! Hard limits enforced by the engine and the property manager.

pub const MAX_ROOMS_PER_PROPERTY: usize = 10_000;
pub const MAX_USERS_PER_PROPERTY: usize = 1_000_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 10_000;

/// Longest stay accepted for a single booking.
pub const MAX_STAY_NIGHTS: i64 = 365;
pub const MAX_GUESTS: u32 = 32;

pub const MAX_TEXT_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 4096;

pub const CONFIRMATION_CODE_LEN: usize = 10;
/// Regenerations allowed when a fresh code collides with an existing one.
pub const MAX_CODE_ATTEMPTS: usize = 8;

pub const MAX_PROPERTIES: usize = 1_000;
pub const MAX_PROPERTY_NAME_LEN: usize = 128;
