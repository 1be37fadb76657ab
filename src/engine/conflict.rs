use sha2::{Digest, Sha256};

use crate::limits::*;
use crate::model::*;

use super::availability::first_conflict;
use super::EngineError;

pub(crate) fn validate_stay(stay: &Stay) -> Result<(), EngineError> {
    if stay.check_in >= stay.check_out {
        return Err(EngineError::InvalidArgument("check-in date must come before check-out date"));
    }
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

pub(crate) fn validate_guests(adults: u32, children: u32) -> Result<(), EngineError> {
    if adults == 0 {
        return Err(EngineError::InvalidArgument("at least one adult required"));
    }
    if adults.saturating_add(children) > MAX_GUESTS {
        return Err(EngineError::LimitExceeded("too many guests"));
    }
    Ok(())
}

pub(crate) fn validate_text(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

/// Reject `stay` if any booking on the room blocks it.
pub(crate) fn check_no_conflict(rs: &RoomState, stay: &Stay) -> Result<(), EngineError> {
    match first_conflict(rs, stay) {
        Some(existing) => Err(EngineError::Conflict(existing.id)),
        None => Ok(()),
    }
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// `<salt hex>$<sha256(salt || password) hex>`
pub(crate) fn hash_password(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    format!("{}${}", hex::encode(salt), hex::encode(hasher.finalize()))
}

pub(crate) fn verify_password(stored: &str, password: &str) -> bool {
    let Some((salt_hex, _)) = stored.split_once('$') else {
        return false;
    };
    match hex::decode(salt_hex) {
        Ok(salt) => hash_password(&salt, password) == stored,
        Err(_) => false,
    }
}
