use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use super::EngineError;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Public lookup key of a booking. Opaque, alphanumeric, immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfirmationCode(String);

impl ConfirmationCode {
    /// Accept a client-supplied code if it could have been issued by us.
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        if s.is_empty() || s.len() > crate::limits::MAX_TEXT_LEN {
            return Err(EngineError::InvalidArgument("confirmation code length"));
        }
        if !s.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(EngineError::InvalidArgument("confirmation code must be alphanumeric"));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ConfirmationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Random source handed to the engine at construction.
///
/// Uniqueness of the generated codes is probabilistic; the engine enforces it
/// against its code index and regenerates on collision.
pub struct CodeGenerator {
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl CodeGenerator {
    pub fn new(rng: impl RngCore + Send + 'static) -> Self {
        Self {
            rng: Mutex::new(Box::new(rng)),
        }
    }

    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    /// Deterministic sequence, for tests and benchmarks.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    pub fn generate(&self, length: usize) -> Result<ConfirmationCode, EngineError> {
        if length == 0 {
            return Err(EngineError::InvalidArgument("confirmation code length must be positive"));
        }
        let mut rng = self.rng.lock();
        let code: String = (0..length)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect();
        Ok(ConfirmationCode(code))
    }

    /// Fill `buf` from the same source (password salts).
    pub fn fill_bytes(&self, buf: &mut [u8]) {
        self.rng.lock().fill_bytes(buf);
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::from_entropy()
    }
}
