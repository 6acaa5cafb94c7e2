//! Collision-resistant identifiers for fixture copies and remote prefixes.

use crate::SetupError;
use std::fmt;

/// Number of random bytes behind each identifier (10 hex characters).
pub const RUN_ID_BYTES: usize = 5;

/// A short lowercase hex string drawn from the OS entropy source.
///
/// Generated fresh per request and never reused. No registry is kept:
/// at tens of concurrent scenarios the collision probability is negligible.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunIdentifier(String);

impl RunIdentifier {
    /// Draws a new identifier.
    ///
    /// # Errors
    ///
    /// Returns `SetupError::Entropy` if the OS entropy source is unavailable.
    /// Isolation cannot be guaranteed without it, so callers must abort.
    pub fn generate() -> Result<Self, SetupError> {
        let mut bytes = [0u8; RUN_ID_BYTES];
        getrandom::getrandom(&mut bytes).map_err(|e| SetupError::Entropy(e.to_string()))?;
        Ok(Self::from_bytes(&bytes))
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
