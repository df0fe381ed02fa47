//! Validated connection identities for transport clients
//!
//! Every transport client validates its own identifier through [`ChannelId`]
//! before any connection attempt is made. A malformed identity is a permanent
//! caller error, never retried.

use crate::error::NetworkError;
use std::fmt;
use std::str::FromStr;

/// A bounded-length, character-restricted connection identifier
///
/// Valid identities are 1 to 23 bytes long when UTF-8 encoded and consist
/// only of ASCII letters and digits. The invariant is enforced at
/// construction; an instance can never hold an invalid value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId(String);

impl ChannelId {
    /// Maximum identity length in UTF-8 bytes
    pub const MAX_BYTES: usize = 23;

    /// Validate a candidate string and construct the identity
    ///
    /// # Errors
    ///
    /// Returns `NetworkError::InvalidIdentity` naming the rule that broke:
    /// empty input, more than 23 bytes, or a character outside `[0-9A-Za-z]`.
    pub fn new(candidate: &str) -> Result<Self, NetworkError> {
        if candidate.is_empty() {
            return Err(NetworkError::InvalidIdentity(
                "identity must not be empty".to_string(),
            ));
        }

        if candidate.len() > Self::MAX_BYTES {
            return Err(NetworkError::InvalidIdentity(format!(
                "identity '{}' exceeds {} bytes",
                candidate,
                Self::MAX_BYTES
            )));
        }

        if let Some(bad) = candidate.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(NetworkError::InvalidIdentity(format!(
                "identity '{}' contains invalid character '{}'",
                candidate, bad
            )));
        }

        Ok(Self(candidate.to_string()))
    }

    /// The validated identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChannelId {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}


// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    /// Generate strings drawn from the valid character class with valid length
    #[derive(Debug, Clone)]
    struct ValidCandidate(String);

    impl Arbitrary for ValidCandidate {
        fn arbitrary(g: &mut Gen) -> Self {
            const ALPHABET: &[u8] =
                b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
            let len = usize::arbitrary(g) % ChannelId::MAX_BYTES + 1;
            let s: String = (0..len)
                .map(|_| ALPHABET[usize::arbitrary(g) % ALPHABET.len()] as char)
                .collect();
            ValidCandidate(s)
        }
    }

    #[quickcheck]
    fn prop_valid_candidates_accepted_and_preserved(candidate: ValidCandidate) -> bool {
        match ChannelId::new(&candidate.0) {
            Ok(id) => id.as_str() == candidate.0,
            Err(_) => false,
        }
    }

    #[quickcheck]
    fn prop_arbitrary_strings_never_violate_invariant(s: String) -> bool {
        match ChannelId::new(&s) {
            Ok(id) => {
                !id.as_str().is_empty()
                    && id.as_str().len() <= ChannelId::MAX_BYTES
                    && id.as_str().chars().all(|c| c.is_ascii_alphanumeric())
            }
            // Rejection is the correct outcome for anything outside the rules
            Err(_) => {
                s.is_empty()
                    || s.len() > ChannelId::MAX_BYTES
                    || s.chars().any(|c| !c.is_ascii_alphanumeric())
            }
        }
    }
}
