//! # License Keys
//!
//! A license key is 19 characters in the form `XXXX-XXXX-XXXX-XXXX`:
//! four dash-separated groups of four uppercase hex characters. Keys are
//! generated from the thread RNG and collision-checked by the registry
//! at issue time (the 64-bit space makes collisions rare but not
//! impossible).
//!
//! Malformed input is rejected at construction — there is no lenient
//! parse that could let a differently-shaped string into the registry's
//! key index.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::LicenseError;

/// A validated license key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LicenseKey(String);

impl LicenseKey {
    /// Exact length of the canonical form, dashes included.
    pub const LEN: usize = 19;

    /// Generate a random key.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let groups: Vec<String> = (0..4)
            .map(|_| format!("{:04X}", rng.gen_range(0u32..=0xFFFF)))
            .collect();
        Self(groups.join("-"))
    }

    /// Parse a key from its canonical string form.
    ///
    /// Rejects anything that is not exactly four dash-separated groups
    /// of four uppercase hex characters.
    pub fn parse(s: &str) -> Result<Self, LicenseError> {
        if s.len() != Self::LEN {
            return Err(LicenseError::MalformedKey(s.to_string()));
        }
        let groups: Vec<&str> = s.split('-').collect();
        if groups.len() != 4 {
            return Err(LicenseError::MalformedKey(s.to_string()));
        }
        for group in &groups {
            if group.len() != 4
                || !group
                    .chars()
                    .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
            {
                return Err(LicenseError::MalformedKey(s.to_string()));
            }
        }
        Ok(Self(s.to_string()))
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LicenseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LicenseKey {
    type Error = LicenseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<LicenseKey> for String {
    fn from(key: LicenseKey) -> String {
        key.0
    }
}
