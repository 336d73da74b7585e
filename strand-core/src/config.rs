//! Engine configuration.
//!
//! The only knob is whether rule violations assert (development) or recover
//! on a best-effort basis (release). Hosts usually embed this in their own
//! settings file, hence the serde derive.

use serde::{Deserialize, Serialize};

use crate::error::Violation;

/// Configuration shared by the hook dispatcher and the atom store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Panic on reconciliation violations and on cycles met while
    /// invalidating, instead of logging and recovering.
    ///
    /// A cyclic [`AtomStore::read`](crate::atoms::AtomStore::read) panics
    /// whatever this says: there is no value to hand back. Producers that
    /// can recover use [`AtomContext::try_read`](crate::atoms::AtomContext::try_read).
    pub strict: bool,
}

impl EngineConfig {
    /// Development configuration: violations panic.
    pub const fn strict() -> Self {
        Self { strict: true }
    }

    /// Release configuration: violations are logged and healed.
    pub const fn lenient() -> Self {
        Self { strict: false }
    }

    /// Parse a configuration from a JSON document. Missing fields fall back
    /// to [`EngineConfig::default`].
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }

    /// Route a violation through the assertion channel.
    ///
    /// # Panics
    ///
    /// Panics with the violation's message when `strict` is set.
    pub fn report(&self, violation: &Violation) {
        if self.strict {
            panic!("{violation}");
        }
        tracing::warn!(%violation, "recovering from hook reconciliation violation");
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict: cfg!(debug_assertions),
        }
    }
}
