//! Session-local tracking of peers that have asked to eavesdrop.
//!
//! A peer becomes a known eavesdropper by sending `AddMatch` with `eavesdrop=true` (or
//! `eavesdrop='true'`) in its match string (spec §4.2). While a unique name is tracked
//! here, messages addressed to other peers that would otherwise be forwarded to it are
//! dropped instead (P3) — the proxy does not let a `dbus-monitor`-style connection see
//! traffic it isn't the addressee of.

use std::collections::HashSet;

use parking_lot::RwLock;

/// Returns true iff an `AddMatch` argument string requests eavesdropping.
///
/// No further parsing of the match rule is required by spec (§4.2): only the substring
/// is checked, matching both quoting styles the D-Bus match-rule grammar allows.
pub fn requests_eavesdrop(add_match_arg: &str) -> bool {
    add_match_arg.contains("eavesdrop=true") || add_match_arg.contains("eavesdrop='true'")
}

/// The set of unique names currently believed to be monitoring traffic, for one session.
#[derive(Debug, Default)]
pub struct EavesdropperSet {
    names: RwLock<HashSet<String>>,
}

impl EavesdropperSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.read().contains(name)
    }

    /// Idempotent: adding an already-tracked name is a no-op.
    pub fn add(&self, name: impl Into<String>) {
        self.names.write().insert(name.into());
    }

    /// Returns whether a removal actually occurred (invariant I3: an entry is cleared
    /// as soon as the broker announces the name has been reacquired).
    pub fn remove(&self, name: &str) -> bool {
        self.names.write().remove(name)
    }
}
