//! Configuration ingestion: turns the newline-delimited JSON stream on standard input
//! (spec §6) into appends to a [`crate::rules::RuleSet`].
//!
//! The JSON loader ([`loader`]) is authoritative. A deprecated line-oriented loader
//! ([`legacy`]) exists for migrating old configuration and is never auto-detected or
//! mixed with the JSON loader in the same run (spec §9's resolution of the historical
//! line format open question).

pub mod legacy;
pub mod loader;

use std::fmt;

/// Which bus the proxy is fronting; scopes which section of the configuration stream
/// applies (spec §6: `<bus-type>` is exactly `session` or `system`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Section {
    Session,
    System,
}

impl Section {
    /// The JSON key a configuration record must use for this section, e.g.
    /// `dbus-gateway-config-session`.
    pub fn config_key(self) -> String {
        format!("dbus-gateway-config-{}", self.as_str())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Section::Session => "session",
            Section::System => "system",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Section {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(Section::Session),
            "system" => Ok(Section::System),
            other => Err(format!(
                "must give bus type as `session` or `system`, got `{other}`"
            )),
        }
    }
}
