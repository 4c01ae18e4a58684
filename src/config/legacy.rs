//! Deprecated alternative configuration loader, kept for migrating old configuration.
//!
//! Accepts two historical shapes (spec §6, §9):
//!
//! * a JSON record using the unscoped key `dbus-proxy-config` instead of
//!   `dbus-gateway-config-<section>`;
//! * a line-oriented plain-text rule, `direction;interface;path;member`, one rule per
//!   line.
//!
//! This loader is never auto-detected: an operator must opt into it explicitly, and it
//! must not be run in the same process as [`super::loader`] — mixing the two formats in
//! one run is a configuration error, not a merge.

use std::io::BufRead;

use serde_json::Value;
use tracing::warn;

use crate::{
    error::ConfigError,
    rules::{RawRule, Rule, RuleSet},
};

const LEGACY_KEY: &str = "dbus-proxy-config";

/// Consume `reader` line by line, appending whatever rules each line yields.
///
/// A line is tried as a JSON object first (to support the unscoped `dbus-proxy-config`
/// key); if that fails, it is tried as a `;`-separated plain-text rule. Blank lines and
/// lines that match neither shape are logged and skipped.
pub fn load_from_reader<R: BufRead>(reader: R, rules: &RuleSet) {
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("stopping legacy configuration loader: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Ok(fragment) => rules.append(fragment),
            Err(e) => warn!("discarding legacy configuration line: {}", e),
        }
    }
}

fn parse_line(line: &str) -> Result<Vec<Rule>, ConfigError> {
    if line.starts_with('{') {
        parse_json_line(line)
    } else {
        parse_plain_text_line(line).map(|rule| vec![rule])
    }
}

fn parse_json_line(line: &str) -> Result<Vec<Rule>, ConfigError> {
    let value: Value = serde_json::from_str(line).map_err(ConfigError::InvalidJson)?;
    let array = value
        .get(LEGACY_KEY)
        .ok_or_else(|| ConfigError::MissingSection {
            expected: LEGACY_KEY.to_string(),
        })?
        .as_array()
        .ok_or_else(|| ConfigError::SectionNotArray {
            section: LEGACY_KEY.to_string(),
        })?;

    let mut rules = Vec::with_capacity(array.len());
    for entry in array {
        match serde_json::from_value::<RawRule>(entry.clone()) {
            Ok(raw) => rules.push(Rule::from(raw)),
            Err(e) => warn!("skipping malformed legacy rule: {}", e),
        }
    }
    Ok(rules)
}

/// `direction;interface;path;member`, with no quoting or escaping.
fn parse_plain_text_line(line: &str) -> Result<Rule, ConfigError> {
    let fields: Vec<&str> = line.split(';').collect();
    let [direction, interface, path, member] = fields.as_slice() else {
        return Err(ConfigError::MalformedLegacyLine {
            line: line.to_string(),
        });
    };
    Ok(Rule::new(
        *direction,
        *interface,
        *path,
        crate::rules::MethodField::Single(member.to_string().into()),
    ))
}
