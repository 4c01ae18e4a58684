//! The authoritative JSON configuration loader.
//!
//! Reads a stream of concatenated JSON documents of the shape
//! `{ "dbus-gateway-config-<section>": [ Rule, ... ] }` and appends each record's array
//! to the active [`RuleSet`] (spec §6). A malformed individual rule is logged and
//! skipped; the record's well-formed rules are still appended (spec §9's resolution of
//! the "stop at first malformed rule" open question).

use std::io::Read;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    error::ConfigError,
    rules::{RawRule, Rule, RuleSet},
};

use super::Section;

/// Spawn the loader on a blocking thread, reading from standard input until EOF or a
/// hangup, and appending to `rules` as records arrive. Loader termination (EOF/HUP)
/// does not terminate the proxy (spec §6): the returned handle may simply be dropped or
/// awaited for diagnostics.
pub fn spawn(rules: RuleSet, section: Section) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        load_from_reader(stdin.lock(), section, &rules);
        info!("configuration loader stopped (end of input)");
    })
}

/// Consume `reader` to completion, appending each record's rules to `rules`.
///
/// Exposed separately from [`spawn`] so tests can feed an in-memory buffer instead of
/// standard input.
pub fn load_from_reader<R: Read>(reader: R, section: Section, rules: &RuleSet) {
    let stream = serde_json::Deserializer::from_reader(reader).into_iter::<Value>();
    for item in stream {
        match item {
            Ok(value) => match parse_record(&value, section) {
                Ok(fragment) => {
                    debug!("loaded {} rule(s) from configuration record", fragment.len());
                    rules.append(fragment);
                }
                Err(e) => warn!("discarding configuration record: {}", e),
            },
            Err(e) => {
                if e.is_eof() {
                    break;
                }
                warn!("stopping configuration loader: invalid JSON: {}", e);
                break;
            }
        }
    }
}

/// Parse one JSON record into the rules it contributes, per [`Section`].
fn parse_record(value: &Value, section: Section) -> Result<Vec<Rule>, ConfigError> {
    let key = section.config_key();
    let section_value = value
        .get(&key)
        .ok_or_else(|| ConfigError::MissingSection { expected: key.clone() })?;
    let array = section_value
        .as_array()
        .ok_or_else(|| ConfigError::SectionNotArray { section: key.clone() })?;

    let mut rules = Vec::with_capacity(array.len());
    for (index, entry) in array.iter().enumerate() {
        match serde_json::from_value::<RawRule>(entry.clone()) {
            Ok(raw) => rules.push(Rule::from(raw)),
            Err(e) => {
                warn!("skipping malformed rule at index {}: {}", index, e);
                continue;
            }
        }
    }
    Ok(rules)
}
