//! The pattern-matching rule engine.
//!
//! A [`RuleSet`] is an ordered, append-only list of [`Rule`]s. [`RuleSet::is_allowed`] is
//! the only thing a [`crate::session::Session`] ever asks of it: given the four observable
//! fields of a message, decide allow or deny by checking rules front-to-back and returning
//! on the first full match.

use std::sync::Arc;

use arc_swap::ArcSwap;
use glob::Pattern;
use serde::Deserialize;
use tracing::{trace, warn};

/// Direction a message travels relative to the proxy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Client → broker.
    Outgoing,
    /// Broker → client.
    Incoming,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
        }
    }
}

/// A single glob field in a rule.
///
/// An empty pattern is a no-match sentinel: it denies the field regardless of input,
/// mirroring the upstream proxy's behaviour where an omitted attribute is a deny, not a
/// wildcard. `*` must be given explicitly to wildcard a field.
#[derive(Clone, Debug)]
struct GlobField(String);

impl GlobField {
    fn matches(&self, value: &str) -> bool {
        if self.0.is_empty() {
            return false;
        }
        match Pattern::new(&self.0) {
            Ok(pattern) => pattern.matches(value),
            Err(e) => {
                warn!("invalid glob pattern `{}`: {}", self.0, e);
                false
            }
        }
    }
}

impl From<String> for GlobField {
    fn from(s: String) -> Self {
        GlobField(s)
    }
}

/// The `method` field of a [`Rule`]: either one pattern or a list of patterns, any of
/// which may match.
#[derive(Clone, Debug)]
pub enum MethodField {
    Single(GlobField),
    Any(Vec<GlobField>),
}

impl MethodField {
    fn matches(&self, member: &str) -> bool {
        match self {
            MethodField::Single(p) => p.matches(member),
            MethodField::Any(patterns) => patterns.iter().any(|p| p.matches(member)),
        }
    }
}

/// Wire shape of a rule as delivered by the configuration channel (spec §3, §6).
#[derive(Clone, Debug, Deserialize)]
pub struct RawRule {
    pub direction: String,
    pub interface: String,
    #[serde(rename = "object-path")]
    pub object_path: String,
    pub method: RawMethod,
}

/// `method` may arrive as a bare string or an array of strings.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RawMethod {
    Single(String),
    Many(Vec<String>),
}

/// One entry in the filter list (spec §3).
#[derive(Clone, Debug)]
pub struct Rule {
    direction: GlobField,
    interface: GlobField,
    object_path: GlobField,
    method: MethodField,
}

impl Rule {
    pub fn new(
        direction: impl Into<String>,
        interface: impl Into<String>,
        object_path: impl Into<String>,
        method: MethodField,
    ) -> Self {
        Self {
            direction: direction.into().into(),
            interface: interface.into().into(),
            object_path: object_path.into().into(),
            method,
        }
    }

    fn matches(&self, direction: Direction, interface: &str, path: &str, member: &str) -> bool {
        self.direction.matches(direction.as_str())
            && self.interface.matches(interface)
            && self.object_path.matches(path)
            && self.method.matches(member)
    }

    /// True iff every field but `direction` matches. Used only to emit the diagnostic
    /// the original proxy prints when an operator likely mistyped a direction.
    fn matches_ignoring_direction(&self, interface: &str, path: &str, member: &str) -> bool {
        self.interface.matches(interface) && self.object_path.matches(path) && self.method.matches(member)
    }
}

impl From<RawRule> for Rule {
    fn from(raw: RawRule) -> Self {
        let method = match raw.method {
            RawMethod::Single(s) => MethodField::Single(s.into()),
            RawMethod::Many(v) => MethodField::Any(v.into_iter().map(GlobField::from).collect()),
        };
        Rule::new(raw.direction, raw.interface, raw.object_path, method)
    }
}

/// An ordered, append-only, process-wide list of [`Rule`]s.
///
/// Cloning is cheap: the list itself lives behind an [`Arc`], and updates are published
/// by swapping the `Arc` atomically (via [`ArcSwap`]) so a session mid-evaluation never
/// observes a half-appended fragment (invariant I4).
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    rules: Arc<ArcSwap<Vec<Rule>>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(ArcSwap::from_pointee(Vec::new())),
        }
    }

    /// Append a fragment of rules, preserving the existing order (spec §3: "append, not
    /// replace"). Never removes or reorders previously loaded rules (P5, monotonicity).
    pub fn append(&self, fragment: Vec<Rule>) {
        if fragment.is_empty() {
            return;
        }
        self.rules.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + fragment.len());
            next.extend(current.iter().cloned());
            next.extend(fragment.iter().cloned());
            next
        });
    }

    /// Evaluate `(direction, interface, path, member)` against the current snapshot of
    /// rules, front-to-back, returning on the first full match.
    pub fn is_allowed(&self, direction: Direction, interface: &str, path: &str, member: &str) -> bool {
        let snapshot = self.rules.load();
        for rule in snapshot.iter() {
            if rule.matches(direction, interface, path, member) {
                trace!(
                    "rule matched: direction={:?} interface={} path={} member={}",
                    direction, interface, path, member
                );
                return true;
            }
            if rule.matches_ignoring_direction(interface, path, member) {
                warn!(
                    "direction '{}' does not match but everything else does",
                    direction.as_str()
                );
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.rules.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(direction: &str, interface: &str, path: &str, method: &str) -> Rule {
        Rule::new(direction, interface, path, MethodField::Single(method.to_string().into()))
    }

    #[test]
    fn empty_ruleset_denies_everything() {
        let rules = RuleSet::new();
        assert!(!rules.is_allowed(Direction::Outgoing, "com.example.Foo", "/", "Bar"));
    }

    #[test]
    fn wildcard_rule_allows() {
        let rules = RuleSet::new();
        rules.append(vec![rule("*", "com.example.*", "/com/example/Foo", "DoThing")]);
        assert!(rules.is_allowed(
            Direction::Outgoing,
            "com.example.Svc",
            "/com/example/Foo",
            "DoThing"
        ));
        assert!(!rules.is_allowed(
            Direction::Outgoing,
            "com.example.Svc",
            "/com/example/Bar",
            "DoThing"
        ));
    }

    #[test]
    fn empty_field_denies_regardless_of_wildcards_elsewhere() {
        let rules = RuleSet::new();
        rules.append(vec![rule("outgoing", "", "*", "*")]);
        assert!(!rules.is_allowed(Direction::Outgoing, "com.example.X", "/", "Ping"));
    }

    #[test]
    fn method_array_matches_any_element() {
        let rules = RuleSet::new();
        rules.append(vec![Rule::new(
            "outgoing",
            "*",
            "*",
            MethodField::Any(vec!["Ping".to_string().into(), "Pong".to_string().into()]),
        )]);
        assert!(rules.is_allowed(Direction::Outgoing, "com.example.X", "/", "Pong"));
        assert!(!rules.is_allowed(Direction::Outgoing, "com.example.X", "/", "Ding"));
    }

    #[test]
    fn empty_method_array_matches_nothing() {
        let rules = RuleSet::new();
        rules.append(vec![Rule::new("outgoing", "*", "*", MethodField::Any(vec![]))]);
        assert!(!rules.is_allowed(Direction::Outgoing, "com.example.X", "/", "Ping"));
    }

    #[test]
    fn first_match_wins_and_append_is_monotonic() {
        let rules = RuleSet::new();
        rules.append(vec![rule("outgoing", "*", "*", "*")]);
        assert!(rules.is_allowed(Direction::Outgoing, "com.example.X", "/", "Ping"));
        // Appending a second, narrower fragment must never unmatch what already matched.
        rules.append(vec![rule("outgoing", "com.example.Narrow", "/only", "OnlyThis")]);
        assert!(rules.is_allowed(Direction::Outgoing, "com.example.X", "/", "Ping"));
    }

    #[test]
    fn direction_mismatch_denies_even_if_everything_else_matches() {
        let rules = RuleSet::new();
        rules.append(vec![rule("incoming", "*", "*", "*")]);
        assert!(!rules.is_allowed(Direction::Outgoing, "com.example.X", "/", "Ping"));
    }
}
