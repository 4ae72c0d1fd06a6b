use crate::ast::Position;
use crate::matcher::{Binding, BindingSet};
use crate::patterns::Severity;
use crate::rules::{Metadata, Rule};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$[A-Z_][A-Z0-9_]*").expect("placeholder regex is valid"));

/// One reported location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub rule_id: String,
    pub path: String,
    pub start: Position,
    pub end: Position,
    #[serde(skip)]
    pub start_byte: usize,
    #[serde(skip)]
    pub end_byte: usize,
    pub bindings: BTreeMap<String, Binding>,
    pub message: String,
    pub severity: Severity,
    pub metadata: Arc<Metadata>,
}

impl Match {
    pub fn new(rule: &Rule, path: &str, found: BindingSet) -> Self {
        Match {
            rule_id: rule.id.clone(),
            path: path.to_owned(),
            start: found.span.start,
            end: found.span.end,
            start_byte: found.span.start_byte,
            end_byte: found.span.end_byte,
            message: render_message(&rule.message, &found.bindings),
            bindings: found.bindings,
            severity: rule.severity,
            metadata: Arc::clone(&rule.metadata),
        }
    }

    fn sort_key(&self) -> (&str, usize, &str, usize) {
        (&self.path, self.start_byte, &self.rule_id, self.end_byte)
    }
}

/// Replace each `$NAME` with the text bound to it. Unbound names stay as
/// written.
pub fn render_message(template: &str, bindings: &BTreeMap<String, Binding>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[0];
            bindings
                .get(name)
                .map_or_else(|| name.to_owned(), |b| b.text.clone())
        })
        .into_owned()
}

/// Collects matches from any number of producers. Ordering and
/// de-duplication happen once, in [`Aggregator::finish`].
#[derive(Debug, Default)]
pub struct Aggregator {
    pending: Vec<Match>,
}

impl Aggregator {
    pub fn push(&mut self, m: Match) {
        self.pending.push(m);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn finish(mut self) -> MatchSet {
        self.pending.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        self.pending.dedup_by(|a, b| a.sort_key() == b.sort_key());
        MatchSet {
            matches: self.pending,
        }
    }
}

impl Extend<Match> for Aggregator {
    fn extend<I: IntoIterator<Item = Match>>(&mut self, iter: I) {
        self.pending.extend(iter);
    }
}

/// Final results ordered by (path, start, rule id), one entry per
/// (rule id, path, span).
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MatchSet {
    matches: Vec<Match>,
}

impl MatchSet {
    pub fn iter(&self) -> std::slice::Iter<'_, Match> {
        self.matches.iter()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Distinct rendered messages, in result order.
    pub fn detections(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.matches
            .iter()
            .map(|m| m.message.as_str())
            .filter(|msg| seen.insert(*msg))
            .collect()
    }
}

impl<'a> IntoIterator for &'a MatchSet {
    type Item = &'a Match;
    type IntoIter = std::slice::Iter<'a, Match>;

    fn into_iter(self) -> Self::IntoIter {
        self.matches.iter()
    }
}
