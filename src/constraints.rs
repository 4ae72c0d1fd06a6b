use crate::errors::{WiretapError, WiretapResult};
use crate::matcher::BindingSet;
use regex::Regex;

/// Post-bind filter over one metavariable.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// The bound text must fully match `regex`.
    MetavariableRegex {
        metavariable: String,
        /// As written in the rule file.
        pattern: String,
        /// `pattern`, anchored at both ends.
        regex: Regex,
    },
}

impl Constraint {
    pub fn metavariable_regex(rule_id: &str, metavariable: &str, pattern: &str) -> WiretapResult<Self> {
        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|source| WiretapError::InvalidRegex {
            rule_id: rule_id.to_owned(),
            source,
        })?;
        Ok(Constraint::MetavariableRegex {
            metavariable: metavariable.to_owned(),
            pattern: pattern.to_owned(),
            regex,
        })
    }

    pub fn metavariable(&self) -> &str {
        match self {
            Constraint::MetavariableRegex { metavariable, .. } => metavariable,
        }
    }

    pub fn check(&self, bindings: &BindingSet) -> WiretapResult<bool> {
        match self {
            Constraint::MetavariableRegex {
                metavariable,
                regex,
                ..
            } => {
                let bound = bindings
                    .get(metavariable)
                    .ok_or_else(|| WiretapError::UnboundMetavariable(metavariable.clone()))?;
                Ok(regex.is_match(&bound.text))
            }
        }
    }
}

/// All constraints must hold. A constraint whose metavariable did not bind
/// in this attempt counts as failed.
pub fn evaluate(constraints: &[Constraint], bindings: &BindingSet) -> bool {
    constraints.iter().all(|c| match c.check(bindings) {
        Ok(pass) => {
            if !pass {
                tracing::trace!(metavariable = c.metavariable(), "constraint rejected match");
            }
            pass
        }
        Err(e) => {
            tracing::trace!("{e}; treating as constraint failure");
            false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Position, Span};
    use crate::matcher::Binding;
    use std::collections::BTreeMap;

    fn bindings(pairs: &[(&str, &str)]) -> BindingSet {
        let span = Span {
            start_byte: 0,
            end_byte: 0,
            start: Position { line: 1, col: 1 },
            end: Position { line: 1, col: 1 },
        };
        let bindings: BTreeMap<_, _> = pairs
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    Binding {
                        span,
                        text: v.to_string(),
                    },
                )
            })
            .collect();
        BindingSet { span, bindings }
    }

    #[test]
    fn regex_must_match_the_whole_binding() {
        let c = Constraint::metavariable_regex("r", "$LIBRARY", "(request|got|superagent)").unwrap();
        assert!(c.check(&bindings(&[("$LIBRARY", "got")])).unwrap());
        assert!(!c.check(&bindings(&[("$LIBRARY", "axios")])).unwrap());
        assert!(!c.check(&bindings(&[("$LIBRARY", "gotcha")])).unwrap());
        assert!(!c.check(&bindings(&[("$LIBRARY", "forgot")])).unwrap());
    }

    #[test]
    fn unbound_metavariable_fails_without_panicking() {
        let c = Constraint::metavariable_regex("r", "$MISSING", ".*").unwrap();
        let b = bindings(&[("$OTHER", "x")]);
        assert!(matches!(c.check(&b), Err(WiretapError::UnboundMetavariable(_))));
        assert!(!evaluate(&[c], &b));
    }

    #[test]
    fn constraints_combine_with_and() {
        let a = Constraint::metavariable_regex("r", "$MOD", "https?").unwrap();
        let b = Constraint::metavariable_regex("r", "$METHOD", "get|request").unwrap();
        let set = [a, b];
        assert!(evaluate(&set, &bindings(&[("$MOD", "https"), ("$METHOD", "get")])));
        assert!(!evaluate(&set, &bindings(&[("$MOD", "https"), ("$METHOD", "post")])));
        assert!(evaluate(&[], &bindings(&[])));
    }

    #[test]
    fn bad_regex_is_a_compile_error() {
        let err = Constraint::metavariable_regex("r", "$X", "(unclosed").unwrap_err();
        assert!(matches!(err, WiretapError::InvalidRegex { .. }));
    }
}
