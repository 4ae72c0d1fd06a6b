use crate::commands::load_rules;
use crate::constraints::Constraint;
use crate::errors::WiretapResult;
use crate::rules::{Rule, RuleSet};
use crate::utils::Config;
use console::style;
use std::io::{self, Write};

pub fn handle(verbose: bool, config: &Config) -> WiretapResult<()> {
    let set = load_rules(config)?;
    let stdout = io::stdout();
    render(&set, verbose, &mut stdout.lock())?;
    Ok(())
}

fn render(set: &RuleSet, verbose: bool, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{}", style("Active rules").blue().bold().underlined())?;

    if set.is_empty() {
        writeln!(out, "  {}", style("∅ No rules loaded").dim())?;
        return Ok(());
    }

    for rule in set.iter() {
        writeln!(out, "  {:40} [{}]", style(&rule.id).white().bold(), rule.severity)?;
        if verbose {
            describe(rule, out)?;
        }
    }
    Ok(())
}

fn describe(rule: &Rule, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "    {:12} {}", style("Languages"), rule.languages.tags().join(", "))?;
    writeln!(out, "    {:12} {}", style("Message"), rule.message)?;
    for pattern in &rule.patterns {
        let mut lines = pattern.trim_end().lines();
        if let Some(first) = lines.next() {
            writeln!(out, "    {:12} {}", style("Pattern"), first)?;
        }
        for rest in lines {
            writeln!(out, "    {:12} {}", "", rest)?;
        }
    }
    for c in &rule.constraints {
        match c {
            Constraint::MetavariableRegex {
                metavariable, pattern, ..
            } => writeln!(out, "    {:12} {metavariable} =~ /{pattern}/", style("Where"))?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(set: &RuleSet, verbose: bool) -> String {
        console::set_colors_enabled(false);
        let mut buf = Vec::new();
        render(set, verbose, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn lists_every_builtin_rule() {
        let set = RuleSet::builtin().unwrap();
        let text = rendered(&set, false);
        for rule in set.iter() {
            assert!(text.contains(&rule.id), "{}", rule.id);
        }
        assert!(!text.contains("Pattern"));
    }

    #[test]
    fn verbose_shows_patterns_and_constraints() {
        let set = RuleSet::builtin().unwrap();
        let text = rendered(&set, true);
        assert!(text.contains("axios.$METHOD($URL, ...)"));
        assert!(text.contains("$XHR.open(...);"));
        assert!(text.contains("$LIBRARY =~ /(request|got|superagent)/"));
    }

    #[test]
    fn empty_set_says_so() {
        assert!(rendered(&RuleSet::default(), false).contains("No rules loaded"));
    }
}
