pub mod rules;
pub mod scan;

use crate::cli::Commands;
use crate::errors::WiretapResult;
use crate::rules::RuleSet;
use crate::utils::Config;
use std::path::PathBuf;

pub fn handle_command(command: Commands, config: &mut Config) -> WiretapResult<()> {
    match command {
        Commands::Scan {
            path,
            rules,
            no_builtin,
            format,
            min_severity,
            summary,
        } => {
            apply_rule_flags(config, rules, no_builtin);
            if let Some(level) = min_severity {
                config.scanner.min_severity = level;
            }
            if let Some(format) = format {
                config.output.default_format = format;
            }
            scan::handle(&path, summary, config)
        }
        Commands::Rules {
            rules,
            no_builtin,
            verbose,
        } => {
            apply_rule_flags(config, rules, no_builtin);
            rules::handle(verbose, config)
        }
    }
}

fn apply_rule_flags(config: &mut Config, paths: Vec<PathBuf>, no_builtin: bool) {
    if no_builtin {
        config.rules.builtin = false;
    }
    config.rules.paths.extend(paths);
}

/// Compile the rule set the configuration asks for.
pub(crate) fn load_rules(config: &Config) -> WiretapResult<RuleSet> {
    let set = RuleSet::load(config.rules.builtin, &config.rules.paths)?;
    if set.is_empty() {
        tracing::warn!("no rules loaded; nothing will be reported");
    }
    Ok(set)
}
