use crate::patterns::Severity;
use crate::utils::config::OutputFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "wiretap")]
#[command(about = "Flags outbound network communication in JavaScript and TypeScript sources")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a file or directory for network communication
    Scan {
        /// Path to scan (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Extra rule file or directory of rule files (repeatable)
        #[arg(short, long = "rules", value_name = "RULES")]
        rules: Vec<PathBuf>,

        /// Do not load the built-in rules
        #[arg(long)]
        no_builtin: bool,

        /// Output format (defaults to the configured one)
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// Report only rules at or above this severity
        #[arg(long, value_name = "LEVEL")]
        min_severity: Option<Severity>,

        /// Print the distinct detection messages instead of every result
        #[arg(long)]
        summary: bool,
    },

    /// Compile and list the active rules
    Rules {
        /// Extra rule file or directory of rule files (repeatable)
        #[arg(short, long = "rules", value_name = "RULES")]
        rules: Vec<PathBuf>,

        /// Do not load the built-in rules
        #[arg(long)]
        no_builtin: bool,

        /// Show patterns and constraints
        #[arg(short, long)]
        verbose: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_arguments_parse() {
        let cli = Cli::try_parse_from([
            "wiretap", "scan", "web/", "-r", "a.yaml", "--rules", "more/", "--no-builtin", "-f", "json",
            "--min-severity", "error", "--summary",
        ])
        .unwrap();
        let Commands::Scan {
            path,
            rules,
            no_builtin,
            format,
            min_severity,
            summary,
        } = cli.command
        else {
            panic!("expected scan");
        };
        assert_eq!(path, PathBuf::from("web/"));
        assert_eq!(rules, vec![PathBuf::from("a.yaml"), PathBuf::from("more/")]);
        assert!(no_builtin && summary);
        assert_eq!(format, Some(OutputFormat::Json));
        assert_eq!(min_severity, Some(Severity::Error));
    }

    #[test]
    fn scan_defaults_to_current_directory() {
        let cli = Cli::try_parse_from(["wiretap", "scan"]).unwrap();
        assert!(matches!(cli.command, Commands::Scan { ref path, format: None, .. } if path == &PathBuf::from(".")));
    }

    #[test]
    fn unknown_severity_is_rejected() {
        assert!(Cli::try_parse_from(["wiretap", "scan", "--min-severity", "fatal"]).is_err());
    }
}
