use crate::errors::WiretapResult;
use crate::patterns::Severity;
use console::style;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

static DEFAULT_CONFIG_TOML: &str = include_str!("../../default-wiretap.conf");

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    /// The minimum severity level to report.
    pub min_severity: Severity,

    /// The maximum file size to scan, in megabytes.
    pub max_file_size_mb: Option<u64>,

    /// File extensions to exclude from scanning.
    pub excluded_extensions: Vec<String>,

    /// Directories to exclude from scanning.
    pub excluded_directories: Vec<String>,

    /// File names or globs to exclude from scanning.
    pub excluded_files: Vec<String>,

    /// Whether to respect the global ignore file or not.
    pub read_global_ignore: bool,

    /// Whether to respect VCS ignore files (`.gitignore`, ..) or not.
    pub read_vcsignore: bool,

    /// Whether to require a `.git` directory to respect gitignore files.
    pub require_git_to_read_vcsignore: bool,

    /// Whether to limit the search to starting file system or not.
    pub one_file_system: bool,

    /// Whether to follow symlinks or not.
    pub follow_symlinks: bool,

    /// Whether to scan hidden files or not.
    pub scan_hidden_files: bool,

    /// Scan files with syntax errors instead of skipping them.
    pub allow_partial_parse: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_severity: Severity::Info,
            max_file_size_mb: Some(5),
            excluded_extensions: ["map", "min.js", "png", "jpg", "gif", "zip", "gz", "wasm"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            excluded_directories: ["node_modules", ".git", "dist", "build", "coverage", ".next"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            excluded_files: Vec::new(),
            read_global_ignore: false,
            read_vcsignore: true,
            require_git_to_read_vcsignore: true,
            one_file_system: false,
            follow_symlinks: false,
            scan_hidden_files: false,
            allow_partial_parse: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RulesConfig {
    /// Load the built-in network rules.
    pub builtin: bool,

    /// Extra rule files or directories of `*.yaml` rule files.
    pub paths: Vec<PathBuf>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            builtin: true,
            paths: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Console,
    Json,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct OutputConfig {
    /// The default output format.
    pub default_format: OutputFormat,

    /// Suppress notes and the closing summary line.
    pub quiet: bool,

    /// The maximum number of results to show.
    pub max_results: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PerformanceConfig {
    /// The maximum search depth, or `None` for no limit.
    ///
    /// A depth of `1` includes all files under the current directory, a depth of `2` also includes
    /// all files under subdirectories of the current directory, etc.
    pub max_depth: Option<usize>,

    /// The maximum number of worker threads to use, or `None` to auto-detect.
    pub worker_threads: Option<usize>,

    /// The number of paths the walker sends per batch.
    pub batch_size: usize,

    /// capacity = threads × this
    pub channel_multiplier: usize,

    /// The stack size for Rayon threads, in bytes.
    pub rayon_thread_stack_size: usize,

    /// Stop starting new files once a scan has run this long.
    pub scan_timeout_secs: Option<u64>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_depth: None,
            worker_threads: None,
            batch_size: 8,
            channel_multiplier: 4,
            rayon_thread_stack_size: 8 * 1024 * 1024,
            scan_timeout_secs: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub rules: RulesConfig,
    pub output: OutputConfig,
    pub performance: PerformanceConfig,
}

impl Config {
    pub fn load(config_dir: &Path) -> WiretapResult<Self> {
        let mut config = Config::default();

        let default_config_path = config_dir.join("wiretap.conf");
        if !default_config_path.exists() {
            create_example_config(config_dir)?;
        }

        let user_config_path = config_dir.join("wiretap.local");
        if user_config_path.exists() {
            let user_config_content = fs::read_to_string(&user_config_path)?;
            let user_config: Config = toml::from_str(&user_config_content)?;

            config = merge_configs(config, user_config);

            if !config.output.quiet {
                eprintln!(
                    "{}: Loaded user config from: {}\n",
                    style("note").green().bold(),
                    style(user_config_path.display()).underlined().white().bold()
                );
            }
        } else {
            tracing::debug!(path = %user_config_path.display(), "no user config, using defaults");
        }

        Ok(config)
    }
}

fn create_example_config(config_dir: &Path) -> WiretapResult<()> {
    let example_path = config_dir.join("wiretap.conf");
    if !example_path.exists() {
        fs::write(&example_path, DEFAULT_CONFIG_TOML)?;
        tracing::debug!("Example config created at: {}", example_path.display());
    }
    Ok(())
}

/// Merge user config into default config, unioning the exclusion and rule
/// path lists and overriding everything else.
fn merge_configs(mut default: Config, user: Config) -> Config {
    // --- ScannerConfig ---
    default.scanner.min_severity = user.scanner.min_severity;
    default.scanner.max_file_size_mb = user.scanner.max_file_size_mb;
    default.scanner.read_global_ignore = user.scanner.read_global_ignore;
    default.scanner.read_vcsignore = user.scanner.read_vcsignore;
    default.scanner.require_git_to_read_vcsignore = user.scanner.require_git_to_read_vcsignore;
    default.scanner.one_file_system = user.scanner.one_file_system;
    default.scanner.follow_symlinks = user.scanner.follow_symlinks;
    default.scanner.scan_hidden_files = user.scanner.scan_hidden_files;
    default.scanner.allow_partial_parse = user.scanner.allow_partial_parse;

    union_into(&mut default.scanner.excluded_extensions, user.scanner.excluded_extensions);
    union_into(&mut default.scanner.excluded_directories, user.scanner.excluded_directories);
    union_into(&mut default.scanner.excluded_files, user.scanner.excluded_files);

    // --- RulesConfig ---
    default.rules.builtin = user.rules.builtin;
    union_into(&mut default.rules.paths, user.rules.paths);

    // --- OutputConfig ---
    default.output = user.output;

    // --- PerformanceConfig ---
    default.performance = user.performance;

    default
}

fn union_into<T: Ord>(into: &mut Vec<T>, from: Vec<T>) {
    into.extend(from);
    into.sort_unstable();
    into.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_configs_dedupes_and_keeps_order() {
        let mut default_cfg = Config::default();
        default_cfg.scanner.excluded_extensions = vec!["map".into(), "wasm".into()];

        let mut user_cfg = Config::default();
        user_cfg.scanner.excluded_extensions = vec!["jpg".into(), "map".into()];
        user_cfg.rules.paths = vec![PathBuf::from("team-rules")];

        let merged = merge_configs(default_cfg, user_cfg);

        assert_eq!(merged.scanner.excluded_extensions, vec!["jpg", "map", "wasm"]);
        assert_eq!(merged.rules.paths, vec![PathBuf::from("team-rules")]);
    }

    #[test]
    fn embedded_default_config_parses() {
        let cfg: Config = toml::from_str(DEFAULT_CONFIG_TOML).unwrap();
        assert!(cfg.rules.builtin);
        assert_eq!(cfg.output.default_format, OutputFormat::Console);
        assert!(cfg.scanner.excluded_directories.contains(&"node_modules".to_string()));
    }

    #[test]
    fn load_creates_example_and_reads_user_overrides() {
        let cfg_dir = tempfile::tempdir().unwrap();
        let cfg_path = cfg_dir.path();

        let user_toml = r#"
            [scanner]
            min_severity = "ERROR"
            allow_partial_parse = true
            excluded_extensions = ["snap"]

            [rules]
            builtin = false
            paths = ["rules/"]

            [output]
            default_format = "json"
            quiet = true

            [performance]
            scan_timeout_secs = 30
        "#;
        fs::write(cfg_path.join("wiretap.local"), user_toml).unwrap();

        let cfg = Config::load(cfg_path).expect("Config::load should succeed");

        assert!(cfg_path.join("wiretap.conf").is_file());

        assert_eq!(cfg.scanner.min_severity, Severity::Error);
        assert!(cfg.scanner.allow_partial_parse);
        assert!(cfg.scanner.excluded_extensions.contains(&"snap".to_string()));
        assert!(cfg.scanner.excluded_extensions.contains(&"map".to_string()));
        assert!(!cfg.rules.builtin);
        assert_eq!(cfg.rules.paths, vec![PathBuf::from("rules/")]);
        assert_eq!(cfg.output.default_format, OutputFormat::Json);
        assert!(cfg.output.quiet);
        assert_eq!(cfg.performance.scan_timeout_secs, Some(30));
        assert_eq!(cfg.performance.batch_size, 8);
        assert!(!cfg.scanner.follow_symlinks);
    }

    #[test]
    fn malformed_user_config_is_an_error() {
        let cfg_dir = tempfile::tempdir().unwrap();
        fs::write(cfg_dir.path().join("wiretap.local"), "[scanner\n").unwrap();
        assert!(Config::load(cfg_dir.path()).is_err());
    }
}
