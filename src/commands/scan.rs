use crate::aggregate::Match;
use crate::commands::load_rules;
use crate::engine::{CancelToken, Engine, ScanReport, SkippedFile};
use crate::errors::{WiretapError, WiretapResult};
use crate::utils::config::{Config, OutputFormat};
use crate::walk::spawn_senders;
use console::style;
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

/// Entry point called by the CLI.
pub fn handle(path: &Path, summary: bool, config: &Config) -> WiretapResult<()> {
    let report = run(path, config)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match config.output.default_format {
        OutputFormat::Console => render_console(&report, summary, config, &mut out)?,
        OutputFormat::Json => render_json(&report, summary, config, &mut out)?,
    }

    if !config.output.quiet && config.output.default_format == OutputFormat::Console {
        eprintln!(
            "{} {} result(s) in {} file(s), {} skipped",
            style("Scanned:").green().bold(),
            report.matches.len(),
            report.files_scanned,
            report.skipped.len(),
        );
    }
    Ok(())
}

/// Compile the configured rules and scan everything under `path`.
pub fn run(path: &Path, config: &Config) -> WiretapResult<ScanReport> {
    if !path.exists() {
        return Err(WiretapError::Other(format!("{} does not exist", path.display())));
    }
    let engine = Engine::new(load_rules(config)?)
        .with_min_severity(config.scanner.min_severity)
        .allow_partial_parse(config.scanner.allow_partial_parse);
    tracing::debug!(rules = engine.rules().len(), path = %path.display(), "starting scan");

    let cancel = match config.performance.scan_timeout_secs {
        Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
        None => CancelToken::new(),
    };
    let rx = spawn_senders(path, config)?;
    Ok(engine.scan_paths(rx.into_iter().flatten(), &cancel))
}

fn shown<'a>(report: &'a ScanReport, config: &Config) -> impl Iterator<Item = &'a Match> {
    let limit = config.output.max_results.map_or(usize::MAX, |n| n as usize);
    report.matches.iter().take(limit)
}

fn render_console(report: &ScanReport, summary: bool, config: &Config, out: &mut impl Write) -> io::Result<()> {
    if summary {
        for msg in report.matches.detections() {
            writeln!(out, "{msg}")?;
        }
    } else {
        for m in shown(report, config) {
            writeln!(
                out,
                "{}:{}:{}  [{}]  {}  {}",
                style(&m.path).blue().underlined(),
                m.start.line,
                m.start.col,
                m.severity,
                style(&m.rule_id).bold(),
                m.message,
            )?;
        }
    }

    if !config.output.quiet {
        for s in &report.skipped {
            eprintln!("{}: skipped {}: {}", style("warning").yellow().bold(), s.path, s.reason);
        }
        if report.cancelled {
            eprintln!("{}: scan stopped early; results are partial", style("warning").yellow().bold());
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct JsonReport<'a> {
    results: Vec<&'a Match>,
    skipped: &'a [SkippedFile],
    detections: Vec<&'a str>,
    files_scanned: usize,
    total_results: usize,
    cancelled: bool,
}

fn render_json(report: &ScanReport, summary: bool, config: &Config, out: &mut impl Write) -> io::Result<()> {
    let doc = JsonReport {
        results: if summary { Vec::new() } else { shown(report, config).collect() },
        skipped: &report.skipped,
        detections: report.matches.detections(),
        files_scanned: report.files_scanned,
        total_results: report.matches.len(),
        cancelled: report.cancelled,
    };
    serde_json::to_writer_pretty(&mut *out, &doc)?;
    writeln!(out)
}
