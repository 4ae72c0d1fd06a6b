use crate::aggregate::{Aggregator, Match, MatchSet};
use crate::ast::{self, looks_binary};
use crate::constraints;
use crate::errors::{ParseError, WiretapError, WiretapResult};
use crate::lang::Lang;
use crate::matcher::find_matches;
use crate::patterns::Severity;
use crate::rules::RuleSet;
use crossbeam_channel::{Sender, unbounded};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Cooperative stop signal, checked between files.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also trips once `budget` has elapsed from now.
    pub fn with_timeout(budget: Duration) -> Self {
        CancelToken {
            flag: Arc::default(),
            deadline: Instant::now().checked_add(budget),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// A file that produced no results because it could not be read or parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ScanReport {
    pub matches: MatchSet,
    pub skipped: Vec<SkippedFile>,
    pub files_scanned: usize,
    pub cancelled: bool,
}

enum Outcome {
    Matches(Vec<Match>),
    Skipped(SkippedFile),
}

/// Runs a compiled [`RuleSet`] over source text, files or file streams.
#[derive(Debug, Clone)]
pub struct Engine {
    rules: Arc<RuleSet>,
    min_severity: Severity,
    partial_parse: bool,
}

impl Engine {
    pub fn new(rules: RuleSet) -> Self {
        Engine {
            rules: Arc::new(rules),
            min_severity: Severity::Info,
            partial_parse: false,
        }
    }

    /// Rules below `level` are not evaluated.
    pub fn with_min_severity(mut self, level: Severity) -> Self {
        self.min_severity = level;
        self
    }

    /// Scan files containing syntax errors instead of skipping them.
    pub fn allow_partial_parse(mut self, allow: bool) -> Self {
        self.partial_parse = allow;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Evaluate every applicable rule over one parsed source text. Results
    /// are unsorted; feed them through an [`Aggregator`].
    pub fn scan_source(&self, path: &str, source: &str, lang: Lang) -> Result<Vec<Match>, ParseError> {
        let root = ast::parse(source, lang, self.partial_parse)?;
        let mut out = Vec::new();

        for rule in self.rules.iter() {
            if rule.severity < self.min_severity || !rule.languages.admits(lang) {
                continue;
            }
            for alt in rule.alternatives(lang) {
                let accepted = find_matches(alt, &root, source)
                    .filter(|b| constraints::evaluate(&rule.constraints, b))
                    .map(|b| Match::new(rule, path, b));
                out.extend(accepted);
            }
        }

        tracing::debug!(path, %lang, matches = out.len(), "scanned source");
        Ok(out)
    }

    /// Read and scan one file. Files with no recognised extension, and files
    /// that look binary, yield no matches.
    pub fn scan_file(&self, path: &Path) -> WiretapResult<Vec<Match>> {
        let Some(lang) = Lang::from_path(path) else {
            tracing::trace!(path = %path.display(), "no grammar for extension");
            return Ok(Vec::new());
        };
        let shown_path = path.to_string_lossy().into_owned();
        let parse_failed = |source: ParseError| WiretapError::Parse {
            path: shown_path.clone(),
            source,
        };

        let bytes = std::fs::read(path)?;
        if looks_binary(&bytes) {
            tracing::debug!(path = %shown_path, "looks binary, skipping");
            return Ok(Vec::new());
        }
        let text = std::str::from_utf8(&bytes).map_err(|_| parse_failed(ParseError::Encoding))?;
        self.scan_source(&shown_path, text, lang).map_err(parse_failed)
    }

    /// Scan `paths` in parallel. A failing file is recorded and skipped;
    /// the others are unaffected. Ordering and de-duplication happen once
    /// every worker is done.
    pub fn scan_paths<I>(&self, paths: I, cancel: &CancelToken) -> ScanReport
    where
        I: IntoIterator<Item = PathBuf>,
        I::IntoIter: Send,
    {
        let (tx, rx) = unbounded::<Outcome>();
        let scanned = AtomicUsize::new(0);

        let (aggregator, mut skipped) = thread::scope(|s| {
            let collector = s.spawn(move || {
                let mut aggregator = Aggregator::default();
                let mut skipped = Vec::new();
                for outcome in rx {
                    match outcome {
                        Outcome::Matches(found) => aggregator.extend(found),
                        Outcome::Skipped(file) => skipped.push(file),
                    }
                }
                (aggregator, skipped)
            });

            paths
                .into_iter()
                .par_bridge()
                .for_each_with(tx, |tx, path| self.scan_one(&path, cancel, &scanned, tx));

            match collector.join() {
                Ok(collected) => collected,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        });

        let cancelled = cancel.is_cancelled();
        if cancelled {
            tracing::warn!("scan cancelled; results are partial");
        }
        skipped.sort_by(|a, b| a.path.cmp(&b.path));

        ScanReport {
            matches: aggregator.finish(),
            skipped,
            files_scanned: scanned.into_inner(),
            cancelled,
        }
    }

    fn scan_one(&self, path: &Path, cancel: &CancelToken, scanned: &AtomicUsize, tx: &mut Sender<Outcome>) {
        if cancel.is_cancelled() || Lang::from_path(path).is_none() {
            return;
        }
        let outcome = match self.scan_file(path) {
            Ok(found) => {
                scanned.fetch_add(1, Ordering::Relaxed);
                Outcome::Matches(found)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "skipping file: {e}");
                Outcome::Skipped(SkippedFile {
                    path: path.to_string_lossy().into_owned(),
                    reason: e.to_string(),
                })
            }
        };
        let _ = tx.send(outcome);
    }
}
