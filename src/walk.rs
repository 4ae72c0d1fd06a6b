use crossbeam_channel::{Receiver, Sender, bounded};
use ignore::{WalkBuilder, WalkState, overrides::OverrideBuilder};
use std::{
    mem,
    path::{Path, PathBuf},
    thread,
};

use crate::errors::{WiretapError, WiretapResult};
use crate::lang::Lang;
use crate::utils::Config;

pub type Batch = Vec<PathBuf>;

struct Batcher {
    tx: Sender<Batch>,
    batch: Batch,
    size: usize,
}

impl Batcher {
    fn push(&mut self, p: PathBuf) {
        self.batch.push(p);
        if self.batch.len() >= self.size {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if !self.batch.is_empty() {
            let _ = self.tx.send(mem::take(&mut self.batch));
        }
    }
}

impl Drop for Batcher {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Walk `root` on a background thread and send *batches* of source paths
/// through the returned channel. Only files with a known grammar are sent.
///
/// A single file given as `root` is sent as-is.
pub fn spawn_senders(root: &Path, cfg: &Config) -> WiretapResult<Receiver<Batch>> {
    let mut ob = OverrideBuilder::new(root);
    for ext in &cfg.scanner.excluded_extensions {
        if let Err(e) = ob.add(&format!("!*.{ext}")) {
            tracing::warn!("cannot add ignore pattern ‘{ext}’: {e}");
        }
    }
    for dir in &cfg.scanner.excluded_directories {
        if let Err(e) = ob.add(&format!("!**/{dir}/**")) {
            tracing::warn!("cannot add ignore pattern ‘{dir}’: {e}");
        }
    }
    for file in &cfg.scanner.excluded_files {
        if let Err(e) = ob.add(&format!("!**/{file}")) {
            tracing::warn!("cannot add ignore pattern ‘{file}’: {e}");
        }
    }
    let overrides = ob
        .build()
        .map_err(|e| WiretapError::Other(format!("invalid exclusion patterns: {e}")))?;

    let workers = cfg.performance.worker_threads.unwrap_or_else(num_cpus::get).max(1);
    let batch_size = cfg.performance.batch_size.max(1);
    let (tx, rx) = bounded::<Batch>(workers * cfg.performance.channel_multiplier.max(1));

    let root = root.to_path_buf();
    let scanner = cfg.scanner.clone();
    let max_depth = cfg.performance.max_depth;
    let max_bytes = scanner.max_file_size_mb.unwrap_or(0) * 1_048_576;

    thread::spawn(move || {
        WalkBuilder::new(root)
            .hidden(!scanner.scan_hidden_files)
            .follow_links(scanner.follow_symlinks)
            .git_ignore(scanner.read_vcsignore)
            .git_exclude(scanner.read_vcsignore)
            .ignore(scanner.read_vcsignore)
            .git_global(scanner.read_global_ignore)
            .require_git(scanner.require_git_to_read_vcsignore)
            .same_file_system(scanner.one_file_system)
            .max_depth(max_depth)
            .threads(workers)
            .overrides(overrides)
            .build_parallel()
            .run(move || {
                let mut b = Batcher {
                    tx: tx.clone(),
                    batch: Vec::with_capacity(batch_size),
                    size: batch_size,
                };

                Box::new(move |entry| {
                    let entry = match entry {
                        Ok(e) if e.file_type().is_some_and(|ft| ft.is_file()) => e,
                        Ok(_) => return WalkState::Continue,
                        Err(e) => {
                            tracing::debug!("walk error: {e}");
                            return WalkState::Continue;
                        }
                    };
                    if Lang::from_path(entry.path()).is_none() {
                        return WalkState::Continue;
                    }

                    if max_bytes != 0 {
                        match entry.metadata() {
                            Ok(m) if m.len() > max_bytes => {
                                tracing::debug!(path = %entry.path().display(), "over size limit");
                                return WalkState::Continue;
                            }
                            Err(e) => {
                                tracing::debug!("metadata failed for {:?}: {e}", entry.path());
                                return WalkState::Continue;
                            }
                            _ => {}
                        }
                    }

                    b.push(entry.into_path());
                    WalkState::Continue
                })
            });
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn collect(root: &Path, cfg: &Config) -> Vec<PathBuf> {
        let mut out: Vec<_> = spawn_senders(root, cfg).unwrap().into_iter().flatten().collect();
        out.sort();
        out
    }

    #[test]
    fn walker_sends_only_source_files_outside_exclusions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/deep")).unwrap();
        fs::create_dir_all(root.join("node_modules/axios")).unwrap();
        fs::write(root.join("src/app.js"), "fetch(u)").unwrap();
        fs::write(root.join("src/deep/api.ts"), "fetch(u)").unwrap();
        fs::write(root.join("src/readme.md"), "fetch(u)").unwrap();
        fs::write(root.join("src/bundle.min.js"), "fetch(u)").unwrap();
        fs::write(root.join("src/generated.js"), "fetch(u)").unwrap();
        fs::write(root.join("node_modules/axios/index.js"), "fetch(u)").unwrap();

        let mut cfg = Config::default();
        cfg.scanner.excluded_files = vec!["generated.js".into()];
        cfg.performance.batch_size = 1;

        let found = collect(root, &cfg);
        assert_eq!(found, vec![root.join("src/app.js"), root.join("src/deep/api.ts")]);

        cfg.performance.max_depth = Some(2);
        assert_eq!(collect(root, &cfg), vec![root.join("src/app.js")]);
    }

    #[test]
    fn oversized_files_are_not_sent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("big.js"), vec![b' '; 1_048_577]).unwrap();
        fs::write(dir.path().join("small.js"), "x").unwrap();

        let mut cfg = Config::default();
        cfg.scanner.max_file_size_mb = Some(1);
        assert_eq!(collect(dir.path(), &cfg), vec![dir.path().join("small.js")]);
    }
}
