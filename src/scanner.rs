//! Candidate discovery: walks the configured roots and yields the path
//! stream that feeds the indexing pipeline. Filter heuristics live in
//! configuration; everything here is mechanical.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;

pub fn discover(config: &EngineConfig) -> Vec<PathBuf> {
    let skip = build_skip_set(&config.skip_patterns);
    let max_size = config.max_file_size_bytes();
    let mut candidates = Vec::new();
    let mut per_dir: HashMap<PathBuf, usize> = HashMap::new();

    for root in &config.include_dirs {
        if !root.is_dir() {
            warn!(root = %root.display(), "include dir missing, skipping");
            continue;
        }

        let excludes = config.exclude_dirs.clone();
        let walker = WalkBuilder::new(root)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .max_depth(Some(20))
            .filter_entry(move |entry| {
                let name = entry.file_name().to_string_lossy();
                !(entry.file_type().is_some_and(|ft| ft.is_dir())
                    && is_excluded_dir(&name, &excludes))
            })
            .build();

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.path();

            let name = path.file_name().unwrap_or_default().to_string_lossy();
            if skip.is_match(name.as_ref()) {
                continue;
            }

            let Ok(meta) = entry.metadata() else { continue };
            if meta.len() == 0 || meta.len() > max_size {
                continue;
            }

            if let Some(parent) = path.parent() {
                let count = per_dir.entry(parent.to_path_buf()).or_insert(0);
                *count += 1;
                if *count > config.max_files_per_dir {
                    if *count == config.max_files_per_dir + 1 {
                        debug!(
                            dir = %parent.display(),
                            cap = config.max_files_per_dir,
                            "per-directory candidate cap reached"
                        );
                    }
                    continue;
                }
            }

            candidates.push(path.to_path_buf());
        }
    }

    info!(candidates = candidates.len(), roots = config.include_dirs.len(), "discovery complete");
    candidates
}

fn build_skip_set(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => warn!(pattern = %pattern, error = %e, "invalid skip pattern ignored"),
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

fn is_excluded_dir(name: &str, excludes: &[String]) -> bool {
    excludes.iter().any(|p| name == p || name.contains(p.as_str()))
}

/// Canonical path identity: absolute, OS-normalized, symlinks resolved.
pub fn canonicalize(path: &Path) -> std::io::Result<PathBuf> {
    dunce::canonicalize(path)
}
