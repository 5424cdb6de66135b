//! Project file discovery for the indexing pipeline.
//!
//! Enumerates regular files beneath a canonicalized root, prunes ignored
//! directories, and keeps only files some parser handles. Symlinks are never
//! followed and symlinked files are dropped outright, so the walk cannot
//! escape the project root. The result is sorted for deterministic indexing.

use crate::ignore_rules::IgnoreRules;
use crate::parsers::{parser_for, Parser};
use crate::types::{MAX_FILES, MAX_FILE_BYTES};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub fn discover_files(
    project_root: &Path,
    rules: &Arc<IgnoreRules>,
    parsers: &[Box<dyn Parser>],
) -> Vec<PathBuf> {
    let root = project_root.to_path_buf();

    let mut builder = WalkBuilder::new(project_root);
    builder.standard_filters(false).hidden(false).follow_links(false);

    // Prune ignored directories so dependency caches are never descended.
    let filter_root = root.clone();
    let filter_rules = Arc::clone(rules);
    builder.filter_entry(move |entry| {
        if entry.depth() == 0 {
            return true;
        }
        if !entry.file_type().is_some_and(|ft| ft.is_dir()) {
            return true;
        }
        if entry.path_is_symlink() {
            return false;
        }
        match entry.path().strip_prefix(&filter_root) {
            Ok(rel) => !filter_rules.is_ignored(rel, true),
            Err(_) => false,
        }
    });

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        if entry.path_is_symlink() {
            debug!(path = %entry.path().display(), "Skipping symlink");
            continue;
        }

        let rel = match entry.path().strip_prefix(&root) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if rules.is_ignored(rel, false) {
            continue;
        }

        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(_) => continue,
        };
        if size > MAX_FILE_BYTES {
            info!(
                path = %rel.display(),
                size,
                limit = MAX_FILE_BYTES,
                "Skipping file exceeding size limit"
            );
            continue;
        }

        if parser_for(parsers, entry.path()).is_none() {
            continue;
        }

        files.push(entry.into_path());
        if files.len() >= MAX_FILES {
            warn!(limit = MAX_FILES, "File count limit reached, remaining files skipped");
            break;
        }
    }

    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::default_parsers;
    use tempfile::TempDir;

    fn discover(dir: &TempDir) -> Vec<PathBuf> {
        let rules = Arc::new(IgnoreRules::load(dir.path()));
        discover_files(dir.path(), &rules, &default_parsers())
    }

    fn rel_names(root: &Path, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn finds_parseable_files_sorted() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "# Readme\n").unwrap();
        std::fs::write(dir.path().join("data.bin"), [0u8, 1, 2]).unwrap();

        let files = discover(&dir);
        let names = rel_names(dir.path(), &files);
        assert_eq!(names, vec!["README.md", "src/main.rs"]);
    }

    #[test]
    fn ignored_directories_are_pruned() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "x\n").unwrap();
        std::fs::write(dir.path().join("app.js"), "y\n").unwrap();

        let names = rel_names(dir.path(), &discover(&dir));
        assert_eq!(names, vec!["app.js"]);
    }

    #[test]
    fn credential_files_are_never_discovered() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("secrets.pem"), "-----BEGIN KEY-----\n").unwrap();
        std::fs::write(dir.path().join("main.py"), "print('ok')\n").unwrap();

        let names = rel_names(dir.path(), &discover(&dir));
        assert_eq!(names, vec!["main.py"]);
    }

    #[test]
    fn oversized_files_are_skipped_at_boundary() {
        let dir = TempDir::new().unwrap();
        // Sparse files carry the right stat size without writing 10MiB of data
        let at_limit = std::fs::File::create(dir.path().join("at_limit.txt")).unwrap();
        at_limit.set_len(MAX_FILE_BYTES).unwrap();
        let over = std::fs::File::create(dir.path().join("over.txt")).unwrap();
        over.set_len(MAX_FILE_BYTES + 1).unwrap();

        let names = rel_names(dir.path(), &discover(&dir));
        assert_eq!(names, vec!["at_limit.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_files_are_dropped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("real.py"), "x = 1\n").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.py"), dir.path().join("link.py"))
            .unwrap();

        let names = rel_names(dir.path(), &discover(&dir));
        assert_eq!(names, vec!["real.py"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_not_descended() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("outside.py"), "x = 1\n").unwrap();

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("inside.py"), "y = 2\n").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

        let names = rel_names(dir.path(), &discover(&dir));
        assert_eq!(names, vec!["inside.py"]);
    }
}
