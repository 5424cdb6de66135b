//! Gitignore-style ignore rules for the indexing walk and the file watcher.
//!
//! Built-in defaults are compiled first, then user rules from
//! `.contextignore` (preferred) or `.gitignore` at the project root, so user
//! patterns, including `!` negations, take precedence.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;
use tracing::warn;

/// Ignore files larger than this are skipped and defaults apply alone.
const MAX_IGNORE_FILE_BYTES: u64 = 1_048_576;

/// Patterns applied to every project regardless of its own ignore file.
/// A trailing slash matches the directory and all of its contents.
const DEFAULT_PATTERNS: &[&str] = &[
    // Version control metadata
    ".git/",
    ".hg/",
    ".svn/",
    // Dependency caches
    "node_modules/",
    ".venv/",
    "venv/",
    "__pycache__/",
    "*.pyc",
    "*.egg-info/",
    // Build outputs
    "target/",
    "dist/",
    "build/",
    // Environment and lock files
    ".env*",
    "*.lock",
    // OS scratch files
    ".DS_Store",
    // Secret/credential files, never indexed
    "*.pem",
    "*.key",
    "*.p12",
    "*.pfx",
    ".netrc",
    "credentials.json",
    "service_account.json",
    "id_rsa*",
    "id_ed25519*",
];

/// Compiled ignore predicate over project-relative paths.
pub struct IgnoreRules {
    matcher: Gitignore,
}

impl IgnoreRules {
    /// Compile defaults plus the project's ignore file, if any.
    pub fn load(project_root: &Path) -> Self {
        let mut builder = GitignoreBuilder::new(project_root);

        for pattern in DEFAULT_PATTERNS {
            // Static patterns are known-valid; a failure here is a programmer error.
            let _ = builder.add_line(None, pattern);
        }

        let contextignore = project_root.join(".contextignore");
        let gitignore = project_root.join(".gitignore");
        let source = if contextignore.exists() { contextignore } else { gitignore };

        if source.exists() {
            match std::fs::metadata(&source) {
                Ok(meta) if meta.len() > MAX_IGNORE_FILE_BYTES => {
                    warn!(
                        file = %source.display(),
                        size = meta.len(),
                        "Ignore file exceeds 1MiB, using defaults only"
                    );
                }
                _ => match std::fs::read_to_string(&source) {
                    Ok(content) => {
                        for line in content.lines() {
                            let line = line.trim();
                            if line.is_empty() || line.starts_with('#') {
                                continue;
                            }
                            if let Err(e) = builder.add_line(None, line) {
                                warn!(pattern = line, error = %e, "Skipping invalid ignore pattern");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(file = %source.display(), error = %e, "Failed to read ignore file");
                    }
                },
            }
        }

        let matcher = builder.build().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to compile ignore rules, using empty matcher");
            Gitignore::empty()
        });

        Self { matcher }
    }

    /// Whether a project-relative path is excluded from indexing.
    /// Parent directory matches apply, so `foo/` also excludes `foo/bar/baz.txt`.
    pub fn is_ignored(&self, rel_path: &Path, is_dir: bool) -> bool {
        self.matcher.matched_path_or_any_parents(rel_path, is_dir).is_ignore()
    }
}
