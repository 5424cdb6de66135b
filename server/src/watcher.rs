//! Debounced file watcher for realtime re-indexing.
//!
//! Wraps a recursive `notify` watcher around one project root. Events are
//! coalesced on a background thread: each event resets a quiet-window timer
//! and the pending set is flushed to the callback at most once per burst.
//! Directory events, paths outside the root, and ignored paths never reach
//! the callback.

use crate::ignore_rules::IgnoreRules;
use crate::types::DEBOUNCE_MS;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub type ChangeCallback = Arc<dyn Fn(Vec<PathBuf>) + Send + Sync>;

pub struct FileWatcher {
    project_root: PathBuf,
    ignore: Arc<IgnoreRules>,
    on_change: ChangeCallback,
    running: AtomicBool,
    /// Held while running; dropping it disconnects the debounce thread.
    inner: Mutex<Option<RecommendedWatcher>>,
}

impl FileWatcher {
    pub fn new(project_root: PathBuf, ignore: Arc<IgnoreRules>, on_change: ChangeCallback) -> Self {
        Self {
            project_root,
            ignore,
            on_change,
            running: AtomicBool::new(false),
            inner: Mutex::new(None),
        }
    }

    /// Start watching. Idempotent; a second call is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let (tx, rx) = mpsc::channel::<Event>();
        let mut watcher = match RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        ) {
            Ok(w) => w,
            Err(e) => {
                error!(error = %e, "Failed to create file watcher");
                self.running.store(false, Ordering::SeqCst);
                return;
            }
        };

        if let Err(e) = watcher.watch(&self.project_root, RecursiveMode::Recursive) {
            error!(path = %self.project_root.display(), error = %e, "Failed to watch project");
            self.running.store(false, Ordering::SeqCst);
            return;
        }

        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = Some(watcher);

        let root = self.project_root.clone();
        let ignore = Arc::clone(&self.ignore);
        let on_change = Arc::clone(&self.on_change);
        std::thread::spawn(move || debounce_loop(rx, root, ignore, on_change));

        info!(path = %self.project_root.display(), "File watcher started");
    }

    /// Stop watching. Idempotent. Pending unflushed changes are discarded.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // Dropping the OS watcher drops the event sender, which disconnects
        // the channel and ends the debounce thread.
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).take();
        info!(path = %self.project_root.display(), "File watcher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Collect file events and flush them once per quiet debounce window.
fn debounce_loop(
    rx: mpsc::Receiver<Event>,
    root: PathBuf,
    ignore: Arc<IgnoreRules>,
    on_change: ChangeCallback,
) {
    let mut pending: HashSet<PathBuf> = HashSet::new();
    let mut last_event = Instant::now();
    let window = Duration::from_millis(DEBOUNCE_MS);

    loop {
        match rx.recv_timeout(window) {
            Ok(event) => {
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    continue;
                }
                for path in event.paths {
                    if path.is_dir() {
                        continue;
                    }
                    let rel = match path.strip_prefix(&root) {
                        Ok(rel) => rel.to_path_buf(),
                        Err(_) => continue,
                    };
                    if ignore.is_ignored(&rel, false) {
                        continue;
                    }
                    pending.insert(path);
                }
                last_event = Instant::now();
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if pending.is_empty() || last_event.elapsed() < window {
                    continue;
                }
                let mut changes: Vec<PathBuf> = pending.drain().collect();
                changes.sort();
                info!(changes = changes.len(), "Flushing file changes for re-indexing");
                on_change(changes);
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    if !pending.is_empty() {
        warn!(dropped = pending.len(), "Watcher stopped with unflushed changes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn watcher_with_channel(
        dir: &TempDir,
    ) -> (Arc<FileWatcher>, mpsc::Receiver<Vec<PathBuf>>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let callback: ChangeCallback = Arc::new(move |paths| {
            let _ = tx.lock().unwrap().send(paths);
        });
        let root = dir.path().canonicalize().unwrap();
        let ignore = Arc::new(IgnoreRules::load(&root));
        (Arc::new(FileWatcher::new(root, ignore, callback)), rx)
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let (watcher, _rx) = watcher_with_channel(&dir);

        assert!(!watcher.is_running());
        watcher.start();
        watcher.start();
        assert!(watcher.is_running());
        watcher.stop();
        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[test]
    fn modified_file_reaches_callback_after_debounce() {
        let dir = TempDir::new().unwrap();
        let (watcher, rx) = watcher_with_channel(&dir);
        watcher.start();
        // Give the OS watcher a moment to register
        std::thread::sleep(Duration::from_millis(300));

        std::fs::write(dir.path().join("changed.py"), "x = 1\n").unwrap();

        let changes = rx.recv_timeout(Duration::from_secs(10)).expect("expected a flush");
        assert!(
            changes.iter().any(|p| p.ends_with("changed.py")),
            "changes: {changes:?}"
        );
        watcher.stop();
    }

    #[test]
    fn ignored_paths_are_filtered_before_the_pending_set() {
        let dir = TempDir::new().unwrap();
        let (watcher, rx) = watcher_with_channel(&dir);
        watcher.start();
        std::thread::sleep(Duration::from_millis(300));

        std::fs::write(dir.path().join("secrets.pem"), "key\n").unwrap();
        std::fs::write(dir.path().join("kept.py"), "x = 1\n").unwrap();

        let changes = rx.recv_timeout(Duration::from_secs(10)).expect("expected a flush");
        assert!(changes.iter().any(|p| p.ends_with("kept.py")));
        assert!(!changes.iter().any(|p| p.ends_with("secrets.pem")));
        watcher.stop();
    }

    #[test]
    fn burst_of_events_flushes_once() {
        let dir = TempDir::new().unwrap();
        let (watcher, rx) = watcher_with_channel(&dir);
        watcher.start();
        std::thread::sleep(Duration::from_millis(300));

        for i in 0..5 {
            std::fs::write(dir.path().join(format!("f{i}.py")), "x\n").unwrap();
        }

        let first = rx.recv_timeout(Duration::from_secs(10)).expect("expected a flush");
        assert!(!first.is_empty());
        // The burst coalesced; no second flush arrives for it
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_err());
        watcher.stop();
    }
}
