//! File discovery and the incremental index queue.
//!
//! Discovery walks the workspace (honoring `.gitignore` plus configured
//! exclusions) and the watcher bridges OS change notifications onto a typed
//! channel of [`ChangeEvent`]s. A [`Pipeline`] is one *generation* of the
//! whole indexing stack: it owns its symbol index and its event queue, and is
//! discarded wholesale when the enabled-language set changes, so in-flight
//! operations from an old generation can never mutate a new generation's
//! state.

use anyhow::{Context, Result};
use glob::Pattern;
use ignore::WalkBuilder;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::extractor;
use crate::index::SymbolIndex;
use crate::storage::Storage;

/// Typed file-system change events consumed by the single-threaded
/// processing loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created(String),
    Changed(String),
    Deleted(String),
}

/// Result of an on-demand, size-capped file read. "Legitimately empty" is a
/// `Contents` with zero bytes, distinct from both failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRead {
    Contents(Vec<u8>),
    NotFound,
    TooLarge,
}

/// Read a file for indexing, enforcing the per-file size cap. Files above
/// the cap are reported as [`FileRead::TooLarge`] and indexed as empty
/// content, which bounds worst-case parse cost.
pub fn read_file(abs_path: &Path, max_bytes: u64) -> FileRead {
    let meta = match std::fs::metadata(abs_path) {
        Ok(m) => m,
        Err(_) => return FileRead::NotFound,
    };
    if meta.len() > max_bytes {
        return FileRead::TooLarge;
    }
    match std::fs::read(abs_path) {
        Ok(bytes) => FileRead::Contents(bytes),
        Err(_) => FileRead::NotFound,
    }
}

/// Directory names always skipped, beyond whatever `.gitignore` covers.
const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    "coverage",
    "vendor",
    "__pycache__",
    ".venv",
    ".next",
    ".polysym",
];

fn is_excluded_dir(name: &str, extra: &[String]) -> bool {
    DEFAULT_EXCLUDE_DIRS.contains(&name) || extra.iter().any(|d| d == name)
}

fn path_has_excluded_component(path: &Path, extra: &[String]) -> bool {
    path.components().any(|c| match c {
        std::path::Component::Normal(name) => name
            .to_str()
            .map(|n| is_excluded_dir(n, extra))
            .unwrap_or(false),
        _ => false,
    })
}

fn rel_path_string(abs: &Path, root: &Path) -> Option<String> {
    let rel = abs.strip_prefix(root).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}

fn compile_exclude_globs(patterns: &[String]) -> Vec<Pattern> {
    patterns.iter().filter_map(|p| Pattern::new(p).ok()).collect()
}

/// Exclusion test shared by discovery, the event loop and the OS watcher.
/// All three must agree on what belongs in the index, and all three judge
/// the workspace-relative path, never the absolute one.
fn is_excluded_rel(rel: &str, extra_dirs: &[String], pats: &[Pattern]) -> bool {
    path_has_excluded_component(Path::new(rel), extra_dirs)
        || pats.iter().any(|p| p.matches(rel))
}

/// Enumerate candidate files for the enabled-language set: extension match,
/// `.gitignore` respected, configured directory names and globs excluded.
/// Output is workspace-relative, '/'-normalized, sorted.
pub fn find_workspace_files(root: &Path, cfg: &Config) -> Result<Vec<String>> {
    let extensions = extractor::registry().extensions_for(&cfg.languages);
    let exclude_pats = compile_exclude_globs(&cfg.scan.exclude_globs);

    let mut out: Vec<String> = Vec::new();
    let walker = WalkBuilder::new(root)
        .standard_filters(true) // .gitignore, .ignore, hidden, etc.
        .build();

    for item in walker {
        let dent = match item {
            Ok(d) => d,
            Err(_) => continue,
        };
        if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }

        let abs_path = dent.into_path();
        let ext = abs_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if !extensions.iter().any(|e| *e == ext) {
            continue;
        }

        let Some(rel) = rel_path_string(&abs_path, root) else {
            continue;
        };
        if is_excluded_rel(&rel, &cfg.scan.exclude_dir_names, &exclude_pats) {
            continue;
        }

        out.push(rel);
    }

    out.sort();
    Ok(out)
}

/// One generation of the indexing pipeline. Owns the symbol index and the
/// event queue; dropped and rebuilt whole on reconfiguration.
pub struct Pipeline {
    root: PathBuf,
    cfg: Config,
    exclude_pats: Vec<Pattern>,
    generation: u64,
    index: SymbolIndex,
    events_tx: Sender<ChangeEvent>,
    events_rx: Receiver<ChangeEvent>,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(root: &Path, cfg: Config, generation: u64) -> Self {
        let storage = Storage::open(&root.join(&cfg.output_dir), cfg.flush_debounce());
        let index = SymbolIndex::new(storage, cfg.cache_capacity);
        let exclude_pats = compile_exclude_globs(&cfg.scan.exclude_globs);
        let (events_tx, events_rx) = std::sync::mpsc::channel();

        Self {
            root: root.to_path_buf(),
            cfg,
            exclude_pats,
            generation,
            index,
            events_tx,
            events_rx,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn index(&self) -> &SymbolIndex {
        &self.index
    }

    /// Producer handle for this generation's event queue.
    pub fn sender(&self) -> Sender<ChangeEvent> {
        self.events_tx.clone()
    }

    /// Teardown signal. Raising it makes an in-flight seed stop submitting;
    /// partial results belong to this generation and die with it.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Initial seeding: discover, truncate to the configured cap, index as
    /// one batch. Returns the number of files submitted, or 0 when the
    /// teardown signal won the race.
    pub fn seed(&mut self) -> Result<usize> {
        self.seed_with_progress(|_| {})
    }

    pub fn seed_with_progress(&mut self, mut on_file: impl FnMut(&str)) -> Result<usize> {
        let mut files = find_workspace_files(&self.root, &self.cfg)
            .context("workspace discovery failed")?;
        files.truncate(self.cfg.max_init_files);

        let mut submitted = 0usize;
        for rel in &files {
            if self.cancel.load(Ordering::Relaxed) {
                crate::debug_log!(
                    "[polysym] seeding cancelled (generation {})",
                    self.generation
                );
                return Ok(submitted);
            }
            self.apply_add(rel);
            on_file(rel);
            submitted += 1;
        }

        Ok(submitted)
    }

    fn apply_add(&mut self, rel: &str) {
        if is_excluded_rel(rel, &self.cfg.scan.exclude_dir_names, &self.exclude_pats) {
            return;
        }
        let abs = self.root.join(rel);
        let Some(language_id) = extractor::language_id_for_path(&abs) else {
            return;
        };
        if !self.cfg.language_enabled(language_id) {
            return;
        }

        // Duplicate create notifications for hot files are common; serve the
        // cached contents instead of rereading from disk.
        if let Some(bytes) = self.index.cached_contents(rel) {
            let bytes = bytes.clone();
            self.index.index_file(rel, &bytes, language_id);
            return;
        }

        match read_file(&abs, self.cfg.effective_max_file_bytes()) {
            FileRead::Contents(bytes) => {
                self.index.index_file(rel, &bytes, language_id);
            }
            FileRead::TooLarge => {
                // Soft skip: empty content, real language id.
                self.index.index_file(rel, b"", language_id);
            }
            FileRead::NotFound => {
                self.index.remove(&[rel.to_string()]);
            }
        }
    }

    /// Apply one change event. Adds and removes are idempotent. A change
    /// invalidates the cached contents first; the bytes on disk are the
    /// truth now.
    pub fn process_event(&mut self, event: ChangeEvent) {
        match event {
            ChangeEvent::Created(rel) => self.apply_add(&rel),
            ChangeEvent::Changed(rel) => {
                self.index.invalidate_artifact(&rel);
                self.apply_add(&rel);
            }
            ChangeEvent::Deleted(rel) => self.index.remove(&[rel]),
        }
    }

    /// Drain every queued event without blocking. Per-URI submission order
    /// is the channel order, so a remove queued before an add is observed
    /// first.
    pub fn drain(&mut self) {
        loop {
            match self.events_rx.try_recv() {
                Ok(event) => self.process_event(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Block up to `timeout` for one event, then drain the rest and run one
    /// maintenance tick. The watch loop calls this repeatedly.
    pub fn poll(&mut self, timeout: Duration) {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.process_event(event);
                self.drain();
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        }
        self.maintain();
    }

    /// Cache size check plus the storage debounce window.
    pub fn maintain(&mut self) {
        self.index.maintain(Instant::now());
    }

    /// Drain outstanding events and flush synchronously; no pending debounce
    /// may be dropped.
    pub fn shutdown(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.drain();
        self.index.flush();
    }

    /// Drive the loop until the teardown signal is raised, then shut down.
    /// A termination handler only has to flip the flag; draining and the
    /// synchronous flush happen here, on the processing thread.
    pub fn run(&mut self, poll_interval: Duration) {
        let cancel = self.cancel.clone();
        while !cancel.load(Ordering::Relaxed) {
            self.poll(poll_interval);
        }
        self.shutdown();
    }
}

/// Bridges `notify` file-system events onto a pipeline's typed channel.
/// Dropping the watcher stops the stream; a stale generation's watcher sends
/// into that generation's queue only.
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
}

impl FsWatcher {
    pub fn new(root: &Path, cfg: &Config, tx: Sender<ChangeEvent>) -> Result<Self> {
        let root_owned = root.to_path_buf();
        let extra_excludes = cfg.scan.exclude_dir_names.clone();
        let exclude_pats = compile_exclude_globs(&cfg.scan.exclude_globs);
        let enabled: Vec<String> = cfg.languages.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| {
                let Ok(event) = res else { return };
                for path in &event.paths {
                    let Some(language_id) = extractor::language_id_for_path(path) else {
                        continue;
                    };
                    if !enabled.iter().any(|l| l == language_id) {
                        continue;
                    }
                    let Some(rel) = rel_path_string(path, &root_owned) else {
                        continue;
                    };
                    if is_excluded_rel(&rel, &extra_excludes, &exclude_pats) {
                        continue;
                    }

                    let change = match event.kind {
                        notify::EventKind::Create(_) => ChangeEvent::Created(rel),
                        notify::EventKind::Remove(_) => ChangeEvent::Deleted(rel),
                        notify::EventKind::Modify(_) => ChangeEvent::Changed(rel),
                        _ => {
                            if path.exists() {
                                ChangeEvent::Changed(rel)
                            } else {
                                ChangeEvent::Deleted(rel)
                            }
                        }
                    };
                    let _ = tx.send(change);
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;

        Ok(Self { _watcher: watcher })
    }
}
