//! Persisted index codec and debounced write scheduling.
//!
//! The whole workspace index round-trips through a compact length-prefixed
//! binary form: per file, per word, `word, defCount, defKind[defCount],
//! usageCount, usageKind[usageCount]`. Counts are explicit on both runs; the
//! decoder never has to guess where a run ends by sniffing token types.
//!
//! Writes are debounced: `insert`/`delete` mutate the staged representation
//! immediately and a single physical write happens once the window elapses
//! (driven by the explicit [`Storage::maintain`] tick) or on a synchronous
//! [`Storage::flush`] at shutdown.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::extractor::SymbolKind;
use crate::index::{FileSymbolTable, SymbolInfo};

const MAGIC: &[u8; 4] = b"PSYM";
const VERSION: u8 = 1;

/// Flattened persisted shape: file uri -> word table, deterministically ordered.
pub type PersistedIndex = BTreeMap<String, FileSymbolTable>;

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    put_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

pub fn encode(index: &PersistedIndex) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    put_u32(&mut out, index.len() as u32);

    for (uri, table) in index {
        put_str(&mut out, uri);
        put_u32(&mut out, table.len() as u32);

        // Deterministic word order keeps identical states byte-identical.
        let mut words: Vec<(&String, &SymbolInfo)> = table.iter().collect();
        words.sort_by(|a, b| a.0.cmp(b.0));

        for (word, info) in words {
            put_str(&mut out, word);
            put_u32(&mut out, info.definitions.len() as u32);
            for kind in &info.definitions {
                out.push(kind.code());
            }
            put_u32(&mut out, info.usages.len() as u32);
            for kind in &info.usages {
                out.push(kind.code());
            }
        }
    }

    out
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.buf.len())
            .context("persisted index truncated")?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take_str(&mut self) -> Result<String> {
        let len = self.take_u32()? as usize;
        let bytes = self.take(len)?;
        Ok(std::str::from_utf8(bytes)
            .context("persisted index contains invalid UTF-8")?
            .to_string())
    }

    fn take_kind(&mut self) -> Result<SymbolKind> {
        let code = self.take_u8()?;
        SymbolKind::from_code(code)
            .with_context(|| format!("unknown symbol kind code {code}"))
    }
}

pub fn decode(bytes: &[u8]) -> Result<PersistedIndex> {
    let mut r = Reader { buf: bytes, pos: 0 };

    if r.take(4)? != MAGIC {
        bail!("bad magic, not a polysym index");
    }
    let version = r.take_u8()?;
    if version != VERSION {
        bail!("unsupported index version {version}");
    }

    let file_count = r.take_u32()?;
    let mut index = PersistedIndex::new();

    for _ in 0..file_count {
        let uri = r.take_str()?;
        let word_count = r.take_u32()?;
        let mut table = FileSymbolTable::new();

        for _ in 0..word_count {
            let word = r.take_str()?;
            let mut info = SymbolInfo::default();

            let def_count = r.take_u32()?;
            for _ in 0..def_count {
                info.definitions.insert(r.take_kind()?);
            }
            let usage_count = r.take_u32()?;
            for _ in 0..usage_count {
                info.usages.insert(r.take_kind()?);
            }

            table.insert(word, info);
        }

        index.insert(uri, table);
    }

    if r.pos != bytes.len() {
        bail!("trailing bytes after persisted index");
    }

    Ok(index)
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Where the encoded index physically lives. The host environment decides;
/// the default is a flat file under the workspace output dir.
pub trait Transport {
    fn read(&self) -> Result<Vec<u8>>;
    fn write(&mut self, bytes: &[u8]) -> Result<()>;
}

pub struct FileTransport {
    path: PathBuf,
}

impl FileTransport {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Transport for FileTransport {
    fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&self.path, bytes)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

pub struct Storage {
    transport: Box<dyn Transport>,
    staged: PersistedIndex,
    dirty_since: Option<Instant>,
    debounce: Duration,
}

impl Storage {
    pub fn new(transport: Box<dyn Transport>, debounce: Duration) -> Self {
        Self {
            transport,
            staged: PersistedIndex::new(),
            dirty_since: None,
            debounce,
        }
    }

    /// File-backed storage at `<dir>/index.psym`.
    pub fn open(dir: &Path, debounce: Duration) -> Self {
        Self::new(
            Box::new(FileTransport::new(dir.join("index.psym"))),
            debounce,
        )
    }

    /// Replace one file's table in the staged representation and schedule a
    /// debounced flush.
    pub fn insert(&mut self, uri: &str, table: FileSymbolTable) {
        self.staged.insert(uri.to_string(), table);
        self.mark_dirty();
    }

    /// Remove URIs from the staged representation. Deleting a URI that is not
    /// present is a no-op (but still coalesces into any pending flush).
    pub fn delete(&mut self, uris: &[String]) {
        let mut changed = false;
        for uri in uris {
            changed |= self.staged.remove(uri).is_some();
        }
        if changed {
            self.mark_dirty();
        }
    }

    fn mark_dirty(&mut self) {
        if self.dirty_since.is_none() {
            self.dirty_since = Some(Instant::now());
        }
    }

    /// Read and decode the persisted index, replacing any staged state.
    ///
    /// A missing, unreadable or corrupt persisted index never fails the
    /// caller; it only costs a cold re-index.
    pub fn get_all(&mut self) -> PersistedIndex {
        self.staged.clear();
        self.dirty_since = None;

        let bytes = match self.transport.read() {
            Ok(b) => b,
            Err(_e) => {
                crate::debug_log!("[polysym] no persisted index ({_e:#}), starting cold");
                return PersistedIndex::new();
            }
        };

        match decode(&bytes) {
            Ok(index) => {
                self.staged = index.clone();
                index
            }
            Err(_e) => {
                crate::debug_log!("[polysym] persisted index corrupt ({_e:#}), starting cold");
                PersistedIndex::new()
            }
        }
    }

    /// Drive the debounce window. Call from the pipeline's maintenance tick.
    pub fn maintain(&mut self, now: Instant) {
        let Some(since) = self.dirty_since else { return };
        if now.duration_since(since) >= self.debounce {
            self.flush();
        }
    }

    /// Synchronous write of any staged mutations; shutdown must call this so
    /// no pending debounce is dropped. Write failures are logged and the
    /// in-memory state is kept (not rolled back).
    pub fn flush(&mut self) {
        if self.dirty_since.is_none() {
            return;
        }
        self.dirty_since = None;

        let bytes = encode(&self.staged);
        if let Err(_e) = self.transport.write(&bytes) {
            crate::debug_log!("[polysym] index write failed: {_e:#}");
        }
    }

    pub fn has_pending_flush(&self) -> bool {
        self.dirty_since.is_some()
    }
}
