//! The authoritative in-memory symbol index: one table per indexed file,
//! merged on demand for workspace-wide lookups, durability delegated to
//! [`crate::storage::Storage`].

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Instant;
use xxhash_rust::xxh3::xxh3_64;

use crate::cache::EvictionCache;
use crate::extractor::{self, Occurrence, Role, SymbolKind};
use crate::storage::Storage;

/// Per-(file, word) aggregate. The same word may be defined and used in the
/// same file, with the same or different kinds; both sets are deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SymbolInfo {
    pub definitions: BTreeSet<SymbolKind>,
    pub usages: BTreeSet<SymbolKind>,
}

/// word -> SymbolInfo, scoped to exactly one file URI. Replaced wholesale on
/// every (re)index; never mutated incrementally.
pub type FileSymbolTable = HashMap<String, SymbolInfo>;

/// Aggregate one file's occurrences into its symbol table.
pub fn build_table(occurrences: &[Occurrence]) -> FileSymbolTable {
    let mut table = FileSymbolTable::new();
    for occ in occurrences {
        let info = table.entry(occ.word.clone()).or_default();
        match occ.role {
            Role::Definition => info.definitions.insert(occ.kind),
            Role::Usage => info.usages.insert(occ.kind),
        };
    }
    table
}

pub struct SymbolIndex {
    tables: HashMap<String, FileSymbolTable>,
    /// xxh3 of the last-indexed content per URI; unchanged bytes skip
    /// re-extraction entirely.
    hashes: HashMap<String, u64>,
    /// Recently read file contents; duplicate watcher notifications for hot
    /// files re-index from here instead of hitting disk again. Memory stays
    /// bounded via slack-batched LRU eviction.
    artifacts: EvictionCache<String, Vec<u8>>,
    storage: Storage,
}

impl SymbolIndex {
    /// Populate entirely from persisted storage before accepting any queue
    /// events; a later "add" can then never race a stale full load.
    pub fn new(mut storage: Storage, cache_capacity: usize) -> Self {
        let tables: HashMap<String, FileSymbolTable> =
            storage.get_all().into_iter().collect();

        Self {
            tables,
            hashes: HashMap::new(),
            artifacts: EvictionCache::new(cache_capacity, |batch: Vec<(String, Vec<u8>)>| {
                let _count = batch.len();
                crate::debug_log!("[polysym] evicted {_count} cached file artifacts");
            }),
            storage,
        }
    }

    /// Extract and (re)index one file, overwriting any prior table for the
    /// URI. Returns false when the content hash is unchanged and the file was
    /// skipped.
    pub fn index_file(&mut self, uri: &str, bytes: &[u8], language_id: &str) -> bool {
        let hash = xxh3_64(bytes);
        if self.hashes.get(uri) == Some(&hash) && self.tables.contains_key(uri) {
            return false;
        }

        let occurrences = extractor::extract(bytes, language_id, Some(Path::new(uri)));
        let table = build_table(&occurrences);

        self.storage.insert(uri, table.clone());
        self.tables.insert(uri.to_string(), table);
        self.hashes.insert(uri.to_string(), hash);
        self.artifacts.set(uri.to_string(), bytes.to_vec());
        true
    }

    /// Drop tables and cached artifacts for the given URIs. Removing an
    /// absent URI is a no-op.
    pub fn remove(&mut self, uris: &[String]) {
        for uri in uris {
            self.tables.remove(uri);
            self.hashes.remove(uri);
            self.artifacts.remove(uri);
        }
        self.storage.delete(uris);
    }

    /// Exact-word lookup across all indexed files, for workspace-symbol /
    /// definition / reference queries. Linear scan over files; the seeding
    /// cap keeps the corpus small enough that this stays cheap, and a future
    /// inverted index must preserve this contract.
    pub fn lookup(&self, word: &str) -> Vec<(String, SymbolInfo)> {
        let mut out: Vec<(String, SymbolInfo)> = self
            .tables
            .iter()
            .filter_map(|(uri, table)| table.get(word).map(|info| (uri.clone(), info.clone())))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Prefix variant used for workspace-symbol style completion queries.
    pub fn lookup_prefix(&self, prefix: &str) -> Vec<(String, String, SymbolInfo)> {
        let mut out: Vec<(String, String, SymbolInfo)> = Vec::new();
        for (uri, table) in &self.tables {
            for (word, info) in table {
                if word.starts_with(prefix) {
                    out.push((uri.clone(), word.clone(), info.clone()));
                }
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        out
    }

    /// Cached raw contents for a URI, promoting the entry on hit.
    pub fn cached_contents(&mut self, uri: &str) -> Option<&Vec<u8>> {
        self.artifacts.get(&uri.to_string())
    }

    /// Drop the cached contents for a URI whose on-disk state went stale.
    pub fn invalidate_artifact(&mut self, uri: &str) {
        self.artifacts.remove(&uri.to_string());
    }

    pub fn file_count(&self) -> usize {
        self.tables.len()
    }

    pub fn contains_file(&self, uri: &str) -> bool {
        self.tables.contains_key(uri)
    }

    /// One maintenance tick: cache size check plus the storage debounce.
    pub fn maintain(&mut self, now: Instant) {
        self.artifacts.maintain();
        self.storage.maintain(now);
    }

    /// Synchronous flush of any staged storage mutations.
    pub fn flush(&mut self) {
        self.storage.flush();
    }
}
