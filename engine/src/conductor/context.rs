//! Run Context
//!
//! Per-run state shared by every agent in a run: memoized retrieval results,
//! the citation registry and the synthesis iteration counter. Created with the
//! orchestrator and dropped with it; nothing here outlives a run.

use sdk::types::SearchRecord;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;

/// Append-only memo table keyed by exact string
///
/// Concurrent lookups of the same key share one initialization, so the
/// collaborator behind `init` runs at most once per key.
pub struct Memo<T> {
    cells: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T: Clone> Memo<T> {
    pub fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    fn cell(&self, key: &str) -> Arc<OnceCell<T>> {
        lock(&self.cells)
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Cached value for `key`, if already initialized
    pub fn get(&self, key: &str) -> Option<T> {
        lock(&self.cells).get(key).and_then(|c| c.get().cloned())
    }

    /// Return the cached value or compute it with `init`.
    /// The flag is true on a cache hit.
    pub async fn get_or_init<F, Fut>(&self, key: &str, init: F) -> (T, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = self.cell(key);
        if let Some(value) = cell.get() {
            return (value.clone(), true);
        }

        let mut computed = false;
        let value = cell
            .get_or_init(|| {
                computed = true;
                init()
            })
            .await
            .clone();
        (value, !computed)
    }

    /// Store a value unless the key is already initialized
    pub fn insert(&self, key: &str, value: T) {
        // A concurrent initializer may have won; its value stays
        let _ = self.cell(key).set(value);
    }

    /// Number of initialized entries
    pub fn len(&self) -> usize {
        lock(&self.cells)
            .values()
            .filter(|c| c.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for Memo<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Stable `[n]` numbering for source links
#[derive(Debug, Default)]
struct Citations {
    numbers: HashMap<String, usize>,
    ordered: Vec<String>,
}

/// Shared per-run state
#[derive(Default)]
pub struct RunContext {
    searches: Memo<Vec<SearchRecord>>,
    pages: Memo<String>,
    citations: Mutex<Citations>,
    iterations: AtomicU32,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Search results memoized by exact query
    pub fn searches(&self) -> &Memo<Vec<SearchRecord>> {
        &self.searches
    }

    /// Page contents memoized by exact URL
    pub fn pages(&self) -> &Memo<String> {
        &self.pages
    }

    /// Citation number for `link`, assigning the next one on first sight
    pub fn cite(&self, link: &str) -> usize {
        let mut citations = lock(&self.citations);
        if let Some(n) = citations.numbers.get(link) {
            return *n;
        }
        citations.ordered.push(link.to_string());
        let n = citations.ordered.len();
        citations.numbers.insert(link.to_string(), n);
        n
    }

    /// All cited links as `(number, link)`, in numbering order
    pub fn citations(&self) -> Vec<(usize, String)> {
        lock(&self.citations)
            .ordered
            .iter()
            .enumerate()
            .map(|(i, link)| (i + 1, link.clone()))
            .collect()
    }

    /// Count one synthesis completion and return the new total
    pub fn next_iteration(&self) -> u32 {
        self.iterations.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Synthesis completions so far
    pub fn iterations(&self) -> u32 {
        self.iterations.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // The guarded maps stay consistent even if a holder panicked
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
