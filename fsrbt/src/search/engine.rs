//! Concurrent search
//!
//! The tree's ordering key need not be the field a query filters on, so every node is visited.
//! At each node the predicate is evaluated, then both children are searched. Before descending
//! into a child the engine tries to take a permit from a fixed budget. With a permit the child
//! is searched on a new scoped thread, joined before the parent returns; without one it is
//! searched inline. The budget is shared by the whole fan-out, so deep trees settle into
//! synchronous traversal once the permits run out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use super::query::{Predicate, Query};
use crate::rbtree::{KeyKind, NodeId, RbTree};
use crate::record::FileRecord;

/// Upper limit on worker threads, whatever the core count.
pub const MAX_THREADS_CEILING: usize = 16;

/// Search tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchOptions {
    /// Maximum number of extra threads active at once. Zero searches on the caller's thread only.
    pub max_threads: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        let cores = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            max_threads: cores.clamp(1, MAX_THREADS_CEILING),
        }
    }
}

/// A fixed pool of permits. Taking one never blocks.
struct Admission {
    permits: Receiver<()>,
    returns: Sender<()>,
}

impl Admission {
    fn new(count: usize) -> Self {
        let (returns, permits) = crossbeam_channel::bounded(count);
        for _ in 0..count {
            // The channel was sized to hold exactly this many
            let _ = returns.try_send(());
        }
        Self { permits, returns }
    }

    fn try_acquire(&self) -> Option<Permit<'_>> {
        self.permits.try_recv().ok().map(|()| Permit {
            returns: &self.returns,
        })
    }

    fn available(&self) -> usize {
        self.permits.len()
    }
}

/// Goes back to the pool when dropped, however the worker ends.
struct Permit<'a> {
    returns: &'a Sender<()>,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let _ = self.returns.try_send(());
    }
}

/// Counters from one search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Nodes evaluated
    pub visited: usize,
    /// Worker threads started
    pub spawned: usize,
}

/// Matches collected by [`Searcher::collect`].
///
/// With more than one worker the order of matches is not defined.
#[derive(Clone, Debug, Default)]
pub struct SearchResults<'t> {
    /// Matching records
    pub matches: Vec<&'t FileRecord>,
    /// Search counters
    pub stats: SearchStats,
}

impl<'t> SearchResults<'t> {
    /// Number of matches.
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// Were there no matches?
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Put the matches in `key` order.
    pub fn sort_by_key(&mut self, key: KeyKind) {
        self.matches.sort_by(|a, b| key.compare(a, b));
    }
}

struct Walk<'p, F> {
    predicate: &'p Predicate,
    on_match: F,
    visited: AtomicUsize,
    spawned: AtomicUsize,
}

/// Runs searches within a shared thread budget.
pub struct Searcher {
    admission: Admission,
    max_threads: usize,
}

static GLOBAL: LazyLock<Searcher> = LazyLock::new(|| Searcher::new(SearchOptions::default()));

impl Searcher {
    /// Create a searcher with its own thread budget.
    pub fn new(options: SearchOptions) -> Self {
        tracing::debug!(max_threads = options.max_threads, "creating searcher");
        Self {
            admission: Admission::new(options.max_threads),
            max_threads: options.max_threads,
        }
    }

    /// The process-wide searcher. Every search through it shares one budget.
    pub fn global() -> &'static Searcher {
        &GLOBAL
    }

    /// Configured thread budget.
    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Call `on_match` for every record satisfying `predicate`, possibly from several threads
    /// at once.
    pub fn for_each_match<'t, F>(
        &self,
        tree: &'t RbTree,
        predicate: &Predicate,
        on_match: F,
    ) -> SearchStats
    where
        F: Fn(&'t FileRecord) + Sync,
    {
        let walk = Walk {
            predicate,
            on_match,
            visited: AtomicUsize::new(0),
            spawned: AtomicUsize::new(0),
        };
        if let Some(root) = tree.root() {
            self.visit(tree, root, &walk);
        }
        let stats = SearchStats {
            visited: walk.visited.into_inner(),
            spawned: walk.spawned.into_inner(),
        };
        tracing::debug!(
            visited = stats.visited,
            spawned = stats.spawned,
            permits = self.admission.available(),
            "search complete"
        );
        stats
    }

    /// Collect every record matching `query`.
    pub fn collect<'t>(&self, tree: &'t RbTree, query: &Query) -> SearchResults<'t> {
        let predicate = query.compile();
        let matches = Mutex::new(vec![]);
        let stats = self.for_each_match(tree, &predicate, |record| matches.lock().push(record));
        SearchResults {
            matches: matches.into_inner(),
            stats,
        }
    }

    fn visit<'t, F>(&self, tree: &'t RbTree, id: NodeId, walk: &Walk<'_, F>)
    where
        F: Fn(&'t FileRecord) + Sync,
    {
        let node = &tree[id];
        walk.visited.fetch_add(1, Ordering::Relaxed);
        if walk.predicate.matches(node.record()) {
            (walk.on_match)(node.record());
        }

        let branches = [node.left(), node.right()]
            .map(|child| child.map(|child| (child, self.admission.try_acquire())));
        if branches.iter().flatten().all(|(_, permit)| permit.is_none()) {
            for (child, _) in branches.into_iter().flatten() {
                self.visit(tree, child, walk);
            }
            return;
        }

        thread::scope(|scope| {
            for (child, permit) in branches.into_iter().flatten() {
                match permit {
                    Some(permit) => {
                        walk.spawned.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(node = child.index(), "spawning search worker");
                        scope.spawn(move || {
                            let _permit = permit;
                            self.visit(tree, child, walk);
                        });
                    }
                    None => self.visit(tree, child, walk),
                }
            }
        });
    }
}

/// Collect every record matching `query` using the process-wide searcher.
pub fn search<'t>(tree: &'t RbTree, query: &Query) -> SearchResults<'t> {
    Searcher::global().collect(tree, query)
}

/// Single-threaded reference search, in tree order.
pub fn search_sequential<'t>(tree: &'t RbTree, predicate: &Predicate) -> Vec<&'t FileRecord> {
    tree.iter().filter(|record| predicate.matches(record)).collect()
}
