//! Node accounting for leak detection.
//!
//! Every list node bumps a global counter when it is created and another when
//! it is dropped, whether it was freed directly (a request that never got
//! linked), by the epoch collector, or by the lock's destructor. Tests compare
//! the two to prove that released ranges are eventually reclaimed.
//!
//! # Usage
//!
//! ```ignore
//! use lockfree_rangelock::alloc;
//!
//! #[test]
//! #[serial]
//! fn test_no_leaks() {
//!     alloc::reset_counters();
//!
//!     // ... acquire and release ranges ...
//!
//!     drop(lock);
//!     alloc::flush_until_reclaimed(Duration::from_secs(5));
//!     alloc::check_no_leaks();
//! }
//! ```
//!
//! # Caveats
//!
//! - Counters are global, so tests that read them must not run in parallel
//!   with other lock users.
//! - Nodes unlinked under a pinned guard are only dropped once the epoch
//!   advances, so a check must first let the collector catch up.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Total number of nodes created since the last reset.
pub static NODES_CREATED: AtomicUsize = AtomicUsize::new(0);

/// Total number of nodes dropped since the last reset.
pub static NODES_DROPPED: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn record_allocation() {
	NODES_CREATED.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_reclamation() {
	NODES_DROPPED.fetch_add(1, Ordering::Relaxed);
}

/// Resets both counters to zero.
///
/// Call this at the beginning of a test, while no lock holds any node.
pub fn reset_counters() {
	NODES_CREATED.store(0, Ordering::SeqCst);
	NODES_DROPPED.store(0, Ordering::SeqCst);
}

/// Returns the current node statistics.
pub fn get_stats() -> NodeStats {
	NodeStats {
		created: NODES_CREATED.load(Ordering::SeqCst),
		dropped: NODES_DROPPED.load(Ordering::SeqCst),
	}
}

/// Node statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStats {
	/// Nodes created since reset.
	pub created: usize,
	/// Nodes dropped since reset.
	pub dropped: usize,
}

impl NodeStats {
	/// Nodes created but not yet dropped.
	pub fn live(&self) -> usize {
		self.created.saturating_sub(self.dropped)
	}
}

/// Repeatedly pins and flushes the epoch collector until every node created
/// since the last reset has been dropped, or `limit` elapses.
///
/// Returns `true` if all nodes were reclaimed in time.
pub fn flush_until_reclaimed(limit: Duration) -> bool {
	let deadline = Instant::now() + limit;
	loop {
		if get_stats().live() == 0 {
			return true;
		}
		if Instant::now() >= deadline {
			return false;
		}
		crate::sync::epoch::pin().flush();
		std::thread::yield_now();
	}
}

/// Checks that every node created since the last reset has been dropped.
///
/// # Panics
///
/// Panics if any node is still alive.
pub fn check_no_leaks() {
	let stats = get_stats();
	if stats.live() != 0 {
		panic!(
			"Node leak detected!\n\
             Created: {}\n\
             Dropped: {}\n\
             Still alive: {}",
			stats.created,
			stats.dropped,
			stats.live()
		);
	}
}
