//! Memory leak detection tests for the range lock.
//!
//! These tests verify that every list node is eventually dropped, whether it
//! was refused before being linked, released and unlinked by a traversal,
//! unlinked by `purge`, or still linked when the lock itself is dropped.
//!
//! # Running Memory Tests
//!
//! ```bash
//! cargo test --test memory_tests
//! ```
//!
//! # Test Design
//!
//! Node counters are process-wide, so every test here is `#[serial]`. Each
//! test follows this pattern:
//! 1. Reset the counters
//! 2. Acquire and release ranges
//! 3. Drop the lock, or purge it, and let the epoch collector catch up
//! 4. Check that created and dropped node counts match

use lockfree_rangelock::alloc;
use lockfree_rangelock::{Error, LockMode, RangeLock, ShardedRangeLock};
use serial_test::serial;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// ===========================================================================
// Helper Functions
// ===========================================================================

/// Waits for deferred reclamation and asserts nothing is left alive.
fn assert_all_reclaimed() {
	let reclaimed = alloc::flush_until_reclaimed(Duration::from_secs(10));
	assert!(reclaimed, "nodes still alive after flushing: {:?}", alloc::get_stats());
	alloc::check_no_leaks();
}

// ===========================================================================
// Basic Memory Tests
// ===========================================================================

#[test]
#[serial]
fn no_leak_after_acquire_release_cycles() {
	alloc::reset_counters();
	let lock = RangeLock::new();

	for i in 0..1000u64 {
		let guard = lock.acquire(i % 37, i % 37 + 3, LockMode::Write).unwrap();
		drop(guard);
	}

	assert_eq!(alloc::get_stats().created, 1000);
	drop(lock);
	assert_all_reclaimed();
}

#[test]
#[serial]
fn refused_requests_free_their_node_immediately() {
	alloc::reset_counters();
	let lock = RangeLock::new();
	let held = lock.acquire(0, 10, LockMode::Write).unwrap();

	for _ in 0..100 {
		assert_eq!(lock.try_acquire(5, 6, LockMode::Read).unwrap_err(), Error::Conflict);
	}

	// Refused before linking: nothing to defer.
	let stats = alloc::get_stats();
	assert_eq!(stats.created, 101);
	assert_eq!(stats.live(), 1);

	drop(held);
	drop(lock);
	assert_all_reclaimed();
}

#[test]
#[serial]
fn purge_reclaims_released_nodes_while_lock_lives() {
	alloc::reset_counters();
	let lock = ShardedRangeLock::new();

	let guards: Vec<_> = (0..64u64).map(|i| lock.acquire(i, i + 2, LockMode::Read).unwrap()).collect();
	drop(guards);
	assert!(lock.is_empty());

	assert_eq!(lock.purge(), 128);
	assert_all_reclaimed();

	// The lock is still usable afterwards.
	let guard = lock.acquire(3, 4, LockMode::Write).unwrap();
	assert_eq!(alloc::get_stats().live(), 1);
	drop(guard);
}

#[test]
#[serial]
fn dropping_lock_frees_nodes_still_linked() {
	alloc::reset_counters();
	let lock = ShardedRangeLock::new();

	// Forgotten guards leave live nodes behind. The last range is released
	// after everything else is linked, so no traversal unlinks it.
	std::mem::forget(lock.acquire(0, 4, LockMode::Read).unwrap());
	std::mem::forget(lock.acquire_full(LockMode::Read).unwrap());
	drop(lock.acquire(10, 11, LockMode::Read).unwrap());
	assert_eq!(alloc::get_stats().live(), 4 + 16 + 1);

	drop(lock);
	assert_all_reclaimed();
}

#[test]
#[serial]
fn no_leak_after_timeouts_and_rollbacks() {
	alloc::reset_counters();
	let lock = ShardedRangeLock::new();
	let held = lock.acquire(9, 10, LockMode::Write).unwrap();

	for _ in 0..20 {
		assert_eq!(
			lock.acquire_timeout(0, 16, LockMode::Read, Duration::from_millis(1)).unwrap_err(),
			Error::Timeout
		);
		assert_eq!(lock.try_acquire(4, 12, LockMode::Write).unwrap_err(), Error::Conflict);
	}
	assert_eq!(lock.len(), 1);

	drop(held);
	drop(lock);
	assert_all_reclaimed();
}

// ===========================================================================
// Concurrent Memory Tests
// ===========================================================================

#[test]
#[serial]
fn no_leak_after_concurrent_churn() {
	alloc::reset_counters();
	let lock = Arc::new(ShardedRangeLock::new());

	let handles: Vec<_> = (0..4u64)
		.map(|t| {
			let lock = Arc::clone(&lock);
			thread::spawn(move || {
				for i in 0..500u64 {
					let start = (t * 13 + i * 7) % 100;
					let mode = if i % 4 == 0 {
						LockMode::Write
					} else {
						LockMode::Read
					};
					let _g = lock.acquire(start, start + 1 + i % 5, mode).unwrap();
				}
			})
		})
		.collect();

	for h in handles {
		h.join().unwrap();
	}

	assert!(lock.is_empty());
	drop(lock);
	assert_all_reclaimed();
}
