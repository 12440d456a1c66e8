//! # Lock-Free Range Lock
//!
//! This crate provides a reader/writer lock over numeric ranges `[start, end)`
//! of a shared resource, such as the byte offsets of a file. Requests for
//! disjoint ranges, or for overlapping ranges that are all readers, proceed in
//! parallel. The lock holds no mutex: every held range is a node in a
//! lock-free sorted list, and all shared mutation is a single-word CAS.
//!
//! ## Design Overview
//!
//! ### Key Concepts
//!
//! **Sorted insertion**: An acquisition walks its bucket's list in range order
//! and links a node for its range at the first position where it fits. If it
//! meets a conflicting range on the way, it either fails immediately
//! ([`GenericRangeLock::try_acquire`]) or spins until that range is released.
//!
//! **Optimistic validation**: Two acquisitions can link conflicting nodes at
//! different positions before either sees the other. After linking, each one
//! re-scans the part of the list where a conflicting node could hide. A writer
//! that finds an earlier overlapping node withdraws and starts over; a reader
//! that finds a later overlapping writer waits for it.
//!
//! **Tombstones**: Releasing a range sets the low tag bit of its node's `next`
//! pointer. Later traversals unlink tombstoned nodes, and the unlinked memory
//! is reclaimed through `crossbeam_epoch` once no thread can still read it.
//!
//! **Sharding**: A [`ShardedRangeLock`] spreads units over [`BUCKET_CNT`]
//! lists by `unit % BUCKET_CNT`. A range registers a node in every bucket one
//! of its units maps to, taking buckets in ascending order.
//!
//! ### Bucket Structure
//!
//! ```text
//!   bucket head
//!       │
//!       ▼
//!   ┌─────────┐    ┌─────────┐    ┌─────────┐    ┌─────────┐
//!   │ R [0,5) │───►│ R [2,8) │──x►│ W [8,9) │───►│ W [9,12)│───► null
//!   └─────────┘    └─────────┘    └─────────┘    └─────────┘
//!                       tombstoned ──┘
//!                  (unlinked by the next traversal that passes)
//! ```
//!
//! ## Basic Usage
//!
//! ```
//! use lockfree_rangelock::{Error, LockMode, RangeLock};
//!
//! let lock = RangeLock::new();
//!
//! // Overlapping readers share.
//! let a = lock.acquire(0, 5, LockMode::Read)?;
//! let b = lock.acquire(2, 8, LockMode::Read)?;
//!
//! // A writer overlapping a reader is refused by the non-blocking path.
//! assert_eq!(lock.try_acquire(3, 4, LockMode::Write).unwrap_err(), Error::Conflict);
//!
//! drop(a);
//! b.release();
//! let w = lock.try_acquire(3, 4, LockMode::Write)?;
//! assert_eq!((w.start(), w.end()), (3, 4));
//! # Ok::<(), Error>(())
//! ```
//!
//! ## Thread Safety
//!
//! The lock is `Send + Sync` and is usually shared through an `Arc` or a
//! scoped thread borrow. A [`RangeGuard`] is `Send`, so a range may be
//! released by a different thread than the one that acquired it.

use std::fmt;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;
use smallvec::SmallVec;
use tracing::{debug, trace};

pub mod error;
pub mod iter;
mod list;
mod node;
mod policy;
pub mod relax;
mod sync;

#[cfg(any(test, feature = "test-utils"))]
pub mod alloc;

pub use error::{Error, Result};
pub use iter::LockedRange;
pub use policy::LockMode;

use list::{Bucket, Wait};
use node::Node;
use policy::Span;
use relax::{Backoff, Relax};
use sync::epoch;

// ---------------------------------------------------------------------------
// Configuration Constants
// ---------------------------------------------------------------------------

/// Number of buckets used by [`ShardedRangeLock`].
pub const BUCKET_CNT: usize = 16;

/// Exclusive upper bound of the whole resource, used by
/// [`GenericRangeLock::acquire_full`].
pub const FULL_RANGE: u64 = u64::MAX;

// ---------------------------------------------------------------------------
// Public Type Aliases
// ---------------------------------------------------------------------------

/// A range lock with a single list and exponential backoff while waiting.
///
/// This is the recommended type when ranges are wide or few. Use
/// [`ShardedRangeLock`] when most requests cover one or a few units.
pub type RangeLock = GenericRangeLock<Backoff, 1>;

/// A range lock sharded over [`BUCKET_CNT`] lists.
pub type ShardedRangeLock = GenericRangeLock<Backoff, BUCKET_CNT>;

// ---------------------------------------------------------------------------
// Core Lock Structure
// ---------------------------------------------------------------------------

/// A lock-free range lock with a configurable wait policy and bucket count.
///
/// # Type Parameters
///
/// - `R`: The [`Relax`] policy run on each step of a blocking wait.
/// - `B`: Number of buckets. `1` keeps every range in one list; larger values
///   shard units by `unit % B`. Must be non-zero.
pub struct GenericRangeLock<R, const B: usize> {
	buckets: Box<[CachePadded<Bucket>]>,
	relax: PhantomData<fn() -> R>,
}

impl<R: Relax, const B: usize> Default for GenericRangeLock<R, B> {
	fn default() -> Self {
		Self::new()
	}
}

impl<R: Relax, const B: usize> GenericRangeLock<R, B> {
	const NON_EMPTY: () = assert!(B > 0, "a range lock needs at least one bucket");

	/// Creates a new lock with no ranges held.
	pub fn new() -> Self {
		#[allow(clippy::let_unit_value)]
		let () = Self::NON_EMPTY;

		GenericRangeLock {
			buckets: (0..B).map(|_| CachePadded::new(Bucket::new())).collect(),
			relax: PhantomData,
		}
	}

	/// Number of buckets, `B`.
	#[inline]
	pub const fn bucket_count(&self) -> usize {
		B
	}

	/// Acquires `[start, end)` in `mode`, waiting as long as it takes for
	/// conflicting ranges to be released.
	///
	/// # Errors
	///
	/// [`Error::InvalidRange`] if `start >= end`, [`Error::AllocationFailure`]
	/// if the guard's bookkeeping cannot be allocated.
	pub fn acquire(&self, start: u64, end: u64, mode: LockMode) -> Result<RangeGuard<'_, R, B>> {
		self.lock_span(Span::new(start, end, mode)?, Wait::Forever)
	}

	/// Acquires `[start, end)` in `mode` without waiting.
	///
	/// # Errors
	///
	/// [`Error::Conflict`] if any conflicting range is held or being acquired,
	/// plus the errors of [`GenericRangeLock::acquire`].
	pub fn try_acquire(&self, start: u64, end: u64, mode: LockMode) -> Result<RangeGuard<'_, R, B>> {
		self.lock_span(Span::new(start, end, mode)?, Wait::Never)
	}

	/// Like [`GenericRangeLock::acquire`], but gives up after `timeout`.
	///
	/// # Errors
	///
	/// [`Error::Timeout`] if a conflicting range is still held when the time
	/// runs out. Buckets already acquired for this request are released.
	pub fn acquire_timeout(
		&self,
		start: u64,
		end: u64,
		mode: LockMode,
		timeout: Duration,
	) -> Result<RangeGuard<'_, R, B>> {
		let span = Span::new(start, end, mode)?;
		let wait = Instant::now().checked_add(timeout).map_or(Wait::Forever, Wait::Until);
		self.lock_span(span, wait)
	}

	/// Like [`GenericRangeLock::acquire`], but gives up at `deadline`.
	///
	/// # Errors
	///
	/// See [`GenericRangeLock::acquire_timeout`].
	pub fn acquire_until(
		&self,
		start: u64,
		end: u64,
		mode: LockMode,
		deadline: Instant,
	) -> Result<RangeGuard<'_, R, B>> {
		self.lock_span(Span::new(start, end, mode)?, Wait::Until(deadline))
	}

	/// Acquires the whole resource, `[0, FULL_RANGE)`.
	pub fn acquire_full(&self, mode: LockMode) -> Result<RangeGuard<'_, R, B>> {
		self.acquire(0, FULL_RANGE, mode)
	}

	/// Acquires the whole resource without waiting.
	pub fn try_acquire_full(&self, mode: LockMode) -> Result<RangeGuard<'_, R, B>> {
		self.try_acquire(0, FULL_RANGE, mode)
	}

	/// Number of live nodes over all buckets.
	///
	/// A range held in several buckets counts once per bucket. Acquisitions
	/// still in their validation phase are counted too.
	pub fn len(&self) -> usize {
		let guard = epoch::pin();
		self.buckets.iter().map(|bucket| iter::Iter::new(bucket.head(&guard), &guard).count()).sum()
	}

	/// Returns `true` if no range is held.
	pub fn is_empty(&self) -> bool {
		let guard = epoch::pin();
		self.buckets.iter().all(|bucket| iter::Iter::new(bucket.head(&guard), &guard).next().is_none())
	}

	/// Returns the live ranges of one bucket, in list order.
	///
	/// # Panics
	///
	/// Panics if `bucket >= B`.
	pub fn ranges(&self, bucket: usize) -> Vec<LockedRange> {
		let guard = epoch::pin();
		iter::Iter::new(self.buckets[bucket].head(&guard), &guard).map(LockedRange::of).collect()
	}

	/// Unlinks every released node that no traversal has unlinked yet.
	///
	/// Returns the number of nodes this call unlinked. Their memory is freed
	/// once the epoch collector determines no thread can still read them.
	pub fn purge(&self) -> usize {
		let guard = epoch::pin();
		let unlinked = self.buckets.iter().map(|bucket| bucket.purge(&guard)).sum();
		guard.flush();
		unlinked
	}

	/// Buckets a span must be registered in, in ascending order.
	fn covered_buckets(span: Span) -> impl Iterator<Item = usize> {
		let first = (span.start % B as u64) as usize;
		let width = span.width();
		(0..B).filter(move |&bucket| width >= B as u64 || (((bucket + B - first) % B) as u64) < width)
	}

	fn lock_span(&self, span: Span, wait: Wait) -> Result<RangeGuard<'_, R, B>> {
		let mut held = RangeGuard {
			lock: self,
			span,
			nodes: SmallVec::new(),
		};
		let count = span.width().min(B as u64) as usize;
		held.nodes.try_reserve_exact(count).map_err(|_| Error::AllocationFailure)?;

		for bucket in Self::covered_buckets(span) {
			match self.lock_bucket(bucket, span, wait) {
				Ok(node) => held.nodes.push(node),
				Err(err) => {
					if !held.nodes.is_empty() {
						debug!(?span, buckets = held.nodes.len(), %err, "rolling back partially acquired range");
					} else if err == Error::Timeout {
						debug!(?span, "timed out acquiring range");
					}
					// Dropping `held` releases the buckets taken so far.
					return Err(err);
				}
			}
		}
		Ok(held)
	}

	/// Inserts `span` into one bucket, retrying until validation succeeds.
	fn lock_bucket(&self, bucket: usize, span: Span, wait: Wait) -> Result<*const Node> {
		let list = &self.buckets[bucket];
		let mut guard = epoch::pin();
		loop {
			let outcome = list.insert::<R>(span, wait, &guard).map(|node| node.as_raw());
			match outcome {
				Ok(node) => return Ok(node),
				Err(Error::Retry) => {
					trace!(bucket, ?span, "validation lost a race, retrying");
					guard.repin();
				}
				Err(err) => return Err(err),
			}
		}
	}
}

impl<R, const B: usize> fmt::Debug for GenericRangeLock<R, B> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let guard = epoch::pin();
		let mut list = f.debug_list();
		for bucket in self.buckets.iter() {
			list.entries(iter::Iter::new(bucket.head(&guard), &guard).map(LockedRange::of));
		}
		list.finish()
	}
}

// ---------------------------------------------------------------------------
// Range Guard
// ---------------------------------------------------------------------------

/// RAII guard for a held range.
///
/// The range stays held until the guard is dropped or [`RangeGuard::release`]
/// is called. Release consumes the guard, so a range can only be released once.
#[must_use = "if unused the range is released immediately"]
pub struct RangeGuard<'a, R, const B: usize> {
	lock: &'a GenericRangeLock<R, B>,
	span: Span,
	/// One node per covered bucket, in ascending bucket order.
	nodes: SmallVec<[*const Node; 1]>,
}

// SAFETY: the nodes are only touched through atomic operations, and the
// borrow of the lock keeps them from being freed while the guard exists.
unsafe impl<R, const B: usize> Send for RangeGuard<'_, R, B> {}
unsafe impl<R, const B: usize> Sync for RangeGuard<'_, R, B> {}

impl<'a, R, const B: usize> RangeGuard<'a, R, B> {
	/// Inclusive lower bound of the held range.
	#[inline]
	pub fn start(&self) -> u64 {
		self.span.start
	}

	/// Exclusive upper bound of the held range.
	#[inline]
	pub fn end(&self) -> u64 {
		self.span.end
	}

	#[inline]
	pub fn mode(&self) -> LockMode {
		self.span.mode
	}

	/// Returns `true` if this guard holds the whole resource.
	#[inline]
	pub fn is_full(&self) -> bool {
		self.span.start == 0 && self.span.end == FULL_RANGE
	}

	/// Number of buckets this range is registered in.
	#[inline]
	pub fn bucket_count(&self) -> usize {
		self.nodes.len()
	}

	/// The lock this range is held in.
	#[inline]
	pub fn lock(&self) -> &'a GenericRangeLock<R, B> {
		self.lock
	}

	/// Releases the range.
	#[inline]
	pub fn release(self) {
		drop(self);
	}
}

impl<R, const B: usize> Drop for RangeGuard<'_, R, B> {
	fn drop(&mut self) {
		let guard = epoch::pin();
		for node in self.nodes.drain(..) {
			// SAFETY: the node was linked by this guard and is only reclaimed
			// after it is tombstoned below and then unlinked.
			unsafe { &*node }.tombstone(&guard);
		}
	}
}

impl<R, const B: usize> fmt::Debug for RangeGuard<'_, R, B> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RangeGuard")
			.field("start", &self.span.start)
			.field("end", &self.span.end)
			.field("mode", &self.span.mode)
			.field("buckets", &self.nodes.len())
			.finish()
	}
}

// ===========================================================================
// Test-Only Validation Module
// ===========================================================================

/// Invariant validation for testing.
#[cfg(any(test, feature = "test-utils"))]
impl<R: Relax, const B: usize> GenericRangeLock<R, B> {
	/// Validates the structure of every bucket. Panics with diagnostic info if
	/// any invariant is violated.
	///
	/// Only meaningful while no acquisition is in flight: a node that is still
	/// validating may legitimately overlap a held one.
	///
	/// # Invariants Checked
	///
	/// 1. Ordering: live nodes are sorted by range start
	/// 2. Exclusion: overlapping live nodes are all readers
	/// 3. Placement: each node sits in a bucket one of its units maps to
	pub fn assert_invariants(&self) {
		let guard = epoch::pin();
		for (index, bucket) in self.buckets.iter().enumerate() {
			let live: Vec<Span> = iter::Iter::new(bucket.head(&guard), &guard).map(|node| *node.span()).collect();

			for pair in live.windows(2) {
				assert!(
					pair[0].start <= pair[1].start,
					"Bucket {} out of order: {:?} before {:?}",
					index,
					pair[0],
					pair[1]
				);
			}

			for (i, a) in live.iter().enumerate() {
				for b in &live[i + 1..] {
					assert!(!a.conflicts_with(b), "Bucket {} holds conflicting ranges {:?} and {:?}", index, a, b);
				}
				assert!(
					Self::covered_buckets(*a).any(|covered| covered == index),
					"Range {:?} registered in bucket {} it does not cover",
					a,
					index
				);
			}
		}
	}
}

#[cfg(all(test, not(loom)))]
mod tests {
	use super::*;
	use crate::relax::Spin;

	type Sharded4 = GenericRangeLock<Spin, 4>;

	#[test]
	fn covered_buckets_wrap_around() {
		let buckets = |start, end| {
			Sharded4::covered_buckets(Span::new(start, end, LockMode::Read).unwrap()).collect::<Vec<_>>()
		};
		assert_eq!(buckets(5, 6), vec![1]);
		assert_eq!(buckets(3, 5), vec![0, 3]);
		assert_eq!(buckets(6, 9), vec![0, 2, 3]);
		assert_eq!(buckets(0, FULL_RANGE), vec![0, 1, 2, 3]);
		assert_eq!(buckets(7, 11), vec![0, 1, 2, 3]);
		assert_eq!(GenericRangeLock::<Spin, 1>::covered_buckets(Span::new(9, 10, LockMode::Read).unwrap()).count(), 1);
	}

	#[test]
	fn guard_reports_its_range() {
		let lock = RangeLock::new();
		let guard = lock.acquire(3, 9, LockMode::Write).unwrap();
		assert_eq!((guard.start(), guard.end(), guard.mode()), (3, 9, LockMode::Write));
		assert_eq!(guard.bucket_count(), 1);
		assert!(!guard.is_full());
		assert_eq!(lock.len(), 1);
		guard.release();
		assert!(lock.is_empty());
	}

	#[test]
	fn invalid_ranges_are_rejected() {
		let lock = RangeLock::new();
		assert_eq!(
			lock.acquire(5, 5, LockMode::Read).unwrap_err(),
			Error::InvalidRange {
				start: 5,
				end: 5
			}
		);
		assert!(matches!(lock.try_acquire(9, 1, LockMode::Write), Err(Error::InvalidRange { .. })));
		assert!(lock.is_empty());
	}

	#[test]
	fn sharded_conflict_rolls_back_earlier_buckets() {
		let lock = Sharded4::new();
		let _held = lock.acquire(2, 3, LockMode::Write).unwrap();

		// [0,4) takes buckets 0 and 1 before failing on bucket 2.
		assert_eq!(lock.try_acquire(0, 4, LockMode::Write).unwrap_err(), Error::Conflict);
		assert_eq!(lock.len(), 1);
		assert_eq!(lock.ranges(0), vec![]);
		assert_eq!(
			lock.ranges(2),
			vec![LockedRange {
				start: 2,
				end: 3,
				mode: LockMode::Write
			}]
		);
		lock.assert_invariants();
	}

	#[test]
	fn full_range_covers_every_bucket() {
		let lock = Sharded4::new();
		let full = lock.try_acquire_full(LockMode::Read).unwrap();
		assert!(full.is_full());
		assert_eq!(full.bucket_count(), 4);
		assert_eq!(lock.try_acquire(13, 14, LockMode::Write).unwrap_err(), Error::Conflict);
		let reader = lock.try_acquire(13, 14, LockMode::Read).unwrap();
		lock.assert_invariants();
		drop(reader);
		drop(full);
		assert!(lock.is_empty());
	}

	#[test]
	fn purge_unlinks_released_nodes() {
		let lock = RangeLock::new();
		let guards: Vec<_> = (0..8).map(|i| lock.acquire(i, i + 1, LockMode::Write).unwrap()).collect();
		drop(guards);
		assert!(lock.is_empty());
		assert_eq!(lock.purge(), 8);
		assert_eq!(lock.purge(), 0);
	}

	#[test]
	fn debug_lists_held_ranges() {
		let lock = RangeLock::new();
		let _a = lock.acquire(0, 2, LockMode::Read).unwrap();
		let rendered = format!("{:?}", lock);
		assert!(rendered.contains("start: 0"), "{}", rendered);
		assert!(rendered.contains("Read"), "{}", rendered);
	}
}
