//! The per-bucket lock-free sorted list.
//!
//! Each [`Bucket`] is a singly linked list of [`Node`]s kept in range order
//! (see [`policy::compare`]). A range is acquired in two phases:
//!
//! 1. **Insertion.** Walk the list from the head until the new range finds its
//!    slot, waiting out (or failing on) conflicting nodes along the way, then
//!    CAS the new node into the predecessor's `next`.
//! 2. **Validation.** Two inserters can each link their node before seeing the
//!    other's, so after linking the owner re-scans the part of the list a
//!    conflicting node could have landed in. A writer scans everything in front
//!    of itself; a reader scans the successors that start inside its range.
//!
//! Releasing a node only sets its tombstone bit. Whichever traversal next
//! passes the node unlinks it, and the thread whose unlinking CAS succeeds
//! hands it to the epoch collector. Each traversal restarts from its anchor
//! when it finds its own predecessor tombstoned, since linking or unlinking
//! behind a released node would be lost.

use std::time::Instant;

use tracing::trace;

use crate::error::{Error, Result};
use crate::node::{Node, TOMBSTONE};
use crate::policy::{self, Placement, Span};
use crate::relax::Relax;
use crate::sync::epoch::{self, Atomic, Guard, Owned, Shared};
use crate::sync::Ordering;

/// How long an acquisition may wait on a conflicting range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wait {
	/// Fail with [`Error::Conflict`] instead of waiting.
	Never,
	/// Wait until the conflicting range is released.
	Forever,
	/// Wait until the deadline, then fail with [`Error::Timeout`].
	Until(Instant),
}

impl Wait {
	#[inline]
	pub(crate) fn is_never(self) -> bool {
		matches!(self, Wait::Never)
	}

	#[inline]
	fn expired(self) -> bool {
		match self {
			Wait::Until(deadline) => Instant::now() >= deadline,
			_ => false,
		}
	}
}

/// Spins until `holder` is tombstoned or the wait runs out.
fn wait_for_release<R: Relax>(holder: &Node, wait: Wait, guard: &Guard) -> Result<()> {
	let mut relax = R::new();
	loop {
		if holder.is_tombstoned(guard) {
			return Ok(());
		}
		if wait.expired() {
			return Err(Error::Timeout);
		}
		relax.relax();
	}
}

/// Swings `prev` past the tombstoned `cur`.
///
/// Returns `Ok(next)` if this thread unlinked `cur` (and deferred its
/// destruction), or `Err(current)` with the value found in `prev` otherwise.
/// Either way the result is where the traversal continues.
fn unlink<'g>(
	prev: &Atomic<Node>,
	cur: Shared<'g, Node>,
	next: Shared<'g, Node>,
	guard: &'g Guard,
) -> std::result::Result<Shared<'g, Node>, Shared<'g, Node>> {
	let next = next.with_tag(0);
	match prev.compare_exchange(cur, next, Ordering::AcqRel, Ordering::Acquire, guard) {
		Ok(_) => {
			// SAFETY: `cur` is no longer reachable from the bucket and only the
			// winner of the CAS above gets here.
			unsafe { guard.defer_destroy(cur) };
			Ok(next)
		}
		Err(err) => Err(err.current),
	}
}

/// One shard of a range lock.
pub(crate) struct Bucket {
	head: Atomic<Node>,
}

impl Bucket {
	pub(crate) fn new() -> Self {
		Bucket {
			head: Atomic::null(),
		}
	}

	#[inline]
	pub(crate) fn head<'g>(&self, guard: &'g Guard) -> Shared<'g, Node> {
		self.head.load(Ordering::Acquire, guard)
	}

	/// Links a node for `span` into the bucket and validates it.
	///
	/// On success the returned node is live and owned by the caller, who must
	/// eventually tombstone it. [`Error::Retry`] means the node was linked but
	/// lost validation against a racing inserter; it has been tombstoned and
	/// the caller should try again with a fresh node.
	pub(crate) fn insert<'g, R: Relax>(
		&'g self,
		span: Span,
		wait: Wait,
		guard: &'g Guard,
	) -> Result<Shared<'g, Node>> {
		let mut node = Owned::new(Node::new(span));

		'restart: loop {
			let mut prev = &self.head;
			let mut cur = prev.load(Ordering::Acquire, guard);

			loop {
				if cur.tag() == TOMBSTONE {
					// The predecessor was released under us.
					continue 'restart;
				}

				// SAFETY: `cur` was loaded under `guard` and is not reclaimed
				// before the guard is dropped.
				let existing = unsafe { cur.as_ref() };

				if let Some(existing) = existing {
					let next = existing.successor(Ordering::Acquire, guard);
					if next.tag() == TOMBSTONE {
						cur = match unlink(prev, cur, next, guard) {
							Ok(next) | Err(next) => next,
						};
						continue;
					}
				}

				match (policy::compare(existing.map(Node::span), &span), existing) {
					(Placement::Before, Some(existing)) => {
						prev = &existing.next;
						cur = prev.load(Ordering::Acquire, guard);
					}
					(Placement::Conflict, Some(existing)) => {
						if wait.is_never() {
							return Err(Error::Conflict);
						}
						trace!(held = ?existing.span(), wanted = ?span, "waiting on conflicting range");
						wait_for_release::<R>(existing, wait, guard)?;
						cur = prev.load(Ordering::Acquire, guard);
					}
					_ => {
						node.next.store(cur, Ordering::Relaxed);
						match prev.compare_exchange(cur, node, Ordering::SeqCst, Ordering::Acquire, guard) {
							Ok(linked) => return self.validate::<R>(linked, wait, guard),
							Err(err) => {
								node = err.new;
								cur = err.current;
							}
						}
					}
				}
			}
		}
	}

	/// Proves that no conflicting node raced in while `linked` was inserted.
	///
	/// On failure `linked` is tombstoned before the error is returned.
	fn validate<'g, R: Relax>(
		&'g self,
		linked: Shared<'g, Node>,
		wait: Wait,
		guard: &'g Guard,
	) -> Result<Shared<'g, Node>> {
		// SAFETY: `linked` is live and owned by this thread.
		let node = unsafe { linked.deref() };

		let outcome = if node.span().mode.is_writer() {
			self.validate_writer(linked, guard)
		} else {
			validate_reader::<R>(node, wait, guard)
		};

		match outcome {
			Ok(()) => Ok(linked),
			Err(err) => {
				node.tombstone(guard);
				match err {
					Error::Retry if wait.is_never() => Err(Error::Conflict),
					err => Err(err),
				}
			}
		}
	}

	/// Scans from the head up to `linked`. Any live overlapping node in front
	/// of a writer was linked concurrently and wins.
	fn validate_writer<'g>(&'g self, linked: Shared<'g, Node>, guard: &'g Guard) -> Result<()> {
		// SAFETY: `linked` is live and owned by this thread.
		let span = *unsafe { linked.deref() }.span();

		'restart: loop {
			let mut prev = &self.head;
			let mut cur = prev.load(Ordering::SeqCst, guard);

			loop {
				if cur.tag() == TOMBSTONE {
					continue 'restart;
				}
				if cur == linked {
					return Ok(());
				}
				// SAFETY: loaded under `guard`.
				let Some(existing) = (unsafe { cur.as_ref() }) else {
					// `linked` is live, so the scan always meets it first.
					return Ok(());
				};

				let next = existing.successor(Ordering::SeqCst, guard);
				if next.tag() == TOMBSTONE {
					cur = match unlink(prev, cur, next, guard) {
						Ok(next) | Err(next) => next,
					};
					continue;
				}
				if existing.span().overlaps(&span) {
					trace!(held = ?existing.span(), wanted = ?span, "writer validation lost a race");
					return Err(Error::Retry);
				}

				prev = &existing.next;
				cur = next;
			}
		}
	}

	/// Unlinks every tombstoned node and returns how many this call removed.
	pub(crate) fn purge(&self, guard: &Guard) -> usize {
		let mut unlinked = 0;

		'restart: loop {
			let mut prev = &self.head;
			let mut cur = prev.load(Ordering::Acquire, guard);

			loop {
				if cur.tag() == TOMBSTONE {
					continue 'restart;
				}
				// SAFETY: loaded under `guard`.
				let Some(existing) = (unsafe { cur.as_ref() }) else {
					return unlinked;
				};

				let next = existing.successor(Ordering::Acquire, guard);
				if next.tag() == TOMBSTONE {
					cur = match unlink(prev, cur, next, guard) {
						Ok(next) => {
							unlinked += 1;
							next
						}
						Err(current) => current,
					};
					continue;
				}

				prev = &existing.next;
				cur = next;
			}
		}
	}
}

/// Scans the successors of a reader that start inside its range. A live
/// overlapping writer among them was linked concurrently: the reader either
/// gives up or waits for that writer to be released.
fn validate_reader<R: Relax>(node: &Node, wait: Wait, guard: &Guard) -> Result<()> {
	let span = *node.span();

	'restart: loop {
		let mut prev = &node.next;
		let mut cur = prev.load(Ordering::SeqCst, guard);

		loop {
			if cur.tag() == TOMBSTONE {
				continue 'restart;
			}
			// SAFETY: loaded under `guard`.
			let Some(existing) = (unsafe { cur.as_ref() }) else {
				return Ok(());
			};
			if existing.span().start >= span.end {
				return Ok(());
			}

			let next = existing.successor(Ordering::SeqCst, guard);
			if next.tag() == TOMBSTONE {
				cur = match unlink(prev, cur, next, guard) {
					Ok(next) | Err(next) => next,
				};
				continue;
			}
			if existing.span().conflicts_with(&span) {
				if wait.is_never() {
					return Err(Error::Conflict);
				}
				trace!(held = ?existing.span(), wanted = ?span, "reader waiting on racing writer");
				wait_for_release::<R>(existing, wait, guard)?;
				cur = prev.load(Ordering::SeqCst, guard);
				continue;
			}

			prev = &existing.next;
			cur = next;
		}
	}
}

impl Drop for Bucket {
	fn drop(&mut self) {
		// SAFETY: `&mut self` rules out concurrent traversals, and every node
		// still reachable from the head is owned by the chain. Nodes unlinked
		// earlier are owned by the collector and are not reachable from here.
		unsafe {
			let guard = epoch::unprotected();
			let mut cur = self.head.load(Ordering::Relaxed, guard);
			while let Some(node) = cur.as_ref() {
				let next = node.successor(Ordering::Relaxed, guard).with_tag(0);
				drop(cur.into_owned());
				cur = next;
			}
		}
	}
}
