//! Iteration over the live ranges of a bucket
use crate::node::{Node, TOMBSTONE};
use crate::policy::LockMode;
use crate::sync::epoch::{Guard, Shared};
use crate::sync::Ordering;

/// A snapshot of one live range held in a lock.
///
/// Returned by [`GenericRangeLock::ranges`]. The range may have been released
/// by the time the caller looks at it.
///
/// [`GenericRangeLock::ranges`]: crate::GenericRangeLock::ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockedRange {
	/// Inclusive lower bound.
	pub start: u64,
	/// Exclusive upper bound.
	pub end: u64,
	/// Access mode the range is held with.
	pub mode: LockMode,
}

impl LockedRange {
	pub(crate) fn of(node: &Node) -> Self {
		let span = node.span();
		LockedRange {
			start: span.start,
			end: span.end,
			mode: span.mode,
		}
	}
}

/// Raw iterator over the live nodes of a bucket, in list order.
///
/// Tombstoned nodes are skipped but not unlinked, so iterating never writes
/// to the list. Nodes linked by an acquisition that is still validating are
/// reported like any other live node.
pub(crate) struct Iter<'g> {
	cur: Shared<'g, Node>,
	guard: &'g Guard,
}

impl<'g> Iter<'g> {
	pub(crate) fn new(head: Shared<'g, Node>, guard: &'g Guard) -> Iter<'g> {
		Iter {
			cur: head.with_tag(0),
			guard,
		}
	}
}

impl<'g> Iterator for Iter<'g> {
	type Item = &'g Node;

	fn next(&mut self) -> Option<&'g Node> {
		loop {
			// Safety: every node reachable from the bucket stays allocated
			// while `guard` is pinned, including tombstoned ones.
			let node = unsafe { self.cur.as_ref() }?;
			let next = node.successor(Ordering::Acquire, self.guard);
			self.cur = next.with_tag(0);
			if next.tag() != TOMBSTONE {
				return Some(node);
			}
		}
	}
}
