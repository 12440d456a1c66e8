//! List nodes and the tombstone bit.
//!
//! A node's `next` pointer doubles as its state. While the low tag bit is
//! clear the node is live; once [`Node::tombstone`] sets it, the node is
//! logically released and any traversal may physically unlink it. Because the
//! tag sits on the pointer that an unlinking CAS must read, no thread can link
//! a new node behind a tombstoned one.

use crate::policy::Span;
use crate::sync::epoch::{Atomic, Guard, Shared};
use crate::sync::Ordering;

/// Tag set on `next` once the owning node has been released.
pub(crate) const TOMBSTONE: usize = 1;

// The tombstone lives in the pointer's low bit.
const _: () = assert!(std::mem::align_of::<Node>() >= 2);

pub(crate) struct Node {
	span: Span,
	pub(crate) next: Atomic<Node>,
}

impl Node {
	/// Creates a fresh, unlinked, live node.
	pub(crate) fn new(span: Span) -> Self {
		#[cfg(any(test, feature = "test-utils"))]
		crate::alloc::record_allocation();

		Node {
			span,
			next: Atomic::null(),
		}
	}

	#[inline]
	pub(crate) fn span(&self) -> &Span {
		&self.span
	}

	/// Loads the successor pointer, tag included.
	#[inline]
	pub(crate) fn successor<'g>(&self, ord: Ordering, guard: &'g Guard) -> Shared<'g, Node> {
		self.next.load(ord, guard)
	}

	#[inline]
	pub(crate) fn is_tombstoned(&self, guard: &Guard) -> bool {
		self.next.load(Ordering::Acquire, guard).tag() == TOMBSTONE
	}

	/// Marks the node as released.
	///
	/// Inserters and unlinkers may swing `next` concurrently, so this retries
	/// until the tag is installed on whatever successor is current.
	pub(crate) fn tombstone(&self, guard: &Guard) {
		let mut next = self.next.load(Ordering::Acquire, guard);
		loop {
			debug_assert_eq!(next.tag(), 0, "range node released twice");
			match self.next.compare_exchange_weak(
				next,
				next.with_tag(TOMBSTONE),
				Ordering::AcqRel,
				Ordering::Acquire,
				guard,
			) {
				Ok(_) => return,
				Err(err) => next = err.current,
			}
		}
	}
}

#[cfg(any(test, feature = "test-utils"))]
impl Drop for Node {
	fn drop(&mut self) {
		crate::alloc::record_reclamation();
	}
}
