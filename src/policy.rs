//! Range ordering and conflict rules.
//!
//! Every bucket is a list sorted by range start. While walking a bucket, an
//! inserter compares each live node against the range it wants to place and
//! gets back a [`Placement`]: keep walking, stop and link here, or stop because
//! the two ranges cannot be held at the same time.

use std::fmt;

use crate::error::{Error, Result};

/// Access mode requested for a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
	/// Shared access. Overlapping readers never conflict.
	Read,
	/// Exclusive access.
	Write,
}

impl LockMode {
	/// Returns `true` for [`LockMode::Read`].
	#[inline]
	pub fn is_reader(self) -> bool {
		matches!(self, LockMode::Read)
	}

	/// Returns `true` for [`LockMode::Write`].
	#[inline]
	pub fn is_writer(self) -> bool {
		matches!(self, LockMode::Write)
	}
}

/// A half-open range `[start, end)` together with its access mode.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Span {
	pub(crate) start: u64,
	pub(crate) end: u64,
	pub(crate) mode: LockMode,
}

impl Span {
	/// Builds a span, rejecting empty and reversed ranges.
	pub(crate) fn new(start: u64, end: u64, mode: LockMode) -> Result<Self> {
		if start >= end {
			return Err(Error::InvalidRange {
				start,
				end,
			});
		}
		Ok(Span {
			start,
			end,
			mode,
		})
	}

	/// Number of units covered. Never zero.
	#[inline]
	pub(crate) fn width(&self) -> u64 {
		self.end - self.start
	}

	#[inline]
	pub(crate) fn overlaps(&self, other: &Span) -> bool {
		self.start < other.end && other.start < self.end
	}

	/// Two spans conflict when they overlap and at least one is a writer.
	#[inline]
	pub(crate) fn conflicts_with(&self, other: &Span) -> bool {
		self.overlaps(other) && (self.mode.is_writer() || other.mode.is_writer())
	}
}

impl fmt::Debug for Span {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}[{}, {})", self.mode, self.start, self.end)
	}
}

/// Where a new span belongs relative to an existing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
	/// The new span sorts after the existing node: keep walking.
	Before,
	/// The spans cannot be held together.
	Conflict,
	/// The new span sorts before the existing node: link it here.
	After,
}

/// Classifies `new` against the node currently under the cursor.
///
/// `existing` is `None` at the end of a bucket. The checks run in a fixed
/// order and the order matters: overlapping readers are placed by their
/// start, so two readers never conflict, while a reader overlapping a writer
/// falls through every placement rule and conflicts.
pub(crate) fn compare(existing: Option<&Span>, new: &Span) -> Placement {
	let Some(existing) = existing else {
		return Placement::After;
	};
	let both_readers = existing.mode.is_reader() && new.mode.is_reader();

	if new.start >= existing.end {
		Placement::Before
	} else if both_readers && new.start >= existing.start {
		Placement::Before
	} else if existing.start >= new.end {
		Placement::After
	} else if both_readers && existing.start >= new.start {
		Placement::After
	} else {
		Placement::Conflict
	}
}
