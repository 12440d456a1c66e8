//! # Error Types for the Range Lock
//!
//! This module defines the outcomes an acquisition can end with besides
//! success, plus the internal retry signal used by the validation pass.
//!
//! ## Error Handling Strategy
//!
//! Insertion is optimistic: a node is linked into its bucket first and proven
//! conflict-free afterwards. When the proof fails because another thread raced
//! in, the insertion does not panic. The node is tombstoned and the caller is
//! told to start again with a fresh node.
//!
//! ## Error Flow
//!
//! ```text
//! acquire(start, end, mode)
//!      │
//!      ▼
//! Walk bucket, find slot ────────► Err(Conflict)  (try_acquire only)
//!      │
//!      ▼
//! CAS node into slot
//!      │
//!      ▼
//! Validate ──────────────────────► Err(Retry) ───► tombstone, insert fresh node
//!      │
//!      ▼ (Ok)
//! Next bucket, or return the guard
//! ```
//!
//! `Retry` never escapes a public acquire call: blocking acquisitions loop on it
//! and non-blocking ones report it as [`Error::Conflict`].

use thiserror::Error;

/// Errors that can occur while acquiring a range.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
	/// A live lock overlapping the requested range is incompatible with it.
	///
	/// Only returned by the non-blocking acquisition paths. This is a normal
	/// outcome rather than a failure: the caller may retry later or fall back
	/// to a blocking acquisition.
	#[error("range is held by a conflicting lock")]
	Conflict,

	/// The deadline passed before every conflicting lock was released.
	///
	/// Any node that was already linked for this request has been tombstoned
	/// before the error is returned, so no partial ownership leaks out.
	#[error("timed out waiting for a conflicting lock")]
	Timeout,

	/// The guard's node table could not be allocated.
	///
	/// Raised before anything is linked into a bucket, so the lock is left
	/// exactly as it was.
	#[error("failed to allocate range lock bookkeeping")]
	AllocationFailure,

	/// The requested range is empty or reversed.
	#[error("invalid lock range {start}..{end}")]
	InvalidRange {
		/// Inclusive lower bound that was requested.
		start: u64,
		/// Exclusive upper bound that was requested.
		end: u64,
	},

	/// Post-insertion validation found a conflicting node that raced in.
	///
	/// Internal flow control. The node that lost has already been tombstoned;
	/// the caller must insert a fresh one.
	#[error("validation lost a race with a concurrent insertion")]
	Retry,
}

/// A Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_messages() {
		assert_eq!(Error::Conflict.to_string(), "range is held by a conflicting lock");
		assert_eq!(
			Error::InvalidRange {
				start: 7,
				end: 3
			}
			.to_string(),
			"invalid lock range 7..3"
		);
	}
}
