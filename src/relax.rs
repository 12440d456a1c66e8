//! Wait policies for contended acquisitions.
//!
//! A blocking acquisition that meets a conflicting range spins until the
//! holder's node is tombstoned. How each iteration of that spin behaves is
//! chosen with the `R` parameter of [`GenericRangeLock`].
//!
//! [`GenericRangeLock`]: crate::GenericRangeLock

use crate::sync::{spin_loop, yield_now};

/// A strategy for the body of a spin-wait loop.
///
/// A fresh value is created for every wait, so implementations may keep
/// per-wait state such as a step counter.
pub trait Relax {
	/// Returns the initial state for a new wait.
	fn new() -> Self;

	/// Performs one waiting step.
	fn relax(&mut self);
}

/// Busy-waits with a CPU spin hint on every step.
#[derive(Debug)]
pub struct Spin;

impl Relax for Spin {
	#[inline(always)]
	fn new() -> Self {
		Spin
	}

	#[inline(always)]
	fn relax(&mut self) {
		spin_loop();
	}
}

/// Yields the time slice to the OS scheduler on every step.
#[derive(Debug)]
pub struct Yield;

impl Relax for Yield {
	#[inline(always)]
	fn new() -> Self {
		Yield
	}

	#[inline(always)]
	fn relax(&mut self) {
		yield_now();
	}
}

/// Spins briefly, then starts yielding.
///
/// The first ten steps spin, the next ten yield, and every later step
/// yields again after resetting the counter.
#[derive(Debug)]
pub struct SpinThenYield {
	counter: u32,
}

impl Relax for SpinThenYield {
	#[inline]
	fn new() -> Self {
		SpinThenYield {
			counter: 0,
		}
	}

	fn relax(&mut self) {
		if self.counter < 10 {
			self.counter += 1;
			spin_loop();
		} else if self.counter < 20 {
			self.counter += 1;
			yield_now();
		} else {
			self.counter = 0;
			yield_now();
		}
	}
}

/// Exponential backoff built on [`crossbeam_utils::Backoff`].
///
/// Spins with growing step counts and switches to yielding once the backoff
/// is completed. Used by [`RangeLock`] and [`ShardedRangeLock`].
///
/// [`RangeLock`]: crate::RangeLock
/// [`ShardedRangeLock`]: crate::ShardedRangeLock
#[derive(Debug)]
pub struct Backoff {
	#[cfg(not(loom))]
	inner: crossbeam_utils::Backoff,
}

impl Relax for Backoff {
	#[inline]
	fn new() -> Self {
		Backoff {
			#[cfg(not(loom))]
			inner: crossbeam_utils::Backoff::new(),
		}
	}

	#[inline]
	fn relax(&mut self) {
		// Under loom every wait must hand control back to the model.
		#[cfg(loom)]
		yield_now();

		#[cfg(not(loom))]
		self.inner.snooze();
	}
}
