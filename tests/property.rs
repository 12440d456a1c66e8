//! # Property-Based Tests for the Range Lock
//!
//! This module uses proptest to drive the lock with random sequences of
//! non-blocking acquisitions and releases, comparing every outcome against a
//! sequential reference model.
//!
//! ## Test Properties
//!
//! - Oracle comparison: `try_acquire` succeeds exactly when the model has no
//!   held range that conflicts with the request
//! - Structure: invariants hold after every step
//! - Snapshot: the ranges reported by the lock match the model
//! - Cleanup: releasing everything leaves nothing to purge twice

use lockfree_rangelock::relax::Spin;
use lockfree_rangelock::{GenericRangeLock, LockMode, RangeGuard};
use proptest::prelude::*;

// ===========================================================================
// Reference Model
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Held {
	start: u64,
	end: u64,
	mode: LockMode,
}

impl Held {
	fn conflicts_with(&self, other: &Held) -> bool {
		let overlap = self.start < other.end && other.start < self.end;
		overlap && (self.mode == LockMode::Write || other.mode == LockMode::Write)
	}
}

/// Operations that can be performed on the lock
#[derive(Debug, Clone)]
enum Op {
	Acquire {
		start: u64,
		width: u64,
		mode: LockMode,
	},
	Release(usize),
}

fn mode() -> impl Strategy<Value = LockMode> {
	prop_oneof![Just(LockMode::Read), Just(LockMode::Write)]
}

/// Generate a sequence of random operations over a small resource so that
/// conflicts are frequent.
fn operations(max_ops: usize) -> impl Strategy<Value = Vec<Op>> {
	prop::collection::vec(
		prop_oneof![
			3 => (0..48u64, 1..12u64, mode()).prop_map(|(start, width, mode)| Op::Acquire {
				start,
				width,
				mode
			}),
			2 => any::<usize>().prop_map(Op::Release),
		],
		0..max_ops,
	)
}

/// Replays `ops` against a lock and the model, checking them step by step.
fn check_against_model<const B: usize>(ops: &[Op]) -> Result<(), TestCaseError> {
	let lock = GenericRangeLock::<Spin, B>::new();
	let mut guards: Vec<RangeGuard<'_, Spin, B>> = Vec::new();
	let mut model: Vec<Held> = Vec::new();

	for op in ops {
		match *op {
			Op::Acquire {
				start,
				width,
				mode,
			} => {
				let request = Held {
					start,
					end: start + width,
					mode,
				};
				let allowed = !model.iter().any(|held| held.conflicts_with(&request));
				let outcome = lock.try_acquire(request.start, request.end, mode);
				prop_assert_eq!(outcome.is_ok(), allowed, "request {:?} against {:?}", request, model);
				if let Ok(guard) = outcome {
					guards.push(guard);
					model.push(request);
				}
			}
			Op::Release(idx) => {
				if !guards.is_empty() {
					let idx = idx % guards.len();
					guards.swap_remove(idx).release();
					model.swap_remove(idx);
				}
			}
		}
		lock.assert_invariants();
	}

	// Every held range shows up once per bucket it covers.
	let mut reported: Vec<(u64, u64, LockMode)> =
		(0..B).flat_map(|b| lock.ranges(b)).map(|r| (r.start, r.end, r.mode)).collect();
	let mut expected: Vec<(u64, u64, LockMode)> = model
		.iter()
		.flat_map(|h| std::iter::repeat((h.start, h.end, h.mode)).take(((h.end - h.start) as usize).min(B)))
		.collect();
	reported.sort_by_key(|&(s, e, m)| (s, e, m == LockMode::Write));
	expected.sort_by_key(|&(s, e, m)| (s, e, m == LockMode::Write));
	prop_assert_eq!(reported, expected);

	drop(guards);
	prop_assert!(lock.is_empty());
	lock.purge();
	prop_assert_eq!(lock.purge(), 0);
	Ok(())
}

// ===========================================================================
// Oracle Comparison
// ===========================================================================

proptest! {
	/// Property: a single list grants exactly what the model grants
	#[test]
	fn single_list_matches_model(ops in operations(200)) {
		check_against_model::<1>(&ops)?;
	}

	/// Property: sharding does not change which requests are granted
	#[test]
	fn sharded_matches_model(ops in operations(200)) {
		check_against_model::<4>(&ops)?;
	}

	/// Property: any set of disjoint writers is granted regardless of order
	#[test]
	fn disjoint_writers_always_granted(starts in prop::collection::hash_set(0..1000u64, 1..64)) {
		let lock = GenericRangeLock::<Spin, 8>::new();
		let starts: Vec<u64> = starts.into_iter().collect();
		let guards = starts
			.iter()
			.map(|&s| lock.try_acquire(s, s + 1, LockMode::Write))
			.collect::<Result<Vec<_>, _>>()
			.map_err(|e| TestCaseError::fail(e.to_string()))?;
		prop_assert_eq!(lock.len(), starts.len());
		lock.assert_invariants();
		drop(guards);
		prop_assert!(lock.is_empty());
	}
}
