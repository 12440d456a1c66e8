//! Synchronization primitives with loom support.
//!
//! Under normal compilation, re-exports from std and crossbeam.
//! Under `cfg(loom)`, uses loom's equivalents for deterministic testing.
//!
//! # Usage
//!
//! Instead of importing directly from `std::sync::atomic` or `crossbeam_epoch`,
//! import from this module:
//!
//! ```ignore
//! use crate::sync::Ordering;
//! use crate::sync::epoch::{self, Atomic, Owned, Shared};
//! ```
//!
//! # Loom Integration
//!
//! When compiled with `--cfg loom`, every spin in the lock goes through
//! [`spin_loop`] or [`yield_now`] from here, so loom can schedule the thread
//! that the spinner is waiting on.

// Allow unused items - some are only used under loom cfg
#![allow(unused)]

pub mod epoch;

// ===========================================================================
// Atomic Ordering
// ===========================================================================

#[cfg(not(loom))]
pub use std::sync::atomic::Ordering;

#[cfg(loom)]
pub use loom::sync::atomic::Ordering;

// ===========================================================================
// Spin Hints
// ===========================================================================

#[cfg(not(loom))]
pub use std::hint::spin_loop;

#[cfg(loom)]
pub use loom::hint::spin_loop;

#[cfg(not(loom))]
pub use std::thread::yield_now;

#[cfg(loom)]
pub use loom::thread::yield_now;
