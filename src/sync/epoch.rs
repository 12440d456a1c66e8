//! Epoch-based memory reclamation with loom support.
//!
//! Under normal compilation, re-exports crossbeam_epoch.
//! Under `cfg(loom)`, provides a mock with the same API surface, including
//! the low-bit pointer tags the list uses to mark tombstoned nodes.
//!
//! # Loom Mock
//!
//! The mock stores a tagged pointer in a loom `AtomicUsize` so that every
//! load and CAS on a `next` field is visible to the model checker. Deferred
//! destruction is a no-op: a node unlinked during a model run stays allocated
//! until the model finishes, which rules out use-after-free inside the model
//! without needing a real collector.

// Allow unused items - some are only used under loom cfg
#![allow(unused)]

#[cfg(not(loom))]
pub use crossbeam_epoch::{pin, unprotected, Atomic, CompareExchangeError, Guard, Owned, Pointer, Shared};

#[cfg(loom)]
mod mock_epoch {
	//! Mock epoch-based memory reclamation for loom testing.

	use std::marker::PhantomData;
	use std::mem;

	use loom::sync::atomic::{AtomicUsize, Ordering};

	/// Mask of the low pointer bits that are free to carry a tag for `T`.
	fn low_bits<T>() -> usize {
		mem::align_of::<T>() - 1
	}

	fn decompose<T>(data: usize) -> (*mut T, usize) {
		((data & !low_bits::<T>()) as *mut T, data & low_bits::<T>())
	}

	/// A mock epoch guard. Pinning is a no-op under the model.
	pub struct Guard {
		// Prevent Send/Sync to match crossbeam_epoch behavior
		_marker: PhantomData<*mut ()>,
	}

	impl Guard {
		const fn new() -> Self {
			Guard {
				_marker: PhantomData,
			}
		}

		/// Defers destruction of the given shared pointer.
		///
		/// # Safety
		///
		/// The pointer must have been unlinked from every shared location.
		pub unsafe fn defer_destroy<T>(&self, _ptr: Shared<'_, T>) {
			// Leaked until the model run ends; see the module docs.
		}

		/// Unpins and immediately re-pins the thread. No-op in the mock.
		pub fn repin(&mut self) {}

		/// Flush deferred operations. No-op in the mock.
		pub fn flush(&self) {}
	}

	struct UnprotectedGuard(Guard);

	// SAFETY: the mock guard carries no state.
	unsafe impl Sync for UnprotectedGuard {}

	static UNPROTECTED: UnprotectedGuard = UnprotectedGuard(Guard::new());

	/// Pin the current thread to the epoch.
	pub fn pin() -> Guard {
		Guard::new()
	}

	/// Returns a guard that does not pin anything.
	///
	/// # Safety
	///
	/// Only valid when no other thread can access the data being traversed.
	pub unsafe fn unprotected() -> &'static Guard {
		&UNPROTECTED.0
	}

	/// Conversion between owned or shared pointers and their tagged integer form.
	pub trait Pointer<T> {
		/// Returns the machine representation of the pointer, tag included.
		fn into_usize(self) -> usize;

		/// Rebuilds a pointer from its machine representation.
		///
		/// # Safety
		///
		/// `data` must come from `into_usize` on the same pointer kind.
		unsafe fn from_usize(data: usize) -> Self;
	}

	/// A shared, possibly tagged, pointer to epoch-protected data.
	pub struct Shared<'g, T> {
		data: usize,
		_marker: PhantomData<(&'g (), *const T)>,
	}

	impl<'g, T> Clone for Shared<'g, T> {
		fn clone(&self) -> Self {
			*self
		}
	}

	impl<'g, T> Copy for Shared<'g, T> {}

	impl<'g, T> PartialEq for Shared<'g, T> {
		fn eq(&self, other: &Self) -> bool {
			self.data == other.data
		}
	}

	impl<'g, T> Eq for Shared<'g, T> {}

	impl<'g, T> std::fmt::Debug for Shared<'g, T> {
		fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
			let (raw, tag) = decompose::<T>(self.data);
			f.debug_struct("Shared").field("raw", &raw).field("tag", &tag).finish()
		}
	}

	impl<'g, T> Pointer<T> for Shared<'g, T> {
		fn into_usize(self) -> usize {
			self.data
		}

		unsafe fn from_usize(data: usize) -> Self {
			Shared {
				data,
				_marker: PhantomData,
			}
		}
	}

	impl<'g, T> Shared<'g, T> {
		/// Creates a null shared pointer.
		pub fn null() -> Self {
			Shared {
				data: 0,
				_marker: PhantomData,
			}
		}

		/// Returns true if the pointer part is null, whatever the tag.
		pub fn is_null(&self) -> bool {
			decompose::<T>(self.data).0.is_null()
		}

		/// Returns the untagged raw pointer.
		pub fn as_raw(&self) -> *const T {
			decompose::<T>(self.data).0
		}

		/// Returns the tag stored in the low bits.
		pub fn tag(&self) -> usize {
			decompose::<T>(self.data).1
		}

		/// Returns the same pointer with its tag replaced.
		pub fn with_tag(&self, tag: usize) -> Self {
			Shared {
				data: (self.data & !low_bits::<T>()) | (tag & low_bits::<T>()),
				_marker: PhantomData,
			}
		}

		/// Dereferences the pointer.
		///
		/// # Safety
		///
		/// The pointer must be non-null and the data must be valid.
		pub unsafe fn deref(&self) -> &'g T {
			&*self.as_raw()
		}

		/// Dereferences the pointer, returning None if null.
		///
		/// # Safety
		///
		/// If non-null, the data must be valid.
		pub unsafe fn as_ref(&self) -> Option<&'g T> {
			self.as_raw().as_ref()
		}

		/// Takes ownership of the pointee.
		///
		/// # Safety
		///
		/// No other thread may still reach the data.
		pub unsafe fn into_owned(self) -> Owned<T> {
			Owned::from_usize(self.data & !low_bits::<T>())
		}
	}

	/// An owned pointer to epoch-protected data.
	pub struct Owned<T> {
		data: usize,
		_marker: PhantomData<Box<T>>,
	}

	// SAFETY: Owned<T> behaves like Box<T>.
	unsafe impl<T: Send> Send for Owned<T> {}

	impl<T> Pointer<T> for Owned<T> {
		fn into_usize(self) -> usize {
			let data = self.data;
			mem::forget(self);
			data
		}

		unsafe fn from_usize(data: usize) -> Self {
			Owned {
				data,
				_marker: PhantomData,
			}
		}
	}

	impl<T> Owned<T> {
		/// Creates a new owned pointer containing the given value.
		pub fn new(value: T) -> Self {
			Owned {
				data: Box::into_raw(Box::new(value)) as usize,
				_marker: PhantomData,
			}
		}

		/// Converts this owned pointer into a shared reference.
		pub fn into_shared<'g>(self, _guard: &'g Guard) -> Shared<'g, T> {
			// SAFETY: ownership moves into the returned representation.
			unsafe { Shared::from_usize(self.into_usize()) }
		}
	}

	impl<T> Drop for Owned<T> {
		fn drop(&mut self) {
			let (raw, _) = decompose::<T>(self.data);
			// SAFETY: We own the data
			unsafe {
				drop(Box::from_raw(raw));
			}
		}
	}

	impl<T> std::ops::Deref for Owned<T> {
		type Target = T;
		fn deref(&self) -> &T {
			// SAFETY: data is always valid while owned
			unsafe { &*decompose::<T>(self.data).0 }
		}
	}

	impl<T> std::ops::DerefMut for Owned<T> {
		fn deref_mut(&mut self) -> &mut T {
			// SAFETY: data is always valid and we have exclusive access
			unsafe { &mut *decompose::<T>(self.data).0 }
		}
	}

	/// An atomic, possibly tagged, pointer that can be shared between threads.
	///
	/// Like crossbeam's version, dropping an `Atomic` never frees the pointee.
	pub struct Atomic<T> {
		data: AtomicUsize,
		_marker: PhantomData<*mut T>,
	}

	// SAFETY: Atomic<T> can be sent/shared if T: Send + Sync
	unsafe impl<T: Send + Sync> Send for Atomic<T> {}
	unsafe impl<T: Send + Sync> Sync for Atomic<T> {}

	impl<T> std::fmt::Debug for Atomic<T> {
		fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
			let data = self.data.load(Ordering::SeqCst);
			f.debug_struct("Atomic").field("data", &data).finish()
		}
	}

	impl<T> Atomic<T> {
		/// Creates a new atomic pointer initialized to null.
		pub fn null() -> Self {
			Atomic {
				data: AtomicUsize::new(0),
				_marker: PhantomData,
			}
		}

		/// Loads the current value.
		pub fn load<'g>(&self, order: Ordering, _guard: &'g Guard) -> Shared<'g, T> {
			// SAFETY: the atomic only ever holds values produced by `into_usize`.
			unsafe { Shared::from_usize(self.data.load(order)) }
		}

		/// Stores a new value.
		pub fn store<P: Pointer<T>>(&self, new: P, order: Ordering) {
			self.data.store(new.into_usize(), order);
		}

		/// Compares and exchanges the value.
		pub fn compare_exchange<'g, P: Pointer<T>>(
			&self,
			current: Shared<'_, T>,
			new: P,
			success: Ordering,
			failure: Ordering,
			_guard: &'g Guard,
		) -> Result<Shared<'g, T>, CompareExchangeError<'g, T, P>> {
			let new = new.into_usize();
			match self.data.compare_exchange(current.into_usize(), new, success, failure) {
				// SAFETY: both values were produced by `into_usize`.
				Ok(_) => Ok(unsafe { Shared::from_usize(new) }),
				Err(found) => Err(CompareExchangeError {
					current: unsafe { Shared::from_usize(found) },
					new: unsafe { P::from_usize(new) },
				}),
			}
		}

		/// Weak variant of [`Atomic::compare_exchange`].
		pub fn compare_exchange_weak<'g, P: Pointer<T>>(
			&self,
			current: Shared<'_, T>,
			new: P,
			success: Ordering,
			failure: Ordering,
			_guard: &'g Guard,
		) -> Result<Shared<'g, T>, CompareExchangeError<'g, T, P>> {
			let new = new.into_usize();
			match self.data.compare_exchange_weak(current.into_usize(), new, success, failure) {
				// SAFETY: both values were produced by `into_usize`.
				Ok(_) => Ok(unsafe { Shared::from_usize(new) }),
				Err(found) => Err(CompareExchangeError {
					current: unsafe { Shared::from_usize(found) },
					new: unsafe { P::from_usize(new) },
				}),
			}
		}
	}

	impl<T> Default for Atomic<T> {
		fn default() -> Self {
			Self::null()
		}
	}

	/// Error returned by compare_exchange operations.
	pub struct CompareExchangeError<'g, T, P: Pointer<T>> {
		/// The current value that was found instead of the expected value.
		pub current: Shared<'g, T>,
		/// The new value that was not stored.
		pub new: P,
	}
}

#[cfg(loom)]
pub use mock_epoch::*;
