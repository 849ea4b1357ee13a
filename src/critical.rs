//! Critical sections: re-entrant interrupt masking
//!
//! One global mask protects every piece of shared kernel state. The first
//! `enter()` raises the mask through `critical-section`; nested entries only
//! bump the depth. The matching guard drop at depth zero restores the mask,
//! so early returns release exactly once per acquisition.
//!
//! Author: Moroya Sakamoto

use core::cell::{Cell, UnsafeCell};

use critical_section::RestoreState;

use crate::kernel::Kernel;
use crate::port::Port;

/// Re-entrant masking depth counter
pub struct Nest {
    depth: Cell<u8>,
    restore: Cell<RestoreState>,
}

impl Nest {
    pub const fn new() -> Self {
        Self {
            depth: Cell::new(0),
            restore: Cell::new(RestoreState::invalid()),
        }
    }

    /// Enter a critical section. Released when the guard drops.
    pub fn enter(&self) -> CriticalGuard<'_> {
        if self.depth.get() == 0 {
            // SAFETY: paired with the single `release` in `CriticalGuard::drop`
            // at depth zero.
            let state = unsafe { critical_section::acquire() };
            self.restore.set(state);
        }
        self.depth.set(self.depth.get() + 1);
        CriticalGuard { nest: self }
    }

    /// Current nesting depth (0 = unmasked)
    pub fn depth(&self) -> u8 {
        self.depth.get()
    }
}

impl Default for Nest {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped critical section
pub struct CriticalGuard<'a> {
    nest: &'a Nest,
}

impl Drop for CriticalGuard<'_> {
    fn drop(&mut self) {
        let depth = self.nest.depth.get() - 1;
        self.nest.depth.set(depth);
        if depth == 0 {
            // SAFETY: restores the state captured by the outermost `enter`.
            unsafe { critical_section::release(self.nest.restore.get()) };
        }
    }
}

/// Process-wide kernel context
///
/// Pairs the kernel with its critical-section depth counter. All access, from
/// task context and from handlers alike, goes through [`KernelCell::with`].
pub struct KernelCell<P: Port> {
    nest: Nest,
    busy: Cell<bool>,
    kernel: UnsafeCell<Kernel<P>>,
}

// SAFETY: single core; every access to `kernel` happens with the mask held.
unsafe impl<P: Port + Send> Sync for KernelCell<P> {}

impl<P: Port> KernelCell<P> {
    pub const fn new(kernel: Kernel<P>) -> Self {
        Self {
            nest: Nest::new(),
            busy: Cell::new(false),
            kernel: UnsafeCell::new(kernel),
        }
    }

    /// Run `f` with exclusive access to the kernel inside a critical section.
    ///
    /// The borrow is released even if `f` unwinds.
    ///
    /// # Panics
    /// If `f` re-enters `with` on the same cell.
    pub fn with<R>(&self, f: impl FnOnce(&mut Kernel<P>) -> R) -> R {
        let _guard = self.nest.enter();
        assert!(!self.busy.replace(true), "kernel context re-entered");
        let _borrow = Borrow(&self.busy);
        // SAFETY: mask held and `busy` rules out a second live borrow.
        f(unsafe { &mut *self.kernel.get() })
    }

    /// Enter the kernel's critical section without borrowing the kernel
    pub fn critical(&self) -> CriticalGuard<'_> {
        self.nest.enter()
    }

    /// Current critical-section depth
    pub fn critical_depth(&self) -> u8 {
        self.nest.depth()
    }
}

/// Clears a `KernelCell`'s busy flag on drop
struct Borrow<'a>(&'a Cell<bool>);

impl Drop for Borrow<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::port::sim::SimPort;

    #[test]
    fn test_nest_depth_counts_and_releases() {
        let nest = Nest::new();
        assert_eq!(nest.depth(), 0);
        {
            let _outer = nest.enter();
            assert_eq!(nest.depth(), 1);
            {
                let _inner = nest.enter();
                assert_eq!(nest.depth(), 2);
            }
            assert_eq!(nest.depth(), 1);
        }
        assert_eq!(nest.depth(), 0);
    }

    #[test]
    fn test_guard_released_on_early_return() {
        fn bail(nest: &Nest, fail: bool) -> Result<(), ()> {
            let _cs = nest.enter();
            if fail {
                return Err(());
            }
            Ok(())
        }
        let nest = Nest::new();
        assert!(bail(&nest, true).is_err());
        assert_eq!(nest.depth(), 0);
        assert!(bail(&nest, false).is_ok());
        assert_eq!(nest.depth(), 0);
    }

    #[test]
    fn test_kernel_cell_scoped_access() {
        let cell = KernelCell::new(Kernel::new(SimPort::new()));
        let depth_inside = cell.with(|_| cell.critical_depth());
        assert_eq!(depth_inside, 1);
        assert_eq!(cell.critical_depth(), 0);

        let nested = {
            let _cs = cell.critical();
            cell.with(|_| cell.critical_depth())
        };
        assert_eq!(nested, 2);
        assert_eq!(cell.critical_depth(), 0);
    }

    #[test]
    fn test_kernel_cell_usable_after_unwind() {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        let cell = KernelCell::new(Kernel::new(SimPort::new()));
        let caught = catch_unwind(AssertUnwindSafe(|| {
            let _: () = cell.with(|_| panic!("task fault"));
        }));
        assert!(caught.is_err());
        assert_eq!(cell.critical_depth(), 0);
        assert!(!cell.with(|k| k.is_started()));
    }

    #[test]
    fn test_kernel_cell_rejects_reentry() {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        let cell = KernelCell::new(Kernel::new(SimPort::new()));
        let caught = catch_unwind(AssertUnwindSafe(|| cell.with(|_| cell.with(|k| k.now()))));
        assert!(caught.is_err());
        assert_eq!(cell.critical_depth(), 0);
        assert_eq!(cell.with(|k| k.now()), 0);
    }
}
