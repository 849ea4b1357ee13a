//! Platform ports: everything the kernel core needs from the processor
//!
//! The scheduler never touches registers. A port supplies the deferred
//! switch request, the periodic tick source, the one-time hand-off into the
//! first task, and the two code addresses every task frame needs.
//!
//! - [`sim::SimPort`]: host port that records requests, used by the tests
//! - [`cortex_m::CortexM`]: ARMv7-M (PendSV/SysTick/SVCall), `cortex-m` feature
//!
//! Author: Moroya Sakamoto

pub mod frame;
pub mod sim;

#[cfg(all(feature = "cortex-m", target_arch = "arm"))]
pub mod cortex_m;

pub use frame::{CalleeFrame, ExceptionFrame};

use crate::task::TaskFn;

/// Processor services consumed by the kernel
pub trait Port {
    /// Pend the low-priority deferred context switch
    fn pend_switch(&self);

    /// Arm the periodic tick at `tick_hz`
    fn start_tick(&self, tick_hz: u32);

    /// Restore the frame at `sp` and drop into unprivileged thread mode.
    ///
    /// Never returns on hardware. Returning means the hand-off failed.
    fn launch(sp: usize);

    /// Body of the idle task
    fn idle_entry() -> TaskFn;

    /// Return address planted in every initial frame
    fn task_exit() -> usize;
}
