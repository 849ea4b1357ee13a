//! Host simulation port
//!
//! Records what the kernel asks of the processor so the scheduler, trap
//! dispatcher and tick can be driven step by step off-target.
//!
//! Author: Moroya Sakamoto

use core::cell::Cell;

use super::Port;
use crate::task::TaskFn;

/// Recording port
pub struct SimPort {
    pending: Cell<bool>,
    pends: Cell<u32>,
    tick_hz: Cell<Option<u32>>,
}

impl SimPort {
    pub const fn new() -> Self {
        Self {
            pending: Cell::new(false),
            pends: Cell::new(0),
            tick_hz: Cell::new(None),
        }
    }

    /// Consume the pending switch request
    pub fn take_pending(&self) -> bool {
        self.pending.replace(false)
    }

    /// Switch requests seen so far
    pub fn pend_count(&self) -> u32 {
        self.pends.get()
    }

    /// Frequency the tick was armed at
    pub fn tick_hz(&self) -> Option<u32> {
        self.tick_hz.get()
    }
}

impl Default for SimPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for SimPort {
    fn pend_switch(&self) {
        self.pending.set(true);
        self.pends.set(self.pends.get() + 1);
    }

    fn start_tick(&self, tick_hz: u32) {
        self.tick_hz.set(Some(tick_hz));
    }

    fn launch(_sp: usize) {
        // There is no thread mode to drop into; the hand-off falls through.
    }

    fn idle_entry() -> TaskFn {
        sim_idle
    }

    fn task_exit() -> usize {
        sim_exit as usize
    }
}

extern "C" fn sim_idle(_arg: usize) {
    loop {
        core::hint::spin_loop();
    }
}

extern "C" fn sim_exit() {
    loop {
        core::hint::spin_loop();
    }
}
