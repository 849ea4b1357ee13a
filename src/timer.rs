//! System tick counter and timeouts
//!
//! The tick is the kernel's unit of time. On real hardware the port arms
//! SysTick at [`TICK_HZ`]; the kernel only counts.
//!
//! Author: Moroya Sakamoto

use crate::config::{NO_TIMEOUT, TICK_HZ};

/// Monotonic tick counter
pub struct SysTimer {
    ticks: u64,
    tick_hz: u32,
}

impl SysTimer {
    pub const fn new(tick_hz: u32) -> Self {
        Self { ticks: 0, tick_hz }
    }

    /// Count one tick
    pub fn advance(&mut self) -> u64 {
        self.ticks = self.ticks.wrapping_add(1);
        self.ticks
    }

    /// Ticks since start
    pub fn now(&self) -> u64 {
        self.ticks
    }

    /// Milliseconds since start
    pub fn now_ms(&self) -> u64 {
        self.ticks * 1000 / self.tick_hz as u64
    }

    /// Configured frequency
    pub fn tick_hz(&self) -> u32 {
        self.tick_hz
    }

    /// Ticks elapsed since a reference point
    pub fn elapsed_since(&self, reference: u64) -> u64 {
        self.ticks.wrapping_sub(reference)
    }
}

impl Default for SysTimer {
    fn default() -> Self {
        Self::new(TICK_HZ)
    }
}

/// Wait bound for blocking calls, in ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timeout(pub u32);

impl Timeout {
    /// Fail at once instead of blocking
    pub const NONBLOCKING: Timeout = Timeout(0);
    /// Wait indefinitely
    pub const FOREVER: Timeout = Timeout(NO_TIMEOUT);

    pub const fn ticks(ticks: u32) -> Self {
        Timeout(ticks)
    }

    /// Milliseconds, rounded up to whole ticks
    pub const fn from_ms(ms: u32) -> Self {
        let ticks = (ms as u64 * TICK_HZ as u64).div_ceil(1000);
        if ticks >= NO_TIMEOUT as u64 {
            Timeout(NO_TIMEOUT - 1)
        } else {
            Timeout(ticks as u32)
        }
    }

    pub fn is_forever(self) -> bool {
        self.0 == NO_TIMEOUT
    }
}
