//! ktOS - Preemptive Priority RTOS Kernel
//!
//! Small kernel for single-core microcontrollers:
//! - Static task table, stacks carved from a fixed arena (first fit)
//! - Priority scheduling with round robin among equals, deferred switching
//! - Blocking inter-task channels with tick-relative timeouts
//! - Supervisor trap as the only entry from task code
//!
//! The core is processor independent and driven through a [`Port`]; the
//! `cortex-m` feature supplies the ARMv7-M port.
//!
//! Author: Moroya Sakamoto

#![no_std]

mod log;

pub mod api;
pub mod config;
pub mod critical;
pub mod error;
pub mod heap;
pub mod kernel;
pub mod port;
pub mod queue;
pub mod scheduler;
pub mod syscall;
pub mod task;
pub mod timer;

pub use api::{Api, Supervisor};
pub use critical::KernelCell;
pub use error::{KernelError, Result};
pub use heap::Arena;
pub use kernel::{Kernel, KernelStats};
pub use port::Port;
pub use queue::{ChannelId, QueueStatus};
pub use scheduler::Scheduler;
pub use syscall::{Status, Syscall};
pub use task::{TaskFn, TaskId, TaskInfo, TaskPriority, TaskState};
pub use timer::{SysTimer, Timeout};

#[cfg(all(feature = "cortex-m", target_arch = "arm"))]
pub use port::cortex_m::{set_core_clock, KERNEL, OS};
