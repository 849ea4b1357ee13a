//! Kernel configuration: compile-time capacities and timing
//!
//! Everything the kernel owns is sized here. Nothing grows at runtime.
//!
//! Author: Moroya Sakamoto

/// Maximum tasks the kernel can manage (idle task included)
pub const MAX_TASKS: usize = 10;

/// Task name capacity in bytes
pub const TASK_NAME_SIZE: usize = 20;

/// Number of slot groups available for channel binding
pub const MAX_CHANNELS: usize = 5;

/// Slots per channel
pub const QUEUE_SLOTS: usize = 1;

/// Stack pool size in bytes
pub const MEM_POOL_SIZE: usize = 16 * 1024;

/// Stack pool size in machine words
pub const MEM_POOL_WORDS: usize = MEM_POOL_SIZE / WORD_SIZE;

/// Stack size granularity in bytes
pub const STACK_ALIGN: usize = 8;

/// Bytes reserved below every stack block (guard words + linking)
pub const BLOCK_HEADER_SIZE: usize = 16;

/// Machine word size
pub const WORD_SIZE: usize = core::mem::size_of::<usize>();

/// Tick frequency
pub const TICK_HZ: u32 = 1000;

/// Idle task stack size in bytes
pub const IDLE_STACK_SIZE: usize = 0x100;

/// Countdown value meaning "wait indefinitely"
pub const NO_TIMEOUT: u32 = u32::MAX;

/// Immediate operand of the supervisor call the kernel answers to
pub const SVC_NUMBER: u8 = 0x80;

const _: () = assert!(BLOCK_HEADER_SIZE % STACK_ALIGN == 0);
const _: () = assert!(STACK_ALIGN % WORD_SIZE == 0);
const _: () = assert!(MEM_POOL_SIZE % STACK_ALIGN == 0);
