//! Application call surface
//!
//! Thin wrappers that marshal arguments into a supervisor trap and decode
//! the status that comes back. Blocking queue calls follow a two-phase
//! protocol: the first trap parks the caller and answers `Blocked`; once
//! the task runs again it re-traps exactly once with a zero timeout.
//!
//! Author: Moroya Sakamoto

use crate::error::{KernelError, Result};
use crate::queue::{ChannelId, QueueStatus};
use crate::syscall::{Status, Syscall, TaskSpec, CURRENT_TASK};
use crate::task::{TaskFn, TaskId, TaskPriority};
use crate::timer::Timeout;

/// Raw trap primitive
///
/// Loads `code` and `args` into r0-r3, raises the supervisor call and
/// returns r0 and r1 as left by the handler.
pub trait Supervisor {
    fn call(&self, code: Syscall, args: [usize; 3]) -> (usize, usize);
}

/// Kernel calls available to tasks
pub struct Api<S: Supervisor> {
    sv: S,
}

impl<S: Supervisor> Api<S> {
    pub const fn new(sv: S) -> Self {
        Self { sv }
    }

    /// Start the kernel. Returns only on failure.
    pub fn start(&self) -> KernelError {
        let (r0, _) = self.sv.call(Syscall::StartOs, [0; 3]);
        Status::from_code(r0)
            .and_then(Status::error)
            .unwrap_or(KernelError::StartFailed)
    }

    /// Create a task; usable before and after start
    pub fn create_task(
        &self,
        entry: TaskFn,
        arg: usize,
        stack_size: usize,
        priority: TaskPriority,
        name: &str,
    ) -> Result<TaskId> {
        let spec = TaskSpec {
            entry,
            arg,
            stack_size,
            priority,
            name,
        };
        let (r0, r1) = self
            .sv
            .call(Syscall::CreateTask, [&spec as *const TaskSpec<'_> as usize, 0, 0]);
        status_result(r0).map(|()| TaskId(r1 as u32))
    }

    /// Terminate the calling task
    pub fn kill(&self) -> ! {
        self.sv.call(Syscall::TaskKill, [CURRENT_TASK, 0, 0]);
        // Unreachable once the switch lands; never touch task state here
        loop {
            core::hint::spin_loop();
        }
    }

    /// Terminate another task
    pub fn kill_task(&self, id: TaskId) -> Result<()> {
        let (r0, _) = self.sv.call(Syscall::TaskKill, [id.0 as usize, 0, 0]);
        status_result(r0)
    }

    /// Yield for `timeout` ticks; returns after wake
    pub fn sleep(&self, timeout: Timeout) -> Result<()> {
        let (r0, _) = self.sv.call(Syscall::TaskSleep, [CURRENT_TASK, timeout.0 as usize, 0]);
        status_result(r0)
    }

    /// Send `item` on `channel`, waiting up to `timeout` for a free slot
    pub fn send(&self, channel: ChannelId, item: u32, timeout: Timeout) -> QueueStatus {
        let args = |t: u32| [channel as usize, item as usize, t as usize];
        let (mut r0, _) = self.sv.call(Syscall::SendToQueue, args(timeout.0));
        if r0 == Status::Blocked.code() {
            (r0, _) = self.sv.call(Syscall::SendToQueue, args(0));
        }
        if r0 == Status::Sent.code() {
            QueueStatus::Sent
        } else {
            QueueStatus::SentFailed
        }
    }

    /// Receive from `channel` into `out`, waiting up to `timeout` for an item
    ///
    /// `out` is written only on `Received`.
    pub fn receive(&self, channel: ChannelId, out: &mut u32, timeout: Timeout) -> QueueStatus {
        let args = |t: u32| [channel as usize, t as usize, 0];
        let (mut r0, mut r1) = self.sv.call(Syscall::ReceiveFromQueue, args(timeout.0));
        if r0 == Status::Blocked.code() {
            (r0, r1) = self.sv.call(Syscall::ReceiveFromQueue, args(0));
        }
        if r0 == Status::Received.code() {
            *out = r1 as u32;
            QueueStatus::Received
        } else {
            QueueStatus::ReceivedFailed
        }
    }
}

fn status_result(r0: usize) -> Result<()> {
    match Status::from_code(r0) {
        Some(status) => status.error().map_or(Ok(()), Err),
        None => Err(KernelError::UndefinedRequest),
    }
}
