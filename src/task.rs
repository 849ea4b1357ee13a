//! Task records: static, no-alloc task control blocks
//!
//! Each task owns one stack block carved from the arena, a saved stack
//! pointer and a wake countdown. Records live in a fixed table; a slot whose
//! task is killed may be reused by the next creation.
//!
//! Author: Moroya Sakamoto

use crate::config::{NO_TIMEOUT, TASK_NAME_SIZE};
use crate::heap::BlockId;
use crate::queue::ChannelId;

/// Task entry point, called with the creation argument
pub type TaskFn = extern "C" fn(arg: usize);

/// Task identity, assigned monotonically at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId(pub u32);

/// Task priority (lower number = more urgent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskPriority(pub u8);

impl TaskPriority {
    /// Most urgent
    pub const CRITICAL: TaskPriority = TaskPriority(0);
    pub const HIGH: TaskPriority = TaskPriority(1);
    pub const NORMAL: TaskPriority = TaskPriority(3);
    pub const LOW: TaskPriority = TaskPriority(5);
    /// Reserved for the idle task
    pub const IDLE: TaskPriority = TaskPriority(255);
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskState {
    /// Eligible for the switcher
    Ready,
    /// Owns the processor
    Running,
    /// Sleeping until its countdown expires
    Delayed,
    /// Parked until a channel slot is empty
    WaitingToSend,
    /// Parked until a channel slot is filled
    WaitingToReceive,
    /// Terminal; the slot may be reused
    Killed,
}

impl TaskState {
    /// Blocked on a countdown or a channel
    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            TaskState::Delayed | TaskState::WaitingToSend | TaskState::WaitingToReceive
        )
    }
}

/// Task control block
#[derive(Debug, Clone, Copy)]
pub struct Task {
    pub id: TaskId,
    /// Task name (NUL padded)
    pub name: [u8; TASK_NAME_SIZE],
    pub state: TaskState,
    pub priority: TaskPriority,
    /// Ticks left before a forced wake (`NO_TIMEOUT` = never)
    pub countdown: u32,
    /// Requested stack size in bytes
    pub stack_size: usize,
    /// Owning stack block
    pub block: Option<BlockId>,
    /// Saved stack pointer (bottom of the saved register frame)
    pub sp: usize,
    /// Channel this task is parked on
    pub channel: Option<ChannelId>,
}

impl Task {
    /// Empty (killed) task slot
    pub const fn empty() -> Self {
        Self {
            id: TaskId(0),
            name: [0u8; TASK_NAME_SIZE],
            state: TaskState::Killed,
            priority: TaskPriority::IDLE,
            countdown: 0,
            stack_size: 0,
            block: None,
            sp: 0,
            channel: None,
        }
    }

    /// Fresh ready task
    pub fn new(id: TaskId, name: &str, priority: TaskPriority, stack_size: usize, block: BlockId, sp: usize) -> Self {
        Self {
            id,
            name: encode_name(name),
            state: TaskState::Ready,
            priority,
            countdown: 0,
            stack_size,
            block: Some(block),
            sp,
            channel: None,
        }
    }

    /// Is this slot occupied by a non-terminal task?
    pub fn is_live(&self) -> bool {
        self.state != TaskState::Killed
    }

    /// Name as text (up to the first NUL)
    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(TASK_NAME_SIZE);
        match core::str::from_utf8(&self.name[..len]) {
            Ok(s) => s,
            // Truncation split a multi-byte character
            Err(e) => core::str::from_utf8(&self.name[..e.valid_up_to()]).unwrap_or(""),
        }
    }

    /// Park on a countdown
    pub fn park(&mut self, state: TaskState, countdown: u32, channel: Option<ChannelId>) {
        self.state = state;
        self.countdown = countdown;
        self.channel = channel;
    }

    /// Make eligible again, dropping any wait
    pub fn wake(&mut self) {
        self.state = TaskState::Ready;
        self.countdown = 0;
        self.channel = None;
    }

    /// Age the countdown by one tick; true once it has expired
    pub fn age(&mut self) -> bool {
        if self.countdown == NO_TIMEOUT {
            return false;
        }
        self.countdown = self.countdown.saturating_sub(1);
        self.countdown == 0
    }
}

fn encode_name(name: &str) -> [u8; TASK_NAME_SIZE] {
    let mut n = [0u8; TASK_NAME_SIZE];
    let len = name.len().min(TASK_NAME_SIZE);
    n[..len].copy_from_slice(&name.as_bytes()[..len]);
    n
}

/// Read-only snapshot of a task record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: [u8; TASK_NAME_SIZE],
    pub state: TaskState,
    pub priority: TaskPriority,
    pub stack_size: usize,
}

impl From<&Task> for TaskInfo {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            name: task.name,
            state: task.state,
            priority: task.priority,
            stack_size: task.stack_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> BlockId {
        let mut arena = crate::heap::Arena::<64>::new();
        arena.allocate(64).unwrap()
    }

    #[test]
    fn test_task_creation() {
        let task = Task::new(TaskId(7), "synth", TaskPriority::HIGH, 512, block(), 0x1000);
        assert!(task.is_live());
        assert_eq!(task.state, TaskState::Ready);
        assert_eq!(task.name(), "synth");
        assert_eq!(task.channel, None);
    }

    #[test]
    fn test_empty_task() {
        let task = Task::empty();
        assert!(!task.is_live());
        assert_eq!(task.state, TaskState::Killed);
        assert_eq!(task.name(), "");
    }

    #[test]
    fn test_name_truncated() {
        let task = Task::new(TaskId(1), "a-very-long-task-name-indeed", TaskPriority::LOW, 64, block(), 0);
        assert_eq!(task.name().len(), TASK_NAME_SIZE);
        assert_eq!(task.name(), "a-very-long-task-nam");
    }

    #[test]
    fn test_countdown_aging() {
        let mut task = Task::new(TaskId(1), "t", TaskPriority::LOW, 64, block(), 0);
        task.park(TaskState::Delayed, 2, None);
        assert!(!task.age());
        assert!(task.age());
        task.wake();
        assert_eq!(task.state, TaskState::Ready);
    }

    #[test]
    fn test_no_timeout_never_expires() {
        let mut task = Task::new(TaskId(1), "t", TaskPriority::LOW, 64, block(), 0);
        task.park(TaskState::WaitingToReceive, NO_TIMEOUT, Some(3));
        for _ in 0..1000 {
            assert!(!task.age());
        }
        assert_eq!(task.countdown, NO_TIMEOUT);
    }

    #[test]
    fn test_zero_countdown_expires_on_first_tick() {
        let mut task = Task::new(TaskId(1), "t", TaskPriority::LOW, 64, block(), 0);
        task.park(TaskState::Delayed, 0, None);
        assert!(task.age());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::CRITICAL < TaskPriority::HIGH);
        assert!(TaskPriority::HIGH < TaskPriority::NORMAL);
        assert!(TaskPriority::NORMAL < TaskPriority::LOW);
        assert!(TaskPriority::LOW < TaskPriority::IDLE);
    }

    #[test]
    fn test_waiting_states() {
        assert!(TaskState::Delayed.is_waiting());
        assert!(TaskState::WaitingToSend.is_waiting());
        assert!(!TaskState::Ready.is_waiting());
        assert!(!TaskState::Killed.is_waiting());
    }
}
