//! Kernel: the process-wide kernel context
//!
//! Combines the task table, the stack arena, the channel table and the tick
//! counter behind one `Kernel` instance. Operations here are the kernel
//! side of every call; they assume the caller already holds the critical
//! section (see [`KernelCell`](crate::critical::KernelCell)).
//!
//! Lifecycle: populated with tasks while not started, then started exactly
//! once. There is no way back.
//!
//! Author: Moroya Sakamoto

use core::task::Poll;

use crate::config::{IDLE_STACK_SIZE, MAX_TASKS, MEM_POOL_WORDS, STACK_ALIGN, TICK_HZ};
use crate::error::{KernelError, Result};
use crate::heap::Arena;
use crate::log::{kdebug, kinfo, ktrace, kwarn};
use crate::port::{frame, Port};
use crate::queue::{ChannelId, Channels};
use crate::scheduler::Scheduler;
use crate::task::{Task, TaskFn, TaskId, TaskInfo, TaskPriority, TaskState};
use crate::timer::SysTimer;

/// Kernel context
pub struct Kernel<P: Port> {
    port: P,
    /// Task table and switcher
    pub scheduler: Scheduler,
    /// Stack pool
    arena: Arena<MEM_POOL_WORDS>,
    /// Channel table
    channels: Channels,
    /// Tick counter
    timer: SysTimer,
    started: bool,
}

impl<P: Port> Kernel<P> {
    pub const fn new(port: P) -> Self {
        Self {
            port,
            scheduler: Scheduler::new(),
            arena: Arena::new(),
            channels: Channels::new(),
            timer: SysTimer::new(TICK_HZ),
            started: false,
        }
    }

    /// Create a Ready task with its own stack block
    ///
    /// Fails without side effects: no slot is touched and no block is kept
    /// unless every step succeeds. Before start, one slot and
    /// `IDLE_STACK_SIZE` bytes of arena stay reserved for the idle task.
    pub fn create_task(
        &mut self,
        entry: TaskFn,
        arg: usize,
        stack_size: usize,
        priority: TaskPriority,
        name: &str,
    ) -> Result<TaskId> {
        let reserve_idle = !self.started;
        self.spawn(entry, arg, stack_size, priority, name, reserve_idle)
    }

    fn spawn(
        &mut self,
        entry: TaskFn,
        arg: usize,
        stack_size: usize,
        priority: TaskPriority,
        name: &str,
        reserve_idle: bool,
    ) -> Result<TaskId> {
        if stack_size == 0 || stack_size % STACK_ALIGN != 0 || stack_size < frame::FRAME_BYTES {
            return Err(KernelError::StackSizeInvalid);
        }
        let slot = self.scheduler.claim_slot()?;
        if reserve_idle && self.scheduler.live_tasks() + 1 >= MAX_TASKS {
            return Err(KernelError::TooManyTasks);
        }
        let block = self.arena.allocate(stack_size).inspect_err(|_| {
            kwarn!("create: no stack for {=usize} bytes", stack_size);
        })?;
        if reserve_idle && !self.arena.fits(IDLE_STACK_SIZE) {
            self.arena.free(block);
            kwarn!("create: {=usize} bytes would crowd out the idle stack", stack_size);
            return Err(KernelError::OutOfMemory);
        }

        let sp = self.arena.stack_mut(block).and_then(|stack| {
            let index = frame::init_stack(stack, entry as usize, arg, P::task_exit())?;
            Some(stack[index..].as_ptr() as usize)
        });
        let Some(sp) = sp else {
            self.arena.free(block);
            return Err(KernelError::StackSizeInvalid);
        };

        let id = self.scheduler.next_id();
        self.scheduler
            .install(slot, Task::new(id, name, priority, stack_size, block, sp));
        kinfo!("task {=u32} created in slot {=usize}", id.0, slot);
        Ok(id)
    }

    /// Arm the tick, create and select the idle task, mark started
    ///
    /// Returns the idle task's saved stack pointer for the port to launch.
    pub fn start(&mut self) -> Result<usize> {
        if self.started {
            return Err(KernelError::AlreadyStarted);
        }
        self.port.start_tick(self.timer.tick_hz());
        let idle = self
            .spawn(P::idle_entry(), 0, IDLE_STACK_SIZE, TaskPriority::IDLE, "idle", false)
            .map_err(|_| KernelError::StartFailed)?;
        let slot = self.scheduler.find(idle).ok_or(KernelError::StartFailed)?;
        self.scheduler.install_idle(slot);
        self.started = true;
        kinfo!("kernel started, {=usize} tasks", self.scheduler.live_tasks());
        Ok(self.scheduler.get(slot).sp)
    }

    /// Kill a task and return its stack to the arena
    ///
    /// Requests the switch itself: a killed caller must never resume.
    pub fn kill(&mut self, id: TaskId) -> Result<()> {
        let slot = self.live_slot(id)?;
        if let Some(block) = self.scheduler.retire(slot) {
            self.arena.free(block);
        }
        kinfo!("task {=u32} killed", id.0);
        self.request_switch();
        Ok(())
    }

    /// Delay a task for `duration` ticks (`NO_TIMEOUT` = indefinitely)
    ///
    /// A task that is already parked keeps its countdown.
    pub fn sleep(&mut self, id: TaskId, duration: u32) -> Result<()> {
        if !self.started {
            return Err(KernelError::NotStarted);
        }
        let slot = self.live_slot(id)?;
        let task = self.scheduler.get_mut(slot);
        match task.state {
            TaskState::Ready | TaskState::Running => task.park(TaskState::Delayed, duration, None),
            _ => ktrace!("sleep: task {=u32} already parked", id.0),
        }
        Ok(())
    }

    /// Send from the current task
    ///
    /// `Poll::Pending` means the caller is now parked on the channel and must
    /// retry once, non-blocking, after it is rescheduled.
    pub fn send(&mut self, channel: ChannelId, item: u32, timeout: u32) -> Poll<QueueResult> {
        match self.channels.try_send(channel, item) {
            Ok(true) => Poll::Ready(Ok(())),
            Ok(false) => self.park_current(TaskState::WaitingToSend, channel, timeout),
            Err(e) => {
                kwarn!("send: channel {=u8} unavailable", channel);
                Poll::Ready(Err(e))
            }
        }
    }

    /// Receive into the current task; see [`send`](Self::send)
    pub fn receive(&mut self, channel: ChannelId, timeout: u32) -> Poll<Result<u32>> {
        match self.channels.try_receive(channel) {
            Ok(Some(item)) => Poll::Ready(Ok(item)),
            Ok(None) => self
                .park_current(TaskState::WaitingToReceive, channel, timeout)
                .map(|r| r.map(|()| 0)),
            Err(e) => {
                kwarn!("receive: channel {=u8} unavailable", channel);
                Poll::Ready(Err(e))
            }
        }
    }

    fn park_current(&mut self, state: TaskState, channel: ChannelId, timeout: u32) -> Poll<QueueResult> {
        let current = self.scheduler.current().filter(|_| self.started);
        match current {
            Some(slot) if timeout != 0 => {
                self.scheduler.get_mut(slot).park(state, timeout, Some(channel));
                Poll::Pending
            }
            _ => Poll::Ready(Err(KernelError::WouldBlock)),
        }
    }

    /// Periodic tick: age countdowns, promote satisfied waiters, request a switch
    pub fn tick(&mut self) {
        if !self.started {
            return;
        }
        self.timer.advance();
        let woken = self.scheduler.age(&self.channels);
        if woken > 0 {
            ktrace!("tick {=u64}: {=usize} woken", self.timer.now(), woken);
        }
        self.request_switch();
    }

    /// Deferred context switch: save `sp` for the outgoing task, return the
    /// stack pointer to restore
    pub fn switch_context(&mut self, sp: usize) -> usize {
        self.scheduler.switch(sp)
    }

    /// Verify a task's stack guard
    pub fn check_stack(&self, id: TaskId) -> Result<()> {
        let block = self
            .scheduler
            .task(id)
            .and_then(|t| t.block)
            .ok_or(KernelError::NoSuchTask)?;
        if self.arena.guard_intact(block) {
            Ok(())
        } else {
            kdebug!("task {=u32} overran its stack", id.0);
            Err(KernelError::StackOverflow)
        }
    }

    /// Task holding the processor
    pub fn current_task(&self) -> Option<TaskId> {
        self.scheduler.current().map(|slot| self.scheduler.get(slot).id)
    }

    /// Snapshot of a live task
    pub fn task_info(&self, id: TaskId) -> Option<TaskInfo> {
        self.scheduler.task(id).map(TaskInfo::from)
    }

    /// Saved stack pointer of a live task
    pub fn saved_sp(&self, id: TaskId) -> Option<usize> {
        self.scheduler.task(id).map(|t| t.sp)
    }

    /// Ticks since start
    pub fn now(&self) -> u64 {
        self.timer.now()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Items waiting in a channel
    pub fn channel_len(&self, channel: ChannelId) -> usize {
        self.channels.len(channel)
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// Kernel counters
    pub fn stats(&self) -> KernelStats {
        KernelStats {
            ticks: self.timer.now(),
            context_switches: self.scheduler.context_switches,
            live_tasks: self.scheduler.live_tasks(),
            free_pool_bytes: self.arena.free_bytes(),
        }
    }

    /// Pend the deferred switch; there is nothing to switch before start
    pub(crate) fn request_switch(&self) {
        if self.started {
            self.port.pend_switch();
        }
    }

    fn live_slot(&self, id: TaskId) -> Result<usize> {
        let slot = self.scheduler.find(id).ok_or(KernelError::NoSuchTask)?;
        if Some(slot) == self.scheduler.idle() {
            return Err(KernelError::NoSuchTask);
        }
        Ok(slot)
    }
}

/// Non-blocking queue outcome from the kernel's side
pub type QueueResult = Result<()>;

/// Kernel counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelStats {
    /// Ticks since start
    pub ticks: u64,
    /// Context switches performed
    pub context_switches: u32,
    /// Non-killed tasks (idle included)
    pub live_tasks: usize,
    /// Unused stack pool bytes
    pub free_pool_bytes: usize,
}
