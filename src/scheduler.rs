//! Priority scheduler with round-robin among equals
//!
//! Static task table, no dynamic allocation. The switcher picks the most
//! urgent Ready task, scanning circularly from the slot after the current
//! one so that equal-priority tasks take turns. The tick only changes
//! eligibility; it never switches by itself.
//!
//! Author: Moroya Sakamoto

use crate::config::MAX_TASKS;
use crate::error::{KernelError, Result};
use crate::heap::BlockId;
use crate::queue::Channels;
use crate::task::{Task, TaskId, TaskState};

/// Task table and switch state
pub struct Scheduler {
    /// Static task table
    tasks: [Task; MAX_TASKS],
    /// Slots ever populated (the scan range)
    task_count: usize,
    /// Non-killed tasks
    live: usize,
    /// Slot holding the processor
    current: Option<usize>,
    /// Slot of the idle task
    idle: Option<usize>,
    next_id: u32,
    /// Total context switches
    pub context_switches: u32,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            tasks: [Task::empty(); MAX_TASKS],
            task_count: 0,
            live: 0,
            current: None,
            idle: None,
            next_id: 0,
            context_switches: 0,
        }
    }

    /// Slot the next task would occupy
    ///
    /// First killed slot, else the next unused one.
    pub fn claim_slot(&self) -> Result<usize> {
        if let Some(slot) = self.tasks[..self.task_count].iter().position(|t| !t.is_live()) {
            return Ok(slot);
        }
        if self.task_count < MAX_TASKS {
            Ok(self.task_count)
        } else {
            Err(KernelError::TooManyTasks)
        }
    }

    /// Fresh identity; never handed out twice
    pub fn next_id(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    /// Place a task in a slot returned by [`claim_slot`](Self::claim_slot)
    pub fn install(&mut self, slot: usize, task: Task) {
        self.tasks[slot] = task;
        if slot == self.task_count {
            self.task_count += 1;
        }
        self.live += 1;
    }

    /// Mark a task killed and hand back its stack block
    pub fn retire(&mut self, slot: usize) -> Option<BlockId> {
        let task = &mut self.tasks[slot];
        if !task.is_live() {
            return None;
        }
        task.state = TaskState::Killed;
        task.channel = None;
        task.countdown = 0;
        self.live -= 1;
        task.block.take()
    }

    /// Slot of a live task
    pub fn find(&self, id: TaskId) -> Option<usize> {
        self.tasks[..self.task_count]
            .iter()
            .position(|t| t.is_live() && t.id == id)
    }

    pub fn get(&self, slot: usize) -> &Task {
        &self.tasks[slot]
    }

    pub fn get_mut(&mut self, slot: usize) -> &mut Task {
        &mut self.tasks[slot]
    }

    /// Live task by id
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.find(id).map(|slot| &self.tasks[slot])
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn idle(&self) -> Option<usize> {
        self.idle
    }

    /// Record the idle task and give it the processor
    pub fn install_idle(&mut self, slot: usize) {
        self.idle = Some(slot);
        self.current = Some(slot);
        self.tasks[slot].state = TaskState::Running;
    }

    /// Number of live tasks
    pub fn live_tasks(&self) -> usize {
        self.live
    }

    /// Live tasks, table order
    pub fn iter(&self) -> impl Iterator<Item = &Task> + '_ {
        self.tasks[..self.task_count].iter().filter(|t| t.is_live())
    }

    /// Swap the running task
    ///
    /// `sp` is the outgoing task's saved stack pointer; the return value is
    /// the stack pointer to restore.
    pub fn switch(&mut self, sp: usize) -> usize {
        let Some(cur) = self.current else {
            return sp;
        };
        let outgoing = &mut self.tasks[cur];
        outgoing.sp = sp;
        if outgoing.state == TaskState::Running {
            outgoing.state = TaskState::Ready;
        }

        let next = if self.task_count > 1 {
            self.pick_next(cur).or(self.idle).unwrap_or(cur)
        } else {
            cur
        };

        if next != cur {
            self.context_switches = self.context_switches.wrapping_add(1);
        }
        let incoming = &mut self.tasks[next];
        incoming.state = TaskState::Running;
        self.current = Some(next);
        incoming.sp
    }

    /// Most urgent Ready slot, scanning circularly after `cur`
    ///
    /// The first slot found at a priority level wins ties. `cur` itself is
    /// visited last, so it keeps the processor only when nothing else at its
    /// level is ready.
    fn pick_next(&self, cur: usize) -> Option<usize> {
        let n = self.task_count;
        let mut best: Option<usize> = None;
        for step in 1..=n {
            let slot = (cur + step) % n;
            let task = &self.tasks[slot];
            if task.state != TaskState::Ready {
                continue;
            }
            if best.map_or(true, |b| task.priority < self.tasks[b].priority) {
                best = Some(slot);
            }
        }
        best
    }

    /// Per-tick aging of every parked task
    ///
    /// Expired countdowns wake unconditionally; queue waiters also wake once
    /// their channel can satisfy them. Returns the number of tasks woken.
    pub fn age(&mut self, channels: &Channels) -> usize {
        let mut woken = 0;
        for task in self.tasks[..self.task_count].iter_mut() {
            if !task.state.is_waiting() {
                continue;
            }
            if task.age() {
                task.wake();
                woken += 1;
                continue;
            }
            let available = match (task.state, task.channel) {
                (TaskState::WaitingToSend, Some(ch)) => channels.can_send(ch),
                (TaskState::WaitingToReceive, Some(ch)) => channels.can_receive(ch),
                _ => false,
            };
            if available {
                task.wake();
                woken += 1;
            }
        }
        woken
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Arena;
    use crate::task::TaskPriority;

    struct Fixture {
        sched: Scheduler,
        arena: Arena<1024>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                sched: Scheduler::new(),
                arena: Arena::new(),
            }
        }

        /// Installs a Ready task whose saved sp is `0x1000 * (slot + 1)`
        fn spawn(&mut self, priority: TaskPriority) -> usize {
            let slot = self.sched.claim_slot().unwrap();
            let block = self.arena.allocate(64).unwrap();
            let id = self.sched.next_id();
            let task = Task::new(id, "t", priority, 64, block, 0x1000 * (slot + 1));
            self.sched.install(slot, task);
            slot
        }
    }

    fn run_slot(sched: &mut Scheduler) -> usize {
        let cur = sched.current().unwrap();
        let sp = sched.get(cur).sp;
        sched.switch(sp);
        sched.current().unwrap()
    }

    #[test]
    fn test_scheduler_empty() {
        let mut sched = Scheduler::new();
        assert_eq!(sched.live_tasks(), 0);
        assert_eq!(sched.switch(0x42), 0x42);
        assert_eq!(sched.claim_slot(), Ok(0));
    }

    #[test]
    fn test_switch_saves_and_restores_sp() {
        let mut f = Fixture::new();
        let idle = f.spawn(TaskPriority::IDLE);
        let a = f.spawn(TaskPriority::NORMAL);
        f.sched.install_idle(idle);

        let restored = f.sched.switch(0xBEEF);
        assert_eq!(f.sched.get(idle).sp, 0xBEEF);
        assert_eq!(f.sched.get(idle).state, TaskState::Ready);
        assert_eq!(restored, f.sched.get(a).sp);
        assert_eq!(f.sched.current(), Some(a));
        assert_eq!(f.sched.get(a).state, TaskState::Running);
        assert_eq!(f.sched.context_switches, 1);
    }

    #[test]
    fn test_priority_order() {
        let mut f = Fixture::new();
        let idle = f.spawn(TaskPriority::IDLE);
        let low = f.spawn(TaskPriority(5));
        let high = f.spawn(TaskPriority(1));
        f.sched.install_idle(idle);

        for _ in 0..5 {
            assert_eq!(run_slot(&mut f.sched), high);
        }
        f.sched.get_mut(high).park(TaskState::Delayed, 10, None);
        assert_eq!(run_slot(&mut f.sched), low);
    }

    #[test]
    fn test_equal_priority_round_robin() {
        let mut f = Fixture::new();
        let idle = f.spawn(TaskPriority::IDLE);
        let a = f.spawn(TaskPriority::NORMAL);
        let b = f.spawn(TaskPriority::NORMAL);
        let c = f.spawn(TaskPriority::NORMAL);
        f.sched.install_idle(idle);

        let first = [run_slot(&mut f.sched), run_slot(&mut f.sched), run_slot(&mut f.sched)];
        let mut sorted = first;
        sorted.sort();
        assert_eq!(sorted, [a, b, c]);
        // And the rotation repeats in the same order
        assert_eq!(run_slot(&mut f.sched), first[0]);
    }

    #[test]
    fn test_single_task_kept() {
        let mut f = Fixture::new();
        let only = f.spawn(TaskPriority::IDLE);
        f.sched.install_idle(only);
        assert_eq!(f.sched.switch(0x77), 0x77);
        assert_eq!(f.sched.current(), Some(only));
        assert_eq!(f.sched.context_switches, 0);
    }

    #[test]
    fn test_falls_back_to_idle() {
        let mut f = Fixture::new();
        let idle = f.spawn(TaskPriority::IDLE);
        let a = f.spawn(TaskPriority::NORMAL);
        f.sched.install_idle(idle);
        assert_eq!(run_slot(&mut f.sched), a);
        f.sched.get_mut(a).park(TaskState::Delayed, 3, None);
        assert_eq!(run_slot(&mut f.sched), idle);
    }

    #[test]
    fn test_slot_reuse_after_retire() {
        let mut f = Fixture::new();
        for _ in 0..MAX_TASKS {
            f.spawn(TaskPriority::NORMAL);
        }
        assert_eq!(f.sched.claim_slot(), Err(KernelError::TooManyTasks));

        let old_id = f.sched.get(4).id;
        let block = f.sched.retire(4).unwrap();
        f.arena.free(block);
        assert_eq!(f.sched.retire(4), None);
        assert_eq!(f.sched.find(old_id), None);
        assert_eq!(f.sched.claim_slot(), Ok(4));

        let slot = f.spawn(TaskPriority::LOW);
        assert_eq!(slot, 4);
        assert_ne!(f.sched.get(4).id, old_id);
        assert_eq!(f.sched.live_tasks(), MAX_TASKS);
    }

    #[test]
    fn test_age_wakes_expired_and_satisfied_waiters() {
        let mut f = Fixture::new();
        let sleeper = f.spawn(TaskPriority::NORMAL);
        let sender = f.spawn(TaskPriority::NORMAL);
        let receiver = f.spawn(TaskPriority::NORMAL);
        let mut chans = Channels::new();
        for i in 0..chans.capacity() as u32 {
            chans.try_send(1, i).unwrap();
        }

        f.sched.get_mut(sleeper).park(TaskState::Delayed, 2, None);
        f.sched.get_mut(sender).park(TaskState::WaitingToSend, 100, Some(1));
        f.sched.get_mut(receiver).park(TaskState::WaitingToReceive, crate::config::NO_TIMEOUT, Some(2));

        assert_eq!(f.sched.age(&chans), 0);
        assert_eq!(f.sched.get(sleeper).state, TaskState::Delayed);

        chans.try_receive(1).unwrap();
        assert_eq!(f.sched.age(&chans), 2);
        assert_eq!(f.sched.get(sleeper).state, TaskState::Ready);
        assert_eq!(f.sched.get(sender).state, TaskState::Ready);
        assert_eq!(f.sched.get(sender).channel, None);
        assert_eq!(f.sched.get(receiver).state, TaskState::WaitingToReceive);
    }

    #[test]
    fn test_age_ignores_killed_and_running() {
        let mut f = Fixture::new();
        let a = f.spawn(TaskPriority::NORMAL);
        let b = f.spawn(TaskPriority::NORMAL);
        f.sched.install_idle(a);
        f.sched.retire(b);
        let chans = Channels::new();
        f.sched.age(&chans);
        assert_eq!(f.sched.get(a).state, TaskState::Running);
        assert_eq!(f.sched.get(b).state, TaskState::Killed);
    }
}
