//! Supervisor trap ABI and dispatcher
//!
//! Application code reaches the kernel only through `SVC #0x80`. The request
//! code travels in r0 of the stacked exception frame and its arguments in
//! r1-r3. The handler writes a [`Status`] code back into r0 (plus a value in
//! r1 for calls that produce one) and the task sees it as the return value
//! once it resumes.
//!
//! | Request            | r1                      | r2      | r3      | r1 out   |
//! |--------------------|-------------------------|---------|---------|----------|
//! | `StartOs`          | -                       | -       | -       | -        |
//! | `TaskSleep`        | task id / `CURRENT_TASK`| ticks   | -       | -        |
//! | `TaskKill`         | task id / `CURRENT_TASK`| -       | -       | -        |
//! | `SendToQueue`      | channel                 | item    | timeout | -        |
//! | `ReceiveFromQueue` | channel                 | timeout | -       | item     |
//! | `CreateTask`       | `*const TaskSpec`       | -       | -       | task id  |
//!
//! Author: Moroya Sakamoto

use core::task::Poll;

use crate::config::SVC_NUMBER;
use crate::critical::KernelCell;
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::log::{kerror, kwarn};
use crate::port::frame::decode_svc;
use crate::port::{ExceptionFrame, Port};
use crate::queue::{ChannelId, QueueStatus};
use crate::task::{TaskFn, TaskId, TaskPriority};

/// Task id argument meaning "the calling task"
pub const CURRENT_TASK: usize = usize::MAX;

/// Request codes carried in r0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum Syscall {
    StartOs = 22,
    TaskSleep = 23,
    TaskKill = 24,
    SendToQueue = 25,
    ReceiveFromQueue = 26,
    CreateTask = 27,
}

impl Syscall {
    pub fn from_code(code: usize) -> Option<Self> {
        Some(match code {
            22 => Syscall::StartOs,
            23 => Syscall::TaskSleep,
            24 => Syscall::TaskKill,
            25 => Syscall::SendToQueue,
            26 => Syscall::ReceiveFromQueue,
            27 => Syscall::CreateTask,
            _ => return None,
        })
    }

    pub const fn code(self) -> usize {
        self as usize
    }
}

/// Result codes written back into r0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum Status {
    Sent = 9,
    SentFailed = 10,
    Received = 11,
    ReceivedFailed = 12,
    Undefined = 13,
    Ok = 14,
    Failed = 15,
    AlreadyStarted = 16,
    StartFailed = 17,
    TooManyTasks = 19,
    StackSizeInvalid = 20,
    OutOfMemory = 21,
    /// Caller was parked; retry once, non-blocking, when resumed
    Blocked = 28,
    NotStarted = 29,
    NoSuchTask = 30,
    NoChannel = 31,
    StackOverflow = 32,
}

impl Status {
    pub fn from_code(code: usize) -> Option<Self> {
        const ALL: [Status; 17] = [
            Status::Sent,
            Status::SentFailed,
            Status::Received,
            Status::ReceivedFailed,
            Status::Undefined,
            Status::Ok,
            Status::Failed,
            Status::AlreadyStarted,
            Status::StartFailed,
            Status::TooManyTasks,
            Status::StackSizeInvalid,
            Status::OutOfMemory,
            Status::Blocked,
            Status::NotStarted,
            Status::NoSuchTask,
            Status::NoChannel,
            Status::StackOverflow,
        ];
        ALL.into_iter().find(|s| s.code() == code)
    }

    pub const fn code(self) -> usize {
        self as usize
    }

    /// The failure this status reports, if any
    pub fn error(self) -> Option<KernelError> {
        Some(match self {
            Status::Ok | Status::Sent | Status::Received | Status::Blocked => return None,
            Status::SentFailed | Status::ReceivedFailed | Status::Failed => KernelError::WouldBlock,
            Status::Undefined => KernelError::UndefinedRequest,
            Status::AlreadyStarted => KernelError::AlreadyStarted,
            Status::StartFailed => KernelError::StartFailed,
            Status::TooManyTasks => KernelError::TooManyTasks,
            Status::StackSizeInvalid => KernelError::StackSizeInvalid,
            Status::OutOfMemory => KernelError::OutOfMemory,
            Status::NotStarted => KernelError::NotStarted,
            Status::NoSuchTask => KernelError::NoSuchTask,
            Status::NoChannel => KernelError::NoChannel,
            Status::StackOverflow => KernelError::StackOverflow,
        })
    }
}

impl From<KernelError> for Status {
    fn from(e: KernelError) -> Self {
        match e {
            KernelError::StackSizeInvalid => Status::StackSizeInvalid,
            KernelError::TooManyTasks => Status::TooManyTasks,
            KernelError::OutOfMemory => Status::OutOfMemory,
            KernelError::AlreadyStarted => Status::AlreadyStarted,
            KernelError::StartFailed => Status::StartFailed,
            KernelError::NotStarted => Status::NotStarted,
            KernelError::NoSuchTask => Status::NoSuchTask,
            KernelError::NoChannel => Status::NoChannel,
            KernelError::StackOverflow => Status::StackOverflow,
            KernelError::WouldBlock => Status::Failed,
            KernelError::UndefinedRequest => Status::Undefined,
        }
    }
}

impl From<QueueStatus> for Status {
    fn from(s: QueueStatus) -> Self {
        match s {
            QueueStatus::Sent => Status::Sent,
            QueueStatus::SentFailed => Status::SentFailed,
            QueueStatus::Received => Status::Received,
            QueueStatus::ReceivedFailed => Status::ReceivedFailed,
        }
    }
}

/// Creation request passed by pointer in r1
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec<'a> {
    pub entry: TaskFn,
    pub arg: usize,
    pub stack_size: usize,
    pub priority: TaskPriority,
    pub name: &'a str,
}

/// What the trap handler must do after the kernel is released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Done,
    /// Hand the processor to the task whose frame sits at this stack pointer
    Launch(usize),
}

impl<P: Port> Kernel<P> {
    /// Decode and run one supervisor request
    ///
    /// `insn` is the trapping instruction. Anything other than
    /// `SVC #SVC_NUMBER` leaves the frame untouched.
    pub fn dispatch(&mut self, frame: &mut ExceptionFrame, insn: u16) -> Dispatch {
        if decode_svc(insn) != Some(SVC_NUMBER) {
            return Dispatch::Done;
        }
        let Some(call) = Syscall::from_code(frame.r0) else {
            kwarn!("trap: undefined request {=usize}", frame.r0);
            frame.r0 = Status::Undefined.code();
            return Dispatch::Done;
        };

        let status = match call {
            Syscall::StartOs => {
                return match self.start() {
                    Ok(sp) => Dispatch::Launch(sp),
                    Err(e) => {
                        frame.r0 = Status::from(e).code();
                        Dispatch::Done
                    }
                };
            }
            Syscall::TaskKill => {
                // Kill requests its own switch
                let result = self.resolve(frame.r1).and_then(|id| self.kill(id));
                frame.r0 = status_of(result).code();
                return Dispatch::Done;
            }
            Syscall::TaskSleep => {
                status_of(self.resolve(frame.r1).and_then(|id| self.sleep(id, frame.r2 as u32)))
            }
            Syscall::SendToQueue => match channel(frame.r1) {
                Some(ch) => match self.send(ch, frame.r2 as u32, frame.r3 as u32) {
                    Poll::Ready(Ok(())) => Status::Sent,
                    Poll::Ready(Err(_)) => Status::SentFailed,
                    Poll::Pending => Status::Blocked,
                },
                None => Status::SentFailed,
            },
            Syscall::ReceiveFromQueue => match channel(frame.r1) {
                Some(ch) => match self.receive(ch, frame.r2 as u32) {
                    Poll::Ready(Ok(item)) => {
                        frame.r1 = item as usize;
                        Status::Received
                    }
                    Poll::Ready(Err(_)) => Status::ReceivedFailed,
                    Poll::Pending => Status::Blocked,
                },
                None => Status::ReceivedFailed,
            },
            Syscall::CreateTask => {
                // SAFETY: the caller passes a pointer to a `TaskSpec` on its own
                // stack, live for the duration of the trap.
                match unsafe { (frame.r1 as *const TaskSpec<'_>).as_ref() } {
                    Some(spec) => {
                        match self.create_task(spec.entry, spec.arg, spec.stack_size, spec.priority, spec.name) {
                            Ok(id) => {
                                frame.r1 = id.0 as usize;
                                Status::Ok
                            }
                            Err(e) => Status::from(e),
                        }
                    }
                    None => Status::Failed,
                }
            }
        };
        frame.r0 = status.code();
        self.request_switch();
        Dispatch::Done
    }

    fn resolve(&self, arg: usize) -> Result<TaskId, KernelError> {
        if arg == CURRENT_TASK {
            self.current_task().ok_or(KernelError::NotStarted)
        } else {
            u32::try_from(arg).map(TaskId).map_err(|_| KernelError::NoSuchTask)
        }
    }
}

fn status_of(result: Result<(), KernelError>) -> Status {
    match result {
        Ok(()) => Status::Ok,
        Err(e) => Status::from(e),
    }
}

fn channel(arg: usize) -> Option<ChannelId> {
    ChannelId::try_from(arg).ok()
}

impl<P: Port> KernelCell<P> {
    /// Trap entry: run the request under the kernel's critical section,
    /// then perform any first-task launch with the mask released
    pub fn service_trap(&self, frame: &mut ExceptionFrame, insn: u16) {
        if let Dispatch::Launch(sp) = self.with(|kernel| kernel.dispatch(frame, insn)) {
            P::launch(sp);
            kerror!("start: first-task hand-off fell through");
            frame.r0 = Status::StartFailed.code();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::sim::SimPort;

    const SVC: u16 = 0xDF00 | SVC_NUMBER as u16;

    extern "C" fn noop_task(_arg: usize) {}

    fn request(call: Syscall, r1: usize, r2: usize, r3: usize) -> ExceptionFrame {
        ExceptionFrame {
            r0: call.code(),
            r1,
            r2,
            r3,
            ..ExceptionFrame::default()
        }
    }

    fn status(frame: &ExceptionFrame) -> Option<Status> {
        Status::from_code(frame.r0)
    }

    /// Started kernel whose running task is a fresh NORMAL task
    fn running_kernel() -> (Kernel<SimPort>, TaskId) {
        let mut k = Kernel::new(SimPort::new());
        let id = k.create_task(noop_task, 0, 256, TaskPriority::NORMAL, "app").unwrap();
        k.start().unwrap();
        k.tick();
        k.port().take_pending();
        let idle = k.current_task().unwrap();
        k.switch_context(k.saved_sp(idle).unwrap());
        assert_eq!(k.current_task(), Some(id));
        (k, id)
    }

    #[test]
    fn test_code_roundtrip() {
        for code in 0..64 {
            if let Some(s) = Status::from_code(code) {
                assert_eq!(s.code(), code);
            }
            if let Some(c) = Syscall::from_code(code) {
                assert_eq!(c.code(), code);
            }
        }
        assert_eq!(Status::from(KernelError::OutOfMemory).code(), 21);
        assert_eq!(Status::from(QueueStatus::ReceivedFailed).code(), 12);
        assert_eq!(Status::Blocked.error(), None);
        assert_eq!(Status::StackSizeInvalid.error(), Some(KernelError::StackSizeInvalid));
    }

    #[test]
    fn test_foreign_trap_left_untouched() {
        let mut k = Kernel::new(SimPort::new());
        let mut frame = request(Syscall::StartOs, 1, 2, 3);
        let before = frame;
        assert_eq!(k.dispatch(&mut frame, 0xDF01), Dispatch::Done);
        assert_eq!(k.dispatch(&mut frame, 0xBF00), Dispatch::Done);
        assert_eq!(frame, before);
        assert!(!k.is_started());
    }

    #[test]
    fn test_undefined_request() {
        let mut k = Kernel::new(SimPort::new());
        let mut frame = ExceptionFrame { r0: 99, ..ExceptionFrame::default() };
        k.dispatch(&mut frame, SVC);
        assert_eq!(status(&frame), Some(Status::Undefined));
        assert_eq!(k.port().pend_count(), 0);
    }

    #[test]
    fn test_start_requests_launch_once() {
        let mut k = Kernel::new(SimPort::new());
        let mut frame = request(Syscall::StartOs, 0, 0, 0);
        let Dispatch::Launch(sp) = k.dispatch(&mut frame, SVC) else {
            panic!("start did not launch");
        };
        assert_eq!(Some(sp), k.current_task().and_then(|id| k.saved_sp(id)));

        let mut again = request(Syscall::StartOs, 0, 0, 0);
        assert_eq!(k.dispatch(&mut again, SVC), Dispatch::Done);
        assert_eq!(status(&again), Some(Status::AlreadyStarted));
    }

    #[test]
    fn test_service_trap_reports_fall_through() {
        let cell = KernelCell::new(Kernel::new(SimPort::new()));
        let mut frame = request(Syscall::StartOs, 0, 0, 0);
        cell.service_trap(&mut frame, SVC);
        assert_eq!(status(&frame), Some(Status::StartFailed));
        assert!(cell.with(|k| k.is_started()));
        assert_eq!(cell.critical_depth(), 0);
    }

    #[test]
    fn test_create_task_trap() {
        let mut k = Kernel::new(SimPort::new());
        let spec = TaskSpec {
            entry: noop_task,
            arg: 5,
            stack_size: 512,
            priority: TaskPriority::HIGH,
            name: "trap",
        };
        let mut frame = request(Syscall::CreateTask, &spec as *const TaskSpec<'_> as usize, 0, 0);
        k.dispatch(&mut frame, SVC);
        assert_eq!(status(&frame), Some(Status::Ok));
        let info = k.task_info(TaskId(frame.r1 as u32)).unwrap();
        assert_eq!(info.priority, TaskPriority::HIGH);
        // Nothing to switch to before start
        assert_eq!(k.port().pend_count(), 0);

        let bad = TaskSpec { stack_size: 100, ..spec };
        let mut frame = request(Syscall::CreateTask, &bad as *const TaskSpec<'_> as usize, 0, 0);
        k.dispatch(&mut frame, SVC);
        assert_eq!(status(&frame), Some(Status::StackSizeInvalid));

        let mut frame = request(Syscall::CreateTask, 0, 0, 0);
        k.dispatch(&mut frame, SVC);
        assert_eq!(status(&frame), Some(Status::Failed));
    }

    #[test]
    fn test_sleep_trap_parks_caller_and_pends() {
        let (mut k, id) = running_kernel();
        let pends = k.port().pend_count();
        let mut frame = request(Syscall::TaskSleep, CURRENT_TASK, 10, 0);
        k.dispatch(&mut frame, SVC);
        assert_eq!(status(&frame), Some(Status::Ok));
        assert_eq!(k.task_info(id).unwrap().state, crate::task::TaskState::Delayed);
        assert_eq!(k.port().pend_count(), pends + 1);
    }

    #[test]
    fn test_kill_trap_switches_internally() {
        let (mut k, id) = running_kernel();
        let pends = k.port().pend_count();
        let mut frame = request(Syscall::TaskKill, CURRENT_TASK, 0, 0);
        k.dispatch(&mut frame, SVC);
        assert_eq!(status(&frame), Some(Status::Ok));
        assert_eq!(k.task_info(id), None);
        // Exactly the one switch the kill requested
        assert_eq!(k.port().pend_count(), pends + 1);

        let mut frame = request(Syscall::TaskKill, id.0 as usize, 0, 0);
        k.dispatch(&mut frame, SVC);
        assert_eq!(status(&frame), Some(Status::NoSuchTask));
    }

    #[test]
    fn test_queue_traps() {
        let (mut k, _) = running_kernel();
        let mut frame = request(Syscall::SendToQueue, 2, 0xABCD, 0);
        k.dispatch(&mut frame, SVC);
        assert_eq!(status(&frame), Some(Status::Sent));

        let mut frame = request(Syscall::ReceiveFromQueue, 2, 0, 0);
        k.dispatch(&mut frame, SVC);
        assert_eq!(status(&frame), Some(Status::Received));
        assert_eq!(frame.r1, 0xABCD);

        let mut frame = request(Syscall::ReceiveFromQueue, 2, 0, 0);
        k.dispatch(&mut frame, SVC);
        assert_eq!(status(&frame), Some(Status::ReceivedFailed));

        let mut frame = request(Syscall::ReceiveFromQueue, 2, 7, 0);
        k.dispatch(&mut frame, SVC);
        assert_eq!(status(&frame), Some(Status::Blocked));

        let mut frame = request(Syscall::SendToQueue, 1000, 1, 0);
        k.dispatch(&mut frame, SVC);
        assert_eq!(status(&frame), Some(Status::SentFailed));
    }
}
