//! ARMv7-M port (Cortex-M3/M4/M7)
//!
//! - SVCall: supervisor trap entry, decodes `SVC #0x80` from the stacked PC
//! - PendSV: deferred context switch, lowest priority
//! - SysTick: kernel tick
//!
//! Tasks run unprivileged on PSP; handlers run on MSP. PendSV sits below
//! SVCall and SysTick so a switch always happens after the bookkeeping that
//! requested it. Tasks must not use the FPU: only the basic frame is saved.
//!
//! The application provides the vector table (e.g. `cortex-m-rt`); the
//! handlers below are exported under the names it expects.
//!
//! Author: Moroya Sakamoto

use core::arch::{asm, naked_asm};
use core::sync::atomic::{AtomicU32, Ordering};

use ::cortex_m::peripheral::scb::SystemHandler;
use ::cortex_m::peripheral::syst::SystClkSource;
use ::cortex_m::peripheral::SCB;

use super::{ExceptionFrame, Port};
use crate::api::{Api, Supervisor};
use crate::config::SVC_NUMBER;
use crate::critical::KernelCell;
use crate::kernel::Kernel;
use crate::syscall::Syscall;
use crate::task::TaskFn;

/// Exception priorities (upper bits only are implemented)
const PENDSV_PRIORITY: u8 = 0xFF;
const KERNEL_PRIORITY: u8 = 0x80;

/// Core clock feeding SysTick
static CORE_CLOCK_HZ: AtomicU32 = AtomicU32::new(72_000_000);

/// Set the core clock frequency before starting the kernel
pub fn set_core_clock(hz: u32) {
    CORE_CLOCK_HZ.store(hz, Ordering::Relaxed);
}

/// The kernel instance
pub static KERNEL: KernelCell<CortexM> = KernelCell::new(Kernel::new(CortexM));

/// Task-side kernel calls
pub static OS: Api<Svc> = Api::new(Svc);

/// Cortex-M processor services
pub struct CortexM;

impl Port for CortexM {
    fn pend_switch(&self) {
        SCB::set_pendsv();
    }

    fn start_tick(&self, tick_hz: u32) {
        // SAFETY: the kernel owns SysTick and the system handler priorities
        // from start on; nothing else holds these peripherals.
        let mut p = unsafe { ::cortex_m::Peripherals::steal() };
        // SAFETY: priorities are set before the first task can run.
        unsafe {
            p.SCB.set_priority(SystemHandler::PendSV, PENDSV_PRIORITY);
            p.SCB.set_priority(SystemHandler::SVCall, KERNEL_PRIORITY);
            p.SCB.set_priority(SystemHandler::SysTick, KERNEL_PRIORITY);
        }
        let reload = (CORE_CLOCK_HZ.load(Ordering::Relaxed) / tick_hz).saturating_sub(1);
        p.SYST.set_clock_source(SystClkSource::Core);
        p.SYST.set_reload(reload);
        p.SYST.clear_current();
        p.SYST.enable_interrupt();
        p.SYST.enable_counter();
    }

    fn launch(sp: usize) {
        // SAFETY: `sp` points at a complete synthesized frame. The callee half
        // is popped here, the hardware half by the exception return onto PSP
        // in unprivileged thread mode. The MSP frames below are abandoned.
        unsafe {
            asm!(
                "ldmia r0!, {{r4-r11}}",
                "msr psp, r0",
                "movs r1, #1",
                "msr control, r1",
                "isb",
                "mvn lr, #2",
                "bx lr",
                in("r0") sp,
                options(noreturn),
            );
        }
    }

    fn idle_entry() -> TaskFn {
        idle
    }

    fn task_exit() -> usize {
        task_exit as usize
    }
}

/// Trap primitive: `SVC #0x80` with r0-r3 loaded
pub struct Svc;

impl Supervisor for Svc {
    fn call(&self, code: Syscall, args: [usize; 3]) -> (usize, usize) {
        let r0: usize;
        let r1: usize;
        // SAFETY: the handler only reads the argument registers and writes
        // r0/r1 in the stacked frame; everything else is restored on return.
        unsafe {
            asm!(
                "svc #{n}",
                n = const SVC_NUMBER,
                inout("r0") code.code() => r0,
                inout("r1") args[0] => r1,
                in("r2") args[1],
                in("r3") args[2],
            );
        }
        (r0, r1)
    }
}

extern "C" fn idle(_arg: usize) {
    loop {
        ::cortex_m::asm::wfe();
    }
}

/// Return address of every task entry
extern "C" fn task_exit() -> ! {
    OS.kill()
}

/// Rust half of SVCall, called with the caller's stacked frame
extern "C" fn svc_entry(frame: &mut ExceptionFrame) {
    // SAFETY: the stacked PC points just past the 16-bit SVC instruction.
    let insn = unsafe { core::ptr::read_volatile((frame.pc - 2) as *const u16) };
    KERNEL.service_trap(frame, insn);
}

/// Rust half of PendSV: save `sp`, return the stack to restore
extern "C" fn pendsv_switch(sp: usize) -> usize {
    KERNEL.with(|k| k.switch_context(sp))
}

/// Supervisor call handler
///
/// Picks whichever stack the caller was using and passes its frame on.
#[unsafe(no_mangle)]
#[unsafe(naked)]
unsafe extern "C" fn SVCall() {
    naked_asm!(
        "tst lr, #4",
        "ite eq",
        "mrseq r0, msp",
        "mrsne r0, psp",
        "push {{r4, lr}}",
        "bl {entry}",
        "pop {{r4, pc}}",
        entry = sym svc_entry,
    );
}

/// Deferred context switch
///
/// Only r0-r3 and r12 are free on entry; r4-r11 still belong to the
/// outgoing task until they are stacked.
#[unsafe(no_mangle)]
#[unsafe(naked)]
unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",
        "push {{r4, lr}}",
        "bl {switch}",
        "pop {{r4, lr}}",
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        "bx lr",
        switch = sym pendsv_switch,
    );
}

/// Kernel tick
#[unsafe(no_mangle)]
extern "C" fn SysTick() {
    KERNEL.with(|k| k.tick());
}
