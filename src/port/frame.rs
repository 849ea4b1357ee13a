//! Saved register frame layout
//!
//! A suspended task's stack ends with the callee-saved registers pushed by
//! the switcher, directly below the frame the processor stacks on exception
//! entry. New tasks get a synthesized copy of both so their first dispatch
//! looks exactly like a resume after preemption.
//!
//! Author: Moroya Sakamoto

use crate::config::WORD_SIZE;

/// Default xPSR for a new task (Thumb state)
pub const INITIAL_XPSR: usize = 0x0100_0000;

/// Frame stacked by hardware on exception entry
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExceptionFrame {
    pub r0: usize,
    pub r1: usize,
    pub r2: usize,
    pub r3: usize,
    pub r12: usize,
    pub lr: usize,
    pub pc: usize,
    pub xpsr: usize,
}

/// Frame pushed by the context switcher
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalleeFrame {
    pub r4: usize,
    pub r5: usize,
    pub r6: usize,
    pub r7: usize,
    pub r8: usize,
    pub r9: usize,
    pub r10: usize,
    pub r11: usize,
}

pub const EXCEPTION_WORDS: usize = core::mem::size_of::<ExceptionFrame>() / WORD_SIZE;
pub const CALLEE_WORDS: usize = core::mem::size_of::<CalleeFrame>() / WORD_SIZE;

/// Words of a complete saved context
pub const FRAME_WORDS: usize = EXCEPTION_WORDS + CALLEE_WORDS;

/// Bytes of a complete saved context
pub const FRAME_BYTES: usize = FRAME_WORDS * WORD_SIZE;

/// Lay out an initial context at the top of `stack`
///
/// Returns the word index of the saved stack pointer, or `None` if the
/// stack cannot hold a frame.
pub fn init_stack(stack: &mut [usize], entry: usize, arg: usize, exit: usize) -> Option<usize> {
    let sp = stack.len().checked_sub(FRAME_WORDS)?;
    let (callee, hw) = stack[sp..].split_at_mut(CALLEE_WORDS);
    callee.fill(0);
    let frame = ExceptionFrame {
        r0: arg,
        lr: exit,
        // Exception return wants the Thumb bit clear
        pc: entry & !1,
        xpsr: INITIAL_XPSR,
        ..ExceptionFrame::default()
    };
    hw.copy_from_slice(&[
        frame.r0, frame.r1, frame.r2, frame.r3, frame.r12, frame.lr, frame.pc, frame.xpsr,
    ]);
    Some(sp)
}

/// Immediate of a Thumb `SVC #imm8` encoding
pub fn decode_svc(insn: u16) -> Option<u8> {
    if insn & 0xFF00 == 0xDF00 {
        Some((insn & 0x00FF) as u8)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        assert_eq!(EXCEPTION_WORDS, 8);
        assert_eq!(CALLEE_WORDS, 8);
        assert_eq!(FRAME_BYTES % 8, 0);
    }

    #[test]
    fn test_init_stack_layout() {
        let mut stack = [0xAAusize; 32];
        let sp = init_stack(&mut stack, 0x0800_0101, 0x55, 0x0800_0201).unwrap();
        assert_eq!(sp, 32 - FRAME_WORDS);
        assert!(stack[sp..sp + CALLEE_WORDS].iter().all(|&w| w == 0));
        let hw = &stack[sp + CALLEE_WORDS..];
        assert_eq!(hw[0], 0x55);
        assert_eq!(hw[5], 0x0800_0201);
        assert_eq!(hw[6], 0x0800_0100);
        assert_eq!(hw[7], INITIAL_XPSR);
        // Below the frame is untouched
        assert_eq!(stack[sp - 1], 0xAA);
    }

    #[test]
    fn test_init_stack_too_small() {
        let mut stack = [0usize; FRAME_WORDS - 1];
        assert_eq!(init_stack(&mut stack, 0, 0, 0), None);
    }

    #[test]
    fn test_decode_svc() {
        assert_eq!(decode_svc(0xDF80), Some(0x80));
        assert_eq!(decode_svc(0xDF00), Some(0));
        assert_eq!(decode_svc(0xBF00), None);
    }
}
