// Copyright 2026 The uthreads Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Opaque save/restore of a thread's machine context (spec.md §4.A).
//!
//! This is the one module in the crate that is inherently `unsafe`: it
//! hand-builds a `sigsetjmp` jump buffer so that the *first* restore of a
//! freshly spawned thread lands on `entry_fn` running on `stack_top`,
//! rather than replaying a previously saved call frame. Everything outside
//! this module only ever sees [`Context::save`] and [`Context::restore`];
//! neither the scheduler nor the thread table knows how a context is laid
//! out in memory.
//!
//! Confined to x86_64 Linux/glibc, matching the scope of original_source's
//! `thread.cpp`, which hand-mangles the saved stack pointer and program
//! counter the same way glibc's own `setjmp` does on this target. Porting
//! to another architecture means replacing [`JB_SP`]/[`JB_PC`] and
//! [`translate_address`] with that target's equivalents; there is no
//! portable way to do this without reaching into libc internals, which is
//! exactly why spec.md treats `Context` as an opaque, implementation-defined
//! collaborator.

#[cfg(not(all(target_arch = "x86_64", target_os = "linux")))]
compile_error!("uthreads::context requires x86_64 Linux (glibc sigsetjmp layout)");

use libc::{c_int, sigset_t};

/// Index of the saved stack pointer (`rsp`) within `__jmp_buf`, per
/// glibc's `bits/setjmp.h` on x86_64.
const JB_SP: usize = 6;

/// Index of the saved program counter (`rip`) within `__jmp_buf`, per
/// glibc's `bits/setjmp.h` on x86_64.
const JB_PC: usize = 7;

/// Mirrors glibc's `__jmp_buf_tag` on x86_64: six callee-saved registers,
/// plus `rsp`/`rip`, followed by the mask-saved flag and the saved signal
/// mask that `sigsetjmp(_, 1)` fills in.
#[repr(C)]
struct JmpBufTag {
    jb: [u64; 8],
    mask_was_saved: c_int,
    saved_mask: sigset_t,
}

extern "C" {
    // Declared by hand: the libc crate omits these because their
    // return-twice calling convention can't be expressed in a normal
    // Rust function signature, but the symbols are real glibc exports
    // and calling them through this declaration works exactly as it
    // would from C.
    #[link_name = "sigsetjmp"]
    fn raw_sigsetjmp(env: *mut JmpBufTag, savesigs: c_int) -> c_int;
    #[link_name = "siglongjmp"]
    fn raw_siglongjmp(env: *mut JmpBufTag, val: c_int) -> !;
}

/// Obscures a pointer the way glibc's `setjmp`/`longjmp` obscure saved
/// code and stack pointers on x86_64, using the per-thread guard value at
/// `%fs:0x30`. This is what lets a hand-built jump buffer survive glibc's
/// internal pointer-mangling without tripping `__longjmp`'s corruption
/// check.
unsafe fn translate_address(addr: u64) -> u64 {
    let result: u64;
    std::arch::asm!(
        "xor %fs:0x30, {0}",
        "rol $0x11, {0}",
        inout(reg) addr => result,
        options(nostack, preserves_flags, att_syntax),
    );
    result
}

/// A thread's saved machine context: stack pointer, program counter, and
/// callee-saved registers, plus the signal mask active when it was saved.
pub struct Context {
    buf: JmpBufTag,
}

impl Context {
    /// Builds a context that, when first restored, starts executing
    /// `entry_fn` on top of `stack_top` (the highest address of the
    /// thread's stack; the stack grows down from here).
    pub fn make(entry_fn: extern "C" fn(), stack_top: *mut u8) -> Context {
        let mut ctx = Context {
            buf: JmpBufTag {
                jb: [0; 8],
                mask_was_saved: 0,
                saved_mask: unsafe { std::mem::zeroed() },
            },
        };

        // Seed the jump buffer with the current environment (in
        // particular, the current signal mask) so that restoring it
        // later behaves like any other sigsetjmp/siglongjmp round
        // trip; we then overwrite only the SP and PC slots.
        unsafe { raw_sigsetjmp(&mut ctx.buf, 1) };

        unsafe {
            ctx.buf.jb[JB_SP] = translate_address(stack_top as u64);
            ctx.buf.jb[JB_PC] = translate_address(entry_fn as usize as u64);
        }
        unsafe { libc::sigemptyset(&mut ctx.buf.saved_mask) };
        ctx.buf.mask_was_saved = 0;

        ctx
    }

    /// Creates a context representing "wherever the calling thread
    /// already is" — used only for tid 0, which has no separately
    /// constructed stack. The first call to [`Context::save`] on this
    /// context fills it in properly.
    pub fn current_thread_placeholder() -> Context {
        Context {
            buf: JmpBufTag {
                jb: [0; 8],
                mask_was_saved: 0,
                saved_mask: unsafe { std::mem::zeroed() },
            },
        }
    }

    /// Captures the calling frame into `self`. Returns `0` on the
    /// "just saved" path and nonzero on the "resumed" path, exactly as
    /// `sigsetjmp` does.
    ///
    /// # Safety
    ///
    /// The returned token distinguishes the two return paths; callers
    /// must not treat this as an ordinary function call that returns
    /// once.
    #[inline(always)]
    pub unsafe fn save(&mut self) -> i32 {
        raw_sigsetjmp(&mut self.buf, 1)
    }

    /// Transfers control to the point captured by [`Context::save`] (or
    /// built by [`Context::make`]). Never returns.
    ///
    /// # Safety
    ///
    /// `self` must have been populated by `save` or `make`, and the
    /// stack it refers to must still be valid (for a spawned thread,
    /// its `Box<[u8]>` allocation must not have been freed yet — this is
    /// exactly what the pending-deletion list in `scheduler.rs`
    /// guarantees).
    #[inline(always)]
    pub unsafe fn restore(&mut self) -> ! {
        raw_siglongjmp(&mut self.buf, 1)
    }
}

// `Context` contains no references and is only ever accessed by the one
// logical thread that currently owns it, but it lives inside a
// process-global table, so the scheduler needs to be able to move it
// between threads' (plural: our own user-level notion of "thread") views
// of that table under the signal gate.
unsafe impl Send for Context {}
