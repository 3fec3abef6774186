// Copyright 2026 The uthreads Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The signal gate: the library's sole critical-section primitive
//! (spec.md §4.F). Masking and unmasking `SIGVTALRM` around every mutation
//! of shared scheduler state is what makes that state safe to touch from
//! code that can otherwise be preempted at any instruction.

use crate::error::SystemError;
use std::mem::MaybeUninit;

/// Blocks `SIGVTALRM` for the calling (only) kernel thread.
///
/// Must be paired with exactly one [`unblock_timer`] call; nested use is
/// avoided by construction (spec.md §4.F) rather than by reference
/// counting, so callers must not call this from code that might already
/// be inside a masked section.
pub fn block_timer() -> Result<(), SystemError> {
    with_vtalrm_set(|set| unsafe { libc::sigprocmask(libc::SIG_BLOCK, set, std::ptr::null_mut()) })
}

/// Unblocks `SIGVTALRM` for the calling kernel thread.
pub fn unblock_timer() -> Result<(), SystemError> {
    with_vtalrm_set(|set| unsafe {
        libc::sigprocmask(libc::SIG_UNBLOCK, set, std::ptr::null_mut())
    })
}

fn with_vtalrm_set(op: impl FnOnce(*const libc::sigset_t) -> i32) -> Result<(), SystemError> {
    let mut set = MaybeUninit::<libc::sigset_t>::uninit();
    unsafe {
        libc::sigemptyset(set.as_mut_ptr());
        libc::sigaddset(set.as_mut_ptr(), libc::SIGVTALRM);
    }
    let set = unsafe { set.assume_init() };
    let rc = op(&set);
    if rc != 0 {
        return Err(SystemError::SigProcMask(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Runs `f` with `SIGVTALRM` masked, restoring the previous mask
/// (unconditionally unblocking it, since this library never nests
/// critical sections) afterwards. This is the `SignalGate::with_masked`
/// helper spec.md's design notes describe as the idiomatic way to guard a
/// module-private cell of scheduler state in a language that insists on
/// statically proving data-race freedom.
pub fn with_masked<T>(f: impl FnOnce() -> T) -> Result<T, SystemError> {
    block_timer()?;
    let result = f();
    unblock_timer()?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_then_unblock_round_trips() {
        block_timer().expect("block_timer should succeed");
        unblock_timer().expect("unblock_timer should succeed");
    }
}
