// Copyright 2026 The uthreads Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The preemption timer: a periodic interval timer against virtual
//! (on-CPU) time, driving quantum boundaries (spec.md §4.G).

use crate::error::SystemError;
use std::mem::MaybeUninit;

/// Installs `handler` as the `SIGVTALRM` signal handler.
///
/// The handler runs with `SIGVTALRM` automatically added to its mask by
/// the kernel's delivery discipline, and must not allocate memory
/// (spec.md §4.H, "the handler must not allocate memory").
pub fn install_handler(handler: extern "C" fn(i32)) -> Result<(), SystemError> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as usize;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);

        let mut old = MaybeUninit::<libc::sigaction>::uninit();
        let rc = libc::sigaction(libc::SIGVTALRM, &action, old.as_mut_ptr());
        if rc != 0 {
            return Err(SystemError::SigAction(std::io::Error::last_os_error()));
        }
    }
    Ok(())
}

/// Arms (or re-arms) the timer to fire once after `quantum_usecs`
/// microseconds, then every `quantum_usecs` microseconds thereafter. The
/// same interval is used for both the initial delay and the repeat,
/// per spec.md §4.G.
pub fn arm(quantum_usecs: i64) -> Result<(), SystemError> {
    let interval = libc::timeval {
        tv_sec: quantum_usecs / 1_000_000,
        tv_usec: quantum_usecs % 1_000_000,
    };
    let itimer = libc::itimerval {
        it_interval: interval,
        it_value: interval,
    };
    let rc = unsafe { libc::setitimer(libc::ITIMER_VIRTUAL, &itimer, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(SystemError::SetItimer(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Disarms the timer entirely. Used during the exit ceremony (spec.md
/// §4.H, "disarm the timer").
pub fn disarm() -> Result<(), SystemError> {
    let zero = libc::timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    let itimer = libc::itimerval {
        it_interval: zero,
        it_value: zero,
    };
    let rc = unsafe { libc::setitimer(libc::ITIMER_VIRTUAL, &itimer, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(SystemError::SetItimer(std::io::Error::last_os_error()));
    }
    Ok(())
}
