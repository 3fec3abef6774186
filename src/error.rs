// Copyright 2026 The uthreads Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Diagnostics: the two error taxa from spec.md §7.
//!
//! Library errors are caller mistakes or impossible requests; they are
//! reported on stderr with the `thread library error:` prefix and the
//! offending call returns -1. System errors are failed syscalls; they are
//! reported with the `system error:` prefix and the process exits with
//! code 1, since the library has no meaningful way to continue without its
//! preemption primitive.

use crate::config::Tid;
use std::fmt;

/// A caller-recoverable error: bad arguments, or a request the scheduler
/// cannot currently satisfy.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("thread library has not been initialised")]
    NotInitialised,
    #[error("thread library has already been initialised")]
    AlreadyInitialised,
    #[error("no free thread slot")]
    NoFreeSlot,
    #[error("tid {0} does not exist")]
    UnknownTid(Tid),
    #[error("quantum length must be positive")]
    InvalidQuantum,
    #[error("sleep length must be positive")]
    InvalidSleepDuration,
    #[error("no runnable thread to switch to")]
    NoRunnableSuccessor,
    #[error("the main thread cannot be blocked")]
    BlockedTidZero,
    #[error("the main thread cannot sleep")]
    SleepByTidZero,
    #[error("entry function must not be null")]
    NullEntry,
}

/// A process-fatal error: a syscall the library depends on failed.
///
/// There is no recovery path: the caller should report this and exit.
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("sigaction failed: {0}")]
    SigAction(#[source] std::io::Error),
    #[error("sigprocmask failed: {0}")]
    SigProcMask(#[source] std::io::Error),
    #[error("setitimer failed: {0}")]
    SetItimer(#[source] std::io::Error),
}

/// Writes a `thread library error:` line to stderr, matching the exact
/// prefix spec.md §6 and §7 require.
pub fn report_library_error(err: impl fmt::Display) {
    eprintln!("thread library error: {}", err);
}

/// Writes a `system error:` line to stderr and terminates the process
/// with exit code 1.
///
/// This never returns.
pub fn report_system_error(err: impl fmt::Display) -> ! {
    eprintln!("system error: {}", err);
    std::process::exit(1);
}
