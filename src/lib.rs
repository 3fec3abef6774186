// Copyright 2026 The uthreads Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! A user-level preemptive thread library for a single POSIX process.
//!
//! This crate schedules an arbitrary number of cooperating "user threads"
//! onto the one kernel thread the process actually has, preempting between
//! them on a fixed quantum using `SIGVTALRM` and a virtual-time interval
//! timer. There is no kernel involvement beyond that one signal: every
//! context switch is a hand-rolled `sigsetjmp`/`siglongjmp` pair, and every
//! piece of shared state is guarded by masking that same signal rather than
//! by a mutex (see [`signal_gate`]).
//!
//! ## Initialisation
//!
//! [`init`] must be called exactly once, before any other function in this
//! crate, and installs the calling thread as tid 0.
//!
//! ## Threads
//!
//! [`spawn`] creates a new thread in the `Ready` state, runnable as soon as
//! the scheduler gets to it. [`terminate`] ends a thread (or, given tid 0,
//! the whole process). [`block`]/[`resume`] and [`sleep`] control whether a
//! thread is eligible to run; see their own docs for how those interact.
//!
//! ## Errors
//!
//! Two taxa, per [`error`]: a [`SchedulerError`] is a caller mistake or an
//! unsatisfiable request, reported to stderr as `thread library error: ...`
//! and returned to the caller (as `-1` through the C-style façade below, or
//! as `Err` through the functions in [`scheduler`]). A [`SystemError`] is a
//! failed syscall the library cannot recover from; it is reported as
//! `system error: ...` and ends the process, since there is no meaningful
//! way to keep scheduling threads without a working signal/timer pair.

mod config;
mod context;
mod error;
mod ready_queue;
pub mod scheduler;
mod signal_gate;
mod sleep_table;
mod table;
mod thread;
mod timer;

pub use config::Tid;
pub use error::{SchedulerError, SystemError};
pub use scheduler::Stats;

use std::sync::Once;

/// Guards [`init`] against running more than once in a process.
/// spec.md leaves repeated `init` entirely undefined; this narrows that to
/// a diagnosed library error for every case except the one spec.md still
/// leaves undefined — calling `init` again after `terminate(0)` ought to
/// have already ended the process via [`std::process::exit`], so no call
/// ever observes that case returning normally in the first place.
static INIT_ONCE: Once = Once::new();

/// Initialises the thread library with a quantum length of
/// `quantum_usecs` microseconds. Must be called before any other function
/// in this crate.
///
/// Returns `-1` and reports a library error if `quantum_usecs` is not
/// positive, or if this process has already initialised the library.
pub fn init(quantum_usecs: i32) -> i32 {
    if quantum_usecs <= 0 {
        return fail(SchedulerError::InvalidQuantum);
    }
    if INIT_ONCE.is_completed() {
        return fail(SchedulerError::AlreadyInitialised);
    }
    let mut outcome = Ok(());
    INIT_ONCE.call_once(|| {
        outcome = scheduler::init(quantum_usecs);
    });
    ok_or_fail(outcome)
}

/// Spawns a new thread that will begin executing `entry` the first time
/// the scheduler runs it, in the lowest-numbered free slot. Returns the
/// new thread's tid, or `-1` if `entry` is null or there is no free slot.
pub fn spawn(entry: extern "C" fn()) -> i32 {
    spawn_named(entry, None)
}

/// As [`spawn`], but attaches `name` to the new thread for diagnostics
/// (visible in `RUST_LOG=trace` output; not part of the C-style external
/// interface spec.md §6 specifies, since that interface has no room for a
/// name argument).
pub fn spawn_named(entry: extern "C" fn(), name: Option<&str>) -> i32 {
    if (entry as usize) == 0 {
        return fail(SchedulerError::NullEntry);
    }
    match scheduler::spawn(entry, name.map(str::to_owned)) {
        Ok(tid) => tid,
        Err(err) => fail(err),
    }
}

/// Terminates the thread named by `tid`. If `tid` is the calling thread,
/// or `0`, this does not return on success — the calling thread's
/// execution simply ends (or the whole process exits, for `tid == 0`).
/// Returns `-1` if `tid` does not name a live thread.
pub fn terminate(tid: Tid) -> i32 {
    ok_or_fail(scheduler::terminate(tid))
}

/// Blocks the thread named by `tid`, preventing it from being scheduled
/// until a matching [`resume`]. A no-op if the thread is already blocked.
/// Returns `-1` if `tid` names the main thread, does not name a live
/// thread, or blocking it would leave nothing runnable.
pub fn block(tid: Tid) -> i32 {
    if tid == 0 {
        return fail(SchedulerError::BlockedTidZero);
    }
    ok_or_fail(scheduler::block(tid))
}

/// Resumes the thread named by `tid`, making it runnable again unless it
/// is also asleep. A no-op if the thread is not currently blocked.
/// Returns `-1` if `tid` does not name a live thread.
pub fn resume(tid: Tid) -> i32 {
    ok_or_fail(scheduler::resume(tid))
}

/// Puts the calling thread to sleep for `num_quantums` quantum starts.
/// Sleeping is independent of the user-block flag: a thread that is both
/// asleep and blocked only becomes runnable once both conditions clear.
/// Returns `-1` if called by the main thread, or if `num_quantums` is not
/// positive.
pub fn sleep(num_quantums: i32) -> i32 {
    match scheduler::get_tid() {
        Ok(0) => fail(SchedulerError::SleepByTidZero),
        Ok(_) => ok_or_fail(scheduler::sleep(num_quantums)),
        Err(err) => fail(err),
    }
}

/// Returns the tid of the currently running thread.
pub fn get_tid() -> i32 {
    match scheduler::get_tid() {
        Ok(tid) => tid,
        Err(err) => fail(err),
    }
}

/// Returns the total number of quantums that have started since [`init`],
/// counting the first quantum of the main thread.
pub fn get_total_quantums() -> i32 {
    match scheduler::get_total_quantums() {
        Ok(value) => value as i32,
        Err(err) => fail(err),
    }
}

/// Returns the number of quantums `tid` has been scheduled for, or `-1`
/// if `tid` does not name a live thread.
pub fn get_quantums(tid: Tid) -> i32 {
    match scheduler::get_quantums(tid) {
        Ok(Some(count)) => count as i32,
        Ok(None) => fail(SchedulerError::UnknownTid(tid)),
        Err(err) => fail(err),
    }
}

/// A snapshot of scheduler activity counters (spawns, preemptions,
/// voluntary switches), purely for diagnostics. Not part of spec.md §6's
/// external interface; added because the original implementation tracks
/// the same counters behind a debug build flag (SPEC_FULL.md §4.H).
pub fn stats() -> Result<Stats, SchedulerError> {
    scheduler::stats()
}

fn ok_or_fail(result: Result<(), SchedulerError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => fail(err),
    }
}

fn fail(err: SchedulerError) -> i32 {
    error::report_library_error(err);
    -1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::test_support;
    use serial_test::serial;

    extern "C" fn spin() {
        loop {
            std::hint::spin_loop();
        }
    }

    fn reset() {
        let _ = env_logger::try_init();
        test_support::reset_for_test();
    }

    #[test]
    #[serial]
    fn init_then_get_tid_is_main() {
        reset();
        assert_eq!(scheduler::init_with_capacity(10_000, 8), Ok(()));
        assert_eq!(get_tid(), 0);
        assert_eq!(get_total_quantums(), 1);
        reset();
    }

    #[test]
    #[serial]
    fn spawn_fills_lowest_free_slot() {
        reset();
        scheduler::init_with_capacity(10_000, 8).unwrap();
        let a = spawn(spin);
        let b = spawn(spin);
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(terminate(a), 0);
        let c = spawn(spin);
        assert_eq!(c, 1);
        reset();
    }

    #[test]
    #[serial]
    fn spawn_rejects_null_entry() {
        reset();
        scheduler::init_with_capacity(10_000, 8).unwrap();
        let null_entry: extern "C" fn() = unsafe { std::mem::transmute(0usize) };
        assert_eq!(spawn(null_entry), -1);
        reset();
    }

    #[test]
    #[serial]
    fn block_tid_zero_is_rejected() {
        reset();
        scheduler::init_with_capacity(10_000, 8).unwrap();
        assert_eq!(block(0), -1);
        reset();
    }

    #[test]
    #[serial]
    fn terminate_unknown_tid_is_rejected() {
        reset();
        scheduler::init_with_capacity(10_000, 8).unwrap();
        assert_eq!(terminate(5), -1);
        reset();
    }

    #[test]
    #[serial]
    fn init_twice_via_facade_is_rejected() {
        reset();
        assert_eq!(init(5_000), 0);
        assert_eq!(init(5_000), -1);
        reset();
    }

    #[test]
    #[serial]
    fn spawn_fails_once_table_is_full() {
        use crate::config::test_overrides::SMALL_MAX_THREADS;
        reset();
        scheduler::init_with_capacity(10_000, SMALL_MAX_THREADS).unwrap();
        for _ in 1..SMALL_MAX_THREADS {
            assert!(spawn(spin) >= 0);
        }
        assert_eq!(spawn(spin), -1);
        reset();
    }
}
