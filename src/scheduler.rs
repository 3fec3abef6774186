// Copyright 2026 The uthreads Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The scheduler core (spec.md §4.H): the state machine governing thread
//! lifecycle, the context-switch routine, and the self-termination and
//! process-exit ceremonies.
//!
//! This is the one part of the crate that touches genuinely global,
//! process-wide mutable state, because it must: a single `SIGVTALRM`
//! handler can only reach module state through a `static`, not through a
//! value threaded through call arguments. Every access to that state,
//! from the public API and from the signal handler alike, happens with
//! the preemption signal masked (spec.md §3 invariant 7) — we do not use
//! a `Mutex` here, since a mutex held across a signal that re-enters the
//! same thread does not compose (spec.md §9, "do not introduce
//! mutexes"). Instead we follow the pattern spec.md's design notes
//! describe: a module-private cell reached only through
//! [`signal_gate::with_masked`], which stands in for the `SignalGate`
//! helper spec.md names directly.

use crate::config::{Tid, MAX_THREADS};
use crate::error::{SchedulerError, SystemError};
use crate::ready_queue::ReadyQueue;
use crate::signal_gate;
use crate::sleep_table::SleepTable;
use crate::table::ThreadTable;
use crate::thread::{RunState, ThreadRecord};
use crate::timer;
use log::{debug, trace, warn};
use std::cell::UnsafeCell;
use std::io::Write;

/// Snapshot of scheduler activity, for diagnostics only (SPEC_FULL.md
/// §4.H). Never consulted by the scheduler itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub spawns: u64,
    pub preemptions: u64,
    pub voluntary_switches: u64,
}

/// All scheduler state: the thread table, the ready queue, the sleep
/// table, the pending-deletion list, and the scalar globals from
/// spec.md §3.
struct Scheduler {
    table: ThreadTable,
    ready_queue: ReadyQueue,
    sleep_table: SleepTable,
    pending_deletion: Vec<Tid>,
    current_tid: Tid,
    total_quantums: u64,
    quantum_usecs: i64,
    should_exit: bool,
    stats: Stats,
}

impl Scheduler {
    fn new(capacity: usize, quantum_usecs: i64) -> Scheduler {
        let mut table = ThreadTable::new(capacity);
        let mut main_thread = ThreadRecord::new_main_thread();
        main_thread.begin_quantum();
        table.insert_at(0, main_thread);

        Scheduler {
            table,
            ready_queue: ReadyQueue::new(),
            sleep_table: SleepTable::new(),
            pending_deletion: Vec::new(),
            current_tid: 0,
            total_quantums: 1,
            quantum_usecs,
            should_exit: false,
            stats: Stats::default(),
        }
    }
}

/// A cell holding the one scheduler instance for this process. Reached
/// only from within a masked critical section (either a public API call
/// that masked on entry, or the signal handler, which the kernel masks
/// for automatically), so it is never touched concurrently with itself.
struct GlobalCell(UnsafeCell<Option<Scheduler>>);

// Safety: every access to the inner `Option<Scheduler>` goes through
// `with_scheduler`/`with_scheduler_mut`, which require the caller to
// already be inside a signal-masked critical section. There is only
// ever one kernel thread in this process, so "Sync" here just means
// "a single static can be named from the signal handler".
unsafe impl Sync for GlobalCell {}

static SCHEDULER: GlobalCell = GlobalCell(UnsafeCell::new(None));

/// Runs `f` with a mutable reference to the global scheduler.
///
/// # Safety
///
/// Must only be called with `SIGVTALRM` already masked (either by the
/// caller, via [`signal_gate::with_masked`], or by virtue of running
/// inside the signal handler itself).
unsafe fn with_scheduler_mut<T>(f: impl FnOnce(&mut Scheduler) -> T) -> Result<T, SchedulerError> {
    let slot = &mut *SCHEDULER.0.get();
    match slot {
        Some(sched) => Ok(f(sched)),
        None => Err(SchedulerError::NotInitialised),
    }
}

fn die_on_system_error<T>(result: Result<T, SystemError>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => crate::error::report_system_error(err),
    }
}

/// Initialises the scheduler (spec.md §4.H, `init`).
///
/// Creates thread 0 in state `Running`, installs the `SIGVTALRM` handler,
/// and arms the preemption timer. Behaviour on repeated calls is
/// undefined, as spec.md requires; this crate narrows that only to the
/// extent of [`SPEC_FULL.md`]'s façade-level initialisation guard, which
/// lives in `lib.rs`, not here.
pub fn init(quantum_usecs: i32) -> Result<(), SchedulerError> {
    init_with_capacity(quantum_usecs, MAX_THREADS)
}

/// As [`init`], but with a caller-chosen thread table capacity. Exists so
/// tests can exercise the "table full" boundary without spawning 100
/// real threads.
pub fn init_with_capacity(quantum_usecs: i32, capacity: usize) -> Result<(), SchedulerError> {
    if quantum_usecs <= 0 {
        return Err(SchedulerError::InvalidQuantum);
    }

    let sched = Scheduler::new(capacity, quantum_usecs as i64);
    unsafe {
        *SCHEDULER.0.get() = Some(sched);
    }

    die_on_system_error(timer::install_handler(preemption_handler));
    die_on_system_error(timer::arm(quantum_usecs as i64));
    debug!("uthreads: initialised with quantum_usecs={}", quantum_usecs);
    Ok(())
}

/// Allocates the lowest free tid, builds a stack and context for
/// `entry_fn`, and enqueues it as `Ready` (spec.md §4.H, `spawn`).
pub fn spawn(entry_fn: extern "C" fn(), name: Option<String>) -> Result<Tid, SchedulerError> {
    let outcome = signal_gate::with_masked(|| unsafe {
        with_scheduler_mut(|sched| {
            let tid = sched
                .table
                .insert_lowest_free(|tid| ThreadRecord::new_spawned(tid, entry_fn, name))
                .map_err(|_| SchedulerError::NoFreeSlot)?;
            sched.ready_queue.push_back(tid);
            sched.stats.spawns += 1;
            debug!("uthreads: spawned tid={}", tid);
            Ok(tid)
        })
        .and_then(|inner| inner)
    });

    match outcome {
        Err(sys_err) => crate::error::report_system_error(sys_err),
        Ok(inner) => inner,
    }
}

/// Terminates `tid` (spec.md §4.H, `terminate`). Does not return when
/// terminating the caller itself, or tid 0 successfully.
pub fn terminate(tid: Tid) -> Result<(), SchedulerError> {
    let outcome = signal_gate::with_masked(|| unsafe {
        with_scheduler_mut(|sched| terminate_locked(sched, tid)).and_then(|inner| inner)
    });

    match outcome {
        Err(sys_err) => crate::error::report_system_error(sys_err),
        Ok(Err(sched_err)) => Err(sched_err),
        Ok(Ok(TerminateOutcome::Returned)) => Ok(()),
        Ok(Ok(TerminateOutcome::Diverged)) => {
            unreachable!("terminate() that switches contexts never returns")
        }
    }
}

enum TerminateOutcome {
    Returned,
    Diverged,
}

fn terminate_locked(
    sched: &mut Scheduler,
    tid: Tid,
) -> Result<TerminateOutcome, SchedulerError> {
    if tid == 0 {
        if sched.current_tid == 0 {
            perform_exit_ceremony(sched);
        }
        // A non-zero thread asked for the process to exit. Hand the
        // exit ceremony to thread 0, which is the only thread that may
        // safely tear down stacks (spec.md §9, "process exit from
        // non-main").
        sched.ready_queue.replace_with_only(0);
        sched.should_exit = true;
        debug!("uthreads: tid={} requested process exit via tid 0", sched.current_tid);
        do_context_switch(sched);
        return Ok(TerminateOutcome::Diverged);
    }

    if !sched.table.contains(tid) {
        return Err(SchedulerError::UnknownTid(tid));
    }

    if tid != sched.current_tid {
        sched.ready_queue.remove(tid);
        sched.sleep_table.remove(tid);
        sched.table.remove(tid);
        debug!("uthreads: terminated tid={} from tid={}", tid, sched.current_tid);
        return Ok(TerminateOutcome::Returned);
    }

    // Self-termination: defer freeing the record until after the next
    // context switch away from it, since we are standing on its stack
    // right now.
    sched.pending_deletion.push(tid);
    sched
        .table
        .get_mut(tid)
        .expect("current thread must exist")
        .set_run_state(RunState::Ready);
    debug!("uthreads: tid={} self-terminating", tid);
    do_context_switch(sched);
    Ok(TerminateOutcome::Diverged)
}

/// Blocks `tid` (spec.md §4.H, `block`). Rejecting `block(0)` is the
/// façade's job (spec.md §4.I); by the time this function runs, `tid`
/// has already been checked not to be 0.
pub fn block(tid: Tid) -> Result<(), SchedulerError> {
    let outcome = signal_gate::with_masked(|| unsafe {
        with_scheduler_mut(|sched| block_locked(sched, tid)).and_then(|inner| inner)
    });
    match outcome {
        Err(sys_err) => crate::error::report_system_error(sys_err),
        Ok(inner) => inner,
    }
}

fn block_locked(sched: &mut Scheduler, tid: Tid) -> Result<(), SchedulerError> {
    let record = sched
        .table
        .get_mut(tid)
        .ok_or(SchedulerError::UnknownTid(tid))?;

    if record.user_blocked() {
        // Already blocked: no-op.
        return Ok(());
    }
    record.set_user_blocked(true);

    match record.run_state() {
        RunState::Ready => {
            record.set_run_state(RunState::Blocked);
            sched.ready_queue.remove(tid);
            debug!("uthreads: blocked ready tid={}", tid);
            Ok(())
        }
        RunState::Blocked => {
            // Already blocked via sleep; the flag alone is enough. The
            // wake-up path will honour it.
            Ok(())
        }
        RunState::Running => {
            debug_assert_eq!(tid, sched.current_tid);
            record.set_run_state(RunState::Blocked);
            if sched.ready_queue.is_empty() {
                // Restore: nothing else can run, so this block cannot
                // be honoured.
                sched
                    .table
                    .get_mut(tid)
                    .unwrap()
                    .set_run_state(RunState::Running);
                sched.table.get_mut(tid).unwrap().set_user_blocked(false);
                warn!("uthreads: refusing to block tid={}, no runnable successor", tid);
                return Err(SchedulerError::NoRunnableSuccessor);
            }
            debug!("uthreads: blocked running tid={}, switching", tid);
            do_context_switch(sched);
            Ok(())
        }
    }
}

/// Resumes `tid` (spec.md §4.H, `resume`). A no-op if `tid` is not
/// currently `Blocked`.
pub fn resume(tid: Tid) -> Result<(), SchedulerError> {
    let outcome = signal_gate::with_masked(|| unsafe {
        with_scheduler_mut(|sched| resume_locked(sched, tid)).and_then(|inner| inner)
    });
    match outcome {
        Err(sys_err) => crate::error::report_system_error(sys_err),
        Ok(inner) => inner,
    }
}

fn resume_locked(sched: &mut Scheduler, tid: Tid) -> Result<(), SchedulerError> {
    let record = sched
        .table
        .get_mut(tid)
        .ok_or(SchedulerError::UnknownTid(tid))?;

    if record.run_state() != RunState::Blocked {
        warn!("uthreads: resume(tid={}) is a no-op, thread is not blocked", tid);
        return Ok(());
    }

    if sched.sleep_table.contains(tid) {
        // Still sleeping: clear the flag but leave it Blocked. The
        // wake-up path releases it when its wake time arrives.
        record.set_user_blocked(false);
        debug!("uthreads: resumed (still sleeping) tid={}", tid);
        return Ok(());
    }

    record.set_user_blocked(false);
    record.set_run_state(RunState::Ready);
    sched.ready_queue.push_back(tid);
    debug!("uthreads: resumed tid={}", tid);
    Ok(())
}

/// Puts the current thread to sleep for `num_quantums` quantum starts
/// (spec.md §4.H, `sleep`). Rejecting calls from tid 0 is the façade's
/// job.
pub fn sleep(num_quantums: i32) -> Result<(), SchedulerError> {
    if num_quantums <= 0 {
        return Err(SchedulerError::InvalidSleepDuration);
    }
    let outcome = signal_gate::with_masked(|| unsafe {
        with_scheduler_mut(|sched| sleep_locked(sched, num_quantums as u64)).and_then(|inner| inner)
    });
    match outcome {
        Err(sys_err) => crate::error::report_system_error(sys_err),
        Ok(inner) => inner,
    }
}

fn sleep_locked(sched: &mut Scheduler, num_quantums: u64) -> Result<(), SchedulerError> {
    let tid = sched.current_tid;

    if sched.ready_queue.is_empty() {
        return Err(SchedulerError::NoRunnableSuccessor);
    }

    sched
        .table
        .get_mut(tid)
        .expect("current thread must exist")
        .set_run_state(RunState::Blocked);
    sched.sleep_table.insert(tid, sched.total_quantums + num_quantums);
    debug!(
        "uthreads: tid={} sleeping until total_quantums>={}",
        tid,
        sched.total_quantums + num_quantums
    );
    do_context_switch(sched);
    Ok(())
}

/// Returns the tid of the currently executing thread.
pub fn get_tid() -> Result<Tid, SchedulerError> {
    let outcome =
        signal_gate::with_masked(|| unsafe { with_scheduler_mut(|sched| sched.current_tid) });
    match outcome {
        Err(sys_err) => crate::error::report_system_error(sys_err),
        Ok(inner) => inner,
    }
}

/// Returns the total number of quantum starts since `init`.
pub fn get_total_quantums() -> Result<u64, SchedulerError> {
    let outcome =
        signal_gate::with_masked(|| unsafe { with_scheduler_mut(|sched| sched.total_quantums) });
    match outcome {
        Err(sys_err) => crate::error::report_system_error(sys_err),
        Ok(inner) => inner,
    }
}

/// Returns the number of quantums `tid` has been scheduled for, or
/// `None` if `tid` does not name a live thread.
pub fn get_quantums(tid: Tid) -> Result<Option<u64>, SchedulerError> {
    let outcome = signal_gate::with_masked(|| unsafe {
        with_scheduler_mut(|sched| sched.table.get(tid).map(|t| t.quantum_count()))
    });
    match outcome {
        Err(sys_err) => crate::error::report_system_error(sys_err),
        Ok(inner) => inner,
    }
}

/// Returns `true` if `tid` currently exists (used by the façade's
/// argument validation, spec.md §4.I).
pub fn thread_exists(tid: Tid) -> bool {
    signal_gate::with_masked(|| unsafe {
        with_scheduler_mut(|sched| sched.table.contains(tid))
    })
    .ok()
    .and_then(|inner| inner.ok())
    .unwrap_or(false)
}

/// A snapshot of scheduler activity counters.
pub fn stats() -> Result<Stats, SchedulerError> {
    let outcome = signal_gate::with_masked(|| unsafe { with_scheduler_mut(|sched| sched.stats) });
    match outcome {
        Err(sys_err) => crate::error::report_system_error(sys_err),
        Ok(inner) => inner,
    }
}

/// Iterates the sleep table and releases every thread whose wake time
/// has arrived, unless it is also user-blocked (spec.md §4.H,
/// `wakeSleepingThreads`).
///
/// Precondition: `SIGVTALRM` masked (always true here: only called from
/// the signal handler, which the kernel masks automatically).
fn wake_sleeping_threads(sched: &mut Scheduler) {
    let expired = sched.sleep_table.take_expired(sched.total_quantums);
    for tid in expired {
        let user_blocked = match sched.table.get(tid) {
            Some(record) => record.user_blocked(),
            None => continue,
        };
        if user_blocked {
            trace!("uthreads: tid={} wake suppressed (user-blocked)", tid);
            continue;
        }
        sched.table.get_mut(tid).unwrap().set_run_state(RunState::Ready);
        sched.ready_queue.push_back(tid);
        trace!("uthreads: tid={} woke from sleep", tid);
    }
}

/// The context-switch routine (spec.md §4.H, `doContextSwitch`).
///
/// Precondition: `SIGVTALRM` masked. This function's "just saved" path
/// unmasks and returns (or diverges into the next thread) before
/// returning to its caller in the conventional sense; its "resumed" path
/// is where callers of the *other* branch actually observe control
/// return, potentially much later and on a different logical thread's
/// view of the call stack (but the same OS stack memory, since this is
/// exactly the thread whose context is being restored).
fn do_context_switch(sched: &mut Scheduler) {
    let outgoing = sched.current_tid;

    // Step 1: a `Running` thread that is not about to be freed goes
    // back on the ready queue. Self-termination and self-blocking both
    // pre-empt this by setting the state to something other than
    // `Running` before calling us.
    if sched.table.get(outgoing).map(|t| t.run_state()) == Some(RunState::Running)
        && !sched.pending_deletion.contains(&outgoing)
    {
        sched
            .table
            .get_mut(outgoing)
            .unwrap()
            .set_run_state(RunState::Ready);
        sched.ready_queue.push_back(outgoing);
    }

    // Step 2: save the outgoing thread's context. This call returns
    // twice: once now (token == 0, "just saved"), and once more when
    // some later call restores this same context (token != 0,
    // "resumed").
    let token = unsafe {
        sched
            .table
            .get_mut(outgoing)
            .expect("outgoing thread must exist")
            .context_mut()
            .save()
    };

    if token != 0 {
        on_resumed(sched);
        return;
    }

    on_just_saved(sched, outgoing);
}

/// The "resumed" path of [`do_context_switch`]. Runs on whichever
/// thread's context was just restored — not necessarily `outgoing` from
/// the call above, since this runs however much later another thread's
/// `restore` brings us back here.
fn on_resumed(sched: &mut Scheduler) {
    if sched.should_exit && sched.current_tid == 0 {
        perform_exit_ceremony(sched);
    }

    if !sched.pending_deletion.is_empty() {
        let pending = std::mem::take(&mut sched.pending_deletion);
        for tid in pending {
            trace!("uthreads: freeing self-terminated tid={}", tid);
            sched.table.remove(tid);
        }
    }

    die_on_system_error(signal_gate::unblock_timer());
}

/// The "just saved" path of [`do_context_switch`]: pick the next thread
/// to run (or fall back to re-running `outgoing`) and switch to it.
fn on_just_saved(sched: &mut Scheduler, outgoing: Tid) {
    match sched.ready_queue.pop_front() {
        None => {
            if !sched.pending_deletion.is_empty() {
                // The thread that just asked to switch away is dying
                // and nothing else is runnable: there is no thread left
                // to hand control to.
                perform_exit_ceremony(sched);
            }

            // Degenerate case: the only runnable thread is the one that
            // just (de)scheduled itself. Re-run it for a fresh quantum
            // rather than switching anywhere.
            sched.current_tid = outgoing;
            sched
                .table
                .get_mut(outgoing)
                .unwrap()
                .set_run_state(RunState::Running);
            begin_quantum(sched, outgoing);
            die_on_system_error(timer::arm(sched.quantum_usecs));
            die_on_system_error(signal_gate::unblock_timer());
        }
        Some(next) => {
            sched.current_tid = next;
            sched.table.get_mut(next).unwrap().set_run_state(RunState::Running);
            begin_quantum(sched, next);
            die_on_system_error(timer::arm(sched.quantum_usecs));
            die_on_system_error(signal_gate::unblock_timer());

            trace!("uthreads: switching {} -> {}", outgoing, next);
            unsafe {
                sched
                    .table
                    .get_mut(next)
                    .unwrap()
                    .context_mut()
                    .restore()
            }
        }
    }
}

fn begin_quantum(sched: &mut Scheduler, tid: Tid) {
    sched.total_quantums += 1;
    sched.table.get_mut(tid).unwrap().begin_quantum();
}

/// Frees all thread records, disarms the timer, flushes standard
/// output, and exits the process with code 0 (spec.md §6, "Exit
/// ceremony"). Never returns.
fn perform_exit_ceremony(sched: &mut Scheduler) -> ! {
    debug!(
        "uthreads: exit ceremony, total_quantums={}",
        sched.total_quantums
    );
    let _ = timer::disarm();
    let _ = std::io::stdout().flush();
    // Dropping the table frees every thread's stack, including whichever
    // one is physically underfoot right now if this runs from the
    // degenerate self-termination path (spec.md §4.H). There is no
    // runnable thread left to switch to either way, so this is the last
    // thing that happens before the process itself exits.
    sched.table = ThreadTable::new(0);
    std::process::exit(0);
}

/// The `SIGVTALRM` handler (spec.md §4.G/§4.H). Runs with the signal
/// automatically masked by the kernel's delivery discipline. Must not
/// allocate: it calls directly into [`wake_sleeping_threads`] and
/// [`do_context_switch`] rather than through the logging-instrumented
/// public wrappers above.
extern "C" fn preemption_handler(_signo: i32) {
    unsafe {
        let slot = &mut *SCHEDULER.0.get();
        if let Some(sched) = slot {
            sched.stats.preemptions += 1;
            wake_sleeping_threads(sched);
            do_context_switch(sched);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Test-only helpers that reach past the public API to assert on
    //! internal invariants (spec.md §8's "testable properties").
    use super::*;

    pub fn with_scheduler_for_test<T>(f: impl FnOnce(&Scheduler) -> T) -> Option<T> {
        signal_gate::with_masked(|| unsafe {
            let slot = &*SCHEDULER.0.get();
            slot.as_ref().map(f)
        })
        .ok()
        .flatten()
    }

    pub fn ready_queue_len() -> Option<usize> {
        with_scheduler_for_test(|s| s.ready_queue.len())
    }

    pub fn sleep_table_len() -> Option<usize> {
        with_scheduler_for_test(|s| s.sleep_table.len())
    }

    pub fn reset_for_test() {
        let _ = timer::disarm();
        unsafe {
            *SCHEDULER.0.get() = None;
        }
    }
}
