// Copyright 2026 The uthreads Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Compile-time tunables for the scheduler.
//!
//! These are constants, not a runtime configuration layer: `MAX_THREADS`
//! bounds the thread table's fixed-capacity storage and several invariants
//! are reasoned about assuming it does not change during a run. The one
//! runtime tunable the library takes, `quantum_usecs`, is passed directly to
//! [`crate::init`] rather than threaded through here.

/// A thread identifier, `[0, MAX_THREADS)`. Tid 0 is reserved for the
/// process's initial thread.
pub type Tid = i32;

/// Maximum number of live threads, including the initial thread.
///
/// Reference value: `MAX_THREAD_NUM` in original_source, referenced by
/// `scheduler.cpp`/`uthreads.cpp` but defined in a header the retrieved
/// pack does not include.
pub const MAX_THREADS: usize = 100;

/// Stack size, in bytes, allocated for every thread other than tid 0.
///
/// Reference value from original_source's `thread.h`.
pub const STACK_SIZE: usize = 4096;

#[cfg(test)]
pub(crate) mod test_overrides {
    //! A smaller thread table makes the "table full" boundary test
    //! (spec.md §8, "spawning when MAX_THREADS live threads exist")
    //! cheap to reach without spawning 100 real threads. `STACK_SIZE`
    //! is not overridden here: the jump buffer and signal handler need
    //! real guard room and shrinking it would make unrelated tests flaky.
    pub const SMALL_MAX_THREADS: usize = 4;
}
