// Copyright 2026 The uthreads Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Exercises a real preemptive context switch between two spawned
//! threads and the main thread, driven by the actual `SIGVTALRM` timer
//! rather than any test-only shortcut. Each `tests/*.rs` file is its own
//! process, which matters here: `uthreads::init` may only run once per
//! process, and this crate has no way to tear its global scheduler state
//! back down short of the process exiting.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

static COUNTER_A: AtomicU32 = AtomicU32::new(0);
static COUNTER_B: AtomicU32 = AtomicU32::new(0);

extern "C" fn worker_a() {
    loop {
        COUNTER_A.fetch_add(1, Ordering::Relaxed);
        std::hint::spin_loop();
    }
}

extern "C" fn worker_b() {
    loop {
        COUNTER_B.fetch_add(1, Ordering::Relaxed);
        std::hint::spin_loop();
    }
}

#[test]
fn both_threads_make_progress_under_preemption() {
    let _ = env_logger::try_init();
    assert_eq!(uthreads::init(2_000), 0);
    let a = uthreads::spawn(worker_a);
    let b = uthreads::spawn(worker_b);
    assert_eq!(a, 1);
    assert_eq!(b, 2);

    // Main never sleeps or blocks, so it stays eligible to run; it just
    // keeps getting preempted and re-enqueued alongside the two workers
    // for the whole window below. Bounded by wall-clock time rather than
    // by any scheduler event, so this returns even if preemption were
    // somehow never happening (the assertions below would just fail).
    let deadline = Instant::now() + Duration::from_millis(200);
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }

    assert!(COUNTER_A.load(Ordering::Relaxed) > 0, "worker_a never ran");
    assert!(COUNTER_B.load(Ordering::Relaxed) > 0, "worker_b never ran");
    assert!(uthreads::get_total_quantums() > 1);
    assert_eq!(uthreads::get_tid(), 0);
}
