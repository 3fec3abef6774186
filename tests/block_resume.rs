// Copyright 2026 The uthreads Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Blocking a thread that has never run yet (still `Ready`) must keep it
//! off the CPU entirely until `resume`, with no context switch involved
//! in either direction (spec.md §4.H: blocking a non-running thread is
//! just a ready-queue removal).

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

static PROGRESS: AtomicU32 = AtomicU32::new(0);

extern "C" fn worker() {
    loop {
        PROGRESS.fetch_add(1, Ordering::Relaxed);
        std::hint::spin_loop();
    }
}

fn spin_for(duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

#[test]
fn blocking_a_ready_thread_prevents_it_running_until_resumed() {
    let _ = env_logger::try_init();
    assert_eq!(uthreads::init(2_000), 0);
    let tid = uthreads::spawn(worker);
    assert_eq!(tid, 1);

    assert_eq!(uthreads::block(tid), 0);
    spin_for(Duration::from_millis(50));
    assert_eq!(
        PROGRESS.load(Ordering::Relaxed),
        0,
        "blocked thread ran before being resumed"
    );

    assert_eq!(uthreads::resume(tid), 0);
    spin_for(Duration::from_millis(100));
    assert!(
        PROGRESS.load(Ordering::Relaxed) > 0,
        "resumed thread never got scheduled"
    );
}
