// Copyright 2026 The uthreads Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Sleep and the user-block flag are independent: a thread that is asleep
//! and then blocked stays blocked past its wake time, and only becomes
//! runnable again once both `resume`d and its sleep has elapsed
//! (spec.md §8, scenario 3; §9 "sleep vs user-block orthogonality").

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

static A_PROGRESS: AtomicU32 = AtomicU32::new(0);
static B_ASLEEP: AtomicBool = AtomicBool::new(false);
static B_PROGRESS: AtomicU32 = AtomicU32::new(0);

extern "C" fn worker_a() {
    loop {
        A_PROGRESS.fetch_add(1, Ordering::Relaxed);
        std::hint::spin_loop();
    }
}

extern "C" fn worker_b() {
    B_ASLEEP.store(true, Ordering::Relaxed);
    uthreads::sleep(3);
    loop {
        B_PROGRESS.fetch_add(1, Ordering::Relaxed);
        std::hint::spin_loop();
    }
}

fn spin_until(deadline: Instant, mut done: impl FnMut() -> bool) -> bool {
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::hint::spin_loop();
    }
    false
}

/// Busy-waits for `duration` of wall-clock time, burning CPU the whole
/// while. Unlike `std::thread::sleep`, this keeps the one kernel thread
/// the scheduler multiplexes onto consuming CPU time, so `ITIMER_VIRTUAL`
/// keeps ticking and `SIGVTALRM` keeps firing across the window.
fn spin_for(duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

#[test]
fn block_during_sleep_suppresses_the_wake() {
    let _ = env_logger::try_init();
    assert_eq!(uthreads::init(2_000), 0);
    let a = uthreads::spawn(worker_a);
    let b = uthreads::spawn(worker_b);
    assert_eq!(a, 1);
    assert_eq!(b, 2);

    let got_to_sleep = spin_until(Instant::now() + Duration::from_millis(200), || {
        B_ASLEEP.load(Ordering::Relaxed)
    });
    assert!(got_to_sleep, "worker_b never reached its sleep call");

    assert_eq!(uthreads::block(b), 0);

    // Burn CPU (so virtual time, and therefore quantums, actually
    // advance) for well past three quantum starts' worth of time: the
    // wake-up path should see worker_b's wake time arrive but leave it
    // Blocked because `resume` has not cleared the user-block flag.
    let quantums_before = uthreads::get_total_quantums();
    spin_for(Duration::from_millis(30));
    let quantums_after = uthreads::get_total_quantums();
    assert!(
        quantums_after - quantums_before > 3,
        "virtual time never advanced past worker_b's wake point; \
         the assertion below would pass vacuously"
    );
    assert_eq!(
        B_PROGRESS.load(Ordering::Relaxed),
        0,
        "worker_b ran despite being blocked through its wake time"
    );

    assert_eq!(uthreads::resume(b), 0);
    let woke_up = spin_until(Instant::now() + Duration::from_millis(200), || {
        B_PROGRESS.load(Ordering::Relaxed) > 0
    });
    assert!(woke_up, "worker_b never resumed after being un-blocked");

    assert!(A_PROGRESS.load(Ordering::Relaxed) > 0, "worker_a never ran");
}
