// Copyright 2026 The uthreads Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Per-thread state (spec.md §4.B).

use crate::config::{Tid, STACK_SIZE};
use crate::context::Context;

/// The scheduling state of a thread (spec.md §3, `RunState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Ready,
    Running,
    Blocked,
}

/// A thread's stack. Tid 0 has none of its own — it runs on the
/// process's initial stack — so this is only ever allocated for tid > 0.
struct Stack {
    // Kept alive for exactly as long as the thread that owns it; freed
    // when the `ThreadRecord` is dropped (spec.md §4.B, "destructor frees
    // the stack iff tid > 0").
    bytes: Box<[u8]>,
}

impl Stack {
    fn new() -> Stack {
        Stack {
            bytes: vec![0u8; STACK_SIZE].into_boxed_slice(),
        }
    }

    /// The highest address of the stack, from which it grows down.
    fn top(&mut self) -> *mut u8 {
        unsafe { self.bytes.as_mut_ptr().add(self.bytes.len()) }
    }
}

/// Per-thread state: identity, scheduling state, the sticky user-block
/// flag, the quantum counter, its saved machine context, and (for tid > 0)
/// its owned stack.
pub struct ThreadRecord {
    tid: Tid,
    run_state: RunState,
    user_blocked: bool,
    quantum_count: u64,
    context: Context,
    stack: Option<Stack>,
    name: Option<String>,
}

impl ThreadRecord {
    /// Builds the record for tid 0. It owns no stack and has no initial
    /// context of its own: it is already running on the process's
    /// initial stack, executing `main`, by the time this is called.
    pub fn new_main_thread() -> ThreadRecord {
        ThreadRecord {
            tid: 0,
            run_state: RunState::Running,
            user_blocked: false,
            quantum_count: 0,
            context: Context::current_thread_placeholder(),
            stack: None,
            name: Some("main".to_string()),
        }
    }

    /// Builds a record for a newly spawned thread: allocates a stack of
    /// [`STACK_SIZE`] bytes and a context that, when first resumed, will
    /// start executing `entry_fn` on top of that stack.
    pub fn new_spawned(tid: Tid, entry_fn: extern "C" fn(), name: Option<String>) -> ThreadRecord {
        let mut stack = Stack::new();
        let stack_top = stack.top();
        let context = Context::make(entry_fn, stack_top);
        ThreadRecord {
            tid,
            run_state: RunState::Ready,
            user_blocked: false,
            quantum_count: 0,
            context,
            stack: Some(stack),
            name,
        }
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn set_run_state(&mut self, state: RunState) {
        self.run_state = state;
    }

    pub fn user_blocked(&self) -> bool {
        self.user_blocked
    }

    pub fn set_user_blocked(&mut self, blocked: bool) {
        self.user_blocked = blocked;
    }

    pub fn quantum_count(&self) -> u64 {
        self.quantum_count
    }

    /// Increments the quantum counter: called by the scheduler each time
    /// this thread begins executing a quantum, including its first.
    pub fn begin_quantum(&mut self) {
        self.quantum_count += 1;
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }
}

impl std::fmt::Debug for ThreadRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRecord")
            .field("tid", &self.tid)
            .field("run_state", &self.run_state)
            .field("user_blocked", &self.user_blocked)
            .field("quantum_count", &self.quantum_count)
            .field("name", &self.name)
            .finish()
    }
}
