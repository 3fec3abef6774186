// Copyright 2026 The uthreads Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The sleep table: a partial map from tid to the total-quantum value at
//! which it should wake (spec.md §4.E).

use crate::config::Tid;
use std::collections::HashMap;

#[derive(Default)]
pub struct SleepTable {
    wake_at: HashMap<Tid, u64>,
}

impl SleepTable {
    pub fn new() -> SleepTable {
        SleepTable {
            wake_at: HashMap::new(),
        }
    }

    pub fn insert(&mut self, tid: Tid, wake_at: u64) {
        self.wake_at.insert(tid, wake_at);
    }

    pub fn remove(&mut self, tid: Tid) {
        self.wake_at.remove(&tid);
    }

    pub fn contains(&self, tid: Tid) -> bool {
        self.wake_at.contains_key(&tid)
    }

    pub fn len(&self) -> usize {
        self.wake_at.len()
    }

    /// Removes and returns every tid whose wake time has arrived
    /// (`wake_at <= total_quantums`), per invariant 3.
    pub fn take_expired(&mut self, total_quantums: u64) -> Vec<Tid> {
        let expired: Vec<Tid> = self
            .wake_at
            .iter()
            .filter(|&(_, &at)| at <= total_quantums)
            .map(|(&tid, _)| tid)
            .collect();
        for tid in &expired {
            self.wake_at.remove(tid);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_expired_entries_are_taken() {
        let mut table = SleepTable::new();
        table.insert(1, 15);
        table.insert(2, 10);
        table.insert(3, 10);

        let expired = table.take_expired(9);
        assert!(expired.is_empty());
        assert!(table.contains(1));

        let mut expired = table.take_expired(10);
        expired.sort();
        assert_eq!(expired, vec![2, 3]);
        assert!(!table.contains(2));
        assert!(!table.contains(3));
        assert!(table.contains(1));
    }
}
