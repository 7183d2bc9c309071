//! Grace-period bookkeeping.
//!
//! While active, every non-reclaim, non-test operation is rejected with
//! the remaining time; reclaim requests must match a lock persisted by a
//! previous server instance. The period ends when every expected client
//! has reclaimed or when the timer expires, whichever comes first.

use std::collections::HashSet;
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct GraceState {
    active: bool,
    expected: HashSet<String>,
    reclaimed: HashSet<String>,
    deadline: Option<Instant>,
}

impl GraceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&mut self, expected: HashSet<String>, duration: Duration) {
        self.active = true;
        self.expected = expected;
        self.reclaimed.clear();
        self.deadline = Some(Instant::now() + duration);
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Time left before the timer ends the period. Zero when inactive.
    pub fn remaining(&self) -> Duration {
        match self.deadline {
            Some(deadline) if self.active => deadline.saturating_duration_since(Instant::now()),
            _ => Duration::ZERO,
        }
    }

    /// Records a reclaim by `client_id`. Returns true when every expected
    /// client has now reclaimed, which permits an early exit.
    pub fn mark_reclaimed(&mut self, client_id: &str) -> bool {
        if !self.active {
            return false;
        }
        self.reclaimed.insert(client_id.to_owned());
        self.all_reclaimed()
    }

    pub fn all_reclaimed(&self) -> bool {
        self.active && self.expected.iter().all(|c| self.reclaimed.contains(c))
    }

    pub fn exit(&mut self) {
        self.active = false;
        self.expected.clear();
        self.reclaimed.clear();
        self.deadline = None;
    }
}
