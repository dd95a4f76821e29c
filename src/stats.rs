//! Process-wide session counters.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy)]
pub enum Transition {
    Running,
    Done,
    Failed,
}

/// Concurrent counters over the session states RUN, DONE and FAIL.
///
/// Workers record transitions as sessions start and finish; the ticker task
/// reads the counters without further synchronization.
#[derive(Debug, Default)]
pub struct Stats {
    run: AtomicUsize,
    done: AtomicUsize,
    fail: AtomicUsize,
}

impl Stats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transition(&self, transition: Transition) {
        match transition {
            Transition::Running => {
                self.run.fetch_add(1, Ordering::Relaxed);
            }
            Transition::Done => {
                decrement(&self.run);
                self.done.fetch_add(1, Ordering::Relaxed);
            }
            Transition::Failed => {
                decrement(&self.run);
                self.fail.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[must_use]
    pub fn running(&self) -> usize {
        self.run.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.fail.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn progress_line(&self) -> String {
        format!(
            "Running: {}, Failed: {}, Done: {}",
            self.running(),
            self.failed(),
            self.done()
        )
    }
}

fn decrement(counter: &AtomicUsize) {
    drop(counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |value| {
        Some(value.saturating_sub(1))
    }));
}
