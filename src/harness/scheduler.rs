//! Cooperative single-threaded scheduler.
//!
//! Two lanes:
//! 1. Ready lane - tasks deferred to the next tick, FIFO
//! 2. Timed lane - delayed tasks ordered by due time (stable for equal times)
//!
//! Tasks only run from inside a drive loop (`tick`, `run_until_idle`,
//! `run_until`), never from the call that scheduled them.

use log::trace;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Task = Box<dyn FnOnce() + Send>;

struct TimedEntry {
    due: Instant,
    task: Task,
}

#[derive(Default)]
struct Lanes {
    ready: VecDeque<Task>,
    timed: VecDeque<TimedEntry>,
}

fn insert_by_due(lane: &mut VecDeque<TimedEntry>, entry: TimedEntry) {
    let pos = lane.iter().position(|e| entry.due < e.due).unwrap_or(lane.len());
    lane.insert(pos, entry);
}

/// Shared handle to a task queue; clones schedule onto the same queue
#[derive(Clone, Default)]
pub struct Scheduler {
    lanes: Arc<Mutex<Lanes>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` on the next tick
    pub fn defer<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Ok(mut lanes) = self.lanes.lock() {
            lanes.ready.push_back(Box::new(task));
        }
    }

    /// Run `task` once `delay` has elapsed
    pub fn defer_for<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Ok(mut lanes) = self.lanes.lock() {
            insert_by_due(
                &mut lanes.timed,
                TimedEntry {
                    due: Instant::now() + delay,
                    task: Box::new(task),
                },
            );
        }
    }

    /// Number of tasks not yet run
    pub fn pending(&self) -> usize {
        self.lanes.lock().map(|l| l.ready.len() + l.timed.len()).unwrap_or(0)
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    fn next_due(&self) -> Option<Instant> {
        self.lanes.lock().ok().and_then(|l| l.timed.front().map(|e| e.due))
    }

    /// Pop the next runnable task, promoting due timers first
    fn pop(&self, now: Instant) -> Option<Task> {
        let mut lanes = self.lanes.lock().ok()?;
        while lanes.timed.front().map(|e| e.due <= now).unwrap_or(false) {
            if let Some(entry) = lanes.timed.pop_front() {
                lanes.ready.push_back(entry.task);
            }
        }
        lanes.ready.pop_front()
    }

    /// Run a single task if one is runnable now. The lock is released before
    /// the task runs.
    pub fn tick(&self) -> bool {
        match self.pop(Instant::now()) {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Drive until both lanes are empty, sleeping through timer gaps.
    /// Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            if self.tick() {
                ran += 1;
                continue;
            }
            match self.next_due() {
                Some(due) => sleep_until(due),
                None => break,
            }
        }
        trace!("Scheduler idle after {} tasks", ran);
        ran
    }

    /// Drive until `done` holds, the queue is idle, or `deadline` passes.
    /// Returns the final value of `done`.
    pub fn run_until<F>(&self, deadline: Instant, done: F) -> bool
    where
        F: Fn() -> bool,
    {
        loop {
            if done() {
                return true;
            }
            if Instant::now() >= deadline {
                return done();
            }
            if self.tick() {
                continue;
            }
            match self.next_due() {
                Some(due) => sleep_until(due.min(deadline)),
                None => return done(),
            }
        }
    }
}

fn sleep_until(due: Instant) {
    let now = Instant::now();
    if due > now {
        std::thread::sleep(due - now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_defer_runs_on_tick_not_inline() {
        let scheduler = Scheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        scheduler.defer(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(scheduler.tick());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!scheduler.tick());
    }

    #[test]
    fn test_fifo_and_nested_defer() {
        let scheduler = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let (o, s) = (order.clone(), scheduler.clone());
            scheduler.defer(move || {
                o.lock().unwrap().push(i);
                let o = o.clone();
                s.defer(move || o.lock().unwrap().push(10 + i));
            });
        }
        assert_eq!(scheduler.run_until_idle(), 6);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 10, 11, 12]);
    }

    #[test]
    fn test_timers_fire_in_due_order() {
        let scheduler = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (delay, tag) in [(20, "late"), (5, "early"), (0, "now")] {
            let o = order.clone();
            scheduler.defer_for(Duration::from_millis(delay), move || o.lock().unwrap().push(tag));
        }
        scheduler.run_until_idle();
        assert_eq!(*order.lock().unwrap(), vec!["now", "early", "late"]);
    }

    #[test]
    fn test_run_until_respects_deadline() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        scheduler.defer_for(Duration::from_secs(30), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        let deadline = Instant::now() + Duration::from_millis(10);
        let f = fired.clone();
        assert!(!scheduler.run_until(deadline, move || f.load(Ordering::SeqCst) > 0));
        assert_eq!(scheduler.pending(), 1);
    }
}
