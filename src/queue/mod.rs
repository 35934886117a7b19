use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Ingress,
    Endpoints,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Task {
    pub kind: TaskKind,
    pub key: String,
}

impl Task {
    pub fn ingress(key: impl Into<String>) -> Self {
        Task {
            kind: TaskKind::Ingress,
            key: key.into(),
        }
    }

    pub fn endpoints(key: impl Into<String>) -> Self {
        Task {
            kind: TaskKind::Endpoints,
            key: key.into(),
        }
    }
}

struct RetryState {
    attempts: u32,
    next_eligible: Instant,
}

struct Inner {
    pending: VecDeque<Task>,
    pending_set: HashSet<Task>,
    retrying: HashMap<Task, RetryState>,
    shutting_down: bool,
}

/// A deduplicating FIFO with per-item exponential-backoff retry (spec.md
/// §4.6). No direct teacher precedent: `frp-operator` delegates scheduling
/// to `kube::runtime::Controller`; this is built from scratch per spec.md §9
/// ("Queue identity by heterogeneous input" — the queue here accepts only
/// `Task`s, never raw objects).
pub struct TaskQueue {
    inner: Mutex<Inner>,
    ticker: Mutex<tokio::time::Interval>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        TaskQueue {
            inner: Mutex::new(Inner {
                pending: VecDeque::new(),
                pending_set: HashSet::new(),
                retrying: HashMap::new(),
                shutting_down: false,
            }),
            ticker: Mutex::new(ticker),
        }
    }

    /// Enqueues a task. If a task with the same `(kind, key)` is already
    /// pending, this is a no-op (spec.md §4.6 coalescing).
    pub async fn enqueue(&self, task: Task) {
        let mut inner = self.inner.lock().await;
        if inner.pending_set.contains(&task) {
            return;
        }
        inner.retrying.remove(&task);
        inner.pending_set.insert(task.clone());
        inner.pending.push_back(task);
    }

    /// Schedules `task` to be re-drawn after an increasing delay, retaining
    /// the failure count (spec.md §4.6 `Requeue`).
    pub async fn requeue(&self, task: Task) {
        let mut inner = self.inner.lock().await;
        let attempts = inner.retrying.get(&task).map_or(1, |r| r.attempts + 1);
        let delay = backoff_delay(attempts);
        inner.retrying.insert(
            task.clone(),
            RetryState {
                attempts,
                next_eligible: Instant::now() + delay,
            },
        );
        if !inner.pending_set.contains(&task) {
            inner.pending_set.insert(task.clone());
            inner.pending.push_back(task);
        }
    }

    /// Closes the draw side; the worker should finish its current task and
    /// exit (spec.md §4.6 `Shutdown`).
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.shutting_down = true;
    }

    /// Draws the next eligible task, at most once per tick (1 second). The
    /// ticker is held on `self` and persists across calls: a freshly
    /// constructed `tokio::time::Interval` fires its first tick immediately,
    /// so a per-call ticker would give every draw an immediate tick and
    /// defeat the pacing spec.md §4.6 asks for ("one per tick").
    /// Retrying tasks may overtake or be overtaken by later enqueues —
    /// correctness rests on `sync` being idempotent, not on strict FIFO
    /// (spec.md §4.6 Ordering).
    pub async fn next(&self) -> Option<Task> {
        loop {
            self.ticker.lock().await.tick().await;
            let mut inner = self.inner.lock().await;
            let now = Instant::now();
            let idx = inner.pending.iter().position(|t| {
                inner
                    .retrying
                    .get(t)
                    .map_or(true, |r| now >= r.next_eligible)
            });
            if let Some(idx) = idx {
                let task = inner.pending.remove(idx).expect("index just found");
                inner.pending_set.remove(&task);
                inner.retrying.remove(&task);
                return Some(task);
            }
            if inner.shutting_down && inner.pending.is_empty() {
                return None;
            }
        }
    }

    #[cfg(test)]
    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    #[cfg(test)]
    pub async fn attempts(&self, task: &Task) -> Option<u32> {
        self.inner.lock().await.retrying.get(task).map(|r| r.attempts)
    }
}

fn backoff_delay(attempts: u32) -> Duration {
    let capped = attempts.min(6);
    Duration::from_secs(1u64 << capped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_enqueues_coalesce() {
        let queue = TaskQueue::new();
        for _ in 0..5 {
            queue.enqueue(Task::ingress("default/web")).await;
        }
        assert_eq!(queue.pending_len().await, 1);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_coalesce() {
        let queue = TaskQueue::new();
        queue.enqueue(Task::ingress("default/web")).await;
        queue.enqueue(Task::ingress("default/api")).await;
        assert_eq!(queue.pending_len().await, 2);
    }

    #[tokio::test]
    async fn same_key_different_kind_does_not_coalesce() {
        let queue = TaskQueue::new();
        queue.enqueue(Task::ingress("default/web")).await;
        queue.enqueue(Task::endpoints("default/web")).await;
        assert_eq!(queue.pending_len().await, 2);
    }

    #[tokio::test]
    async fn requeue_tracks_increasing_attempt_count() {
        let queue = TaskQueue::new();
        let task = Task::ingress("default/web");
        queue.requeue(task.clone()).await;
        queue.requeue(task.clone()).await;
        assert_eq!(queue.attempts(&task).await, Some(2));
    }

    #[tokio::test]
    async fn fresh_enqueue_after_failure_clears_retry_state() {
        let queue = TaskQueue::new();
        let task = Task::ingress("default/web");
        queue.requeue(task.clone()).await;
        queue.enqueue(task.clone()).await;
        assert_eq!(queue.attempts(&task).await, None);
    }
}
