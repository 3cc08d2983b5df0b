use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::models::PortRange;

/// Ordered backlog of ports awaiting a probe.
///
/// Each enqueued port is returned by `pop` exactly once. A port counts as
/// outstanding from construction until a worker calls `mark_processed` for
/// it, so `wait_drained` only resolves once every port has been both
/// dequeued and fully probed; a worker may still be mid-probe after the
/// backlog itself is empty.
pub struct TaskQueue {
    pending: Mutex<VecDeque<u16>>,
    outstanding: AtomicUsize,
    drained: Notify,
}

impl TaskQueue {
    /// Fill the queue with every port of the range, ascending, exactly once.
    pub fn from_range(range: PortRange) -> Self {
        let pending: VecDeque<u16> = range.iter().collect();
        let outstanding = pending.len();
        Self {
            pending: Mutex::new(pending),
            outstanding: AtomicUsize::new(outstanding),
            drained: Notify::new(),
        }
    }

    /// Remove and return one port, or `None` once the backlog is exhausted.
    ///
    /// The lock is held only for the pop itself; no two callers can ever
    /// receive the same port.
    pub fn pop(&self) -> Option<u16> {
        self.pending
            .lock()
            .expect("task queue lock poisoned")
            .pop_front()
    }

    /// Record that a previously popped port has been probed and its outcome
    /// stored. Fires the drain signal when it was the last one.
    pub fn mark_processed(&self) {
        let prev = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "mark_processed called more times than pop");
        if prev == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Resolves once every enqueued port has been dequeued and marked
    /// processed.
    pub async fn wait_drained(&self) {
        loop {
            if self.outstanding.load(Ordering::Acquire) == 0 {
                return;
            }
            let notified = self.drained.notified();
            // Re-check after registering, otherwise a notify_waiters fired
            // between the first check and the registration would be lost.
            if self.outstanding.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Ports not yet marked processed.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    fn range(start: u16, end: u16) -> PortRange {
        PortRange::new(start, end).unwrap()
    }

    #[test]
    fn pops_every_port_once_in_order() {
        let q = TaskQueue::from_range(range(10, 14));
        let mut seen = Vec::new();
        while let Some(p) = q.pop() {
            seen.push(p);
        }
        assert_eq!(seen, vec![10, 11, 12, 13, 14]);
        assert!(q.pop().is_none());
    }

    #[tokio::test]
    async fn concurrent_pops_never_duplicate_or_lose() {
        let q = Arc::new(TaskQueue::from_range(range(1, 500)));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let q = q.clone();
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(p) = q.pop() {
                    got.push(p);
                    q.mark_processed();
                }
                got
            }));
        }
        let mut all: Vec<u16> = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        assert_eq!(all.len(), 500);
        let unique: HashSet<u16> = all.iter().copied().collect();
        assert_eq!(unique.len(), 500);
        assert_eq!(q.outstanding(), 0);
    }

    #[tokio::test]
    async fn drain_signal_waits_for_mark_processed() {
        let q = Arc::new(TaskQueue::from_range(range(1, 1)));
        let port = q.pop().unwrap();
        assert_eq!(port, 1);

        // Backlog is empty but the port has not been marked processed yet,
        // so the drain wait must still be pending.
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.wait_drained().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        q.mark_processed();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("drain signal never fired")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_drained_returns_immediately_when_already_drained() {
        let q = TaskQueue::from_range(range(5, 5));
        q.pop().unwrap();
        q.mark_processed();
        tokio::time::timeout(std::time::Duration::from_millis(100), q.wait_drained())
            .await
            .expect("wait_drained should resolve at once");
    }
}
