//! Thread-safe receive queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// FIFO byte queue shared between one producer and one consumer.
///
/// The background reader appends every batch of newly arrived bytes;
/// the foreground poller atomically drains the whole queue. Those are
/// the only two operations, both under the same lock, so a drain
/// observes a consistent snapshot and no appended byte is ever lost or
/// returned twice.
///
/// An empty drain yields `None`: "nothing arrived yet" is absence, not
/// a zero-length response.
#[derive(Debug, Clone, Default)]
pub struct RxQueue {
    inner: Arc<Mutex<VecDeque<u8>>>,
}

impl RxQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<u8>> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Append newly arrived bytes to the end of the queue.
    pub fn push(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.lock().extend(bytes.iter().copied());
    }

    /// Atomically remove and return the entire current contents.
    pub fn drain(&self) -> Option<Vec<u8>> {
        let mut queue = self.lock();
        if queue.is_empty() {
            return None;
        }
        Some(queue.drain(..).collect())
    }

    /// Number of queued bytes.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_drain_empty_is_none() {
        let queue = RxQueue::new();
        assert!(queue.drain().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_then_drain_returns_all() {
        let queue = RxQueue::new();
        queue.push(b"cmd");
        queue.push(b"r");
        assert_eq!(queue.len(), 4);

        assert_eq!(queue.drain().unwrap(), b"cmdr");
        // Drained to empty
        assert!(queue.drain().is_none());
    }

    #[test]
    fn test_push_empty_batch_is_noop() {
        let queue = RxQueue::new();
        queue.push(&[]);
        assert!(queue.drain().is_none());
    }

    #[test]
    fn test_drain_preserves_append_order() {
        let queue = RxQueue::new();
        queue.push(&[1, 2]);
        queue.push(&[3]);
        queue.push(&[4, 5, 6]);
        assert_eq!(queue.drain().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        let queue = RxQueue::new();
        let batches = 8;
        let batch_len = 1000usize;

        let handles: Vec<_> = (0..batches)
            .map(|i| {
                let q = queue.clone();
                thread::spawn(move || {
                    q.push(&vec![i as u8; batch_len]);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let drained = queue.drain().unwrap();
        assert_eq!(drained.len(), batches as usize * batch_len);

        // Each batch arrives contiguously (appends are atomic), so the
        // drained bytes are a permutation of whole batches.
        let mut counts = [0usize; 8];
        for b in &drained {
            counts[*b as usize] += 1;
        }
        assert!(counts.iter().all(|&c| c == batch_len));
        for window in drained.chunks_exact(batch_len) {
            assert!(window.iter().all(|&b| b == window[0]));
        }
    }
}
