//! Fixed-capacity FIFO buffer with blocking producers and consumers.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::BufferError;

/// A synchronized queue that blocks `put` while full and `take` while empty.
pub struct BoundedBuffer<T> {
    inner: Mutex<BufferState<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

struct BufferState<T> {
    items: VecDeque<T>,
    closed: bool,
    high_water: usize,
}

impl<T> BoundedBuffer<T> {
    /// Create an empty buffer holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "buffer capacity must be > 0");
        Self {
            inner: Mutex::new(BufferState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                high_water: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    // The state is only mutated by complete push/drain steps, so a panic in
    // another holder cannot leave it half-updated.
    fn lock(&self) -> MutexGuard<'_, BufferState<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait on `signal`, honouring an optional deadline.
    fn wait<'a>(
        &self,
        signal: &Condvar,
        guard: MutexGuard<'a, BufferState<T>>,
        started: Instant,
        timeout: Option<Duration>,
    ) -> Result<MutexGuard<'a, BufferState<T>>, BufferError> {
        match timeout {
            None => Ok(signal.wait(guard).unwrap_or_else(PoisonError::into_inner)),
            Some(limit) => {
                let waited = started.elapsed();
                if waited >= limit {
                    return Err(BufferError::TimedOut { waited });
                }
                let (guard, _) = signal
                    .wait_timeout(guard, limit - waited)
                    .unwrap_or_else(PoisonError::into_inner);
                Ok(guard)
            }
        }
    }

    /// Block until a slot is free, then insert.
    pub fn put(&self, item: T) -> Result<(), BufferError> {
        self.put_within(item, None)
    }

    /// Like [`put`](Self::put) but gives up after `timeout`.
    pub fn put_within(&self, item: T, timeout: Option<Duration>) -> Result<(), BufferError> {
        let started = Instant::now();
        let mut guard = self.lock();
        loop {
            if guard.closed {
                return Err(BufferError::Closed);
            }
            if guard.items.len() < self.capacity {
                guard.items.push_back(item);
                let len = guard.items.len();
                debug_assert!(len <= self.capacity, "buffer overflow");
                guard.high_water = guard.high_water.max(len);
                // Batch takers wait for different counts; wake them all.
                self.not_empty.notify_all();
                return Ok(());
            }
            // Wait releases the lock and re-acquires it before returning.
            guard = self.wait(&self.not_full, guard, started, timeout)?;
        }
    }

    /// Block until an item is available, then remove it.
    pub fn take(&self) -> Result<T, BufferError> {
        let mut batch = self.take_batch_within(1, None)?;
        batch.pop().ok_or(BufferError::Closed)
    }

    /// Block until `count` items are available and remove them together.
    pub fn take_batch(&self, count: usize) -> Result<Vec<T>, BufferError> {
        self.take_batch_within(count, None)
    }

    /// Like [`take_batch`](Self::take_batch) but gives up after `timeout`.
    ///
    /// `count` must not exceed the capacity, or the call can never succeed.
    pub fn take_batch_within(
        &self,
        count: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<T>, BufferError> {
        debug_assert!(count <= self.capacity, "batch larger than capacity");
        let started = Instant::now();
        let mut guard = self.lock();
        loop {
            if guard.closed {
                return Err(BufferError::Closed);
            }
            if guard.items.len() >= count {
                let batch: Vec<T> = guard.items.drain(..count).collect();
                self.not_full.notify_all();
                return Ok(batch);
            }
            guard = self.wait(&self.not_empty, guard, started, timeout)?;
        }
    }

    /// Close the buffer and wake every blocked caller.
    pub fn close(&self) {
        let mut guard = self.lock();
        guard.closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Current number of buffered items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Highest occupancy observed since construction.
    pub fn high_water(&self) -> usize {
        self.lock().high_water
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn items_are_taken_once_under_contention() {
        let buffer = Arc::new(BoundedBuffer::new(4));
        let producers = 4;
        let per_producer = 50u64;
        let consumers = 2;
        let barrier = Arc::new(Barrier::new(producers + consumers));

        let mut producer_handles = Vec::new();
        for p in 0..producers as u64 {
            let buffer = Arc::clone(&buffer);
            let barrier = Arc::clone(&barrier);
            producer_handles.push(thread::spawn(move || {
                barrier.wait();
                for i in 0..per_producer {
                    buffer.put(p * 1000 + i).expect("buffer closed");
                }
            }));
        }

        let total = producers * per_producer as usize;
        let mut consumer_handles = Vec::new();
        for _ in 0..consumers {
            let buffer = Arc::clone(&buffer);
            let barrier = Arc::clone(&barrier);
            consumer_handles.push(thread::spawn(move || {
                barrier.wait();
                let mut seen = Vec::new();
                for _ in 0..total / consumers {
                    seen.push(buffer.take().expect("buffer closed"));
                }
                seen
            }));
        }

        for handle in producer_handles {
            handle.join().expect("producer thread panicked");
        }
        let mut seen = HashSet::new();
        for handle in consumer_handles {
            for item in handle.join().expect("consumer thread panicked") {
                // Each item should be observed at most once.
                assert!(seen.insert(item));
            }
        }
        assert_eq!(seen.len(), total);
        assert!(buffer.is_empty());
        assert!(buffer.high_water() <= buffer.capacity());
    }

    #[test]
    fn put_blocks_while_full_until_take() {
        let buffer = Arc::new(BoundedBuffer::new(1));
        buffer.put(1).expect("buffer closed");

        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let buffer_clone = Arc::clone(&buffer);
        let handle = thread::spawn(move || {
            ready_tx.send(()).expect("ready");
            buffer_clone.put(2).expect("buffer closed");
            done_tx.send(()).expect("done");
        });

        ready_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("ready");
        // The producer must still be parked on the full buffer.
        assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(buffer.take().expect("take"), 1);
        done_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("put should complete after take");
        handle.join().expect("producer thread panicked");
        assert_eq!(buffer.take().expect("take"), 2);
        assert_eq!(buffer.high_water(), 1);
    }

    #[test]
    fn take_batch_waits_for_full_batch() {
        let buffer = Arc::new(BoundedBuffer::new(9));
        let (tx, rx) = mpsc::channel();

        let buffer_clone = Arc::clone(&buffer);
        let handle = thread::spawn(move || {
            let batch = buffer_clone.take_batch(3).expect("buffer closed");
            tx.send(batch).expect("send batch");
        });

        buffer.put(10).expect("put");
        buffer.put(11).expect("put");
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        buffer.put(12).expect("put");

        let batch = rx.recv_timeout(Duration::from_secs(1)).expect("batch");
        assert_eq!(batch, vec![10, 11, 12]);
        handle.join().expect("batch thread panicked");
    }

    #[test]
    fn remaining_batches_reach_every_waiting_taker() {
        let buffer = Arc::new(BoundedBuffer::new(9));
        let takers = 2;
        let barrier = Arc::new(Barrier::new(takers + 1));
        let (done_tx, done_rx) = mpsc::channel();

        let mut handles = Vec::new();
        for _ in 0..takers {
            let buffer = Arc::clone(&buffer);
            let barrier = Arc::clone(&barrier);
            let done_tx = done_tx.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                let batch = buffer.take_batch(3).expect("buffer closed");
                done_tx.send(batch.len()).expect("done");
            }));
        }
        barrier.wait();
        for item in 0..6 {
            buffer.put(item).expect("put");
        }

        for _ in 0..takers {
            let len = done_rx
                .recv_timeout(Duration::from_secs(1))
                .expect("both takers should be served");
            assert_eq!(len, 3);
        }
        for handle in handles {
            handle.join().expect("taker thread panicked");
        }
    }

    #[test]
    fn take_times_out_when_starved() {
        let buffer: BoundedBuffer<u64> = BoundedBuffer::new(2);
        buffer.put(1).expect("put");
        let result = buffer.take_batch_within(2, Some(Duration::from_millis(20)));
        assert!(matches!(result, Err(BufferError::TimedOut { .. })));
        // A timed out batch leaves the buffer untouched.
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn put_times_out_when_full() {
        let buffer = BoundedBuffer::new(1);
        buffer.put(1).expect("put");
        let result = buffer.put_within(2, Some(Duration::from_millis(20)));
        assert!(matches!(result, Err(BufferError::TimedOut { .. })));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn close_unblocks_waiting_takers() {
        let buffer: Arc<BoundedBuffer<u64>> = Arc::new(BoundedBuffer::new(2));
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let buffer_clone = Arc::clone(&buffer);
        let handle = thread::spawn(move || {
            ready_tx.send(()).expect("ready");
            let result = buffer_clone.take();
            done_tx.send(result).expect("done");
        });

        ready_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("ready");
        buffer.close();

        let result = done_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("done recv");
        assert_eq!(result, Err(BufferError::Closed));
        handle.join().expect("taker thread panicked");
    }

    #[test]
    fn put_fails_after_close() {
        let buffer = BoundedBuffer::new(2);
        buffer.close();
        assert!(buffer.is_closed());
        assert_eq!(buffer.put(1), Err(BufferError::Closed));
    }

    #[test]
    fn occupancy_never_exceeds_capacity() {
        let buffer = Arc::new(BoundedBuffer::new(3));
        let stop = Arc::new(AtomicBool::new(false));

        let sampler = {
            let buffer = Arc::clone(&buffer);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut max_seen = 0;
                while !stop.load(Ordering::SeqCst) {
                    max_seen = max_seen.max(buffer.len());
                    thread::yield_now();
                }
                max_seen
            })
        };

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..200 {
                    buffer.put(i).expect("put");
                }
            })
        };
        for _ in 0..200 {
            buffer.take().expect("take");
        }
        producer.join().expect("producer thread panicked");
        stop.store(true, Ordering::SeqCst);
        let max_seen = sampler.join().expect("sampler thread panicked");

        assert!(max_seen <= 3);
        assert!(buffer.high_water() <= 3);
    }
}
