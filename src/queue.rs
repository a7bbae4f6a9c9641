//! Bounded write queue: a cyclic buffer of owned, already-encoded frames.
//!
//! The queue is a plain FIFO with one twist: pushing into a full queue
//! evicts the oldest entry instead of failing. The channel carries
//! telemetry and RPC traffic, where the most recent frames are worth more
//! than stale ones, and delivery is not guaranteed anyway.
//!
//! Peeking the head of a drop-oldest queue is racy by nature: a push
//! arriving while a send is in flight can evict exactly the entry being
//! sent. The queue therefore hands the head out through [`Reservation`],
//! whose `&mut` borrow statically prevents any push (and hence any
//! eviction) for as long as the send is in progress. Callers that only
//! need a look use [`WriteQueue::peek_oldest`], which carries no such
//! protection.

use bytes::Bytes;

/// Queue capacity used when the embedder does not pick one.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Fixed-capacity FIFO of encoded frames with drop-oldest overflow.
#[derive(Debug)]
pub struct WriteQueue {
    slots: Box<[Option<Bytes>]>,
    /// Index of the oldest entry; only meaningful while `len > 0`.
    head: usize,
    len: usize,
}

impl WriteQueue {
    /// Create a queue holding at most `capacity` frames. A capacity of
    /// zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Append `frame` as the newest entry. On a full queue the oldest
    /// entry is dropped to make room; the push itself never fails.
    pub fn push(&mut self, frame: Bytes) {
        let capacity = self.capacity();
        if self.len < capacity {
            let slot = (self.head + self.len) % capacity;
            self.slots[slot] = Some(frame);
            self.len += 1;
        } else {
            // Overwrite the oldest entry and advance the head; the count
            // stays pinned at capacity.
            self.slots[self.head] = Some(frame);
            self.head = (self.head + 1) % capacity;
            tracing::debug!(capacity, "write queue full, dropped oldest frame");
        }
    }

    /// Remove the oldest entry. No-op on an empty queue.
    pub fn pop(&mut self) {
        if self.len > 0 {
            self.slots[self.head] = None;
            self.head = (self.head + 1) % self.capacity();
            self.len -= 1;
        }
    }

    /// Borrow the oldest entry without removing it. This is the entry a
    /// subsequent [`pop`](Self::pop) will remove, but nothing stops an
    /// interleaved `push` from evicting it first; use
    /// [`reserve_oldest`](Self::reserve_oldest) around sends.
    pub fn peek_oldest(&self) -> Option<&Bytes> {
        if self.len == 0 {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    /// Reserve the oldest entry for a send. While the reservation lives
    /// the queue cannot be touched, so the entry cannot be evicted out
    /// from under the caller.
    pub fn reserve_oldest(&mut self) -> Option<Reservation<'_>> {
        if self.len == 0 {
            return None;
        }
        Some(Reservation { queue: self })
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }

    /// Change the capacity, keeping the newest `min(len, new_capacity)`
    /// entries in order.
    pub fn resize(&mut self, new_capacity: usize) {
        let new_capacity = new_capacity.max(1);
        while self.len > new_capacity {
            self.pop();
        }
        let mut slots = vec![None; new_capacity].into_boxed_slice();
        let capacity = self.capacity();
        for i in 0..self.len {
            slots[i] = self.slots[(self.head + i) % capacity].take();
        }
        self.slots = slots;
        self.head = 0;
    }
}

/// Exclusive hold on the queue's oldest entry for the duration of a send.
///
/// Dropping the reservation leaves the entry queued. [`complete`]
/// (Reservation::complete) removes it after a full send;
/// [`into_bytes`](Reservation::into_bytes) removes it while transferring
/// ownership of the frame, for sends that must resume later.
#[derive(Debug)]
pub struct Reservation<'q> {
    queue: &'q mut WriteQueue,
}

impl Reservation<'_> {
    /// The reserved frame's encoded bytes.
    pub fn bytes(&self) -> &Bytes {
        self.queue.slots[self.queue.head]
            .as_ref()
            .expect("reserved slot is occupied")
    }

    /// The send finished; drop the entry.
    pub fn complete(self) {
        self.queue.pop();
    }

    /// Remove the entry from the queue and take ownership of it.
    pub fn into_bytes(self) -> Bytes {
        let frame = self.queue.slots[self.queue.head]
            .take()
            .expect("reserved slot is occupied");
        self.queue.head = (self.queue.head + 1) % self.queue.capacity();
        self.queue.len -= 1;
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: u8) -> Bytes {
        Bytes::from(vec![n; 3])
    }

    #[test]
    fn fifo_order() {
        let mut q = WriteQueue::new(4);
        assert!(q.is_empty());
        assert_eq!(q.peek_oldest(), None);

        q.push(frame(1));
        q.push(frame(2));
        q.push(frame(3));
        assert_eq!(q.len(), 3);

        assert_eq!(q.peek_oldest(), Some(&frame(1)));
        q.pop();
        assert_eq!(q.peek_oldest(), Some(&frame(2)));
        q.pop();
        q.pop();
        assert!(q.is_empty());

        // popping an empty queue is a no-op
        q.pop();
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut q = WriteQueue::new(4);
        for n in 1..=6 {
            q.push(frame(n));
        }
        assert_eq!(q.len(), 4);
        assert!(q.is_full());
        for n in 3..=6 {
            assert_eq!(q.peek_oldest(), Some(&frame(n)));
            q.pop();
        }
        assert!(q.is_empty());
    }

    #[test]
    fn len_is_min_of_pushes_and_capacity() {
        for capacity in 1..8 {
            for pushes in 0..12 {
                let mut q = WriteQueue::new(capacity);
                for n in 0..pushes {
                    q.push(frame(n));
                }
                assert_eq!(q.len(), (pushes as usize).min(capacity));
                // retained entries are the most recent ones in order
                let start = pushes.saturating_sub(capacity as u8);
                for n in start..pushes {
                    assert_eq!(q.peek_oldest(), Some(&frame(n)));
                    q.pop();
                }
                assert!(q.is_empty());
            }
        }
    }

    #[test]
    fn wraparound_keeps_order() {
        let mut q = WriteQueue::new(3);
        q.push(frame(1));
        q.push(frame(2));
        q.pop();
        q.push(frame(3));
        q.push(frame(4)); // lands in the wrapped slot
        assert_eq!(q.len(), 3);
        for n in 2..=4 {
            assert_eq!(q.peek_oldest(), Some(&frame(n)));
            q.pop();
        }
    }

    #[test]
    fn clear_empties() {
        let mut q = WriteQueue::new(4);
        q.push(frame(1));
        q.push(frame(2));
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.peek_oldest(), None);
        q.push(frame(9));
        assert_eq!(q.peek_oldest(), Some(&frame(9)));
    }

    #[test]
    fn resize_preserves_newest() {
        let mut q = WriteQueue::new(5);
        for n in 1..=5 {
            q.push(frame(n));
        }
        q.resize(3);
        assert_eq!(q.capacity(), 3);
        assert_eq!(q.len(), 3);
        for n in 3..=5 {
            assert_eq!(q.peek_oldest(), Some(&frame(n)));
            q.pop();
        }

        // growing keeps everything
        let mut q = WriteQueue::new(2);
        q.push(frame(1));
        q.push(frame(2));
        q.resize(4);
        assert_eq!(q.capacity(), 4);
        assert_eq!(q.len(), 2);
        q.push(frame(3));
        for n in 1..=3 {
            assert_eq!(q.peek_oldest(), Some(&frame(n)));
            q.pop();
        }
    }

    #[test]
    fn reservation_pins_and_completes() {
        let mut q = WriteQueue::new(2);
        q.push(frame(1));
        q.push(frame(2));

        let res = q.reserve_oldest().unwrap();
        assert_eq!(res.bytes(), &frame(1));
        res.complete();
        assert_eq!(q.len(), 1);
        assert_eq!(q.peek_oldest(), Some(&frame(2)));

        // dropping a reservation keeps the entry queued
        let res = q.reserve_oldest().unwrap();
        drop(res);
        assert_eq!(q.len(), 1);

        let res = q.reserve_oldest().unwrap();
        let owned = res.into_bytes();
        assert_eq!(owned, frame(2));
        assert!(q.is_empty());
        assert!(q.reserve_oldest().is_none());
    }
}
