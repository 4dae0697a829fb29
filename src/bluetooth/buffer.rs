/// Bounded handoff between the notification delivery context and the session
use std::collections::VecDeque;
use std::sync::Mutex;

/// Default capacity of the notification queue. The scale retransmits history
/// frames freely, so bounded memory wins over completeness.
pub const NOTIFICATION_BUFFER_CAPACITY: usize = 64;

/// Single-producer/single-consumer FIFO for raw notification frames.
///
/// The producer (the notification forwarding task) never blocks and never
/// fails: when the buffer is full the oldest frame is evicted. The consumer
/// drains everything in one atomic step, so a drain can never observe a
/// partial push. The lock is only held for the duration of one push or one
/// drain, never across a suspension point.
pub struct NotificationBuffer {
    frames: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
}

impl NotificationBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Enqueue a frame, evicting the oldest when full.
    pub fn push(&self, frame: Vec<u8>) {
        let mut frames = self.frames.lock().unwrap();
        if frames.len() == self.capacity {
            frames.pop_front();
        }
        frames.push_back(frame);
    }

    /// Remove and return everything currently queued, in arrival order.
    pub fn drain_all(&self) -> Vec<Vec<u8>> {
        let mut frames = self.frames.lock().unwrap();
        frames.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> Vec<u8> {
        vec![tag; 4]
    }

    #[test]
    fn overflow_evicts_oldest_and_keeps_arrival_order() {
        let buffer = NotificationBuffer::new(NOTIFICATION_BUFFER_CAPACITY);
        for tag in 0..70u8 {
            buffer.push(frame(tag));
        }

        let drained = buffer.drain_all();
        assert_eq!(drained.len(), NOTIFICATION_BUFFER_CAPACITY);
        assert_eq!(drained.first().unwrap()[0], 6);
        assert_eq!(drained.last().unwrap()[0], 69);
        for pair in drained.windows(2) {
            assert_eq!(pair[0][0] + 1, pair[1][0]);
        }
    }

    #[test]
    fn drain_empties_the_buffer() {
        let buffer = NotificationBuffer::new(8);
        buffer.push(frame(1));
        buffer.push(frame(2));
        assert!(!buffer.is_empty());

        assert_eq!(buffer.drain_all().len(), 2);
        assert!(buffer.is_empty());
        assert!(buffer.drain_all().is_empty());
    }

    #[test]
    fn push_after_drain_starts_fresh() {
        let buffer = NotificationBuffer::new(2);
        buffer.push(frame(1));
        buffer.drain_all();

        buffer.push(frame(2));
        buffer.push(frame(3));
        buffer.push(frame(4));

        let drained = buffer.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0][0], 3);
        assert_eq!(drained[1][0], 4);
    }
}
