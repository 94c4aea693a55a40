//! Ready-order inbound packet queue.
//!
//! Background receive threads own a [`QueueFeeder`] and push complete,
//! already-resequenced packets. The connection owns the [`InboundQueue`] and
//! serves `peek`/`get_data` from it. Packets cross threads through a crossbeam
//! channel and are staged in a `VecDeque` on the consumer side, which is what
//! makes indexed look-ahead possible.

use crossbeam::channel::{unbounded, Receiver, Sender};
use netcode_core::Packet;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

#[derive(Debug)]
struct Shared {
    // Packets pushed and not yet popped, wherever they currently sit
    held: AtomicUsize,
    capacity: Option<usize>,
    dropped: AtomicU64,
    closed: AtomicBool,
}

/// Producer half. Cheap to clone; every clone feeds the same queue.
#[derive(Debug, Clone)]
pub struct QueueFeeder {
    tx: Sender<Packet>,
    shared: Arc<Shared>,
}

impl QueueFeeder {
    /// Append a packet in ready order. Returns `false` if the packet was
    /// dropped because the queue is at capacity or its consumer is gone.
    pub fn push(&self, packet: Packet) -> bool {
        if self.is_disconnected() {
            return false;
        }
        let held = self.shared.held.fetch_add(1, Ordering::AcqRel);
        if let Some(cap) = self.shared.capacity {
            if held >= cap {
                self.shared.held.fetch_sub(1, Ordering::AcqRel);
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(len = packet.len(), dropped, "inbound queue full, dropping newest packet");
                return false;
            }
        }
        if self.tx.send(packet).is_err() {
            self.shared.held.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// True once the consuming [`InboundQueue`] has been dropped.
    pub fn is_disconnected(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

/// Consumer half, owned by the connection.
#[derive(Debug)]
pub struct InboundQueue {
    rx: Receiver<Packet>,
    ready: Mutex<VecDeque<Packet>>,
    shared: Arc<Shared>,
}

/// Create a connected feeder/queue pair. `capacity` bounds the number of
/// packets held at once; `None` means unbounded.
pub fn inbound_queue(capacity: Option<usize>) -> (QueueFeeder, InboundQueue) {
    let (tx, rx) = unbounded();
    let shared = Arc::new(Shared {
        held: AtomicUsize::new(0),
        capacity,
        dropped: AtomicU64::new(0),
        closed: AtomicBool::new(false),
    });
    let feeder = QueueFeeder {
        tx,
        shared: Arc::clone(&shared),
    };
    let queue = InboundQueue {
        rx,
        ready: Mutex::new(VecDeque::new()),
        shared,
    };
    (feeder, queue)
}

impl InboundQueue {
    // Move everything that has arrived into the staging area, keeping order.
    fn staged(&self) -> MutexGuard<'_, VecDeque<Packet>> {
        let mut ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        ready.extend(self.rx.try_iter());
        ready
    }

    pub fn peek(&self, ahead: usize) -> Option<Packet> {
        self.staged().get(ahead).cloned()
    }

    pub fn pop(&self) -> Option<Packet> {
        let packet = self.staged().pop_front()?;
        self.shared.held.fetch_sub(1, Ordering::AcqRel);
        Some(packet)
    }

    pub fn len(&self) -> usize {
        self.staged().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Packets discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for InboundQueue {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn packet(len: usize) -> Packet {
        Packet::new(vec![len as u8; len])
    }

    #[test]
    fn empty_queue_has_nothing() {
        let (_feeder, queue) = inbound_queue(None);
        assert!(queue.peek(0).is_none());
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn peek_and_pop_share_order() {
        let (feeder, queue) = inbound_queue(None);
        for len in [10, 20, 5] {
            assert!(feeder.push(packet(len)));
        }
        assert_eq!(queue.peek(1).unwrap().len(), 20);
        assert_eq!(queue.peek(1).unwrap().len(), 20);
        assert!(queue.peek(3).is_none());
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.pop().unwrap().len(), 10);
        assert_eq!(queue.peek(0).unwrap().len(), 20);
        assert_eq!(queue.peek(1).unwrap().len(), 5);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn bounded_queue_drops_newest() {
        let (feeder, queue) = inbound_queue(Some(2));
        assert!(feeder.push(packet(1)));
        assert!(feeder.push(packet(2)));
        assert!(!feeder.push(packet(3)));
        assert_eq!(queue.dropped(), 1);

        assert_eq!(queue.pop().unwrap().len(), 1);
        assert_eq!(queue.pop().unwrap().len(), 2);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn popping_reopens_room() {
        let (feeder, queue) = inbound_queue(Some(1));
        assert!(feeder.push(packet(1)));
        assert_eq!(queue.peek(0).unwrap().len(), 1);
        assert!(!feeder.push(packet(2)));
        queue.pop();
        assert!(feeder.push(packet(3)));
        assert_eq!(queue.peek(0).unwrap().len(), 3);
    }

    #[test]
    fn feeder_notices_dropped_queue() {
        let (feeder, queue) = inbound_queue(None);
        assert!(!feeder.is_disconnected());
        drop(queue);
        assert!(feeder.is_disconnected());
        assert!(!feeder.push(packet(1)));
    }

    #[test]
    fn concurrent_producer_preserves_order() {
        let (feeder, queue) = inbound_queue(None);
        let producer = thread::spawn(move || {
            for i in 0..1000u32 {
                feeder.push(Packet::new(i.to_le_bytes().to_vec()));
            }
        });

        let mut next = 0u32;
        while next < 1000 {
            if let Some(p) = queue.pop() {
                let got = u32::from_le_bytes([p[0], p[1], p[2], p[3]]);
                assert_eq!(got, next);
                next += 1;
            }
        }
        producer.join().unwrap();
        assert!(queue.is_empty());
    }
}
