//! The connection contract every transport backend implements.
//!
//! An application holds a `Box<dyn Connection>` and never sees backend
//! types. Inbound packets form a FIFO in ready order: `peek(k)` looks at the
//! k-th packet without removing it, `get_data` pops the front. Neither
//! blocks. Outbound data is handed to `send_data`/`send_packet` and may sit
//! in a backend buffer until `flush`.
//!
//! No method here reports transport errors. Lost or malformed traffic shows
//! up as an empty queue, and a dead peer as `check_timeout()` returning true.

use crate::address::PeerAddress;
use crate::counters::TrafficCounters;
use crate::packet::Packet;

pub trait Connection: Send {
    /// Queue a copy of `data` for transmission. Counts `data.len()` bytes
    /// as sent immediately; transmission may wait for `flush`.
    fn send_data(&mut self, data: &[u8]) {
        self.send_packet(Packet::from_slice(data));
    }

    /// Same as `send_data` but takes ownership of a prepared packet.
    fn send_packet(&mut self, packet: Packet);

    /// The packet at position `ahead` in ready order, or `None` past the end
    /// of the backlog. Does not consume anything.
    fn peek(&self, ahead: usize) -> Option<Packet>;

    /// Remove and return the front packet, counting its length as received.
    fn get_data(&mut self) -> Option<Packet>;

    /// Hand buffered outbound data to the medium. With `forced == false` the
    /// backend may keep holding small batches.
    fn flush(&mut self, forced: bool);

    /// Whether the peer should be considered gone.
    fn check_timeout(&self) -> bool;

    /// Human-readable traffic summary; format is backend specific.
    fn statistics(&self) -> String;

    fn peer_name(&self) -> PeerAddress;

    fn counters(&self) -> &TrafficCounters;

    fn data_received(&self) -> u64 {
        self.counters().bytes_received()
    }

    fn data_sent(&self) -> u64 {
        self.counters().bytes_sent()
    }
}

/// Walk the whole inbound backlog without consuming it.
pub fn peek_all(conn: &dyn Connection) -> Vec<Packet> {
    let mut backlog = Vec::new();
    let mut ahead = 0;
    while let Some(packet) = conn.peek(ahead) {
        backlog.push(packet);
        ahead += 1;
    }
    backlog
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn send_data(&mut self, data: &[u8]) {
        (**self).send_data(data)
    }

    fn send_packet(&mut self, packet: Packet) {
        (**self).send_packet(packet)
    }

    fn peek(&self, ahead: usize) -> Option<Packet> {
        (**self).peek(ahead)
    }

    fn get_data(&mut self) -> Option<Packet> {
        (**self).get_data()
    }

    fn flush(&mut self, forced: bool) {
        (**self).flush(forced)
    }

    fn check_timeout(&self) -> bool {
        (**self).check_timeout()
    }

    fn statistics(&self) -> String {
        (**self).statistics()
    }

    fn peer_name(&self) -> PeerAddress {
        (**self).peer_name()
    }

    fn counters(&self) -> &TrafficCounters {
        (**self).counters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    // Minimal in-memory backend: sends loop straight back into the inbound queue
    struct Echo {
        queue: VecDeque<Packet>,
        counters: TrafficCounters,
    }

    impl Connection for Echo {
        fn send_packet(&mut self, packet: Packet) {
            self.counters.record_sent(packet.len());
            self.queue.push_back(packet);
        }

        fn peek(&self, ahead: usize) -> Option<Packet> {
            self.queue.get(ahead).cloned()
        }

        fn get_data(&mut self) -> Option<Packet> {
            let packet = self.queue.pop_front()?;
            self.counters.record_received(packet.len());
            Some(packet)
        }

        fn flush(&mut self, _forced: bool) {}

        fn check_timeout(&self) -> bool {
            false
        }

        fn statistics(&self) -> String {
            self.counters.summary()
        }

        fn peer_name(&self) -> PeerAddress {
            PeerAddress::UNSPECIFIED
        }

        fn counters(&self) -> &TrafficCounters {
            &self.counters
        }
    }

    fn echo() -> Box<dyn Connection> {
        Box::new(Echo {
            queue: VecDeque::new(),
            counters: TrafficCounters::new(),
        })
    }

    #[test]
    fn provided_methods_route_through_counters() {
        let mut conn = echo();
        conn.send_data(b"abc");
        assert_eq!(conn.data_sent(), 3);
        assert_eq!(conn.data_received(), 0);
        conn.get_data();
        assert_eq!(conn.data_received(), 3);
    }

    #[test]
    fn peek_all_walks_without_consuming() {
        let mut conn = echo();
        conn.send_data(b"a");
        conn.send_data(b"bb");
        let backlog = peek_all(&*conn);
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog[1].data(), b"bb");
        assert_eq!(peek_all(&*conn).len(), 2);
        assert_eq!(conn.get_data().unwrap().data(), b"a");
    }

    #[test]
    fn boxed_connection_is_a_connection() {
        fn takes<C: Connection>(mut c: C) -> u64 {
            c.send_data(&[0; 4]);
            c.data_sent()
        }
        assert_eq!(takes(echo()), 4);
    }
}
