//! Reliability state machine of the datagram backend.
//!
//! [`ReliableState`] owns everything about one UDP session except the
//! socket: chunk numbering and fragmentation on the way out, the send window
//! of unacknowledged chunks, the retransmit timer, and the resequencer on the
//! way in. Callers feed it datagrams and clock ticks and get back encoded
//! frames to put on the wire.
//!
//! ```text
//!  send_base              next_sent             next_seq
//!      |                      |                     |
//!  ----+----------------------+---------------------+----> chunk numbers
//!      |<---- in flight ----->|<----- waiting ----->|
//! ```

use crate::resequencer::{seq_lt, ChunkOutcome, Resequencer};
use crate::timer::RetransmitTimer;
use crate::wire::{frame_flags, Chunk, Frame, WireError, HEADER_LEN};
use bytes::Bytes;
use netcode_core::{ConnectionConfig, Packet};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct InFlight {
    chunk: Chunk,
    sent_at: Instant,
    tx_count: u32,
}

/// Wire-level counters, reported by `UdpConnection::statistics`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WireStats {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub wire_bytes_sent: u64,
    pub wire_bytes_received: u64,
    pub chunks_sent: u64,
    pub chunks_resent: u64,
    pub duplicate_chunks: u64,
    pub out_of_order_chunks: u64,
    pub out_of_window_chunks: u64,
    pub malformed_datagrams: u64,
}

/// Result of feeding one datagram in.
#[derive(Debug, Default)]
pub struct Delivery {
    /// Whole packets now ready, in order
    pub packets: Vec<Packet>,
    /// The peer announced it is closing
    pub closed_by_peer: bool,
}

#[derive(Debug)]
pub struct ReliableState {
    mtu: usize,
    chunk_payload: usize,
    send_window: usize,
    keepalive: Duration,

    send_base: u32,
    next_seq: u32,
    in_flight: VecDeque<InFlight>,
    waiting: VecDeque<Chunk>,

    resequencer: Resequencer,
    timer: RetransmitTimer,
    ack_owed: bool,
    last_send: Instant,
    stats: WireStats,
}

impl ReliableState {
    pub fn new(config: &ConnectionConfig) -> Self {
        ReliableState {
            mtu: config.mtu,
            chunk_payload: config.chunk_payload().max(1),
            send_window: config.send_window.max(1),
            keepalive: config.keepalive_interval,
            send_base: 0,
            next_seq: 0,
            in_flight: VecDeque::new(),
            waiting: VecDeque::new(),
            resequencer: Resequencer::new(0, config.recv_window),
            timer: RetransmitTimer::new(config.initial_rto, config.max_rto),
            ack_owed: false,
            last_send: Instant::now(),
            stats: WireStats::default(),
        }
    }

    pub fn stats(&self) -> &WireStats {
        &self.stats
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }

    pub fn rto(&self) -> Duration {
        self.timer.rto()
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.timer.srtt()
    }

    /// Split packets into numbered chunks and queue them behind the window.
    /// A packet larger than one chunk becomes a run of fragments; an empty
    /// packet still takes one (empty) chunk.
    pub fn enqueue_packets(&mut self, packets: Vec<Packet>) {
        for packet in packets {
            let bytes = packet.into_bytes();
            let mut offset = 0;
            loop {
                let end = (offset + self.chunk_payload).min(bytes.len());
                let more = end < bytes.len();
                self.waiting.push_back(Chunk {
                    seq: self.next_seq,
                    more,
                    payload: bytes.slice(offset..end),
                });
                self.next_seq = self.next_seq.wrapping_add(1);
                if !more {
                    break;
                }
                offset = end;
            }
        }
    }

    /// Decode and absorb one datagram.
    pub fn on_datagram(&mut self, datagram: Bytes, now: Instant) -> Result<Delivery, WireError> {
        let len = datagram.len();
        let frame = match Frame::decode(datagram) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.malformed_datagrams += 1;
                return Err(e);
            }
        };
        self.stats.datagrams_received += 1;
        self.stats.wire_bytes_received += len as u64;

        self.on_ack(frame.ack, now);

        let mut delivery = Delivery {
            packets: Vec::new(),
            closed_by_peer: frame.is_close(),
        };
        if !frame.chunks.is_empty() {
            self.ack_owed = true;
        }
        for chunk in frame.chunks {
            match self.resequencer.on_chunk(chunk, &mut delivery.packets) {
                ChunkOutcome::Accepted => {}
                ChunkOutcome::Buffered => self.stats.out_of_order_chunks += 1,
                ChunkOutcome::Duplicate => self.stats.duplicate_chunks += 1,
                ChunkOutcome::OutOfWindow => self.stats.out_of_window_chunks += 1,
            }
        }
        Ok(delivery)
    }

    /// Apply a cumulative ack. Returns how many chunks it newly covered.
    pub fn on_ack(&mut self, ack: u32, now: Instant) -> usize {
        let next_sent = self.send_base.wrapping_add(self.in_flight.len() as u32);
        // Stale, duplicate, or acking chunks never sent
        if !seq_lt(self.send_base, ack) || seq_lt(next_sent, ack) {
            return 0;
        }

        let covered = ack.wrapping_sub(self.send_base) as usize;
        let mut sample = None;
        for entry in self.in_flight.drain(..covered) {
            // Karn: only chunks sent once give an unambiguous RTT
            if entry.tx_count == 1 {
                sample = Some(now.saturating_duration_since(entry.sent_at));
            }
        }
        self.send_base = ack;
        if let Some(rtt) = sample {
            self.timer.record_rtt_sample(rtt);
        }

        if self.in_flight.is_empty() {
            self.timer.cancel();
        } else {
            self.timer.arm(now);
        }
        covered
    }

    /// Move waiting chunks into the window and encode them.
    pub fn transmit_new(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut fresh = Vec::new();
        while self.in_flight.len() < self.send_window {
            let Some(chunk) = self.waiting.pop_front() else {
                break;
            };
            self.in_flight.push_back(InFlight {
                chunk: chunk.clone(),
                sent_at: now,
                tx_count: 1,
            });
            fresh.push(chunk);
        }
        if fresh.is_empty() {
            return Vec::new();
        }
        self.stats.chunks_sent += fresh.len() as u64;
        self.timer.arm_if_idle(now);
        self.pack(fresh, 0, now)
    }

    /// Periodic work: retransmit on timer expiry, keep the window moving,
    /// pay owed acks, and send keep-alives on an idle link.
    pub fn on_tick(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut out = Vec::new();

        if self.timer.expired(now) && !self.in_flight.is_empty() {
            self.timer.back_off();
            let mut resend = Vec::with_capacity(self.in_flight.len());
            for entry in self.in_flight.iter_mut() {
                entry.tx_count += 1;
                entry.sent_at = now;
                resend.push(entry.chunk.clone());
            }
            self.stats.chunks_resent += resend.len() as u64;
            self.timer.arm(now);
            out.extend(self.pack(resend, 0, now));
        }

        out.extend(self.transmit_new(now));

        let keepalive_due =
            !self.keepalive.is_zero() && now.saturating_duration_since(self.last_send) >= self.keepalive;
        if out.is_empty() && (self.ack_owed || keepalive_due) {
            out.extend(self.pack(Vec::new(), 0, now));
        }
        out
    }

    /// Bare ack, also used to announce a new session.
    pub fn ack_frame(&mut self, now: Instant) -> Vec<u8> {
        let mut frames = self.pack(Vec::new(), 0, now);
        frames.pop().unwrap_or_default()
    }

    /// Best-effort goodbye frame.
    pub fn close_frame(&mut self, now: Instant) -> Vec<u8> {
        let mut frames = self.pack(Vec::new(), frame_flags::CLOSE, now);
        frames.pop().unwrap_or_default()
    }

    /// Every frame carries the current cumulative ack, so sending anything
    /// settles an owed ack.
    fn pack(&mut self, chunks: Vec<Chunk>, flags: u8, now: Instant) -> Vec<Vec<u8>> {
        let ack = self.resequencer.ack_number();
        let mut frames = Vec::new();
        let mut current = Frame { ack, flags, chunks: Vec::new() };
        let mut size = HEADER_LEN;

        for chunk in chunks {
            if !current.chunks.is_empty() && size + chunk.encoded_len() > self.mtu {
                frames.push(std::mem::replace(
                    &mut current,
                    Frame { ack, flags, chunks: Vec::new() },
                ));
                size = HEADER_LEN;
            }
            size += chunk.encoded_len();
            current.chunks.push(chunk);
        }
        frames.push(current);

        let encoded: Vec<Vec<u8>> = frames.iter().map(Frame::encode).collect();
        for datagram in &encoded {
            self.stats.datagrams_sent += 1;
            self.stats.wire_bytes_sent += datagram.len() as u64;
        }
        self.ack_owed = false;
        self.last_send = now;
        encoded
    }

    pub fn describe(&self) -> String {
        let s = &self.stats;
        let srtt = self
            .srtt()
            .map(|d| format!("{:.1}ms", d.as_secs_f64() * 1000.0))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "Datagrams: {} sent ({} bytes), {} received ({} bytes), {} malformed\n\
             Chunks: {} sent, {} resent, {} in flight, {} waiting\n\
             Inbound chunks: {} duplicate, {} out of order, {} out of window, {} buffered\n\
             RTO: {:.1}ms, SRTT: {}",
            s.datagrams_sent,
            s.wire_bytes_sent,
            s.datagrams_received,
            s.wire_bytes_received,
            s.malformed_datagrams,
            s.chunks_sent,
            s.chunks_resent,
            self.in_flight.len(),
            self.waiting.len(),
            s.duplicate_chunks,
            s.out_of_order_chunks,
            s.out_of_window_chunks,
            self.resequencer.buffered(),
            self.rto().as_secs_f64() * 1000.0,
            srtt
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig::default()
            .with_mtu(64)
            .with_keepalive(Duration::ZERO)
            .with_rto(Duration::from_millis(100), Duration::from_secs(1))
    }

    fn pair() -> (ReliableState, ReliableState) {
        (ReliableState::new(&config()), ReliableState::new(&config()))
    }

    fn deliver_all(to: &mut ReliableState, frames: Vec<Vec<u8>>, now: Instant) -> Vec<Packet> {
        let mut packets = Vec::new();
        for f in frames {
            packets.extend(to.on_datagram(Bytes::from(f), now).unwrap().packets);
        }
        packets
    }

    #[test]
    fn packets_cross_in_order() {
        let (mut a, mut b) = pair();
        let now = Instant::now();
        a.enqueue_packets(vec![Packet::from_slice(b"one"), Packet::from_slice(b"two")]);
        let frames = a.transmit_new(now);
        assert_eq!(frames.len(), 1);
        let got = deliver_all(&mut b, frames, now);
        assert_eq!(got, vec![Packet::from_slice(b"one"), Packet::from_slice(b"two")]);
    }

    #[test]
    fn large_packet_fragments_and_frames_respect_mtu() {
        let (mut a, mut b) = pair();
        let now = Instant::now();
        let big: Vec<u8> = (0..200u8).collect();
        a.enqueue_packets(vec![Packet::new(big.clone())]);
        // 64 - 14 = 50 payload bytes per chunk
        assert_eq!(a.waiting(), 4);
        let frames = a.transmit_new(now);
        assert!(frames.iter().all(|f| f.len() <= 64));
        let got = deliver_all(&mut b, frames, now);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].data(), &big[..]);
    }

    #[test]
    fn empty_packet_takes_one_chunk() {
        let (mut a, mut b) = pair();
        let now = Instant::now();
        a.enqueue_packets(vec![Packet::empty()]);
        assert_eq!(a.waiting(), 1);
        let got = deliver_all(&mut b, a.transmit_new(now), now);
        assert_eq!(got, vec![Packet::empty()]);
    }

    #[test]
    fn ack_clears_window_and_samples_rtt() {
        let (mut a, mut b) = pair();
        let t0 = Instant::now();
        a.enqueue_packets(vec![Packet::from_slice(b"x")]);
        deliver_all(&mut b, a.transmit_new(t0), t0);
        assert_eq!(a.in_flight(), 1);

        let acks = b.on_tick(t0);
        assert_eq!(acks.len(), 1);
        deliver_all(&mut a, acks, t0 + Duration::from_millis(40));
        assert_eq!(a.in_flight(), 0);
        assert_eq!(a.srtt(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn bogus_ack_ignored() {
        let (mut a, _) = pair();
        let now = Instant::now();
        a.enqueue_packets(vec![Packet::from_slice(b"x")]);
        a.transmit_new(now);
        assert_eq!(a.on_ack(5, now), 0);
        assert_eq!(a.on_ack(0, now), 0);
        assert_eq!(a.on_ack(1, now), 1);
    }

    #[test]
    fn lost_frame_is_retransmitted() {
        let (mut a, mut b) = pair();
        let t0 = Instant::now();
        a.enqueue_packets(vec![Packet::from_slice(b"lost")]);
        let _dropped = a.transmit_new(t0);

        assert!(a.on_tick(t0 + Duration::from_millis(50)).is_empty());
        let resent = a.on_tick(t0 + Duration::from_millis(100));
        assert_eq!(resent.len(), 1);
        assert_eq!(a.stats().chunks_resent, 1);
        assert_eq!(a.rto(), Duration::from_millis(200));

        let got = deliver_all(&mut b, resent, t0 + Duration::from_millis(101));
        assert_eq!(got, vec![Packet::from_slice(b"lost")]);
    }

    #[test]
    fn send_window_limits_in_flight() {
        let mut cfg = config();
        cfg.send_window = 2;
        let mut a = ReliableState::new(&cfg);
        let now = Instant::now();
        a.enqueue_packets((0..5u8).map(|i| Packet::new(vec![i])).collect());
        a.transmit_new(now);
        assert_eq!(a.in_flight(), 2);
        assert_eq!(a.waiting(), 3);

        a.on_ack(2, now);
        let frames = a.on_tick(now);
        assert_eq!(frames.len(), 1);
        assert_eq!(a.in_flight(), 2);
        assert_eq!(a.waiting(), 1);
    }

    #[test]
    fn duplicate_delivery_counted_not_repeated() {
        let (mut a, mut b) = pair();
        let now = Instant::now();
        a.enqueue_packets(vec![Packet::from_slice(b"d")]);
        let frames = a.transmit_new(now);
        let copy = frames.clone();
        assert_eq!(deliver_all(&mut b, frames, now).len(), 1);
        assert!(deliver_all(&mut b, copy, now).is_empty());
        assert_eq!(b.stats().duplicate_chunks, 1);
    }

    #[test]
    fn malformed_datagram_counted() {
        let (_, mut b) = pair();
        let err = b.on_datagram(Bytes::from_static(b"junk!!!!"), Instant::now());
        assert!(err.is_err());
        assert_eq!(b.stats().malformed_datagrams, 1);
    }

    #[test]
    fn keepalive_after_idle_interval() {
        let cfg = config().with_keepalive(Duration::from_millis(30));
        let mut a = ReliableState::new(&cfg);
        let t0 = Instant::now();
        assert!(a.on_tick(t0).is_empty());
        let frames = a.on_tick(t0 + Duration::from_millis(31));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), HEADER_LEN);
        assert!(a.on_tick(t0 + Duration::from_millis(40)).is_empty());
    }

    #[test]
    fn close_frame_signals_peer() {
        let (mut a, mut b) = pair();
        let now = Instant::now();
        let bye = a.close_frame(now);
        let delivery = b.on_datagram(Bytes::from(bye), now).unwrap();
        assert!(delivery.closed_by_peer);
    }

    #[test]
    fn describe_mentions_counters() {
        let (a, _) = pair();
        let text = a.describe();
        assert!(text.contains("Datagrams: 0 sent"));
        assert!(text.contains("SRTT: n/a"));
    }
}
