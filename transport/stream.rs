//! Length-prefixed packet connections over byte streams (TCP, Unix sockets).
//!
//! Every packet travels as `len: u32 LE` followed by `len` bytes. A length
//! of `KEEPALIVE_MARKER` is a bare keepalive with no payload. A reader
//! thread owns a clone of the stream, cuts complete frames out of what it
//! reads and feeds the inbound queue; between reads it sends a keepalive
//! when nothing was written for `keepalive_interval`. Packets are written
//! on the application thread in `flush`, one vectored write per batch.

use bytes::{Buf, BytesMut};
use netcode_buffer::{inbound_queue, BatchPolicy, InboundQueue, OutboundBuffer, QueueFeeder};
use netcode_core::{Connection, ConnectionConfig, Liveness, Packet, PeerAddress, Result, TrafficCounters};
use std::io::{self, ErrorKind, IoSlice, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const FRAME_PREFIX_LEN: usize = 4;

/// Length prefix reserved for keepalive frames.
pub const KEEPALIVE_MARKER: u32 = u32::MAX;

const READ_CHUNK: usize = 16 * 1024;

/// A connected, bidirectional byte stream that can be split into a reader
/// half and a writer half.
pub trait DuplexStream: Read + Write + Send + Sized + 'static {
    /// Used in statistics and log output.
    const KIND: &'static str;

    fn try_clone_stream(&self) -> io::Result<Self>;

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Unblocks the reader half.
    fn shutdown(&self) -> io::Result<()>;

    fn peer(&self) -> PeerAddress;

    /// Best effort; failures are only logged.
    fn size_buffers(&self, _bytes: usize) {}
}

struct Writer<S> {
    stream: S,
    last_write: Instant,
    keepalives_sent: u64,
}

impl<S: Write> Writer<S> {
    fn write_batch(&mut self, batch: &[Packet]) -> io::Result<()> {
        write_frames(&mut self.stream, batch)?;
        self.last_write = Instant::now();
        Ok(())
    }

    fn keepalive_due(&self, interval: Duration) -> bool {
        !interval.is_zero() && self.last_write.elapsed() >= interval
    }

    fn write_keepalive(&mut self) -> io::Result<()> {
        self.stream.write_all(&KEEPALIVE_MARKER.to_le_bytes())?;
        self.stream.flush()?;
        self.last_write = Instant::now();
        self.keepalives_sent += 1;
        Ok(())
    }
}

struct Shared<S> {
    liveness: Liveness,
    closed: AtomicBool,
    writer: Mutex<Writer<S>>,
}

impl<S> Shared<S> {
    fn writer(&self) -> MutexGuard<'_, Writer<S>> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct StreamConnection<S: DuplexStream> {
    shared: Arc<Shared<S>>,
    inbound: InboundQueue,
    outbound: OutboundBuffer,
    counters: TrafficCounters,
    peer: PeerAddress,
    max_packet_size: usize,
    frames_written: u64,
    write_batches: u64,
    reader: Option<JoinHandle<()>>,
}

impl<S: DuplexStream> StreamConnection<S> {
    /// Wrap an already connected stream and start its reader thread.
    pub fn from_stream(stream: S, config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        stream.size_buffers(config.socket_buffer_bytes);
        // Lets the reader notice `closed` even if shutdown is not honoured
        stream.set_read_timeout(Some(config.poll_interval))?;
        if !config.timeout.is_zero() {
            stream.set_write_timeout(Some(config.timeout))?;
        }

        let reader_half = stream.try_clone_stream()?;
        let peer = stream.peer();
        let (feeder, inbound) = inbound_queue(config.inbound_capacity);
        let shared = Arc::new(Shared {
            liveness: Liveness::new(config.timeout),
            closed: AtomicBool::new(false),
            writer: Mutex::new(Writer {
                stream,
                last_write: Instant::now(),
                keepalives_sent: 0,
            }),
        });

        let reader_shared = Arc::clone(&shared);
        let max_packet_size = config.max_packet_size;
        let keepalive = config.keepalive_interval;
        let reader = thread::Builder::new()
            .name("netcode-stream-reader".to_string())
            .spawn(move || read_loop(reader_half, reader_shared, feeder, max_packet_size, keepalive))?;

        info!(%peer, kind = S::KIND, "stream connection opened");
        Ok(StreamConnection {
            shared,
            inbound,
            outbound: OutboundBuffer::new(BatchPolicy {
                batch_bytes: config.batch_bytes,
                batch_delay: config.batch_delay,
            }),
            counters: TrafficCounters::new(),
            peer,
            max_packet_size,
            frames_written: 0,
            write_batches: 0,
            reader: Some(reader),
        })
    }

    pub fn is_broken(&self) -> bool {
        self.shared.liveness.is_broken()
    }
}

fn read_loop<S: DuplexStream>(
    mut stream: S,
    shared: Arc<Shared<S>>,
    feeder: QueueFeeder,
    max_packet_size: usize,
    keepalive: Duration,
) {
    let mut pending = BytesMut::with_capacity(READ_CHUNK);
    let mut buf = vec![0u8; READ_CHUNK];
    let mut frames = Vec::new();

    while !shared.closed.load(Ordering::Acquire) {
        match stream.read(&mut buf) {
            Ok(0) => {
                debug!("stream closed by peer");
                break;
            }
            Ok(n) => {
                shared.liveness.touch();
                pending.extend_from_slice(&buf[..n]);
                let cut = cut_frames(&mut pending, max_packet_size, &mut frames);
                for frame in frames.drain(..) {
                    feeder.push(frame);
                }
                if let Err(e) = cut {
                    warn!("dropping stream: {}", e);
                    break;
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                if !shared.closed.load(Ordering::Acquire) {
                    debug!("stream read failed: {}", e);
                }
                break;
            }
        }

        let mut writer = shared.writer();
        if writer.keepalive_due(keepalive) {
            if let Err(e) = writer.write_keepalive() {
                debug!("stream keepalive failed: {}", e);
                break;
            }
        }
    }
    shared.liveness.mark_broken();
}

/// Move every complete frame in `pending` to `out`, leaving a partial frame
/// (if any) behind.
fn cut_frames(pending: &mut BytesMut, max_len: usize, out: &mut Vec<Packet>) -> io::Result<()> {
    while pending.len() >= FRAME_PREFIX_LEN {
        let mut prefix = [0u8; FRAME_PREFIX_LEN];
        prefix.copy_from_slice(&pending[..FRAME_PREFIX_LEN]);
        let raw = u32::from_le_bytes(prefix);
        if raw == KEEPALIVE_MARKER {
            pending.advance(FRAME_PREFIX_LEN);
            continue;
        }
        let len = raw as usize;
        if len > max_len {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds limit of {}", len, max_len),
            ));
        }
        if pending.len() < FRAME_PREFIX_LEN + len {
            break;
        }
        pending.advance(FRAME_PREFIX_LEN);
        out.push(Packet::from(pending.split_to(len).freeze()));
    }
    Ok(())
}

/// Write `batch` as consecutive frames, retrying over partial writes.
fn write_frames<W: Write>(writer: &mut W, batch: &[Packet]) -> io::Result<()> {
    let prefixes: Vec<[u8; FRAME_PREFIX_LEN]> = batch
        .iter()
        .map(|packet| (packet.len() as u32).to_le_bytes())
        .collect();
    let mut slices = Vec::with_capacity(batch.len() * 2);
    for (prefix, packet) in prefixes.iter().zip(batch) {
        slices.push(IoSlice::new(prefix));
        if !packet.is_empty() {
            slices.push(IoSlice::new(packet.data()));
        }
    }

    let mut remaining = &mut slices[..];
    while !remaining.is_empty() {
        match writer.write_vectored(remaining) {
            Ok(0) => return Err(io::Error::new(ErrorKind::WriteZero, "stream accepted no bytes")),
            Ok(n) => IoSlice::advance_slices(&mut remaining, n),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    writer.flush()
}

impl<S: DuplexStream> Connection for StreamConnection<S> {
    fn send_packet(&mut self, packet: Packet) {
        self.counters.record_sent(packet.len());
        if packet.len() > self.max_packet_size {
            // The peer would treat it as a protocol violation
            warn!(peer = %self.peer, len = packet.len(), "dropping oversized packet");
            return;
        }
        self.outbound.push(packet);
    }

    fn peek(&self, ahead: usize) -> Option<Packet> {
        self.inbound.peek(ahead)
    }

    fn get_data(&mut self) -> Option<Packet> {
        let packet = self.inbound.pop()?;
        self.counters.record_received(packet.len());
        Some(packet)
    }

    fn flush(&mut self, forced: bool) {
        let Some(batch) = self.outbound.take_batch(forced) else {
            return;
        };
        if self.is_broken() {
            return;
        }
        let written = self.shared.writer().write_batch(&batch);
        match written {
            Ok(()) => {
                self.frames_written += batch.len() as u64;
                self.write_batches += 1;
            }
            Err(e) => {
                warn!(peer = %self.peer, "stream write failed, discarding {} packets: {}", batch.len(), e);
                self.shared.liveness.mark_broken();
            }
        }
    }

    fn check_timeout(&self) -> bool {
        self.shared.liveness.is_timed_out()
    }

    fn statistics(&self) -> String {
        format!(
            "Statistics for {} connection to {}:\n{}\n\
             Frames written: {} in {} batches, {} keepalives; inbound queue: {} waiting, {} dropped\n\
             Idle for {}ms (timeout {}ms); broken: {}",
            S::KIND,
            self.peer,
            self.counters.summary(),
            self.frames_written,
            self.write_batches,
            self.shared.writer().keepalives_sent,
            self.inbound.len(),
            self.inbound.dropped(),
            self.shared.liveness.idle_for().as_millis(),
            self.shared.liveness.timeout().as_millis(),
            self.is_broken()
        )
    }

    fn peer_name(&self) -> PeerAddress {
        self.peer
    }

    fn counters(&self) -> &TrafficCounters {
        &self.counters
    }
}

impl<S: DuplexStream> Drop for StreamConnection<S> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        let _ = self.shared.writer().stream.shutdown();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        debug!(peer = %self.peer, kind = S::KIND, "stream connection dropped");
    }
}
