// bench: one-way throughput through a connection pair in this process
use crate::Backend;
use netcode::{listen, connect, Connection, ConnectionConfig, LocalConnection, NetError, Result};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

const SETUP_TIMEOUT: Duration = Duration::from_secs(5);

struct BenchResult {
    packets: usize,
    bytes: u64,
    elapsed: Duration,
}

impl BenchResult {
    fn print(&self, backend: Backend) {
        let secs = self.elapsed.as_secs_f64().max(f64::EPSILON);
        println!("\n=== {:?} throughput ===", backend);
        println!("  Packets:    {}", self.packets);
        println!("  Bytes:      {}", self.bytes);
        println!("  Elapsed:    {:.3}s", secs);
        println!("  Rate:       {:.0} packets/s", self.packets as f64 / secs);
        println!("  Throughput: {:.2} MB/s", self.bytes as f64 / secs / 1_000_000.0);
    }
}

fn pair(backend: Backend, config: ConnectionConfig) -> Result<(Box<dyn Connection>, Box<dyn Connection>)> {
    if backend == Backend::Local {
        let (a, b) = LocalConnection::pair(&config);
        return Ok((Box::new(a), Box::new(b)));
    }

    let mut listener = listen(&backend.endpoint("127.0.0.1:0"), config.clone())?;
    let server = listener.local_addr();
    let sender = connect(&backend.endpoint(&server.to_string()), config)?;

    let started = Instant::now();
    loop {
        if let Some(receiver) = listener.accept()? {
            return Ok((sender, receiver));
        }
        if started.elapsed() > SETUP_TIMEOUT {
            return Err(NetError::ConnectionRefused(format!("no peer accepted on {}", server)));
        }
        thread::sleep(Duration::from_millis(1));
    }
}

fn transfer(sender: &mut dyn Connection, receiver: &mut dyn Connection, count: usize, size: usize) -> BenchResult {
    let payload = vec![0x5Au8; size];
    let started = Instant::now();
    let mut sent = 0;
    let mut received = 0;

    while received < count {
        if sent < count {
            sender.send_data(&payload);
            sent += 1;
            sender.flush(sent == count);
        } else {
            sender.flush(true);
        }
        while receiver.get_data().is_some() {
            received += 1;
        }
        receiver.flush(true);
        if sender.check_timeout() || receiver.check_timeout() {
            info!("connection timed out during transfer");
            break;
        }
    }

    BenchResult {
        packets: received,
        bytes: receiver.data_received(),
        elapsed: started.elapsed(),
    }
}

pub fn run(backend: Backend, config: ConnectionConfig, count: usize, size: usize) -> Result<()> {
    let (mut sender, mut receiver) = pair(backend, config)?;
    info!(?backend, count, size, "starting transfer");
    let result = transfer(&mut *sender, &mut *receiver, count, size);
    result.print(backend);
    println!("\n{}", sender.statistics());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_transfer_counts_everything() {
        let (mut a, mut b) = pair(Backend::Local, ConnectionConfig::default()).unwrap();
        let result = transfer(&mut *a, &mut *b, 100, 32);
        assert_eq!(result.packets, 100);
        assert_eq!(result.bytes, 3200);
    }
}
