// ping: numbered packets out, echoes back, round trip per packet
use chrono::Local;
use netcode::{connect, ConnectionConfig, Endpoint, Packet, Result};
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

const SEQ_LEN: usize = 4;

fn payload(seq: u32, size: usize) -> Vec<u8> {
    let mut data = vec![0u8; size.max(SEQ_LEN)];
    data[..SEQ_LEN].copy_from_slice(&seq.to_le_bytes());
    data
}

fn sequence_of(packet: &Packet) -> Option<u32> {
    let head = packet.data().get(..SEQ_LEN)?;
    Some(u32::from_le_bytes([head[0], head[1], head[2], head[3]]))
}

pub fn run(endpoint: &Endpoint, config: ConnectionConfig, count: u32, size: usize) -> Result<()> {
    let reply_timeout = if config.timeout.is_zero() {
        Duration::from_secs(5)
    } else {
        config.timeout
    };
    let mut conn = connect(endpoint, config)?;
    println!("PING {} ({} bytes)", endpoint, size.max(SEQ_LEN));

    let mut answered = 0u32;
    for seq in 0..count {
        let started = Instant::now();
        conn.send_data(&payload(seq, size));
        conn.flush(true);

        let mut rtt = None;
        while started.elapsed() < reply_timeout && !conn.check_timeout() {
            match conn.get_data() {
                Some(packet) if sequence_of(&packet) == Some(seq) => {
                    rtt = Some(started.elapsed());
                    break;
                }
                // Late echo of an earlier packet
                Some(_) => {}
                None => thread::sleep(Duration::from_micros(200)),
            }
        }

        let now = Local::now().format("%H:%M:%S%.3f");
        match rtt {
            Some(rtt) => {
                answered += 1;
                println!("[{}] seq={} time={:.3}ms", now, seq, rtt.as_secs_f64() * 1000.0);
            }
            None => println!("[{}] seq={} no reply", now, seq),
        }
        if conn.check_timeout() {
            warn!(peer = %conn.peer_name(), "connection timed out");
            break;
        }
    }

    println!("\n{} sent, {} answered", count, answered);
    println!("{}", conn.statistics());
    Ok(())
}
