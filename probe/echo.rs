// echo: accept peers and send every packet straight back
use netcode::{listen, Connection, ConnectionConfig, Endpoint, Result};
use std::thread;
use std::time::Duration;
use tracing::info;

const IDLE_SLEEP: Duration = Duration::from_millis(1);

pub fn run(endpoint: &Endpoint, config: ConnectionConfig, once: bool) -> Result<()> {
    let mut listener = listen(endpoint, config)?;
    println!("Echoing on {} ({})", endpoint, listener.local_addr());

    let mut peers: Vec<Box<dyn Connection>> = Vec::new();
    loop {
        while let Some(conn) = listener.accept()? {
            info!(peer = %conn.peer_name(), "peer joined");
            peers.push(conn);
        }

        let mut busy = false;
        for conn in peers.iter_mut() {
            while let Some(packet) = conn.get_data() {
                conn.send_packet(packet);
                busy = true;
            }
            conn.flush(true);
        }

        let before = peers.len();
        peers.retain(|conn| {
            if conn.check_timeout() {
                println!("Peer {} gone\n{}", conn.peer_name(), conn.statistics());
                false
            } else {
                true
            }
        });
        if once && peers.len() < before {
            return Ok(());
        }

        if !busy {
            thread::sleep(IDLE_SLEEP);
        }
    }
}
