// loopback: show the peek-ahead model on an in-process pair
use netcode::{peek_all, Connection, ConnectionConfig, LocalConnection};

pub fn run(config: ConnectionConfig, count: usize) {
    let (mut a, mut b) = LocalConnection::pair(&config);

    for i in 0..count {
        let size = (i + 1) * 10;
        a.send_data(&vec![i as u8; size]);
    }
    a.flush(true);

    println!("Backlog before draining:");
    for (ahead, packet) in peek_all(&b).iter().enumerate() {
        println!("  peek({}) -> {:?}", ahead, packet);
    }
    println!("Received so far: {} bytes", b.data_received());

    while let Some(packet) = b.get_data() {
        println!("get_data -> {} bytes", packet.len());
    }

    println!("\nSender\n{}", a.statistics());
    println!("\nReceiver\n{}", b.statistics());
}
