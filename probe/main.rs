// netcode-probe: exercise the connection layer by hand
mod bench;
mod echo;
mod loopback;
mod ping;

use clap::{Parser, Subcommand, ValueEnum};
use netcode::{ConnectionConfig, Endpoint, Result};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "netcode-probe")]
#[command(about = "Manual checks and benchmarks for netcode connections", long_about = None)]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept peers and echo every packet back
    Echo {
        #[arg(long, value_enum, default_value_t = Backend::Udp)]
        backend: Backend,

        #[arg(long, default_value = "127.0.0.1:4600")]
        bind: String,

        /// Exit after the first peer goes away
        #[arg(long)]
        once: bool,
    },

    /// Send numbered packets to an echo server and time the replies
    Ping {
        #[arg(long, value_enum, default_value_t = Backend::Udp)]
        backend: Backend,

        #[arg(long, default_value = "127.0.0.1:4600")]
        peer: String,

        /// Number of packets
        #[arg(short = 'n', long, default_value_t = 10)]
        count: u32,

        /// Payload size in bytes (at least 4)
        #[arg(short = 's', long, default_value_t = 64)]
        size: usize,
    },

    /// Local pair demo: fill a backlog, walk it with peek, then drain it
    Loopback {
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },

    /// One-way throughput through a connection pair in this process
    Bench {
        #[arg(long, value_enum, default_value_t = Backend::Local)]
        backend: Backend,

        #[arg(short = 'n', long, default_value_t = 10_000)]
        count: usize,

        #[arg(short = 's', long, default_value_t = 256)]
        size: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    Local,
    Udp,
    Tcp,
}

impl Backend {
    pub fn endpoint(self, address: &str) -> Endpoint {
        match self {
            Backend::Local => Endpoint::Local(address.to_string()),
            Backend::Udp => Endpoint::Udp(address.to_string()),
            Backend::Tcp => Endpoint::Tcp(address.to_string()),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let config = ConnectionConfig::from_env();
    config.validate()?;

    match cli.command {
        Commands::Echo { backend, bind, once } => echo::run(&backend.endpoint(&bind), config, once),
        Commands::Ping {
            backend,
            peer,
            count,
            size,
        } => ping::run(&backend.endpoint(&peer), config, count, size),
        Commands::Loopback { count } => {
            loopback::run(config, count);
            Ok(())
        }
        Commands::Bench {
            backend,
            count,
            size,
        } => bench::run(backend, config, count, size),
    }
}
