use std::net::SocketAddr;
use std::sync::mpsc::channel;
use std::time::Duration;

use chordline::{Dht, Id};

use clap::Parser;

use tracing::{info, Level};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
/// Run a ring node until Ctrl+C, then leave the ring gracefully.
struct Cli {
    /// Address to serve on
    #[arg(long, default_value = "127.0.0.1:6881")]
    address: SocketAddr,
    /// Address of any node of the ring to join
    #[arg(long)]
    bootstrap: Option<SocketAddr>,
    /// Position on the ring, defaults to the hash of the address
    #[arg(long)]
    id: Option<u32>,
    /// Width of identifiers in bits
    #[arg(long, default_value_t = chordline::DEFAULT_ID_BITS)]
    bits: u8,
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    let cli = Cli::parse();

    let mut builder = Dht::builder();
    builder.address(cli.address).bits(cli.bits);

    if let Some(id) = cli.id {
        builder.id(Id(id));
    }
    if let Some(bootstrap) = cli.bootstrap {
        builder.bootstrap(bootstrap);
    }

    let dht = builder.build().expect("failed to start node");

    info!(node = ?dht.node(), "Node is running! Press Ctrl+C to leave the ring.");

    let (tx_interrupted, rx_interrupted) = channel();

    ctrlc::set_handler(move || {
        let _ = tx_interrupted.send(());
    })
    .expect("Error setting Ctrl-C handler");

    while rx_interrupted.recv_timeout(Duration::from_secs(10)).is_err() {
        let info = dht.info().expect("node was shutdown");

        info!(
            successor = ?info.successor(),
            predecessor = ?info.predecessor(),
            stored = info.stored(),
            "=== Node Status ==="
        );
    }

    info!("Leaving the ring...");

    match dht.leave() {
        Ok(()) => info!("Left the ring"),
        Err(error) => info!(?error, "Failed to leave the ring"),
    }
}
