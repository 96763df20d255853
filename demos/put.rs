use std::net::SocketAddr;
use std::time::Instant;

use chordline::{Client, IdSpace};

use clap::Parser;

use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address of any node of the ring
    #[arg(long, default_value = "127.0.0.1:6881")]
    entry: SocketAddr,
    /// Width of identifiers in bits
    #[arg(long, default_value_t = chordline::DEFAULT_ID_BITS)]
    bits: u8,
    /// Key, hashed into the ring
    key: String,
    /// Value to store
    value: String,
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();

    let space = IdSpace::new(cli.bits).expect("invalid bits");
    let client = Client::new(Some(cli.entry)).with_space(space);

    let key = space.hash(cli.key.as_bytes());

    let start = Instant::now();

    match client.store(key, cli.value) {
        Ok(owner) => println!(
            "Stored {:?} on {:?} in {:?} milliseconds",
            key,
            owner,
            start.elapsed().as_millis()
        ),
        Err(error) => println!("Failed to store {:?}: {}", key, error),
    }
}
