use std::time::Instant;

use std::collections::HashSet;

use chordline::{Id, IdSpace, Testnet};

use clap::Parser;

use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
/// Build an in-process ring and show how many hops lookups take.
struct Cli {
    /// Number of nodes in the ring
    #[arg(long, default_value_t = 64)]
    nodes: usize,
    /// Number of random lookups to route
    #[arg(long, default_value_t = 1000)]
    lookups: usize,
    /// Route only through successors
    #[arg(long)]
    naive: bool,
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::WARN).init();

    let cli = Cli::parse();

    let start = Instant::now();

    let space = IdSpace::default();

    let mut ids = HashSet::new();
    while ids.len() < cli.nodes {
        ids.insert(space.random());
    }
    let ids: Vec<Id> = ids.into_iter().collect();

    let testnet = Testnet::with_config(32, &ids, !cli.naive).expect("failed to build testnet");

    println!(
        "Built a ring of {} nodes in {:?}",
        testnet.nodes.len(),
        start.elapsed()
    );

    let mut histogram = histo::Histogram::with_buckets(10);
    let start = Instant::now();

    for i in 0..cli.lookups {
        let entry = &testnet.nodes[i % testnet.nodes.len()];
        let key = testnet.space().random();

        let lookup = entry.locate_owner(key).expect("lookup failed");
        histogram.add(lookup.hops as u64);
    }

    println!(
        "\nRouted {} lookups in {:?}, hops per lookup:\n",
        cli.lookups,
        start.elapsed()
    );
    println!("{histogram}");
}
