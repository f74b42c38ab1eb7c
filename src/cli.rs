use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(name = "reef-redis")]
#[command(about = "A Redis-compatible in-memory server implemented in Rust")]
#[command(
    long_about = "Reef Redis is an in-memory Redis-compatible server with lists, sorted sets, \
                  streams, blocking reads, transactions, pub/sub and leader/follower replication"
)]
#[command(version)]
pub struct Cli {
    /// Server host to bind to
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Server port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Run as a follower of the given leader, e.g. "localhost 6379"
    #[arg(long)]
    pub replicaof: Option<String>,

    /// Directory holding the snapshot file
    #[arg(long)]
    pub dir: Option<String>,

    /// Snapshot file name inside --dir
    #[arg(long)]
    pub dbfilename: Option<String>,

    /// Configuration file path (JSON format)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Log level implied by the verbosity flags.
    pub fn log_level(&self) -> &'static str {
        if self.debug {
            "trace"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Print example usage
    pub fn print_examples() {
        println!("Examples:");
        println!("  # Start a leader on the default port");
        println!("  {}", env!("CARGO_PKG_NAME"));
        println!();

        println!("  # Start a follower of a local leader");
        println!(
            "  {} --port 6380 --replicaof \"localhost 6379\"",
            env!("CARGO_PKG_NAME")
        );
        println!();

        println!("  # Seed the keyspace from a snapshot file");
        println!(
            "  {} --dir /var/lib/reef --dbfilename dump.rdb",
            env!("CARGO_PKG_NAME")
        );
        println!();

        println!("  # Load from config file");
        println!("  {} --config config.json", env!("CARGO_PKG_NAME"));
        println!();

        println!("  # Verbose logging");
        println!("  {} --verbose", env!("CARGO_PKG_NAME"));
    }
}
