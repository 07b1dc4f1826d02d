//! Cinnabar - A Redis-compatible in-memory key-value server written in pure Rust
//!
//! This is the main entry point for the Cinnabar server.

use std::process;

use cinnabar::config;
use cinnabar::error::Result;
use cinnabar::network::server::Server;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    println!("Starting Cinnabar - Redis-compatible server in Rust");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Parse command-line arguments
    let cli_args = config::parse_cli_args();

    let mut config = config::Config::default();
    config.apply_cli_args(cli_args);

    if let Some((ref host, port)) = config.replicaof {
        println!("Replica of {}:{}", host, port);
    }

    let server = Server::new(config);
    server.run()
}
