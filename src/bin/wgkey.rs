//! wgkey - print the tunnel key wgdriver derives for an endpoint
//!
//! Useful for configuring the remote peer, which needs the public key of
//! every container address it should accept.

use anyhow::{Context, Result};
use clap::Parser;

use wgdriver::keys;

/// Derive the WireGuard key of an endpoint from its network seed and address
#[derive(Parser)]
#[command(name = "wgkey")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Additional derivation salt (base64)
    #[arg(short, long, default_value = keys::DEFAULT_ADDITIONAL)]
    add: String,

    /// Print the public key instead of the private key
    #[arg(short, long)]
    public: bool,

    /// Network seed (base64)
    seed: String,

    /// Endpoint IPv4 address
    ipaddr: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let private = keys::derive_private_key(&cli.seed, &cli.ipaddr, &cli.add)
        .with_context(|| format!("cannot derive key for {}", cli.ipaddr))?;

    if cli.public {
        println!("{}", keys::public_key(&private).context("cannot compute public key")?);
    } else {
        println!("{}", private);
    }

    Ok(())
}
