use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Barcode scan broadcast node: reads a GM812 scanner over serial and
/// broadcasts every scan as a JSON UDP datagram on the local segment.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, env = "SCAN_NODE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the node: probe the scanner, wait for the network, broadcast scans
    Run,

    /// Receive scan broadcasts and print them, one JSON line each
    Listen {
        /// Also append every received line to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Report missing seconds in a JSON-lines scan log
    Gaps {
        /// Scan log produced by `listen --output`
        file: PathBuf,
    },

    /// Broadcast one synthetic scan per second (no scanner needed)
    Simulate {
        /// Stop after this many events
        #[arg(short = 'n', long)]
        count: Option<u64>,
    },

    /// Write a default config file
    Init,
}
