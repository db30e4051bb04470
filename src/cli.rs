//! CLI argument parsing

use clap::{Parser, Subcommand};
use fabric_host::{DEFAULT_BAUD, DEFAULT_TIMEOUT_MS};
use std::path::PathBuf;

/// Parse a string of hex digits (optionally `0x` prefixed) into bytes
fn parse_hex_bytes(s: &str) -> Result<HexBytes, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if !digits.is_ascii() || digits.len() % 2 != 0 {
        return Err("Hex data needs an even number of hex digits".to_string());
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| format!("Invalid hex value: {}", e))
        })
        .collect::<Result<Vec<u8>, String>>()
        .map(HexBytes)
}

/// Bytes given on the command line as hex
#[derive(Debug, Clone)]
pub struct HexBytes(pub Vec<u8>);

#[derive(Parser)]
#[command(name = "fabric-prog")]
#[command(author, version, about = "Fabric FPGA bitstream programmer", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Print results as one JSON object per line
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Only print command results
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Serial port of the programmer (auto-detected if not specified)
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// Serial baud rate
    #[arg(long, global = true, default_value_t = DEFAULT_BAUD)]
    pub baud: u32,

    /// Response timeout in milliseconds
    #[arg(long, global = true, default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout: u32,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List serial ports with a programmer attached
    List,

    /// Query the programmer and its FPGA
    Test,

    /// Load a bitstream into the FPGA
    Program {
        /// Bitstream file
        input: PathBuf,

        /// Also store the bitstream in programmer flash for power-on loading
        #[arg(long)]
        save: bool,
    },

    /// Show the bitstream stored in programmer flash
    QueryFlash,

    /// Load the FPGA from the stored bitstream
    ProgramFromFlash,

    /// Invalidate the stored bitstream
    ClearFlash,

    /// Restart the programmer
    Reboot,

    /// Send bytes to the programmer and check they come back
    Echo {
        /// Payload as hex, e.g. deadbeef
        #[arg(value_parser = parse_hex_bytes)]
        data: HexBytes,
    },
}
