//! fabric-prog - Bitstream programmer for fabric FPGA boards
//!
//! Talks to the programmer firmware over USB serial to load ECP5 bitstreams,
//! keep a bitstream in the programmer's flash for power-on configuration,
//! and inspect or clear that stored copy.

mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use fabric_host::{find_first, Fabric, SerialTransport};
use output::{Output, OutputMode};

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let out = Output::new(OutputMode::from_flags(cli.json, cli.quiet));

    // Set log level based on verbosity
    match cli.verbose {
        0 if out.mode() == OutputMode::Quiet => log::set_max_level(log::LevelFilter::Warn),
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    if let Err(e) = run(&cli, &out) {
        out.error(e, 1);
        std::process::exit(1);
    }
}

fn run(cli: &Cli, out: &Output) -> Result<(), Box<dyn std::error::Error>> {
    if let Commands::List = cli.command {
        return commands::list_devices(out, cli.baud);
    }

    let mut fabric = connect(cli, out)?;
    match &cli.command {
        Commands::List => Ok(()),
        Commands::Test => commands::run_test(&mut fabric, out),
        Commands::Program { input, save } => commands::run_program(&mut fabric, out, input, *save),
        Commands::QueryFlash => commands::run_query_flash(&mut fabric, out),
        Commands::ProgramFromFlash => commands::run_program_from_flash(&mut fabric, out),
        Commands::ClearFlash => commands::run_clear_flash(&mut fabric, out),
        Commands::Reboot => commands::run_reboot(&mut fabric, out),
        Commands::Echo { data } => commands::run_echo(&mut fabric, out, &data.0),
    }
}

/// Open the requested port, or the first port a programmer answers on
fn connect(cli: &Cli, out: &Output) -> Result<Fabric<SerialTransport>, Box<dyn std::error::Error>> {
    let port = match &cli.port {
        Some(port) => port.clone(),
        None => {
            let found = find_first(Some(cli.baud))?;
            out.status(format_args!("Using programmer on {}", found.port));
            found.port
        }
    };

    let transport = SerialTransport::open(&port, Some(cli.baud))
        .map_err(|e| format!("Failed to open serial port {}: {}", port, e))?;
    let mut fabric = Fabric::new(transport);
    fabric.set_timeout(cli.timeout);
    Ok(fabric)
}
