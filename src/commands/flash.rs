//! Stored bitstream commands

use crate::output::{FlashRecord, Output};
use fabric_host::{Fabric, Transport};

/// Show the stored bitstream
pub fn run_query_flash<T: Transport>(
    fabric: &mut Fabric<T>,
    out: &Output,
) -> Result<(), Box<dyn std::error::Error>> {
    let stored = fabric.query_flash()?;
    out.data(&FlashRecord::from(stored));
    match stored {
        Some(info) => {
            out.print("Stored bitstream:");
            out.print(format_args!("  Size:              {} bytes", info.bitstream_size));
            out.print(format_args!("  Blocks:            {}", info.block_count));
            out.print(format_args!("  Checksum:          0x{:02X}", info.checksum));
            out.print(format_args!(
                "  Program on start:  {}",
                if info.program_on_startup { "yes" } else { "no" }
            ));
        }
        None => out.print("No valid bitstream stored."),
    }
    Ok(())
}

/// Load the FPGA from the stored bitstream
pub fn run_program_from_flash<T: Transport>(
    fabric: &mut Fabric<T>,
    out: &Output,
) -> Result<(), Box<dyn std::error::Error>> {
    fabric.program_from_flash()?;
    out.status("FPGA programmed from stored bitstream");
    Ok(())
}

/// Invalidate the stored bitstream
pub fn run_clear_flash<T: Transport>(
    fabric: &mut Fabric<T>,
    out: &Output,
) -> Result<(), Box<dyn std::error::Error>> {
    fabric.clear_flash()?;
    out.status("Stored bitstream cleared");
    Ok(())
}
