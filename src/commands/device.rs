//! Device identity and maintenance commands

use crate::output::{DeviceRecord, Output};
use fabric_host::{Fabric, Transport};

/// Query the programmer and report what is attached
pub fn run_test<T: Transport>(
    fabric: &mut Fabric<T>,
    out: &Output,
) -> Result<(), Box<dyn std::error::Error>> {
    let info = fabric.query_device()?;
    out.data(&DeviceRecord::from(&info));
    out.print(format_args!("Programmer: {}", info.uid_hex()));
    out.print(format_args!("FPGA:       {}", info.fpga_id));
    if !info.ready {
        return Err(format!("FPGA {} is not supported", info.fpga_id).into());
    }
    out.status("FPGA is ready for programming");
    Ok(())
}

/// Restart the programmer
pub fn run_reboot<T: Transport>(
    fabric: &mut Fabric<T>,
    out: &Output,
) -> Result<(), Box<dyn std::error::Error>> {
    fabric.reboot()?;
    out.status("Reboot requested");
    Ok(())
}

/// Round-trip `data` through the programmer
pub fn run_echo<T: Transport>(
    fabric: &mut Fabric<T>,
    out: &Output,
    data: &[u8],
) -> Result<(), Box<dyn std::error::Error>> {
    let echoed = fabric.echo(data)?;
    if echoed != data {
        return Err(format!("Echo mismatch: sent {:02X?}, got {:02X?}", data, echoed).into());
    }
    out.status(format_args!("Echoed {} bytes", echoed.len()));
    Ok(())
}
