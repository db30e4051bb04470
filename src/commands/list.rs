//! List command implementation

use crate::output::{DeviceRecord, ListRecord, Output, PortRecord};
use fabric_host::discover;

/// List every serial port a programmer answers on
pub fn list_devices(out: &Output, baud: u32) -> Result<(), Box<dyn std::error::Error>> {
    let devices = discover(Some(baud))?;
    out.data(&ListRecord {
        devices: devices
            .iter()
            .map(|device| PortRecord {
                port: device.port.clone(),
                device: DeviceRecord::from(&device.info),
            })
            .collect(),
    });
    if devices.is_empty() {
        out.print("No programmers found.");
        return Ok(());
    }

    out.print(format_args!("{:<20} {:<18} {:<24} Ready", "Port", "Programmer", "FPGA"));
    out.print("-".repeat(70));
    for device in devices {
        out.print(format_args!(
            "{:<20} {:<18} {:<24} {}",
            device.port,
            device.info.uid_hex(),
            device.info.fpga_id.to_string(),
            if device.info.ready { "yes" } else { "no" }
        ));
    }
    Ok(())
}
