//! Programmer discovery
//!
//! Candidate serial ports are probed with QueryDevice. A first pass uses a
//! short timeout so that a machine full of unrelated ports is scanned
//! quickly; ports that stayed silent get a second chance with the normal
//! timeout only if nothing answered the first time.

use crate::client::{DeviceInfo, Fabric, DEFAULT_TIMEOUT_MS};
use crate::error::{FabricError, Result};
use crate::transport::serial::SerialTransport;
use serialport::SerialPortType;

/// Response timeout used in the fast probe pass
pub const PROBE_TIMEOUT_MS: u32 = 100;

/// A serial port with a programmer behind it
#[derive(Debug, Clone)]
pub struct FoundDevice {
    /// Port name
    pub port: String,
    /// What the programmer reported
    pub info: DeviceInfo,
}

/// Serial ports worth probing, USB ports first
pub fn candidate_ports() -> Result<Vec<String>> {
    let mut ports = serialport::available_ports()?;
    ports.sort_by_key(|p| !matches!(p.port_type, SerialPortType::UsbPort(_)));
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Query the programmer on one port
pub fn probe(port: &str, baud: Option<u32>, timeout_ms: u32) -> Result<DeviceInfo> {
    let transport = SerialTransport::open(port, baud)?;
    let mut fabric = Fabric::new(transport);
    fabric.set_timeout(timeout_ms);
    fabric.query_device()
}

/// Probe every candidate port and return the ones that answered
pub fn discover(baud: Option<u32>) -> Result<Vec<FoundDevice>> {
    let ports = candidate_ports()?;
    for timeout_ms in [PROBE_TIMEOUT_MS, DEFAULT_TIMEOUT_MS] {
        let found: Vec<FoundDevice> = ports
            .iter()
            .filter_map(|port| match probe(port, baud, timeout_ms) {
                Ok(info) => {
                    log::debug!("{}: {}", port, info);
                    Some(FoundDevice {
                        port: port.clone(),
                        info,
                    })
                }
                Err(e) => {
                    log::debug!("{}: {}", port, e);
                    None
                }
            })
            .collect();
        if !found.is_empty() {
            return Ok(found);
        }
    }
    Ok(Vec::new())
}

/// First programmer found
pub fn find_first(baud: Option<u32>) -> Result<FoundDevice> {
    discover(baud)?
        .into_iter()
        .next()
        .ok_or(FabricError::NoDevice)
}
