//! Console output for people and for scripts
//!
//! In JSON mode every line on stdout is one object tagged with `t`:
//! `data` records carry command results, `info` and `progress` records
//! carry status text, and `error` records end a failed run.

use fabric_host::{DeviceInfo, FlashInfo};
use serde::Serialize;
use std::fmt::Display;

/// How results are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Results and status messages
    Normal,
    /// Results only
    Quiet,
    /// One JSON object per line
    Json,
}

impl OutputMode {
    /// Mode selected by the global flags; `--json` wins over `--quiet`
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if json {
            Self::Json
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }
}

#[derive(Serialize)]
struct Tagged<'a, T> {
    t: &'a str,
    #[serde(flatten)]
    body: T,
}

#[derive(Serialize)]
struct Message<'a> {
    msg: &'a str,
    c: i32,
}

/// Result of `test`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// 1 when the FPGA is a supported part
    pub status: u8,
    pub fpga_device_id: u32,
    pub fpga_name: Option<&'static str>,
    pub uid: String,
}

impl From<&DeviceInfo> for DeviceRecord {
    fn from(info: &DeviceInfo) -> Self {
        Self {
            status: info.ready as u8,
            fpga_device_id: info.fpga_id.0,
            fpga_name: info.fpga_id.name(),
            uid: info.uid_hex(),
        }
    }
}

/// One programmer found by `list`
#[derive(Debug, Serialize)]
pub struct PortRecord {
    pub port: String,
    #[serde(flatten)]
    pub device: DeviceRecord,
}

/// Result of `list`
#[derive(Debug, Serialize)]
pub struct ListRecord {
    pub devices: Vec<PortRecord>,
}

/// Result of `query-flash`
#[derive(Debug, Serialize)]
pub struct FlashRecord {
    #[serde(rename = "hasValidBitstream")]
    pub valid: bool,
    #[serde(rename = "programOnStartup")]
    pub program_on_startup: bool,
    #[serde(rename = "blockCnt")]
    pub block_count: u32,
    #[serde(rename = "bitStreamSz")]
    pub bitstream_size: u32,
    #[serde(rename = "crc")]
    pub checksum: u8,
}

impl From<Option<FlashInfo>> for FlashRecord {
    fn from(info: Option<FlashInfo>) -> Self {
        match info {
            Some(info) => Self {
                valid: true,
                program_on_startup: info.program_on_startup,
                block_count: info.block_count,
                bitstream_size: info.bitstream_size,
                checksum: info.checksum,
            },
            None => Self {
                valid: false,
                program_on_startup: false,
                block_count: 0,
                bitstream_size: 0,
                checksum: 0,
            },
        }
    }
}

/// Result of `program`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramRecord {
    pub bytes: usize,
    pub blocks: usize,
    pub saved: bool,
    pub seconds: f64,
}

/// Serialize one tagged line
fn render<T: Serialize>(t: &str, body: &T) -> serde_json::Result<String> {
    serde_json::to_string(&Tagged { t, body })
}

/// Writes command output in the selected mode
#[derive(Debug, Clone, Copy)]
pub struct Output {
    mode: OutputMode,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Command result for people; JSON mode reports results with [`Output::data`]
    pub fn print(&self, line: impl Display) {
        if self.mode != OutputMode::Json {
            println!("{}", line);
        }
    }

    /// Status message, hidden by `--quiet`
    pub fn status(&self, line: impl Display) {
        match self.mode {
            OutputMode::Normal => println!("{}", line),
            OutputMode::Quiet => {}
            OutputMode::Json => self.emit("info", &Message { msg: &line.to_string(), c: 0 }),
        }
    }

    /// Progress message, JSON mode only
    pub fn progress(&self, line: impl Display) {
        if self.mode == OutputMode::Json {
            self.emit("progress", &Message { msg: &line.to_string(), c: 0 });
        }
    }

    /// Machine-readable result, JSON mode only
    pub fn data<T: Serialize>(&self, record: &T) {
        if self.mode == OutputMode::Json {
            self.emit("data", record);
        }
    }

    /// Report a failure that ends the run with `code`
    pub fn error(&self, error: impl Display, code: i32) {
        match self.mode {
            OutputMode::Json => self.emit(
                "error",
                &Message {
                    msg: &error.to_string(),
                    c: code,
                },
            ),
            _ => eprintln!("Error: {}", error),
        }
    }

    fn emit<T: Serialize>(&self, t: &str, body: &T) {
        match render(t, body) {
            Ok(line) => println!("{}", line),
            Err(e) => log::error!("Failed to encode {} record: {}", t, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_host::DeviceId;
    use serde_json::{json, Value};

    fn parsed<T: Serialize>(t: &str, body: &T) -> Value {
        serde_json::from_str(&render(t, body).unwrap()).unwrap()
    }

    #[test]
    fn test_mode_from_flags() {
        assert_eq!(OutputMode::from_flags(false, false), OutputMode::Normal);
        assert_eq!(OutputMode::from_flags(false, true), OutputMode::Quiet);
        assert_eq!(OutputMode::from_flags(true, true), OutputMode::Json);
    }

    #[test]
    fn test_device_record_shape() {
        let info = DeviceInfo {
            ready: true,
            fpga_id: DeviceId(0x4111_3043),
            uid: [0xE6, 0x60, 0x58, 0x38, 0x83, 0x2F, 0x1A, 0x2B],
        };
        assert_eq!(
            parsed("data", &DeviceRecord::from(&info)),
            json!({
                "t": "data",
                "status": 1,
                "fpgaDeviceId": 0x4111_3043u32,
                "fpgaName": "LFE5U-85",
                "uid": "e6605838832f1a2b",
            })
        );
    }

    #[test]
    fn test_unsupported_device_record() {
        let info = DeviceInfo {
            ready: false,
            fpga_id: DeviceId(0x1234_5678),
            uid: [0; 8],
        };
        let value = parsed("data", &DeviceRecord::from(&info));
        assert_eq!(value["status"], 0);
        assert_eq!(value["fpgaName"], Value::Null);
    }

    #[test]
    fn test_flash_record_shape() {
        let info = FlashInfo {
            program_on_startup: true,
            block_count: 3,
            bitstream_size: 10_000,
            checksum: 0x5A,
        };
        assert_eq!(
            parsed("data", &FlashRecord::from(Some(info))),
            json!({
                "t": "data",
                "hasValidBitstream": true,
                "programOnStartup": true,
                "blockCnt": 3,
                "bitStreamSz": 10_000,
                "crc": 0x5A,
            })
        );
    }

    #[test]
    fn test_empty_flash_record() {
        let value = parsed("data", &FlashRecord::from(None));
        assert_eq!(value["hasValidBitstream"], false);
        assert_eq!(value["blockCnt"], 0);
    }

    #[test]
    fn test_list_record_flattens_device() {
        let info = DeviceInfo {
            ready: true,
            fpga_id: DeviceId(0x0111_1043),
            uid: [1; 8],
        };
        let record = ListRecord {
            devices: vec![PortRecord {
                port: "/dev/ttyACM0".to_string(),
                device: DeviceRecord::from(&info),
            }],
        };
        let value = parsed("data", &record);
        assert_eq!(value["devices"][0]["port"], "/dev/ttyACM0");
        assert_eq!(value["devices"][0]["fpgaName"], "LFE5U-12/25");
    }

    #[test]
    fn test_message_shape() {
        assert_eq!(
            parsed("error", &Message { msg: "No fabric programmer found", c: 1 }),
            json!({"t": "error", "msg": "No fabric programmer found", "c": 1})
        );
    }
}
