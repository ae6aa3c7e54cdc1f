//! Serial port handling
//!
//! Port discovery and the tokio-serial backed transport used to reach the
//! instrument.

use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use super::{LinkError, SerialTransport};

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key putting USB-RS232 adapters (ttyUSB*) first, then CDC devices
/// (ttyACM*), each numerically, then everything else by name.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0u8, "ttyUSB"), (1u8, "ttyACM")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (2, 0, basename.to_string())
}

/// List candidate instrument ports in a stable order
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let port = PortInfo::from(info);
                map.entry(port.name.clone()).or_insert(port);
            }
        }
        Err(e) => tracing::warn!("serial port enumeration failed: {}", e),
    }

    // Enumeration misses some adapters on Linux; fall back to /dev
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut ports: Vec<PortInfo> = map.into_values().collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}

/// Opens a named serial port 8N1 without flow control at the requested rate
#[derive(Debug, Clone)]
pub struct TokioSerialTransport {
    port_name: String,
}

impl TokioSerialTransport {
    /// Transport for `port_name`
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
        }
    }

    /// Port this transport opens
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl SerialTransport for TokioSerialTransport {
    type Reader = SerialStream;

    fn open(&mut self, baud_rate: u32) -> Result<SerialStream, LinkError> {
        tracing::debug!(port = %self.port_name, baud_rate, "opening serial port");
        let stream = tokio_serial::new(&self.port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // Only checks that enumeration does not panic
        for port in list_ports() {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_port_sorting() {
        let names = vec![
            "/dev/ttyACM0",
            "/dev/ttyUSB10",
            "COM3",
            "/dev/ttyUSB1",
            "/dev/ttyUSB0",
        ];
        let mut ports: Vec<PortInfo> = names
            .into_iter()
            .map(|n| PortInfo::bare(n.to_string()))
            .collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/ttyUSB10",
                "/dev/ttyACM0",
                "COM3",
            ]
        );
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let mut transport = TokioSerialTransport::new("/dev/does-not-exist-fittest");
        assert!(transport.open(9600).is_err());
    }
}
