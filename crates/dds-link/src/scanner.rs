//! Serial port scanner
//!
//! Calibration records may name a microcontroller by its USB serial number
//! instead of a device path, since paths change between reboots. This module
//! enumerates ports and maps serial numbers back to paths.

use serialport::{available_ports, SerialPortType};
use tracing::{debug, info, warn};

/// Information about a serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., /dev/ttyACM0, COM3)
    pub port: String,
    /// USB Vendor ID (if USB)
    pub vid: Option<u16>,
    /// USB Product ID (if USB)
    pub pid: Option<u16>,
    /// USB serial number (if available)
    pub serial_number: Option<String>,
    /// USB product string
    pub product: Option<String>,
}

impl SerialPortInfo {
    fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(usb) => Self {
                port: name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                serial_number: usb.serial_number.clone(),
                product: usb.product.clone(),
            },
            _ => Self {
                port: name,
                vid: None,
                pid: None,
                serial_number: None,
                product: None,
            },
        }
    }
}

/// Serial port scanner
#[derive(Debug, Default)]
pub struct PortScanner;

impl PortScanner {
    /// Create a new scanner
    pub fn new() -> Self {
        Self
    }

    /// Enumerate all available serial ports
    pub fn enumerate_ports(&self) -> Result<Vec<SerialPortInfo>, serialport::Error> {
        let ports = available_ports()?
            .into_iter()
            .map(|p| SerialPortInfo::from_serialport(p.port_name, &p.port_type))
            .collect::<Vec<_>>();

        debug!("Found {} serial port(s)", ports.len());
        Ok(ports)
    }

    /// Find the port whose USB serial number equals `serial_number`
    pub fn find_by_serial_number(
        &self,
        serial_number: &str,
    ) -> Result<Option<SerialPortInfo>, serialport::Error> {
        Ok(match_serial_number(self.enumerate_ports()?, serial_number))
    }
}

fn match_serial_number(ports: Vec<SerialPortInfo>, serial_number: &str) -> Option<SerialPortInfo> {
    ports
        .into_iter()
        .find(|p| p.serial_number.as_deref() == Some(serial_number))
}

/// Map a port identifier to a device path
///
/// A USB serial number is looked up among the attached ports; anything that
/// does not match one is taken to be a path already.
pub fn resolve_port_name(port_id: &str) -> String {
    match PortScanner::new().find_by_serial_number(port_id) {
        Ok(Some(info)) => {
            info!("Serial number {} is on {}", port_id, info.port);
            info.port
        }
        Ok(None) => port_id.to_string(),
        Err(e) => {
            warn!("Port enumeration failed, using {} as a path: {}", port_id, e);
            port_id.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    fn usb(name: &str, serial: Option<&str>) -> SerialPortInfo {
        let usb_info = SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x2341,
            pid: 0x0043,
            serial_number: serial.map(str::to_string),
            manufacturer: Some("Arduino".to_string()),
            product: Some("Uno".to_string()),
        });
        SerialPortInfo::from_serialport(name.to_string(), &usb_info)
    }

    #[test]
    fn test_serial_port_info_from_usb() {
        let info = usb("/dev/ttyACM0", Some("85736323838351F0E1A1"));

        assert_eq!(info.vid, Some(0x2341));
        assert_eq!(info.pid, Some(0x0043));
        assert_eq!(info.serial_number.as_deref(), Some("85736323838351F0E1A1"));
    }

    #[test]
    fn test_match_serial_number() {
        let ports = vec![
            usb("/dev/ttyACM0", Some("AAA")),
            usb("/dev/ttyACM1", Some("BBB")),
            usb("/dev/ttyS0", None),
        ];

        let found = match_serial_number(ports.clone(), "BBB").unwrap();
        assert_eq!(found.port, "/dev/ttyACM1");
        assert!(match_serial_number(ports, "CCC").is_none());
    }
}
