//! Serial port transport
//!
//! Low-level serial operations for direct connection to a Grbl controller
//! over USB or RS-232: port enumeration filtered to CNC-typical device
//! names, and a line-oriented transport with bounded-timeout reads.
//!
//! The worker loop is the only caller once a connection is up; the
//! transport owns the OS handle exclusively for the connection's lifetime.

use grblink_core::error::TransportError;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// Result of one bounded read attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete line, terminators stripped
    Line(String),
    /// No complete line arrived before the timeout; not an error
    TimedOut,
}

/// The physical link the engine talks through.
///
/// Real connections use [`SerialTransport`]; tests substitute scripted
/// implementations. Read/write errors after a successful open are fatal to
/// the connection and terminate the worker loop.
pub trait Transport: Send {
    /// Block until a complete line arrives or the timeout elapses
    fn read_line(&mut self, timeout: Duration) -> Result<ReadOutcome, TransportError>;

    /// Write raw bytes to the link
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Release the underlying handle
    fn close(&mut self);
}

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., `/dev/ttyUSB0`, `COM3`)
    pub port_name: String,
    /// User-friendly description
    pub description: String,
    /// Manufacturer name if available
    pub manufacturer: Option<String>,
    /// Serial number if available
    pub serial_number: Option<String>,
    /// USB vendor ID if applicable
    pub vid: Option<u16>,
    /// USB product ID if applicable
    pub pid: Option<u16>,
}

/// List serial ports that look like CNC controller links.
///
/// Filters to the patterns controllers actually enumerate as:
/// - Windows: `COM*`
/// - Linux: `/dev/ttyUSB*`, `/dev/ttyACM*`
/// - macOS: `/dev/cu.usbserial-*`, `/dev/cu.usbmodem*`
pub fn list_ports() -> Result<Vec<SerialPortInfo>, TransportError> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("failed to enumerate serial ports: {}", e);
        TransportError::read(format!("port enumeration failed: {}", e))
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_cnc_port(&port.port_name))
        .map(|port| {
            let mut info = SerialPortInfo {
                port_name: port.port_name.clone(),
                description: describe_port(port),
                manufacturer: None,
                serial_number: None,
                vid: None,
                pid: None,
            };
            if let serialport::SerialPortType::UsbPort(usb) = &port.port_type {
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
                info.manufacturer = usb.manufacturer.clone();
                info.serial_number = usb.serial_number.clone();
            }
            info
        })
        .collect())
}

fn is_cnc_port(port_name: &str) -> bool {
    if port_name.starts_with("COM") && port_name[3..].chars().all(|c| c.is_ascii_digit()) {
        return true;
    }

    if port_name.starts_with("/dev/ttyUSB") || port_name.starts_with("/dev/ttyACM") {
        return true;
    }

    if port_name.starts_with("/dev/cu.usbserial-") || port_name.starts_with("/dev/cu.usbmodem") {
        return true;
    }

    false
}

fn describe_port(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Real serial transport over the `serialport` crate
///
/// Grbl frames every response as an ASCII line ended by `\n` or `\r\n`;
/// reads accumulate raw chunks and hand back one complete line at a time.
pub struct SerialTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
    port_name: String,
    pending: String,
}

impl SerialTransport {
    /// Open a port at 8-N-1 with no flow control, Grbl's wire settings.
    ///
    /// Open failures (busy, missing, permission) are returned as
    /// [`TransportError::OpenFailed`] and never retried here.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            // Short device timeout; line-level timeouts are enforced in
            // read_line so the worker can poll its channels between chunks.
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| {
                tracing::warn!("failed to open serial port {}: {}", port_name, e);
                TransportError::OpenFailed {
                    port: port_name.to_string(),
                    message: e.to_string(),
                }
            })?;

        tracing::info!("opened {} at {} baud", port_name, baud_rate);

        Ok(Self {
            port: Some(port),
            port_name: port_name.to_string(),
            pending: String::new(),
        })
    }

    /// Name of the underlying port
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn take_complete_line(&mut self) -> Option<String> {
        let pos = self.pending.find('\n')?;
        let line: String = self.pending.drain(..=pos).collect();
        Some(line.trim_end_matches(['\n', '\r']).to_string())
    }
}

impl Transport for SerialTransport {
    fn read_line(&mut self, timeout: Duration) -> Result<ReadOutcome, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];

        loop {
            if let Some(line) = self.take_complete_line() {
                return Ok(ReadOutcome::Line(line));
            }

            if Instant::now() >= deadline {
                return Ok(ReadOutcome::TimedOut);
            }

            let port = self.port.as_mut().ok_or(TransportError::Closed)?;
            match port.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => self
                    .pending
                    .push_str(&String::from_utf8_lossy(&chunk[..n])),
                Err(e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(TransportError::read(e)),
            }
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        port.write_all(data).map_err(TransportError::write)?;
        port.flush().map_err(TransportError::write)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::info!("closed {}", self.port_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cnc_port_filter_accepts_usual_suspects() {
        assert!(is_cnc_port("COM3"));
        assert!(is_cnc_port("/dev/ttyUSB0"));
        assert!(is_cnc_port("/dev/ttyACM1"));
        assert!(is_cnc_port("/dev/cu.usbmodem14101"));
    }

    #[test]
    fn cnc_port_filter_rejects_noise() {
        assert!(!is_cnc_port("/dev/ttyS0"));
        assert!(!is_cnc_port("COMX"));
        assert!(!is_cnc_port("/dev/random"));
    }
}
