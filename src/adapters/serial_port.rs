//! Serial port adapter using the `serialport` crate
//!
//! Implements the `TransportFactory` and `Transport` traits.
//! `SerialTransportFactory` has no instance data, just static methods for
//! listing/opening ports.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::{DataBits, FlowControl, Parity, StopBits};

use crate::domain::{CatError, CatResult, SerialPortInfo};
use crate::ports::{Transport, TransportFactory};

/// Chunk size for each serial read call
const READ_CHUNK_SIZE: usize = 64;

/// Timeout the port is opened with; reads override it per call.
const OPEN_TIMEOUT: Duration = Duration::from_millis(100);

/// Zero-sized factory for opening CAT links over serial ports.
pub struct SerialTransportFactory;

impl TransportFactory for SerialTransportFactory {
    fn list_ports() -> CatResult<Vec<SerialPortInfo>> {
        let ports = serialport::available_ports()
            .map_err(|e| CatError::Io(format!("Failed to list ports: {e}")))?;

        Ok(ports
            .into_iter()
            .map(|p| {
                let port_type = match &p.port_type {
                    serialport::SerialPortType::UsbPort(info) => {
                        format!("USB ({:04X}:{:04X})", info.vid, info.pid)
                    }
                    serialport::SerialPortType::PciPort => "PCI".to_string(),
                    serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                    serialport::SerialPortType::Unknown => "Native".to_string(),
                };
                SerialPortInfo {
                    name: p.port_name,
                    port_type,
                }
            })
            .collect())
    }

    /// Open `port` with the FT-991A CAT framing (8 data bits, no parity,
    /// 2 stop bits, no handshake).
    fn open(port: &str, baud_rate: u32) -> CatResult<Box<dyn Transport>> {
        let serial = serialport::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::Two)
            .flow_control(FlowControl::None)
            .timeout(OPEN_TIMEOUT)
            .open()
            .map_err(|e| CatError::Io(format!("Failed to open {port}: {e}")))?;
        log::info!("Opened {port} at {baud_rate} baud");

        Ok(Box::new(SerialTransport {
            port: serial,
            connected: true,
        }))
    }
}

/// An open serial port wrapping the `serialport` crate.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    connected: bool,
}

impl SerialTransport {
    fn ensure_open(&self) -> CatResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(CatError::Io("Serial port is closed".into()))
        }
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, data: &[u8]) -> CatResult<()> {
        self.ensure_open()?;
        self.port
            .write_all(data)
            .and_then(|()| self.port.flush())
            .map_err(|e| CatError::Io(format!("Write failed: {e}")))
    }

    fn read_available(&mut self, deadline: Instant) -> CatResult<Vec<u8>> {
        self.ensure_open()?;
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        let waiting = self
            .port
            .bytes_to_read()
            .map_err(|e| CatError::Io(format!("Read failed: {e}")))?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if waiting == 0 && remaining.is_zero() {
            return Ok(Vec::new());
        }

        // Bytes already waiting come back at once; otherwise block until
        // the deadline at most.
        let timeout = if waiting > 0 { OPEN_TIMEOUT } else { remaining };
        self.port
            .set_timeout(timeout)
            .map_err(|e| CatError::Io(format!("Failed to set timeout: {e}")))?;
        match self.port.read(&mut chunk) {
            Ok(n) => Ok(chunk[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(CatError::Io(format!("Read failed: {e}"))),
        }
    }

    fn close(&mut self) -> CatResult<()> {
        if self.connected {
            log::info!("Closing serial port");
        }
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
