//! Serial channel and port discovery
//!
//! [`SerialChannel`] owns the open device. It is shared between the console
//! (which may close it) and the reader thread (which polls it), so every
//! method takes `&self` and the handle sits behind a mutex.

use crate::config::{Parity, PortConfiguration, StopBits, TRANSPORT_READ_TIMEOUT};
use crate::error::{ChannelError, ConnectionError, TransportFault};
use anyhow::{Context, Result};
use colored::Colorize;
use log::{debug, info, warn};
use serialport::{DataBits, FlowControl, SerialPort};
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// The byte source behind a [`SerialChannel`]
pub trait Transport: Send {
    /// Bytes buffered by the driver and readable without blocking
    fn bytes_available(&mut self) -> io::Result<usize>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl Transport for Box<dyn SerialPort> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        self.bytes_to_read()
            .map(|n| n as usize)
            .map_err(io::Error::from)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }
}

/// An open serial session
pub struct SerialChannel {
    port_name: String,
    transport: Mutex<Option<Box<dyn Transport>>>,
    open: AtomicBool,
}

impl SerialChannel {
    /// Open the device described by `config`
    pub fn open(config: &PortConfiguration) -> Result<Self, ConnectionError> {
        let port_name = config.port_name().to_string();
        let unsupported = |setting: &str| ConnectionError::Unsupported {
            port: port_name.clone(),
            setting: setting.to_string(),
        };

        let stop_bits = match config.stop_bits() {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
            StopBits::OneAndHalf => return Err(unsupported("1.5 stop bits")),
        };
        let parity = match config.parity() {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Mark => return Err(unsupported("mark parity")),
            Parity::Space => return Err(unsupported("space parity")),
        };

        let port = serialport::new(&port_name, config.baud_rate())
            .data_bits(DataBits::Eight)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(FlowControl::None)
            .timeout(TRANSPORT_READ_TIMEOUT)
            .open()
            .map_err(|source| ConnectionError::Open {
                port: port_name.clone(),
                source,
            })?;

        info!("Opened {}", config);
        Ok(Self::from_transport(port_name, Box::new(port)))
    }

    /// Wrap an already open transport
    pub fn from_transport(port_name: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            port_name: port_name.into(),
            transport: Mutex::new(Some(transport)),
            open: AtomicBool::new(true),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Number of bytes ready to read; 0 when none
    pub fn bytes_available(&self) -> Result<usize, ChannelError> {
        let mut guard = self.lock();
        let transport = guard.as_mut().ok_or(ChannelError::Closed)?;

        match transport.bytes_available() {
            Ok(n) => Ok(n),
            Err(e) => Err(self.fault(&mut guard, e).into()),
        }
    }

    /// Read exactly the bytes available right now without waiting for more
    pub fn read_available(&self) -> Result<Vec<u8>, ChannelError> {
        let mut guard = self.lock();
        let transport = guard.as_mut().ok_or(ChannelError::Closed)?;

        let available = match transport.bytes_available() {
            Ok(n) => n,
            Err(e) => return Err(self.fault(&mut guard, e).into()),
        };

        let mut data = vec![0u8; available];
        let mut filled = 0;
        while filled < available {
            let Some(transport) = guard.as_mut() else {
                break;
            };
            match transport.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e)
                    if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) =>
                {
                    break
                }
                Err(e) => return Err(self.fault(&mut guard, e).into()),
            }
        }

        data.truncate(filled);
        Ok(data)
    }

    /// Release the device. Safe to call any number of times.
    pub fn close(&self) {
        let was_open = self.open.swap(false, Ordering::SeqCst);
        if self.lock().take().is_some() {
            debug!("Released {}", self.port_name);
        }
        if was_open {
            info!("Closed {}", self.port_name);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn Transport>>> {
        // The guarded value is just the handle; a panic elsewhere cannot leave it half-updated
        self.transport.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop the handle and mark the channel closed after a transport error
    fn fault(
        &self,
        guard: &mut MutexGuard<'_, Option<Box<dyn Transport>>>,
        error: io::Error,
    ) -> TransportFault {
        warn!("Transport fault on {}: {}", self.port_name, error);
        guard.take();
        self.open.store(false, Ordering::SeqCst);
        TransportFault {
            port: self.port_name.clone(),
            reason: error.to_string(),
        }
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Information about a detected serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub path: String,
    pub port_type: PortType,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortType {
    UsbSerial,
    PciSerial,
    Bluetooth,
    Unknown,
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortType::UsbSerial => write!(f, "USB Serial"),
            PortType::PciSerial => write!(f, "PCI Serial"),
            PortType::Bluetooth => write!(f, "Bluetooth"),
            PortType::Unknown => write!(f, "Unknown"),
        }
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(p: serialport::SerialPortInfo) -> Self {
        let mut info = PortInfo {
            path: p.port_name,
            port_type: PortType::Unknown,
            manufacturer: None,
            product: None,
            serial_number: None,
            vid: None,
            pid: None,
        };

        match p.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                info.port_type = PortType::UsbSerial;
                info.manufacturer = usb.manufacturer;
                info.product = usb.product;
                info.serial_number = usb.serial_number;
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
            }
            serialport::SerialPortType::PciPort => info.port_type = PortType::PciSerial,
            serialport::SerialPortType::BluetoothPort => info.port_type = PortType::Bluetooth,
            serialport::SerialPortType::Unknown => {}
        }

        info
    }
}

/// List all available serial ports
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;
    Ok(ports.into_iter().map(PortInfo::from).collect())
}

/// Pick a port when none was given: the first USB adapter, else the first port
pub fn default_port() -> Option<String> {
    let ports = match list_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!("{:#}", e);
            return None;
        }
    };
    choose_default(&ports)
}

fn choose_default(ports: &[PortInfo]) -> Option<String> {
    ports
        .iter()
        .find(|p| p.port_type == PortType::UsbSerial)
        .or_else(|| ports.first())
        .map(|p| p.path.clone())
}

/// Print formatted list of available serial ports
pub fn print_ports() -> Result<()> {
    let ports = list_ports()?;

    if ports.is_empty() {
        println!("{}", "No serial ports found".yellow());
        println!("\n{}", "Troubleshooting tips:".cyan().bold());
        println!("  1. Connect a USB-to-serial adapter");
        println!("  2. Check if the device is recognized: ls -la /dev/ttyUSB* /dev/ttyACM*");
        println!("  3. Add your user to the 'dialout' group: sudo usermod -aG dialout $USER");
        return Ok(());
    }

    println!("{}", "Available Serial Ports:".green().bold());
    println!("{}", "=".repeat(60));

    for port in ports {
        println!("\n{}: {}", "Port".cyan(), port.path.white().bold());
        println!("  Type: {}", port.port_type);

        if let Some(ref mfg) = port.manufacturer {
            println!("  Manufacturer: {}", mfg);
        }
        if let Some(ref prod) = port.product {
            println!("  Product: {}", prod);
        }
        if let Some(ref sn) = port.serial_number {
            println!("  Serial: {}", sn);
        }
        if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            println!("  VID:PID: {:04x}:{:04x}", vid, pid);
        }
    }

    println!("\n{}", "=".repeat(60));
    println!(
        "{}",
        "Use: uart-logger monitor -p <PORT> to start logging".yellow()
    );

    Ok(())
}
