//! DCC-EX command station driver.
//!
//! DCC-EX speaks bracket-delimited text packets over a serial line or a TCP
//! socket (port 2560 on WiFi/Ethernet shields). The driver works over any
//! `AsyncRead + AsyncWrite` stream:
//!
//! | Request | Packet |
//! |---------|--------|
//! | Speed/direction | `<t 1 ADDR SPEED DIR>` (forward 1, reverse 0) |
//! | Emergency stop | `<t 1 ADDR -1 1>` |
//! | Track power | `<1>` / `<0>` |
//! | Turnout | `<T ID STATE>` (thrown 1, closed 0) |
//! | Function | `<F ADDR FUNC STATE>` |
//!
//! After connecting, the driver sends a status request `<s>` and waits for
//! the station's `<i...>` banner before it is considered ready.
//!
//! # Example
//!
//! ```rust
//! use rs_trainlink::hal::dccex;
//! use rs_trainlink::Direction;
//!
//! assert_eq!(dccex::speed_packet(3, 40, Direction::Forward), "<t 1 3 40 1>");
//! assert_eq!(dccex::estop_packet(3), "<t 1 3 -1 1>");
//! assert_eq!(dccex::power_packet(true), "<1>");
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::layout::{NodeId, TurnoutState};
use crate::traits::{DeviceDriver, Direction, DriverError};

/// Name the DCC-EX driver is selected by.
pub const DCC_EX_DRIVER_NAME: &str = "DCC-EX";

/// TCP port DCC-EX network shields listen on.
pub const DCC_EX_PORT: u16 = 2560;

/// Status request sent after connecting.
pub const STATUS_REQUEST: &str = "<s>";

// ============================================================================
// Packets
// ============================================================================

/// Speed and direction for one loco. A stopped direction becomes an
/// emergency stop.
pub fn speed_packet(address: u16, speed: u8, direction: Direction) -> String {
    match direction {
        Direction::Stopped => estop_packet(address),
        _ => format!("<t 1 {} {} {}>", address, speed, direction.hardware_code()),
    }
}

/// Emergency stop for one loco.
pub fn estop_packet(address: u16) -> String {
    format!("<t 1 {} -1 1>", address)
}

/// Track power on or off.
pub fn power_packet(on: bool) -> String {
    format!("<{}>", u8::from(on))
}

/// Accessory turnout position.
pub fn turnout_packet(id: NodeId, state: TurnoutState) -> String {
    format!("<T {} {}>", id, state.hardware_code())
}

/// Loco function on or off.
pub fn function_packet(address: u16, function: u8, on: bool) -> String {
    format!("<F {} {} {}>", address, function, u8::from(on))
}

// ============================================================================
// Packet Reader
// ============================================================================

/// Splits an incoming byte stream into `<...>` packets.
///
/// Bytes outside brackets (line endings, diagnostics) are discarded.
#[derive(Debug)]
pub struct PacketReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    /// Wraps a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
        }
    }

    /// Next complete packet, or `None` once the stream ends.
    pub async fn next_packet(&mut self) -> std::io::Result<Option<String>> {
        loop {
            if let Some(packet) = self.take_packet() {
                return Ok(Some(packet));
            }
            let mut chunk = [0u8; 256];
            let read = self.reader.read(&mut chunk).await?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    fn take_packet(&mut self) -> Option<String> {
        let Some(start) = self.buffer.iter().position(|&b| b == b'<') else {
            self.buffer.clear();
            return None;
        };
        let end = start + self.buffer[start..].iter().position(|&b| b == b'>')?;
        let packet = String::from_utf8_lossy(&self.buffer[start..=end]).into_owned();
        self.buffer.drain(..=end);
        Some(packet)
    }
}

// ============================================================================
// Driver
// ============================================================================

type BoxedStream = Box<dyn AsyncStream>;

/// Object-safe bundle of the stream traits the driver needs.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Driver for a DCC-EX command station.
pub struct DccExDriver {
    writer: Mutex<WriteHalf<BoxedStream>>,
    banner: String,
    reader: JoinHandle<()>,
}

impl DccExDriver {
    /// Connects over TCP (`host:port`) and performs the handshake.
    pub async fn connect_tcp(address: &str, timeout: Duration) -> Result<Self, DriverError> {
        let target = if address.contains(':') {
            address.to_string()
        } else {
            format!("{}:{}", address, DCC_EX_PORT)
        };
        info!(target = %target, "Connecting to DCC-EX");
        let stream = TcpStream::connect(&target).await?;
        Self::handshake(stream, timeout).await
    }

    /// Requests status over `stream` and waits up to `timeout` for the
    /// station's `<i...>` banner.
    pub async fn handshake<S>(stream: S, timeout: Duration) -> Result<Self, DriverError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let boxed: BoxedStream = Box::new(stream);
        let (read_half, mut write_half) = tokio::io::split(boxed);
        let mut packets = PacketReader::new(read_half);

        debug!("Tx {}", STATUS_REQUEST);
        write_half.write_all(STATUS_REQUEST.as_bytes()).await?;
        write_half.flush().await?;

        let banner = tokio::time::timeout(timeout, wait_for_banner(&mut packets))
            .await
            .map_err(|_| DriverError::HandshakeTimeout(timeout.as_millis() as u64))??;
        info!(banner = %banner, "DCC-EX ready");

        let reader = tokio::spawn(log_incoming(packets));
        Ok(Self {
            writer: Mutex::new(write_half),
            banner,
            reader,
        })
    }

    async fn send(&self, packet: String) -> Result<(), DriverError> {
        debug!("Tx {}", packet);
        let mut writer = self.writer.lock().await;
        writer.write_all(packet.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

async fn wait_for_banner(
    packets: &mut PacketReader<ReadHalf<BoxedStream>>,
) -> Result<String, DriverError> {
    loop {
        match packets.next_packet().await? {
            Some(packet) if packet.starts_with("<i") => return Ok(packet),
            Some(packet) => debug!("Rx {}", packet),
            None => return Err(DriverError::Closed),
        }
    }
}

async fn log_incoming(mut packets: PacketReader<ReadHalf<BoxedStream>>) {
    loop {
        match packets.next_packet().await {
            Ok(Some(packet)) => debug!("Rx {}", packet),
            Ok(None) => {
                info!("DCC-EX connection closed");
                break;
            }
            Err(err) => {
                warn!(error = %err, "DCC-EX read failed");
                break;
            }
        }
    }
}

impl Drop for DccExDriver {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl DeviceDriver for DccExDriver {
    fn name(&self) -> &str {
        DCC_EX_DRIVER_NAME
    }

    fn message(&self) -> String {
        self.banner
            .trim_start_matches("<i")
            .trim_end_matches('>')
            .trim()
            .to_string()
    }

    async fn set_speed(
        &self,
        address: u16,
        speed: u8,
        direction: Direction,
    ) -> Result<(), DriverError> {
        self.send(speed_packet(address, speed, direction)).await
    }

    async fn emergency_stop(&self, address: u16) -> Result<(), DriverError> {
        self.send(estop_packet(address)).await
    }

    async fn set_track_power(&self, on: bool) -> Result<(), DriverError> {
        self.send(power_packet(on)).await
    }

    async fn set_turnout(&self, id: NodeId, state: TurnoutState) -> Result<(), DriverError> {
        self.send(turnout_packet(id, state)).await
    }

    async fn set_function(&self, address: u16, function: u8, on: bool) -> Result<(), DriverError> {
        self.send(function_packet(address, function, on)).await
    }

    async fn close(&self) -> Result<(), DriverError> {
        info!("DCC-EX driver closing");
        self.reader.abort();
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }
}
