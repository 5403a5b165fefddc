//! Modbus transport abstraction.
//!
//! [`ModbusTransport`] is the seam between the device channel and the wire:
//! a holding-register read and a multiple-register write against one slave
//! device. Implementations:
//!
//! - [`TcpTransport`]: tokio-modbus TCP client behind a `tokio::sync::Mutex`
//!   (the client context requires `&mut self`).
//! - `RtuTransport` (feature `serial`): the same over an RS-485 serial link.
//! - [`crate::mock::MockTransport`]: scriptable in-memory device for tests.
//!
//! Every call carries an explicit deadline. A dead link surfaces as
//! [`RigError::TransportTimeout`] instead of hanging the execution task.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

use rig_core::error::{RigError, RigResult};

/// Default per-call deadline. Settle delays are waited outside the
/// transport, so individual register exchanges are short.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Register-level access to one slave device.
#[async_trait]
pub trait ModbusTransport: Send + Sync {
    /// Read `count` holding registers starting at `address`.
    async fn read_holding_registers(&self, address: u16, count: u16) -> RigResult<Vec<u16>>;

    /// Write `values` to consecutive holding registers starting at `address`.
    async fn write_multiple_registers(&self, address: u16, values: &[u16]) -> RigResult<()>;

    /// Release the underlying connection. Default is a no-op for
    /// transports without one.
    async fn close(&self) -> RigResult<()> {
        Ok(())
    }
}

/// Modbus/TCP transport to one slave device.
pub struct TcpTransport {
    ctx: Mutex<Context>,
    io_timeout: Duration,
}

impl TcpTransport {
    /// Connect to `addr` and address `slave_id` on that link.
    pub async fn connect(addr: SocketAddr, slave_id: u8) -> RigResult<Self> {
        Self::connect_with_timeout(addr, slave_id, DEFAULT_IO_TIMEOUT).await
    }

    /// Connect with an explicit per-call deadline.
    pub async fn connect_with_timeout(
        addr: SocketAddr,
        slave_id: u8,
        io_timeout: Duration,
    ) -> RigResult<Self> {
        tracing::debug!(%addr, slave_id, "connecting modbus/tcp transport");
        let ctx = timeout(io_timeout, tcp::connect_slave(addr, Slave(slave_id)))
            .await
            .map_err(|_| RigError::TransportTimeout {
                op: format!("connect {}", addr),
                timeout_ms: io_timeout.as_millis() as u64,
            })?
            .map_err(|e| RigError::transport(format!("connect {}", addr), e))?;
        Ok(Self {
            ctx: Mutex::new(ctx),
            io_timeout,
        })
    }
}

#[async_trait]
impl ModbusTransport for TcpTransport {
    async fn read_holding_registers(&self, address: u16, count: u16) -> RigResult<Vec<u16>> {
        let op = format!("read_holding_registers {:#06x}", address);
        let mut ctx = self.ctx.lock().await;
        timeout(self.io_timeout, ctx.read_holding_registers(address, count))
            .await
            .map_err(|_| RigError::TransportTimeout {
                op: op.clone(),
                timeout_ms: self.io_timeout.as_millis() as u64,
            })?
            .map_err(|e| RigError::transport(op.as_str(), e))?
            .map_err(|exc| RigError::transport(op.as_str(), exc))
    }

    async fn write_multiple_registers(&self, address: u16, values: &[u16]) -> RigResult<()> {
        let op = format!("write_multiple_registers {:#06x}", address);
        let mut ctx = self.ctx.lock().await;
        timeout(
            self.io_timeout,
            ctx.write_multiple_registers(address, values),
        )
        .await
        .map_err(|_| RigError::TransportTimeout {
            op: op.clone(),
            timeout_ms: self.io_timeout.as_millis() as u64,
        })?
        .map_err(|e| RigError::transport(op.as_str(), e))?
        .map_err(|exc| RigError::transport(op.as_str(), exc))
    }

    async fn close(&self) -> RigResult<()> {
        let mut ctx = self.ctx.lock().await;
        timeout(self.io_timeout, ctx.disconnect())
            .await
            .map_err(|_| RigError::TransportTimeout {
                op: "disconnect".to_string(),
                timeout_ms: self.io_timeout.as_millis() as u64,
            })?
            .map_err(|e| RigError::transport("disconnect", e))
    }
}

/// Modbus RTU transport over a serial link.
#[cfg(feature = "serial")]
pub mod rtu {
    use super::*;
    use tokio_serial::SerialPortBuilderExt;

    /// Modbus RTU transport to one slave device on a shared serial bus.
    pub struct RtuTransport {
        ctx: Mutex<Context>,
        io_timeout: Duration,
    }

    impl RtuTransport {
        /// Open `port_path` at `baud_rate` (8N1, no flow control) and
        /// address `slave_id` on the bus.
        pub async fn open(
            port_path: &str,
            baud_rate: u32,
            slave_id: u8,
            io_timeout: Duration,
        ) -> RigResult<Self> {
            tracing::debug!(port_path, baud_rate, slave_id, "opening modbus rtu transport");
            let port = tokio_serial::new(port_path, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
                .map_err(|e| RigError::transport(format!("open {}", port_path), e))?;
            let ctx = tokio_modbus::client::rtu::attach_slave(port, Slave(slave_id));
            Ok(Self {
                ctx: Mutex::new(ctx),
                io_timeout,
            })
        }
    }

    #[async_trait]
    impl ModbusTransport for RtuTransport {
        async fn read_holding_registers(&self, address: u16, count: u16) -> RigResult<Vec<u16>> {
            let op = format!("read_holding_registers {:#06x}", address);
            let mut ctx = self.ctx.lock().await;
            timeout(self.io_timeout, ctx.read_holding_registers(address, count))
                .await
                .map_err(|_| RigError::TransportTimeout {
                    op: op.clone(),
                    timeout_ms: self.io_timeout.as_millis() as u64,
                })?
                .map_err(|e| RigError::transport(op.as_str(), e))?
                .map_err(|exc| RigError::transport(op.as_str(), exc))
        }

        async fn write_multiple_registers(&self, address: u16, values: &[u16]) -> RigResult<()> {
            let op = format!("write_multiple_registers {:#06x}", address);
            let mut ctx = self.ctx.lock().await;
            timeout(
                self.io_timeout,
                ctx.write_multiple_registers(address, values),
            )
            .await
            .map_err(|_| RigError::TransportTimeout {
                op: op.clone(),
                timeout_ms: self.io_timeout.as_millis() as u64,
            })?
            .map_err(|e| RigError::transport(op.as_str(), e))?
            .map_err(|exc| RigError::transport(op.as_str(), exc))
        }
    }
}
