//! Device channel layer for remote-rig.
//!
//! Wraps a Modbus link to one slave device behind [`DeviceChannel`]:
//! reliable write/verify/settle cycles, plain reads, keep-alive ticks and
//! 32-bit register pairing. The transport itself is the
//! [`transport::ModbusTransport`] trait — Modbus/TCP by default, Modbus RTU
//! behind the `serial` feature, and a scriptable [`mock::MockTransport`]
//! for tests and simulated setups.

pub mod channel;
pub mod mock;
pub mod transport;

pub use channel::{join_words, split_words, DeviceChannel, KeepAlive};
pub use mock::MockTransport;
pub use transport::{ModbusTransport, TcpTransport, DEFAULT_IO_TIMEOUT};
