//! Scriptable in-memory Modbus device.
//!
//! Used by driver and engine tests, and by setups configured with
//! `simulated = true`, so the whole execution path runs without hardware.
//! Behaviour is scripted per register:
//!
//! - `override_readback`: reads of an address return a fixed value no matter
//!   what was written (exercises the write/read-back mismatch path).
//! - `link_registers`: a write to one address is mirrored into another
//!   (e.g. a commanded speed reference appearing on the measured-speed
//!   register, the way a fake drive "reaches" its setpoint instantly).
//! - `on_write_set`: a write to a trigger address stores a value at another
//!   address (e.g. a reset command clearing the active-fault register).
//! - `fail_next_read` / `fail_next_write`: one-shot injected I/O errors.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use rig_core::error::{RigError, RigResult};

use crate::transport::ModbusTransport;

/// A recorded transport operation, for assertions on call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOp {
    Read { address: u16, count: u16 },
    Write { address: u16, values: Vec<u16> },
    Close,
}

#[derive(Default)]
struct MockState {
    registers: HashMap<u16, u16>,
    readback_overrides: HashMap<u16, u16>,
    links: Vec<(u16, u16)>,
    write_rules: Vec<(u16, u16, u16)>,
    fail_next_read: Option<String>,
    fail_next_write: Option<String>,
    log: Vec<MockOp>,
}

/// In-memory Modbus slave with scriptable behaviour.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset a register value.
    pub fn set_register(&self, address: u16, value: u16) {
        self.state.lock().registers.insert(address, value);
    }

    /// Current value of a register, if any write or preset touched it.
    pub fn register(&self, address: u16) -> Option<u16> {
        self.state.lock().registers.get(&address).copied()
    }

    /// Reads of `address` return `value` regardless of writes.
    pub fn override_readback(&self, address: u16, value: u16) {
        self.state.lock().readback_overrides.insert(address, value);
    }

    /// Mirror writes of `src` into `dst`.
    pub fn link_registers(&self, src: u16, dst: u16) {
        self.state.lock().links.push((src, dst));
    }

    /// When `trigger` is written (any value), store `value` at `target`.
    pub fn on_write_set(&self, trigger: u16, target: u16, value: u16) {
        self.state.lock().write_rules.push((trigger, target, value));
    }

    /// Fail the next read with a transport error.
    pub fn fail_next_read(&self, message: &str) {
        self.state.lock().fail_next_read = Some(message.to_string());
    }

    /// Fail the next write with a transport error.
    pub fn fail_next_write(&self, message: &str) {
        self.state.lock().fail_next_write = Some(message.to_string());
    }

    /// Everything the device has been asked to do, in order.
    pub fn log(&self) -> Vec<MockOp> {
        self.state.lock().log.clone()
    }
}

#[async_trait]
impl ModbusTransport for MockTransport {
    async fn read_holding_registers(&self, address: u16, count: u16) -> RigResult<Vec<u16>> {
        let mut state = self.state.lock();
        state.log.push(MockOp::Read { address, count });

        if let Some(message) = state.fail_next_read.take() {
            return Err(RigError::transport("read_holding_registers", message));
        }

        let mut out = Vec::with_capacity(count as usize);
        for i in 0..count {
            let addr = address + i;
            let value = state
                .readback_overrides
                .get(&addr)
                .or_else(|| state.registers.get(&addr))
                .copied()
                .unwrap_or(0);
            out.push(value);
        }
        Ok(out)
    }

    async fn write_multiple_registers(&self, address: u16, values: &[u16]) -> RigResult<()> {
        let mut state = self.state.lock();
        state.log.push(MockOp::Write {
            address,
            values: values.to_vec(),
        });

        if let Some(message) = state.fail_next_write.take() {
            return Err(RigError::transport("write_multiple_registers", message));
        }

        for (i, value) in values.iter().enumerate() {
            let addr = address + i as u16;
            state.registers.insert(addr, *value);

            let links: Vec<u16> = state
                .links
                .iter()
                .filter(|(src, _)| *src == addr)
                .map(|(_, dst)| *dst)
                .collect();
            for dst in links {
                state.registers.insert(dst, *value);
            }

            let rules: Vec<(u16, u16)> = state
                .write_rules
                .iter()
                .filter(|(trigger, _, _)| *trigger == addr)
                .map(|(_, target, v)| (*target, *v))
                .collect();
            for (target, v) in rules {
                state.registers.insert(target, v);
            }
        }
        Ok(())
    }

    async fn close(&self) -> RigResult<()> {
        self.state.lock().log.push(MockOp::Close);
        Ok(())
    }
}
