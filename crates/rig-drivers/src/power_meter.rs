//! Three-phase power meter driver.
//!
//! Read-only device: per-phase voltages and currents, power factor,
//! frequency and active power. [`PowerMeter::read_measurement`] performs
//! one sequential sampling pass across all registers — atomic from the
//! caller's point of view, with no device-side synchronisation.

use async_trait::async_trait;

use rig_channel::{DeviceChannel, KeepAlive};
use rig_core::error::RigResult;
use rig_core::measurement::Measurement;

/// Driver for the three-phase power meter.
pub struct PowerMeter {
    channel: DeviceChannel,
}

impl PowerMeter {
    pub fn new(channel: DeviceChannel) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &DeviceChannel {
        &self.channel
    }

    /// Phase-to-neutral voltage of phase 1..=3 in volts.
    pub async fn get_voltage(&self, phase: u8) -> RigResult<f64> {
        self.channel.read(phase_register("voltage", phase)).await
    }

    /// Line current of phase 1..=3 in amperes.
    pub async fn get_current(&self, phase: u8) -> RigResult<f64> {
        self.channel.read(phase_register("current", phase)).await
    }

    /// Total power factor, -1.0..=1.0 (negative when leading).
    pub async fn get_power_factor(&self) -> RigResult<f64> {
        self.channel.read("power_factor").await
    }

    /// Supply frequency in hertz.
    pub async fn get_frequency(&self) -> RigResult<f64> {
        self.channel.read("frequency").await
    }

    /// Total active power in watts.
    pub async fn get_active_power(&self) -> RigResult<f64> {
        self.channel.read("active_power").await
    }

    /// One sequential sampling pass across every meter quantity.
    pub async fn read_measurement(&self) -> RigResult<Measurement> {
        let mut m = Measurement::default();
        for phase in 1..=3u8 {
            m.phase_voltage_v[phase as usize - 1] = self.get_voltage(phase).await?;
            m.phase_current_a[phase as usize - 1] = self.get_current(phase).await?;
        }
        m.power_factor = self.get_power_factor().await?;
        m.frequency_hz = self.get_frequency().await?;
        m.active_power_w = self.get_active_power().await?;
        Ok(m)
    }

    /// Fire-and-forget read keeping the session alive.
    pub async fn keep_alive(&self) {
        self.channel.keep_alive_read("frequency").await;
    }
}

fn phase_register(quantity: &str, phase: u8) -> &'static str {
    match (quantity, phase) {
        ("voltage", 1) => "voltage_l1",
        ("voltage", 2) => "voltage_l2",
        ("voltage", 3) => "voltage_l3",
        ("current", 1) => "current_l1",
        ("current", 2) => "current_l2",
        _ => "current_l3",
    }
}

#[async_trait]
impl KeepAlive for PowerMeter {
    async fn keep_alive(&self) {
        PowerMeter::keep_alive(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::power_meter_registers;
    use rig_channel::MockTransport;
    use std::sync::Arc;

    #[tokio::test]
    async fn measurement_pass_reads_all_quantities() {
        let transport = Arc::new(MockTransport::new());
        // 230 V on each phase, 5 A, unity power factor, 50 Hz, 3.45 kW
        for addr in 0x0000..=0x0002u16 {
            transport.set_register(addr, 4_600);
        }
        for addr in 0x0003..=0x0005u16 {
            transport.set_register(addr, 5_000);
        }
        transport.set_register(0x0006, 2_000);
        transport.set_register(0x0007, 5_000);
        transport.set_register(0x0008, (345_000u32 & 0xffff) as u16);
        transport.set_register(0x0009, (345_000u32 >> 16) as u16);

        let meter = PowerMeter::new(DeviceChannel::new(
            transport,
            power_meter_registers().shared(),
        ));
        let m = meter.read_measurement().await.unwrap();

        assert!((m.phase_voltage_v[0] - 230.0).abs() < 0.1);
        assert!((m.phase_current_a[2] - 5.0).abs() < 0.01);
        assert!((m.power_factor - 1.0).abs() < 0.01);
        assert!((m.frequency_hz - 50.0).abs() < 0.01);
        assert!((m.active_power_w - 3_450.0).abs() < 0.1);
    }

    #[tokio::test]
    async fn failed_read_propagates_as_error_not_sentinel() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_next_read("link down");
        let meter = PowerMeter::new(DeviceChannel::new(
            transport,
            power_meter_registers().shared(),
        ));
        assert!(meter.get_voltage(1).await.is_err());
    }
}
