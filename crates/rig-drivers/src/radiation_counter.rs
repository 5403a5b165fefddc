//! Radiation-counting apparatus driver.
//!
//! A Geiger-Mueller tube behind a positioning stage. The source carriage
//! moves on a lead screw, so position changes carry a long settle; the
//! count window is armed once and the accumulated count register is polled
//! while it runs.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use rig_channel::{DeviceChannel, KeepAlive};
use rig_core::error::RigResult;

/// Command word: begin accumulating counts for the configured window.
pub const CMD_START_COUNT: i32 = 0x0001;
/// Command word: abort the window and stop counting.
pub const CMD_STOP_COUNT: i32 = 0x0002;

/// Settle while the source carriage traverses.
const SETTLE_POSITION: Duration = Duration::from_secs(6);
/// Settle after arming or aborting a count window.
const SETTLE_COMMAND: Duration = Duration::from_secs(1);

/// Driver for the radiation-counting apparatus.
pub struct RadiationCounter {
    channel: DeviceChannel,
}

impl RadiationCounter {
    pub fn new(channel: DeviceChannel) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &DeviceChannel {
        &self.channel
    }

    /// Configure the counting window in whole seconds.
    pub async fn set_count_window(&self, seconds: u32) -> RigResult<()> {
        debug!(seconds, "setting count window");
        self.channel
            .write_verified_raw("count_window", seconds as i32, SETTLE_COMMAND)
            .await
    }

    /// Arm the configured window and start accumulating.
    pub async fn start_count(&self) -> RigResult<()> {
        info!("starting count window");
        self.channel
            .write_verified_raw("control_word", CMD_START_COUNT, SETTLE_COMMAND)
            .await
    }

    /// Abort the window.
    pub async fn stop_count(&self) -> RigResult<()> {
        self.channel
            .write_verified_raw("control_word", CMD_STOP_COUNT, SETTLE_COMMAND)
            .await
    }

    /// Accumulated counts since the window was armed.
    pub async fn get_count(&self) -> RigResult<u32> {
        Ok(self.channel.read_raw("counts").await? as u32)
    }

    /// Tube supply voltage in volts.
    pub async fn get_tube_voltage(&self) -> RigResult<f64> {
        self.channel.read("tube_voltage").await
    }

    /// Move the source carriage to `mm` from the tube. Blocks for the
    /// traverse.
    pub async fn set_source_position(&self, mm: f64) -> RigResult<()> {
        info!(mm, "moving source carriage");
        self.channel
            .write_verified("source_position", mm, SETTLE_POSITION)
            .await
    }

    /// Fire-and-forget status read keeping the session alive.
    pub async fn keep_alive(&self) {
        self.channel.keep_alive_read("status_word").await;
    }
}

#[async_trait]
impl KeepAlive for RadiationCounter {
    async fn keep_alive(&self) {
        RadiationCounter::keep_alive(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::radiation_counter_registers;
    use rig_channel::MockTransport;
    use std::sync::Arc;

    fn counter_on(transport: Arc<MockTransport>) -> RadiationCounter {
        RadiationCounter::new(DeviceChannel::new(
            transport,
            radiation_counter_registers().shared(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn count_window_and_start_are_verified_writes() {
        let transport = Arc::new(MockTransport::new());
        let counter = counter_on(transport.clone());

        counter.set_count_window(60).await.unwrap();
        counter.start_count().await.unwrap();

        assert_eq!(transport.register(0x0001), Some(60));
        assert_eq!(transport.register(0x0000), Some(CMD_START_COUNT as u16));
    }

    #[tokio::test(start_paused = true)]
    async fn wide_count_register_assembles_low_word_first() {
        let transport = Arc::new(MockTransport::new());
        // 0x0001_86A0 = 100000 counts
        transport.set_register(0x0010, 0x86A0);
        transport.set_register(0x0011, 0x0001);

        let counter = counter_on(transport);
        assert_eq!(counter.get_count().await.unwrap(), 100_000);
    }

    #[tokio::test(start_paused = true)]
    async fn source_position_scales_to_raw() {
        let transport = Arc::new(MockTransport::new());
        let counter = counter_on(transport.clone());

        counter.set_source_position(100.0).await.unwrap();
        assert_eq!(transport.register(0x0002), Some(2_000));
    }
}
