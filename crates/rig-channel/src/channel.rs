//! DeviceChannel: verified register writes with settle delays.
//!
//! A channel binds one [`ModbusTransport`] to one device's
//! [`RegisterMap`]. It owns the correctness-critical write cycle: write the
//! register(s), immediately read them back, and fail on any difference —
//! silent write failures on noisy links are detected here, not in the
//! drivers. Only a verified write runs its settle delay, during which a
//! caller-supplied keep-alive hook is invoked once per elapsed second so a
//! parallel control channel on a shared link does not time out. The same
//! one-second tick observes a pending cancellation: a cancelled settle
//! aborts with [`RigError::Cancelled`] after the write has been verified,
//! so a 10 s ramp wait never outlives a cancel request by more than a tick.
//!
//! Multi-register (32-bit) values are split/assembled low register first,
//! consistently for write and read-back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use rig_core::cancel::CancelToken;
use rig_core::codec::{to_engineering, to_raw, RegisterDescriptor, SharedRegisterMap};
use rig_core::error::{RigError, RigResult};

use crate::transport::ModbusTransport;

/// Hook invoked once per elapsed second while a settle delay runs.
#[async_trait]
pub trait KeepAlive: Send + Sync {
    /// Must swallow its own errors; settle delays never fail through it.
    async fn keep_alive(&self);
}

/// One physical link to one addressable device, plus its register map.
#[derive(Clone)]
pub struct DeviceChannel {
    transport: Arc<dyn ModbusTransport>,
    registers: SharedRegisterMap,
    keep_alive: Option<Arc<dyn KeepAlive>>,
    cancel: Option<CancelToken>,
}

impl DeviceChannel {
    pub fn new(transport: Arc<dyn ModbusTransport>, registers: SharedRegisterMap) -> Self {
        Self {
            transport,
            registers,
            keep_alive: None,
            cancel: None,
        }
    }

    /// Attach the keep-alive hook ticked during settle delays.
    pub fn with_keep_alive(mut self, hook: Arc<dyn KeepAlive>) -> Self {
        self.keep_alive = Some(hook);
        self
    }

    /// Attach the cancellation token observed by the settle tick loop.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// The register map this channel serves.
    pub fn registers(&self) -> &SharedRegisterMap {
        &self.registers
    }

    /// Read a register and convert to engineering units.
    pub async fn read(&self, register: &str) -> RigResult<f64> {
        let desc = self.registers.get(register)?;
        let raw = self.read_words(desc).await?;
        let eng = to_engineering(raw, desc);
        trace!(register, raw, eng, "read");
        Ok(eng)
    }

    /// Read a register without conversion (command words, fault codes).
    pub async fn read_raw(&self, register: &str) -> RigResult<i32> {
        let desc = self.registers.get(register)?;
        self.read_words(desc).await
    }

    /// Write an engineering value with read-back verification, then settle.
    ///
    /// A pending cancellation aborts the settle wait with
    /// [`RigError::Cancelled`]; the write itself has been verified by then.
    pub async fn write_verified(
        &self,
        register: &str,
        eng_value: f64,
        settle: Duration,
    ) -> RigResult<()> {
        let desc = self.registers.get(register)?;
        let raw = to_raw(eng_value, desc);
        self.write_verified_words(desc, raw).await?;
        self.settle(settle).await
    }

    /// Write a raw value with read-back verification, then settle.
    pub async fn write_verified_raw(
        &self,
        register: &str,
        raw: i32,
        settle: Duration,
    ) -> RigResult<()> {
        let desc = self.registers.get(register)?;
        self.write_verified_words(desc, raw).await?;
        self.settle(settle).await
    }

    /// Fire-and-forget read used purely to keep the transport session
    /// alive. Errors are swallowed.
    pub async fn keep_alive_read(&self, register: &str) {
        if let Err(e) = self.read_raw(register).await {
            debug!(register, error = %e, "keep-alive read failed (ignored)");
        }
    }

    /// Close the underlying transport.
    pub async fn close(&self) -> RigResult<()> {
        self.transport.close().await
    }

    async fn read_words(&self, desc: &RegisterDescriptor) -> RigResult<i32> {
        let words = self
            .transport
            .read_holding_registers(desc.address, desc.words as u16)
            .await?;
        if words.len() != desc.words as usize {
            return Err(RigError::transport(
                format!("read {}", desc.name),
                format!("expected {} registers, got {}", desc.words, words.len()),
            ));
        }
        Ok(join_words(&words))
    }

    async fn write_verified_words(&self, desc: &RegisterDescriptor, raw: i32) -> RigResult<()> {
        let values = split_words(raw, desc.words);
        self.transport
            .write_multiple_registers(desc.address, &values)
            .await?;

        // Immediate read-back. A difference means the write was silently
        // dropped or corrupted on the link.
        let read_back = self.read_words(desc).await?;
        if read_back != raw {
            warn!(
                register = %desc.name,
                wrote = raw,
                read = read_back,
                "write/read-back mismatch"
            );
            return Err(RigError::WriteReadMismatch {
                register: desc.name.clone(),
                wrote: raw as u32,
                read: read_back as u32,
            });
        }
        debug!(register = %desc.name, raw, "verified write");
        Ok(())
    }

    /// Block for the settle delay in whole-second ticks. Each tick is both
    /// a keep-alive opportunity and a cancellation check.
    async fn settle(&self, settle: Duration) -> RigResult<()> {
        let mut remaining = settle.as_secs();
        while remaining > 0 {
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                debug!(remaining, "settle aborted by cancellation");
                return Err(RigError::Cancelled);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            remaining -= 1;
            if let Some(hook) = &self.keep_alive {
                hook.keep_alive().await;
            }
        }
        Ok(())
    }
}

/// Assemble registers into a value, low register first.
pub fn join_words(words: &[u16]) -> i32 {
    match words {
        [lo] => *lo as i32,
        [lo, hi] => (((*hi as u32) << 16) | *lo as u32) as i32,
        _ => 0,
    }
}

/// Split a value into registers, low register first.
pub fn split_words(raw: i32, words: u8) -> Vec<u16> {
    let bits = raw as u32;
    if words == 2 {
        vec![(bits & 0xffff) as u16, (bits >> 16) as u16]
    } else {
        vec![(bits & 0xffff) as u16]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use rig_core::codec::{RegisterDescriptor, RegisterMap};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_map() -> RegisterMap {
        RegisterMap::new([
            RegisterDescriptor::identity("control_word", 0x0000),
            RegisterDescriptor::scaled("speed_ref", 0x0001, "rpm", 0, 20_000, 0, 0.0, 1500.0),
            RegisterDescriptor::identity("energy", 0x0010).wide(),
        ])
    }

    struct CountingHook(AtomicU32);

    #[async_trait]
    impl KeepAlive for CountingHook {
        async fn keep_alive(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn verified_write_reads_back_written_value() {
        let transport = Arc::new(MockTransport::new());
        let channel = DeviceChannel::new(transport.clone(), test_map().shared());

        channel
            .write_verified("speed_ref", 750.0, Duration::ZERO)
            .await
            .unwrap();

        // 750 rpm over 0..1500 maps onto 0..20000 raw.
        assert_eq!(transport.register(0x0001), Some(10_000));
        let eng = channel.read("speed_ref").await.unwrap();
        assert!((eng - 750.0).abs() <= 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn mismatch_fails_and_skips_settle() {
        let transport = Arc::new(MockTransport::new());
        // Device echoes a different value than written.
        transport.override_readback(0x0001, 0x0000);

        let hook = Arc::new(CountingHook(AtomicU32::new(0)));
        let channel = DeviceChannel::new(transport, test_map().shared())
            .with_keep_alive(hook.clone());

        let err = channel
            .write_verified("speed_ref", 750.0, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, RigError::WriteReadMismatch { .. }));
        // No settle ran, so the keep-alive hook was never invoked.
        assert_eq!(hook.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_ticks_keep_alive_once_per_second() {
        let transport = Arc::new(MockTransport::new());
        let hook = Arc::new(CountingHook(AtomicU32::new(0)));
        let channel = DeviceChannel::new(transport, test_map().shared())
            .with_keep_alive(hook.clone());

        channel
            .write_verified_raw("control_word", 0x047F, Duration::from_secs(3))
            .await
            .unwrap();

        assert_eq!(hook.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_cancellation_aborts_the_settle() {
        let transport = Arc::new(MockTransport::new());
        let cancel = CancelToken::new();
        cancel.cancel();

        let hook = Arc::new(CountingHook(AtomicU32::new(0)));
        let channel = DeviceChannel::new(transport.clone(), test_map().shared())
            .with_keep_alive(hook.clone())
            .with_cancel(cancel);

        let before = tokio::time::Instant::now();
        let err = channel
            .write_verified("speed_ref", 750.0, Duration::from_secs(10))
            .await
            .unwrap_err();

        assert!(matches!(err, RigError::Cancelled));
        // The abort happened before the first tick elapsed.
        assert_eq!(before.elapsed(), Duration::ZERO);
        assert_eq!(hook.0.load(Ordering::SeqCst), 0);
        // The write itself landed and was verified before the settle began.
        assert_eq!(transport.register(0x0001), Some(10_000));
    }

    struct CancellingHook {
        token: CancelToken,
        ticks: AtomicU32,
    }

    #[async_trait]
    impl KeepAlive for CancellingHook {
        async fn keep_alive(&self) {
            if self.ticks.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                self.token.cancel();
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_settle_stops_within_one_tick() {
        let transport = Arc::new(MockTransport::new());
        let cancel = CancelToken::new();
        let hook = Arc::new(CancellingHook {
            token: cancel.clone(),
            ticks: AtomicU32::new(0),
        });
        let channel = DeviceChannel::new(transport, test_map().shared())
            .with_keep_alive(hook.clone())
            .with_cancel(cancel);

        let before = tokio::time::Instant::now();
        let err = channel
            .write_verified_raw("control_word", 0x047F, Duration::from_secs(10))
            .await
            .unwrap_err();

        assert!(matches!(err, RigError::Cancelled));
        // Cancelled on the second tick, so two seconds elapsed of ten.
        assert_eq!(before.elapsed(), Duration::from_secs(2));
        assert_eq!(hook.ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn wide_registers_round_trip_low_word_first() {
        let transport = Arc::new(MockTransport::new());
        let channel = DeviceChannel::new(transport.clone(), test_map().shared());

        channel
            .write_verified_raw("energy", 0x0012_3456, Duration::ZERO)
            .await
            .unwrap();

        // Low word lands in the first register.
        assert_eq!(transport.register(0x0010), Some(0x3456));
        assert_eq!(transport.register(0x0011), Some(0x0012));
        assert_eq!(channel.read_raw("energy").await.unwrap(), 0x0012_3456);
    }

    #[tokio::test]
    async fn unknown_register_is_distinct_error() {
        let transport = Arc::new(MockTransport::new());
        let channel = DeviceChannel::new(transport, test_map().shared());
        let err = channel.read("not_a_register").await.unwrap_err();
        assert!(matches!(err, RigError::UnknownRegister(_)));
    }

    #[test]
    fn split_and_join_are_inverse() {
        for raw in [0, 1, 0x1234, 0xffff, 0x0001_0000, 0x7fff_ffff] {
            assert_eq!(join_words(&split_words(raw, 2)), raw);
        }
        assert_eq!(join_words(&split_words(0x1234, 1)), 0x1234);
    }
}
