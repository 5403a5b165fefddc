//! Scripted transports for setups configured with `simulated = true`.
//!
//! Each device role gets a [`MockTransport`] preloaded so a simulated run
//! behaves like a healthy rig: references are mirrored into their measured
//! registers, faults are clear and the meter shows a nominal supply.

use std::sync::Arc;

use rig_channel::MockTransport;

/// Scripted transport for one device role.
pub fn transport_for(role: &str) -> Arc<MockTransport> {
    let mock = Arc::new(MockTransport::new());
    match role {
        "ac_drive" => {
            // Commanded speed appears on the measured-speed register.
            mock.link_registers(0x0001, 0x0066);
            mock.set_register(0x0011, 0); // no active fault
            mock.set_register(0x0067, 5_400); // 4 Nm
            mock.set_register(0x0068, 2_100); // 5.25 A
            mock.set_register(0x0069, 280); // 42 degC
        }
        "dc_drive" => {
            mock.link_registers(0x0001, 0x0020);
            mock.set_register(0x0011, 0);
            mock.set_register(0x0021, 3_500); // 7 A armature
            mock.set_register(0x0022, 9_830); // 1200 rpm
            mock.set_register(0x0023, 4_600); // 6 Nm
        }
        "power_meter" => {
            for addr in 0x0000..=0x0002u16 {
                mock.set_register(addr, 4_600); // 230 V
            }
            for addr in 0x0003..=0x0005u16 {
                mock.set_register(addr, 5_200); // 5.2 A
            }
            mock.set_register(0x0006, 1_850); // pf 0.85
            mock.set_register(0x0007, 5_000); // 50 Hz
            mock.set_register(0x0008, (310_000u32 & 0xffff) as u16);
            mock.set_register(0x0009, (310_000u32 >> 16) as u16);
        }
        "radiation_counter" => {
            mock.set_register(0x0012, 3_071); // ~900 V tube supply
            // Counts accumulate once the start command lands.
            mock.on_write_set(0x0000, 0x0010, 0x4D2); // 1234 counts
            mock.set_register(0x0020, 0x0001); // ready
        }
        _ => {}
    }
    mock
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig_channel::transport::ModbusTransport;

    #[tokio::test]
    async fn simulated_drive_reaches_its_setpoint() {
        let mock = transport_for("ac_drive");
        mock.write_multiple_registers(0x0001, &[18_667]).await.unwrap();
        assert_eq!(mock.register(0x0066), Some(18_667));
    }

    #[tokio::test]
    async fn unknown_role_is_a_blank_device() {
        let mock = transport_for("spectrometer");
        assert_eq!(
            mock.read_holding_registers(0x0000, 1).await.unwrap(),
            vec![0]
        );
    }
}
