//! Built-in register tables for each device type.
//!
//! One [`RegisterMap`] per device family, built once at driver construction
//! and shared read-only. Calibration tuples follow the device manuals for
//! the rigs the system was commissioned with; per-setup configuration can
//! replace individual descriptors via [`apply_overrides`].

use rig_core::codec::{RegisterDescriptor, RegisterMap};
use rig_core::config::CalibrationOverride;

/// Registers of the AC machine drive.
///
/// Control/status words and the fault register are identity registers; the
/// references and actual values carry affine calibrations.
pub fn ac_drive_registers() -> RegisterMap {
    RegisterMap::new([
        RegisterDescriptor::identity("control_word", 0x0000),
        // 0..20000 raw over the drive's 0..1500 rpm nominal range
        RegisterDescriptor::scaled("speed_ref", 0x0001, "rpm", 0, 20_000, 0, 0.0, 1500.0),
        RegisterDescriptor::scaled("max_current", 0x0002, "A", 0, 10_000, 0, 0.0, 25.0),
        RegisterDescriptor::scaled("accel_time", 0x0003, "s", 0, 3_000, 0, 0.0, 300.0),
        RegisterDescriptor::scaled("decel_time", 0x0004, "s", 0, 3_000, 0, 0.0, 300.0),
        RegisterDescriptor::identity("status_word", 0x0010),
        RegisterDescriptor::identity("active_fault", 0x0011),
        RegisterDescriptor::scaled("speed_act", 0x0066, "rpm", 0, 20_000, 0, 0.0, 1500.0),
        // Signed torque: raw 5000 is zero torque
        RegisterDescriptor::scaled("torque_act", 0x0067, "Nm", 0, 10_000, -5_000, -50.0, 50.0),
        RegisterDescriptor::scaled("current_act", 0x0068, "A", 0, 10_000, 0, 0.0, 25.0),
        RegisterDescriptor::scaled("temperature", 0x0069, "C", 0, 1_000, 0, 0.0, 150.0),
    ])
}

/// Registers of the DC machine drive.
pub fn dc_drive_registers() -> RegisterMap {
    RegisterMap::new([
        RegisterDescriptor::identity("control_word", 0x0000),
        RegisterDescriptor::scaled("armature_ref", 0x0001, "V", 0, 4_000, 0, 0.0, 400.0),
        RegisterDescriptor::scaled("field_ref", 0x0002, "A", 0, 1_000, 0, 0.0, 2.0),
        RegisterDescriptor::identity("status_word", 0x0010),
        RegisterDescriptor::identity("active_fault", 0x0011),
        RegisterDescriptor::scaled("armature_act", 0x0020, "V", 0, 4_000, 0, 0.0, 400.0),
        RegisterDescriptor::scaled("armature_current", 0x0021, "A", 0, 10_000, 0, 0.0, 20.0),
        RegisterDescriptor::scaled("speed_act", 0x0022, "rpm", 0, 16_384, 0, 0.0, 2000.0),
        RegisterDescriptor::scaled("torque_act", 0x0023, "Nm", 0, 8_000, -4_000, -40.0, 40.0),
    ])
}

/// Registers of the three-phase power meter.
pub fn power_meter_registers() -> RegisterMap {
    RegisterMap::new([
        RegisterDescriptor::scaled("voltage_l1", 0x0000, "V", 0, 10_000, 0, 0.0, 500.0),
        RegisterDescriptor::scaled("voltage_l2", 0x0001, "V", 0, 10_000, 0, 0.0, 500.0),
        RegisterDescriptor::scaled("voltage_l3", 0x0002, "V", 0, 10_000, 0, 0.0, 500.0),
        RegisterDescriptor::scaled("current_l1", 0x0003, "A", 0, 10_000, 0, 0.0, 10.0),
        RegisterDescriptor::scaled("current_l2", 0x0004, "A", 0, 10_000, 0, 0.0, 10.0),
        RegisterDescriptor::scaled("current_l3", 0x0005, "A", 0, 10_000, 0, 0.0, 10.0),
        // Raw 0..2000 with offset -1000 for leading/lagging sign
        RegisterDescriptor::scaled("power_factor", 0x0006, "", 0, 2_000, -1_000, -1.0, 1.0),
        RegisterDescriptor::scaled("frequency", 0x0007, "Hz", 0, 10_000, 0, 0.0, 100.0),
        RegisterDescriptor::scaled("active_power", 0x0008, "W", 0, 1_000_000, 0, 0.0, 10_000.0)
            .wide(),
    ])
}

/// Registers of the radiation-counting apparatus.
pub fn radiation_counter_registers() -> RegisterMap {
    RegisterMap::new([
        RegisterDescriptor::identity("control_word", 0x0000),
        RegisterDescriptor::identity("count_window", 0x0001),
        RegisterDescriptor::scaled("source_position", 0x0002, "mm", 0, 4_000, 0, 0.0, 200.0),
        RegisterDescriptor::identity("counts", 0x0010).wide(),
        RegisterDescriptor::scaled("tube_voltage", 0x0012, "V", 0, 4_095, 0, 0.0, 1200.0),
        RegisterDescriptor::identity("status_word", 0x0020),
    ])
}

/// Apply per-setup calibration overrides on top of a built-in table.
pub fn apply_overrides(map: RegisterMap, overrides: &[CalibrationOverride]) -> RegisterMap {
    overrides
        .iter()
        .fold(map, |m, o| m.with_override(o.descriptor()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig_core::codec::{to_engineering, to_raw};

    #[test]
    fn ac_speed_scaling_matches_nameplate() {
        let map = ac_drive_registers();
        let desc = map.get("speed_ref").unwrap();
        assert_eq!(to_raw(1500.0, desc), 20_000);
        assert!((to_engineering(10_000, desc) - 750.0).abs() < 1e-9);
    }

    #[test]
    fn torque_register_is_signed_through_offset() {
        let map = ac_drive_registers();
        let desc = map.get("torque_act").unwrap();
        assert!((to_engineering(5_000, desc) - 0.0).abs() < 1e-9);
        assert!((to_engineering(10_000, desc) - 50.0).abs() < 1e-9);
        assert!((to_engineering(0, desc) + 50.0).abs() < 1e-9);
    }

    #[test]
    fn command_registers_are_identity() {
        for map in [
            ac_drive_registers(),
            dc_drive_registers(),
            radiation_counter_registers(),
        ] {
            assert!(map.get("control_word").unwrap().is_identity());
        }
    }

    #[test]
    fn power_factor_spans_leading_and_lagging() {
        let map = power_meter_registers();
        let desc = map.get("power_factor").unwrap();
        assert!((to_engineering(2_000, desc) - 1.0).abs() < 1e-9);
        assert!((to_engineering(0, desc) + 1.0).abs() < 1e-9);
        assert!((to_engineering(1_000, desc)).abs() < 1e-9);
    }

    #[test]
    fn override_replaces_builtin_calibration() {
        let map = apply_overrides(
            ac_drive_registers(),
            &[rig_core::config::CalibrationOverride {
                register: "speed_ref".into(),
                address: 0x0001,
                words: 1,
                units: "rpm".into(),
                raw_zero: 0,
                raw_full: 20_000,
                raw_offset: 0,
                eng_zero: 0.0,
                eng_full: 3000.0,
            }],
        );
        let desc = map.get("speed_ref").unwrap();
        assert_eq!(to_raw(3000.0, desc), 20_000);
    }
}
