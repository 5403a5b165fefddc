//! Register codec: raw <-> engineering-unit conversion.
//!
//! Each device register carries a calibration tuple `(raw_zero, raw_full,
//! raw_offset, eng_zero, eng_full)`. Conversion is affine, except for
//! command/boolean registers where `eng_full == eng_zero` marks the
//! conversion as identity. Both directions are pure functions over an
//! immutable [`RegisterDescriptor`].
//!
//! Descriptors live in a [`RegisterMap`] built once per device type at driver
//! construction and shared read-only (`Arc`) thereafter. There is no lazily
//! initialised global: the map is constructed explicitly at startup and
//! passed by reference into each device instance.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{RigError, RigResult};

/// Immutable description of one device register.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterDescriptor {
    /// Register name used by drivers (e.g. `"speed_ref"`).
    pub name: String,
    /// Modbus holding-register address of the low word.
    pub address: u16,
    /// Number of 16-bit registers the value occupies (1 or 2). Two-word
    /// values are stored low word first.
    pub words: u8,
    /// Engineering unit label for display (e.g. `"rpm"`).
    pub units: String,
    /// Raw value corresponding to `eng_zero`.
    pub raw_zero: i32,
    /// Raw value corresponding to `eng_full`.
    pub raw_full: i32,
    /// Offset added to the raw value before scaling.
    pub raw_offset: i32,
    /// Engineering value at `raw_zero`.
    pub eng_zero: f64,
    /// Engineering value at `raw_full`. Equal to `eng_zero` for identity
    /// (command/boolean) registers.
    pub eng_full: f64,
}

impl RegisterDescriptor {
    /// Single-word register with affine calibration.
    pub fn scaled(
        name: &str,
        address: u16,
        units: &str,
        raw_zero: i32,
        raw_full: i32,
        raw_offset: i32,
        eng_zero: f64,
        eng_full: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            address,
            words: 1,
            units: units.to_string(),
            raw_zero,
            raw_full,
            raw_offset,
            eng_zero,
            eng_full,
        }
    }

    /// Identity register (command words, fault codes, status bits).
    pub fn identity(name: &str, address: u16) -> Self {
        Self {
            name: name.to_string(),
            address,
            words: 1,
            units: String::new(),
            raw_zero: 0,
            raw_full: 0,
            raw_offset: 0,
            eng_zero: 0.0,
            eng_full: 0.0,
        }
    }

    /// Widen to a two-word (32-bit) value, low register first.
    pub fn wide(mut self) -> Self {
        self.words = 2;
        self
    }

    /// True when conversion is a no-op.
    pub fn is_identity(&self) -> bool {
        self.eng_full == self.eng_zero
    }
}

/// Convert a raw register value into engineering units.
pub fn to_engineering(raw: i32, desc: &RegisterDescriptor) -> f64 {
    if desc.is_identity() {
        return raw as f64;
    }
    (raw + desc.raw_offset) as f64 * (desc.eng_full - desc.eng_zero)
        / (desc.raw_full - desc.raw_zero) as f64
}

/// Convert an engineering value into the raw register representation.
///
/// The algebraic inverse of [`to_engineering`]; the result is truncated to
/// the integer register range.
pub fn to_raw(eng: f64, desc: &RegisterDescriptor) -> i32 {
    if desc.is_identity() {
        return eng as i32;
    }
    (eng * (desc.raw_full - desc.raw_zero) as f64 / (desc.eng_full - desc.eng_zero)) as i32
        - desc.raw_offset
}

/// Immutable registry of the registers one device type exposes.
///
/// Built once at driver construction (optionally with per-setup calibration
/// overrides applied) and shared via [`SharedRegisterMap`].
#[derive(Debug, Default, Clone)]
pub struct RegisterMap {
    registers: HashMap<String, RegisterDescriptor>,
}

/// A register map shared read-only between a driver and its channel.
pub type SharedRegisterMap = Arc<RegisterMap>;

impl RegisterMap {
    /// Build a map from a descriptor list. Later entries with a duplicate
    /// name replace earlier ones, which is how calibration overrides from
    /// configuration are applied.
    pub fn new(descriptors: impl IntoIterator<Item = RegisterDescriptor>) -> Self {
        let mut registers = HashMap::new();
        for d in descriptors {
            registers.insert(d.name.clone(), d);
        }
        Self { registers }
    }

    /// Look up a register by name.
    ///
    /// An unknown name is a caller bug or a configuration mismatch and is
    /// surfaced as [`RigError::UnknownRegister`].
    pub fn get(&self, name: &str) -> RigResult<&RegisterDescriptor> {
        self.registers
            .get(name)
            .ok_or_else(|| RigError::UnknownRegister(name.to_string()))
    }

    /// Replace a descriptor, keeping the map otherwise intact.
    pub fn with_override(mut self, desc: RegisterDescriptor) -> Self {
        self.registers.insert(desc.name.clone(), desc);
        self
    }

    /// Number of registers defined.
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    /// True when no registers are defined.
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Wrap into the shared read-only handle.
    pub fn shared(self) -> SharedRegisterMap {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speed_desc() -> RegisterDescriptor {
        // 0..20000 raw maps to 0..1500 rpm
        RegisterDescriptor::scaled("speed_act", 0x0066, "rpm", 0, 20_000, 0, 0.0, 1500.0)
    }

    #[test]
    fn affine_round_trip_within_one_unit() {
        let desc = speed_desc();
        for eng in [0.0, 1.0, 137.0, 750.0, 1499.0, 1500.0] {
            let raw = to_raw(eng, &desc);
            let back = to_engineering(raw, &desc);
            assert!(
                (back - eng).abs() <= 1.0,
                "round trip of {} gave {} (raw {})",
                eng,
                back,
                raw
            );
        }
    }

    #[test]
    fn affine_with_offset() {
        // Temperature: raw 0..1000 with offset -400 maps to -40..60 C
        let desc =
            RegisterDescriptor::scaled("temp", 0x0010, "C", 0, 1000, -400, -40.0, 60.0);
        let raw = to_raw(0.0, &desc);
        assert_eq!(raw, 400);
        assert!((to_engineering(400, &desc) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn identity_registers_pass_through_exactly() {
        let desc = RegisterDescriptor::identity("control_word", 0x0000);
        assert!(desc.is_identity());
        assert_eq!(to_engineering(0x047F, &desc), 0x047F as f64);
        assert_eq!(to_raw(0x047F as f64, &desc), 0x047F);
    }

    #[test]
    fn unknown_register_is_an_error() {
        let map = RegisterMap::new([speed_desc()]);
        assert!(map.get("speed_act").is_ok());
        let err = map.get("no_such_register").unwrap_err();
        assert!(matches!(err, RigError::UnknownRegister(name) if name == "no_such_register"));
    }

    #[test]
    fn override_replaces_descriptor() {
        let map = RegisterMap::new([speed_desc()]).with_override(RegisterDescriptor::scaled(
            "speed_act",
            0x0066,
            "rpm",
            0,
            20_000,
            0,
            0.0,
            3000.0,
        ));
        assert_eq!(map.len(), 1);
        let desc = map.get("speed_act").unwrap();
        assert_eq!(desc.eng_full, 3000.0);
    }
}
