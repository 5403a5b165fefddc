//! Equipment drivers for remote-rig.
//!
//! One driver per physical device type, all built on the same pattern:
//! domain operations translated into [`rig_channel::DeviceChannel`] calls
//! with device-specific command words, calibrations and settle delays
//! baked in. Drivers are stateless beyond the open channel — every getter
//! re-reads the hardware, nothing is cached.

pub mod ac_drive;
pub mod dc_drive;
pub mod power_meter;
pub mod radiation_counter;
pub mod registers;

pub use ac_drive::AcDrive;
pub use dc_drive::DcDrive;
pub use power_meter::PowerMeter;
pub use radiation_counter::RadiationCounter;
