//! Measurement aggregates produced during the Running phase.

use serde::{Deserialize, Serialize};

/// One set of simultaneously-sampled device readings.
///
/// "Simultaneous" from the caller's point of view: the drivers read the
/// registers sequentially with no device-side synchronisation. Fields not
/// relevant to a given rig stay at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub speed_rpm: f64,
    pub torque_nm: f64,
    pub phase_voltage_v: [f64; 3],
    pub phase_current_a: [f64; 3],
    pub power_factor: f64,
    pub frequency_hz: f64,
    pub active_power_w: f64,
    pub temperature_c: f64,
    /// Accumulated counts for radiation-counting rigs.
    pub counts: f64,
}

impl Measurement {
    /// Element-wise mean of a sample series. `None` for an empty series.
    pub fn average(samples: &[Measurement]) -> Option<Measurement> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let mut avg = Measurement::default();
        for s in samples {
            avg.speed_rpm += s.speed_rpm;
            avg.torque_nm += s.torque_nm;
            for i in 0..3 {
                avg.phase_voltage_v[i] += s.phase_voltage_v[i];
                avg.phase_current_a[i] += s.phase_current_a[i];
            }
            avg.power_factor += s.power_factor;
            avg.frequency_hz += s.frequency_hz;
            avg.active_power_w += s.active_power_w;
            avg.temperature_c += s.temperature_c;
            avg.counts += s.counts;
        }
        avg.speed_rpm /= n;
        avg.torque_nm /= n;
        for i in 0..3 {
            avg.phase_voltage_v[i] /= n;
            avg.phase_current_a[i] /= n;
        }
        avg.power_factor /= n;
        avg.frequency_hz /= n;
        avg.active_power_w /= n;
        avg.temperature_c /= n;
        avg.counts /= n;
        Some(avg)
    }
}
