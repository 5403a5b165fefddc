//! Equipment engine: setup registry, rig assembly and the power bracket.
//!
//! The engine owns the configured setups. For a run it resolves the setup
//! to an experiment type, connects a channel per device role (scripted
//! transports when the setup is simulated), assembles the drivers and the
//! experiment, powers the rig up and hands the phase handlers to the state
//! machine on a spawned task. Power-down runs when the machine finishes,
//! whatever the outcome.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use rig_channel::{DeviceChannel, KeepAlive, ModbusTransport, TcpTransport};
use rig_core::cancel::CancelToken;
use rig_core::codec::RegisterMap;
use rig_core::config::{RigConfig, SetupConfig};
use rig_core::error::{RigError, RigResult};
use rig_core::status::StatusHandle;
use rig_drivers::registers::{
    ac_drive_registers, apply_overrides, dc_drive_registers, power_meter_registers,
    radiation_counter_registers,
};
use rig_drivers::{AcDrive, DcDrive, PowerMeter, RadiationCounter};

use crate::experiments::{
    DcMotorLoad, ExperimentRig, PowerQuality, RadiationCount, SynchronousSpeed,
};
use crate::results::ResultsSink;
use crate::simulation;
use crate::state_machine::{ExecutionStateMachine, PhaseHandlers};

/// Experiment types the engine can assemble, with the device roles each
/// one requires.
const EXPERIMENTS: &[(&str, &[&str])] = &[
    ("synchronous_speed", &["ac_drive"]),
    ("dc_motor_load", &["dc_drive", "power_meter"]),
    ("power_quality", &["power_meter"]),
    ("radiation_count", &["radiation_counter"]),
];

/// Outcome of validating a setup without running it.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub setup_id: String,
    pub accepted: bool,
    pub description: String,
    /// Configured total duration, so the caller can size its own timeout.
    pub execution_time_s: u64,
    pub error_message: Option<String>,
}

/// Handles to an execution in flight. Assembled by the manager: the status
/// record goes in before the rig is built, the join handle once the run
/// task is spawned.
pub struct RunningExecution {
    pub status: StatusHandle,
    pub cancel: CancelToken,
    pub results: ResultsSink,
    /// Consumed by whoever awaits the run; `None` afterwards, and `None`
    /// while the rig is still being assembled.
    pub join: Option<tokio::task::JoinHandle<()>>,
}

/// Assembles and runs experiments from configured setups.
pub struct EquipmentEngine {
    config: RigConfig,
}

impl EquipmentEngine {
    pub fn new(config: RigConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    /// Check a setup is runnable without touching hardware.
    pub fn validate(&self, setup_id: &str) -> ValidationReport {
        match self.checked_setup(setup_id) {
            Ok(setup) => ValidationReport {
                setup_id: setup_id.to_string(),
                accepted: true,
                description: setup.description.clone(),
                execution_time_s: setup.times.total_s(),
                error_message: None,
            },
            Err(e) => ValidationReport {
                setup_id: setup_id.to_string(),
                accepted: false,
                description: String::new(),
                execution_time_s: 0,
                error_message: Some(e.to_string()),
            },
        }
    }

    /// Assemble the rig for a setup, power it up and launch the state
    /// machine. A power-up failure means the run never starts.
    ///
    /// The caller supplies the status record, cancel token and results
    /// sink, so the execution is observable before any hardware is
    /// touched. The spawned task runs the machine and then the power-down
    /// bracket, which removes power and releases the transports; the
    /// returned join handle completes only once both have finished.
    pub async fn start(
        &self,
        setup_id: &str,
        status: StatusHandle,
        cancel: CancelToken,
        results: ResultsSink,
    ) -> RigResult<tokio::task::JoinHandle<()>> {
        let setup = self.checked_setup(setup_id)?.clone();
        let (handlers, rig) = self.build_rig(&setup, results, &cancel).await?;

        rig.power_up().await?;
        info!(
            setup_id,
            execution_id = status.execution_id(),
            "rig powered up, launching run"
        );

        let machine = ExecutionStateMachine::new(status, cancel, setup.times);
        Ok(tokio::spawn(async move {
            machine.run(handlers).await;
            rig.power_down().await;
        }))
    }

    /// Setup lookup plus semantic checks the config loader cannot do on
    /// its own: known experiment type, all required device roles present.
    fn checked_setup(&self, setup_id: &str) -> RigResult<&SetupConfig> {
        let setup = self.config.setup(setup_id)?;
        let (_, roles) = EXPERIMENTS
            .iter()
            .find(|(name, _)| *name == setup.experiment)
            .ok_or_else(|| {
                RigError::Config(format!(
                    "setup '{}': unknown experiment type '{}'",
                    setup_id, setup.experiment
                ))
            })?;
        for role in *roles {
            if !setup.devices.contains_key(*role) {
                return Err(RigError::Config(format!(
                    "setup '{}': experiment '{}' needs a '{}' device",
                    setup_id, setup.experiment, role
                )));
            }
        }
        Ok(setup)
    }

    async fn build_rig(
        &self,
        setup: &SetupConfig,
        results: ResultsSink,
        cancel: &CancelToken,
    ) -> RigResult<(Arc<dyn PhaseHandlers>, Arc<dyn ExperimentRig>)> {
        match setup.experiment.as_str() {
            "synchronous_speed" => {
                let channel = self
                    .channel(setup, "ac_drive", ac_drive_registers(), cancel)
                    .await?;
                let drive = AcDrive::new(with_session_ping(channel, AcDrive::new))
                    .with_power_policy(setup.leave_power_enabled_on_init_failure);
                let rig = Arc::new(SynchronousSpeed::new(drive, setup, results));
                Ok((rig.clone(), rig))
            }
            "dc_motor_load" => {
                let drive_channel = self
                    .channel(setup, "dc_drive", dc_drive_registers(), cancel)
                    .await?;
                let meter_channel = self
                    .channel(setup, "power_meter", power_meter_registers(), cancel)
                    .await?;
                let drive = DcDrive::new(with_session_ping(drive_channel, DcDrive::new))
                    .with_power_policy(setup.leave_power_enabled_on_init_failure);
                let meter = PowerMeter::new(with_session_ping(meter_channel, PowerMeter::new));
                let rig = Arc::new(DcMotorLoad::new(drive, meter, setup, results));
                Ok((rig.clone(), rig))
            }
            "power_quality" => {
                let channel = self
                    .channel(setup, "power_meter", power_meter_registers(), cancel)
                    .await?;
                let meter = PowerMeter::new(with_session_ping(channel, PowerMeter::new));
                let rig = Arc::new(PowerQuality::new(meter, setup, results));
                Ok((rig.clone(), rig))
            }
            "radiation_count" => {
                let channel = self
                    .channel(setup, "radiation_counter", radiation_counter_registers(), cancel)
                    .await?;
                let counter =
                    RadiationCounter::new(with_session_ping(channel, RadiationCounter::new));
                let rig = Arc::new(RadiationCount::new(counter, setup, results));
                Ok((rig.clone(), rig))
            }
            other => Err(RigError::Config(format!(
                "unknown experiment type '{}'",
                other
            ))),
        }
    }

    /// Open the channel for one device role, with per-setup calibration
    /// overrides applied on top of the built-in register table. The cancel
    /// token is attached so long settle waits abort with the execution.
    async fn channel(
        &self,
        setup: &SetupConfig,
        role: &str,
        registers: RegisterMap,
        cancel: &CancelToken,
    ) -> RigResult<DeviceChannel> {
        let endpoint = setup.devices.get(role).ok_or_else(|| {
            RigError::Config(format!("no '{}' device in setup", role))
        })?;
        let registers = apply_overrides(registers, &endpoint.calibration).shared();

        let transport: Arc<dyn ModbusTransport> = if setup.simulated {
            info!(role, "using simulated transport");
            simulation::transport_for(role)
        } else {
            let addr = endpoint.address.parse().map_err(|_| {
                RigError::Config(format!(
                    "device '{}': address '{}' is not a socket address",
                    role, endpoint.address
                ))
            })?;
            if endpoint.serial_port.is_some() {
                warn!(role, "serial_port configured but serial support is not enabled; using TCP");
            }
            Arc::new(TcpTransport::connect(addr, endpoint.slave_id).await?)
        };

        Ok(DeviceChannel::new(transport, registers).with_cancel(cancel.clone()))
    }
}

/// Attach a keep-alive pinger built over a clone of the same channel, so
/// the device session stays alive through long settle waits.
fn with_session_ping<P, F>(channel: DeviceChannel, pinger: F) -> DeviceChannel
where
    P: KeepAlive + 'static,
    F: FnOnce(DeviceChannel) -> P,
{
    let hook = Arc::new(pinger(channel.clone()));
    channel.with_keep_alive(hook)
}
