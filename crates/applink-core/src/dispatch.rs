//! Control-action dispatch: query what the device currently allows, send
//! the command when permitted, and classify everything else as an expected
//! rejection rather than an error.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use applink_api::models::ActionCommand;
use applink_api::DeviceClient;

/// Delay before a rejected optimistic write is rolled back, long enough
/// for the hub UI to settle on the requested value first.
pub const DEFAULT_REVERT_DELAY: Duration = Duration::from_millis(500);

// ── Action vocabulary ────────────────────────────────────────────────

/// Process action codes of the control endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum ProcessAction {
    Start = 1,
    Stop = 2,
    Pause = 3,
    StartSuperfreezing = 4,
    StopSuperfreezing = 5,
    StartSupercooling = 6,
    StopSupercooling = 7,
}

impl ProcessAction {
    pub const fn code(self) -> i64 {
        self as i64
    }
}

/// One user-initiated control request, already mapped from the logical
/// characteristic value.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceAction {
    Process(ProcessAction),
    Power { on: bool },
    TargetTemperature { zone: i64, value: i64 },
}

/// How a dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The command was sent and acknowledged.
    Applied,
    /// The device's current operating mode does not accept the command.
    /// Expected outcome, resolved by reverting the published value.
    Rejected,
    /// Configuration opted this device out of the command; the remote was
    /// never contacted.
    Disabled,
    /// Transport or remote fault.
    Failed,
}

impl DispatchOutcome {
    /// Everything except an applied command rolls the characteristic back.
    pub fn needs_revert(self) -> bool {
        !matches!(self, Self::Applied)
    }
}

// ── ActionDispatcher ─────────────────────────────────────────────────

/// Sends control commands on behalf of writable characteristics.
pub struct ActionDispatcher {
    client: Arc<DeviceClient>,
    revert_delay: Duration,
}

impl ActionDispatcher {
    pub fn new(client: Arc<DeviceClient>) -> Self {
        Self::with_revert_delay(client, DEFAULT_REVERT_DELAY)
    }

    pub fn with_revert_delay(client: Arc<DeviceClient>, revert_delay: Duration) -> Self {
        Self {
            client,
            revert_delay,
        }
    }

    /// Delay the calling characteristic waits before a revert publish.
    pub fn revert_delay(&self) -> Duration {
        self.revert_delay
    }

    /// Execute one control request.
    ///
    /// `disabled` marks a request the user opted this device out of; it is
    /// answered locally without contacting the remote. Process and power
    /// commands are gated by the device's currently allowed action set;
    /// target-temperature commands are sent directly.
    pub async fn dispatch(
        &self,
        serial: &str,
        action: &DeviceAction,
        disabled: bool,
    ) -> DispatchOutcome {
        if disabled {
            info!(serial, ?action, "ignoring request, disabled by configuration");
            return DispatchOutcome::Disabled;
        }

        match action {
            DeviceAction::Process(process) => self.dispatch_process(serial, *process).await,
            DeviceAction::Power { on } => self.dispatch_power(serial, *on).await,
            DeviceAction::TargetTemperature { zone, value } => {
                info!(serial, zone, value, "setting target temperature");
                self.send(serial, &ActionCommand::target_temperature(*zone, *value))
                    .await
            }
        }
    }

    async fn dispatch_process(&self, serial: &str, action: ProcessAction) -> DispatchOutcome {
        let allowed = match self.client.device_actions(serial).await {
            Ok(allowed) => allowed,
            Err(e) => {
                error!(serial, error = %e, "failed to query allowed actions");
                return DispatchOutcome::Failed;
            }
        };

        if !allowed.process_action.contains(&action.code()) {
            info!(
                serial,
                ?action,
                allowed = ?allowed.process_action,
                "process action not allowed in the current device state"
            );
            return DispatchOutcome::Rejected;
        }

        info!(serial, ?action, "process action");
        self.send(serial, &ActionCommand::process(action.code()))
            .await
    }

    async fn dispatch_power(&self, serial: &str, on: bool) -> DispatchOutcome {
        let allowed = match self.client.device_actions(serial).await {
            Ok(allowed) => allowed,
            Err(e) => {
                error!(serial, error = %e, "failed to query allowed actions");
                return DispatchOutcome::Failed;
            }
        };

        let permitted = if on { allowed.power_on } else { allowed.power_off };
        if !permitted {
            info!(serial, on, "power command not allowed in the current device state");
            return DispatchOutcome::Rejected;
        }

        info!(serial, on, "power command");
        self.send(serial, &ActionCommand::power(on)).await
    }

    async fn send(&self, serial: &str, command: &ActionCommand) -> DispatchOutcome {
        match self.client.execute_action(serial, command).await {
            Ok(()) => DispatchOutcome::Applied,
            // The remote occasionally acknowledges an applied write with a
            // server-fault status; the command did take effect.
            Err(e) if e.status() == Some(500) => {
                warn!(serial, error = %e, "write acknowledged with a server fault, treating as applied");
                DispatchOutcome::Applied
            }
            Err(e) => {
                error!(serial, error = %e, "control request failed");
                DispatchOutcome::Failed
            }
        }
    }
}
