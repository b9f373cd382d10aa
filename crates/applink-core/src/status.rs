// ── Primary operation status codes ──

/// Operation status codes reported in the telemetry `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum ProgramStatus {
    Off = 1,
    On = 2,
    Programmed = 3,
    WaitingToStart = 4,
    InUse = 5,
    Paused = 6,
    EndProgrammed = 7,
    Failure = 8,
    Interrupted = 9,
    Idle = 10,
    RinseHold = 11,
    Service = 12,
    Superfreezing = 13,
    Supercooling = 14,
    Superheating = 15,
    NotConnected = 255,
}

impl ProgramStatus {
    /// The raw wire code.
    pub const fn raw(self) -> i64 {
        self as i64
    }
}

/// Whether `status_raw` is a member of `set`. Telemetry may carry codes
/// outside the known enum; those are simply never members.
pub(crate) fn contains(set: &[ProgramStatus], status_raw: i64) -> bool {
    set.iter().any(|s| s.raw() == status_raw)
}
