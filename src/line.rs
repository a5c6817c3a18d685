use std::sync::atomic::{AtomicU32, Ordering};

/// Current mode of the communication pin. Exactly one pin instance exists
/// per process and it is always in exactly one of these roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinRole {
    /// Host drives the line (heartbeat pulses).
    Output,
    /// Power controller drives the line (edge detection armed or about to be).
    Input,
}

/// Logic level driven on the line while in [`PinRole::Output`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    High,
    Low,
}

/// Errors from the GPIO line driver.
#[derive(Debug)]
pub enum LineError {
    /// Requesting or reconfiguring the line on the character device failed.
    Request {
        pin: u32,
        source: gpiocdev::Error,
    },
    /// Writing a level failed.
    Write {
        pin: u32,
        source: gpiocdev::Error,
    },
    /// An operation was attempted in the wrong role.
    WrongRole { expected: PinRole, actual: PinRole },
    /// A mode switch was attempted while edge detection was still armed.
    StillArmed { pin: u32 },
}

impl std::fmt::Display for LineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineError::Request { pin, source } => {
                write!(f, "failed to request GPIO line {}: {}", pin, source)
            }
            LineError::Write { pin, source } => {
                write!(f, "failed to write GPIO line {}: {}", pin, source)
            }
            LineError::WrongRole { expected, actual } => {
                write!(
                    f,
                    "line operation requires {:?} role but line is {:?}",
                    expected, actual
                )
            }
            LineError::StillArmed { pin } => {
                write!(
                    f,
                    "GPIO line {} cannot change mode while edge detection is armed",
                    pin
                )
            }
        }
    }
}

impl std::error::Error for LineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LineError::Request { source, .. } | LineError::Write { source, .. } => Some(source),
            LineError::WrongRole { .. } | LineError::StillArmed { .. } => None,
        }
    }
}

/// Driver contract for the one communication pin.
///
/// Mode transitions are serialized through the scheduler; the edge-event
/// context never changes pin mode, it only bumps the [`EdgeCounter`].
/// Invariant: edge detection is disarmed before the pin switches to
/// [`PinRole::Output`] and rearmed right after it switches back to
/// [`PinRole::Input`], so the host's own pulse never counts itself.
pub trait CommLine {
    /// Put the pin in the given role. Must be called with edge detection
    /// disarmed.
    fn configure(&mut self, role: PinRole) -> Result<(), LineError>;

    /// Drive a level. Only valid in [`PinRole::Output`].
    fn write(&mut self, level: Level) -> Result<(), LineError>;

    /// Arm rising-edge detection. Only valid in [`PinRole::Input`]. Each
    /// detected edge increments the counter handed to the driver at
    /// construction.
    fn arm_rising(&mut self) -> Result<(), LineError>;

    /// Tear down edge detection. Completes only after the edge-event context
    /// has stopped, so a following pulse cannot self-trigger.
    async fn disarm(&mut self);

    /// Final cleanup: disarm, switch to Output, drive low, release the pin.
    /// Idempotent; the first call wins and later calls are no-ops.
    async fn release(&mut self);
}

/// Edge count shared between the edge-event context and the scheduler.
///
/// The event context only ever calls [`EdgeCounter::record`]; the scheduler
/// only ever calls [`EdgeCounter::take`], once per window boundary. The
/// exchange in `take` both consults and resets in one step, so an edge
/// landing between the two can never be lost.
#[derive(Debug, Default)]
pub struct EdgeCounter(AtomicU32);

impl EdgeCounter {
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Called from the edge-event context for every rising edge.
    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::Release);
    }

    /// Read and clear the accumulated count. Coordinator only.
    pub fn take(&self) -> u32 {
        self.0.swap(0, Ordering::AcqRel)
    }
}
