/// Communication-pin allow-lists.
///
/// The carrier board routes the controller's signal to a small set of header
/// pins selected by DIP switch, so anything outside the active set is a
/// wiring mistake. Validation happens before any hardware is requested.

/// Pins the shutdown-protocol line may use.
pub const SHUTDOWN_PINS: [u32; 4] = [13, 19, 20, 26];

/// Pins the square-wave/interrupt-demo line may use.
#[allow(dead_code)]
pub const SQUARE_WAVE_PINS: [u32; 4] = [17, 22, 23, 27];

/// Rejection diagnostic for an out-of-list pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinRejected {
    pub pin: u32,
    pub allowed: Vec<u32>,
}

impl std::fmt::Display for PinRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let allowed = self
            .allowed
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "GPIO {} is not a valid communication pin (use one of {})",
            self.pin, allowed
        )
    }
}

impl std::error::Error for PinRejected {}

/// Check `pin` against the active allow-list.
pub fn validate(pin: u32, allowed: &[u32]) -> Result<(), PinRejected> {
    if allowed.contains(&pin) {
        Ok(())
    } else {
        Err(PinRejected {
            pin,
            allowed: allowed.to_vec(),
        })
    }
}
