use crate::line::{CommLine, EdgeCounter, Level, LineError, PinRole};
use gpiocdev::line::{EdgeDetection, Value};
use gpiocdev::tokio::AsyncRequest;
use gpiocdev::Request;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

const CONSUMER: &str = "heartline";

/// Communication line backed by the Linux GPIO character device.
///
/// The kernel does not allow edge detection to be toggled on an existing
/// request, so every role change releases the current request and makes a
/// fresh one. While armed, the input request lives inside the edge reader
/// task; disarming stops that task and waits for it, which is what makes the
/// no-self-trigger invariant hold before a pulse.
pub struct GpioCommLine {
    chip: PathBuf,
    offset: u32,
    counter: Arc<EdgeCounter>,
    role: PinRole,
    request: Option<Request>,
    reader: Option<JoinHandle<()>>,
    released: bool,
}

impl GpioCommLine {
    /// Bind a driver to a chip and line offset. No hardware is touched until
    /// the first `configure` call.
    pub fn new(chip: impl Into<PathBuf>, offset: u32, counter: Arc<EdgeCounter>) -> Self {
        Self {
            chip: chip.into(),
            offset,
            counter,
            role: PinRole::Input,
            request: None,
            reader: None,
            released: false,
        }
    }

    fn request_output(&self, value: Value) -> Result<Request, gpiocdev::Error> {
        Request::builder()
            .on_chip(self.chip.clone())
            .with_consumer(CONSUMER)
            .with_line(self.offset)
            .as_output(value)
            .request()
    }

    fn request_input(&self) -> Result<Request, gpiocdev::Error> {
        Request::builder()
            .on_chip(self.chip.clone())
            .with_consumer(CONSUMER)
            .with_line(self.offset)
            .as_input()
            .request()
    }

    fn request_rising_edges(&self) -> Result<Request, gpiocdev::Error> {
        Request::builder()
            .on_chip(self.chip.clone())
            .with_consumer(CONSUMER)
            .with_line(self.offset)
            .as_input()
            .with_edge_detection(EdgeDetection::RisingEdge)
            .request()
    }
}

impl CommLine for GpioCommLine {
    fn configure(&mut self, role: PinRole) -> Result<(), LineError> {
        if self.reader.is_some() {
            return Err(LineError::StillArmed { pin: self.offset });
        }
        // Drop the old request before making the new one; the kernel holds
        // the line exclusively per request.
        self.request = None;
        let request = match role {
            PinRole::Output => self.request_output(Value::Inactive),
            PinRole::Input => self.request_input(),
        }
        .map_err(|e| LineError::Request {
            pin: self.offset,
            source: e,
        })?;
        self.request = Some(request);
        self.role = role;
        tracing::trace!(pin = self.offset, ?role, "line reconfigured");
        Ok(())
    }

    fn write(&mut self, level: Level) -> Result<(), LineError> {
        if self.role != PinRole::Output {
            return Err(LineError::WrongRole {
                expected: PinRole::Output,
                actual: self.role,
            });
        }
        let Some(request) = &self.request else {
            return Err(LineError::WrongRole {
                expected: PinRole::Output,
                actual: self.role,
            });
        };
        let value = match level {
            Level::High => Value::Active,
            Level::Low => Value::Inactive,
        };
        request
            .set_value(self.offset, value)
            .map_err(|e| LineError::Write {
                pin: self.offset,
                source: e,
            })?;
        Ok(())
    }

    fn arm_rising(&mut self) -> Result<(), LineError> {
        if self.role != PinRole::Input {
            return Err(LineError::WrongRole {
                expected: PinRole::Input,
                actual: self.role,
            });
        }
        if self.reader.is_some() {
            return Err(LineError::StillArmed { pin: self.offset });
        }
        // Edge detection must be present at request time, so the plain input
        // request is swapped for one with rising-edge events.
        self.request = None;
        let request = self.request_rising_edges().map_err(|e| LineError::Request {
            pin: self.offset,
            source: e,
        })?;

        let events = AsyncRequest::new(request);
        let counter = Arc::clone(&self.counter);
        let pin = self.offset;
        self.reader = Some(tokio::spawn(async move {
            loop {
                match events.read_edge_event().await {
                    Ok(event) => {
                        counter.record();
                        tracing::trace!(pin, seqno = event.seqno, "rising edge");
                    }
                    Err(e) => {
                        tracing::warn!(pin, error = %e, "edge reader stopped");
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    async fn disarm(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
            // Wait for the task to wind down so its request (and the armed
            // edge detection) is gone before the caller drives the line.
            let _ = reader.await;
            tracing::trace!(pin = self.offset, "edge detection disarmed");
        }
    }

    async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.disarm().await;

        if self.role == PinRole::Output && self.request.is_some() {
            if let Some(request) = &self.request {
                if let Err(e) = request.set_value(self.offset, Value::Inactive) {
                    tracing::warn!(pin = self.offset, error = %e, "failed to drive line low");
                }
            }
        } else {
            match self.request_output(Value::Inactive) {
                Ok(request) => self.request = Some(request),
                Err(e) => {
                    tracing::warn!(pin = self.offset, error = %e, "failed to drive line low");
                }
            }
        }

        // Dropping the request hands the line back to the kernel.
        self.request = None;
        tracing::debug!(pin = self.offset, "communication line released");
    }
}

impl Drop for GpioCommLine {
    /// Fault-path backstop. The orderly exits call `release` themselves;
    /// this covers a panic or early return so the line is not left driving
    /// or armed. Best effort only, since Drop cannot wait for the reader.
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.request = None;
        if let Ok(request) = self.request_output(Value::Inactive) {
            drop(request);
            tracing::debug!(pin = self.offset, "line driven low on drop");
        }
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_chip_is_a_request_error() {
        let counter = Arc::new(EdgeCounter::new());
        let mut line = GpioCommLine::new("/dev/gpiochip-does-not-exist", 20, counter);

        let err = line.configure(PinRole::Output).unwrap_err();
        assert!(matches!(err, LineError::Request { pin: 20, .. }));
    }

    #[tokio::test]
    async fn test_write_requires_output_role() {
        let counter = Arc::new(EdgeCounter::new());
        let mut line = GpioCommLine::new("/dev/gpiochip-does-not-exist", 20, counter);

        // Freshly constructed driver is logically in Input role with no
        // request; writing must be rejected before touching hardware.
        let err = line.write(Level::High).unwrap_err();
        assert!(matches!(
            err,
            LineError::WrongRole {
                expected: PinRole::Output,
                ..
            }
        ));
    }
}
