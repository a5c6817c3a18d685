use crate::decision::{classify, ShutdownCommand};
use crate::line::{CommLine, EdgeCounter, Level, LineError, PinRole};
use crate::signals::StopSignal;
use std::time::Duration;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};

// Protocol timing. These values mirror the pulse train the power controller
// firmware generates and expects; changing any of them breaks the handshake.
// Verbosity and configuration must never feed into them.

/// Cadence of the scheduler loop. Bounds stop and decision latency.
pub const TICK: Duration = Duration::from_millis(100);

/// Maximum interval window between heartbeat pulses.
pub const WINDOW_MAX: Duration = Duration::from_secs(1);

/// Width of each half of the heartbeat pulse (high, then low).
pub const PULSE_WIDTH: Duration = Duration::from_millis(50);

/// Pause before the first hardware configuration.
pub const INIT_SETTLE: Duration = Duration::from_millis(200);

/// Pause after arming, before the first window opens.
pub const STARTUP_SETTLE: Duration = Duration::from_secs(2);

/// Time budget between heartbeat pulses. Restarted after every quiet-window
/// pulse; consulted once per tick.
#[derive(Debug)]
pub struct IntervalWindow {
    start: Instant,
    max: Duration,
}

impl IntervalWindow {
    /// A window that is already over, so the first tick acts immediately.
    pub fn expired(max: Duration) -> Self {
        Self {
            start: Instant::now() - max - TICK,
            max,
        }
    }

    pub fn restart(&mut self) {
        self.start = Instant::now();
    }

    pub fn is_expired(&self) -> bool {
        self.start.elapsed() > self.max
    }
}

/// How the heartbeat loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOutcome {
    /// An operator termination signal stopped the loop. No dispatch happens.
    Stopped,
    /// The power controller requested a shutdown during the last window.
    ShutdownRequested { command: ShutdownCommand, edges: u32 },
}

/// One full heartbeat cycle.
///
/// Disarm first so the outgoing pulse cannot count itself, drive high then
/// low for one pulse width each, then hand the line back to the controller
/// and rearm. Edges arriving while the line is in Output role are lost; that
/// blind window is part of the protocol, not something to compensate for.
async fn pulse_cycle<L: CommLine>(line: &mut L) -> Result<(), LineError> {
    line.disarm().await;
    line.configure(PinRole::Output)?;
    line.write(Level::High)?;
    sleep(PULSE_WIDTH).await;
    line.write(Level::Low)?;
    sleep(PULSE_WIDTH).await;
    line.configure(PinRole::Input)?;
    line.arm_rising()?;
    Ok(())
}

/// Run the heartbeat loop until an operator stop or a controller shutdown.
///
/// Every tick: observe the stop flag once, then check the interval window.
/// At window expiry the edge count is consulted and cleared in one exchange;
/// zero edges means another pulse cycle, anything else means the loop hands
/// the classified command back to the caller and sends no further pulses.
pub async fn run<L: CommLine>(
    line: &mut L,
    edges: &EdgeCounter,
    stop: &StopSignal,
) -> Result<EngineOutcome, LineError> {
    sleep(INIT_SETTLE).await;
    line.configure(PinRole::Input)?;
    line.arm_rising()?;
    sleep(STARTUP_SETTLE).await;
    tracing::debug!("heartbeat loop armed");

    let mut window = IntervalWindow::expired(WINDOW_MAX);
    let mut ticker = interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.requested() => {}
            _ = ticker.tick() => {}
        }

        if stop.is_set() {
            tracing::info!("stop requested, leaving heartbeat loop");
            return Ok(EngineOutcome::Stopped);
        }

        if !window.is_expired() {
            continue;
        }

        let count = edges.take();
        if count > 0 {
            let command = classify(count);
            tracing::info!(
                edges = count,
                command = %command,
                "power controller requested shutdown"
            );
            return Ok(EngineOutcome::ShutdownRequested {
                command,
                edges: count,
            });
        }

        tracing::trace!("quiet window, sending heartbeat pulse");
        pulse_cycle(line).await?;
        window.restart();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::mock::{LineEvent, MockLine};
    use std::sync::Arc;
    use tokio::time::timeout;

    const TEST_BUDGET: Duration = Duration::from_secs(300);

    #[tokio::test(start_paused = true)]
    async fn test_quiet_windows_emit_one_pulse_each() {
        let edges = Arc::new(EdgeCounter::new());
        let stop = Arc::new(StopSignal::new());

        // Ask for a stop once the fifth pulse cycle has rearmed.
        let mut line = MockLine::with_arm_hook({
            let stop = Arc::clone(&stop);
            move |completed| {
                if completed == 5 {
                    stop.trigger();
                }
            }
        });

        let outcome = timeout(TEST_BUDGET, run(&mut line, &edges, &stop))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome, EngineOutcome::Stopped);
        assert_eq!(line.pulses, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_edge_classifies_halt() {
        let edges = Arc::new(EdgeCounter::new());
        let stop = Arc::new(StopSignal::new());

        // One rising edge lands after the first pulse cycle rearms.
        let mut line = MockLine::with_arm_hook({
            let edges = Arc::clone(&edges);
            move |completed| {
                if completed == 1 {
                    edges.record();
                }
            }
        });

        let outcome = timeout(TEST_BUDGET, run(&mut line, &edges, &stop))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            outcome,
            EngineOutcome::ShutdownRequested {
                command: ShutdownCommand::Halt,
                edges: 1,
            }
        );
        // The decision ends the loop; no pulse follows the edge.
        assert_eq!(line.pulses, 1);
        assert_eq!(line.events.last(), Some(&LineEvent::Armed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_edge_train_classifies_reboot() {
        let edges = Arc::new(EdgeCounter::new());
        let stop = Arc::new(StopSignal::new());

        let mut line = MockLine::with_arm_hook({
            let edges = Arc::clone(&edges);
            move |completed| {
                if completed == 2 {
                    edges.record();
                    edges.record();
                    edges.record();
                }
            }
        });

        let outcome = timeout(TEST_BUDGET, run(&mut line, &edges, &stop))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            outcome,
            EngineOutcome::ShutdownRequested {
                command: ShutdownCommand::Reboot,
                edges: 3,
            }
        );
        assert_eq!(line.pulses, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_pulse() {
        let edges = EdgeCounter::new();
        let stop = StopSignal::new();
        stop.trigger();

        let mut line = MockLine::new();
        let outcome = timeout(TEST_BUDGET, run(&mut line, &edges, &stop))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome, EngineOutcome::Stopped);
        assert_eq!(line.pulses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulse_cycle_keeps_disarm_ordering() {
        let mut line = MockLine::new();
        pulse_cycle(&mut line).await.unwrap();

        assert_eq!(
            line.events,
            vec![
                LineEvent::Disarmed,
                LineEvent::Configured(PinRole::Output),
                LineEvent::Wrote(Level::High),
                LineEvent::Wrote(Level::Low),
                LineEvent::Configured(PinRole::Input),
                LineEvent::Armed,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expires_after_max() {
        let mut window = IntervalWindow::expired(WINDOW_MAX);
        assert!(window.is_expired());

        window.restart();
        assert!(!window.is_expired());

        sleep(WINDOW_MAX / 2).await;
        assert!(!window.is_expired());

        sleep(WINDOW_MAX).await;
        assert!(window.is_expired());
    }
}
