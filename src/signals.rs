use nix::sys::signal::Signal;
use regex::Regex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;

/// Cooperative stop request shared between the signal task and the
/// scheduler loop.
///
/// The flag is set at most logically once (repeat triggers are no-ops beyond
/// the marker re-write done by the caller) and the scheduler observes it once
/// per tick. `notify_one` keeps a permit, so a trigger that lands before the
/// scheduler starts waiting is still seen.
#[derive(Debug, Default)]
pub struct StopSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the stop request and wake the scheduler if it is waiting.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Resolve once a stop has been requested.
    pub async fn requested(&self) {
        if self.is_set() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Persists one kill marker per intercepted signal.
///
/// A marker proves the daemon saw the signal and wound down cleanly, which is
/// how an operator-issued stop is told apart from a power-controller shutdown
/// after the fact. Markers are never deleted at runtime; stale ones from
/// earlier runs are purged once at startup, before any hardware is touched.
#[derive(Debug)]
pub struct MarkerWriter {
    dir: PathBuf,
    prefix: String,
    deliveries: AtomicU32,
}

impl MarkerWriter {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            deliveries: AtomicU32::new(0),
        }
    }

    /// Marker path for a signal: `<dir>/<prefix>-<2-digit signal>.txt`.
    pub fn path_for(&self, signum: i32) -> PathBuf {
        self.dir.join(format!("{}-{:02}.txt", self.prefix, signum))
    }

    /// Write (or re-write) the marker for `signum`. The delivery sequence in
    /// the body distinguishes a repeated signal from a fresh one.
    pub fn record(&self, signum: i32) -> std::io::Result<PathBuf> {
        let sequence = self.deliveries.fetch_add(1, Ordering::AcqRel) + 1;
        let path = self.path_for(signum);
        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "signal {} delivery {}", signum, sequence)?;
        file.sync_all()?;
        Ok(path)
    }

    /// Remove stale markers left by a previous run. Returns how many were
    /// removed. Also matches the space-padded names older deployments wrote.
    pub fn purge(&self) -> std::io::Result<usize> {
        let pattern = Regex::new(&format!(r"^{}-\s?\d+\.txt$", regex::escape(&self.prefix)))
            .expect("marker pattern is valid");
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if pattern.is_match(name) {
                std::fs::remove_file(entry.path())?;
                tracing::debug!(marker = name, "stale kill marker removed");
                removed += 1;
            }
        }
        Ok(removed)
    }

    #[allow(dead_code)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Install the termination handler for SIGINT and SIGTERM.
///
/// The spawned task lives for the rest of the process: every delivery writes
/// a kill marker and triggers the stop signal. Repeated deliveries only
/// re-write the marker; the stop request itself is idempotent.
pub fn install(stop: Arc<StopSignal>, markers: Arc<MarkerWriter>) -> std::io::Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        loop {
            let caught = tokio::select! {
                received = interrupt.recv() => match received {
                    Some(()) => Signal::SIGINT,
                    None => break,
                },
                received = terminate.recv() => match received {
                    Some(()) => Signal::SIGTERM,
                    None => break,
                },
            };
            let signum = caught as i32;
            match markers.record(signum) {
                Ok(path) => {
                    tracing::info!(
                        signal = %caught,
                        marker = %path.display(),
                        "termination signal received"
                    );
                }
                Err(e) => {
                    tracing::warn!(signal = %caught, error = %e, "failed to write kill marker");
                }
            }
            stop.trigger();
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_marker_name_is_zero_padded() {
        let writer = MarkerWriter::new("/run/heartline", "heartline-kill");
        assert_eq!(
            writer.path_for(2),
            PathBuf::from("/run/heartline/heartline-kill-02.txt")
        );
        assert_eq!(
            writer.path_for(15),
            PathBuf::from("/run/heartline/heartline-kill-15.txt")
        );
    }

    #[test]
    fn test_record_creates_marker_with_sequence() {
        let dir = tempdir().unwrap();
        let writer = MarkerWriter::new(dir.path(), "heartline-kill");

        let path = writer.record(15).unwrap();
        assert!(path.exists());
        let body = std::fs::read_to_string(&path).unwrap();
        assert_eq!(body, "signal 15 delivery 1\n");
    }

    #[test]
    fn test_repeat_delivery_rewrites_same_marker() {
        let dir = tempdir().unwrap();
        let writer = MarkerWriter::new(dir.path(), "heartline-kill");

        let first = writer.record(15).unwrap();
        let second = writer.record(15).unwrap();
        assert_eq!(first, second);

        let body = std::fs::read_to_string(&second).unwrap();
        assert_eq!(body, "signal 15 delivery 2\n");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_distinct_signals_get_distinct_markers() {
        let dir = tempdir().unwrap();
        let writer = MarkerWriter::new(dir.path(), "heartline-kill");

        writer.record(2).unwrap();
        writer.record(15).unwrap();
        assert!(writer.path_for(2).exists());
        assert!(writer.path_for(15).exists());
    }

    #[test]
    fn test_purge_removes_only_markers() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("heartline-kill-15.txt"), "").unwrap();
        std::fs::write(dir.path().join("heartline-kill- 2.txt"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep me").unwrap();
        std::fs::write(dir.path().join("heartline-kill-15.txt.bak"), "keep me").unwrap();

        let writer = MarkerWriter::new(dir.path(), "heartline-kill");
        assert_eq!(writer.purge().unwrap(), 2);

        assert!(!writer.path_for(15).exists());
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("heartline-kill-15.txt.bak").exists());
    }

    #[test]
    fn test_purge_empty_dir() {
        let dir = tempdir().unwrap();
        let writer = MarkerWriter::new(dir.path(), "heartline-kill");
        assert_eq!(writer.purge().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stop_signal_permit_survives_early_trigger() {
        let stop = StopSignal::new();
        stop.trigger();
        assert!(stop.is_set());
        // Must resolve immediately even though the trigger happened first.
        stop.requested().await;
    }

    #[tokio::test]
    async fn test_stop_signal_wakes_waiter() {
        let stop = Arc::new(StopSignal::new());
        let waiter = {
            let stop = Arc::clone(&stop);
            tokio::spawn(async move { stop.requested().await })
        };
        stop.trigger();
        waiter.await.unwrap();
        assert!(stop.is_set());
    }
}
