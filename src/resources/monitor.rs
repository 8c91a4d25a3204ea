//! Memory pressure monitor and cleanup registry.
//!
//! The monitor is an explicit service shared as `Arc<ResourceMonitor>`. Other
//! components register cleanup callbacks with it; a pass over the registry
//! runs when pressure stays high at a timer tick, or when someone calls
//! [`ResourceMonitor::force_cleanup`].

use crate::resources::probe::{MemoryProbe, MemorySample, SystemProbe};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default used/limit ratio above which pressure counts as high.
pub const DEFAULT_PRESSURE_THRESHOLD: f64 = 0.6;
/// Default time between timer ticks.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(10);

const BYTES_PER_MB: f64 = 1_048_576.0;

/// Identifies a registered cleanup callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CleanupId(u64);

/// A cleanup callback. Runs at most once.
pub type CleanupFn = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Memory figures for display. Every field is `None` without a signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub used_mb: Option<f64>,
    pub total_mb: Option<f64>,
    pub pressure: Option<f64>,
}

struct Timer {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// Tracks memory pressure and owns the cleanup registry.
pub struct ResourceMonitor {
    probe: Arc<dyn MemoryProbe>,
    threshold: f64,
    interval: Duration,
    registry: Mutex<Vec<(CleanupId, CleanupFn)>>,
    next_id: AtomicU64,
    timer: Mutex<Option<Timer>>,
}

impl ResourceMonitor {
    /// Create a monitor over `probe` with default threshold and interval.
    pub fn new(probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            probe,
            threshold: DEFAULT_PRESSURE_THRESHOLD,
            interval: DEFAULT_MONITOR_INTERVAL,
            registry: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            timer: Mutex::new(None),
        }
    }

    /// Monitor backed by the process memory of this host.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemProbe::new()))
    }

    /// Set the pressure threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the timer interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the timer thread. No-op if it is already running.
    ///
    /// The thread holds a weak reference, so dropping the last `Arc` ends it.
    pub fn start(self: &Arc<Self>) -> std::io::Result<()> {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.interval;

        let thread = thread::Builder::new()
            .name("pixelsmith-monitor".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(monitor) = weak.upgrade() else {
                            break;
                        };
                        monitor.tick();
                    }
                    _ => break,
                }
            })?;

        log::debug!(
            "Resource monitor started (probe: {}, interval: {:?}, threshold: {})",
            self.probe.name(),
            self.interval,
            self.threshold
        );
        *timer = Some(Timer {
            stop: stop_tx,
            thread,
        });
        Ok(())
    }

    /// Stop and join the timer thread.
    pub fn stop(&self) {
        let Some(timer) = self.timer.lock().take() else {
            return;
        };
        let _ = timer.stop.try_send(());
        drop(timer.stop);

        // The timer thread may itself be dropping the last reference.
        if timer.thread.thread().id() != thread::current().id() && timer.thread.join().is_err() {
            log::warn!("Resource monitor timer thread panicked");
        }
        log::debug!("Resource monitor stopped");
    }

    /// Whether the timer thread is running.
    pub fn is_running(&self) -> bool {
        self.timer.lock().is_some()
    }

    fn tick(&self) {
        if self.is_pressure_high() {
            log::warn!("High memory pressure detected, triggering cleanup");
            self.force_cleanup();
        }
    }

    /// Whether used memory exceeds the threshold. `false` without a signal.
    pub fn is_pressure_high(&self) -> bool {
        self.probe
            .sample()
            .and_then(|sample| sample.ratio())
            .is_some_and(|ratio| ratio > self.threshold)
    }

    /// Raw reading from the probe.
    pub fn sample(&self) -> Option<MemorySample> {
        self.probe.sample()
    }

    /// Current memory figures in MiB.
    pub fn memory_info(&self) -> MemoryInfo {
        match self.probe.sample() {
            Some(sample) => MemoryInfo {
                used_mb: Some(sample.used_bytes as f64 / BYTES_PER_MB),
                total_mb: Some(sample.limit_bytes as f64 / BYTES_PER_MB),
                pressure: sample.ratio(),
            },
            None => MemoryInfo::default(),
        }
    }

    /// Add a callback to the next cleanup pass.
    pub fn register_cleanup<F>(&self, callback: F) -> CleanupId
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let id = CleanupId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry.lock().push((id, Box::new(callback)));
        id
    }

    /// Remove a callback that has not run yet.
    pub fn unregister_cleanup(&self, id: CleanupId) -> bool {
        let mut registry = self.registry.lock();
        match registry.iter().position(|(entry, _)| *entry == id) {
            Some(pos) => {
                registry.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Number of callbacks waiting for the next pass.
    pub fn pending_cleanups(&self) -> usize {
        self.registry.lock().len()
    }

    /// Run and drop every registered callback, then hint the host to reclaim.
    ///
    /// Callbacks run in registration order without the registry lock held;
    /// anything they register lands in the next pass. Failures and panics are
    /// logged and do not stop the pass. Returns the number of callbacks run.
    pub fn force_cleanup(&self) -> usize {
        let callbacks = std::mem::take(&mut *self.registry.lock());
        let count = callbacks.len();
        log::info!("Running {} cleanup callback(s)", count);

        for (id, callback) in callbacks {
            match panic::catch_unwind(AssertUnwindSafe(callback)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Cleanup callback {:?} failed: {:#}", id, e),
                Err(_) => log::warn!("Cleanup callback {:?} panicked", id),
            }
        }

        self.hint_reclaim();
        count
    }

    /// Ask the probe's host to give memory back.
    pub fn hint_reclaim(&self) -> bool {
        let hinted = self.probe.hint_reclaim();
        if hinted {
            log::debug!("Requested memory reclaim from {} probe", self.probe.name());
        }
        hinted
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("probe", &self.probe.name())
            .field("threshold", &self.threshold)
            .field("interval", &self.interval)
            .field("pending_cleanups", &self.pending_cleanups())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::probe::{ManualProbe, UnavailableProbe};
    use std::sync::atomic::AtomicUsize;

    fn manual(used: u64, limit: u64) -> (Arc<ManualProbe>, ResourceMonitor) {
        let probe = Arc::new(ManualProbe::with_sample(used, limit));
        let monitor = ResourceMonitor::new(probe.clone());
        (probe, monitor)
    }

    #[test]
    fn test_pressure_threshold() {
        let (probe, monitor) = manual(50, 100);
        assert!(!monitor.is_pressure_high());
        probe.set(60, 100);
        assert!(!monitor.is_pressure_high(), "threshold is exclusive");
        probe.set(61, 100);
        assert!(monitor.is_pressure_high());
        probe.set_unavailable();
        assert!(!monitor.is_pressure_high());
    }

    #[test]
    fn test_memory_info() {
        let (_, monitor) = manual(512 * 1_048_576, 1024 * 1_048_576);
        let info = monitor.memory_info();
        assert_eq!(info.used_mb, Some(512.0));
        assert_eq!(info.total_mb, Some(1024.0));
        assert_eq!(info.pressure, Some(0.5));

        let empty = ResourceMonitor::new(Arc::new(UnavailableProbe)).memory_info();
        assert_eq!(empty, MemoryInfo::default());
    }

    #[test]
    fn test_cleanup_runs_in_order_once() {
        let (probe, monitor) = manual(0, 100);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            monitor.register_cleanup(move || {
                order.lock().push(i);
                Ok(())
            });
        }

        assert_eq!(monitor.force_cleanup(), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(monitor.force_cleanup(), 0);
        assert_eq!(probe.reclaim_count(), 2);
    }

    #[test]
    fn test_failing_callbacks_do_not_stop_pass() {
        let (_, monitor) = manual(0, 100);
        let ran = Arc::new(AtomicUsize::new(0));

        monitor.register_cleanup(|| anyhow::bail!("disk full"));
        monitor.register_cleanup(|| panic!("boom"));
        let counter = ran.clone();
        monitor.register_cleanup(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(monitor.force_cleanup(), 3);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister() {
        let (_, monitor) = manual(0, 100);
        let id = monitor.register_cleanup(|| Ok(()));
        assert_eq!(monitor.pending_cleanups(), 1);
        assert!(monitor.unregister_cleanup(id));
        assert!(!monitor.unregister_cleanup(id));
        assert_eq!(monitor.force_cleanup(), 0);
    }

    #[test]
    fn test_reentrant_registration_lands_in_next_pass() {
        let (_, monitor) = manual(0, 100);
        let monitor = Arc::new(monitor);
        let inner = Arc::downgrade(&monitor);
        monitor.register_cleanup(move || {
            if let Some(m) = inner.upgrade() {
                m.register_cleanup(|| Ok(()));
            }
            Ok(())
        });

        assert_eq!(monitor.force_cleanup(), 1);
        assert_eq!(monitor.pending_cleanups(), 1);
    }

    #[test]
    fn test_timer_triggers_cleanup_under_pressure() {
        let probe = Arc::new(ManualProbe::with_sample(90, 100));
        let monitor = Arc::new(
            ResourceMonitor::new(probe.clone()).with_interval(Duration::from_millis(20)),
        );
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        monitor.register_cleanup(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        monitor.start().unwrap();
        assert!(monitor.is_running());
        for _ in 0..100 {
            if ran.load(Ordering::SeqCst) > 0 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        monitor.stop();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_running());
    }
}
