//! Memory usage signals.
//!
//! A probe reports how much memory the process is using against some limit.
//! Hosts without a usable signal return `None`, which callers treat as "no
//! pressure".

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use sysinfo::{Pid, System};

/// One memory reading in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySample {
    pub used_bytes: u64,
    pub limit_bytes: u64,
}

impl MemorySample {
    pub fn new(used_bytes: u64, limit_bytes: u64) -> Self {
        Self {
            used_bytes,
            limit_bytes,
        }
    }

    /// Used fraction of the limit, or `None` for a zero limit.
    pub fn ratio(&self) -> Option<f64> {
        if self.limit_bytes == 0 {
            return None;
        }
        Some(self.used_bytes as f64 / self.limit_bytes as f64)
    }
}

/// Source of memory readings.
pub trait MemoryProbe: Send + Sync {
    /// Current usage, or `None` when the host exposes no signal.
    fn sample(&self) -> Option<MemorySample>;

    /// Ask the host to give memory back. Returns whether anything was asked.
    ///
    /// Optional; nothing may depend on it having an effect.
    fn hint_reclaim(&self) -> bool {
        false
    }

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Resident memory of this process against total system memory.
pub struct SystemProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SystemProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                log::warn!("Cannot resolve current process id, memory signal disabled: {}", e);
                None
            }
        };

        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemProbe {
    fn sample(&self) -> Option<MemorySample> {
        let pid = self.pid?;
        let mut system = self.system.lock();

        system.refresh_memory();
        if !system.refresh_process(pid) {
            return None;
        }

        let used = system.process(pid)?.memory();
        let limit = system.total_memory();
        if limit == 0 {
            return None;
        }

        Some(MemorySample::new(used, limit))
    }

    fn name(&self) -> &'static str {
        "system"
    }
}

/// Probe driven by hand. Starts unavailable.
#[derive(Default)]
pub struct ManualProbe {
    sample: Mutex<Option<MemorySample>>,
    reclaim_hints: AtomicUsize,
}

impl ManualProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe that already reports `used` of `limit` bytes.
    pub fn with_sample(used_bytes: u64, limit_bytes: u64) -> Self {
        let probe = Self::new();
        probe.set(used_bytes, limit_bytes);
        probe
    }

    /// Report `used` of `limit` bytes from now on.
    pub fn set(&self, used_bytes: u64, limit_bytes: u64) {
        *self.sample.lock() = Some(MemorySample::new(used_bytes, limit_bytes));
    }

    /// Report no signal from now on.
    pub fn set_unavailable(&self) {
        *self.sample.lock() = None;
    }

    /// Number of reclaim hints received.
    pub fn reclaim_count(&self) -> usize {
        self.reclaim_hints.load(Ordering::SeqCst)
    }
}

impl MemoryProbe for ManualProbe {
    fn sample(&self) -> Option<MemorySample> {
        *self.sample.lock()
    }

    fn hint_reclaim(&self) -> bool {
        self.reclaim_hints.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}

/// Probe for hosts with no memory signal at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableProbe;

impl MemoryProbe for UnavailableProbe {
    fn sample(&self) -> Option<MemorySample> {
        None
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}
