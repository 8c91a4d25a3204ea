//! Memory pressure tracking and resource cleanup.

pub mod monitor;
pub mod probe;

pub use monitor::{
    CleanupFn, CleanupId, MemoryInfo, ResourceMonitor, DEFAULT_MONITOR_INTERVAL,
    DEFAULT_PRESSURE_THRESHOLD,
};
pub use probe::{ManualProbe, MemoryProbe, MemorySample, SystemProbe, UnavailableProbe};
