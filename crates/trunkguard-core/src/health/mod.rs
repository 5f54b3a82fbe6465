//! Deployment health sampling and the monitor loop that drives rollbacks.

pub mod monitor;
pub mod probes;
pub mod snapshot;
pub mod system;

pub use monitor::{
    derive_signals, strongest, HealthMonitor, MonitorAction, MonitorSettings, ProbeVerifier,
    SaturationSource, Signal, TickReport,
};
pub use probes::{build_probes, CommandProbe, HealthProbe, HttpProbe, ProbeResult};
pub use snapshot::{slo_budget_consumed, HealthHistory, HealthSnapshot};
pub use system::{read_saturation, Saturation};
