//! Per-interface network throughput sampling for live gauges.
//!
//! The pipeline: [`scheduler::SamplingScheduler`] drives a
//! [`sampler::ThroughputSampler`] on a background thread and publishes each
//! [`sampler::Snapshot`] through a [`bus::SnapshotBus`]. Consumers feed the
//! snapshots into their own [`scaler::AutoScaler`] for gauge ceilings and
//! format rates with [`units::format_rate`].

pub mod bus;
pub mod interfaces;
pub mod sampler;
pub mod scaler;
pub mod scheduler;
pub mod settings;
pub mod units;

pub use bus::{SnapshotBus, Subscription};
pub use interfaces::{InterfaceHandle, InterfaceProvider, SystemProvider};
pub use sampler::{SampleStatus, Snapshot, ThroughputSampler};
pub use scaler::{AutoScaler, GaugeScale};
pub use scheduler::{SamplingScheduler, StopOutcome};
pub use settings::{LiveSettings, Settings, SettingsSource};
pub use units::{format_rate, to_value_and_unit, UnitMode};
