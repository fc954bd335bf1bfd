//! Alpha Decay Lifecycle
//!
//! Scores strategy health, publishes decay events, and decides and applies
//! remediation (rotation, retraining, reweighting, disabling) under
//! rotation safety limits.

pub mod config;
pub mod event_bus;
pub mod families;
pub mod lifecycle;
pub mod monitor;
pub mod scorer;


pub use config::{
    parse_families, DecayBands, DecayConfig, EventBusConfig, FlagThresholds, FlagWeights,
    RotationConfig,
};
pub use event_bus::{event_stream_key, EventBus};
pub use families::{next_sibling, strip_version_suffix, FamilyRegistry};
pub use lifecycle::{redistribute_weights, LifecycleController, RotationRecord};
pub use monitor::{CycleOutcome, CycleSummary, DecayMonitor};
pub use scorer::{score_key, HealthScorer};
