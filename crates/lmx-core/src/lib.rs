//! Inference orchestration core.
//!
//! Each module is one component from the specification's component table:
//! memory admission (`memory`), circuit breaking (`circuit`), the
//! compatibility registry (`registry`), backend selection (`backend_policy`),
//! the admin event bus (`event_bus`), metrics (`metrics`), the isolated
//! loader protocol (`loader`), model lifecycle and LRU eviction
//! (`lifecycle`), request admission (`admission`), generation dispatch
//! (`generator`), memory-pressure load shedding (`load_shedder`), the
//! durable agent run queue (`run_scheduler`), and the peer helper fabric
//! (`helper_fabric`).

pub mod admission;
pub mod backend_policy;
pub mod circuit;
pub mod error;
pub mod event_bus;
pub mod generator;
pub mod helper_fabric;
pub mod lifecycle;
pub mod load_shedder;
pub mod loader;
pub mod memory;
pub mod metrics;
pub mod registry;
pub mod run_scheduler;

pub use admission::{AdmissionPermit, AdmissionScheduler};
pub use circuit::{CircuitBreaker, CircuitState};
pub use error::RuntimeError;
pub use event_bus::{EventBus, Subscription};
pub use generator::{Generator, InferenceBackend};
pub use helper_fabric::{HelperFabric, HelperResponse};
pub use lifecycle::{LoadOverrides, ModelLifecycle};
pub use load_shedder::LoadShedder;
pub use loader::{ChildLoader, LoaderProtocol};
pub use memory::{MemoryMonitor, MemoryStatus};
pub use metrics::MetricsCollector;
pub use registry::CompatibilityRegistry;
pub use run_scheduler::{InMemoryRunStore, RunScheduler, RunStore, SqliteRunStore};
