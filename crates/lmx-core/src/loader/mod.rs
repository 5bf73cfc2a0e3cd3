//! C7 — `LoaderProtocol` / `ChildLoader`: one isolated child process per load
//! attempt, communicating one newline-delimited JSON frame each way.
//!
//! Mirrors the teacher's `slab-server::ipc` newline-delimited-JSON framing
//! convention, but over a child process's stdin/stdout instead of a Unix
//! socket — the process boundary, not the wire format, is what isolates a
//! native-library crash from the parent.

mod child;

pub use child::ChildLoader;

use async_trait::async_trait;
use lmx_types::{LoadResult, LoadSpec, LoaderFailure};

/// Abstraction over "run one load attempt in isolation", so `ModelLifecycle`
/// can be tested against a fake without spawning real processes.
#[async_trait]
pub trait LoaderProtocol: Send + Sync {
    async fn load(&self, spec: LoadSpec) -> Result<LoadResult, LoaderFailure>;
}
