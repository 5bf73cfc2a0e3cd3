//! Shared data model for the lmx inference orchestration subsystem.
//!
//! These types are deliberately free of any I/O or async runtime dependency:
//! they are the wire/record shapes that `lmx-core` operates on and that
//! `lmx-server` serializes at the HTTP boundary.

pub mod agent_run;
pub mod chat;
pub mod download;
pub mod event;
pub mod loader;
pub mod model;
pub mod registry;

pub use agent_run::{AgentRun, Priority, RunStatus};
pub use chat::{
    ChatMessage, ChatRole, GenerationParams, GenerationRequest, GenerationResponse, StreamChunk,
    TokenUsage,
};
pub use download::{DownloadStatus, DownloadTask};
pub use event::ServerEvent;
pub use loader::{LoadResult, LoadSpec, LoaderFailure};
pub use model::{Backend, LoadedModel, ModelConfig, ModelId, SpeculativeState};
pub use registry::{CompatibilityRecord, Outcome};
