//! Core of the media-job gateway: admission, staging, script execution and publication of one
//! job at a time.

mod actors;
pub mod command;
pub mod errors;
pub mod events;
pub mod gate;
pub mod location;
pub mod orchestrator;
pub mod request;
pub mod storage;
pub mod supervisor;
pub mod types;
pub mod workspace;

pub use errors::{JobError, Result};
pub use gate::AdmissionGate;
pub use orchestrator::{JobOutcome, Orchestrator, PipelineSettings};
pub use request::JobRequest;
