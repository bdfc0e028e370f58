//! # Inference Module
//!
//! Everything between the billing saga and the actual speech recognition:
//! the gateway that bounds one remote attempt, the backend families behind
//! it, and the single-flight cache that keeps heavy engine loads from
//! duplicating.
//!
//! ## Key Components:
//! - **Gateway**: timeout-bounded dispatch of one attempt, no retries
//! - **Backends**: one `InferenceBackend` implementation per family,
//!   selected at registration time
//! - **Resource cache**: single-flight loader for process-lifetime engines

pub mod backend; // Backend families and the wire/engine types
pub mod cache; // Single-flight resource cache
pub mod gateway; // Timeout-bounded dispatch

pub use backend::{
    BackendKind, BackendSpec, EmbeddedAsrBackend, EngineLoader, HttpAsrBackend, InferenceBackend,
    InferenceError, InferenceOptions, InferencePayload, SpeechEngine, Transcript,
    TranscriptSegment,
};
pub use cache::{LoadError, ResourceCache};
pub use gateway::InferenceGateway;
