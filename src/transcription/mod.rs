//! # Transcription Module
//!
//! The saga layer: turns one authenticated request into a settled, billed
//! prediction by coordinating the catalog, the credit ledger, the inference
//! gateway and the history store.

pub mod coordinator; // The Lookup -> Reserve -> Invoke -> Resolve -> Append saga

pub use coordinator::{
    TranscriptionCoordinator, TranscriptionError, TranscriptionOutcome, TranscriptionRequest,
};
