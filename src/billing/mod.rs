//! # Billing Module
//!
//! The transactional side of the service: credit accounts with the
//! reserve/commit/release protocol, the billable-model catalog, and the
//! append-only prediction history.
//!
//! ## Key Components:
//! - **Ledger**: per-user balances and reservations, the consistency anchor
//! - **Catalog**: model name -> unit cost + backend, registration propagated
//!   to the backend before it becomes durable
//! - **History**: one append-only record per prediction attempt

pub mod catalog; // Billable model registry
pub mod history; // Append-only prediction records
pub mod ledger; // Accounts and reservations

pub use catalog::{BillableModel, CatalogError, ModelCatalog, ModelRegistration};
pub use history::{
    HistoryError, InputMetadata, PredictionHistoryStore, PredictionRecord, PredictionStatus,
};
pub use ledger::{Account, CreditLedger, Credits, LedgerError, Reservation, ReservationState};
