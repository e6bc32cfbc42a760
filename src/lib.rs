//! # Vereinskasse Core
//!
//! Bank transaction reconciliation and payment allocation for association
//! back offices: ingest a batch of bank statement rows, match each row to a
//! member, and allocate the money against the member's outstanding claims,
//! carrying any surplus forward as an advance balance.
//!
//! ## Features
//!
//! - **Duplicate guard**: stable per-row fingerprints make statement
//!   re-imports a no-op instead of a double payment
//! - **Member matching**: IBAN, member-number reference, and fuzzy name
//!   rules in priority order, with conservative ambiguity handling
//! - **FIFO allocation**: incoming money fills the oldest open claims first,
//!   decimal-exact, with surplus routed to advance balances
//! - **Advance consumption**: newly created claims settle immediately from
//!   existing advance balances
//! - **Atomic row persistence**: each row commits or rolls back as one unit;
//!   one bad row never corrupts a batch
//! - **Storage abstraction**: database-agnostic design with trait-based
//!   stores and an in-memory implementation for testing
//!
//! ## Quick Start
//!
//! ```rust
//! use vereinskasse_core::{MemoryStorage, ReconciliationEngine};
//!
//! let storage = MemoryStorage::new();
//! let directory = storage.clone();
//! let mut engine = ReconciliationEngine::new(storage, directory);
//! // engine.process_upload(bank_account_id, verein_id, rows).await?
//! ```

pub mod reconciliation;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use reconciliation::*;
pub use traits::*;
pub use types::*;
pub use utils::{memory_storage::MemoryStorage, validation};
