//! Reconciliation module: duplicate guard, member matching, allocation,
//! atomic persistence, and the batch pipeline

pub mod allocation;
pub mod batch;
pub mod engine;
pub mod fingerprint;
pub mod matcher;
pub mod writer;

pub use allocation::*;
pub use batch::*;
pub use engine::*;
pub use fingerprint::*;
pub use matcher::*;
pub use writer::*;
