//! Per-batch member ledger cache
//!
//! Rows for the same member must see the claim-status updates made by
//! earlier rows in the same batch. The cache loads a member's ledger once,
//! on first encounter, and the coordinator replays committed allocation
//! plans onto it; a failed commit drops the entry so the next row reloads
//! clean state instead of trusting a snapshot that may have diverged.

use std::collections::{hash_map::Entry, HashMap};

use crate::reconciliation::allocation::MemberLedger;
use crate::traits::{ClaimStore, PaymentStore};
use crate::types::{MemberId, ReconcileResult};

/// Member ledgers loaded during one batch run
#[derive(Debug, Default)]
pub struct BatchLedgers {
    cache: HashMap<MemberId, MemberLedger>,
}

impl BatchLedgers {
    /// Empty cache for a fresh batch
    pub fn new() -> Self {
        Self::default()
    }

    /// The member's ledger, loaded from storage on first access
    pub async fn ledger_for<S>(
        &mut self,
        store: &S,
        member_id: MemberId,
    ) -> ReconcileResult<&mut MemberLedger>
    where
        S: ClaimStore + PaymentStore,
    {
        match self.cache.entry(member_id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let ledger = MemberLedger::load(store, member_id).await?;
                Ok(entry.insert(ledger))
            }
        }
    }

    /// Drop a member's snapshot after a failed commit
    pub fn invalidate(&mut self, member_id: MemberId) {
        self.cache.remove(&member_id);
    }
}
