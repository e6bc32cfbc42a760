//! In-memory storage implementation for testing and development

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::reconciliation::writer::LedgerCommit;
use crate::traits::*;
use crate::types::*;

/// In-memory implementation of every storage and directory trait.
///
/// `commit_unit` checks the full set of ledger invariants against current
/// state before applying anything, mirroring the commit-or-rollback contract
/// a transactional backend provides.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    members: Arc<RwLock<HashMap<MemberId, MemberProfile>>>,
    member_ibans: Arc<RwLock<HashMap<MemberId, Vec<String>>>>,
    association_ibans: Arc<RwLock<HashMap<VereinId, Vec<String>>>>,
    claims: Arc<RwLock<HashMap<ClaimId, Claim>>>,
    payments: Arc<RwLock<HashMap<PaymentId, Payment>>>,
    allocations: Arc<RwLock<HashMap<AllocationId, PaymentAllocation>>>,
    advances: Arc<RwLock<HashMap<AdvanceId, AdvanceBalance>>>,
    bank_transactions: Arc<RwLock<HashMap<BankTransactionId, BankTransaction>>>,
    fail_next_commit: Arc<RwLock<bool>>,
}

impl MemoryStorage {
    /// Create a new empty storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a member with their IBANs in the directory
    pub fn insert_member(&self, profile: MemberProfile, ibans: Vec<String>) {
        self.member_ibans.write().unwrap().insert(profile.id, ibans);
        self.members.write().unwrap().insert(profile.id, profile);
    }

    /// Register an IBAN as one of the association's own accounts
    pub fn add_association_iban(&self, verein_id: VereinId, iban: &str) {
        self.association_ibans
            .write()
            .unwrap()
            .entry(verein_id)
            .or_default()
            .push(iban.to_string());
    }

    /// Make the next `commit_unit` fail with a storage error, for testing
    /// row-failure isolation and batch re-runs
    pub fn fail_next_commit(&self) {
        *self.fail_next_commit.write().unwrap() = true;
    }

    /// Number of stored payments
    pub fn payment_count(&self) -> usize {
        self.payments.read().unwrap().len()
    }

    /// Number of stored allocations
    pub fn allocation_count(&self) -> usize {
        self.allocations.read().unwrap().len()
    }

    /// Number of stored advance-balance records, spent ones included
    pub fn advance_count(&self) -> usize {
        self.advances.read().unwrap().len()
    }

    /// Number of stored bank transactions
    pub fn bank_transaction_count(&self) -> usize {
        self.bank_transactions.read().unwrap().len()
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) {
        self.members.write().unwrap().clear();
        self.member_ibans.write().unwrap().clear();
        self.association_ibans.write().unwrap().clear();
        self.claims.write().unwrap().clear();
        self.payments.write().unwrap().clear();
        self.allocations.write().unwrap().clear();
        self.advances.write().unwrap().clear();
        self.bank_transactions.write().unwrap().clear();
    }

    fn validate_unit(&self, unit: &LedgerCommit) -> ReconcileResult<()> {
        let transactions = self.bank_transactions.read().unwrap();
        let claims = self.claims.read().unwrap();
        let payments = self.payments.read().unwrap();
        let allocations = self.allocations.read().unwrap();
        let advances = self.advances.read().unwrap();

        if let Some(transaction) = &unit.bank_transaction {
            let clash = transactions.values().any(|existing| {
                existing.id != transaction.id
                    && existing.bank_account_id == transaction.bank_account_id
                    && existing.fingerprint == transaction.fingerprint
            });
            if clash {
                return Err(ReconcileError::InvariantViolation(format!(
                    "Fingerprint '{}' already recorded for account {}",
                    transaction.fingerprint, transaction.bank_account_id
                )));
            }
        }

        for update in &unit.claim_updates {
            if !claims.contains_key(&update.id) {
                return Err(ReconcileError::InvariantViolation(format!(
                    "Claim update targets unknown claim {}",
                    update.id
                )));
            }
        }

        // Per-claim and per-payment caps over existing plus new allocations.
        let mut by_claim: HashMap<ClaimId, BigDecimal> = HashMap::new();
        let mut by_payment: HashMap<PaymentId, BigDecimal> = HashMap::new();
        for allocation in &unit.allocations {
            if allocation.amount <= BigDecimal::from(0) {
                return Err(ReconcileError::InvariantViolation(
                    "Allocation amount must be positive".to_string(),
                ));
            }
            *by_claim.entry(allocation.claim_id).or_default() += &allocation.amount;
            *by_payment.entry(allocation.payment_id).or_default() += &allocation.amount;
        }

        for (claim_id, new_amount) in &by_claim {
            let claim = unit
                .claim_updates
                .iter()
                .find(|c| c.id == *claim_id)
                .or_else(|| claims.get(claim_id))
                .ok_or_else(|| {
                    ReconcileError::InvariantViolation(format!(
                        "Allocation targets unknown claim {}",
                        claim_id
                    ))
                })?;
            let existing: BigDecimal = allocations
                .values()
                .filter(|a| a.claim_id == *claim_id)
                .map(|a| &a.amount)
                .sum();
            if &existing + new_amount > claim.amount {
                return Err(ReconcileError::InvariantViolation(format!(
                    "Allocations {} would exceed amount {} on claim {}",
                    &existing + new_amount,
                    claim.amount,
                    claim_id
                )));
            }
        }

        for (payment_id, new_amount) in &by_payment {
            let payment = unit
                .payment
                .as_ref()
                .filter(|p| p.id == *payment_id)
                .cloned()
                .or_else(|| payments.get(payment_id).cloned())
                .ok_or_else(|| {
                    ReconcileError::InvariantViolation(format!(
                        "Allocation references unknown payment {}",
                        payment_id
                    ))
                })?;
            let existing: BigDecimal = allocations
                .values()
                .filter(|a| a.payment_id == *payment_id)
                .map(|a| &a.amount)
                .sum();
            if &existing + new_amount > payment.amount {
                return Err(ReconcileError::InvariantViolation(format!(
                    "Allocations {} would exceed payment {} amount {}",
                    &existing + new_amount,
                    payment_id,
                    payment.amount
                )));
            }
        }

        if let Some(advance) = &unit.new_advance {
            if advance.remaining <= BigDecimal::from(0) {
                return Err(ReconcileError::InvariantViolation(
                    "New advance record must have a positive remaining amount".to_string(),
                ));
            }
        }

        for update in &unit.advance_updates {
            if !advances.contains_key(&update.id) {
                return Err(ReconcileError::InvariantViolation(format!(
                    "Advance update targets unknown record {}",
                    update.id
                )));
            }
            if update.remaining < BigDecimal::from(0) {
                return Err(ReconcileError::InvariantViolation(format!(
                    "Advance record {} would go negative",
                    update.id
                )));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl MemberDirectory for MemoryStorage {
    async fn list_active_members(
        &self,
        verein_id: VereinId,
    ) -> ReconcileResult<Vec<MemberProfile>> {
        let mut members: Vec<MemberProfile> = self
            .members
            .read()
            .unwrap()
            .values()
            .filter(|m| m.verein_id == verein_id && m.active)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(members)
    }

    async fn find_member_by_number(
        &self,
        verein_id: VereinId,
        number: &str,
    ) -> ReconcileResult<Option<MemberId>> {
        let needle = number.trim().to_uppercase();
        let members = self.members.read().unwrap();
        let mut matches = members.values().filter(|m| {
            m.verein_id == verein_id
                && m.active
                && m.member_number
                    .as_deref()
                    .is_some_and(|n| n.trim().to_uppercase() == needle)
        });
        let first = matches.next().map(|m| m.id);
        if matches.next().is_some() {
            return Ok(None);
        }
        Ok(first)
    }

    async fn registered_ibans(&self, member_id: MemberId) -> ReconcileResult<Vec<String>> {
        Ok(self
            .member_ibans
            .read()
            .unwrap()
            .get(&member_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_association_ibans(&self, verein_id: VereinId) -> ReconcileResult<Vec<String>> {
        Ok(self
            .association_ibans
            .read()
            .unwrap()
            .get(&verein_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ClaimStore for MemoryStorage {
    async fn claim(&self, claim_id: ClaimId) -> ReconcileResult<Option<Claim>> {
        Ok(self.claims.read().unwrap().get(&claim_id).cloned())
    }

    async fn open_claims(&self, member_id: MemberId) -> ReconcileResult<Vec<Claim>> {
        let mut claims: Vec<Claim> = self
            .claims
            .read()
            .unwrap()
            .values()
            .filter(|c| c.member_id == member_id && c.is_open())
            .cloned()
            .collect();
        claims.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.id.cmp(&b.id)));
        Ok(claims)
    }

    async fn claims_for_member(&self, member_id: MemberId) -> ReconcileResult<Vec<Claim>> {
        let mut claims: Vec<Claim> = self
            .claims
            .read()
            .unwrap()
            .values()
            .filter(|c| c.member_id == member_id)
            .cloned()
            .collect();
        claims.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.id.cmp(&b.id)));
        Ok(claims)
    }

    async fn insert_claim(&mut self, claim: &Claim) -> ReconcileResult<()> {
        self.claims
            .write()
            .unwrap()
            .insert(claim.id, claim.clone());
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for MemoryStorage {
    async fn payment(&self, payment_id: PaymentId) -> ReconcileResult<Option<Payment>> {
        Ok(self.payments.read().unwrap().get(&payment_id).cloned())
    }

    async fn allocated_total(&self, claim_id: ClaimId) -> ReconcileResult<BigDecimal> {
        Ok(self
            .allocations
            .read()
            .unwrap()
            .values()
            .filter(|a| a.claim_id == claim_id)
            .map(|a| &a.amount)
            .sum())
    }

    async fn allocations_for_payment(
        &self,
        payment_id: PaymentId,
    ) -> ReconcileResult<Vec<PaymentAllocation>> {
        let mut allocations: Vec<PaymentAllocation> = self
            .allocations
            .read()
            .unwrap()
            .values()
            .filter(|a| a.payment_id == payment_id)
            .cloned()
            .collect();
        allocations.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(allocations)
    }
}

#[async_trait]
impl AdvanceBalanceStore for MemoryStorage {
    async fn open_advances(&self, member_id: MemberId) -> ReconcileResult<Vec<AdvanceBalance>> {
        let mut advances: Vec<AdvanceBalance> = self
            .advances
            .read()
            .unwrap()
            .values()
            .filter(|a| a.member_id == member_id && a.remaining > BigDecimal::from(0))
            .cloned()
            .collect();
        advances.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(advances)
    }

    async fn advance_total(&self, member_id: MemberId) -> ReconcileResult<BigDecimal> {
        Ok(self
            .advances
            .read()
            .unwrap()
            .values()
            .filter(|a| a.member_id == member_id)
            .map(|a| &a.remaining)
            .sum())
    }
}

#[async_trait]
impl BankTransactionStore for MemoryStorage {
    async fn bank_transaction(
        &self,
        id: BankTransactionId,
    ) -> ReconcileResult<Option<BankTransaction>> {
        Ok(self.bank_transactions.read().unwrap().get(&id).cloned())
    }

    async fn fingerprint_exists(
        &self,
        bank_account_id: BankAccountId,
        fingerprint: &str,
    ) -> ReconcileResult<bool> {
        Ok(self
            .bank_transactions
            .read()
            .unwrap()
            .values()
            .any(|t| t.bank_account_id == bank_account_id && t.fingerprint == fingerprint))
    }

    async fn unmatched_for_verein(
        &self,
        verein_id: VereinId,
    ) -> ReconcileResult<Vec<BankTransaction>> {
        let mut transactions: Vec<BankTransaction> = self
            .bank_transactions
            .read()
            .unwrap()
            .values()
            .filter(|t| t.verein_id == verein_id && !t.matched && t.payment_id.is_none())
            .cloned()
            .collect();
        transactions.sort_by(|a, b| {
            b.posting_date
                .cmp(&a.posting_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(transactions)
    }
}

#[async_trait]
impl ReconciliationStorage for MemoryStorage {
    async fn commit_unit(&mut self, unit: LedgerCommit) -> ReconcileResult<()> {
        {
            let mut fail = self.fail_next_commit.write().unwrap();
            if *fail {
                *fail = false;
                return Err(ReconcileError::Storage(
                    "Injected commit failure".to_string(),
                ));
            }
        }

        // Validate everything against current state before touching it, so a
        // rejected unit leaves storage exactly as it was.
        self.validate_unit(&unit)?;

        if let Some(transaction) = unit.bank_transaction {
            self.bank_transactions
                .write()
                .unwrap()
                .insert(transaction.id, transaction);
        }
        if let Some(payment) = unit.payment {
            self.payments.write().unwrap().insert(payment.id, payment);
        }
        {
            let mut allocations = self.allocations.write().unwrap();
            for allocation in unit.allocations {
                allocations.insert(allocation.id, allocation);
            }
        }
        {
            let mut claims = self.claims.write().unwrap();
            for claim in unit.claim_updates {
                claims.insert(claim.id, claim);
            }
        }
        {
            let mut advances = self.advances.write().unwrap();
            if let Some(advance) = unit.new_advance {
                advances.insert(advance.id, advance);
            }
            for advance in unit.advance_updates {
                advances.insert(advance.id, advance);
            }
        }
        Ok(())
    }
}
