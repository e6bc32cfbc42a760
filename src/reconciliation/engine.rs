//! Main orchestrator driving the per-row reconciliation pipeline

use std::collections::HashMap;

use bigdecimal::BigDecimal;
use tracing::{debug, info, instrument, warn};

use crate::reconciliation::allocation::{plan_advance_consumption, plan_allocation, MemberLedger};
use crate::reconciliation::batch::BatchLedgers;
use crate::reconciliation::fingerprint::row_fingerprint;
use crate::reconciliation::matcher::{MatchResult, MatcherConfig, MemberMatcher};
use crate::reconciliation::writer::{LedgerCommit, LedgerWriter};
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{validate_positive_amount, validate_row};

/// Reconciliation engine over a storage backend and a member directory.
///
/// One batch is one synchronous unit of work; the engine takes `&mut self`
/// for the whole run, so two batches can never interleave on the same
/// instance and rows are processed strictly in file order.
pub struct ReconciliationEngine<S: ReconciliationStorage, D: MemberDirectory> {
    storage: S,
    directory: D,
    matcher_config: MatcherConfig,
}

impl<S: ReconciliationStorage, D: MemberDirectory> ReconciliationEngine<S, D> {
    /// Create an engine with default matcher thresholds
    pub fn new(storage: S, directory: D) -> Self {
        Self {
            storage,
            directory,
            matcher_config: MatcherConfig::default(),
        }
    }

    /// Create an engine with custom matcher thresholds
    pub fn with_config(storage: S, directory: D, matcher_config: MatcherConfig) -> Self {
        Self {
            storage,
            directory,
            matcher_config,
        }
    }

    /// Read access to the underlying storage
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Normalize an uploaded statement file and reconcile its rows
    pub async fn process_file<N: RowNormalizer>(
        &mut self,
        normalizer: &N,
        file: &[u8],
        bank_account_id: BankAccountId,
        verein_id: VereinId,
    ) -> ReconcileResult<ReconciliationReport> {
        let rows = normalizer
            .normalize(file)
            .await
            .map_err(|e| ReconcileError::Normalizer(e.to_string()))?;
        self.process_upload(bank_account_id, verein_id, rows).await
    }

    /// Reconcile a batch of candidate rows against one bank account.
    ///
    /// Row-level failures are recorded and skipped; the batch always runs to
    /// completion. Only a member-directory failure aborts the whole run,
    /// since without the directory no row can be matched.
    #[instrument(skip(self, rows), fields(row_count = rows.len()))]
    pub async fn process_upload(
        &mut self,
        bank_account_id: BankAccountId,
        verein_id: VereinId,
        rows: Vec<CandidateRow>,
    ) -> ReconcileResult<ReconciliationReport> {
        let matcher = self.build_matcher(verein_id).await?;
        let mut ledgers = BatchLedgers::new();
        let mut report = ReconciliationReport::new();

        for row in &rows {
            let row_report = self
                .process_row(row, bank_account_id, verein_id, &matcher, &mut ledgers)
                .await;
            report.record(row_report);
        }

        info!(
            matched = report.matched_count,
            unmatched = report.unmatched_count,
            ambiguous = report.ambiguous_count,
            duplicates = report.duplicate_count,
            errors = report.error_count,
            total_allocated = %report.total_allocated,
            total_advanced = %report.total_advanced,
            "batch finished"
        );
        Ok(report)
    }

    /// Consume the member's advance balance against a claim, oldest advance
    /// record first. Returns the allocations created, possibly none.
    pub async fn consume_advance(
        &mut self,
        claim_id: ClaimId,
    ) -> ReconcileResult<Vec<PaymentAllocation>> {
        let claim = self
            .storage
            .claim(claim_id)
            .await?
            .ok_or(ReconcileError::ClaimNotFound(claim_id))?;
        let paid = self.storage.allocated_total(claim_id).await?;
        let advances = self.storage.open_advances(claim.member_id).await?;

        let value_date = chrono::Utc::now().date_naive();
        let plan = plan_advance_consumption(&claim, &paid, &advances, value_date)?;
        if plan.is_empty() {
            return Ok(Vec::new());
        }

        let allocations = plan.allocations.clone();
        LedgerWriter::persist(&mut self.storage, LedgerCommit::advance_consumption(&plan))
            .await?;
        info!(
            claim_id = %claim_id,
            member_id = %claim.member_id,
            consumed = %allocations.iter().map(|a| &a.amount).sum::<BigDecimal>(),
            "consumed advance balance"
        );
        Ok(allocations)
    }

    /// Register a new claim and immediately settle it from any advance
    /// balance the member holds.
    ///
    /// Returns the claim as stored (status may already be PartiallyPaid or
    /// Paid) and the allocations created from advance records.
    pub async fn register_claim(
        &mut self,
        claim: Claim,
    ) -> ReconcileResult<(Claim, Vec<PaymentAllocation>)> {
        validate_positive_amount(&claim.amount)?;
        let claim_id = claim.id;
        self.storage.insert_claim(&claim).await?;

        let allocations = self.consume_advance(claim_id).await?;
        let claim = self
            .storage
            .claim(claim_id)
            .await?
            .ok_or(ReconcileError::ClaimNotFound(claim_id))?;
        Ok((claim, allocations))
    }

    /// Recorded statement lines without a member match, newest first
    pub async fn unmatched_transactions(
        &self,
        verein_id: VereinId,
    ) -> ReconcileResult<Vec<BankTransaction>> {
        self.storage.unmatched_for_verein(verein_id).await
    }

    /// Operator resolution of an unmatched or ambiguous statement line.
    ///
    /// Creates the payment and runs the standard allocation path for the
    /// chosen member, as one atomic unit. Rejects lines that already carry a
    /// match.
    pub async fn manual_match(
        &mut self,
        transaction_id: BankTransactionId,
        member_id: MemberId,
    ) -> ReconcileResult<RowReport> {
        let transaction = self
            .storage
            .bank_transaction(transaction_id)
            .await?
            .ok_or(ReconcileError::TransactionNotFound(transaction_id))?;
        if transaction.matched || transaction.payment_id.is_some() {
            return Err(ReconcileError::AlreadyMatched(transaction_id));
        }

        let members = self
            .directory
            .list_active_members(transaction.verein_id)
            .await
            .map_err(|e| ReconcileError::DirectoryUnavailable(e.to_string()))?;
        if !members.iter().any(|m| m.id == member_id) {
            return Err(ReconcileError::MemberNotFound(member_id));
        }

        let row_index = 0;
        if transaction.amount <= BigDecimal::from(0) {
            let mut matched = transaction;
            matched.matched = true;
            LedgerWriter::persist(&mut self.storage, LedgerCommit::transaction_only(matched))
                .await?;
            let mut report = RowReport::bare(row_index, RowOutcome::MatchedNoPayment);
            report.member_id = Some(member_id);
            return Ok(report);
        }

        let payment = Payment::from_bank_transaction(&transaction, member_id);
        let ledger = MemberLedger::load(&self.storage, member_id).await?;
        let plan = plan_allocation(&ledger, &payment)?;
        let unit = LedgerCommit::matched_row(transaction, payment, &plan);
        LedgerWriter::persist(&mut self.storage, unit).await?;

        Ok(RowReport {
            row_index,
            outcome: RowOutcome::Matched,
            member_id: Some(member_id),
            amount_allocated: Some(plan.allocated_total()),
            amount_advanced: Some(plan.advance_delta.clone()),
            currency_mismatch: plan.currency_mismatch,
        })
    }

    /// Manual match where the operator typed a member number instead of
    /// picking a member
    pub async fn manual_match_by_number(
        &mut self,
        transaction_id: BankTransactionId,
        number: &str,
    ) -> ReconcileResult<RowReport> {
        let transaction = self
            .storage
            .bank_transaction(transaction_id)
            .await?
            .ok_or(ReconcileError::TransactionNotFound(transaction_id))?;
        let member_id = self
            .directory
            .find_member_by_number(transaction.verein_id, number)
            .await
            .map_err(|e| ReconcileError::DirectoryUnavailable(e.to_string()))?
            .ok_or_else(|| {
                ReconcileError::Validation(format!("No active member with number '{}'", number))
            })?;
        self.manual_match(transaction_id, member_id).await
    }

    /// Finance snapshot of one member: outstanding, paid, and advance totals
    pub async fn member_summary(
        &self,
        member_id: MemberId,
    ) -> ReconcileResult<MemberFinanceSummary> {
        let claims = self.storage.claims_for_member(member_id).await?;

        let mut outstanding_total = BigDecimal::from(0);
        let mut paid_total = BigDecimal::from(0);
        let mut open_claim_count = 0;
        let mut paid_claim_count = 0;

        for claim in &claims {
            if claim.status == ClaimStatus::Cancelled {
                continue;
            }
            let paid = self.storage.allocated_total(claim.id).await?;
            outstanding_total += claim.remaining(&paid);
            paid_total += paid;
            match claim.status {
                ClaimStatus::Paid => paid_claim_count += 1,
                ClaimStatus::Open | ClaimStatus::PartiallyPaid => open_claim_count += 1,
                ClaimStatus::Cancelled => {}
            }
        }

        Ok(MemberFinanceSummary {
            member_id,
            outstanding_total,
            paid_total,
            advance_total: self.storage.advance_total(member_id).await?,
            open_claim_count,
            paid_claim_count,
        })
    }

    /// Build the per-batch matching index from the member directory.
    ///
    /// Directory failures here are catastrophic and abort the batch.
    async fn build_matcher(&self, verein_id: VereinId) -> ReconcileResult<MemberMatcher> {
        let members = self
            .directory
            .list_active_members(verein_id)
            .await
            .map_err(|e| ReconcileError::DirectoryUnavailable(e.to_string()))?;

        let mut member_ibans: HashMap<MemberId, Vec<String>> = HashMap::new();
        for member in &members {
            let ibans = self
                .directory
                .registered_ibans(member.id)
                .await
                .map_err(|e| ReconcileError::DirectoryUnavailable(e.to_string()))?;
            if !ibans.is_empty() {
                member_ibans.insert(member.id, ibans);
            }
        }

        let association_ibans = self
            .directory
            .list_association_ibans(verein_id)
            .await
            .map_err(|e| ReconcileError::DirectoryUnavailable(e.to_string()))?;

        info!(
            members = members.len(),
            association_ibans = association_ibans.len(),
            "built matching index"
        );
        Ok(MemberMatcher::build(
            &members,
            &member_ibans,
            &association_ibans,
            self.matcher_config.clone(),
        ))
    }

    /// Run one row through the pipeline; never propagates row-level errors
    async fn process_row(
        &mut self,
        row: &CandidateRow,
        bank_account_id: BankAccountId,
        verein_id: VereinId,
        matcher: &MemberMatcher,
        ledgers: &mut BatchLedgers,
    ) -> RowReport {
        let valid = match validate_row(row) {
            Ok(valid) => valid,
            Err(reason) => {
                return RowReport::bare(row.row_index, RowOutcome::Skipped { reason });
            }
        };

        let fingerprint = row_fingerprint(bank_account_id, &valid);
        match self
            .storage
            .fingerprint_exists(bank_account_id, &fingerprint)
            .await
        {
            Ok(true) => return RowReport::bare(row.row_index, RowOutcome::Duplicate),
            Ok(false) => {}
            Err(error) => return errored_row(row.row_index, error),
        }

        let transaction = BankTransaction::from_row(&valid, bank_account_id, verein_id, fingerprint);

        match matcher.match_row(&valid) {
            MatchResult::Unmatched => {
                let unit = LedgerCommit::transaction_only(transaction);
                match LedgerWriter::persist(&mut self.storage, unit).await {
                    Ok(()) => RowReport::bare(row.row_index, RowOutcome::Unmatched),
                    Err(error) => errored_row(row.row_index, error),
                }
            }
            MatchResult::Ambiguous { candidates } => {
                let unit = LedgerCommit::transaction_only(transaction);
                match LedgerWriter::persist(&mut self.storage, unit).await {
                    Ok(()) => {
                        RowReport::bare(row.row_index, RowOutcome::Ambiguous { candidates })
                    }
                    Err(error) => errored_row(row.row_index, error),
                }
            }
            MatchResult::Matched {
                member_id,
                confidence,
            } => {
                debug!(row_index = row.row_index, member_id = %member_id, ?confidence, "row matched");
                if valid.amount <= BigDecimal::from(0) {
                    // Outgoing or zero amount: record the match, no payment.
                    let mut matched = transaction;
                    matched.matched = true;
                    let unit = LedgerCommit::transaction_only(matched);
                    return match LedgerWriter::persist(&mut self.storage, unit).await {
                        Ok(()) => {
                            let mut report =
                                RowReport::bare(row.row_index, RowOutcome::MatchedNoPayment);
                            report.member_id = Some(member_id);
                            report
                        }
                        Err(error) => errored_row(row.row_index, error),
                    };
                }

                let payment = Payment::from_bank_transaction(&transaction, member_id);
                let ledger = match ledgers.ledger_for(&self.storage, member_id).await {
                    Ok(ledger) => ledger,
                    Err(error) => return errored_row(row.row_index, error),
                };
                let plan = match plan_allocation(ledger, &payment) {
                    Ok(plan) => plan,
                    Err(error) => return errored_row(row.row_index, error),
                };

                let unit = LedgerCommit::matched_row(transaction, payment, &plan);
                match LedgerWriter::persist(&mut self.storage, unit).await {
                    Ok(()) => {
                        ledger.apply(&plan);
                        RowReport {
                            row_index: row.row_index,
                            outcome: RowOutcome::Matched,
                            member_id: Some(member_id),
                            amount_allocated: Some(plan.allocated_total()),
                            amount_advanced: Some(plan.advance_delta.clone()),
                            currency_mismatch: plan.currency_mismatch,
                        }
                    }
                    Err(error) => {
                        // The snapshot may have diverged from storage.
                        ledgers.invalidate(member_id);
                        errored_row(row.row_index, error)
                    }
                }
            }
        }
    }
}

fn errored_row(row_index: usize, error: ReconcileError) -> RowReport {
    warn!(row_index, %error, "row failed, continuing batch");
    RowReport::bare(
        row_index,
        RowOutcome::Errored {
            message: error.to_string(),
        },
    )
}
