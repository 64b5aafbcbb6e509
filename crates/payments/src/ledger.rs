//! Ledger decisions over one agreement.
//!
//! A [`LedgerSnapshot`] is everything the ledger knows about one agreement,
//! loaded under the agreement's lock. Each decision method validates a command
//! against it and returns the [`LedgerChanges`] to persist, with every derived
//! figure (line paid/status, agreement status, retention released/status)
//! already recomputed from the underlying records. The agreement's version is
//! bumped by every non-empty change set.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use paybook_core::money::{ensure_positive, round_money, sum};
use paybook_core::{ActorId, AuditInfo, ReleaseId, ScheduleLineId, TransactionId};

use crate::agreement::{PaymentAgreement, SetRetentionTerms};
use crate::error::{PaymentError, PaymentResult};
use crate::policy::{LedgerPolicy, RetentionPolicy};
use crate::retention::{
    ReleaseRetention, ReleaseStatus, RetentionRelease, TransitionRelease, cumulative_released,
};
use crate::schedule::ScheduleLine;
use crate::transaction::{
    AmendTransaction, RecordTransaction, ReverseTransaction, Transaction, TransactionKind,
    TransactionStatus, clean_text, compute_tds,
};

const MAX_REFERENCE_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub agreement: PaymentAgreement,
    /// Ordered by installment number.
    pub lines: Vec<ScheduleLine>,
    pub transactions: Vec<Transaction>,
    pub releases: Vec<RetentionRelease>,
}

/// Records to insert (audit version 1) or update (version > 1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerChanges {
    pub agreement: Option<PaymentAgreement>,
    pub lines: Vec<ScheduleLine>,
    pub transactions: Vec<Transaction>,
    pub releases: Vec<RetentionRelease>,
}

impl LedgerChanges {
    pub fn is_empty(&self) -> bool {
        self.agreement.is_none()
            && self.lines.is_empty()
            && self.transactions.is_empty()
            && self.releases.is_empty()
    }

    pub fn transaction(&self, id: TransactionId) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.id == id)
    }

    pub fn line(&self, id: ScheduleLineId) -> Option<&ScheduleLine> {
        self.lines.iter().find(|l| l.id == id)
    }

    pub fn release(&self, id: ReleaseId) -> Option<&RetentionRelease> {
        self.releases.iter().find(|r| r.id == id)
    }
}

impl LedgerSnapshot {
    pub fn line(&self, id: ScheduleLineId) -> Option<&ScheduleLine> {
        self.lines.iter().find(|l| l.id == id)
    }

    pub fn transaction(&self, id: TransactionId) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.id == id)
    }

    pub fn release(&self, id: ReleaseId) -> Option<&RetentionRelease> {
        self.releases.iter().find(|r| r.id == id)
    }

    pub fn transactions_for_line(&self, id: ScheduleLineId) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter().filter(move |t| t.schedule_line_id == id)
    }

    pub fn total_paid(&self) -> Decimal {
        sum(self.lines.iter().map(|l| l.paid_amount))
    }

    pub fn balance_due(&self) -> Decimal {
        round_money((self.agreement.total_amount - self.total_paid()).max(Decimal::ZERO))
    }

    fn paid_for_line(&self, id: ScheduleLineId) -> Decimal {
        sum(self
            .transactions_for_line(id)
            .filter(|t| t.counts_towards_paid())
            .map(|t| t.amount))
    }

    fn check_overpayment(
        &self,
        line: &ScheduleLine,
        amount: Decimal,
        would_be: Decimal,
        policy: &LedgerPolicy,
    ) -> PaymentResult<()> {
        if would_be > line.amount + policy.overpayment_tolerance {
            return Err(PaymentError::OverpaymentRejected {
                line: line.id,
                amount,
                would_be,
                due: line.amount,
                tolerance: policy.overpayment_tolerance,
            });
        }
        Ok(())
    }

    pub fn record_transaction(
        &self,
        cmd: &RecordTransaction,
        policy: &LedgerPolicy,
    ) -> PaymentResult<LedgerChanges> {
        let line = self
            .line(cmd.schedule_line_id)
            .ok_or(PaymentError::ScheduleLineNotFound(cmd.schedule_line_id))?;
        if self.transaction(cmd.transaction_id).is_some() {
            return Err(PaymentError::Domain(paybook_core::DomainError::conflict(format!(
                "transaction {} already exists",
                cmd.transaction_id
            ))));
        }

        let amount = ensure_positive("amount", cmd.amount)?;
        let reference_number = clean_text(&cmd.reference_number);
        if reference_number
            .as_deref()
            .is_some_and(|r| r.len() > MAX_REFERENCE_LEN)
        {
            return Err(PaymentError::validation(format!(
                "reference_number must be at most {MAX_REFERENCE_LEN} characters"
            )));
        }

        let would_be = self.paid_for_line(line.id) + amount;
        self.check_overpayment(line, amount, would_be, policy)?;

        let mut transaction = Transaction {
            id: cmd.transaction_id,
            schedule_line_id: line.id,
            agreement_id: self.agreement.id,
            kind: TransactionKind::Payment,
            reverses: None,
            amount,
            method: cmd.method,
            reference_number,
            notes: clean_text(&cmd.notes),
            payment_date: cmd.payment_date,
            tds_percentage: Decimal::ZERO,
            tds_amount: Decimal::ZERO,
            net_amount: amount,
            tds_deducted_by: cmd.tds_deducted_by,
            category: cmd.category,
            status: TransactionStatus::Completed,
            recorded_by: cmd.actor,
            challan_id: None,
            tax_invoice_id: None,
            audit: AuditInfo::created(cmd.actor, cmd.occurred_at),
        };
        transaction.set_amounts(amount, cmd.tds_percentage)?;

        Ok(self.settle(vec![transaction], cmd.actor, cmd.occurred_at))
    }

    /// Corrections never edit the original amount: the original is marked
    /// `REVERSED` and an offsetting entry is appended.
    pub fn reverse_transaction(&self, cmd: &ReverseTransaction) -> PaymentResult<LedgerChanges> {
        let original = self
            .transaction(cmd.transaction_id)
            .ok_or(PaymentError::TransactionNotFound(cmd.transaction_id))?;
        if original.kind == TransactionKind::Reversal {
            return Err(PaymentError::InvalidTransactionState {
                transaction: original.id,
                reason: "reversal entries cannot be reversed".to_string(),
            });
        }
        if original.status == TransactionStatus::Reversed {
            return Err(PaymentError::TransactionAlreadyReversed(original.id));
        }
        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(PaymentError::validation("reversal reason must not be empty"));
        }

        let tds = compute_tds(original.amount, original.tds_percentage);
        let reversal = Transaction {
            id: cmd.reversal_id,
            schedule_line_id: original.schedule_line_id,
            agreement_id: original.agreement_id,
            kind: TransactionKind::Reversal,
            reverses: Some(original.id),
            amount: original.amount,
            method: original.method,
            reference_number: original.reference_number.clone(),
            notes: Some(reason.to_string()),
            payment_date: cmd.occurred_at.date_naive(),
            tds_percentage: original.tds_percentage,
            tds_amount: tds.tds_amount,
            net_amount: tds.net_amount,
            tds_deducted_by: original.tds_deducted_by,
            category: original.category,
            status: TransactionStatus::Completed,
            recorded_by: cmd.actor,
            challan_id: None,
            tax_invoice_id: None,
            audit: AuditInfo::created(cmd.actor, cmd.occurred_at),
        };

        let mut reversed = original.clone();
        reversed.status = TransactionStatus::Reversed;
        reversed.audit.touch(cmd.actor, cmd.occurred_at);

        Ok(self.settle(vec![reversed, reversal], cmd.actor, cmd.occurred_at))
    }

    /// In-place correction, allowed only until a challan or invoice references
    /// the transaction.
    pub fn amend_transaction(
        &self,
        cmd: &AmendTransaction,
        policy: &LedgerPolicy,
    ) -> PaymentResult<LedgerChanges> {
        let original = self
            .transaction(cmd.transaction_id)
            .ok_or(PaymentError::TransactionNotFound(cmd.transaction_id))?;
        if original.is_frozen() {
            return Err(PaymentError::TransactionFrozen(original.id));
        }
        if !original.counts_towards_paid() {
            return Err(PaymentError::InvalidTransactionState {
                transaction: original.id,
                reason: "only completed payments can be amended".to_string(),
            });
        }
        let line = self
            .line(original.schedule_line_id)
            .ok_or(PaymentError::ScheduleLineNotFound(original.schedule_line_id))?;

        let amount = ensure_positive("amount", cmd.amount)?;
        let would_be = self.paid_for_line(line.id) - original.amount + amount;
        self.check_overpayment(line, amount, would_be, policy)?;

        let mut amended = original.clone();
        amended.set_amounts(amount, cmd.tds_percentage)?;
        amended.audit.touch(cmd.actor, cmd.occurred_at);

        Ok(self.settle(vec![amended], cmd.actor, cmd.occurred_at))
    }

    pub fn release_retention(
        &self,
        cmd: &ReleaseRetention,
        policy: &RetentionPolicy,
    ) -> PaymentResult<LedgerChanges> {
        if cmd.amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidReleaseAmount(cmd.amount));
        }
        let amount = ensure_positive("amount", cmd.amount)?;

        let released = cumulative_released(&self.releases);
        if released + amount > self.agreement.retention_amount {
            return Err(PaymentError::RetentionExceeded {
                requested: amount,
                released,
                retention: self.agreement.retention_amount,
            });
        }

        let (status, approved_by) = if policy.auto_approve {
            (ReleaseStatus::Approved, Some(cmd.actor))
        } else {
            (ReleaseStatus::Pending, None)
        };
        let release = RetentionRelease {
            id: cmd.release_id,
            agreement_id: self.agreement.id,
            release_date: cmd.release_date.unwrap_or(cmd.occurred_at.date_naive()),
            amount,
            notes: clean_text(&cmd.notes),
            status,
            requested_by: cmd.actor,
            approved_by,
            audit: AuditInfo::created(cmd.actor, cmd.occurred_at),
        };

        let mut agreement = self.agreement.clone();
        agreement.apply_released(released + amount);
        agreement.audit.touch(cmd.actor, cmd.occurred_at);

        Ok(LedgerChanges {
            agreement: Some(agreement),
            releases: vec![release],
            ..Default::default()
        })
    }

    pub fn transition_release(&self, cmd: &TransitionRelease) -> PaymentResult<LedgerChanges> {
        let mut release = self
            .release(cmd.release_id)
            .cloned()
            .ok_or(PaymentError::ReleaseNotFound(cmd.release_id))?;
        release.transition(cmd.transition, cmd.actor, cmd.occurred_at)?;

        let released = cumulative_released(
            self.releases
                .iter()
                .map(|r| if r.id == release.id { &release } else { r }),
        );
        let mut agreement = self.agreement.clone();
        agreement.apply_released(released);
        agreement.audit.touch(cmd.actor, cmd.occurred_at);

        Ok(LedgerChanges {
            agreement: Some(agreement),
            releases: vec![release],
            ..Default::default()
        })
    }

    pub fn set_retention_terms(&self, cmd: &SetRetentionTerms) -> PaymentResult<LedgerChanges> {
        let mut agreement = self.agreement.clone();
        agreement.apply_retention_terms(cmd.retention_percentage, cmd.defect_liability_end_date)?;
        agreement.audit.touch(cmd.actor, cmd.occurred_at);
        Ok(LedgerChanges {
            agreement: Some(agreement),
            ..Default::default()
        })
    }

    /// Overdue sweep for `at`'s date. Empty when nothing changed.
    pub fn refresh_schedule(&self, actor: ActorId, at: DateTime<Utc>) -> LedgerChanges {
        let today = at.date_naive();
        let mut lines = self.lines.clone();
        let mut changed = Vec::new();
        for line in &mut lines {
            if line.refresh(today) {
                line.audit.touch(actor, at);
                changed.push(line.clone());
            }
        }
        if changed.is_empty() {
            return LedgerChanges::default();
        }

        let mut agreement = self.agreement.clone();
        agreement.apply_schedule(&lines);
        agreement.audit.touch(actor, at);
        LedgerChanges {
            agreement: Some(agreement),
            lines: changed,
            ..Default::default()
        }
    }

    /// Fold `changed` transactions into the ledger and re-derive every line
    /// they touch plus the agreement status.
    fn settle(&self, changed: Vec<Transaction>, actor: ActorId, at: DateTime<Utc>) -> LedgerChanges {
        let today = at.date_naive();
        let overrides: HashMap<TransactionId, &Transaction> = changed.iter().map(|t| (t.id, t)).collect();
        let mut merged: Vec<&Transaction> = self
            .transactions
            .iter()
            .map(|t| overrides.get(&t.id).copied().unwrap_or(t))
            .collect();
        let known: HashSet<TransactionId> = self.transactions.iter().map(|t| t.id).collect();
        merged.extend(changed.iter().filter(|t| !known.contains(&t.id)));

        let affected: HashSet<ScheduleLineId> = changed.iter().map(|t| t.schedule_line_id).collect();

        let mut lines = self.lines.clone();
        let mut changed_lines = Vec::new();
        for line in &mut lines {
            let settled = if affected.contains(&line.id) {
                let (paid, paid_date) = settlement(line, &merged);
                line.apply_settlement(paid, paid_date, today)
            } else {
                line.refresh(today)
            };
            if settled {
                line.audit.touch(actor, at);
                changed_lines.push(line.clone());
            }
        }

        let mut agreement = self.agreement.clone();
        agreement.apply_schedule(&lines);
        agreement.audit.touch(actor, at);

        LedgerChanges {
            agreement: Some(agreement),
            lines: changed_lines,
            transactions: changed,
            releases: Vec::new(),
        }
    }
}

/// Paid amount of `line` and the payment date of the transaction that
/// brought it to full.
fn settlement(line: &ScheduleLine, transactions: &[&Transaction]) -> (Decimal, Option<NaiveDate>) {
    let mut payments: Vec<&Transaction> = transactions
        .iter()
        .copied()
        .filter(|t| t.schedule_line_id == line.id && t.counts_towards_paid())
        .collect();
    payments.sort_by_key(|t| (t.payment_date, t.audit.created_at));

    let mut paid = Decimal::ZERO;
    let mut paid_date = None;
    for t in payments {
        paid += t.amount;
        if paid_date.is_none() && paid >= line.amount {
            paid_date = Some(t.payment_date);
        }
    }
    (round_money(paid), paid_date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::{
        AgreementStatus, CreateAgreement, PackageTerms, PaymentType, RetentionStatus, create_agreement,
    };
    use crate::policy::PaymentPolicy;
    use crate::retention::ReleaseTransition;
    use crate::schedule::{Installment, InstallmentPlan, LineStatus};
    use crate::transaction::{PaymentCategory, PaymentMethod, TdsDeductedBy};
    use chrono::TimeZone;
    use paybook_core::{AgreementId, ProjectId};
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 10, 0, 0).unwrap()
    }

    fn actor() -> ActorId {
        ActorId::from_uuid(uuid_for(7))
    }

    fn uuid_for(n: u128) -> uuid::Uuid {
        uuid::Uuid::from_u128(n)
    }

    /// Total 1,000,000.00 split 50/50, retention 10%.
    fn snapshot() -> LedgerSnapshot {
        let cmd = CreateAgreement {
            agreement_id: AgreementId::new(),
            project_id: ProjectId::new(),
            terms: PackageTerms {
                package_name: "Villa Design".to_string(),
                rate_per_sqft: d("1000"),
                total_sqft: d("1000"),
                discount_percentage: Decimal::ZERO,
            },
            payment_type: PaymentType::Installment,
            plan: Some(InstallmentPlan {
                installments: vec![
                    Installment::new("Advance", Decimal::ONE),
                    Installment::new("Handover", Decimal::ONE)
                        .due_on(NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()),
                ],
            }),
            full_payment_due_date: None,
            retention_percentage: Some(d("10")),
            defect_liability_end_date: None,
            actor: actor(),
            occurred_at: at(1),
        };
        let mut policy = PaymentPolicy::default();
        policy.tax.gst_percentage = Decimal::ZERO;
        let (agreement, lines) = create_agreement(&cmd, &policy).unwrap();
        LedgerSnapshot {
            agreement,
            lines,
            transactions: Vec::new(),
            releases: Vec::new(),
        }
    }

    fn record(line: ScheduleLineId, amount: &str, tds: &str, day: u32) -> RecordTransaction {
        RecordTransaction {
            transaction_id: TransactionId::new(),
            schedule_line_id: line,
            amount: d(amount),
            method: PaymentMethod::BankTransfer,
            reference_number: Some("UTR-1".to_string()),
            payment_date: at(day).date_naive(),
            tds_percentage: d(tds),
            tds_deducted_by: TdsDeductedBy::Customer,
            category: PaymentCategory::Progress,
            notes: None,
            actor: actor(),
            occurred_at: at(day),
        }
    }

    /// Apply a change set the way a store would.
    fn apply(snapshot: &mut LedgerSnapshot, changes: LedgerChanges) {
        if let Some(a) = changes.agreement {
            snapshot.agreement = a;
        }
        for line in changes.lines {
            let slot = snapshot.lines.iter_mut().find(|l| l.id == line.id).unwrap();
            *slot = line;
        }
        for t in changes.transactions {
            match snapshot.transactions.iter_mut().find(|x| x.id == t.id) {
                Some(slot) => *slot = t,
                None => snapshot.transactions.push(t),
            }
        }
        for r in changes.releases {
            match snapshot.releases.iter_mut().find(|x| x.id == r.id) {
                Some(slot) => *slot = r,
                None => snapshot.releases.push(r),
            }
        }
    }

    #[test]
    fn worked_example_transaction_and_retention() {
        let mut s = snapshot();
        assert_eq!(s.agreement.total_amount, d("1000000.00"));
        assert_eq!(s.agreement.retention_amount, d("100000.00"));

        let first = s.lines[0].id;
        let cmd = record(first, "500000.00", "1", 2);
        let changes = s.record_transaction(&cmd, &LedgerPolicy::default()).unwrap();
        let t = changes.transaction(cmd.transaction_id).unwrap();
        assert_eq!(t.tds_amount, d("5000.00"));
        assert_eq!(t.net_amount, d("495000.00"));
        apply(&mut s, changes);

        assert_eq!(s.lines[0].status, LineStatus::Paid);
        assert_eq!(s.lines[0].paid_date, Some(at(2).date_naive()));
        assert_eq!(s.agreement.status, AgreementStatus::Partial);

        let agreement_id = s.agreement.id;
        let release = |amount: &str| ReleaseRetention {
            release_id: ReleaseId::new(),
            agreement_id,
            amount: d(amount),
            notes: None,
            release_date: None,
            actor: actor(),
            occurred_at: at(3),
        };
        let ok = s.release_retention(&release("40000.00"), &RetentionPolicy::default()).unwrap();
        apply(&mut s, ok);
        assert_eq!(s.agreement.retention_released_amount, d("40000.00"));
        assert_eq!(s.agreement.retention_status, RetentionStatus::PartiallyReleased);

        let err = s
            .release_retention(&release("70000.00"), &RetentionPolicy::default())
            .unwrap_err();
        assert!(matches!(err, PaymentError::RetentionExceeded { .. }));
    }

    #[test]
    fn partial_payment_surfaces_at_agreement_level() {
        let s = snapshot();
        let changes = s
            .record_transaction(&record(s.lines[1].id, "100.00", "0", 2), &LedgerPolicy::default())
            .unwrap();
        let line = changes.line(s.lines[1].id).unwrap();
        assert_eq!(line.status, LineStatus::Pending);
        assert_eq!(line.paid_amount, d("100.00"));
        assert_eq!(changes.agreement.as_ref().unwrap().status, AgreementStatus::Partial);
    }

    #[test]
    fn paying_every_line_marks_agreement_paid() {
        let mut s = snapshot();
        for idx in 0..2 {
            let line = s.lines[idx].id;
            let changes = s
                .record_transaction(&record(line, "500000.00", "2", 5), &LedgerPolicy::default())
                .unwrap();
            apply(&mut s, changes);
        }
        assert!(s.lines.iter().all(|l| l.status == LineStatus::Paid));
        assert_eq!(s.agreement.status, AgreementStatus::Paid);
        assert_eq!(s.balance_due(), d("0.00"));
        // one create + two ledger writes
        assert_eq!(s.agreement.audit.version, 3);
    }

    #[test]
    fn overpayment_beyond_tolerance_is_rejected() {
        let s = snapshot();
        let line = s.lines[0].id;
        let err = s
            .record_transaction(&record(line, "500000.01", "0", 2), &LedgerPolicy::default())
            .unwrap_err();
        assert!(matches!(err, PaymentError::OverpaymentRejected { .. }));

        let lenient = LedgerPolicy {
            overpayment_tolerance: d("1.00"),
        };
        assert!(s.record_transaction(&record(line, "500000.50", "0", 2), &lenient).is_ok());
    }

    #[test]
    fn unknown_line_is_not_found() {
        let s = snapshot();
        let err = s
            .record_transaction(&record(ScheduleLineId::new(), "1.00", "0", 2), &LedgerPolicy::default())
            .unwrap_err();
        assert!(matches!(err, PaymentError::ScheduleLineNotFound(_)));
    }

    #[test]
    fn reversal_restores_the_line_and_cannot_repeat() {
        let mut s = snapshot();
        let line = s.lines[0].id;
        let pay = record(line, "500000.00", "0", 2);
        let changes = s.record_transaction(&pay, &LedgerPolicy::default()).unwrap();
        apply(&mut s, changes);

        let reverse = ReverseTransaction {
            reversal_id: TransactionId::new(),
            transaction_id: pay.transaction_id,
            reason: "cheque bounced".to_string(),
            actor: actor(),
            occurred_at: at(4),
        };
        let changes = s.reverse_transaction(&reverse).unwrap();
        apply(&mut s, changes);

        assert_eq!(s.lines[0].paid_amount, d("0.00"));
        assert_eq!(s.lines[0].status, LineStatus::Pending);
        assert_eq!(s.lines[0].paid_date, None);
        assert_eq!(s.agreement.status, AgreementStatus::Pending);
        let original = s.transaction(pay.transaction_id).unwrap();
        assert_eq!(original.status, TransactionStatus::Reversed);
        let entry = s.transaction(reverse.reversal_id).unwrap();
        assert_eq!(entry.reverses, Some(pay.transaction_id));

        assert!(matches!(
            s.reverse_transaction(&ReverseTransaction {
                reversal_id: TransactionId::new(),
                ..reverse.clone()
            }),
            Err(PaymentError::TransactionAlreadyReversed(_))
        ));
        assert!(matches!(
            s.reverse_transaction(&ReverseTransaction {
                reversal_id: TransactionId::new(),
                transaction_id: reverse.reversal_id,
                ..reverse
            }),
            Err(PaymentError::InvalidTransactionState { .. })
        ));
    }

    #[test]
    fn amend_is_refused_once_a_document_references_the_transaction() {
        let mut s = snapshot();
        let pay = record(s.lines[0].id, "1000.00", "0", 2);
        let changes = s.record_transaction(&pay, &LedgerPolicy::default()).unwrap();
        apply(&mut s, changes);

        let amend = AmendTransaction {
            transaction_id: pay.transaction_id,
            amount: d("1500.00"),
            tds_percentage: d("2"),
            actor: actor(),
            occurred_at: at(3),
        };
        let changes = s.amend_transaction(&amend, &LedgerPolicy::default()).unwrap();
        let amended = changes.transaction(pay.transaction_id).unwrap();
        assert_eq!(amended.tds_amount, d("30.00"));
        assert_eq!(amended.net_amount, d("1470.00"));
        apply(&mut s, changes);
        assert_eq!(s.lines[0].paid_amount, d("1500.00"));

        let t = s.transactions.iter_mut().find(|t| t.id == pay.transaction_id).unwrap();
        t.link_challan(paybook_core::ChallanId::new(), actor(), at(4)).unwrap();

        let err = s.amend_transaction(&amend, &LedgerPolicy::default()).unwrap_err();
        assert_eq!(err, PaymentError::TransactionFrozen(pay.transaction_id));
    }

    #[test]
    fn rejected_release_frees_retention() {
        let mut s = snapshot();
        let request = ReleaseRetention {
            release_id: ReleaseId::new(),
            agreement_id: s.agreement.id,
            amount: d("100000.00"),
            notes: Some("DLP over".to_string()),
            release_date: None,
            actor: actor(),
            occurred_at: at(3),
        };
        let changes = s.release_retention(&request, &RetentionPolicy::default()).unwrap();
        apply(&mut s, changes);
        assert_eq!(s.agreement.retention_status, RetentionStatus::Released);
        assert_eq!(s.releases[0].status, ReleaseStatus::Pending);

        let changes = s
            .transition_release(&TransitionRelease {
                release_id: request.release_id,
                transition: ReleaseTransition::Reject,
                actor: actor(),
                occurred_at: at(4),
            })
            .unwrap();
        apply(&mut s, changes);
        assert_eq!(s.agreement.retention_released_amount, d("0.00"));
        assert_eq!(s.agreement.retention_status, RetentionStatus::Active);
    }

    #[test]
    fn non_positive_release_is_invalid() {
        let s = snapshot();
        let err = s
            .release_retention(
                &ReleaseRetention {
                    release_id: ReleaseId::new(),
                    agreement_id: s.agreement.id,
                    amount: Decimal::ZERO,
                    notes: None,
                    release_date: None,
                    actor: actor(),
                    occurred_at: at(3),
                },
                &RetentionPolicy::default(),
            )
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidReleaseAmount(_)));
    }

    #[test]
    fn auto_approve_policy_sets_approver() {
        let s = snapshot();
        let policy = RetentionPolicy {
            auto_approve: true,
            ..RetentionPolicy::default()
        };
        let request = ReleaseRetention {
            release_id: ReleaseId::new(),
            agreement_id: s.agreement.id,
            amount: d("10.00"),
            notes: None,
            release_date: None,
            actor: actor(),
            occurred_at: at(3),
        };
        let changes = s.release_retention(&request, &policy).unwrap();
        let release = changes.release(request.release_id).unwrap();
        assert_eq!(release.status, ReleaseStatus::Approved);
        assert_eq!(release.approved_by, Some(actor()));
    }

    #[test]
    fn refresh_marks_past_due_lines_overdue_once() {
        let mut s = snapshot();
        let changes = s.refresh_schedule(actor(), at(11));
        assert_eq!(changes.lines.len(), 1);
        assert_eq!(changes.lines[0].status, LineStatus::Overdue);
        apply(&mut s, changes);

        assert!(s.refresh_schedule(actor(), at(12)).is_empty());
    }

    #[test]
    fn retention_terms_recompute_amount() {
        let s = snapshot();
        let changes = s
            .set_retention_terms(&SetRetentionTerms {
                agreement_id: s.agreement.id,
                retention_percentage: d("5"),
                defect_liability_end_date: NaiveDate::from_ymd_opt(2025, 6, 1),
                actor: actor(),
                occurred_at: at(3),
            })
            .unwrap();
        let agreement = changes.agreement.unwrap();
        assert_eq!(agreement.retention_amount, d("50000.00"));
        assert_eq!(agreement.defect_liability_end_date, NaiveDate::from_ymd_opt(2025, 6, 1));
    }
}
