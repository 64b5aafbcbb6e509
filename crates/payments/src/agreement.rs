//! Design-package payment agreement and its retention terms.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use paybook_core::money::{
    MAX_AMOUNT, checked_percentage_of, ensure_percentage, ensure_positive, percentage_of, round_money,
};
use paybook_core::{ActorId, AggregateRoot, AgreementId, AuditInfo, DomainError, ProjectId};

use crate::error::{PaymentError, PaymentResult};
use crate::policy::PaymentPolicy;
use crate::schedule::{InstallmentPlan, ScheduleLine, build_schedule};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Full,
    Installment,
}

impl_text_enum!(PaymentType, "payment type", {
    Full => "FULL",
    Installment => "INSTALLMENT",
});

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgreementStatus {
    Pending,
    Partial,
    Paid,
}

impl_text_enum!(AgreementStatus, "agreement status", {
    Pending => "PENDING",
    Partial => "PARTIAL",
    Paid => "PAID",
});

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetentionStatus {
    Active,
    PartiallyReleased,
    Released,
}

impl_text_enum!(RetentionStatus, "retention status", {
    Active => "ACTIVE",
    PartiallyReleased => "PARTIALLY_RELEASED",
    Released => "RELEASED",
});

/// All lines paid ⇒ `PAID`; any money received ⇒ `PARTIAL`; else `PENDING`.
pub fn derive_agreement_status<'a, I>(lines: I) -> AgreementStatus
where
    I: IntoIterator<Item = &'a ScheduleLine>,
{
    let mut any_line = false;
    let mut all_paid = true;
    let mut any_paid = false;
    for line in lines {
        any_line = true;
        all_paid &= line.is_paid();
        any_paid |= line.paid_amount > Decimal::ZERO;
    }
    if any_line && all_paid {
        AgreementStatus::Paid
    } else if any_paid {
        AgreementStatus::Partial
    } else {
        AgreementStatus::Pending
    }
}

pub fn derive_retention_status(released: Decimal, retention_amount: Decimal) -> RetentionStatus {
    if released <= Decimal::ZERO {
        RetentionStatus::Active
    } else if released >= retention_amount {
        RetentionStatus::Released
    } else {
        RetentionStatus::PartiallyReleased
    }
}

/// Commercial terms of the design package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageTerms {
    pub package_name: String,
    pub rate_per_sqft: Decimal,
    pub total_sqft: Decimal,
    #[serde(default)]
    pub discount_percentage: Decimal,
}

/// Price build-up of an agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementAmounts {
    pub base_amount: Decimal,
    pub gst_percentage: Decimal,
    pub gst_amount: Decimal,
    pub discount_percentage: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
}

impl AgreementAmounts {
    /// base = rate × area, GST on base, discount on base + GST.
    pub fn compute(terms: &PackageTerms, gst_percentage: Decimal) -> PaymentResult<Self> {
        let rate = ensure_positive("rate_per_sqft", terms.rate_per_sqft)?;
        let area = ensure_positive("total_sqft", terms.total_sqft)?;
        let gst_percentage = ensure_percentage("gst_percentage", gst_percentage)?;
        let discount_percentage = ensure_percentage("discount_percentage", terms.discount_percentage)?;

        let out_of_range = || DomainError::validation("agreement amount out of range");
        let base_amount = rate
            .checked_mul(area)
            .map(round_money)
            .filter(|base| *base <= MAX_AMOUNT)
            .ok_or_else(out_of_range)?;
        let gst_amount = checked_percentage_of(base_amount, gst_percentage).ok_or_else(out_of_range)?;
        let subtotal = base_amount.checked_add(gst_amount).ok_or_else(out_of_range)?;
        let discount_amount =
            checked_percentage_of(subtotal, discount_percentage).ok_or_else(out_of_range)?;
        let total_amount = round_money(subtotal - discount_amount);

        if total_amount <= Decimal::ZERO {
            return Err(DomainError::validation("agreement total must be greater than zero").into());
        }

        Ok(Self {
            base_amount,
            gst_percentage,
            gst_amount,
            discount_percentage,
            discount_amount,
            total_amount,
        })
    }
}

/// Aggregate root: one payment agreement per project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAgreement {
    pub id: AgreementId,
    pub project_id: ProjectId,
    pub package_name: String,
    pub payment_type: PaymentType,
    pub rate_per_sqft: Decimal,
    pub total_sqft: Decimal,
    pub base_amount: Decimal,
    pub gst_percentage: Decimal,
    pub gst_amount: Decimal,
    pub discount_percentage: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub retention_percentage: Decimal,
    /// Derived: `round(total_amount * retention_percentage / 100, 2)`.
    pub retention_amount: Decimal,
    /// Derived: sum of non-rejected retention releases.
    pub retention_released_amount: Decimal,
    /// Derived from `retention_released_amount` vs `retention_amount`.
    pub retention_status: RetentionStatus,
    pub defect_liability_end_date: Option<NaiveDate>,
    /// Derived from the schedule lines.
    pub status: AgreementStatus,
    pub audit: AuditInfo,
}

impl AggregateRoot for PaymentAgreement {
    type Id = AgreementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.audit.version
    }
}

impl PaymentAgreement {
    pub fn retention_remaining(&self) -> Decimal {
        (self.retention_amount - self.retention_released_amount).max(Decimal::ZERO)
    }

    /// Re-derive status from the (already settled) schedule.
    pub(crate) fn apply_schedule<'a, I>(&mut self, lines: I)
    where
        I: IntoIterator<Item = &'a ScheduleLine>,
    {
        self.status = derive_agreement_status(lines);
    }

    pub(crate) fn apply_released(&mut self, released: Decimal) {
        self.retention_released_amount = round_money(released);
        self.retention_status = derive_retention_status(self.retention_released_amount, self.retention_amount);
    }

    /// Change the retention percentage; the amount is recomputed and must still
    /// cover what has already been released.
    pub(crate) fn apply_retention_terms(
        &mut self,
        retention_percentage: Decimal,
        defect_liability_end_date: Option<NaiveDate>,
    ) -> PaymentResult<()> {
        let retention_percentage = ensure_percentage("retention_percentage", retention_percentage)?;
        let retention_amount = percentage_of(self.total_amount, retention_percentage);
        if retention_amount < self.retention_released_amount {
            return Err(PaymentError::RetentionExceeded {
                requested: Decimal::ZERO,
                released: self.retention_released_amount,
                retention: retention_amount,
            });
        }
        self.retention_percentage = retention_percentage;
        self.retention_amount = retention_amount;
        self.defect_liability_end_date = defect_liability_end_date;
        self.retention_status = derive_retention_status(self.retention_released_amount, retention_amount);
        Ok(())
    }
}

/// Command: CreateAgreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAgreement {
    pub agreement_id: AgreementId,
    pub project_id: ProjectId,
    pub terms: PackageTerms,
    pub payment_type: PaymentType,
    /// Installment split; `None` uses the three design milestones. Not allowed for `FULL`.
    pub plan: Option<InstallmentPlan>,
    /// Due date of the single line of a `FULL` agreement.
    pub full_payment_due_date: Option<NaiveDate>,
    /// Overrides the policy default.
    pub retention_percentage: Option<Decimal>,
    pub defect_liability_end_date: Option<NaiveDate>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetRetentionTerms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRetentionTerms {
    pub agreement_id: AgreementId,
    pub retention_percentage: Decimal,
    pub defect_liability_end_date: Option<NaiveDate>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Decide a new agreement and its schedule. Uniqueness per project is the
/// caller's (store's) responsibility.
pub fn create_agreement(
    cmd: &CreateAgreement,
    policy: &PaymentPolicy,
) -> PaymentResult<(PaymentAgreement, Vec<ScheduleLine>)> {
    let package_name = cmd.terms.package_name.trim();
    if package_name.is_empty() {
        return Err(PaymentError::validation("package_name must not be empty"));
    }

    let amounts = AgreementAmounts::compute(&cmd.terms, policy.tax.gst_percentage)?;
    let retention_percentage = ensure_percentage(
        "retention_percentage",
        cmd.retention_percentage
            .unwrap_or(policy.retention.default_percentage),
    )?;
    let retention_amount = percentage_of(amounts.total_amount, retention_percentage);

    let plan = match (cmd.payment_type, &cmd.plan) {
        (PaymentType::Full, None) => InstallmentPlan::full_payment(cmd.full_payment_due_date),
        (PaymentType::Full, Some(_)) => {
            return Err(PaymentError::validation(
                "FULL payment agreements do not take an installment plan",
            ));
        }
        (PaymentType::Installment, Some(plan)) => plan.clone(),
        (PaymentType::Installment, None) => InstallmentPlan::milestones(),
    };

    let lines = build_schedule(
        cmd.agreement_id,
        &plan,
        amounts.total_amount,
        cmd.actor,
        cmd.occurred_at,
    )?;

    let released = round_money(Decimal::ZERO);
    let agreement = PaymentAgreement {
        id: cmd.agreement_id,
        project_id: cmd.project_id,
        package_name: package_name.to_string(),
        payment_type: cmd.payment_type,
        rate_per_sqft: cmd.terms.rate_per_sqft,
        total_sqft: cmd.terms.total_sqft,
        base_amount: amounts.base_amount,
        gst_percentage: amounts.gst_percentage,
        gst_amount: amounts.gst_amount,
        discount_percentage: amounts.discount_percentage,
        discount_amount: amounts.discount_amount,
        total_amount: amounts.total_amount,
        retention_percentage,
        retention_amount,
        retention_released_amount: released,
        retention_status: derive_retention_status(released, retention_amount),
        defect_liability_end_date: cmd.defect_liability_end_date,
        status: derive_agreement_status(&lines),
        audit: AuditInfo::created(cmd.actor, cmd.occurred_at),
    };

    Ok((agreement, lines))
}
