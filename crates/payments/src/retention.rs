//! Retention money releases.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use paybook_core::money::sum;
use paybook_core::{ActorId, AgreementId, AuditInfo, Entity, ReleaseId};

use crate::error::{PaymentError, PaymentResult};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseStatus {
    Pending,
    Approved,
    Paid,
    Rejected,
}

impl_text_enum!(ReleaseStatus, "release status", {
    Pending => "PENDING",
    Approved => "APPROVED",
    Paid => "PAID",
    Rejected => "REJECTED",
});

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseTransition {
    Approve,
    MarkPaid,
    Reject,
}

impl ReleaseTransition {
    pub fn target(&self) -> ReleaseStatus {
        match self {
            ReleaseTransition::Approve => ReleaseStatus::Approved,
            ReleaseTransition::MarkPaid => ReleaseStatus::Paid,
            ReleaseTransition::Reject => ReleaseStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionRelease {
    pub id: ReleaseId,
    pub agreement_id: AgreementId,
    pub release_date: NaiveDate,
    pub amount: Decimal,
    pub notes: Option<String>,
    pub status: ReleaseStatus,
    pub requested_by: ActorId,
    pub approved_by: Option<ActorId>,
    pub audit: AuditInfo,
}

impl Entity for RetentionRelease {
    type Id = ReleaseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl RetentionRelease {
    pub fn counts_as_released(&self) -> bool {
        self.status != ReleaseStatus::Rejected
    }

    /// `PENDING → APPROVED → PAID`, and `PENDING | APPROVED → REJECTED`.
    pub(crate) fn transition(
        &mut self,
        transition: ReleaseTransition,
        actor: ActorId,
        at: DateTime<Utc>,
    ) -> PaymentResult<()> {
        let to = transition.target();
        let allowed = matches!(
            (self.status, transition),
            (ReleaseStatus::Pending, ReleaseTransition::Approve)
                | (ReleaseStatus::Approved, ReleaseTransition::MarkPaid)
                | (ReleaseStatus::Pending, ReleaseTransition::Reject)
                | (ReleaseStatus::Approved, ReleaseTransition::Reject)
        );
        if !allowed {
            return Err(PaymentError::InvalidReleaseTransition {
                release: self.id,
                from: self.status,
                to,
            });
        }
        if transition == ReleaseTransition::Approve {
            self.approved_by = Some(actor);
        }
        self.status = to;
        self.audit.touch(actor, at);
        Ok(())
    }
}

/// Sum of every release that has not been rejected.
pub fn cumulative_released<'a, I>(releases: I) -> Decimal
where
    I: IntoIterator<Item = &'a RetentionRelease>,
{
    sum(releases
        .into_iter()
        .filter(|r| r.counts_as_released())
        .map(|r| r.amount))
}

/// Command: ReleaseRetention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRetention {
    pub release_id: ReleaseId,
    pub agreement_id: AgreementId,
    pub amount: Decimal,
    pub notes: Option<String>,
    /// Defaults to the day the request is made.
    pub release_date: Option<NaiveDate>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransitionRelease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRelease {
    pub release_id: ReleaseId,
    pub transition: ReleaseTransition,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}
