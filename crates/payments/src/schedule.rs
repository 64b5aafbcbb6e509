//! Installment schedule: generation and status derivation.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use paybook_core::money::{round_money, sum};
use paybook_core::{ActorId, AgreementId, AuditInfo, DomainError, DomainResult, Entity, ScheduleLineId};

/// Stored status of an installment.
///
/// Partial payment has no state of its own: it shows up as `paid_amount` on the
/// line and as `PARTIAL` on the agreement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineStatus {
    Pending,
    Paid,
    Overdue,
}

impl_text_enum!(LineStatus, "schedule line status", {
    Pending => "PENDING",
    Paid => "PAID",
    Overdue => "OVERDUE",
});

/// Pure status derivation; calling it repeatedly with the same inputs always
/// yields the same status.
pub fn derive_line_status(
    paid_amount: Decimal,
    amount: Decimal,
    due_date: Option<NaiveDate>,
    today: NaiveDate,
) -> LineStatus {
    if paid_amount >= amount {
        LineStatus::Paid
    } else if due_date.is_some_and(|due| due < today) {
        LineStatus::Overdue
    } else {
        LineStatus::Pending
    }
}

/// One installment of an agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleLine {
    pub id: ScheduleLineId,
    pub agreement_id: AgreementId,
    /// 1-based position within the agreement.
    pub installment_number: u32,
    pub description: String,
    pub amount: Decimal,
    pub due_date: Option<NaiveDate>,
    /// Derived from `paid_amount`, `amount`, `due_date`.
    pub status: LineStatus,
    /// Derived: gross of completed, non-reversed payments against this line.
    pub paid_amount: Decimal,
    /// Derived: payment date of the transaction that completed the line.
    pub paid_date: Option<NaiveDate>,
    pub audit: AuditInfo,
}

impl Entity for ScheduleLine {
    type Id = ScheduleLineId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl ScheduleLine {
    pub fn balance_due(&self) -> Decimal {
        (self.amount - self.paid_amount).max(Decimal::ZERO)
    }

    pub fn is_paid(&self) -> bool {
        self.status == LineStatus::Paid
    }

    /// Apply a freshly computed settlement. Returns `true` if any derived field
    /// changed (the caller then touches the audit info).
    pub(crate) fn apply_settlement(
        &mut self,
        paid_amount: Decimal,
        paid_date: Option<NaiveDate>,
        today: NaiveDate,
    ) -> bool {
        let status = derive_line_status(paid_amount, self.amount, self.due_date, today);
        let changed =
            status != self.status || paid_amount != self.paid_amount || paid_date != self.paid_date;
        self.status = status;
        self.paid_amount = paid_amount;
        self.paid_date = paid_date;
        changed
    }

    /// Re-derive the status for a new "today" (overdue sweep).
    pub(crate) fn refresh(&mut self, today: NaiveDate) -> bool {
        let status = derive_line_status(self.paid_amount, self.amount, self.due_date, today);
        let changed = status != self.status;
        self.status = status;
        changed
    }
}

/// One planned installment: its share of the total is `weight / Σ weights`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    pub description: String,
    pub weight: Decimal,
    pub due_date: Option<NaiveDate>,
}

impl Installment {
    pub fn new(description: impl Into<String>, weight: Decimal) -> Self {
        Self {
            description: description.into(),
            weight,
            due_date: None,
        }
    }

    pub fn due_on(mut self, date: NaiveDate) -> Self {
        self.due_date = Some(date);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentPlan {
    pub installments: Vec<Installment>,
}

/// Upper bound on installments per agreement.
pub const MAX_INSTALLMENTS: usize = 120;

/// Upper bound on a single installment weight.
pub const MAX_WEIGHT: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

impl InstallmentPlan {
    /// Three equal design milestones.
    pub fn milestones() -> Self {
        Self {
            installments: ["Advance", "Design Phase", "Post-Design"]
                .into_iter()
                .map(|d| Installment::new(d, Decimal::ONE))
                .collect(),
        }
    }

    pub fn full_payment(due_date: Option<NaiveDate>) -> Self {
        Self {
            installments: vec![Installment {
                description: "Full Payment".to_string(),
                weight: Decimal::ONE,
                due_date,
            }],
        }
    }

    fn validate(&self) -> DomainResult<()> {
        if self.installments.is_empty() {
            return Err(DomainError::validation("installment plan must not be empty"));
        }
        if self.installments.len() > MAX_INSTALLMENTS {
            return Err(DomainError::validation(format!(
                "installment plan allows at most {MAX_INSTALLMENTS} installments"
            )));
        }
        for (idx, i) in self.installments.iter().enumerate() {
            if i.description.trim().is_empty() {
                return Err(DomainError::validation(format!(
                    "installment {} needs a description",
                    idx + 1
                )));
            }
            if i.weight <= Decimal::ZERO {
                return Err(DomainError::validation(format!(
                    "installment {} weight must be greater than zero",
                    idx + 1
                )));
            }
            if i.weight > MAX_WEIGHT || i.weight.normalize().scale() > 4 {
                return Err(DomainError::validation(format!(
                    "installment {} weight must be at most {MAX_WEIGHT} with up to four decimal places",
                    idx + 1
                )));
            }
        }
        Ok(())
    }

    /// Split `total` across the installments.
    ///
    /// Every installment but the last gets `round(total * weight / Σ weights)`;
    /// the last one takes whatever remains, so the parts always add up to
    /// `total` to the paisa.
    pub fn allocate(&self, total: Decimal) -> DomainResult<Vec<Decimal>> {
        self.validate()?;
        let total = round_money(total);
        let out_of_range = || DomainError::validation("installment allocation out of range");
        let weight_sum = self
            .installments
            .iter()
            .try_fold(Decimal::ZERO, |acc, i| acc.checked_add(i.weight))
            .ok_or_else(out_of_range)?;
        let last = self.installments.len() - 1;

        let mut parts = Vec::with_capacity(self.installments.len());
        for installment in &self.installments[..last] {
            let share = total
                .checked_mul(installment.weight)
                .and_then(|scaled| scaled.checked_div(weight_sum))
                .ok_or_else(out_of_range)?;
            parts.push(round_money(share));
        }
        let remainder = round_money(total - sum(parts.iter().copied()));
        if remainder <= Decimal::ZERO {
            return Err(DomainError::validation(
                "final installment would receive no share of the total",
            ));
        }
        parts.push(remainder);
        Ok(parts)
    }
}

impl Default for InstallmentPlan {
    fn default() -> Self {
        Self::milestones()
    }
}

/// Materialize schedule lines for an agreement total.
pub fn build_schedule(
    agreement_id: AgreementId,
    plan: &InstallmentPlan,
    total: Decimal,
    actor: ActorId,
    at: DateTime<Utc>,
) -> DomainResult<Vec<ScheduleLine>> {
    let today = at.date_naive();
    let amounts = plan.allocate(total)?;

    Ok(plan
        .installments
        .iter()
        .zip(amounts)
        .enumerate()
        .map(|(idx, (installment, amount))| {
            let paid_amount = round_money(Decimal::ZERO);
            ScheduleLine {
                id: ScheduleLineId::new(),
                agreement_id,
                installment_number: (idx as u32) + 1,
                description: installment.description.trim().to_string(),
                amount,
                due_date: installment.due_date,
                status: derive_line_status(paid_amount, amount, installment.due_date, today),
                paid_amount,
                paid_date: None,
                audit: AuditInfo::created(actor, at),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn status_is_paid_once_amount_is_covered() {
        let today = date(2024, 6, 1);
        assert_eq!(derive_line_status(d("100"), d("100"), Some(date(2024, 1, 1)), today), LineStatus::Paid);
        assert_eq!(derive_line_status(d("150"), d("100"), None, today), LineStatus::Paid);
    }

    #[test]
    fn status_is_overdue_only_after_due_date() {
        let today = date(2024, 6, 1);
        assert_eq!(derive_line_status(d("10"), d("100"), Some(date(2024, 5, 31)), today), LineStatus::Overdue);
        assert_eq!(derive_line_status(d("10"), d("100"), Some(today), today), LineStatus::Pending);
        assert_eq!(derive_line_status(d("0"), d("100"), None, today), LineStatus::Pending);
    }

    #[test]
    fn milestones_put_the_remainder_on_the_last_line() {
        let parts = InstallmentPlan::milestones().allocate(d("1000000.00")).unwrap();
        assert_eq!(parts, vec![d("333333.33"), d("333333.33"), d("333333.34")]);
    }

    #[test]
    fn weighted_plan_follows_weights() {
        let plan = InstallmentPlan {
            installments: vec![
                Installment::new("Advance", d("20")),
                Installment::new("Drawings", d("50")),
                Installment::new("Handover", d("30")),
            ],
        };
        let parts = plan.allocate(d("1180.00")).unwrap();
        assert_eq!(parts, vec![d("236.00"), d("590.00"), d("354.00")]);
    }

    #[test]
    fn plan_rejects_zero_weights_and_blank_descriptions() {
        let zero = InstallmentPlan {
            installments: vec![Installment::new("A", d("0"))],
        };
        assert!(zero.allocate(d("10")).is_err());

        let blank = InstallmentPlan {
            installments: vec![Installment::new("  ", d("1"))],
        };
        assert!(blank.allocate(d("10")).is_err());

        assert!(InstallmentPlan { installments: vec![] }.allocate(d("10")).is_err());
    }

    #[test]
    fn plan_rejects_oversized_or_overprecise_weights() {
        let huge = InstallmentPlan {
            installments: vec![
                Installment::new("a", Decimal::MAX),
                Installment::new("b", Decimal::MAX),
            ],
        };
        let err = huge.allocate(d("1000")).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let over_cap = InstallmentPlan {
            installments: vec![Installment::new("a", d("1000000.0001"))],
        };
        assert!(over_cap.allocate(d("1000")).is_err());

        let too_precise = InstallmentPlan {
            installments: vec![Installment::new("a", d("0.00001"))],
        };
        assert!(too_precise.allocate(d("1000")).is_err());

        let at_cap = InstallmentPlan {
            installments: vec![
                Installment::new("a", MAX_WEIGHT),
                Installment::new("b", MAX_WEIGHT),
            ],
        };
        assert_eq!(at_cap.allocate(d("1000000000000000")).unwrap(), vec![
            d("500000000000000.00"),
            d("500000000000000.00")
        ]);
    }

    #[test]
    fn plan_rejects_a_starved_final_installment() {
        let plan = InstallmentPlan {
            installments: vec![
                Installment::new("A", d("1")),
                Installment::new("B", d("1")),
            ],
        };
        assert!(plan.allocate(d("0.01")).is_err());
    }

    #[test]
    fn build_schedule_numbers_lines_and_marks_past_due_overdue() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let plan = InstallmentPlan {
            installments: vec![
                Installment::new("Advance", d("1")).due_on(date(2024, 5, 1)),
                Installment::new("Final", d("1")).due_on(date(2024, 9, 1)),
            ],
        };
        let lines = build_schedule(AgreementId::new(), &plan, d("500.00"), ActorId::new(), at).unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].installment_number, 1);
        assert_eq!(lines[0].status, LineStatus::Overdue);
        assert_eq!(lines[1].installment_number, 2);
        assert_eq!(lines[1].status, LineStatus::Pending);
        assert_eq!(lines[1].paid_amount.to_string(), "0.00");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn allocation_always_sums_to_total(
            total_paise in 100i64..1_000_000_000_000i64,
            weights in prop::collection::vec(1u32..1000, 1..12),
        ) {
            let total = Decimal::new(total_paise, 2);
            let plan = InstallmentPlan {
                installments: weights
                    .iter()
                    .enumerate()
                    .map(|(i, w)| Installment::new(format!("Part {}", i + 1), Decimal::from(*w)))
                    .collect(),
            };
            if let Ok(parts) = plan.allocate(total) {
                prop_assert_eq!(parts.len(), weights.len());
                prop_assert_eq!(sum(parts.iter().copied()), total);
                prop_assert!(parts.iter().all(|p| p.scale() == 2));
            }
        }

        #[test]
        fn status_derivation_is_idempotent(
            paid in 0i64..10_000,
            amount in 1i64..10_000,
            due_offset in -30i64..30,
        ) {
            let today = date(2024, 6, 1);
            let due = today + chrono::Duration::days(due_offset);
            let first = derive_line_status(Decimal::from(paid), Decimal::from(amount), Some(due), today);
            let second = derive_line_status(Decimal::from(paid), Decimal::from(amount), Some(due), today);
            prop_assert_eq!(first, second);
            prop_assert_eq!(first == LineStatus::Paid, paid >= amount);
            prop_assert_eq!(first == LineStatus::Overdue, due < today && paid < amount);
        }
    }
}
