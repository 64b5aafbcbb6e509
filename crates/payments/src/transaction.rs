//! Ledger transactions recorded against installments.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use paybook_core::money::{ensure_percentage, percentage_of, round_money};
use paybook_core::{
    ActorId, AgreementId, AuditInfo, ChallanId, DomainResult, Entity, ScheduleLineId, TaxInvoiceId,
    TransactionId,
};

use crate::error::{PaymentError, PaymentResult};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    BankTransfer,
    Upi,
    Cheque,
    Cash,
    Card,
    Other,
}

impl_text_enum!(PaymentMethod, "payment method", {
    BankTransfer => "BANK_TRANSFER",
    Upi => "UPI",
    Cheque => "CHEQUE",
    Cash => "CASH",
    Card => "CARD",
    Other => "OTHER",
});

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentCategory {
    Advance,
    #[default]
    Progress,
    Final,
    RetentionRelease,
    Other,
}

impl_text_enum!(PaymentCategory, "payment category", {
    Advance => "ADVANCE",
    Progress => "PROGRESS",
    Final => "FINAL",
    RetentionRelease => "RETENTION_RELEASE",
    Other => "OTHER",
});

/// Party that withheld the TDS.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TdsDeductedBy {
    #[default]
    Customer,
    Company,
}

impl_text_enum!(TdsDeductedBy, "TDS deducting party", {
    Customer => "CUSTOMER",
    Company => "COMPANY",
});

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Completed,
    Reversed,
}

impl_text_enum!(TransactionStatus, "transaction status", {
    Completed => "COMPLETED",
    Reversed => "REVERSED",
});

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Payment,
    /// Offsetting entry; `Transaction::reverses` names the original.
    Reversal,
}

impl_text_enum!(TransactionKind, "transaction kind", {
    Payment => "PAYMENT",
    Reversal => "REVERSAL",
});

/// `tds = round(amount × pct / 100)`, `net = amount − tds`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TdsBreakdown {
    pub tds_amount: Decimal,
    pub net_amount: Decimal,
}

pub fn compute_tds(amount: Decimal, tds_percentage: Decimal) -> TdsBreakdown {
    let tds_amount = percentage_of(amount, tds_percentage);
    TdsBreakdown {
        tds_amount,
        net_amount: round_money(amount - tds_amount),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub schedule_line_id: ScheduleLineId,
    pub agreement_id: AgreementId,
    pub kind: TransactionKind,
    pub reverses: Option<TransactionId>,
    /// Gross amount.
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub payment_date: NaiveDate,
    pub tds_percentage: Decimal,
    /// Derived from `amount` and `tds_percentage`.
    pub tds_amount: Decimal,
    /// Derived: `amount - tds_amount`.
    pub net_amount: Decimal,
    pub tds_deducted_by: TdsDeductedBy,
    pub category: PaymentCategory,
    pub status: TransactionStatus,
    pub recorded_by: ActorId,
    pub challan_id: Option<ChallanId>,
    pub tax_invoice_id: Option<TaxInvoiceId>,
    pub audit: AuditInfo,
}

impl Entity for Transaction {
    type Id = TransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Transaction {
    /// Completed payments settle their installment; reversed payments and
    /// reversal entries do not.
    pub fn counts_towards_paid(&self) -> bool {
        self.kind == TransactionKind::Payment && self.status == TransactionStatus::Completed
    }

    /// Monetary fields are frozen once a legal document references the transaction.
    pub fn is_frozen(&self) -> bool {
        self.challan_id.is_some() || self.tax_invoice_id.is_some()
    }

    /// Documents can only be issued for completed payments.
    pub fn ensure_documentable(&self) -> PaymentResult<()> {
        if self.counts_towards_paid() {
            Ok(())
        } else {
            Err(PaymentError::InvalidTransactionState {
                transaction: self.id,
                reason: format!(
                    "documents can only be issued for completed payments (kind {}, status {})",
                    self.kind, self.status
                ),
            })
        }
    }

    pub fn link_challan(&mut self, challan_id: ChallanId, actor: ActorId, at: DateTime<Utc>) -> PaymentResult<()> {
        if self.challan_id.is_some() {
            return Err(PaymentError::ChallanAlreadyIssued(self.id));
        }
        self.challan_id = Some(challan_id);
        self.audit.touch(actor, at);
        Ok(())
    }

    pub fn link_tax_invoice(
        &mut self,
        invoice_id: TaxInvoiceId,
        actor: ActorId,
        at: DateTime<Utc>,
    ) -> PaymentResult<()> {
        if self.tax_invoice_id.is_some() {
            return Err(PaymentError::InvoiceAlreadyExists(self.id));
        }
        self.tax_invoice_id = Some(invoice_id);
        self.audit.touch(actor, at);
        Ok(())
    }

    pub(crate) fn set_amounts(&mut self, amount: Decimal, tds_percentage: Decimal) -> DomainResult<()> {
        let tds_percentage = ensure_percentage("tds_percentage", tds_percentage)?;
        let tds = compute_tds(amount, tds_percentage);
        self.amount = amount;
        self.tds_percentage = tds_percentage;
        self.tds_amount = tds.tds_amount;
        self.net_amount = tds.net_amount;
        Ok(())
    }
}

/// Command: RecordTransaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTransaction {
    pub transaction_id: TransactionId,
    pub schedule_line_id: ScheduleLineId,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference_number: Option<String>,
    pub payment_date: NaiveDate,
    pub tds_percentage: Decimal,
    pub tds_deducted_by: TdsDeductedBy,
    pub category: PaymentCategory,
    pub notes: Option<String>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReverseTransaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseTransaction {
    /// Id of the new offsetting entry.
    pub reversal_id: TransactionId,
    pub transaction_id: TransactionId,
    pub reason: String,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AmendTransaction (only while no document references it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendTransaction {
    pub transaction_id: TransactionId,
    pub amount: Decimal,
    pub tds_percentage: Decimal,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

pub(crate) fn clean_text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
