//! GST tax invoices.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use paybook_core::money::{percentage_of, round_money};
use paybook_core::{
    ActorId, AgreementId, AuditInfo, DomainError, DomainResult, Entity, FinancialYear, ProjectId,
    TaxInvoiceId, TransactionId,
};

use crate::agreement::PaymentAgreement;
use crate::error::{PaymentError, PaymentResult};
use crate::numbering::DocumentKind;
use crate::policy::TaxPolicy;
use crate::transaction::Transaction;

/// Either CGST + SGST (intrastate) or IGST (interstate), never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "regime", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GstSplit {
    Intrastate {
        cgst_rate: Decimal,
        cgst_amount: Decimal,
        sgst_rate: Decimal,
        sgst_amount: Decimal,
    },
    Interstate {
        igst_rate: Decimal,
        igst_amount: Decimal,
    },
}

impl GstSplit {
    /// Intrastate halves the rate (rounded to 2 dp) into CGST and SGST, each
    /// applied to the taxable value; interstate applies the full rate as IGST.
    pub fn compute(taxable_value: Decimal, gst_rate: Decimal, interstate: bool) -> Self {
        if interstate {
            GstSplit::Interstate {
                igst_rate: gst_rate,
                igst_amount: percentage_of(taxable_value, gst_rate),
            }
        } else {
            let half = round_money(gst_rate / Decimal::TWO);
            let component = percentage_of(taxable_value, half);
            GstSplit::Intrastate {
                cgst_rate: half,
                cgst_amount: component,
                sgst_rate: half,
                sgst_amount: component,
            }
        }
    }

    pub fn total_tax(&self) -> Decimal {
        match self {
            GstSplit::Intrastate {
                cgst_amount,
                sgst_amount,
                ..
            } => round_money(*cgst_amount + *sgst_amount),
            GstSplit::Interstate { igst_amount, .. } => *igst_amount,
        }
    }

    pub fn is_interstate(&self) -> bool {
        matches!(self, GstSplit::Interstate { .. })
    }
}

/// A blank place of supply is treated as the home state.
pub fn is_interstate(place_of_supply: &str, home_state: &str) -> bool {
    let place = place_of_supply.trim();
    !place.is_empty() && !place.eq_ignore_ascii_case(home_state.trim())
}

/// GSTINs are 15 alphanumeric characters; stored upper-case.
pub fn normalize_gstin(gstin: Option<&str>) -> DomainResult<Option<String>> {
    let Some(raw) = gstin.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if raw.len() != 15 || !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(DomainError::validation(format!(
            "customer_gstin must be 15 alphanumeric characters, got '{raw}'"
        )));
    }
    Ok(Some(raw.to_ascii_uppercase()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxInvoice {
    pub id: TaxInvoiceId,
    /// The payment this invoice documents (1:1).
    pub transaction_id: TransactionId,
    pub agreement_id: AgreementId,
    pub project_id: ProjectId,
    pub invoice_number: String,
    pub sequence_number: u32,
    pub financial_year: FinancialYear,
    pub invoice_date: NaiveDate,
    pub company_gstin: String,
    pub customer_gstin: Option<String>,
    pub place_of_supply: String,
    pub is_interstate: bool,
    pub taxable_value: Decimal,
    #[serde(flatten)]
    pub gst: GstSplit,
    pub total_tax: Decimal,
    pub invoice_total: Decimal,
    pub created_by: ActorId,
    pub audit: AuditInfo,
}

impl Entity for TaxInvoice {
    type Id = TaxInvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Command: GenerateInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateInvoice {
    pub invoice_id: TaxInvoiceId,
    pub transaction_id: TransactionId,
    pub place_of_supply: String,
    pub customer_gstin: Option<String>,
    /// Defaults to the day the invoice is generated.
    pub invoice_date: Option<NaiveDate>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Everything about an invoice except its number, which is only allocated
/// inside the issuing unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceDraft {
    id: TaxInvoiceId,
    transaction_id: TransactionId,
    agreement_id: AgreementId,
    project_id: ProjectId,
    financial_year: FinancialYear,
    invoice_date: NaiveDate,
    company_gstin: String,
    customer_gstin: Option<String>,
    place_of_supply: String,
    taxable_value: Decimal,
    gst: GstSplit,
    actor: ActorId,
    occurred_at: DateTime<Utc>,
}

impl InvoiceDraft {
    /// Taxable value is the payment's gross amount; the rate is the agreement's GST rate.
    pub fn prepare(
        cmd: &GenerateInvoice,
        transaction: &Transaction,
        agreement: &PaymentAgreement,
        policy: &TaxPolicy,
    ) -> PaymentResult<Self> {
        if transaction.id != cmd.transaction_id {
            return Err(PaymentError::PaymentNotFound(cmd.transaction_id));
        }
        transaction.ensure_documentable()?;
        if transaction.tax_invoice_id.is_some() {
            return Err(PaymentError::InvoiceAlreadyExists(transaction.id));
        }

        let customer_gstin = normalize_gstin(cmd.customer_gstin.as_deref())?;
        let interstate = is_interstate(&cmd.place_of_supply, &policy.home_state);
        let place_of_supply = match cmd.place_of_supply.trim() {
            "" => policy.home_state.trim().to_ascii_uppercase(),
            place => place.to_ascii_uppercase(),
        };
        let invoice_date = cmd.invoice_date.unwrap_or(cmd.occurred_at.date_naive());
        let taxable_value = round_money(transaction.amount);

        Ok(Self {
            id: cmd.invoice_id,
            transaction_id: transaction.id,
            agreement_id: agreement.id,
            project_id: agreement.project_id,
            financial_year: FinancialYear::for_date(invoice_date),
            invoice_date,
            company_gstin: policy.company_gstin.clone(),
            customer_gstin,
            place_of_supply,
            taxable_value,
            gst: GstSplit::compute(taxable_value, agreement.gst_percentage, interstate),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })
    }

    pub fn financial_year(&self) -> FinancialYear {
        self.financial_year
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn issue(self, prefix: &str, sequence_number: u32) -> TaxInvoice {
        let total_tax = self.gst.total_tax();
        TaxInvoice {
            id: self.id,
            transaction_id: self.transaction_id,
            agreement_id: self.agreement_id,
            project_id: self.project_id,
            invoice_number: DocumentKind::TaxInvoice.format_number(prefix, self.financial_year, sequence_number),
            sequence_number,
            financial_year: self.financial_year,
            invoice_date: self.invoice_date,
            company_gstin: self.company_gstin,
            customer_gstin: self.customer_gstin,
            place_of_supply: self.place_of_supply,
            is_interstate: self.gst.is_interstate(),
            taxable_value: self.taxable_value,
            invoice_total: round_money(self.taxable_value + total_tax),
            total_tax,
            gst: self.gst,
            created_by: self.actor,
            audit: AuditInfo::created(self.actor, self.occurred_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::{CreateAgreement, PackageTerms, PaymentType, create_agreement};
    use crate::policy::PaymentPolicy;
    use crate::transaction::{
        PaymentCategory, PaymentMethod, TdsDeductedBy, TransactionKind, TransactionStatus,
    };
    use chrono::TimeZone;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn fixtures(amount: &str) -> (PaymentAgreement, Transaction) {
        let actor = ActorId::new();
        let at = Utc.with_ymd_and_hms(2025, 3, 31, 18, 0, 0).unwrap();
        let (agreement, lines) = create_agreement(
            &CreateAgreement {
                agreement_id: AgreementId::new(),
                project_id: ProjectId::new(),
                terms: PackageTerms {
                    package_name: "Interiors".to_string(),
                    rate_per_sqft: d("100"),
                    total_sqft: d("10000"),
                    discount_percentage: Decimal::ZERO,
                },
                payment_type: PaymentType::Full,
                plan: None,
                full_payment_due_date: None,
                retention_percentage: None,
                defect_liability_end_date: None,
                actor,
                occurred_at: at,
            },
            &PaymentPolicy::default(),
        )
        .unwrap();
        let transaction = Transaction {
            id: TransactionId::new(),
            schedule_line_id: lines[0].id,
            agreement_id: agreement.id,
            kind: TransactionKind::Payment,
            reverses: None,
            amount: d(amount),
            method: PaymentMethod::Upi,
            reference_number: None,
            notes: None,
            payment_date: at.date_naive(),
            tds_percentage: Decimal::ZERO,
            tds_amount: Decimal::ZERO,
            net_amount: d(amount),
            tds_deducted_by: TdsDeductedBy::Customer,
            category: PaymentCategory::Progress,
            status: TransactionStatus::Completed,
            recorded_by: actor,
            challan_id: None,
            tax_invoice_id: None,
            audit: AuditInfo::created(actor, at),
        };
        (agreement, transaction)
    }

    fn generate(transaction: &Transaction, place: &str, date: Option<NaiveDate>) -> GenerateInvoice {
        GenerateInvoice {
            invoice_id: TaxInvoiceId::new(),
            transaction_id: transaction.id,
            place_of_supply: place.to_string(),
            customer_gstin: Some(" 32abcde1234f1z5 ".to_string()),
            invoice_date: date,
            actor: ActorId::new(),
            occurred_at: Utc.with_ymd_and_hms(2025, 3, 31, 18, 0, 0).unwrap(),
        }
    }

    #[test]
    fn intrastate_splits_rate_into_cgst_and_sgst() {
        let (agreement, t) = fixtures("100000.00");
        let draft = InvoiceDraft::prepare(&generate(&t, "kerala ", None), &t, &agreement, &TaxPolicy::default())
            .unwrap();
        let invoice = draft.issue("INV", 1);

        assert!(!invoice.is_interstate);
        assert_eq!(
            invoice.gst,
            GstSplit::Intrastate {
                cgst_rate: d("9.00"),
                cgst_amount: d("9000.00"),
                sgst_rate: d("9.00"),
                sgst_amount: d("9000.00"),
            }
        );
        assert_eq!(invoice.total_tax, d("18000.00"));
        assert_eq!(invoice.invoice_total, d("118000.00"));
        assert_eq!(invoice.customer_gstin.as_deref(), Some("32ABCDE1234F1Z5"));
    }

    #[test]
    fn interstate_applies_full_rate_as_igst() {
        let (agreement, t) = fixtures("333.33");
        let invoice = InvoiceDraft::prepare(&generate(&t, "Tamil Nadu", None), &t, &agreement, &TaxPolicy::default())
            .unwrap()
            .issue("INV", 12);

        assert!(invoice.is_interstate);
        assert_eq!(invoice.total_tax, d("60.00"));
        assert_eq!(invoice.invoice_number, "INV/2024-25/0012");
    }

    #[test]
    fn blank_place_of_supply_is_home_state() {
        let (agreement, t) = fixtures("10.00");
        let invoice = InvoiceDraft::prepare(&generate(&t, "  ", None), &t, &agreement, &TaxPolicy::default())
            .unwrap()
            .issue("INV", 1);
        assert!(!invoice.is_interstate);
        assert_eq!(invoice.place_of_supply, "KERALA");
    }

    #[test]
    fn financial_year_follows_invoice_date() {
        let (agreement, t) = fixtures("10.00");
        let march = NaiveDate::from_ymd_opt(2025, 3, 31);
        let april = NaiveDate::from_ymd_opt(2025, 4, 1);
        let policy = TaxPolicy::default();

        let draft = InvoiceDraft::prepare(&generate(&t, "", march), &t, &agreement, &policy).unwrap();
        assert_eq!(draft.financial_year().to_string(), "2024-25");
        let draft = InvoiceDraft::prepare(&generate(&t, "", april), &t, &agreement, &policy).unwrap();
        assert_eq!(draft.financial_year().to_string(), "2025-26");
    }

    #[test]
    fn second_invoice_for_a_payment_is_rejected() {
        let (agreement, mut t) = fixtures("10.00");
        t.tax_invoice_id = Some(TaxInvoiceId::new());
        let err = InvoiceDraft::prepare(&generate(&t, "", None), &t, &agreement, &TaxPolicy::default())
            .unwrap_err();
        assert_eq!(err, PaymentError::InvoiceAlreadyExists(t.id));
    }

    #[test]
    fn reversed_payments_cannot_be_invoiced() {
        let (agreement, mut t) = fixtures("10.00");
        t.status = TransactionStatus::Reversed;
        let err = InvoiceDraft::prepare(&generate(&t, "", None), &t, &agreement, &TaxPolicy::default())
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidTransactionState { .. }));
    }

    #[test]
    fn malformed_gstin_is_a_validation_error() {
        assert!(normalize_gstin(Some("123")).is_err());
        assert!(normalize_gstin(Some("32ABCDE1234F1Z*")).is_err());
        assert_eq!(normalize_gstin(Some("   ")).unwrap(), None);
    }

    #[test]
    fn serialized_invoice_carries_only_one_regime() {
        let (agreement, t) = fixtures("100.00");
        let invoice = InvoiceDraft::prepare(&generate(&t, "Karnataka", None), &t, &agreement, &TaxPolicy::default())
            .unwrap()
            .issue("INV", 3);
        let json = serde_json::to_value(&invoice).unwrap();
        assert_eq!(json["regime"], "INTERSTATE");
        assert_eq!(json["igst_amount"], "18.00");
        assert!(json.get("cgst_amount").is_none());
    }
}
