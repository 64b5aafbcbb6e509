//! Business policy inputs.
//!
//! The ledger never decides these values itself; they are supplied by
//! configuration (see `paybook_infra::config`).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxPolicy {
    /// GST rate applied to new agreements and their invoices.
    pub gst_percentage: Decimal,
    pub company_gstin: String,
    /// Place of supply equal to this state is intrastate (CGST + SGST).
    pub home_state: String,
}

impl Default for TaxPolicy {
    fn default() -> Self {
        Self {
            gst_percentage: Decimal::new(1800, 2),
            company_gstin: "32AAAAA0000A1Z5".to_string(),
            home_state: "KERALA".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub default_percentage: Decimal,
    /// Releases are created `APPROVED` (approver = requester) instead of `PENDING`.
    pub auto_approve: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            default_percentage: Decimal::new(1000, 2),
            auto_approve: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPolicy {
    /// How far cumulative payments may exceed an installment amount.
    pub overpayment_tolerance: Decimal,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            overpayment_tolerance: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingPolicy {
    pub challan_prefix: String,
    pub invoice_prefix: String,
}

impl Default for NumberingPolicy {
    fn default() -> Self {
        Self {
            challan_prefix: "CH".to_string(),
            invoice_prefix: "INV".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPolicy {
    pub tax: TaxPolicy,
    pub retention: RetentionPolicy,
    pub ledger: LedgerPolicy,
    pub numbering: NumberingPolicy,
}
