//! Financial-year scoped document numbering.

use serde::{Deserialize, Serialize};

use paybook_core::FinancialYear;

/// Document families with their own gapless per-financial-year sequence.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentKind {
    Challan,
    TaxInvoice,
}

impl_text_enum!(DocumentKind, "document kind", {
    Challan => "CHALLAN",
    TaxInvoice => "TAX_INVOICE",
});

impl DocumentKind {
    fn sequence_width(&self) -> usize {
        match self {
            DocumentKind::Challan => 3,
            DocumentKind::TaxInvoice => 4,
        }
    }

    /// `"{prefix}/{fy}/{seq}"`, zero-padded; deterministic for a given `(fy, seq)`.
    pub fn format_number(&self, prefix: &str, financial_year: FinancialYear, sequence: u32) -> String {
        format!(
            "{prefix}/{financial_year}/{sequence:0width$}",
            width = self.sequence_width()
        )
    }
}
