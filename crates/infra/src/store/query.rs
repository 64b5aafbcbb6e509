//! Listing criteria and paging for ledger reads.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use paybook_core::AgreementId;
use paybook_payments::{AgreementStatus, PaymentAgreement, PaymentMethod, Transaction, TransactionStatus};

/// Pagination parameters for listing queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of rows to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }

    /// Page-number style (`page` is 0-based).
    pub fn page(page: Option<u32>, size: Option<u32>) -> Self {
        let limit = size.unwrap_or(50).clamp(1, Self::MAX_LIMIT);
        Self {
            limit,
            offset: page.unwrap_or(0).saturating_mul(limit),
        }
    }

    pub(crate) fn slice<T: Clone>(&self, rows: &[T]) -> Vec<T> {
        rows.iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .cloned()
            .collect()
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Rows matching the filter across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let has_more = total > u64::from(pagination.offset) + u64::from(pagination.limit);
        Self {
            items,
            total,
            pagination,
            has_more,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            pagination: self.pagination,
            has_more: self.has_more,
        }
    }
}

/// Agreement listing criteria. `search` matches the package name
/// case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementFilter {
    pub search: Option<String>,
    pub status: Option<AgreementStatus>,
    /// Excludes agreements in this status, e.g. `PAID` for the pending view.
    pub exclude_status: Option<AgreementStatus>,
}

impl AgreementFilter {
    pub fn pending() -> Self {
        Self {
            exclude_status: Some(AgreementStatus::Paid),
            ..Default::default()
        }
    }

    pub(crate) fn search_pattern(&self) -> Option<String> {
        search_pattern(self.search.as_deref())
    }

    pub fn matches(&self, agreement: &PaymentAgreement) -> bool {
        self.status.is_none_or(|s| s == agreement.status)
            && self.exclude_status.is_none_or(|s| s != agreement.status)
            && self.search.as_deref().map(str::trim).is_none_or(|needle| {
                needle.is_empty() || contains_ignore_case(&agreement.package_name, needle)
            })
    }
}

/// Transaction history criteria. `search` matches reference number or notes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub agreement_id: Option<AgreementId>,
    pub search: Option<String>,
    pub method: Option<PaymentMethod>,
    pub status: Option<TransactionStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl TransactionFilter {
    pub(crate) fn search_pattern(&self) -> Option<String> {
        search_pattern(self.search.as_deref())
    }

    pub fn matches(&self, txn: &Transaction) -> bool {
        self.agreement_id.is_none_or(|a| a == txn.agreement_id)
            && self.method.is_none_or(|m| m == txn.method)
            && self.status.is_none_or(|s| s == txn.status)
            && self.start_date.is_none_or(|d| txn.payment_date >= d)
            && self.end_date.is_none_or(|d| txn.payment_date <= d)
            && self.search.as_deref().map(str::trim).is_none_or(|needle| {
                needle.is_empty()
                    || [&txn.reference_number, &txn.notes]
                        .into_iter()
                        .flatten()
                        .any(|field| contains_ignore_case(field, needle))
            })
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// `ILIKE` pattern for a free-text search, `None` when blank.
fn search_pattern(search: Option<&str>) -> Option<String> {
    let needle = search.map(str::trim).filter(|s| !s.is_empty())?;
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    Some(format!("%{escaped}%"))
}
