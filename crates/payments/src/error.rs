//! Ledger failures.

use rust_decimal::Decimal;
use thiserror::Error;

use paybook_core::{
    AgreementId, ChallanId, DomainError, ProjectId, ReleaseId, ScheduleLineId, TaxInvoiceId,
    TransactionId,
};

use crate::retention::ReleaseStatus;

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Coarse classification callers use to tell "bad request" from "bad
/// reference" from "state does not allow this".
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    InvariantViolation,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("project {0} already has a payment agreement")]
    DuplicateAgreement(ProjectId),

    #[error("payment agreement {0} not found")]
    AgreementNotFound(AgreementId),

    #[error("project {0} has no payment agreement")]
    ProjectAgreementNotFound(ProjectId),

    #[error("schedule line {0} not found")]
    ScheduleLineNotFound(ScheduleLineId),

    #[error("transaction {0} not found")]
    TransactionNotFound(TransactionId),

    #[error("payment {0} not found")]
    PaymentNotFound(TransactionId),

    #[error("retention release {0} not found")]
    ReleaseNotFound(ReleaseId),

    #[error("challan {0} not found")]
    ChallanNotFound(ChallanId),

    #[error("tax invoice {0} not found")]
    InvoiceNotFound(TaxInvoiceId),

    #[error(
        "payment of {amount} would bring installment {line} to {would_be} against {due} (tolerance {tolerance})"
    )]
    OverpaymentRejected {
        line: ScheduleLineId,
        amount: Decimal,
        would_be: Decimal,
        due: Decimal,
        tolerance: Decimal,
    },

    #[error("release amount must be greater than zero, got {0}")]
    InvalidReleaseAmount(Decimal),

    #[error("releasing {requested} on top of {released} exceeds retention of {retention}")]
    RetentionExceeded {
        requested: Decimal,
        released: Decimal,
        retention: Decimal,
    },

    #[error("retention release {release} cannot move from {from:?} to {to:?}")]
    InvalidReleaseTransition {
        release: ReleaseId,
        from: ReleaseStatus,
        to: ReleaseStatus,
    },

    #[error("payment {0} already has a tax invoice")]
    InvoiceAlreadyExists(TransactionId),

    #[error("transaction {0} already has a challan")]
    ChallanAlreadyIssued(TransactionId),

    #[error("transaction {0} is referenced by an issued document and cannot be modified")]
    TransactionFrozen(TransactionId),

    #[error("transaction {0} has already been reversed")]
    TransactionAlreadyReversed(TransactionId),

    #[error("transaction {transaction}: {reason}")]
    InvalidTransactionState {
        transaction: TransactionId,
        reason: String,
    },
}

impl PaymentError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Domain(DomainError::validation(msg))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::Domain(e) => match e {
                DomainError::Validation(_) | DomainError::InvalidId(_) => ErrorKind::Validation,
                DomainError::NotFound(_) => ErrorKind::NotFound,
                DomainError::Conflict(_) => ErrorKind::Conflict,
                DomainError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            },
            PaymentError::InvalidReleaseAmount(_) => ErrorKind::Validation,
            PaymentError::AgreementNotFound(_)
            | PaymentError::ProjectAgreementNotFound(_)
            | PaymentError::ScheduleLineNotFound(_)
            | PaymentError::TransactionNotFound(_)
            | PaymentError::PaymentNotFound(_)
            | PaymentError::ReleaseNotFound(_)
            | PaymentError::ChallanNotFound(_)
            | PaymentError::InvoiceNotFound(_) => ErrorKind::NotFound,
            PaymentError::DuplicateAgreement(_)
            | PaymentError::OverpaymentRejected { .. }
            | PaymentError::RetentionExceeded { .. }
            | PaymentError::InvalidReleaseTransition { .. }
            | PaymentError::InvoiceAlreadyExists(_)
            | PaymentError::ChallanAlreadyIssued(_)
            | PaymentError::TransactionAlreadyReversed(_) => ErrorKind::Conflict,
            PaymentError::TransactionFrozen(_) | PaymentError::InvalidTransactionState { .. } => {
                ErrorKind::InvariantViolation
            }
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Domain(DomainError::Validation(_)) => "validation_error",
            PaymentError::Domain(DomainError::InvalidId(_)) => "invalid_id",
            PaymentError::Domain(DomainError::NotFound(_)) => "not_found",
            PaymentError::Domain(DomainError::Conflict(_)) => "conflict",
            PaymentError::Domain(DomainError::InvariantViolation(_)) => "invariant_violation",
            PaymentError::DuplicateAgreement(_) => "duplicate_agreement",
            PaymentError::AgreementNotFound(_) | PaymentError::ProjectAgreementNotFound(_) => {
                "agreement_not_found"
            }
            PaymentError::ScheduleLineNotFound(_) => "schedule_line_not_found",
            PaymentError::TransactionNotFound(_) => "transaction_not_found",
            PaymentError::PaymentNotFound(_) => "payment_not_found",
            PaymentError::ReleaseNotFound(_) => "release_not_found",
            PaymentError::ChallanNotFound(_) => "challan_not_found",
            PaymentError::InvoiceNotFound(_) => "invoice_not_found",
            PaymentError::OverpaymentRejected { .. } => "overpayment_rejected",
            PaymentError::InvalidReleaseAmount(_) => "invalid_release_amount",
            PaymentError::RetentionExceeded { .. } => "retention_exceeded",
            PaymentError::InvalidReleaseTransition { .. } => "invalid_release_transition",
            PaymentError::InvoiceAlreadyExists(_) => "invoice_already_exists",
            PaymentError::ChallanAlreadyIssued(_) => "challan_already_issued",
            PaymentError::TransactionFrozen(_) => "transaction_frozen",
            PaymentError::TransactionAlreadyReversed(_) => "transaction_already_reversed",
            PaymentError::InvalidTransactionState { .. } => "invalid_transaction_state",
        }
    }
}
