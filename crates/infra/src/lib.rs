//! Infrastructure layer: persistence, configuration, document rendering and
//! the [`ledger::PaymentLedger`] service that ties them to the domain.

pub mod config;
pub mod documents;
pub mod ledger;
pub mod store;


pub use config::{ConfigError, EngineConfig};
pub use documents::{DocumentRenderer, JsonDocumentRenderer, RenderError, RenderedDocument};
pub use ledger::{AgreementView, InstallmentView, LedgerError, LedgerResult, PaymentLedger};
