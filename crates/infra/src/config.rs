//! Engine configuration loaded from environment variables.

use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

use paybook_core::money::ensure_percentage;
use paybook_payments::{
    LedgerPolicy, NumberingPolicy, PaymentPolicy, RetentionPolicy, TaxPolicy,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub policy: PaymentPolicy,
    /// Attempts at allocating a document number before giving up.
    pub max_sequence_retries: u32,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub bind_addr: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: PaymentPolicy::default(),
            max_sequence_retries: 5,
            use_persistent_stores: false,
            database_url: None,
            database_max_connections: 10,
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &'static str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let gst_percentage = percentage(get("GST_PERCENTAGE"), "GST_PERCENTAGE", defaults.policy.tax.gst_percentage)?;
        let retention_percentage = percentage(
            get("DEFAULT_RETENTION_PERCENTAGE"),
            "DEFAULT_RETENTION_PERCENTAGE",
            defaults.policy.retention.default_percentage,
        )?;
        let overpayment_tolerance: Decimal = parse(
            get("OVERPAYMENT_TOLERANCE"),
            "OVERPAYMENT_TOLERANCE",
            defaults.policy.ledger.overpayment_tolerance,
        )?;
        if overpayment_tolerance.is_sign_negative() {
            return Err(ConfigError::Invalid {
                key: "OVERPAYMENT_TOLERANCE",
                value: overpayment_tolerance.to_string(),
                reason: "must not be negative".to_string(),
            });
        }

        let use_persistent_stores = parse(get("USE_PERSISTENT_STORES"), "USE_PERSISTENT_STORES", false)?;
        let database_url = get("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        Ok(Self {
            policy: PaymentPolicy {
                tax: TaxPolicy {
                    gst_percentage,
                    company_gstin: get("COMPANY_GSTIN").unwrap_or(defaults.policy.tax.company_gstin),
                    home_state: get("COMPANY_HOME_STATE")
                        .map(|s| s.to_ascii_uppercase())
                        .unwrap_or(defaults.policy.tax.home_state),
                },
                retention: RetentionPolicy {
                    default_percentage: retention_percentage,
                    auto_approve: parse(
                        get("AUTO_APPROVE_RETENTION"),
                        "AUTO_APPROVE_RETENTION",
                        defaults.policy.retention.auto_approve,
                    )?,
                },
                ledger: LedgerPolicy {
                    overpayment_tolerance,
                },
                numbering: NumberingPolicy {
                    challan_prefix: get("CHALLAN_PREFIX").unwrap_or(defaults.policy.numbering.challan_prefix),
                    invoice_prefix: get("INVOICE_PREFIX").unwrap_or(defaults.policy.numbering.invoice_prefix),
                },
            },
            max_sequence_retries: parse(
                get("MAX_SEQUENCE_RETRIES"),
                "MAX_SEQUENCE_RETRIES",
                defaults.max_sequence_retries,
            )?
            .max(1),
            use_persistent_stores,
            database_url,
            database_max_connections: parse(
                get("DATABASE_MAX_CONNECTIONS"),
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
        })
    }
}

fn parse<T>(raw: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

fn percentage(raw: Option<String>, key: &'static str, default: Decimal) -> Result<Decimal, ConfigError> {
    let value: Decimal = parse(raw, key, default)?;
    ensure_percentage(key, value).map_err(|e| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn unset_variables_keep_defaults() {
        assert_eq!(config(&[]).unwrap(), EngineConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = config(&[
            ("GST_PERCENTAGE", "12"),
            ("AUTO_APPROVE_RETENTION", "true"),
            ("COMPANY_HOME_STATE", "karnataka"),
            ("CHALLAN_PREFIX", "DC"),
            ("MAX_SEQUENCE_RETRIES", "9"),
            ("BIND_ADDR", "127.0.0.1:9000"),
        ])
        .unwrap();
        assert_eq!(cfg.policy.tax.gst_percentage, Decimal::from(12));
        assert!(cfg.policy.retention.auto_approve);
        assert_eq!(cfg.policy.tax.home_state, "KARNATAKA");
        assert_eq!(cfg.policy.numbering.challan_prefix, "DC");
        assert_eq!(cfg.max_sequence_retries, 9);
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
    }

    #[test]
    fn malformed_values_are_errors() {
        let err = config(&[("GST_PERCENTAGE", "eighteen")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "GST_PERCENTAGE", .. }));

        let err = config(&[("DEFAULT_RETENTION_PERCENTAGE", "140")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DEFAULT_RETENTION_PERCENTAGE", .. }));

        let err = config(&[("OVERPAYMENT_TOLERANCE", "-1")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "OVERPAYMENT_TOLERANCE", .. }));
    }

    #[test]
    fn persistent_stores_need_a_database() {
        assert_eq!(
            config(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
        let cfg = config(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/paybook"),
        ])
        .unwrap();
        assert!(cfg.use_persistent_stores);
    }
}
