//! Audit metadata embedded in every persisted ledger record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::ExpectedVersion;
use crate::id::ActorId;
use crate::value_object::ValueObject;

/// Who created/last touched a record, when, and at which stored version.
///
/// `version` is 1 for a record that has never been persisted before; every
/// [`AuditInfo::touch`] bumps it by one. Stores use [`AuditInfo::expected_previous`]
/// as the compare-and-swap expectation when writing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditInfo {
    pub created_at: DateTime<Utc>,
    pub created_by: ActorId,
    pub updated_at: DateTime<Utc>,
    pub updated_by: ActorId,
    pub deleted_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl AuditInfo {
    pub fn created(actor: ActorId, at: DateTime<Utc>) -> Self {
        Self {
            created_at: at,
            created_by: actor,
            updated_at: at,
            updated_by: actor,
            deleted_at: None,
            version: 1,
        }
    }

    /// Record a modification by `actor`.
    pub fn touch(&mut self, actor: ActorId, at: DateTime<Utc>) {
        self.updated_at = at;
        self.updated_by = actor;
        self.version += 1;
    }

    pub fn is_new(&self) -> bool {
        self.version == 1
    }

    /// Version the store must currently hold for this write to succeed.
    pub fn expected_previous(&self) -> ExpectedVersion {
        if self.is_new() {
            ExpectedVersion::Absent
        } else {
            ExpectedVersion::Exact(self.version - 1)
        }
    }
}

impl ValueObject for AuditInfo {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn new_record_expects_absence() {
        let audit = AuditInfo::created(ActorId::new(), at(9));
        assert!(audit.is_new());
        assert_eq!(audit.expected_previous(), ExpectedVersion::Absent);
    }

    #[test]
    fn touch_bumps_version_and_keeps_creator() {
        let creator = ActorId::new();
        let editor = ActorId::new();
        let mut audit = AuditInfo::created(creator, at(9));
        audit.touch(editor, at(10));
        audit.touch(editor, at(11));

        assert_eq!(audit.version, 3);
        assert_eq!(audit.created_by, creator);
        assert_eq!(audit.updated_by, editor);
        assert_eq!(audit.updated_at, at(11));
        assert_eq!(audit.expected_previous(), ExpectedVersion::Exact(2));
    }
}
