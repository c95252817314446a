use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{AspectValue, Urn};

/// Version slot holding the current value.
pub const LATEST_VERSION: i64 = 0;

/// Reserved payload marking an aspect as deleted at a version.
pub const TOMBSTONE_SENTINEL: &str = "{\"gma_deleted\":true}";

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AspectKey {
    pub urn: Urn,
    pub aspect_type: String,
    pub version: i64,
}

impl AspectKey {
    pub fn new(urn: Urn, aspect_type: impl Into<String>, version: i64) -> Self {
        Self {
            urn,
            aspect_type: aspect_type.into(),
            version,
        }
    }

    pub fn latest(urn: Urn, aspect_type: impl Into<String>) -> Self {
        Self::new(urn, aspect_type, LATEST_VERSION)
    }

    pub fn is_latest(&self) -> bool {
        self.version == LATEST_VERSION
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStamp {
    pub actor: Urn,
    pub time_millis: i64,
    pub impersonator: Option<Urn>,
}

impl AuditStamp {
    pub fn new(actor: Urn, time_millis: i64) -> Self {
        Self {
            actor,
            time_millis,
            impersonator: None,
        }
    }

    pub fn now(actor: Urn) -> Self {
        Self::new(actor, now_millis())
    }

    pub fn with_impersonator(mut self, impersonator: Urn) -> Self {
        self.impersonator = Some(impersonator);
        self
    }
}

impl Default for AuditStamp {
    fn default() -> Self {
        Self::now(Urn::unknown_actor())
    }
}

/// Stored payload of a history row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredPayload {
    Value(String),
    Tombstone,
}

impl StoredPayload {
    pub fn from_column(raw: String) -> Self {
        if raw == TOMBSTONE_SENTINEL {
            StoredPayload::Tombstone
        } else {
            StoredPayload::Value(raw)
        }
    }

    pub fn as_column(&self) -> &str {
        match self {
            StoredPayload::Value(raw) => raw,
            StoredPayload::Tombstone => TOMBSTONE_SENTINEL,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, StoredPayload::Tombstone)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub key: AspectKey,
    pub payload: StoredPayload,
    pub created_on: i64,
    pub created_by: String,
    pub created_for: Option<String>,
}

impl VersionedRecord {
    pub fn audit(&self) -> AuditStamp {
        AuditStamp {
            actor: Urn::parse(&self.created_by).unwrap_or_else(|_| Urn::unknown_actor()),
            time_millis: self.created_on,
            impersonator: self
                .created_for
                .as_deref()
                .and_then(|raw| Urn::parse(raw).ok()),
        }
    }
}

/// Audit metadata returned next to a value by `get_with_extra_info`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraInfo {
    pub urn: Urn,
    pub version: i64,
    pub audit: AuditStamp,
}

/// Outcome of a single `add` or `delete`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppliedVersion {
    /// No current value existed; the value went straight into version 0.
    Inserted,
    /// The previous current value moved to `displaced_to`.
    Replaced { displaced_to: i64 },
    /// Equal to the current value, or nothing to delete.
    Unchanged,
}

impl AppliedVersion {
    pub fn is_applied(self) -> bool {
        !matches!(self, AppliedVersion::Unchanged)
    }
}

/// Notification sent after every applied write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub urn: Urn,
    pub aspect_type: String,
    pub previous: Option<AspectValue>,
    pub current: Option<AspectValue>,
    pub audit: AuditStamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tombstone_column_roundtrips() {
        let payload = StoredPayload::from_column(TOMBSTONE_SENTINEL.to_string());
        assert!(payload.is_tombstone());
        assert_eq!(payload.as_column(), TOMBSTONE_SENTINEL);
        let payload = StoredPayload::from_column("{\"a\":1}".to_string());
        assert_eq!(payload, StoredPayload::Value("{\"a\":1}".to_string()));
    }

    #[test]
    fn default_audit_uses_unknown_actor() {
        let audit = AuditStamp::default();
        assert_eq!(audit.actor.to_string(), "urn:li:corpuser:unknown");
        assert!(audit.time_millis > 0);
        assert!(audit.impersonator.is_none());
    }

    #[test]
    fn record_audit_reads_back_stamp() {
        let record = VersionedRecord {
            key: AspectKey::latest(Urn::simple("foo", "1").expect("urn"), "profile"),
            payload: StoredPayload::Value("{}".to_string()),
            created_on: 42,
            created_by: "urn:li:corpuser:ada".to_string(),
            created_for: Some("urn:li:corpuser:bob".to_string()),
        };
        let audit = record.audit();
        assert_eq!(audit.time_millis, 42);
        assert_eq!(audit.actor.to_string(), "urn:li:corpuser:ada");
        assert_eq!(
            audit.impersonator.map(|urn| urn.to_string()),
            Some("urn:li:corpuser:bob".to_string())
        );
    }
}
