//! Physical layouts behind the read/write engine.
//!
//! `HistoryLayout` keeps every displaced value in `metadata_aspect`; `EntityLayout` keeps
//! only the latest value per aspect in `metadata_entity_<type>`. `LayoutRouter` picks the
//! primary layout from the schema mode and, in dual mode, mirrors writes into the entity
//! tables inside the caller's transaction.

mod entity;
pub(crate) mod history;

use sea_orm::ConnectionTrait;

pub(crate) use entity::EntityLayout;
pub(crate) use history::HistoryLayout;

use crate::config::SchemaMode;
use chronicle_core::{
    AppliedVersion, AspectKey, AspectValue, AuditStamp, ChronicleError, ChronicleResult,
    StoredPayload, Urn, VersionedRecord, LATEST_VERSION,
};

/// Current row of one `(urn, aspect)` together with the token its compare-and-swap
/// update must match.
#[derive(Clone, Debug)]
pub(crate) struct LatestSlot {
    pub record: VersionedRecord,
    pub lock_token: i64,
}

impl LatestSlot {
    pub fn value(&self) -> ChronicleResult<Option<AspectValue>> {
        decode_record(&self.record)
    }
}

/// A write as handed to a layout: the payload is already serialized.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LayoutWrite<'a> {
    pub urn: &'a Urn,
    pub aspect_type: &'a str,
    pub payload: &'a StoredPayload,
    pub audit: &'a AuditStamp,
}

pub(crate) trait AspectLayout {
    async fn read_latest<C: ConnectionTrait>(
        &self,
        conn: &C,
        urn: &Urn,
        aspect_type: &str,
    ) -> ChronicleResult<Option<LatestSlot>>;

    /// Replaces the current value. `current` must be the slot read in the same transaction.
    async fn apply<C: ConnectionTrait>(
        &self,
        conn: &C,
        write: &LayoutWrite<'_>,
        current: Option<&LatestSlot>,
    ) -> ChronicleResult<AppliedVersion>;

    /// True when any aspect of `urn` currently holds a value.
    async fn exists<C: ConnectionTrait>(&self, conn: &C, urn: &Urn) -> ChronicleResult<bool>;
}

pub(crate) fn decode_record(record: &VersionedRecord) -> ChronicleResult<Option<AspectValue>> {
    match &record.payload {
        StoredPayload::Value(raw) => Ok(Some(AspectValue::from_json_str(
            record.key.aspect_type.clone(),
            raw,
        )?)),
        StoredPayload::Tombstone => Ok(None),
    }
}

#[derive(Clone, Debug)]
pub(crate) struct LayoutRouter {
    mode: SchemaMode,
    dual_read_compare: bool,
    history: HistoryLayout,
    entity: EntityLayout,
}

impl LayoutRouter {
    pub fn new(mode: SchemaMode, dual_read_compare: bool, entity: EntityLayout) -> Self {
        Self {
            mode,
            dual_read_compare,
            history: HistoryLayout,
            entity,
        }
    }

    pub fn mode(&self) -> SchemaMode {
        self.mode
    }

    pub fn entity(&self) -> &EntityLayout {
        &self.entity
    }

    /// Fails with `UnsupportedInSchemaMode` when only the entity tables exist.
    pub fn require_history(&self, operation: &str) -> ChronicleResult<&HistoryLayout> {
        if self.mode.uses_history() {
            Ok(&self.history)
        } else {
            Err(ChronicleError::unsupported(self.mode.as_str(), operation))
        }
    }

    /// Slot of the primary layout, for use inside a write transaction.
    pub async fn read_latest<C: ConnectionTrait>(
        &self,
        conn: &C,
        urn: &Urn,
        aspect_type: &str,
    ) -> ChronicleResult<Option<LatestSlot>> {
        match self.mode {
            SchemaMode::HistoryTable | SchemaMode::Dual => {
                self.history.read_latest(conn, urn, aspect_type).await
            }
            SchemaMode::EntityTable => self.entity.read_latest(conn, urn, aspect_type).await,
        }
    }

    pub async fn apply<C: ConnectionTrait>(
        &self,
        conn: &C,
        write: &LayoutWrite<'_>,
        current: Option<&LatestSlot>,
    ) -> ChronicleResult<AppliedVersion> {
        match self.mode {
            SchemaMode::HistoryTable => self.history.apply(conn, write, current).await,
            SchemaMode::EntityTable => self.entity.apply(conn, write, current).await,
            SchemaMode::Dual => {
                let applied = self.history.apply(conn, write, current).await?;
                let shadow = self
                    .entity
                    .read_latest(conn, write.urn, write.aspect_type)
                    .await?;
                self.entity.apply(conn, write, shadow.as_ref()).await?;
                Ok(applied)
            }
        }
    }

    /// Current record from the primary layout. In dual mode with comparison enabled the
    /// entity table is read as well and any mismatch is logged.
    pub async fn get_latest<C: ConnectionTrait>(
        &self,
        conn: &C,
        urn: &Urn,
        aspect_type: &str,
    ) -> ChronicleResult<Option<VersionedRecord>> {
        let primary = self.read_latest(conn, urn, aspect_type).await?;
        if self.mode == SchemaMode::Dual && self.dual_read_compare {
            self.compare_shadow(conn, urn, aspect_type, primary.as_ref())
                .await;
        }
        Ok(primary.map(|slot| slot.record))
    }

    pub async fn get_record<C: ConnectionTrait>(
        &self,
        conn: &C,
        key: &AspectKey,
    ) -> ChronicleResult<Option<VersionedRecord>> {
        if key.version == LATEST_VERSION {
            return self.get_latest(conn, &key.urn, &key.aspect_type).await;
        }
        self.require_history("get_version")?
            .get_version(conn, key)
            .await
    }

    pub async fn exists<C: ConnectionTrait>(&self, conn: &C, urn: &Urn) -> ChronicleResult<bool> {
        match self.mode {
            SchemaMode::HistoryTable | SchemaMode::Dual => self.history.exists(conn, urn).await,
            SchemaMode::EntityTable => self.entity.exists(conn, urn).await,
        }
    }

    async fn compare_shadow<C: ConnectionTrait>(
        &self,
        conn: &C,
        urn: &Urn,
        aspect_type: &str,
        primary: Option<&LatestSlot>,
    ) {
        let shadow = match self.entity.read_latest(conn, urn, aspect_type).await {
            Ok(shadow) => shadow,
            Err(err) => {
                log::warn!("dual read of {urn} {aspect_type} failed on entity table: {err}");
                return;
            }
        };
        let primary_value = primary.map(LatestSlot::value).transpose();
        let shadow_value = shadow.as_ref().map(LatestSlot::value).transpose();
        match (primary_value, shadow_value) {
            (Ok(primary), Ok(shadow)) => {
                if primary.flatten() != shadow.flatten() {
                    log::warn!(
                        "dual read divergence for {urn} {aspect_type}: history and entity table disagree"
                    );
                }
            }
            (Err(err), _) | (_, Err(err)) => {
                log::warn!("dual read of {urn} {aspect_type} could not decode: {err}");
            }
        }
    }
}
