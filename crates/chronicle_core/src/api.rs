use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    AppliedVersion, AspectKey, AspectValue, AuditStamp, ChangeEvent, ChronicleResult, ExtraInfo,
    FindEntitiesQuery, FindRelationshipsQuery, IndexFilter, IndexGroupByCriterion,
    IndexSortCriterion, ListResult, PageRequest, RelationshipEdge, RelationshipRecord,
    RemovalOption, Urn,
};

/// Value plus the audit metadata of the row it came from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AspectWithExtraInfo {
    pub value: AspectValue,
    pub info: ExtraInfo,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillMode {
    Index,
    EntityTable,
    All,
}

#[async_trait]
pub trait AspectWriteApi {
    async fn add(
        &self,
        urn: &Urn,
        value: AspectValue,
        audit: AuditStamp,
    ) -> ChronicleResult<AppliedVersion>;

    /// Applies several aspects of one urn, atomically when the store is configured so.
    async fn add_many(
        &self,
        urn: &Urn,
        values: Vec<AspectValue>,
        audit: AuditStamp,
    ) -> ChronicleResult<Vec<AppliedVersion>>;

    async fn delete(
        &self,
        urn: &Urn,
        aspect_type: &str,
        audit: AuditStamp,
    ) -> ChronicleResult<AppliedVersion>;
}

#[async_trait]
pub trait AspectReadApi {
    async fn get(&self, key: &AspectKey) -> ChronicleResult<Option<AspectValue>>;

    async fn get_many(
        &self,
        keys: &[AspectKey],
    ) -> ChronicleResult<HashMap<AspectKey, AspectValue>>;

    async fn get_with_extra_info(
        &self,
        key: &AspectKey,
    ) -> ChronicleResult<Option<AspectWithExtraInfo>>;

    async fn exists(&self, urn: &Urn) -> ChronicleResult<bool>;

    async fn list_versions(
        &self,
        aspect_type: &str,
        urn: &Urn,
        start: u64,
        page_size: u64,
    ) -> ChronicleResult<ListResult<i64>>;

    async fn list_by_urn(
        &self,
        aspect_type: &str,
        urn: &Urn,
        start: u64,
        page_size: u64,
    ) -> ChronicleResult<ListResult<AspectWithExtraInfo>>;

    async fn list_at_version(
        &self,
        aspect_type: &str,
        version: i64,
        start: u64,
        page_size: u64,
    ) -> ChronicleResult<ListResult<AspectWithExtraInfo>>;
}

#[async_trait]
pub trait IndexQueryApi {
    async fn list_urns(
        &self,
        entity_type: &str,
        filter: &IndexFilter,
        sort: Option<&IndexSortCriterion>,
        page: &PageRequest,
    ) -> ChronicleResult<ListResult<Urn>>;

    async fn count_aggregate(
        &self,
        entity_type: &str,
        filter: &IndexFilter,
        group_by: &IndexGroupByCriterion,
    ) -> ChronicleResult<BTreeMap<String, u64>>;
}

#[async_trait]
pub trait RelationshipApi {
    /// Writes edges grouped by relationship type; returns the number of edges inserted.
    async fn add_relationships(
        &self,
        edges: Vec<RelationshipEdge>,
        removal: RemovalOption,
        audit: AuditStamp,
    ) -> ChronicleResult<usize>;

    async fn find_relationships(
        &self,
        query: &FindRelationshipsQuery,
    ) -> ChronicleResult<Vec<RelationshipRecord>>;

    async fn find_entities(&self, query: &FindEntitiesQuery) -> ChronicleResult<Vec<Urn>>;
}

#[async_trait]
pub trait BackfillApi {
    async fn backfill(
        &self,
        mode: BackfillMode,
        urns: &[Urn],
        aspect_types: &[String],
    ) -> ChronicleResult<BTreeMap<Urn, Vec<String>>>;
}

/// Receives a notification after every applied write. Skipped writes never reach it.
pub trait ChangeEventProducer: Send + Sync {
    fn produce(&self, event: ChangeEvent);
}
