use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::filter::{validate_condition, Condition, IndexValue};
use crate::{AuditStamp, ChronicleError, ChronicleResult, Urn};

/// Edge to be written. Source and destination types are taken from the urns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub relationship_type: String,
    pub source: Urn,
    pub destination: Urn,
    #[serde(default)]
    pub payload: JsonValue,
}

impl RelationshipEdge {
    pub fn new(relationship_type: impl Into<String>, source: Urn, destination: Urn) -> Self {
        Self {
            relationship_type: relationship_type.into(),
            source,
            destination,
            payload: JsonValue::Object(Default::default()),
        }
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = payload;
        self
    }
}

/// A live edge as read back from storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub relationship_type: String,
    pub source: Urn,
    pub destination: Urn,
    pub payload: JsonValue,
    pub last_modified: AuditStamp,
}

/// Edges soft-deleted before a group of new edges is inserted.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalOption {
    #[default]
    RemoveNone,
    RemoveAllEdgesFromSource,
    RemoveAllEdgesToDestination,
    RemoveAllEdgesFromSourceToDestination,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipDirection {
    #[default]
    Outgoing,
    Incoming,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EntityField {
    Urn,
    Aspect { aspect_type: String, path: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityCriterion {
    pub field: EntityField,
    pub condition: Condition,
    pub value: IndexValue,
}

impl EntityCriterion {
    pub fn urn(condition: Condition, value: IndexValue) -> Self {
        Self {
            field: EntityField::Urn,
            condition,
            value,
        }
    }

    pub fn urn_eq(urn: &Urn) -> Self {
        Self::urn(Condition::Equal, IndexValue::String(urn.to_string()))
    }

    pub fn aspect(
        aspect_type: impl Into<String>,
        path: impl Into<String>,
        condition: Condition,
        value: IndexValue,
    ) -> Self {
        Self {
            field: EntityField::Aspect {
                aspect_type: aspect_type.into(),
                path: path.into(),
            },
            condition,
            value,
        }
    }
}

/// Constraints on one side of an edge. `entity_type` names the entity table joined for
/// aspect criteria and restricts the edge's type column.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityFilter {
    pub entity_type: Option<String>,
    pub criteria: Vec<EntityCriterion>,
}

impl EntityFilter {
    pub fn of_type(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            criteria: Vec::new(),
        }
    }

    pub fn criterion(mut self, criterion: EntityCriterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    /// True when the filter can be answered from the edge columns alone.
    pub fn is_urn_only(&self) -> bool {
        self.criteria
            .iter()
            .all(|criterion| criterion.field == EntityField::Urn)
    }

    pub fn validate(&self) -> ChronicleResult<()> {
        for criterion in &self.criteria {
            validate_condition(criterion.condition, &criterion.value, false)?;
        }
        let has_aspect = !self.is_urn_only();
        if has_aspect && self.entity_type.is_none() {
            return Err(ChronicleError::invalid(
                "aspect criteria require the entity type of their side",
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EdgeField {
    Source,
    Destination,
    SourceType,
    DestinationType,
    Payload { path: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeCriterion {
    pub field: EdgeField,
    pub condition: Condition,
    pub value: IndexValue,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationshipFilter {
    pub relationship_type: String,
    #[serde(default)]
    pub criteria: Vec<EdgeCriterion>,
    #[serde(default)]
    pub direction: RelationshipDirection,
}

impl RelationshipFilter {
    pub fn new(relationship_type: impl Into<String>, direction: RelationshipDirection) -> Self {
        Self {
            relationship_type: relationship_type.into(),
            criteria: Vec::new(),
            direction,
        }
    }

    pub fn criterion(mut self, field: EdgeField, condition: Condition, value: IndexValue) -> Self {
        self.criteria.push(EdgeCriterion {
            field,
            condition,
            value,
        });
        self
    }

    pub fn validate(&self) -> ChronicleResult<()> {
        if self.relationship_type.is_empty() {
            return Err(ChronicleError::invalid("relationship type is empty"));
        }
        for criterion in &self.criteria {
            validate_condition(criterion.condition, &criterion.value, false)?;
        }
        Ok(())
    }
}

/// Single-hop edge lookup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FindRelationshipsQuery {
    pub source: Option<EntityFilter>,
    pub destination: Option<EntityFilter>,
    pub relationship: RelationshipFilter,
    pub offset: u64,
    pub count: u64,
}

/// Entities reachable from the `start` side within `[min_hops, max_hops]` edges.
///
/// With `Outgoing` the walk follows source to destination; with `Incoming` it follows
/// destination to source. `target` filters the entities returned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FindEntitiesQuery {
    pub start: EntityFilter,
    pub target: Option<EntityFilter>,
    pub relationship: RelationshipFilter,
    pub min_hops: u32,
    pub max_hops: u32,
    pub offset: u64,
    pub count: u64,
}

impl FindEntitiesQuery {
    pub fn validate(&self) -> ChronicleResult<()> {
        if self.min_hops == 0 || self.max_hops < self.min_hops {
            return Err(ChronicleError::invalid(format!(
                "invalid hop range {}..={}",
                self.min_hops, self.max_hops
            )));
        }
        if self.count == 0 {
            return Err(ChronicleError::invalid("count must be positive"));
        }
        self.start.validate()?;
        if let Some(target) = &self.target {
            target.validate()?;
        }
        self.relationship.validate()
    }
}

impl FindRelationshipsQuery {
    pub fn validate(&self) -> ChronicleResult<()> {
        if self.count == 0 {
            return Err(ChronicleError::invalid("count must be positive"));
        }
        if let Some(source) = &self.source {
            source.validate()?;
        }
        if let Some(destination) = &self.destination {
            destination.validate()?;
        }
        self.relationship.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_with_is_rejected_for_relationship_criteria() {
        let filter = EntityFilter::default().criterion(EntityCriterion::urn(
            Condition::StartWith,
            IndexValue::string("urn:li:foo"),
        ));
        assert!(filter.validate().is_err());
    }

    #[test]
    fn aspect_criteria_need_an_entity_type() {
        let untyped = EntityFilter::default().criterion(EntityCriterion::aspect(
            "profile",
            "/name",
            Condition::Equal,
            IndexValue::string("ada"),
        ));
        assert!(untyped.validate().is_err());
        let typed = EntityFilter::of_type("foo").criterion(EntityCriterion::aspect(
            "profile",
            "/name",
            Condition::Equal,
            IndexValue::string("ada"),
        ));
        assert!(typed.validate().is_ok());
        assert!(!typed.is_urn_only());
    }

    #[test]
    fn hop_ranges_are_checked() {
        let query = FindEntitiesQuery {
            start: EntityFilter::default(),
            target: None,
            relationship: RelationshipFilter::new("follows", RelationshipDirection::Outgoing),
            min_hops: 2,
            max_hops: 1,
            offset: 0,
            count: 10,
        };
        assert!(query.validate().is_err());
    }
}
