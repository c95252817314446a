use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::schema::{RecordSchema, ResolvedPath, ScalarKind};
use crate::{ChronicleError, ChronicleResult, Urn};

/// Prefix of the pseudo aspect type under which urn key fields are indexed.
pub const URN_ASPECT_PREFIX: &str = "urn.";

pub fn urn_aspect_type(entity_type: &str) -> String {
    format!("{URN_ASPECT_PREFIX}{entity_type}")
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyField {
    pub name: String,
    pub kind: ScalarKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeSpec {
    pub name: String,
    pub key_fields: Vec<KeyField>,
    pub aspects: Vec<String>,
}

impl EntityTypeSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_fields: Vec::new(),
            aspects: Vec::new(),
        }
    }

    pub fn key_field(mut self, name: impl Into<String>, kind: ScalarKind) -> Self {
        self.key_fields.push(KeyField {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn aspect(mut self, aspect_type: impl Into<String>) -> Self {
        self.aspects.push(aspect_type.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AspectSpec {
    pub name: String,
    pub schema: RecordSchema,
    pub indexed_paths: Vec<String>,
}

impl AspectSpec {
    pub fn new(name: impl Into<String>, schema: RecordSchema) -> Self {
        Self {
            name: name.into(),
            schema,
            indexed_paths: Vec::new(),
        }
    }

    pub fn indexed(mut self, path: impl Into<String>) -> Self {
        self.indexed_paths.push(path.into());
        self
    }
}

/// Registered entity types, aspect types and relationship types.
///
/// Built once at startup and shared read-only by the store.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    entities: BTreeMap<String, EntityTypeSpec>,
    aspects: BTreeMap<String, AspectSpec>,
    relationships: BTreeSet<String>,
}

#[derive(Default)]
pub struct RegistryBuilder {
    entities: Vec<EntityTypeSpec>,
    aspects: Vec<AspectSpec>,
    relationships: Vec<String>,
}

impl RegistryBuilder {
    pub fn entity(mut self, spec: EntityTypeSpec) -> Self {
        self.entities.push(spec);
        self
    }

    pub fn aspect(mut self, spec: AspectSpec) -> Self {
        self.aspects.push(spec);
        self
    }

    pub fn relationship(mut self, name: impl Into<String>) -> Self {
        self.relationships.push(name.into());
        self
    }

    pub fn build(self) -> ChronicleResult<Registry> {
        let mut registry = Registry::default();
        for spec in self.aspects {
            if spec.name.is_empty() || spec.name.starts_with(URN_ASPECT_PREFIX) {
                return Err(ChronicleError::invalid(format!(
                    "invalid aspect type name '{}'",
                    spec.name
                )));
            }
            for path in &spec.indexed_paths {
                spec.schema.resolve(path).map_err(|err| {
                    ChronicleError::invalid(format!(
                        "aspect '{}' indexed path '{path}': {err}",
                        spec.name
                    ))
                })?;
            }
            if registry.aspects.contains_key(&spec.name) {
                return Err(ChronicleError::invalid(format!(
                    "duplicate aspect type '{}'",
                    spec.name
                )));
            }
            registry.aspects.insert(spec.name.clone(), spec);
        }
        for spec in self.entities {
            if spec.key_fields.is_empty() {
                return Err(ChronicleError::invalid(format!(
                    "entity type '{}' declares no key fields",
                    spec.name
                )));
            }
            for aspect in &spec.aspects {
                if !registry.aspects.contains_key(aspect) {
                    return Err(ChronicleError::invalid(format!(
                        "entity type '{}' references unknown aspect '{aspect}'",
                        spec.name
                    )));
                }
            }
            if registry.entities.contains_key(&spec.name) {
                return Err(ChronicleError::invalid(format!(
                    "duplicate entity type '{}'",
                    spec.name
                )));
            }
            registry.entities.insert(spec.name.clone(), spec);
        }
        for name in self.relationships {
            if name.is_empty() {
                return Err(ChronicleError::invalid("empty relationship type name"));
            }
            if !registry.relationships.insert(name.clone()) {
                return Err(ChronicleError::invalid(format!(
                    "duplicate relationship type '{name}'"
                )));
            }
        }
        Ok(registry)
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn entity(&self, entity_type: &str) -> ChronicleResult<&EntityTypeSpec> {
        self.entities
            .get(entity_type)
            .ok_or_else(|| ChronicleError::invalid(format!("unknown entity type '{entity_type}'")))
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityTypeSpec> {
        self.entities.values()
    }

    pub fn aspect(&self, aspect_type: &str) -> ChronicleResult<&AspectSpec> {
        self.aspects
            .get(aspect_type)
            .ok_or_else(|| ChronicleError::invalid(format!("unknown aspect type '{aspect_type}'")))
    }

    pub fn relationships(&self) -> impl Iterator<Item = &String> {
        self.relationships.iter()
    }

    pub fn has_relationship(&self, relationship_type: &str) -> bool {
        self.relationships.contains(relationship_type)
    }

    /// Checks that the urn's entity type is registered, that its key arity matches and
    /// that the aspect type is one the entity supports.
    pub fn check_aspect_for(&self, urn: &Urn, aspect_type: &str) -> ChronicleResult<&AspectSpec> {
        let entity = self.check_urn(urn)?;
        if !entity.aspects.iter().any(|aspect| aspect == aspect_type) {
            return Err(ChronicleError::invalid(format!(
                "aspect '{aspect_type}' is not supported by entity type '{}'",
                entity.name
            )));
        }
        self.aspect(aspect_type)
    }

    pub fn check_urn(&self, urn: &Urn) -> ChronicleResult<&EntityTypeSpec> {
        let entity = self.entity(urn.entity_type())?;
        if entity.key_fields.len() != urn.parts().len() {
            return Err(ChronicleError::invalid(format!(
                "urn '{urn}' has {} key parts, entity type '{}' expects {}",
                urn.parts().len(),
                entity.name,
                entity.key_fields.len()
            )));
        }
        for (field, part) in entity.key_fields.iter().zip(urn.parts()) {
            let parses = match field.kind {
                ScalarKind::String => true,
                ScalarKind::Long => part.parse::<i64>().is_ok(),
                ScalarKind::Double => part.parse::<f64>().is_ok(),
            };
            if !parses {
                return Err(ChronicleError::invalid(format!(
                    "urn '{urn}' key field '{}' is not a {:?} value",
                    field.name, field.kind
                )));
            }
        }
        Ok(entity)
    }

    /// Walks the aspect schema, or the entity key declaration for urn pseudo aspects.
    pub fn resolve_path(&self, aspect_type: &str, path: &str) -> ChronicleResult<ResolvedPath> {
        if let Some(entity_type) = aspect_type.strip_prefix(URN_ASPECT_PREFIX) {
            let entity = self.entity(entity_type)?;
            let name = path.strip_prefix('/').unwrap_or(path);
            let field = entity
                .key_fields
                .iter()
                .find(|field| field.name == name)
                .ok_or_else(|| {
                    ChronicleError::invalid(format!(
                        "entity type '{entity_type}' has no key field '{path}'"
                    ))
                })?;
            return Ok(ResolvedPath {
                kind: field.kind,
                fans_out: false,
            });
        }
        self.aspect(aspect_type)?.schema.resolve(path)
    }

    pub fn is_known_aspect(&self, aspect_type: &str) -> bool {
        match aspect_type.strip_prefix(URN_ASPECT_PREFIX) {
            Some(entity_type) => self.entities.contains_key(entity_type),
            None => self.aspects.contains_key(aspect_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldType};

    fn profile() -> AspectSpec {
        AspectSpec::new(
            "profile",
            RecordSchema::new(vec![
                FieldDef::required("name", FieldType::String),
                FieldDef::optional("age", FieldType::Long),
            ]),
        )
        .indexed("/name")
    }

    fn registry() -> Registry {
        Registry::builder()
            .aspect(profile())
            .entity(
                EntityTypeSpec::new("foo")
                    .key_field("id", ScalarKind::Long)
                    .aspect("profile"),
            )
            .relationship("follows")
            .build()
            .expect("registry")
    }

    #[test]
    fn checks_aspect_support_per_entity() {
        let registry = registry();
        let urn = Urn::simple("foo", "1").expect("urn");
        assert!(registry.check_aspect_for(&urn, "profile").is_ok());
        assert!(registry.check_aspect_for(&urn, "ownership").is_err());
        let other = Urn::simple("bar", "1").expect("urn");
        assert!(registry.check_aspect_for(&other, "profile").is_err());
        let wrong_arity = Urn::new("foo", vec!["1".into(), "2".into()]).expect("urn");
        assert!(registry.check_urn(&wrong_arity).is_err());
    }

    #[test]
    fn key_parts_must_parse_as_their_declared_kind() {
        let registry = registry();
        let mistyped = Urn::simple("foo", "abc").expect("urn");
        let err = registry.check_urn(&mistyped).expect_err("not a long");
        assert!(matches!(err, ChronicleError::Validation { .. }));
        assert!(registry.check_aspect_for(&mistyped, "profile").is_err());
        assert!(registry.check_urn(&Urn::simple("foo", "-7").expect("urn")).is_ok());
    }

    #[test]
    fn resolves_urn_pseudo_aspect_paths() {
        let registry = registry();
        let resolved = registry.resolve_path("urn.foo", "/id").expect("resolve");
        assert_eq!(resolved.kind, ScalarKind::Long);
        assert!(registry.resolve_path("urn.foo", "/missing").is_err());
        assert!(registry.is_known_aspect("urn.foo"));
        assert!(!registry.is_known_aspect("urn.bar"));
    }

    #[test]
    fn rejects_invalid_registrations() {
        let bad_path = Registry::builder()
            .aspect(profile().indexed("/nope"))
            .build();
        assert!(bad_path.is_err());
        let unknown_aspect = Registry::builder()
            .entity(
                EntityTypeSpec::new("foo")
                    .key_field("id", ScalarKind::Long)
                    .aspect("profile"),
            )
            .build();
        assert!(unknown_aspect.is_err());
        let duplicate = Registry::builder().aspect(profile()).aspect(profile()).build();
        assert!(duplicate.is_err());
        let keyless = Registry::builder()
            .aspect(profile())
            .entity(EntityTypeSpec::new("foo").aspect("profile"))
            .build();
        assert!(keyless.is_err());
    }
}
