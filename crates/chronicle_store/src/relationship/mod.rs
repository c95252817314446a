//! Relationship edges: one soft-delete-only table per relationship type, written in
//! per-type groups and read with single-hop joins or a bounded recursive walk.

pub(crate) mod query;
pub(crate) mod writer;

use std::collections::BTreeMap;

use chronicle_core::{ChronicleError, ChronicleResult, RelationshipEdge, Registry};

pub(crate) fn check_relationship_type(
    registry: &Registry,
    relationship_type: &str,
) -> ChronicleResult<()> {
    if registry.has_relationship(relationship_type) {
        Ok(())
    } else {
        Err(ChronicleError::invalid(format!(
            "unknown relationship type '{relationship_type}'"
        )))
    }
}

/// Splits edges by relationship type, preserving input order within each group.
pub(crate) fn group_edges(
    registry: &Registry,
    edges: Vec<RelationshipEdge>,
) -> ChronicleResult<BTreeMap<String, Vec<RelationshipEdge>>> {
    let mut groups: BTreeMap<String, Vec<RelationshipEdge>> = BTreeMap::new();
    for edge in edges {
        check_relationship_type(registry, &edge.relationship_type)?;
        groups
            .entry(edge.relationship_type.clone())
            .or_default()
            .push(edge);
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::Urn;

    #[test]
    fn edges_are_grouped_by_type() {
        let registry = Registry::builder()
            .relationship("follows")
            .relationship("owns")
            .build()
            .expect("registry");
        let a = Urn::simple("foo", "1").expect("urn");
        let b = Urn::simple("foo", "2").expect("urn");
        let groups = group_edges(
            &registry,
            vec![
                RelationshipEdge::new("owns", a.clone(), b.clone()),
                RelationshipEdge::new("follows", a.clone(), b.clone()),
                RelationshipEdge::new("owns", b.clone(), a.clone()),
            ],
        )
        .expect("groups");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["owns"].len(), 2);
        assert_eq!(groups["owns"][1].source, b);

        let unknown = group_edges(&registry, vec![RelationshipEdge::new("likes", a, b)]);
        assert!(unknown.is_err());
    }
}
