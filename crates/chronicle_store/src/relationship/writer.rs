use std::collections::BTreeSet;

use sea_orm::sea_query::{Alias, Expr, Query};
use sea_orm::ConnectionTrait;

use crate::db::RelationshipCol;
use crate::evolution::relationship_table_name;
use crate::sql::exec;
use chronicle_core::{AuditStamp, ChronicleError, ChronicleResult, RelationshipEdge, RemovalOption};

/// Runs the removal step for one group, then inserts every edge as a new row.
/// Returns the number of inserted edges.
pub(crate) async fn write_group<C: ConnectionTrait>(
    conn: &C,
    relationship_type: &str,
    edges: &[RelationshipEdge],
    removal: RemovalOption,
    audit: &AuditStamp,
) -> ChronicleResult<usize> {
    let table = relationship_table_name(relationship_type);
    let removed = remove_edges(conn, &table, edges, removal, audit.time_millis).await?;
    if removed > 0 {
        log::debug!("soft-deleted {removed} {relationship_type} edges before insert");
    }
    if edges.is_empty() {
        return Ok(0);
    }
    let mut insert = Query::insert()
        .into_table(Alias::new(&table))
        .columns([
            RelationshipCol::Source,
            RelationshipCol::Destination,
            RelationshipCol::SourceType,
            RelationshipCol::DestinationType,
            RelationshipCol::Metadata,
            RelationshipCol::Lastmodifiedon,
            RelationshipCol::Lastmodifiedby,
        ])
        .to_owned();
    for edge in edges {
        let payload = serde_json::to_string(&edge.payload)
            .map_err(|err| ChronicleError::invalid(format!("edge payload: {err}")))?;
        insert.values_panic([
            edge.source.to_string().into(),
            edge.destination.to_string().into(),
            edge.source.entity_type().into(),
            edge.destination.entity_type().into(),
            payload.into(),
            audit.time_millis.into(),
            audit.actor.to_string().into(),
        ]);
    }
    exec(conn, &insert).await?;
    Ok(edges.len())
}

async fn remove_edges<C: ConnectionTrait>(
    conn: &C,
    table: &str,
    edges: &[RelationshipEdge],
    removal: RemovalOption,
    deleted_at: i64,
) -> ChronicleResult<u64> {
    let targets: BTreeSet<(Option<String>, Option<String>)> = edges
        .iter()
        .filter_map(|edge| {
            let source = edge.source.to_string();
            let destination = edge.destination.to_string();
            match removal {
                RemovalOption::RemoveNone => None,
                RemovalOption::RemoveAllEdgesFromSource => Some((Some(source), None)),
                RemovalOption::RemoveAllEdgesToDestination => Some((None, Some(destination))),
                RemovalOption::RemoveAllEdgesFromSourceToDestination => {
                    Some((Some(source), Some(destination)))
                }
            }
        })
        .collect();
    let mut removed = 0;
    for (source, destination) in targets {
        let mut update = Query::update()
            .table(Alias::new(table))
            .values([(RelationshipCol::DeletedTs, deleted_at.into())])
            .and_where(Expr::col(RelationshipCol::DeletedTs).is_null())
            .to_owned();
        if let Some(source) = source {
            update.and_where(Expr::col(RelationshipCol::Source).eq(source));
        }
        if let Some(destination) = destination {
            update.and_where(Expr::col(RelationshipCol::Destination).eq(destination));
        }
        removed += exec(conn, &update).await?;
    }
    Ok(removed)
}
