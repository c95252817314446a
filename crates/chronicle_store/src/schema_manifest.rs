//! Embedded description of the core tables, checked against the identifiers the
//! migrations and queries are written with.

use crate::db::{MetadataAspect, MetadataIndex, MetadataSchemaVersion};
use crate::sql::col_name;
use chronicle_core::{ChronicleError, ChronicleResult, SchemaManifest};

struct CoreTable {
    name: String,
    columns: Vec<String>,
    primary_key: Vec<String>,
}

fn core_tables() -> Vec<CoreTable> {
    vec![
        CoreTable {
            name: col_name(MetadataSchemaVersion::Table),
            columns: [
                MetadataSchemaVersion::Version,
                MetadataSchemaVersion::AppliedAt,
                MetadataSchemaVersion::Checksum,
            ]
            .map(col_name)
            .to_vec(),
            primary_key: vec![col_name(MetadataSchemaVersion::Version)],
        },
        CoreTable {
            name: col_name(MetadataAspect::Table),
            columns: [
                MetadataAspect::Urn,
                MetadataAspect::Aspect,
                MetadataAspect::Version,
                MetadataAspect::Metadata,
                MetadataAspect::Createdon,
                MetadataAspect::Createdby,
                MetadataAspect::Createdfor,
            ]
            .map(col_name)
            .to_vec(),
            primary_key: [MetadataAspect::Urn, MetadataAspect::Aspect, MetadataAspect::Version]
                .map(col_name)
                .to_vec(),
        },
        CoreTable {
            name: col_name(MetadataIndex::Table),
            columns: [
                MetadataIndex::Id,
                MetadataIndex::Urn,
                MetadataIndex::Aspect,
                MetadataIndex::Path,
                MetadataIndex::Longval,
                MetadataIndex::Doubleval,
                MetadataIndex::Stringval,
            ]
            .map(col_name)
            .to_vec(),
            primary_key: vec![col_name(MetadataIndex::Id)],
        },
    ]
}

pub fn schema_manifest_json() -> &'static str {
    include_str!(concat!(env!("OUT_DIR"), "/schema_manifest.json"))
}

pub fn load_schema_manifest() -> ChronicleResult<SchemaManifest> {
    serde_json::from_str(schema_manifest_json())
        .map_err(|err| ChronicleError::storage(format!("schema manifest parse: {err}")))
}

/// Fails when a core table in the manifest disagrees with the migration identifiers.
pub fn check_schema_manifest(manifest: &SchemaManifest) -> ChronicleResult<()> {
    for expected in core_tables() {
        let table = manifest.table(&expected.name).ok_or_else(|| {
            ChronicleError::storage(format!("schema manifest lacks table {}", expected.name))
        })?;
        let mut described: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        let mut declared: Vec<&str> = expected.columns.iter().map(String::as_str).collect();
        described.sort_unstable();
        declared.sort_unstable();
        if described != declared {
            return Err(ChronicleError::storage(format!(
                "schema manifest columns of {} are {described:?}, migrations declare {declared:?}",
                expected.name
            )));
        }
        if table.primary_key != expected.primary_key {
            return Err(ChronicleError::storage(format!(
                "schema manifest primary key of {} is {:?}, migrations declare {:?}",
                expected.name, table.primary_key, expected.primary_key
            )));
        }
    }
    Ok(())
}
