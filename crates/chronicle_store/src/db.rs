use sea_orm::sea_query;
use sea_orm_migration::prelude::Iden;

#[derive(Iden, Clone, Copy)]
pub enum MetadataSchemaVersion {
    Table,
    Version,
    AppliedAt,
    Checksum,
}

#[derive(Iden, Clone, Copy)]
pub enum MetadataAspect {
    Table,
    Urn,
    Aspect,
    Version,
    Metadata,
    Createdon,
    Createdby,
    Createdfor,
}

#[derive(Iden, Clone, Copy)]
pub enum MetadataIndex {
    Table,
    Id,
    Urn,
    Aspect,
    Path,
    Longval,
    Doubleval,
    Stringval,
}

/// Columns shared by every `metadata_entity_<type>` table.
#[derive(Iden, Clone, Copy)]
pub enum EntityTableCol {
    Urn,
    Lastmodifiedon,
    Lastmodifiedby,
}

/// Columns shared by every `metadata_relationship_<type>` table.
#[derive(Iden, Clone, Copy)]
pub enum RelationshipCol {
    Id,
    Source,
    Destination,
    SourceType,
    DestinationType,
    Metadata,
    Lastmodifiedon,
    Lastmodifiedby,
    DeletedTs,
}
