use serde::{Deserialize, Serialize};

use crate::{ChronicleError, ChronicleResult};

/// Storage column family an indexed scalar lands in.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    String,
    Long,
    Double,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    String,
    Long,
    Double,
    Boolean,
    Urn,
    Record { fields: Vec<FieldDef> },
    Array { items: Box<FieldType> },
}

impl FieldType {
    pub fn record(fields: Vec<FieldDef>) -> Self {
        FieldType::Record { fields }
    }

    pub fn array(items: FieldType) -> Self {
        FieldType::Array {
            items: Box::new(items),
        }
    }

    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            FieldType::String | FieldType::Boolean | FieldType::Urn => Some(ScalarKind::String),
            FieldType::Long => Some(ScalarKind::Long),
            FieldType::Double => Some(ScalarKind::Double),
            FieldType::Record { .. } | FieldType::Array { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub optional: bool,
}

impl FieldDef {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            optional: false,
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            optional: true,
        }
    }
}

/// Structural schema of one aspect type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub fields: Vec<FieldDef>,
}

/// Result of walking a schema along a path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResolvedPath {
    pub kind: ScalarKind,
    /// True when an array was crossed on the way, so one record can yield several values.
    pub fans_out: bool,
}

impl RecordSchema {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    /// Resolves a JSON-pointer-like path (`/a/b`) to the scalar kind stored at its end.
    ///
    /// Arrays of scalars resolve to their item kind. Arrays of records are rejected.
    pub fn resolve(&self, path: &str) -> ChronicleResult<ResolvedPath> {
        let segments = path_segments(path)?;
        let mut fields = &self.fields;
        let mut fans_out = false;
        let last = segments.len() - 1;
        for (position, segment) in segments.iter().enumerate() {
            let field = fields
                .iter()
                .find(|field| field.name == *segment)
                .ok_or_else(|| {
                    ChronicleError::invalid(format!("path '{path}' not found in aspect schema"))
                })?;
            let mut field_type = &field.field_type;
            if let FieldType::Array { items } = field_type {
                if matches!(items.as_ref(), FieldType::Record { .. } | FieldType::Array { .. }) {
                    return Err(ChronicleError::invalid(format!(
                        "path '{path}' crosses an array of records, which is not supported"
                    )));
                }
                fans_out = true;
                field_type = items.as_ref();
            }
            match field_type {
                FieldType::Record { fields: nested } if position < last => {
                    fields = nested;
                }
                FieldType::Record { .. } => {
                    return Err(ChronicleError::invalid(format!(
                        "path '{path}' ends on a record, not a scalar"
                    )));
                }
                scalar if position == last => {
                    let kind = scalar.scalar_kind().ok_or_else(|| {
                        ChronicleError::invalid(format!("path '{path}' is not a scalar"))
                    })?;
                    return Ok(ResolvedPath { kind, fans_out });
                }
                _ => {
                    return Err(ChronicleError::invalid(format!(
                        "path '{path}' descends into a scalar field"
                    )));
                }
            }
        }
        Err(ChronicleError::invalid(format!("path '{path}' is empty")))
    }
}

pub fn path_segments(path: &str) -> ChronicleResult<Vec<&str>> {
    let trimmed = path
        .strip_prefix('/')
        .ok_or_else(|| ChronicleError::invalid(format!("path '{path}' must start with '/'")))?;
    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(ChronicleError::invalid(format!(
            "path '{path}' has an empty segment"
        )));
    }
    Ok(segments)
}
