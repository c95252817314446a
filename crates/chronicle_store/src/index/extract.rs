use serde_json::Value as JsonValue;

use chronicle_core::{path_segments, AspectSpec, EntityTypeSpec, ScalarKind, Urn};

/// Typed value of one `metadata_index` row.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum IndexCell {
    Long(i64),
    Double(f64),
    String(String),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct IndexRow {
    pub path: String,
    pub cell: IndexCell,
}

/// Rows for every indexed path of `aspect` found in `data`. Arrays fan out to one row
/// per element; values that do not match the declared kind are skipped with a warning.
pub(crate) fn aspect_rows(aspect: &AspectSpec, data: &JsonValue) -> Vec<IndexRow> {
    let mut rows = Vec::new();
    for path in &aspect.indexed_paths {
        let kind = match aspect.schema.resolve(path) {
            Ok(resolved) => resolved.kind,
            Err(err) => {
                log::warn!("skipping index path {path} of {}: {err}", aspect.name);
                continue;
            }
        };
        let Ok(segments) = path_segments(path) else {
            continue;
        };
        let mut leaves = Vec::new();
        collect_leaves(data, &segments, &mut leaves);
        for leaf in leaves {
            match coerce(leaf, kind) {
                Some(cell) => rows.push(IndexRow {
                    path: path.clone(),
                    cell,
                }),
                None if leaf.is_null() => {}
                None => log::warn!(
                    "value at {path} of {} does not match its declared {kind:?} type",
                    aspect.name
                ),
            }
        }
    }
    rows
}

/// Rows for the urn's own key fields, stored under the `urn.<entityType>` pseudo aspect.
pub(crate) fn urn_rows(entity: &EntityTypeSpec, urn: &Urn) -> Vec<IndexRow> {
    let mut rows = Vec::new();
    for (index, field) in entity.key_fields.iter().enumerate() {
        let Some(part) = urn.part(index) else {
            continue;
        };
        let cell = match field.kind {
            ScalarKind::String => Some(IndexCell::String(part.to_string())),
            ScalarKind::Long => part.parse().ok().map(IndexCell::Long),
            ScalarKind::Double => part.parse().ok().map(IndexCell::Double),
        };
        match cell {
            Some(cell) => rows.push(IndexRow {
                path: format!("/{}", field.name),
                cell,
            }),
            None => log::warn!(
                "key field {} of {urn} does not match its declared {:?} type",
                field.name,
                field.kind
            ),
        }
    }
    rows
}

fn collect_leaves<'a>(value: &'a JsonValue, segments: &[&str], out: &mut Vec<&'a JsonValue>) {
    if let JsonValue::Array(items) = value {
        for item in items {
            collect_leaves(item, segments, out);
        }
        return;
    }
    match segments.split_first() {
        None => out.push(value),
        Some((head, rest)) => {
            if let Some(child) = value.get(*head) {
                collect_leaves(child, rest, out);
            }
        }
    }
}

fn coerce(value: &JsonValue, kind: ScalarKind) -> Option<IndexCell> {
    match (kind, value) {
        (ScalarKind::String, JsonValue::String(text)) => Some(IndexCell::String(text.clone())),
        (ScalarKind::String, JsonValue::Bool(flag)) => Some(IndexCell::String(flag.to_string())),
        (ScalarKind::Long, JsonValue::Number(number)) => number.as_i64().map(IndexCell::Long),
        (ScalarKind::Double, JsonValue::Number(number)) => number.as_f64().map(IndexCell::Double),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::{FieldDef, FieldType, RecordSchema};
    use serde_json::json;

    fn profile() -> AspectSpec {
        AspectSpec::new(
            "profile",
            RecordSchema::new(vec![
                FieldDef::required("name", FieldType::String),
                FieldDef::optional("age", FieldType::Long),
                FieldDef::optional("active", FieldType::Boolean),
                FieldDef::optional("tags", FieldType::array(FieldType::String)),
                FieldDef::optional(
                    "address",
                    FieldType::record(vec![FieldDef::optional("zip", FieldType::String)]),
                ),
            ]),
        )
        .indexed("/name")
        .indexed("/age")
        .indexed("/active")
        .indexed("/tags")
        .indexed("/address/zip")
    }

    #[test]
    fn arrays_fan_out_and_booleans_become_strings() {
        let rows = aspect_rows(
            &profile(),
            &json!({
                "name": "ada",
                "age": 36,
                "active": true,
                "tags": ["a", "b"],
                "address": {"zip": "0110"}
            }),
        );
        let tags: Vec<_> = rows.iter().filter(|row| row.path == "/tags").collect();
        assert_eq!(tags.len(), 2);
        assert!(rows.contains(&IndexRow {
            path: "/active".to_string(),
            cell: IndexCell::String("true".to_string()),
        }));
        assert!(rows.contains(&IndexRow {
            path: "/age".to_string(),
            cell: IndexCell::Long(36),
        }));
        assert!(rows.contains(&IndexRow {
            path: "/address/zip".to_string(),
            cell: IndexCell::String("0110".to_string()),
        }));
    }

    #[test]
    fn mismatched_and_missing_values_are_skipped() {
        let rows = aspect_rows(&profile(), &json!({"name": "ada", "age": "old"}));
        assert_eq!(
            rows,
            vec![IndexRow {
                path: "/name".to_string(),
                cell: IndexCell::String("ada".to_string()),
            }]
        );
    }

    #[test]
    fn urn_parts_are_typed_by_key_field() {
        let entity = EntityTypeSpec::new("foo")
            .key_field("id", ScalarKind::Long)
            .key_field("env", ScalarKind::String);
        let urn = Urn::new("foo", vec!["42".into(), "prod".into()]).expect("urn");
        let rows = urn_rows(&entity, &urn);
        assert_eq!(
            rows,
            vec![
                IndexRow {
                    path: "/id".to_string(),
                    cell: IndexCell::Long(42),
                },
                IndexRow {
                    path: "/env".to_string(),
                    cell: IndexCell::String("prod".to_string()),
                },
            ]
        );
    }
}
