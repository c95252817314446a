use serde::{Deserialize, Serialize};

use crate::schema::ScalarKind;
use crate::{ChronicleError, ChronicleResult, Urn};

pub const DEFAULT_MAX_CRITERIA: usize = 10;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
    Equal,
    GreaterThan,
    GreaterThanOrEqualTo,
    LessThan,
    LessThanOrEqualTo,
    In,
    StartWith,
}

/// Comparison operand of a criterion. `Array` is only valid under `Condition::In`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexValue {
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
    Array(Vec<IndexValue>),
}

impl IndexValue {
    pub fn string(value: impl Into<String>) -> Self {
        IndexValue::String(value.into())
    }

    /// Column family the value is compared against. Booleans are stored as strings.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            IndexValue::Boolean(_) | IndexValue::String(_) => Some(ScalarKind::String),
            IndexValue::Long(_) => Some(ScalarKind::Long),
            IndexValue::Double(_) => Some(ScalarKind::Double),
            IndexValue::Array(_) => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, IndexValue::Array(_))
    }

    /// Converts the operand to the declared kind of the path it is compared with.
    /// Longs widen to doubles; doubles narrow to longs only when integral. Anything else
    /// that does not match the declared kind is rejected.
    pub fn coerce_to(&self, kind: ScalarKind) -> ChronicleResult<IndexValue> {
        match (self, kind) {
            (IndexValue::Array(values), _) => values
                .iter()
                .map(|value| value.coerce_to(kind))
                .collect::<ChronicleResult<Vec<_>>>()
                .map(IndexValue::Array),
            (IndexValue::Long(value), ScalarKind::Long) => Ok(IndexValue::Long(*value)),
            (IndexValue::Long(value), ScalarKind::Double) => Ok(IndexValue::Double(*value as f64)),
            (IndexValue::Double(value), ScalarKind::Double) => Ok(IndexValue::Double(*value)),
            (IndexValue::Double(value), ScalarKind::Long)
                if value.fract() == 0.0 && value.abs() < i64::MAX as f64 =>
            {
                Ok(IndexValue::Long(*value as i64))
            }
            (IndexValue::String(_) | IndexValue::Boolean(_), ScalarKind::String) => {
                Ok(self.clone())
            }
            (other, kind) => Err(ChronicleError::invalid(format!(
                "operand {other:?} does not match a {kind:?} path"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexPathParams {
    pub path: String,
    pub value: IndexValue,
    pub condition: Condition,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexCriterion {
    pub aspect_type: String,
    pub path_params: Option<IndexPathParams>,
}

impl IndexCriterion {
    /// Matches every urn that has the aspect, whatever its values.
    pub fn has_aspect(aspect_type: impl Into<String>) -> Self {
        Self {
            aspect_type: aspect_type.into(),
            path_params: None,
        }
    }

    pub fn path(
        aspect_type: impl Into<String>,
        path: impl Into<String>,
        condition: Condition,
        value: IndexValue,
    ) -> Self {
        Self {
            aspect_type: aspect_type.into(),
            path_params: Some(IndexPathParams {
                path: path.into(),
                value,
                condition,
            }),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexFilter {
    pub criteria: Vec<IndexCriterion>,
}

impl IndexFilter {
    pub fn new(criteria: Vec<IndexCriterion>) -> Self {
        Self { criteria }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexSortCriterion {
    pub aspect_type: String,
    pub path: String,
    pub order: SortOrder,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexGroupByCriterion {
    pub aspect_type: String,
    pub path: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PageRequest {
    Cursor {
        last_urn: Option<Urn>,
        page_size: u64,
    },
    Offset {
        start: u64,
        page_size: u64,
    },
}

impl PageRequest {
    pub fn cursor(last_urn: Option<Urn>, page_size: u64) -> Self {
        PageRequest::Cursor {
            last_urn,
            page_size,
        }
    }

    pub fn offset(start: u64, page_size: u64) -> Self {
        PageRequest::Offset { start, page_size }
    }

    pub fn page_size(&self) -> u64 {
        match self {
            PageRequest::Cursor { page_size, .. } | PageRequest::Offset { page_size, .. } => {
                *page_size
            }
        }
    }

    pub fn validate(&self) -> ChronicleResult<()> {
        if self.page_size() == 0 {
            return Err(ChronicleError::invalid("page size must be positive"));
        }
        Ok(())
    }
}

/// One page of a paginated call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListResult<T> {
    pub values: Vec<T>,
    pub next_start: Option<u64>,
    pub next_cursor: Option<Urn>,
    pub has_more: bool,
    pub total_count: u64,
    pub total_page_count: u64,
    pub page_size: u64,
}

impl<T> ListResult<T> {
    pub fn empty(page_size: u64) -> Self {
        Self {
            values: Vec::new(),
            next_start: None,
            next_cursor: None,
            has_more: false,
            total_count: 0,
            total_page_count: 0,
            page_size,
        }
    }

    /// Offset-mode page metadata.
    pub fn from_offset(values: Vec<T>, start: u64, page_size: u64, total_count: u64) -> Self {
        let end = start + values.len() as u64;
        let has_more = end < total_count;
        Self {
            values,
            next_start: has_more.then_some(end),
            next_cursor: None,
            has_more,
            total_count,
            total_page_count: page_count(total_count, page_size),
            page_size,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ListResult<U> {
        ListResult {
            values: self.values.into_iter().map(f).collect(),
            next_start: self.next_start,
            next_cursor: self.next_cursor,
            has_more: self.has_more,
            total_count: self.total_count,
            total_page_count: self.total_page_count,
            page_size: self.page_size,
        }
    }
}

pub fn page_count(total: u64, page_size: u64) -> u64 {
    if page_size == 0 {
        0
    } else {
        total.div_ceil(page_size)
    }
}

impl IndexFilter {
    /// Rejects shapes the query builder cannot express, before any I/O.
    pub fn validate(&self, max_criteria: usize) -> ChronicleResult<()> {
        if self.criteria.is_empty() {
            return Err(ChronicleError::invalid("index filter has no criteria"));
        }
        if self.criteria.len() > max_criteria {
            return Err(ChronicleError::invalid(format!(
                "index filter has {} criteria, at most {max_criteria} are allowed",
                self.criteria.len()
            )));
        }
        for criterion in &self.criteria {
            if criterion.aspect_type.is_empty() {
                return Err(ChronicleError::invalid("criterion aspect type is empty"));
            }
            if let Some(params) = &criterion.path_params {
                validate_condition(params.condition, &params.value, true)?;
            }
        }
        Ok(())
    }
}

/// Shared operand checks for index and relationship criteria.
pub fn validate_condition(
    condition: Condition,
    value: &IndexValue,
    allow_start_with: bool,
) -> ChronicleResult<()> {
    match (condition, value) {
        (Condition::In, IndexValue::Array(values)) => {
            if values.is_empty() {
                return Err(ChronicleError::invalid("IN requires a non-empty value set"));
            }
            let first = values[0].scalar_kind();
            if values
                .iter()
                .any(|value| value.is_array() || value.scalar_kind() != first)
            {
                return Err(ChronicleError::invalid(
                    "IN values must be scalars of a single type",
                ));
            }
            Ok(())
        }
        (Condition::In, _) => Err(ChronicleError::invalid("IN requires an array value")),
        (_, IndexValue::Array(_)) => Err(ChronicleError::invalid(format!(
            "condition {condition:?} does not accept an array value"
        ))),
        (Condition::StartWith, _) if !allow_start_with => Err(ChronicleError::invalid(
            "START_WITH is not supported here",
        )),
        (Condition::StartWith, IndexValue::String(_)) => Ok(()),
        (Condition::StartWith, _) => Err(ChronicleError::invalid(
            "START_WITH requires a string value",
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(condition: Condition, value: IndexValue) -> IndexFilter {
        IndexFilter::new(vec![IndexCriterion::path(
            "profile", "/name", condition, value,
        )])
    }

    #[test]
    fn in_requires_non_empty_array() {
        assert!(filter(Condition::In, IndexValue::Array(vec![]))
            .validate(DEFAULT_MAX_CRITERIA)
            .is_err());
        assert!(filter(Condition::In, IndexValue::string("a"))
            .validate(DEFAULT_MAX_CRITERIA)
            .is_err());
        assert!(filter(
            Condition::In,
            IndexValue::Array(vec![IndexValue::string("a"), IndexValue::string("b")])
        )
        .validate(DEFAULT_MAX_CRITERIA)
        .is_ok());
        assert!(filter(
            Condition::In,
            IndexValue::Array(vec![IndexValue::string("a"), IndexValue::Long(1)])
        )
        .validate(DEFAULT_MAX_CRITERIA)
        .is_err());
    }

    #[test]
    fn arrays_are_rejected_outside_in() {
        assert!(filter(Condition::Equal, IndexValue::Array(vec![IndexValue::Long(1)]))
            .validate(DEFAULT_MAX_CRITERIA)
            .is_err());
    }

    #[test]
    fn start_with_requires_string() {
        assert!(filter(Condition::StartWith, IndexValue::Long(3))
            .validate(DEFAULT_MAX_CRITERIA)
            .is_err());
        assert!(filter(Condition::StartWith, IndexValue::string("ab"))
            .validate(DEFAULT_MAX_CRITERIA)
            .is_ok());
    }

    #[test]
    fn criteria_count_is_bounded() {
        assert!(IndexFilter::default().validate(DEFAULT_MAX_CRITERIA).is_err());
        let many = IndexFilter::new(
            (0..11)
                .map(|_| IndexCriterion::has_aspect("profile"))
                .collect(),
        );
        assert!(many.validate(DEFAULT_MAX_CRITERIA).is_err());
    }

    #[test]
    fn offset_metadata_matches_totals() {
        let page = ListResult::from_offset(vec![5, 6, 7, 8, 9], 5, 5, 25);
        assert_eq!(page.next_start, Some(10));
        assert!(page.has_more);
        assert_eq!(page.total_count, 25);
        assert_eq!(page.total_page_count, 5);
        let last = ListResult::from_offset(vec![20, 21, 22, 23, 24], 20, 5, 25);
        assert_eq!(last.next_start, None);
        assert!(!last.has_more);
    }

    #[test]
    fn operands_follow_the_declared_kind() {
        assert_eq!(
            IndexValue::Long(3).coerce_to(ScalarKind::Double).expect("widen"),
            IndexValue::Double(3.0)
        );
        assert_eq!(
            IndexValue::Double(7.0).coerce_to(ScalarKind::Long).expect("narrow"),
            IndexValue::Long(7)
        );
        assert!(IndexValue::Double(7.5).coerce_to(ScalarKind::Long).is_err());
        assert!(IndexValue::string("7").coerce_to(ScalarKind::Long).is_err());
        assert!(IndexValue::Long(7).coerce_to(ScalarKind::String).is_err());
        assert_eq!(
            IndexValue::Array(vec![IndexValue::Long(1), IndexValue::Long(2)])
                .coerce_to(ScalarKind::Double)
                .expect("list"),
            IndexValue::Array(vec![IndexValue::Double(1.0), IndexValue::Double(2.0)])
        );
    }

    #[test]
    fn index_values_deserialize_untagged() {
        let value: IndexValue = serde_json::from_str("[\"a\", \"b\"]").expect("decode");
        assert!(value.is_array());
        let value: IndexValue = serde_json::from_str("12").expect("decode");
        assert_eq!(value, IndexValue::Long(12));
        let value: IndexValue = serde_json::from_str("1.5").expect("decode");
        assert_eq!(value, IndexValue::Double(1.5));
    }
}
