use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{ChronicleError, ChronicleResult};

/// Typed aspect record. The canonical type name ties the Rust type to the registry.
pub trait Aspect: Serialize + DeserializeOwned {
    const ASPECT_TYPE: &'static str;
}

/// One facet of an entity: the aspect type tag plus its JSON payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AspectValue {
    pub aspect_type: String,
    pub data: JsonValue,
}

impl AspectValue {
    pub fn new(aspect_type: impl Into<String>, data: JsonValue) -> Self {
        Self {
            aspect_type: aspect_type.into(),
            data,
        }
    }

    pub fn from_aspect<A: Aspect>(aspect: &A) -> ChronicleResult<Self> {
        let data = serde_json::to_value(aspect)
            .map_err(|err| ChronicleError::invalid(format!("serialize aspect: {err}")))?;
        Ok(Self::new(A::ASPECT_TYPE, data))
    }

    pub fn to_aspect<A: Aspect>(&self) -> ChronicleResult<A> {
        if self.aspect_type != A::ASPECT_TYPE {
            return Err(ChronicleError::invalid(format!(
                "aspect type mismatch: stored '{}', requested '{}'",
                self.aspect_type,
                A::ASPECT_TYPE
            )));
        }
        serde_json::from_value(self.data.clone())
            .map_err(|err| ChronicleError::storage(format!("decode aspect: {err}")))
    }

    pub fn to_json_string(&self) -> ChronicleResult<String> {
        serde_json::to_string(&self.data)
            .map_err(|err| ChronicleError::invalid(format!("serialize aspect: {err}")))
    }

    pub fn from_json_str(aspect_type: impl Into<String>, raw: &str) -> ChronicleResult<Self> {
        let data = serde_json::from_str(raw)
            .map_err(|err| ChronicleError::storage(format!("decode aspect payload: {err}")))?;
        Ok(Self::new(aspect_type, data))
    }
}

/// Decides whether a write would change the stored value.
pub trait EqualityTester: Send + Sync {
    fn equals(&self, current: &AspectValue, candidate: &AspectValue) -> bool;
}

/// Deep comparison of the JSON payloads. Object key order is irrelevant.
#[derive(Clone, Copy, Debug, Default)]
pub struct StructuralEquality;

impl EqualityTester for StructuralEquality {
    fn equals(&self, current: &AspectValue, candidate: &AspectValue) -> bool {
        current.aspect_type == candidate.aspect_type && current.data == candidate.data
    }
}
