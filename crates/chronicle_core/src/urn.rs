use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{ChronicleError, ChronicleResult};

pub const DEFAULT_NAMESPACE: &str = "li";

/// Entity identifier of the form `urn:<namespace>:<entityType>:<key>`.
///
/// The key is either a single part or a parenthesised tuple whose parts may be nested
/// urns. Equality, ordering and hashing follow the canonical string form.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Urn {
    namespace: String,
    entity_type: String,
    parts: Vec<String>,
}

impl Urn {
    pub fn new(entity_type: impl Into<String>, parts: Vec<String>) -> ChronicleResult<Self> {
        Self::with_namespace(DEFAULT_NAMESPACE, entity_type, parts)
    }

    pub fn with_namespace(
        namespace: impl Into<String>,
        entity_type: impl Into<String>,
        parts: Vec<String>,
    ) -> ChronicleResult<Self> {
        let namespace = namespace.into();
        let entity_type = entity_type.into();
        if namespace.is_empty() || namespace.contains(':') {
            return Err(ChronicleError::invalid(format!(
                "invalid urn namespace '{namespace}'"
            )));
        }
        if entity_type.is_empty() || entity_type.contains(':') {
            return Err(ChronicleError::invalid(format!(
                "invalid urn entity type '{entity_type}'"
            )));
        }
        if parts.is_empty() || parts.iter().any(|part| part.is_empty()) {
            return Err(ChronicleError::invalid("urn key parts must not be empty"));
        }
        Ok(Self {
            namespace,
            entity_type,
            parts,
        })
    }

    /// Single-part urn in the default namespace, e.g. `urn:li:corpuser:jdoe`.
    pub fn simple(entity_type: impl Into<String>, id: impl Into<String>) -> ChronicleResult<Self> {
        Self::new(entity_type, vec![id.into()])
    }

    pub fn unknown_actor() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            entity_type: "corpuser".to_string(),
            parts: vec!["unknown".to_string()],
        }
    }

    pub fn parse(value: &str) -> ChronicleResult<Self> {
        let invalid = || ChronicleError::invalid(format!("malformed urn '{value}'"));
        let rest = value.strip_prefix("urn:").ok_or_else(invalid)?;
        let (namespace, rest) = rest.split_once(':').ok_or_else(invalid)?;
        let (entity_type, key) = rest.split_once(':').ok_or_else(invalid)?;
        let parts = if key.starts_with('(') && key.ends_with(')') && key.len() >= 2 {
            let parts = split_tuple(&key[1..key.len() - 1]).ok_or_else(invalid)?;
            // A one-part tuple would print back without its parentheses.
            if parts.len() < 2 {
                return Err(invalid());
            }
            parts
        } else {
            if key.is_empty() {
                return Err(invalid());
            }
            vec![key.to_string()]
        };
        Self::with_namespace(namespace, entity_type, parts)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn part(&self, index: usize) -> Option<&str> {
        self.parts.get(index).map(String::as_str)
    }

    pub fn entity_key(&self) -> String {
        if self.parts.len() == 1 {
            self.parts[0].clone()
        } else {
            format!("({})", self.parts.join(","))
        }
    }
}

/// Splits `a,(b,c),urn:li:x:(d,e)` on top-level commas.
fn split_tuple(body: &str) -> Option<Vec<String>> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in body.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if depth != 0 {
        return None;
    }
    parts.push(current);
    if parts.iter().any(|part| part.is_empty()) {
        return None;
    }
    Some(parts)
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "urn:{}:{}:{}",
            self.namespace,
            self.entity_type,
            self.entity_key()
        )
    }
}

impl FromStr for Urn {
    type Err = ChronicleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Urn::parse(value)
    }
}

impl Ord for Urn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl PartialOrd for Urn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Urn {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Urn {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Urn::parse(&value).map_err(serde::de::Error::custom)
    }
}
