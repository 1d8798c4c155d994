//! Enrolled identities and the adapters that normalize backend rows into
//! them. The matcher only ever sees [`EnrolledIdentity`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EmbeddingError, SourceError};
use crate::Embedding;

pub type IdentityId = u64;

/// Display attributes carried alongside an enrolled vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub first_name: String,
    pub last_name: String,
    pub code: Option<String>,
    pub email: Option<String>,
    /// Identity is on a watch list; surfaced to the caller with a match.
    pub watchlisted: bool,
    pub metadata: BTreeMap<String, String>,
}

impl Profile {
    pub fn display_name(&self) -> String {
        match (self.first_name.is_empty(), self.last_name.is_empty()) {
            (false, false) => format!("{} {}", self.first_name, self.last_name),
            (false, true) => self.first_name.clone(),
            (true, false) => self.last_name.clone(),
            (true, true) => String::new(),
        }
    }
}

/// A row as handed over by a registry backend: profile plus raw vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub id: IdentityId,
    pub profile: Profile,
    pub encoding: Vec<f32>,
}

/// Immutable once loaded into a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    pub id: IdentityId,
    pub profile: Profile,
    pub embedding: Embedding,
}

impl EnrolledIdentity {
    pub fn new(id: IdentityId, profile: Profile, embedding: Embedding) -> Self {
        Self {
            id,
            profile,
            embedding,
        }
    }

    pub fn dim(&self) -> usize {
        self.embedding.dim()
    }
}

impl TryFrom<RegistryRecord> for EnrolledIdentity {
    type Error = EmbeddingError;

    fn try_from(record: RegistryRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record.id,
            profile: record.profile,
            embedding: Embedding::new(record.encoding)?,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EncodingField {
    List(Vec<f32>),
    // SQL backends keep the vector as JSON text in a column
    Text(String),
}

#[derive(Deserialize)]
struct JsonRow {
    #[serde(default)]
    id: Option<IdentityId>,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    watchlisted: bool,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    encoding: Option<EncodingField>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

fn default_active() -> bool {
    true
}

/// A JSON identity document before any filtering. `id` is absent in
/// enrollment manifests, where the store assigns one.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonIdentity {
    pub id: Option<IdentityId>,
    pub profile: Profile,
    pub active: bool,
    /// `None` when the document carries no usable vector.
    pub encoding: Option<Vec<f32>>,
}

pub fn parse_json(doc: &Value) -> Result<JsonIdentity, SourceError> {
    let row = JsonRow::deserialize(doc).map_err(|e| SourceError::Decode(e.to_string()))?;
    let label = row
        .id
        .map(|id| id.to_string())
        .or_else(|| row.code.clone())
        .unwrap_or_else(|| "?".to_string());
    let encoding = match row.encoding {
        None => None,
        Some(EncodingField::List(v)) => Some(v),
        Some(EncodingField::Text(text)) => {
            if text.trim().is_empty() || text.trim() == "null" {
                None
            } else {
                Some(serde_json::from_str::<Vec<f32>>(&text).map_err(|e| {
                    SourceError::Decode(format!("identity {}: encoding text: {}", label, e))
                })?)
            }
        }
    };

    let metadata = row
        .extra
        .into_iter()
        .filter_map(|(k, v)| match v {
            Value::Null => None,
            Value::String(s) => Some((k, s)),
            other => Some((k, other.to_string())),
        })
        .collect();

    Ok(JsonIdentity {
        id: row.id,
        profile: Profile {
            first_name: row.first_name,
            last_name: row.last_name,
            code: row.code,
            email: row.email,
            watchlisted: row.watchlisted,
            metadata,
        },
        active: row.active,
        encoding: encoding.filter(|v| !v.is_empty()),
    })
}

/// Normalize a JSON document (REST response or key-value store entry).
///
/// Returns `Ok(None)` for rows that must not reach the cache: inactive
/// identities and rows without a vector.
pub fn from_json(doc: &Value) -> Result<Option<RegistryRecord>, SourceError> {
    let parsed = parse_json(doc)?;
    let id = parsed
        .id
        .ok_or_else(|| SourceError::Decode("identity document without `id`".into()))?;
    if !parsed.active {
        return Ok(None);
    }
    Ok(parsed.encoding.map(|encoding| RegistryRecord {
        id,
        profile: parsed.profile,
        encoding,
    }))
}

/// Normalize a JSON array of documents, dropping filtered rows.
pub fn from_json_list(docs: &Value) -> Result<Vec<RegistryRecord>, SourceError> {
    let items = docs
        .as_array()
        .ok_or_else(|| SourceError::Decode("expected a JSON array of identities".into()))?;
    let mut out = Vec::with_capacity(items.len());
    for doc in items {
        if let Some(record) = from_json(doc)? {
            out.push(record);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_list_encoding() {
        let doc = json!({
            "id": 7,
            "first_name": "Ana",
            "last_name": "Quispe",
            "code": "A-7",
            "watchlisted": true,
            "encoding": [0.1, 0.2, 0.3],
            "campus": "north",
            "year": 3,
            "notes": null
        });
        let record = from_json(&doc).unwrap().unwrap();
        assert_eq!(record.id, 7);
        assert_eq!(record.encoding, vec![0.1, 0.2, 0.3]);
        assert!(record.profile.watchlisted);
        assert_eq!(record.profile.display_name(), "Ana Quispe");
        assert_eq!(record.profile.metadata.get("campus").unwrap(), "north");
        assert_eq!(record.profile.metadata.get("year").unwrap(), "3");
        assert!(!record.profile.metadata.contains_key("notes"));
    }

    #[test]
    fn test_from_json_text_encoding() {
        let doc = json!({ "id": 1, "encoding": "[1.0, 0.0]" });
        let record = from_json(&doc).unwrap().unwrap();
        assert_eq!(record.encoding, vec![1.0, 0.0]);
    }

    #[test]
    fn test_from_json_filters_rows() {
        assert!(from_json(&json!({ "id": 1 })).unwrap().is_none());
        assert!(from_json(&json!({ "id": 2, "encoding": null })).unwrap().is_none());
        assert!(from_json(&json!({ "id": 3, "encoding": [] })).unwrap().is_none());
        assert!(from_json(&json!({ "id": 4, "encoding": [1.0], "active": false }))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_from_json_missing_id_is_error() {
        assert!(matches!(
            from_json(&json!({ "encoding": [1.0] })),
            Err(SourceError::Decode(_))
        ));
    }

    #[test]
    fn test_parse_json_without_id() {
        let parsed = parse_json(&json!({
            "first_name": "Ana",
            "code": "A-1",
            "encoding": "[0.5, 0.5]"
        }))
        .unwrap();
        assert_eq!(parsed.id, None);
        assert!(parsed.active);
        assert_eq!(parsed.profile.code.as_deref(), Some("A-1"));
        assert_eq!(parsed.encoding, Some(vec![0.5, 0.5]));

        let bad = parse_json(&json!({ "code": "B-2", "encoding": "[0.5," }));
        match bad {
            Err(SourceError::Decode(msg)) => assert!(msg.contains("B-2"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_from_json_list() {
        let docs = json!([
            { "id": 1, "encoding": [1.0, 0.0] },
            { "id": 2 },
            { "id": 3, "encoding": [0.0, 1.0] }
        ]);
        let ids: Vec<_> = from_json_list(&docs).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(from_json_list(&json!({})).is_err());
    }

    #[test]
    fn test_record_conversion_validates_vector() {
        let record = RegistryRecord {
            id: 1,
            profile: Profile::default(),
            encoding: vec![0.0, 0.0],
        };
        assert_eq!(
            EnrolledIdentity::try_from(record),
            Err(EmbeddingError::ZeroNorm)
        );
    }
}
