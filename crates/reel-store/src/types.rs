//! Firestore REST API types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{StoreError, StoreResult};

/// Firestore document value types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String), // Firestore sends integers as strings
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    #[serde(default)]
    pub values: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapValue {
    #[serde(default)]
    pub fields: Option<HashMap<String, Value>>,
}

impl Value {
    /// Convert a JSON value into a Firestore value.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::NullValue(()),
            serde_json::Value::Bool(b) => Value::BooleanValue(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::IntegerValue(i.to_string()),
                None => Value::DoubleValue(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::StringValue(s.clone()),
            serde_json::Value::Array(items) => Value::ArrayValue(ArrayValue {
                values: Some(items.iter().map(Value::from_json).collect()),
            }),
            serde_json::Value::Object(map) => Value::MapValue(MapValue {
                fields: Some(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Value::from_json(v)))
                        .collect(),
                ),
            }),
        }
    }

    /// Convert a Firestore value back into JSON.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::NullValue(_) => serde_json::Value::Null,
            Value::BooleanValue(b) => serde_json::Value::Bool(*b),
            Value::IntegerValue(s) => s
                .parse::<i64>()
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
            Value::DoubleValue(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::TimestampValue(s) | Value::StringValue(s) => serde_json::Value::String(s.clone()),
            Value::ArrayValue(arr) => serde_json::Value::Array(
                arr.values
                    .as_ref()
                    .map(|v| v.iter().map(Value::to_json).collect())
                    .unwrap_or_default(),
            ),
            Value::MapValue(map) => serde_json::Value::Object(
                map.fields
                    .as_ref()
                    .map(|f| f.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
                    .unwrap_or_default(),
            ),
        }
    }
}

/// Firestore document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Full resource name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Document fields
    pub fields: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl Document {
    pub fn new(fields: HashMap<String, Value>) -> Self {
        Self {
            name: None,
            fields: Some(fields),
            create_time: None,
            update_time: None,
        }
    }

    /// Encode a serializable record as document fields.
    pub fn from_record<T: Serialize>(record: &T) -> StoreResult<Self> {
        match serde_json::to_value(record)? {
            serde_json::Value::Object(map) => Ok(Self::new(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            )),
            other => Err(StoreError::InvalidResponse(format!(
                "record must serialize to an object, got {}",
                other
            ))),
        }
    }

    /// Decode document fields into a record.
    pub fn to_record<T: for<'de> Deserialize<'de>>(&self) -> StoreResult<T> {
        let map: serde_json::Map<String, serde_json::Value> = self
            .fields
            .as_ref()
            .map(|f| f.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            .unwrap_or_default();
        Ok(serde_json::from_value(serde_json::Value::Object(map))?)
    }

    /// Last path segment of the resource name.
    pub fn id(&self) -> Option<&str> {
        self.name.as_deref().and_then(|n| n.rsplit('/').next())
    }
}

// ============================================================================
// Commit Types (atomic multi-document writes)
// ============================================================================

/// A single write operation in a commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Write {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<Document>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_mask: Option<DocumentMask>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_document: Option<Precondition>,
}

impl Write {
    /// Overwrite an existing document.
    pub fn update(name: String, mut doc: Document) -> Self {
        doc.name = Some(name);
        Self {
            update: Some(doc),
            update_mask: None,
            current_document: Some(Precondition::exists(true)),
        }
    }

    /// Create the document; fails if it already exists.
    pub fn create(name: String, mut doc: Document) -> Self {
        doc.name = Some(name);
        Self {
            update: Some(doc),
            update_mask: None,
            current_document: Some(Precondition::exists(false)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMask {
    pub field_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Precondition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl Precondition {
    pub fn exists(exists: bool) -> Self {
        Self {
            exists: Some(exists),
            update_time: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    pub writes: Vec<Write>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeginTransactionResponse {
    pub transaction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    #[serde(default)]
    pub write_results: Option<Vec<WriteResult>>,
    #[serde(default)]
    pub commit_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    pub update_time: Option<String>,
}

// ============================================================================
// Query Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    pub structured_query: StructuredQuery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryResponse {
    #[serde(default)]
    pub document: Option<Document>,
    #[serde(default)]
    pub read_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredQuery {
    pub from: Vec<CollectionSelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#where: Option<Filter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i32>,
}

impl StructuredQuery {
    /// `SELECT * FROM collection WHERE field == value`.
    pub fn field_equals(collection: &str, field: &str, value: Value) -> Self {
        Self {
            from: vec![CollectionSelector {
                collection_id: collection.to_string(),
            }],
            r#where: Some(Filter {
                field_filter: FieldFilter {
                    field: FieldReference {
                        field_path: field.to_string(),
                    },
                    op: "EQUAL".to_string(),
                    value,
                },
            }),
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSelector {
    pub collection_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub field_filter: FieldFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: FieldReference,
    pub op: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldReference {
    pub field_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_value_conversion() {
        let original = json!({
            "order": 3,
            "duration_secs": 4.5,
            "is_included": true,
            "parent_scene": null,
            "tags": ["a", "b"],
            "video": {"state": "processing"}
        });
        let value = Value::from_json(&original);
        assert_eq!(value.to_json(), original);
    }

    #[test]
    fn test_integer_encoded_as_string() {
        let wire = serde_json::to_value(Value::from_json(&json!(42))).unwrap();
        assert_eq!(wire, json!({"integerValue": "42"}));
    }

    #[test]
    fn test_create_write_has_exists_precondition() {
        let doc = Document::new(HashMap::new());
        let write = Write::create("projects/p/databases/d/documents/scenes/x".into(), doc);
        let wire = serde_json::to_value(&write).unwrap();
        assert_eq!(wire["currentDocument"]["exists"], json!(false));
    }

    #[test]
    fn test_document_id() {
        let mut doc = Document::new(HashMap::new());
        doc.name = Some("projects/p/databases/(default)/documents/scripts/abc".into());
        assert_eq!(doc.id(), Some("abc"));
    }
}
