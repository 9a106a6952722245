use crate::error::EngineError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;

/// Identifier assigned by the collection's key generator on insert.
pub type RecordId = i64;

/// Field holding the identifier when a record is viewed as a flat object.
pub const ID_FIELD: &str = "id";

/// A stored record: the assigned id plus the caller's fields.
///
/// Serialises as one flat JSON object, `{"id": 1, "title": "a", ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: RecordId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// A caller field by name. The id is not a field: `get("id")` is always
    /// `None`, read [`Record::id`] instead.
    pub fn get(&self, field: &str) -> Option<&Value> {
        if field == ID_FIELD {
            return None;
        }
        self.fields.get(field)
    }

    /// Decode the record (id included) into a typed model.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }
}

/// Raw row in `records`.
#[derive(Debug, Clone, FromRow)]
pub struct DbRecordRow {
    pub id: i64,
    pub body: String,
}

impl TryFrom<DbRecordRow> for Record {
    type Error = EngineError;

    fn try_from(row: DbRecordRow) -> Result<Self, Self::Error> {
        let fields: Map<String, Value> = serde_json::from_str(&row.body)?;
        Ok(Record { id: row.id, fields })
    }
}

/// Serialise a caller value into the stored body.
///
/// The value must be a JSON object and must not carry its own id; a null id
/// (e.g. an unset `Option`) is dropped.
pub fn to_body<T: Serialize + ?Sized>(value: &T) -> Result<Map<String, Value>, EngineError> {
    let mut fields = match serde_json::to_value(value)? {
        Value::Object(map) => map,
        other => {
            return Err(EngineError::Constraint(format!(
                "record must be an object, got {}",
                value_kind(&other)
            )));
        }
    };
    match fields.remove(ID_FIELD) {
        None | Some(Value::Null) => Ok(fields),
        Some(_) => Err(EngineError::Constraint(
            "record already carries an id; ids are assigned on insert".to_string(),
        )),
    }
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_serialises_flat() {
        let mut fields = Map::new();
        fields.insert("title".into(), json!("a"));
        let rec = Record { id: 7, fields };
        assert_eq!(serde_json::to_value(&rec).unwrap(), json!({"id": 7, "title": "a"}));
    }

    #[test]
    fn to_body_rejects_non_objects() {
        let err = to_body(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, EngineError::Constraint(msg) if msg.contains("an array")));
    }

    #[test]
    fn to_body_rejects_caller_id_but_drops_null() {
        assert!(matches!(
            to_body(&json!({"id": 3, "title": "x"})),
            Err(EngineError::Constraint(_))
        ));
        let body = to_body(&json!({"id": null, "title": "x"})).unwrap();
        assert_eq!(body.get("title"), Some(&json!("x")));
        assert!(!body.contains_key("id"));
    }

    #[test]
    fn row_decodes_into_record() {
        let row = DbRecordRow {
            id: 2,
            body: r#"{"name":"ana","age":30}"#.to_string(),
        };
        let rec = Record::try_from(row).unwrap();
        assert_eq!(rec.id, 2);
        assert_eq!(rec.get("age"), Some(&json!(30)));
        assert_eq!(rec.get("id"), None);
    }
}
