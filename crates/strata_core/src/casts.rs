use crate::Value;

/// Attribute cast declared on a model class.
///
/// Reads coerce toward the declared type; writes apply the storage form
/// (JSON encode for `Json`). `Null` passes through both ways, and a value
/// that cannot be coerced is returned unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    Int,
    Float,
    String,
    Bool,
    Json,
    Date,
    DateTime,
}

impl CastKind {
    /// Parse the cast-table names (`int|integer`, `float|double|real`,
    /// `string`, `bool|boolean`, `object|array|json`, `date`, `datetime`).
    pub fn parse(name: &str) -> Option<CastKind> {
        match name {
            "int" | "integer" => Some(CastKind::Int),
            "float" | "double" | "real" => Some(CastKind::Float),
            "string" => Some(CastKind::String),
            "bool" | "boolean" => Some(CastKind::Bool),
            "object" | "array" | "json" => Some(CastKind::Json),
            "date" => Some(CastKind::Date),
            "datetime" | "timestamp" => Some(CastKind::DateTime),
            _ => None,
        }
    }

    /// Read-path coercion.
    pub fn cast_get(&self, value: &Value) -> Value {
        if value.is_null() {
            return Value::Null;
        }

        match self {
            CastKind::Int => value.as_i64().map(Value::Int).unwrap_or_else(|| value.clone()),
            CastKind::Float => value
                .as_f64()
                .map(Value::Float)
                .unwrap_or_else(|| value.clone()),
            CastKind::String => match value {
                Value::Text(_) => value.clone(),
                other => Value::Text(other.display()),
            },
            CastKind::Bool => value
                .as_bool()
                .map(Value::Bool)
                .unwrap_or_else(|| value.clone()),
            CastKind::Json => match value {
                Value::Json(raw) | Value::Text(raw) => serde_json::from_str(raw)
                    .map(|parsed: serde_json::Value| Value::from_json(&parsed))
                    .unwrap_or_else(|_| value.clone()),
                other => other.clone(),
            },
            CastKind::Date => match value {
                Value::Date(_) => value.clone(),
                Value::DateTime(dt) => Value::Date(dt.date_naive()),
                Value::Text(s) => Value::parse_datetime(s)
                    .map(|dt| Value::Date(dt.date_naive()))
                    .unwrap_or_else(|| value.clone()),
                other => other.clone(),
            },
            CastKind::DateTime => match value {
                Value::DateTime(_) => value.clone(),
                Value::Text(s) => Value::parse_datetime(s)
                    .map(Value::DateTime)
                    .unwrap_or_else(|| value.clone()),
                Value::Int(epoch) => chrono::DateTime::from_timestamp(*epoch, 0)
                    .map(Value::DateTime)
                    .unwrap_or_else(|| value.clone()),
                other => other.clone(),
            },
        }
    }

    /// Write-path coercion before the value lands in the attribute map.
    pub fn cast_set(&self, value: &Value) -> Value {
        if value.is_null() {
            return Value::Null;
        }

        match self {
            // JSON encode unless the value already is a string form.
            CastKind::Json => match value {
                Value::Json(_) | Value::Text(_) => value.clone(),
                other => Value::Json(other.to_json().to_string()),
            },
            _ => self.cast_get(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cast_table_names() {
        assert_eq!(CastKind::parse("integer"), Some(CastKind::Int));
        assert_eq!(CastKind::parse("double"), Some(CastKind::Float));
        assert_eq!(CastKind::parse("object"), Some(CastKind::Json));
        assert_eq!(CastKind::parse("uuid"), None);
    }

    #[test]
    fn int_cast_parses_strings() {
        assert_eq!(
            CastKind::Int.cast_get(&Value::Text("42".to_string())),
            Value::Int(42)
        );
    }

    #[test]
    fn bool_cast_accepts_truthy_forms() {
        assert_eq!(CastKind::Bool.cast_get(&Value::Int(1)), Value::Bool(true));
        assert_eq!(
            CastKind::Bool.cast_get(&Value::Text("false".to_string())),
            Value::Bool(false)
        );
    }

    #[test]
    fn json_cast_round_trips_arrays() {
        let stored = CastKind::Json.cast_set(&Value::Array(vec![Value::Int(1), Value::Int(2)]));
        assert_eq!(stored, Value::Json("[1,2]".to_string()));

        let read = CastKind::Json.cast_get(&stored);
        assert_eq!(read, Value::Array(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn null_passes_through() {
        assert_eq!(CastKind::Int.cast_get(&Value::Null), Value::Null);
        assert_eq!(CastKind::Json.cast_set(&Value::Null), Value::Null);
    }

    #[test]
    fn datetime_cast_parses_iso_strings() {
        let value = CastKind::DateTime.cast_get(&Value::Text("2024-03-01T10:30:00Z".to_string()));
        assert!(matches!(value, Value::DateTime(_)));
    }
}
