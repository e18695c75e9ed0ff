//! Parameter marshaling
//!
//! Turns the spec's ordered `(name, value)` pairs into bound parameters.
//! Values stay native unless the parameter is JSON-forced, either because
//! its value is already a JSON document or because its name matches the
//! JSON-hint predicate carried by the gateway.

use std::sync::Arc;

use crate::db::SqlValue;
use crate::error::{GatewayError, GatewayResult};

/// Decides whether a parameter name marks a JSON-typed argument.
pub type JsonHintPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Name fragments that mark JSON-typed arguments in the routine catalog's
/// naming convention.
const JSON_HINT_FRAGMENTS: [&str; 4] = ["json", "payload", "points", "data"];

/// Default hint: case-insensitive substring match against the known
/// JSON-argument naming fragments.
pub fn default_json_hint(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    JSON_HINT_FRAGMENTS
        .iter()
        .any(|fragment| lowered.contains(fragment))
}

/// One marshaled parameter. `json` selects the `::jsonb` transport cast in
/// the built command; position in the vector defines the placeholder number.
#[derive(Debug, Clone)]
pub(crate) struct BoundParam {
    pub(crate) name: String,
    pub(crate) value: SqlValue,
    pub(crate) json: bool,
}

pub(crate) fn marshal_params(
    params: &[(String, SqlValue)],
    json_hint: &JsonHintPredicate,
) -> GatewayResult<Vec<BoundParam>> {
    let mut bound = Vec::with_capacity(params.len());
    for (name, value) in params {
        bound.push(marshal_one(name, value, json_hint)?);
    }
    Ok(bound)
}

fn marshal_one(
    name: &str,
    value: &SqlValue,
    json_hint: &JsonHintPredicate,
) -> GatewayResult<BoundParam> {
    if value.is_null() {
        return Ok(BoundParam {
            name: name.to_string(),
            value: SqlValue::Null,
            json: false,
        });
    }

    if json_hint(name) || matches!(value, SqlValue::Json(_)) {
        let value = match value {
            // Already a document, binds through the jsonb codec directly
            SqlValue::Json(v) => SqlValue::Json(v.clone()),
            // Strings under a hinted name are assumed to hold JSON text
            // already and are bound as-is
            SqlValue::Text(s) => SqlValue::Text(s.clone()),
            other => {
                let rendered = other.to_json();
                if rendered.is_null() {
                    return Err(GatewayError::Marshal {
                        name: name.to_string(),
                        reason: format!("{} value has no JSON representation", other.type_name()),
                    });
                }
                SqlValue::Text(rendered.to_string())
            }
        };
        return Ok(BoundParam {
            name: name.to_string(),
            value,
            json: true,
        });
    }

    // Zoned timestamps normalize to naive UTC before binding
    let value = match value {
        SqlValue::TimestampTz(dt) => SqlValue::Timestamp(dt.naive_utc()),
        other => other.clone(),
    };
    Ok(BoundParam {
        name: name.to_string(),
        value,
        json: false,
    })
}
