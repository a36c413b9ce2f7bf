//! Helpers for reading structures back out of map values.

use crate::error::{ProtocolError, ProtocolResult};
use rowsync_codec::Value;

pub(crate) fn key(name: &str) -> Value {
    Value::Text(name.to_string())
}

pub(crate) fn text_list(items: &[String]) -> Value {
    Value::Array(items.iter().map(|s| Value::Text(s.clone())).collect())
}

pub(crate) fn field<'a>(map: &'a Value, name: &str) -> ProtocolResult<&'a Value> {
    map.get(name)
        .ok_or_else(|| ProtocolError::invalid_summary(format!("missing field `{name}`")))
}

pub(crate) fn text(map: &Value, name: &str) -> ProtocolResult<String> {
    field(map, name)?
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::invalid_summary(format!("field `{name}` is not text")))
}

pub(crate) fn opt_text(map: &Value, name: &str) -> ProtocolResult<Option<String>> {
    match map.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Text(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ProtocolError::invalid_summary(format!(
            "field `{name}` has type {}",
            other.type_name()
        ))),
    }
}

pub(crate) fn unsigned(map: &Value, name: &str) -> ProtocolResult<u64> {
    field(map, name)?
        .as_integer()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| {
            ProtocolError::invalid_summary(format!("field `{name}` is not an unsigned integer"))
        })
}

pub(crate) fn boolean(map: &Value, name: &str) -> ProtocolResult<bool> {
    field(map, name)?
        .as_bool()
        .ok_or_else(|| ProtocolError::invalid_summary(format!("field `{name}` is not a bool")))
}

pub(crate) fn array<'a>(map: &'a Value, name: &str) -> ProtocolResult<&'a [Value]> {
    field(map, name)?
        .as_array()
        .ok_or_else(|| ProtocolError::invalid_summary(format!("field `{name}` is not an array")))
}

pub(crate) fn strings(map: &Value, name: &str) -> ProtocolResult<Vec<String>> {
    array(map, name)?
        .iter()
        .map(|v| {
            v.as_text().map(str::to_string).ok_or_else(|| {
                ProtocolError::invalid_summary(format!("field `{name}` holds a non-text item"))
            })
        })
        .collect()
}
