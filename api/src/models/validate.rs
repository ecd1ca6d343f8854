use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Number, Value};

use super::entity::{EntityMeta, FieldDef, FieldDefault, FieldKind};
use crate::store::{Document, ObjectId};

static EMAIL_PATTERN: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| {
    Regex::new(
        r#"^(([^<>()\[\]\\.,;:\s@"]+(\.[^<>()\[\]\\.,;:\s@"]+)*)|(".+"))@((\[[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\])|(([a-zA-Z\-0-9]+\.)+[a-zA-Z]{2,}))$"#,
    )
});

/// Field name to message, reported as the error description.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Defaults apply and required fields must be present.
    Create,
    /// Only the supplied fields are checked.
    Update,
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn is_email(raw: &str) -> bool {
    match EMAIL_PATTERN.as_ref() {
        Ok(re) => re.is_match(raw),
        Err(e) => {
            tracing::error!("email pattern failed to compile: {}", e);
            false
        }
    }
}

/// Checks `input` against the entity's fields and returns the cleaned document.
/// Fields the entity does not declare are dropped, as is any client supplied `_id`.
pub fn validate(meta: &EntityMeta, mut input: Document, mode: Mode) -> Result<Document, FieldErrors> {
    let mut out = Map::new();
    let mut errors = FieldErrors::new();

    for field in meta.fields {
        match input.remove(field.name) {
            None | Some(Value::Null) if mode == Mode::Create => {
                if let Some(default) = field.default {
                    out.insert(field.name.to_string(), default_value(default));
                } else if field.required {
                    errors.insert(field.name.to_string(), required_message(field));
                }
            }
            None => {}
            Some(Value::Null) => {
                if field.required {
                    errors.insert(field.name.to_string(), required_message(field));
                } else {
                    out.insert(field.name.to_string(), Value::Null);
                }
            }
            Some(value) => match check(field, value) {
                Ok(value) => {
                    out.insert(field.name.to_string(), value);
                }
                Err(message) => {
                    errors.insert(field.name.to_string(), message);
                }
            },
        }
    }

    for ignored in input.keys().filter(|k| k.as_str() != "_id") {
        tracing::debug!(collection = meta.collection, field = %ignored, "dropping undeclared field");
    }

    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

fn required_message(field: &FieldDef) -> String {
    format!("Path `{}` is required.", field.name)
}

fn default_value(default: FieldDefault) -> Value {
    match default {
        FieldDefault::Str(s) => Value::String(s.to_string()),
        FieldDefault::Bool(b) => Value::Bool(b),
        FieldDefault::Now => Value::String(now_timestamp()),
    }
}

fn check(field: &FieldDef, value: Value) -> Result<Value, String> {
    let value = coerce(field, value)?;

    if let Value::String(s) = &value {
        if field.required && s.is_empty() {
            return Err(required_message(field));
        }
        if !field.allowed.is_empty() && !field.allowed.contains(&s.as_str()) {
            return Err(format!(
                "`{}` is not a valid enum value for path `{}`.",
                s, field.name
            ));
        }
        if field.email && !is_email(s) {
            return Err(format!("Path `{}` is invalid ({}).", field.name, s));
        }
    }
    Ok(value)
}

fn cast_error(field: &FieldDef, target: &str, value: &Value) -> String {
    format!(
        "Cast to {} failed for value \"{}\" at path \"{}\"",
        target, value, field.name
    )
}

fn coerce(field: &FieldDef, value: Value) -> Result<Value, String> {
    match field.kind {
        FieldKind::String => match value {
            Value::String(s) if field.trim => Ok(Value::String(s.trim().to_string())),
            Value::String(s) => Ok(Value::String(s)),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(cast_error(field, "String", &other)),
        },
        FieldKind::Number => match value {
            Value::Number(n) => Ok(Value::Number(n)),
            Value::String(s) => match parse_number(s.trim()) {
                Some(n) => Ok(n),
                None => Err(cast_error(field, "Number", &Value::String(s))),
            },
            other => Err(cast_error(field, "Number", &other)),
        },
        FieldKind::Boolean => match value {
            Value::Bool(b) => Ok(Value::Bool(b)),
            Value::String(s) if s == "true" => Ok(Value::Bool(true)),
            Value::String(s) if s == "false" => Ok(Value::Bool(false)),
            other => Err(cast_error(field, "Boolean", &other)),
        },
        FieldKind::Date => parse_date(&value)
            .map(|d| Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true)))
            .ok_or_else(|| cast_error(field, "Date", &value)),
        FieldKind::Ref(_) => object_id(&value).ok_or_else(|| cast_error(field, "ObjectId", &value)),
        FieldKind::RefList(_) => match value {
            Value::Array(items) => items
                .iter()
                .map(|item| object_id(item).ok_or_else(|| cast_error(field, "ObjectId", item)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Err(cast_error(field, "Array", &other)),
        },
        FieldKind::Array => match value {
            Value::Array(items) => Ok(Value::Array(items)),
            other => Err(cast_error(field, "Array", &other)),
        },
        FieldKind::Object => match value {
            Value::Object(obj) => Ok(Value::Object(obj)),
            other => Err(cast_error(field, "Object", &other)),
        },
    }
}

fn parse_number(raw: &str) -> Option<Value> {
    if let Ok(i) = raw.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()?
                    .and_hms_opt(0, 0, 0)
                    .map(|d| d.and_utc())
            }),
        Value::Number(n) => DateTime::from_timestamp_millis(n.as_i64()?),
        _ => None,
    }
}

/// Accepts a raw id or an already populated document carrying one.
fn object_id(value: &Value) -> Option<Value> {
    let raw = match value {
        Value::String(s) => s.as_str(),
        Value::Object(obj) => obj.get("_id")?.as_str()?,
        _ => return None,
    };
    ObjectId::parse(raw).map(|id| Value::String(id.to_string()))
}
