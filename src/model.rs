use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Todo {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub completed: bool,
    #[serde(serialize_with = "serialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTodo {
    pub title: String,
    pub description: String,
    pub completed: bool,
}

impl NewTodo {
    pub fn titled(title: impl Into<String>) -> NewTodo {
        NewTodo {
            title: title.into(),
            description: String::new(),
            completed: false,
        }
    }
}

/// Field values to write on update. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
}

/// Columns of the `todos` table, by the names the admin and the API use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TodoField {
    Id,
    Title,
    Description,
    Completed,
    CreatedAt,
    UpdatedAt,
}

impl TodoField {
    pub const ALL: [TodoField; 6] = [
        TodoField::Id,
        TodoField::Title,
        TodoField::Description,
        TodoField::Completed,
        TodoField::CreatedAt,
        TodoField::UpdatedAt,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TodoField::Id => "id",
            TodoField::Title => "title",
            TodoField::Description => "description",
            TodoField::Completed => "completed",
            TodoField::CreatedAt => "created_at",
            TodoField::UpdatedAt => "updated_at",
        }
    }

    pub fn from_name(name: &str) -> Option<TodoField> {
        TodoField::ALL.into_iter().find(|field| field.name() == name)
    }
}

impl fmt::Display for TodoField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TodoField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TodoField::from_name(s).ok_or_else(|| format!("unknown field `{s}`"))
    }
}

/// Timestamps are kept at microsecond precision so the stored text and the
/// in-memory value agree.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 (`2026-10-17T09:30:00.123456Z`); lexical order is
/// chronological order.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|timestamp| timestamp.with_timezone(&Utc))
}

fn serialize_timestamp<S: Serializer>(
    timestamp: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(timestamp))
}

const REQUIRED: &str = "This field is required.";
const NOT_NULL: &str = "This field may not be null.";
const NOT_BLANK: &str = "This field may not be blank.";
const NOT_A_STRING: &str = "Not a valid string.";
const NOT_A_BOOLEAN: &str = "Must be a valid boolean.";
const NON_FIELD_ERRORS: &str = "non_field_errors";

/// Turns request bodies into validated todo values. `id`, `created_at` and
/// `updated_at` are read-only and unknown keys are ignored.
pub struct TodoPayload;

impl TodoPayload {
    pub fn create(payload: &Value) -> Result<NewTodo, ValidationError> {
        let changes = validate(payload, true)?;
        Ok(NewTodo {
            title: changes.title.unwrap_or_default(),
            description: changes.description.unwrap_or_default(),
            completed: changes.completed.unwrap_or(false),
        })
    }

    /// Full updates require a title; partial updates require nothing.
    pub fn update(payload: &Value, partial: bool) -> Result<TodoChanges, ValidationError> {
        validate(payload, !partial)
    }
}

fn validate(payload: &Value, require_title: bool) -> Result<TodoChanges, ValidationError> {
    let object = as_object(payload)?;
    let mut errors: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut changes = TodoChanges::default();

    match object.get("title") {
        None if require_title => push(&mut errors, "title", REQUIRED),
        None => {}
        Some(value) => match coerce_string(value) {
            Ok(title) => {
                let title = title.trim();
                if title.is_empty() {
                    push(&mut errors, "title", NOT_BLANK);
                } else {
                    changes.title = Some(title.to_string());
                }
            }
            Err(message) => push(&mut errors, "title", message),
        },
    }

    if let Some(value) = object.get("description") {
        match coerce_string(value) {
            Ok(description) => changes.description = Some(description.trim().to_string()),
            Err(message) => push(&mut errors, "description", message),
        }
    }

    if let Some(value) = object.get("completed") {
        match coerce_bool(value) {
            Ok(completed) => changes.completed = Some(completed),
            Err(message) => push(&mut errors, "completed", message),
        }
    }

    if errors.is_empty() {
        Ok(changes)
    } else {
        Err(ValidationError::new(errors))
    }
}

fn as_object(payload: &Value) -> Result<&Map<String, Value>, ValidationError> {
    let kind = match payload {
        Value::Object(object) => return Ok(object),
        Value::Null => {
            return Err(ValidationError::single(NON_FIELD_ERRORS, "No data provided"));
        }
        Value::Array(_) => "list",
        Value::String(_) => "str",
        Value::Bool(_) => "bool",
        Value::Number(number) if number.is_f64() => "float",
        Value::Number(_) => "int",
    };
    Err(ValidationError::single(
        NON_FIELD_ERRORS,
        format!("Invalid data. Expected a dictionary, but got {kind}."),
    ))
}

fn push(errors: &mut BTreeMap<String, Vec<String>>, field: &str, message: &str) {
    errors
        .entry(field.to_string())
        .or_default()
        .push(message.to_string());
}

fn coerce_string(value: &Value) -> Result<String, &'static str> {
    match value {
        Value::Null => Err(NOT_NULL),
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => Err(NOT_A_STRING),
    }
}

fn coerce_bool(value: &Value) -> Result<bool, &'static str> {
    match value {
        Value::Null => Err(NOT_NULL),
        Value::Bool(flag) => Ok(*flag),
        Value::Number(number) => match number.as_f64() {
            Some(n) if n == 1.0 => Ok(true),
            Some(n) if n == 0.0 => Ok(false),
            _ => Err(NOT_A_BOOLEAN),
        },
        Value::String(text) => parse_flag(text).ok_or(NOT_A_BOOLEAN),
        Value::Array(_) | Value::Object(_) => Err(NOT_A_BOOLEAN),
    }
}

/// The boolean spellings accepted from clients and the command line.
pub fn parse_flag(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" | "t" | "y" => Some(true),
        "false" | "no" | "off" | "0" | "f" | "n" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_defaults_optional_fields() {
        let todo = TodoPayload::create(&json!({"title": "buy milk"})).unwrap();
        assert_eq!(todo, NewTodo::titled("buy milk"));
    }

    #[test]
    fn create_requires_title() {
        let err = TodoPayload::create(&json!({"completed": true})).unwrap_err();
        assert_eq!(err.fields()["title"], vec![REQUIRED.to_string()]);
    }

    #[test]
    fn blank_and_null_titles_are_rejected() {
        let err = TodoPayload::create(&json!({"title": "   "})).unwrap_err();
        assert_eq!(err.fields()["title"], vec![NOT_BLANK.to_string()]);

        let err = TodoPayload::update(&json!({"title": null}), true).unwrap_err();
        assert_eq!(err.fields()["title"], vec![NOT_NULL.to_string()]);
    }

    #[test]
    fn numbers_are_accepted_as_titles_but_lists_are_not() {
        let todo = TodoPayload::create(&json!({"title": 42})).unwrap();
        assert_eq!(todo.title, "42");

        let err = TodoPayload::create(&json!({"title": ["a"]})).unwrap_err();
        assert_eq!(err.fields()["title"], vec![NOT_A_STRING.to_string()]);
    }

    #[test]
    fn completed_accepts_common_spellings() {
        for (raw, expected) in [
            (json!(true), true),
            (json!("yes"), true),
            (json!("On"), true),
            (json!(1), true),
            (json!("f"), false),
            (json!(0), false),
        ] {
            let changes = TodoPayload::update(&json!({ "completed": raw }), true).unwrap();
            assert_eq!(changes.completed, Some(expected));
        }

        let err = TodoPayload::update(&json!({"completed": "maybe"}), true).unwrap_err();
        assert_eq!(err.fields()["completed"], vec![NOT_A_BOOLEAN.to_string()]);
    }

    #[test]
    fn read_only_and_unknown_fields_are_ignored() {
        let changes = TodoPayload::update(
            &json!({"id": 9, "created_at": "x", "priority": "high", "completed": false}),
            true,
        )
        .unwrap();
        assert_eq!(
            changes,
            TodoChanges {
                completed: Some(false),
                ..TodoChanges::default()
            }
        );
    }

    #[test]
    fn non_objects_are_rejected() {
        let err = TodoPayload::create(&json!(["buy milk"])).unwrap_err();
        assert_eq!(
            err.fields()[NON_FIELD_ERRORS],
            vec!["Invalid data. Expected a dictionary, but got list.".to_string()]
        );
    }

    #[test]
    fn errors_are_collected_per_field() {
        let err = TodoPayload::create(&json!({"description": null, "completed": []})).unwrap_err();
        let fields: Vec<_> = err.fields().keys().cloned().collect();
        assert_eq!(fields, vec!["completed", "description", "title"]);
    }

    #[test]
    fn timestamps_round_trip_through_text() {
        let stamp = now();
        let text = format_timestamp(&stamp);
        assert!(text.ends_with('Z'));
        assert_eq!(text.len(), "2026-10-17T09:30:00.123456Z".len());
        assert_eq!(parse_timestamp(&text).unwrap(), stamp);
    }

    #[test]
    fn field_names_resolve() {
        assert_eq!(TodoField::from_name("created_at"), Some(TodoField::CreatedAt));
        assert_eq!(TodoField::from_name("owner"), None);
        assert_eq!("title".parse::<TodoField>(), Ok(TodoField::Title));
    }
}
