use crate::notion::ApiError;
use crate::notion::table::FlatRow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Names of the workspace properties the projections read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertySchema {
    pub title: String,
    pub category: String,
    pub difficulty: String,
    pub relation: String,
    pub checkbox: String,
}

impl Default for PropertySchema {
    fn default() -> Self {
        Self {
            title: "Productions".to_string(),
            category: "P_PC".to_string(),
            difficulty: "difficulty1-5".to_string(),
            relation: "Activity".to_string(),
            checkbox: "Yes".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("missing field `{0}`")]
    MissingField(String),
    #[error("field `{field}` has unexpected shape: expected {expected}")]
    UnexpectedShape {
        field: String,
        expected: &'static str,
    },
    #[error("invalid timestamp `{value}` in `{field}`")]
    InvalidTimestamp { field: String, value: String },
    #[error("failed to list child blocks: {0}")]
    Children(#[source] ApiError),
    #[error("page has no child blocks")]
    NoChildBlocks,
    #[error("collection {0} is unavailable")]
    Unavailable(String),
    #[error("duplicate {kind} id {id}")]
    DuplicateId { kind: &'static str, id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub id: String,
    pub activity: String,
    pub category: Option<String>,
    pub difficulty: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardRecord {
    pub id: String,
    pub created_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCheckRecord {
    pub created_time: DateTime<Utc>,
    pub ref_id: String,
    pub completed: bool,
}

/// One daily check enriched with its reference activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedActivityRow {
    pub created_time: DateTime<Utc>,
    pub ref_id: String,
    pub completed: bool,
    pub id: String,
    pub activity: String,
    pub category: Option<String>,
    pub difficulty: Option<f64>,
}

impl JoinedActivityRow {
    pub fn new(check: DailyCheckRecord, reference: &ReferenceRecord) -> Self {
        Self {
            created_time: check.created_time,
            ref_id: check.ref_id,
            completed: check.completed,
            id: reference.id.clone(),
            activity: reference.activity.clone(),
            category: reference.category.clone(),
            difficulty: reference.difficulty,
        }
    }
}

impl ReferenceRecord {
    pub fn from_row(row: &FlatRow, schema: &PropertySchema) -> Result<Self, ExtractionError> {
        let title_field = format!("properties.{}.title", schema.title);
        let category_field = format!("properties.{}.select.name", schema.category);
        let difficulty_field = format!("properties.{}.number", schema.difficulty);

        let title = first_element(row, &title_field)?;
        let activity = title
            .pointer("/text/content")
            .or_else(|| title.get("plain_text"))
            .and_then(Value::as_str)
            .ok_or_else(|| ExtractionError::UnexpectedShape {
                field: title_field.clone(),
                expected: "rich text with text.content",
            })?;

        let category = match optional(row, &category_field) {
            None => None,
            Some(value) => Some(
                value
                    .as_str()
                    .ok_or_else(|| shape(&category_field, "string"))?
                    .to_string(),
            ),
        };

        let difficulty = match optional(row, &difficulty_field) {
            None => None,
            Some(value) => Some(
                value
                    .as_f64()
                    .ok_or_else(|| shape(&difficulty_field, "number"))?,
            ),
        };

        Ok(Self {
            id: required_str(row, "id")?.to_string(),
            activity: activity.to_string(),
            category,
            difficulty,
        })
    }
}

impl DashboardRecord {
    pub fn from_row(row: &FlatRow) -> Result<Self, ExtractionError> {
        Ok(Self {
            id: required_str(row, "id")?.to_string(),
            created_time: parse_timestamp(row, "created_time")?,
        })
    }
}

impl DailyCheckRecord {
    /// Projects one row of a page's daily-check collection, stamping it with
    /// the parent page's creation time.
    pub fn from_row(
        row: &FlatRow,
        created_time: DateTime<Utc>,
        schema: &PropertySchema,
    ) -> Result<Self, ExtractionError> {
        let relation_field = format!("properties.{}.relation", schema.relation);
        let checkbox_field = format!("properties.{}.checkbox", schema.checkbox);

        let ref_id = first_element(row, &relation_field)?
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| shape(&relation_field, "relation entries with an id"))?;

        let completed = required(row, &checkbox_field)?
            .as_bool()
            .ok_or_else(|| shape(&checkbox_field, "boolean"))?;

        Ok(Self {
            created_time,
            ref_id: ref_id.to_string(),
            completed,
        })
    }
}

fn shape(field: &str, expected: &'static str) -> ExtractionError {
    ExtractionError::UnexpectedShape {
        field: field.to_string(),
        expected,
    }
}

fn required<'a>(row: &'a FlatRow, field: &str) -> Result<&'a Value, ExtractionError> {
    optional(row, field).ok_or_else(|| ExtractionError::MissingField(field.to_string()))
}

fn optional<'a>(row: &'a FlatRow, field: &str) -> Option<&'a Value> {
    row.get(field).filter(|value| !value.is_null())
}

fn required_str<'a>(row: &'a FlatRow, field: &str) -> Result<&'a str, ExtractionError> {
    required(row, field)?
        .as_str()
        .ok_or_else(|| shape(field, "string"))
}

fn first_element<'a>(row: &'a FlatRow, field: &str) -> Result<&'a Value, ExtractionError> {
    required(row, field)?
        .as_array()
        .ok_or_else(|| shape(field, "array"))?
        .first()
        .ok_or_else(|| shape(field, "non-empty array"))
}

fn parse_timestamp(row: &FlatRow, field: &str) -> Result<DateTime<Utc>, ExtractionError> {
    let raw = required_str(row, field)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|_| ExtractionError::InvalidTimestamp {
            field: field.to_string(),
            value: raw.to_string(),
        })
}
