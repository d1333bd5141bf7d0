// src/extract/mod.rs

pub mod html;
pub mod xml;

use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// How one output column is pulled out of an item.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub numeric: bool,
    /// CSS selector relative to the item (HTML endpoints only).
    pub selector: Option<Selector>,
    /// Join every match with this separator instead of taking the first.
    pub join: Option<String>,
}

impl Field {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            numeric: false,
            selector: None,
            join: None,
        }
    }
}

/// A single extracted cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Integer(i64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Integer(n) => write!(f, "{}", n),
        }
    }
}

/// One flattened upstream item: field name → value, in configured field order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Ordered records of one harvest run plus the column set they share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub numeric: Vec<String>,
    pub records: Vec<Record>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, numeric: Vec<String>) -> Self {
        Self {
            columns,
            numeric,
            records: Vec::new(),
        }
    }

    pub fn is_numeric(&self, column: &str) -> bool {
        self.numeric.iter().any(|c| c == column)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Failure to turn one item into a [`Record`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("item {item}: missing field `{field}`")]
    MissingField { field: String, item: usize },
    #[error("item {item}: field `{field}` is not an integer: {value:?}")]
    NotInteger {
        field: String,
        value: String,
        item: usize,
    },
    #[error("malformed document: {0}")]
    Document(String),
    #[error("total count element `{0}` not found")]
    MissingTotal(String),
    #[error("total count element `{element}` is not an integer: {value:?}")]
    BadTotal { element: String, value: String },
}

/// What to do with an item whose extraction fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFieldPolicy {
    /// Abort the whole run; no output is written.
    #[default]
    FailFast,
    /// Log the failure and drop the item.
    SkipItem,
}

/// Items of one parsed page: each either a record or the reason it failed.
pub type PageItems = Vec<Result<Record, ExtractError>>;

/// Parsed content of one response body.
#[derive(Debug, Default)]
pub struct ParsedPage {
    pub items: PageItems,
    pub total_count: Option<u64>,
}

/// Convert raw field text into a [`Value`], parsing numeric fields as `i64`.
pub(crate) fn to_value(
    field: &str,
    raw: String,
    numeric: bool,
    item: usize,
) -> Result<Value, ExtractError> {
    if !numeric {
        return Ok(Value::Text(raw));
    }
    raw.trim()
        .parse::<i64>()
        .map(Value::Integer)
        .map_err(|_| ExtractError::NotInteger {
            field: field.to_string(),
            value: raw,
            item,
        })
}

pub(crate) fn parse_total(element: &str, raw: &str) -> Result<u64, ExtractError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| ExtractError::BadTotal {
            element: element.to_string(),
            value: raw.to_string(),
        })
}
