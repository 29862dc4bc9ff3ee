//! The statement value handed to the interception hooks.
//!
//! A [`BoundStatement`] is a plain owned value: SQL text, the ordered
//! parameter mappings for its placeholders, and the objects those mappings
//! read from. The pipeline rewrites a clone and never touches the caller's copy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Kind of SQL command, as declared by the data-access layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlCommand {
    Insert,
    Update,
    Select,
    Delete,
    Unknown,
}

impl fmt::Display for SqlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlCommand::Insert => write!(f, "INSERT"),
            SqlCommand::Update => write!(f, "UPDATE"),
            SqlCommand::Select => write!(f, "SELECT"),
            SqlCommand::Delete => write!(f, "DELETE"),
            SqlCommand::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl FromStr for SqlCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(SqlCommand::Insert),
            "update" => Ok(SqlCommand::Update),
            "select" => Ok(SqlCommand::Select),
            "delete" => Ok(SqlCommand::Delete),
            "unknown" => Ok(SqlCommand::Unknown),
            other => Err(format!("unknown SQL command kind: {other}")),
        }
    }
}

/// Binds one placeholder to the property that supplies its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterMapping {
    /// Property path (`phone`, `user.phone`, `__frch_item_0.phone`).
    pub property: String,
    /// Value bound by the pipeline. Takes precedence over the property lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ParameterMapping {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            value: None,
        }
    }

    /// A mapping whose value is fixed rather than looked up.
    pub fn bound(property: impl Into<String>, value: Value) -> Self {
        Self {
            property: property.into(),
            value: Some(value),
        }
    }
}

/// A statement and its bound parameters, prior to execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundStatement {
    /// Identifier of the mapped statement, used in logs.
    #[serde(default)]
    pub id: String,
    pub command: SqlCommand,
    pub sql: String,
    /// One mapping per placeholder, in placeholder order.
    #[serde(default)]
    pub parameter_mappings: Vec<ParameterMapping>,
    /// The caller's parameter object. A scalar stands for a single parameter.
    #[serde(default)]
    pub parameter_object: Value,
    /// Extra values generated by the data-access layer (loop variables and similar).
    #[serde(default)]
    pub additional_parameters: Map<String, Value>,
}

impl BoundStatement {
    pub fn new(command: SqlCommand, sql: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            command,
            sql: sql.into(),
            parameter_mappings: Vec::new(),
            parameter_object: Value::Null,
            additional_parameters: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the parameter mappings (in placeholder order) and the object they read from.
    pub fn with_parameters<I, S>(mut self, properties: I, parameter_object: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameter_mappings = properties.into_iter().map(ParameterMapping::new).collect();
        self.parameter_object = parameter_object;
        self
    }

    pub fn with_additional_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.additional_parameters.insert(key.into(), value);
        self
    }

    /// Value of the parameter at `index`, if it resolves.
    ///
    /// Lookup order: the mapping's own bound value, then the additional
    /// parameters, then the parameter object.
    pub fn parameter_value(&self, index: usize) -> Option<&Value> {
        let mapping = self.parameter_mappings.get(index)?;
        if let Some(value) = &mapping.value {
            return Some(value);
        }
        if let Some(value) = lookup_in_map(&self.additional_parameters, &mapping.property) {
            return Some(value);
        }
        match &self.parameter_object {
            Value::Object(map) => lookup_in_map(map, &mapping.property),
            Value::Null => None,
            Value::Array(_) => lookup_path(&self.parameter_object, &mapping.property),
            scalar => Some(scalar),
        }
    }

    /// The values the execution engine binds, in placeholder order.
    /// Unresolvable parameters are bound as `null`.
    pub fn bound_parameters(&self) -> Vec<Value> {
        (0..self.parameter_mappings.len())
            .map(|i| self.parameter_value(i).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Fix the value of the parameter at `index`.
    pub(crate) fn bind(&mut self, index: usize, value: Value) {
        if let Some(mapping) = self.parameter_mappings.get_mut(index) {
            mapping.value = Some(value);
        }
    }
}

fn lookup_in_map<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(value) = map.get(path) {
        return Some(value);
    }
    let (head, rest) = path.split_once('.')?;
    lookup_path(map.get(head)?, rest)
}

fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
