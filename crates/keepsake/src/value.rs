//! Runtime values and argument lists.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::definition::Instantiation;

/// Value produced by instantiating a definition.
/// Aggregates are Arc-wrapped so cloning a cached value is O(1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(Arc<str>),
    List(Arc<Vec<Value>>),
}

impl Value {
    pub fn text(text: impl Into<String>) -> Self {
        Value::Text(text.into().into())
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(Arc::new(items.into_iter().collect()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Render the value for text concatenation.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(value) => value.to_string(),
            Value::Int(value) => value.to_string(),
            Value::Float(value) => value.to_string(),
            Value::Text(text) => text.to_string(),
            Value::List(items) => items.iter().map(Value::to_display_string).collect(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::text(text)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

/// One bound argument of an instantiation.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Value(Value),
    /// Evaluated lazily, in the caller's scope.
    Instance(Box<Instantiation>),
    /// Padding for parameters the caller did not supply.
    Missing,
}

impl Argument {
    pub fn is_missing(&self) -> bool {
        matches!(self, Argument::Missing)
    }
}

impl From<Value> for Argument {
    fn from(value: Value) -> Self {
        Argument::Value(value)
    }
}

impl From<Instantiation> for Argument {
    fn from(instantiation: Instantiation) -> Self {
        Argument::Instance(Box::new(instantiation))
    }
}

pub type ArgumentList = SmallVec<[Argument; 4]>;
pub type ParameterList = SmallVec<[Arc<str>; 4]>;

/// Pad `arguments` with `Argument::Missing` up to the parameter count.
/// Surplus arguments are kept.
pub fn pad_arguments(mut arguments: ArgumentList, parameters: &ParameterList) -> ArgumentList {
    while arguments.len() < parameters.len() {
        arguments.push(Argument::Missing);
    }
    arguments
}

/// Compare two argument lists, ignoring trailing `Argument::Missing` padding.
pub fn same_arguments(left: &[Argument], right: &[Argument]) -> bool {
    fn significant(arguments: &[Argument]) -> &[Argument] {
        let end = arguments
            .iter()
            .rposition(|argument| !argument.is_missing())
            .map_or(0, |last| last + 1);
        &arguments[..end]
    }
    significant(left) == significant(right)
}
