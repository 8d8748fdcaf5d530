//! Key-path addressing into JSON payloads

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Segment {
    Field(String),
    Index(usize),
}

/// A `/`-separated path into a JSON document, e.g. `networks/0/uuid`.
///
/// Purely numeric segments address array elements; everything else is an
/// object field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PropertyPath {
    segments: Vec<Segment>,
}

impl PropertyPath {
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(CloudError::InvalidPath {
                path: path.to_string(),
                reason: "path is empty".into(),
            });
        }

        let segments = trimmed
            .split('/')
            .map(|s| {
                if s.is_empty() {
                    Err(CloudError::InvalidPath {
                        path: path.to_string(),
                        reason: "empty segment".into(),
                    })
                } else if let Ok(i) = s.parse::<usize>() {
                    Ok(Segment::Index(i))
                } else {
                    Ok(Segment::Field(s.to_string()))
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { segments })
    }

    /// Read the value at this path.
    pub fn get<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        self.segments.iter().try_fold(doc, |node, seg| match seg {
            Segment::Field(name) => node.get(name.as_str()),
            Segment::Index(i) => node.get(*i),
        })
    }

    /// Write `value` at this path, creating intermediate objects and arrays
    /// as needed. Arrays are padded with `null` up to the addressed index;
    /// an index further past the end than the array is long is rejected.
    pub fn set(&self, doc: &mut Value, value: Value) -> Result<()> {
        let mut node = doc;
        for seg in &self.segments {
            node = match seg {
                Segment::Field(name) => {
                    if node.is_null() {
                        *node = Value::Object(Map::new());
                    }
                    match node {
                        Value::Object(map) => map.entry(name.clone()).or_insert(Value::Null),
                        other => return Err(self.mismatch("object", other)),
                    }
                }
                Segment::Index(i) => {
                    if node.is_null() {
                        *node = Value::Array(Vec::new());
                    }
                    match node {
                        Value::Array(items) => {
                            let len = items.len();
                            if i.saturating_sub(len) > len {
                                return Err(CloudError::InvalidPath {
                                    path: self.to_string(),
                                    reason: format!(
                                        "index {} is too far past the end of an array of {}",
                                        i, len
                                    ),
                                });
                            }
                            if len <= *i {
                                items.resize(i + 1, Value::Null);
                            }
                            &mut items[*i]
                        }
                        other => return Err(self.mismatch("array", other)),
                    }
                }
            };
        }
        *node = value;
        Ok(())
    }

    fn mismatch(&self, expected: &str, found: &Value) -> CloudError {
        let found = match found {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        };
        CloudError::InvalidPath {
            path: self.to_string(),
            reason: format!("expected {} but found {}", expected, found),
        }
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            match seg {
                Segment::Field(name) => f.write_str(name)?,
                Segment::Index(idx) => write!(f, "{}", idx)?,
            }
        }
        Ok(())
    }
}

impl FromStr for PropertyPath {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PropertyPath {
    type Error = CloudError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<PropertyPath> for String {
    fn from(path: PropertyPath) -> Self {
        path.to_string()
    }
}
