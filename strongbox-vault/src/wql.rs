//! The tag query language.
//!
//! Queries are JSON objects:
//!
//! ```text
//! {"color": "red"}                               equality
//! {"color": {"$neq": "red"}}                     $neq $gt $gte $lt $lte $like
//! {"color": {"$in": ["red", "blue"]}}            membership
//! {"$exist": ["color", "~year"]}                 presence
//! {"$and": [..]}  {"$or": [..]}  {"$not": {..}}  combinators
//! ```
//!
//! Several keys in one object are combined with `$and`; `{}` matches
//! everything. A leading `~` names a plaintext tag. Range and `$like`
//! predicates are only valid on plaintext tags.

use crate::error::{VaultError, VaultResult};
use crate::profile_key::ProfileKey;
use serde_json::{Map, Value};
use std::str::FromStr;
use strongbox_storage::{TagFilter, TagName};

/// A tag name in a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagQueryName {
    pub name: String,
    pub plaintext: bool,
}

impl TagQueryName {
    pub fn parse(name: &str) -> Self {
        match name.strip_prefix('~') {
            Some(name) => Self {
                name: name.to_string(),
                plaintext: true,
            },
            None => Self {
                name: name.to_string(),
                plaintext: false,
            },
        }
    }

    fn encode(&self, key: &ProfileKey) -> VaultResult<TagName> {
        Ok(if self.plaintext {
            TagName::plaintext(self.name.as_bytes().to_vec())
        } else {
            TagName::encrypted(key.encrypt_tag_name(&self.name)?)
        })
    }

    fn encode_value(&self, key: &ProfileKey, value: &str) -> VaultResult<Vec<u8>> {
        if self.plaintext {
            Ok(value.as_bytes().to_vec())
        } else {
            key.encrypt_tag_value(value)
        }
    }

    fn require_plaintext(&self, op: &str) -> VaultResult<()> {
        if self.plaintext {
            Ok(())
        } else {
            Err(VaultError::Input(format!(
                "{op} needs a plaintext tag: use ~{}",
                self.name
            )))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TagQuery {
    And(Vec<TagQuery>),
    Or(Vec<TagQuery>),
    Not(Box<TagQuery>),
    Eq(TagQueryName, String),
    Neq(TagQueryName, String),
    Gt(TagQueryName, String),
    Gte(TagQueryName, String),
    Lt(TagQueryName, String),
    Lte(TagQueryName, String),
    Like(TagQueryName, String),
    In(TagQueryName, Vec<String>),
    Exist(Vec<TagQueryName>),
}

impl TagQuery {
    /// Equality on one tag; `name` may carry the `~` prefix.
    pub fn eq(name: &str, value: impl Into<String>) -> Self {
        Self::Eq(TagQueryName::parse(name), value.into())
    }

    pub fn from_json(json: &str) -> VaultResult<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> VaultResult<Self> {
        match value {
            Value::Object(map) => parse_object(map),
            other => Err(VaultError::Input(format!("query must be an object, got {other}"))),
        }
    }

    /// Encodes the query into a filter over stored tags.
    pub(crate) fn encode(&self, key: &ProfileKey) -> VaultResult<TagFilter> {
        let compare = |name: &TagQueryName, value: &str| -> VaultResult<(TagName, Vec<u8>)> {
            Ok((name.encode(key)?, name.encode_value(key, value)?))
        };
        let ordered = |name: &TagQueryName, value: &str, op: &str| -> VaultResult<(TagName, Vec<u8>)> {
            name.require_plaintext(op)?;
            compare(name, value)
        };
        Ok(match self {
            Self::And(parts) => TagFilter::And(encode_all(parts, key)?),
            Self::Or(parts) => TagFilter::Or(encode_all(parts, key)?),
            Self::Not(inner) => TagFilter::Not(Box::new(inner.encode(key)?)),
            Self::Eq(name, value) => {
                let (name, value) = compare(name, value)?;
                TagFilter::Eq(name, value)
            }
            Self::Neq(name, value) => {
                let (name, value) = compare(name, value)?;
                TagFilter::Neq(name, value)
            }
            Self::Gt(name, value) => {
                let (name, value) = ordered(name, value, "$gt")?;
                TagFilter::Gt(name, value)
            }
            Self::Gte(name, value) => {
                let (name, value) = ordered(name, value, "$gte")?;
                TagFilter::Gte(name, value)
            }
            Self::Lt(name, value) => {
                let (name, value) = ordered(name, value, "$lt")?;
                TagFilter::Lt(name, value)
            }
            Self::Lte(name, value) => {
                let (name, value) = ordered(name, value, "$lte")?;
                TagFilter::Lte(name, value)
            }
            Self::Like(name, value) => {
                let (name, value) = ordered(name, value, "$like")?;
                TagFilter::Like(name, value)
            }
            Self::In(name, values) => TagFilter::In(
                name.encode(key)?,
                values
                    .iter()
                    .map(|v| name.encode_value(key, v))
                    .collect::<VaultResult<_>>()?,
            ),
            Self::Exist(names) => TagFilter::Exist(
                names
                    .iter()
                    .map(|n| n.encode(key))
                    .collect::<VaultResult<_>>()?,
            ),
        })
    }
}

impl FromStr for TagQuery {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_json(s)
    }
}

fn encode_all(parts: &[TagQuery], key: &ProfileKey) -> VaultResult<Vec<TagFilter>> {
    parts.iter().map(|p| p.encode(key)).collect()
}

fn parse_object(map: &Map<String, Value>) -> VaultResult<TagQuery> {
    let mut clauses = map
        .iter()
        .map(|(key, value)| parse_clause(key, value))
        .collect::<VaultResult<Vec<_>>>()?;
    if clauses.len() == 1 {
        Ok(clauses.remove(0))
    } else {
        Ok(TagQuery::And(clauses))
    }
}

fn parse_clause(key: &str, value: &Value) -> VaultResult<TagQuery> {
    match key {
        "$and" => Ok(TagQuery::And(parse_list(key, value)?)),
        "$or" => Ok(TagQuery::Or(parse_list(key, value)?)),
        "$not" => Ok(TagQuery::Not(Box::new(TagQuery::from_value(value)?))),
        "$exist" => {
            let names = match value {
                Value::String(name) => vec![TagQueryName::parse(name)],
                Value::Array(items) => items
                    .iter()
                    .map(|item| string(item, key).map(TagQueryName::parse))
                    .collect::<VaultResult<_>>()?,
                other => return Err(unexpected(key, other)),
            };
            Ok(TagQuery::Exist(names))
        }
        op if op.starts_with('$') => Err(VaultError::Input(format!("unknown operator: {op}"))),
        name => parse_predicate(TagQueryName::parse(name), value),
    }
}

fn parse_list(op: &str, value: &Value) -> VaultResult<Vec<TagQuery>> {
    match value {
        Value::Array(items) => items.iter().map(TagQuery::from_value).collect(),
        other => Err(unexpected(op, other)),
    }
}

fn parse_predicate(name: TagQueryName, value: &Value) -> VaultResult<TagQuery> {
    let map = match value {
        Value::String(v) => return Ok(TagQuery::Eq(name, v.clone())),
        Value::Object(map) => map,
        other => return Err(unexpected(&name.name, other)),
    };
    let mut ops = map.iter();
    let (Some((op, operand)), None) = (ops.next(), ops.next()) else {
        return Err(VaultError::Input(format!(
            "expected exactly one operator for tag {}",
            name.name
        )));
    };
    Ok(match op.as_str() {
        "$neq" => TagQuery::Neq(name, string(operand, op)?.to_string()),
        "$gt" => TagQuery::Gt(name, string(operand, op)?.to_string()),
        "$gte" => TagQuery::Gte(name, string(operand, op)?.to_string()),
        "$lt" => TagQuery::Lt(name, string(operand, op)?.to_string()),
        "$lte" => TagQuery::Lte(name, string(operand, op)?.to_string()),
        "$like" => TagQuery::Like(name, string(operand, op)?.to_string()),
        "$in" => match operand {
            Value::Array(items) => TagQuery::In(
                name,
                items
                    .iter()
                    .map(|item| string(item, op).map(str::to_string))
                    .collect::<VaultResult<_>>()?,
            ),
            other => return Err(unexpected(op, other)),
        },
        other => return Err(VaultError::Input(format!("unknown operator: {other}"))),
    })
}

fn string<'a>(value: &'a Value, context: &str) -> VaultResult<&'a str> {
    value.as_str().ok_or_else(|| unexpected(context, value))
}

fn unexpected(context: &str, value: &Value) -> VaultError {
    VaultError::Input(format!("unexpected value for {context}: {value}"))
}
