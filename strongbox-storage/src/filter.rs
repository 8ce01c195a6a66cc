//! Tag filters over stored (already encrypted) tags.
//!
//! The vault encodes a query by encrypting tag names and values with the same
//! deterministic keys used on write, so equality is a byte comparison here.
//! Ordering and pattern predicates only make sense on plaintext tags.

use crate::record::StoredTag;

/// A tag name as stored: ciphertext for encrypted tags, raw bytes otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagName {
    pub plaintext: bool,
    pub name: Vec<u8>,
}

impl TagName {
    pub fn encrypted(name: Vec<u8>) -> Self {
        Self {
            plaintext: false,
            name,
        }
    }

    pub fn plaintext(name: Vec<u8>) -> Self {
        Self {
            plaintext: true,
            name,
        }
    }

    fn matches(&self, tag: &StoredTag) -> bool {
        tag.plaintext == self.plaintext && tag.name == self.name
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TagFilter {
    And(Vec<TagFilter>),
    Or(Vec<TagFilter>),
    Not(Box<TagFilter>),
    Eq(TagName, Vec<u8>),
    Neq(TagName, Vec<u8>),
    Gt(TagName, Vec<u8>),
    Gte(TagName, Vec<u8>),
    Lt(TagName, Vec<u8>),
    Lte(TagName, Vec<u8>),
    Like(TagName, Vec<u8>),
    In(TagName, Vec<Vec<u8>>),
    Exist(Vec<TagName>),
}

impl TagFilter {
    /// Evaluates the filter against one record's tags.
    ///
    /// A comparison predicate holds when some tag with that name satisfies it,
    /// so `Neq` requires the tag to be present with a different value.
    pub fn matches(&self, tags: &[StoredTag]) -> bool {
        match self {
            Self::And(parts) => parts.iter().all(|f| f.matches(tags)),
            Self::Or(parts) => parts.iter().any(|f| f.matches(tags)),
            Self::Not(inner) => !inner.matches(tags),
            Self::Eq(name, value) => any_value(tags, name, |v| v == value.as_slice()),
            Self::Neq(name, value) => any_value(tags, name, |v| v != value.as_slice()),
            Self::Gt(name, value) => ordered(tags, name, |v| v > value.as_slice()),
            Self::Gte(name, value) => ordered(tags, name, |v| v >= value.as_slice()),
            Self::Lt(name, value) => ordered(tags, name, |v| v < value.as_slice()),
            Self::Lte(name, value) => ordered(tags, name, |v| v <= value.as_slice()),
            Self::Like(name, pattern) => ordered(tags, name, |v| like(v, pattern)),
            Self::In(name, values) => any_value(tags, name, |v| values.iter().any(|x| x == v)),
            Self::Exist(names) => names.iter().all(|n| tags.iter().any(|t| n.matches(t))),
        }
    }
}

fn any_value(tags: &[StoredTag], name: &TagName, pred: impl Fn(&[u8]) -> bool) -> bool {
    tags.iter().any(|t| name.matches(t) && pred(&t.value))
}

fn ordered(tags: &[StoredTag], name: &TagName, pred: impl Fn(&[u8]) -> bool) -> bool {
    name.plaintext && any_value(tags, name, pred)
}

/// SQL `LIKE` over bytes: `%` matches any run, `_` any single byte.
pub fn like(value: &[u8], pattern: &[u8]) -> bool {
    let (mut v, mut p) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;
    while v < value.len() {
        match pattern.get(p) {
            Some(b'%') => {
                backtrack = Some((p, v));
                p += 1;
            }
            Some(b'_') => {
                v += 1;
                p += 1;
            }
            Some(c) if *c == value[v] => {
                v += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((bp, bv)) => {
                    p = bp + 1;
                    v = bv + 1;
                    backtrack = Some((bp, bv + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == b'%')
}
