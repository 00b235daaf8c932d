//! Requested field lists: `name,children(5).{name,age},marriedWith.to.name`.

use std::fmt;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{GraphError, Result};

/// Field name requesting every non-lazy field of a type.
pub const ALL_FIELDS: &str = "all";

/// Limit keyword for an unlimited related field.
const MAX_LIMIT: &str = "max";

/// One requested field with its own sub-field list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryField {
    /// Field name.
    pub name: String,
    /// Maximum number of related items; `None` loads all of them.
    pub limit: Option<usize>,
    /// Fields loaded on the related items.
    pub sub_fields: FieldList,
}

impl QueryField {
    /// Field without limit or sub-fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            limit: None,
            sub_fields: FieldList::default(),
        }
    }

    /// Caps the number of related items loaded.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Fields loaded on the related items.
    pub fn with_sub_fields(mut self, sub_fields: FieldList) -> Self {
        self.sub_fields = sub_fields;
        self
    }

    fn merge(&mut self, other: QueryField) {
        self.limit = other.limit.or(self.limit);
        for sub in other.sub_fields.0 {
            self.sub_fields.push(sub);
        }
    }
}

impl fmt::Display for QueryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(limit) = self.limit {
            write!(f, "({limit})")?;
        }
        if !self.sub_fields.is_empty() {
            write!(f, ".{{{}}}", self.sub_fields)?;
        }
        Ok(())
    }
}

/// Ordered set of requested fields. Adding a name twice merges the entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldList(Vec<QueryField>);

impl FieldList {
    /// Empty list; searches treat it as `all`.
    pub fn new() -> Self {
        Self::default()
    }

    /// The `all` marker.
    pub fn all() -> Self {
        Self(vec![QueryField::new(ALL_FIELDS)])
    }

    /// List of plain field names.
    pub fn of<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Self::new();
        for name in names {
            list.push(QueryField::new(name));
        }
        list
    }

    /// Parses the comma separated field syntax.
    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser {
            input: input.as_bytes(),
            source: input,
            pos: 0,
        };
        let list = parser.list()?;
        parser.skip_ws();
        if parser.pos < parser.input.len() {
            return Err(parser.error("unexpected input"));
        }
        Ok(list)
    }

    /// Parses several field expressions and merges them.
    pub fn parse_all<I, S>(inputs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for input in inputs {
            for field in Self::parse(input.as_ref())?.0 {
                list.push(field);
            }
        }
        Ok(list)
    }

    /// Adds a field, merging limits and sub-fields into an existing entry.
    pub fn push(&mut self, field: QueryField) {
        match self.0.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => existing.merge(field),
            None => self.0.push(field),
        }
    }

    /// Entry for `name`.
    pub fn get(&self, name: &str) -> Option<&QueryField> {
        self.0.iter().find(|f| f.name == name)
    }

    /// True when `name` was requested.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// True for the `all` wildcard.
    pub fn is_all(&self) -> bool {
        self.contains(ALL_FIELDS)
    }

    /// True when no field was named.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of requested fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Requested fields in request order.
    pub fn iter(&self) -> impl Iterator<Item = &QueryField> {
        self.0.iter()
    }
}

impl fmt::Display for FieldList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, field) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ",")?;
            }
            write!(f, "{field}")?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a FieldList {
    type Item = &'a QueryField;
    type IntoIter = std::slice::Iter<'a, QueryField>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Serialize for FieldList {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(ToString::to_string))
    }
}

/// Accepts a field string or a list of field strings.
impl<'de> Deserialize<'de> for FieldList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct FieldListVisitor;

        impl<'de> Visitor<'de> for FieldListVisitor {
            type Value = FieldList;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a field list string or an array of field strings")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<FieldList, E> {
                FieldList::parse(value).map_err(E::custom)
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<FieldList, A::Error> {
                let mut inputs: Vec<String> = Vec::new();
                while let Some(item) = seq.next_element()? {
                    inputs.push(item);
                }
                FieldList::parse_all(inputs).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_any(FieldListVisitor)
    }
}

struct Parser<'a> {
    input: &'a [u8],
    source: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> GraphError {
        GraphError::InvalidArgument(format!(
            "{message} at position {} in field list '{}'",
            self.pos, self.source
        ))
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, byte: u8) -> bool {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn list(&mut self) -> Result<FieldList> {
        let mut list = FieldList::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None | Some(b'}') => break,
                Some(b',') => {
                    self.pos += 1;
                    continue;
                }
                _ => list.push(self.field()?),
            }
            if !self.eat(b',') {
                break;
            }
        }
        Ok(list)
    }

    fn field(&mut self) -> Result<QueryField> {
        self.skip_ws();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(match self.peek() {
                Some(b'[') => self.error("sub-fields must be wrapped in '{}' not '[]'"),
                _ => self.error("expected a field name"),
            });
        }
        let mut field = QueryField::new(&self.source[start..self.pos]);

        if self.eat(b'(') {
            self.skip_ws();
            let start = self.pos;
            while self.peek().is_some_and(|b| b != b')') {
                self.pos += 1;
            }
            let source = self.source;
            let raw = source[start..self.pos].trim();
            if !self.eat(b')') {
                return Err(self.error("unterminated limit"));
            }
            field.limit = if raw.eq_ignore_ascii_case(MAX_LIMIT) {
                None
            } else {
                Some(
                    raw.parse::<usize>()
                        .map_err(|_| self.error("limit must be a number or 'max'"))?,
                )
            };
        }

        if self.eat(b'.') {
            self.skip_ws();
            match self.peek() {
                Some(b'{') => {
                    self.pos += 1;
                    field.sub_fields = self.list()?;
                    if !self.eat(b'}') {
                        return Err(self.error("unterminated sub-field list"));
                    }
                }
                Some(b'[') => {
                    return Err(self.error("sub-fields must be wrapped in '{}' not '[]'"));
                }
                _ => {
                    let sub = self.field()?;
                    field.sub_fields.push(sub);
                }
            }
        }
        Ok(field)
    }
}
