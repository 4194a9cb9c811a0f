//! Deterministic binary packing of schema-described records.
//!
//! Wire contract (all integers little-endian):
//!
//! - Optional 8-byte magic: `b"MCNN"`, `u16` format version, `u8` offset width
//!   in bytes, `u8` zero. Only written before the top-level record.
//! - A record is the slots of its non-excluded fields in declaration order,
//!   followed by the payloads of its variable-length fields. Payloads start on
//!   4-byte boundaries relative to the record start; padding is zero.
//! - Scalar slots are 4 bytes (`Bool`, `I32`, `U32`, `F32`) or 8 bytes (`I64`).
//! - Variable slots are `(offset, len)` pairs of the configured offset width.
//!   `offset` is relative to the containing record; `len` counts bytes for
//!   strings, blobs and records and elements for lists. Empty values are `(0, 0)`.
//! - Scalar lists are packed slots. String and record lists begin with an
//!   `(offset, len)` element table relative to the list payload start.

mod reader;
mod writer;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Deserialize;

use crate::error::{Error, Result};

pub use reader::unpack;
pub use writer::pack;

pub const MAGIC: [u8; 4] = *b"MCNN";
pub const FORMAT_VERSION: u16 = 1;
pub const MAGIC_LEN: usize = 8;

/// Payload alignment inside a record.
pub(crate) const PAYLOAD_ALIGN: usize = 4;

pub(crate) const fn align_up(x: usize, align: usize) -> usize {
    (x + align - 1) & !(align - 1)
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Width of the offset/length fields of variable-length slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum OffsetWidth {
    U16,
    U32,
}

impl OffsetWidth {
    pub fn bytes(self) -> usize {
        match self {
            OffsetWidth::U16 => 2,
            OffsetWidth::U32 => 4,
        }
    }

    pub fn max_value(self) -> u64 {
        match self {
            OffsetWidth::U16 => u16::MAX as u64,
            OffsetWidth::U32 => u32::MAX as u64,
        }
    }
}

impl TryFrom<u8> for OffsetWidth {
    type Error = String;

    fn try_from(bits: u8) -> std::result::Result<Self, Self::Error> {
        match bits {
            16 => Ok(OffsetWidth::U16),
            32 => Ok(OffsetWidth::U32),
            other => Err(format!("offset_width must be 16 or 32, got {other}")),
        }
    }
}

impl fmt::Display for OffsetWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffsetWidth::U16 => f.write_str("16-bit"),
            OffsetWidth::U32 => f.write_str("32-bit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackOptions {
    pub offset_width: OffsetWidth,
    pub write_magic: bool,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            offset_width: OffsetWidth::U32,
            write_magic: false,
        }
    }
}

/// Fields that are never serialized, keyed by record type name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludePolicy {
    fields: BTreeMap<&'static str, BTreeSet<&'static str>>,
}

impl ExcludePolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn exclude(mut self, record: &'static str, fields: &[&'static str]) -> Self {
        self.fields
            .entry(record)
            .or_default()
            .extend(fields.iter().copied());
        self
    }

    pub fn excludes(&self, record: &str, field: &str) -> bool {
        self.fields
            .get(record)
            .is_some_and(|set| set.contains(field))
    }
}

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Bool,
    I32,
    U32,
    I64,
    F32,
}

impl ScalarKind {
    pub fn slot_size(self) -> usize {
        match self {
            ScalarKind::I64 => 8,
            _ => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    Scalar(ScalarKind),
    Str,
    Bytes,
    Record(&'static RecordSchema),
    ScalarList(ScalarKind),
    StrList,
    RecordList(&'static RecordSchema),
}

impl FieldKind {
    fn describe(&self) -> String {
        match self {
            FieldKind::Scalar(k) => format!("{k:?}"),
            FieldKind::Str => "Str".into(),
            FieldKind::Bytes => "Bytes".into(),
            FieldKind::Record(s) => s.name.into(),
            FieldKind::ScalarList(k) => format!("[{k:?}]"),
            FieldKind::StrList => "[Str]".into(),
            FieldKind::RecordList(s) => format!("[{}]", s.name),
        }
    }

    fn default_value(&self) -> Value {
        match self {
            FieldKind::Scalar(ScalarKind::Bool) => Value::Bool(false),
            FieldKind::Scalar(ScalarKind::I32) => Value::I32(0),
            FieldKind::Scalar(ScalarKind::U32) => Value::U32(0),
            FieldKind::Scalar(ScalarKind::I64) => Value::I64(0),
            FieldKind::Scalar(ScalarKind::F32) => Value::F32(0.0),
            FieldKind::Str => Value::Str(String::new()),
            FieldKind::Bytes => Value::Bytes(Vec::new()),
            FieldKind::Record(schema) => Value::Record(Record::new(*schema)),
            FieldKind::ScalarList(_) | FieldKind::StrList | FieldKind::RecordList(_) => {
                Value::List(Vec::new())
            }
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldKind::Scalar(k), v) => v.scalar_kind() == Some(*k),
            (FieldKind::Str, Value::Str(_)) | (FieldKind::Bytes, Value::Bytes(_)) => true,
            (FieldKind::Record(s), Value::Record(r)) => r.schema == *s,
            (FieldKind::ScalarList(k), Value::List(items)) => {
                items.iter().all(|v| v.scalar_kind() == Some(*k))
            }
            (FieldKind::StrList, Value::List(items)) => {
                items.iter().all(|v| matches!(v, Value::Str(_)))
            }
            (FieldKind::RecordList(s), Value::List(items)) => items
                .iter()
                .all(|v| matches!(v, Value::Record(r) if r.schema == *s)),
            _ => false,
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Record type: name plus fields in declaration (= wire) order.
#[derive(Debug, PartialEq)]
pub struct RecordSchema {
    pub name: &'static str,
    pub fields: &'static [Field],
}

impl RecordSchema {
    fn index_of(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == field)
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    F32(f32),
    Str(String),
    Bytes(Vec<u8>),
    Record(Record),
    List(Vec<Value>),
}

impl Value {
    fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            Value::Bool(_) => Some(ScalarKind::Bool),
            Value::I32(_) => Some(ScalarKind::I32),
            Value::U32(_) => Some(ScalarKind::U32),
            Value::I64(_) => Some(ScalarKind::I64),
            Value::F32(_) => Some(ScalarKind::F32),
            _ => None,
        }
    }

    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v.into())
            }
        })*
    };
}

value_from! {
    bool => Bool,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    f32 => F32,
    String => Str,
    &str => Str,
    Vec<u8> => Bytes,
    Record => Record,
}

/// A typed record instance. Values always match the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: &'static RecordSchema,
    values: Vec<Value>,
}

impl Record {
    /// Record with every field at its default.
    pub fn new(schema: &'static RecordSchema) -> Self {
        let values = schema.fields.iter().map(|f| f.kind.default_value()).collect();
        Self { schema, values }
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Result<Self> {
        self.set(field, value.into())?;
        Ok(self)
    }

    pub fn set(&mut self, field: &str, value: Value) -> Result<()> {
        let idx = self
            .schema
            .index_of(field)
            .ok_or_else(|| Error::RecordMismatch {
                field: format!("{}.{field}", self.schema.name),
                expected: "a declared field".into(),
            })?;
        let kind = &self.schema.fields[idx].kind;
        if !kind.accepts(&value) {
            return Err(Error::RecordMismatch {
                field: format!("{}.{field}", self.schema.name),
                expected: kind.describe(),
            });
        }
        self.values[idx] = value;
        Ok(())
    }

    pub fn schema(&self) -> &'static RecordSchema {
        self.schema
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.schema.index_of(field).map(|i| &self.values[i])
    }

    pub(crate) fn fields(&self) -> impl Iterator<Item = (&'static Field, &Value)> {
        self.schema.fields.iter().zip(self.values.iter())
    }
}
