use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::time::LogicalTime;

/// 128-bit identifier for items and chunks, kept as 32 lowercase hex
/// characters. The derived ordering is numeric because the width is fixed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn from_hex(hex: &str) -> anyhow::Result<Self> {
        if hex.len() != 32 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("not a 128-bit hex id: {:?}", hex);
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    pub fn hex(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage kind of a table: insert-only or insert plus multi-version
/// update. A variant tag, not a class hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Cr,
    Cru,
}

/// Declared type of an application field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Double,
    Text,
    Blob,
    Id,
    Time,
}

/// A field value. Two revisions "match" a template when their field names
/// and value types agree with the declared layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value")]
pub enum FieldValue {
    Int(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
    Id(Id),
    Time(LogicalTime),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Int(_) => FieldType::Int,
            FieldValue::Double(_) => FieldType::Double,
            FieldValue::Text(_) => FieldType::Text,
            FieldValue::Blob(_) => FieldType::Blob,
            FieldValue::Id(_) => FieldType::Id,
            FieldValue::Time(_) => FieldType::Time,
        }
    }

    pub fn zero_of(field_type: FieldType) -> FieldValue {
        match field_type {
            FieldType::Int => FieldValue::Int(0),
            FieldType::Double => FieldValue::Double(0.0),
            FieldType::Text => FieldValue::Text(String::new()),
            FieldType::Blob => FieldValue::Blob(Vec::new()),
            FieldType::Id => FieldValue::Id(Id(String::new())),
            FieldType::Time => FieldValue::Time(LogicalTime::default()),
        }
    }
}

/// Field names managed by the store itself; applications may not declare
/// them.
pub const RESERVED_FIELDS: &[&str] = &[
    "id",
    "chunk_id",
    "insert_time",
    "update_time",
    "previous_time",
    "next_time",
];

/// The template of a table: its name and field layout.
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    pub name: String,
    pub fields: BTreeMap<String, FieldType>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn add_field(mut self, name: &str, field_type: FieldType) -> Self {
        assert!(
            !RESERVED_FIELDS.contains(&name),
            "field name {} is reserved",
            name
        );
        let previous = self.fields.insert(name.to_string(), field_type);
        assert!(previous.is_none(), "field {} declared twice", name);
        self
    }
}

/// A typed record. `insert_time` and `update_time` are stamped by the store;
/// `previous_time` / `next_time` link the version chain of linked CRU
/// tables. Once a revision entered a store it is never mutated; updates are
/// new revisions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Revision {
    pub id: Id,
    pub chunk_id: Id,
    pub insert_time: LogicalTime,
    pub update_time: LogicalTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_time: Option<LogicalTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_time: Option<LogicalTime>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Revision {
    /// A fresh revision laid out after the descriptor, with a generated id
    /// and zeroed fields.
    pub fn from_template(descriptor: &TableDescriptor) -> Self {
        Self {
            id: Id::generate(),
            chunk_id: Id(String::new()),
            insert_time: LogicalTime::default(),
            update_time: LogicalTime::default(),
            previous_time: None,
            next_time: None,
            fields: descriptor
                .fields
                .iter()
                .map(|(name, field_type)| (name.clone(), FieldValue::zero_of(*field_type)))
                .collect(),
        }
    }

    pub fn set_id(&mut self, id: Id) -> &mut Self {
        self.id = id;
        self
    }

    pub fn structure_match(&self, descriptor: &TableDescriptor) -> bool {
        if self.fields.len() != descriptor.fields.len() {
            return false;
        }
        self.fields.iter().all(|(name, value)| {
            descriptor.fields.get(name) == Some(&value.field_type())
        })
    }

    /// Sets a declared field; the value type must match the declaration.
    pub fn set(&mut self, field: &str, value: FieldValue) -> anyhow::Result<&mut Self> {
        match self.fields.get_mut(field) {
            Some(existing) if existing.field_type() == value.field_type() => {
                *existing = value;
                Ok(self)
            }
            Some(existing) => anyhow::bail!(
                "field {} is {:?}, not {:?}",
                field,
                existing.field_type(),
                value.field_type()
            ),
            None => anyhow::bail!("no field {} in this revision", field),
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn verify_eq(&self, field: &str, value: &FieldValue) -> bool {
        self.get(field) == Some(value)
    }
}
