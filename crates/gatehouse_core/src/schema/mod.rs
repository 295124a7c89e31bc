//! Schema metadata contributed by extensions and the finalized host shape.
//!
//! # Responsibility
//! - Define field, relation and index declarations extensions contribute.
//! - Compose them in config order and finalize the host definition once.
//!
//! # Invariants
//! - Composition output is a plain concatenation in config order.
//! - Finalized relations never carry a placeholder target.

pub mod composer;
pub mod gate;
pub mod host;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placeholder relation target meaning "the host entity".
pub const HOST_PLACEHOLDER: &str = "user";

/// Semantic field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Boolean,
    /// Unix epoch milliseconds.
    UtcDatetime,
    /// UUID identifier or foreign key.
    Id,
}

/// Dynamically typed value for params, changes and stored fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum FieldValue {
    #[default]
    Null,
    String(String),
    Integer(i64),
    Boolean(bool),
    UtcDatetime(i64),
    Id(Uuid),
}

impl FieldValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns whether this value may be stored in a field of `field_type`.
    ///
    /// `Null` fits every type.
    pub fn fits(&self, field_type: FieldType) -> bool {
        matches!(
            (self, field_type),
            (Self::Null, _)
                | (Self::String(_), FieldType::String)
                | (Self::Integer(_), FieldType::Integer)
                | (Self::Boolean(_), FieldType::Boolean)
                | (Self::UtcDatetime(_), FieldType::UtcDatetime)
                | (Self::Id(_), FieldType::Id)
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<Uuid> {
        match self {
            Self::Id(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<i64> {
        match self {
            Self::UtcDatetime(value) => Some(*value),
            _ => None,
        }
    }
}

/// One field contributed to the host entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub default: FieldValue,
}

impl FieldSpec {
    /// Field whose default is `Null`.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            default: FieldValue::Null,
        }
    }

    pub fn with_default(mut self, default: FieldValue) -> Self {
        self.default = default;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// To-one; the host stores the foreign key.
    BelongsTo,
    /// To-many; the target stores the foreign key.
    HasMany,
}

/// Relation target before or after placeholder rewriting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationTarget {
    /// Symbolic reference resolved during composition.
    Placeholder(String),
    /// Concrete entity type name.
    Entity(String),
}

impl RelationTarget {
    /// Placeholder for the host entity.
    pub fn host() -> Self {
        Self::Placeholder(HOST_PLACEHOLDER.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelationOptions {
    /// Overrides the derived `<name>_id` foreign key.
    pub foreign_key: Option<String>,
}

/// One relation contributed to the host entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSpec {
    pub kind: RelationKind,
    pub name: String,
    pub target: RelationTarget,
    pub options: RelationOptions,
}

impl RelationSpec {
    pub fn belongs_to(name: impl Into<String>, target: RelationTarget) -> Self {
        Self {
            kind: RelationKind::BelongsTo,
            name: name.into(),
            target,
            options: RelationOptions::default(),
        }
    }

    pub fn has_many(name: impl Into<String>, target: RelationTarget) -> Self {
        Self {
            kind: RelationKind::HasMany,
            name: name.into(),
            target,
            options: RelationOptions::default(),
        }
    }

    pub fn with_foreign_key(mut self, foreign_key: impl Into<String>) -> Self {
        self.options.foreign_key = Some(foreign_key.into());
        self
    }

    /// Foreign key column name for this relation.
    pub fn foreign_key(&self) -> String {
        self.options
            .foreign_key
            .clone()
            .unwrap_or_else(|| format!("{}_id", self.name))
    }
}

/// One index over host fields. Field order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub fields: Vec<String>,
    pub unique: bool,
}

impl IndexSpec {
    pub fn unique(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|field| field.to_string()).collect(),
            unique: true,
        }
    }

    pub fn non_unique(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|field| field.to_string()).collect(),
            unique: false,
        }
    }
}
