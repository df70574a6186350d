//! Record types for the stations stream

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Category derived from a raw record's flags
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    CategoryA,
    CategoryB,
    CategoryC,
}

/// Flags evaluated in this order; the first flag set wins.
pub const CATEGORY_PRECEDENCE: [Category; 3] = [
    Category::CategoryA,
    Category::CategoryB,
    Category::CategoryC,
];

impl Category {
    /// Name of the flag on the raw record, also used as the output label
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::CategoryA => "category_a",
            Category::CategoryB => "category_b",
            Category::CategoryC => "category_c",
        }
    }

    /// Whether this category's flag is set on the record
    pub fn is_flagged(&self, record: &RawEntityRecord) -> bool {
        match self {
            Category::CategoryA => record.category_a,
            Category::CategoryB => record.category_b,
            Category::CategoryC => record.category_c,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw entity record as ingested from the input topic
///
/// Every field except the category flags is required. A missing or `null`
/// flag reads as `false`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawEntityRecord {
    pub entity_id: i64,
    pub direction_id: String,
    pub entity_name: String,
    pub group_name: String,
    pub group_id: i64,
    pub order: i64,
    #[serde(default, deserialize_with = "nullable_flag")]
    pub category_a: bool,
    #[serde(default, deserialize_with = "nullable_flag")]
    pub category_b: bool,
    #[serde(default, deserialize_with = "nullable_flag")]
    pub category_c: bool,
}

fn nullable_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

impl RawEntityRecord {
    /// Derive the record's category from its flags
    ///
    /// Returns `None` when no flag is set. When several flags are set the
    /// earliest entry of [`CATEGORY_PRECEDENCE`] wins.
    pub fn category(&self) -> Option<Category> {
        CATEGORY_PRECEDENCE
            .into_iter()
            .find(|category| category.is_flagged(self))
    }
}

/// Derived record emitted to the output topic
///
/// The output topic doubles as the table changelog, so each derived record
/// is also the table entry `group_id -> category`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DerivedRecord {
    pub group_id: i64,
    pub entity_name: String,
    pub order: i64,
    pub category: Option<Category>,
}

impl From<&RawEntityRecord> for DerivedRecord {
    fn from(raw: &RawEntityRecord) -> Self {
        Self {
            group_id: raw.group_id,
            entity_name: raw.entity_name.clone(),
            order: raw.order,
            category: raw.category(),
        }
    }
}
