use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::names::is_valid_name;

/// `choices` sheet columns that a filter key would overwrite.
pub const RESERVED_CHOICE_COLUMNS: [&str; 6] = ["list_name", "name", "label", "image", "audio", "video"];

/// Whether `column` can carry cascade filter values on the choices sheet.
pub fn is_filter_column(column: &str) -> bool {
    is_valid_name(column) && !RESERVED_CHOICE_COLUMNS.contains(&column)
}

/// Single option of a choice list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Choice {
    pub name: String,
    pub label: String,
    /// Extra `choices` sheet columns, used as cascade filter keys.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, String>,
}

impl Choice {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            filters: BTreeMap::new(),
        }
    }

    /// Adds a filter column value, e.g. `country = "ke"` on a city choice.
    pub fn with_filter(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(column.into(), value.into());
        self
    }
}

/// Named list of choices referenced by select questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChoiceList {
    pub name: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl ChoiceList {
    pub fn new(name: impl Into<String>, choices: Vec<Choice>) -> Self {
        Self {
            name: name.into(),
            choices,
        }
    }

    pub fn choice(&self, name: &str) -> Option<&Choice> {
        self.choices.iter().find(|choice| choice.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.choice(name).is_some()
    }
}
