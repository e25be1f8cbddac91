use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::expr::{Expr, quote_literal};

/// Question types understood by the XLSForm `type` column.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    #[default]
    Text,
    Integer,
    Decimal,
    SelectOne,
    SelectMultiple,
    Date,
    Time,
    Datetime,
    Geopoint,
    Image,
    Audio,
    Barcode,
    Note,
    Calculate,
    Acknowledge,
    Group,
    Repeat,
}

impl QuestionType {
    pub const ALL: [QuestionType; 17] = [
        QuestionType::Text,
        QuestionType::Integer,
        QuestionType::Decimal,
        QuestionType::SelectOne,
        QuestionType::SelectMultiple,
        QuestionType::Date,
        QuestionType::Time,
        QuestionType::Datetime,
        QuestionType::Geopoint,
        QuestionType::Image,
        QuestionType::Audio,
        QuestionType::Barcode,
        QuestionType::Note,
        QuestionType::Calculate,
        QuestionType::Acknowledge,
        QuestionType::Group,
        QuestionType::Repeat,
    ];

    /// Keyword written to the `type` column. Selects and containers get
    /// additional decoration from the encoder.
    pub fn keyword(self) -> &'static str {
        match self {
            QuestionType::Text => "text",
            QuestionType::Integer => "integer",
            QuestionType::Decimal => "decimal",
            QuestionType::SelectOne => "select_one",
            QuestionType::SelectMultiple => "select_multiple",
            QuestionType::Date => "date",
            QuestionType::Time => "time",
            QuestionType::Datetime => "dateTime",
            QuestionType::Geopoint => "geopoint",
            QuestionType::Image => "image",
            QuestionType::Audio => "audio",
            QuestionType::Barcode => "barcode",
            QuestionType::Note => "note",
            QuestionType::Calculate => "calculate",
            QuestionType::Acknowledge => "acknowledge",
            QuestionType::Group => "group",
            QuestionType::Repeat => "repeat",
        }
    }

    /// Parses a type keyword, accepting the common aliases seen in hand-written forms.
    pub fn from_keyword(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace(' ', "_");
        let kind = match normalized.as_str() {
            "text" | "string" => QuestionType::Text,
            "integer" | "int" => QuestionType::Integer,
            "decimal" | "number" | "float" => QuestionType::Decimal,
            "select_one" | "select1" => QuestionType::SelectOne,
            "select_multiple" | "select_many" => QuestionType::SelectMultiple,
            "date" => QuestionType::Date,
            "time" => QuestionType::Time,
            "datetime" => QuestionType::Datetime,
            "geopoint" | "gps" => QuestionType::Geopoint,
            "image" | "photo" => QuestionType::Image,
            "audio" => QuestionType::Audio,
            "barcode" => QuestionType::Barcode,
            "note" => QuestionType::Note,
            "calculate" | "calculation" => QuestionType::Calculate,
            "acknowledge" | "trigger" => QuestionType::Acknowledge,
            "group" => QuestionType::Group,
            "repeat" => QuestionType::Repeat,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_select(self) -> bool {
        matches!(self, QuestionType::SelectOne | QuestionType::SelectMultiple)
    }

    pub fn is_container(self) -> bool {
        matches!(self, QuestionType::Group | QuestionType::Repeat)
    }

    /// Whether the type collects a value from the enumerator.
    pub fn is_answerable(self) -> bool {
        !matches!(
            self,
            QuestionType::Note | QuestionType::Calculate | QuestionType::Group | QuestionType::Repeat
        )
    }

    pub fn requires_label(self) -> bool {
        !matches!(self, QuestionType::Calculate)
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

impl std::str::FromStr for QuestionType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        QuestionType::from_keyword(value).ok_or_else(|| format!("unknown question type '{}'", value))
    }
}

/// Value constraints compiled into the XLSForm `constraint` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Constraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_len: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_len: Option<usize>,
    /// Free-form constraint expression kept verbatim (e.g. from an imported sheet).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Constraint {
    pub fn is_empty(&self) -> bool {
        self.pattern.is_none()
            && self.min.is_none()
            && self.max.is_none()
            && self.min_len.is_none()
            && self.max_len.is_none()
            && self.expression.is_none()
    }

    /// Builds the constraint expression, `.` standing for the current value.
    pub fn to_xpath(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(min) = self.min {
            parts.push(format!(". >= {}", min));
        }
        if let Some(max) = self.max {
            parts.push(format!(". <= {}", max));
        }
        if let Some(min_len) = self.min_len {
            parts.push(format!("string-length(.) >= {}", min_len));
        }
        if let Some(max_len) = self.max_len {
            parts.push(format!("string-length(.) <= {}", max_len));
        }
        if let Some(pattern) = &self.pattern {
            parts.push(format!("regex(., {})", quote_literal(pattern)));
        }
        if let Some(expression) = self.expression.as_deref().map(str::trim)
            && !expression.is_empty()
        {
            if parts.is_empty() {
                parts.push(expression.to_string());
            } else {
                parts.push(format!("({})", expression));
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" and "))
        }
    }
}

/// Choices of a select question are filtered by `column = ${parent}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CascadeSpec {
    pub parent: String,
    pub column: String,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One row of the survey: a question, note, calculation, group, or repeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct QuestionSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice_list: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cascade: Option<CascadeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appearance: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<QuestionSpec>,
}

impl QuestionSpec {
    pub fn new(name: impl Into<String>, kind: QuestionType, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            label: label.into(),
            ..Default::default()
        }
    }

    /// Every answer name this question's expressions and cascade depend on.
    pub fn dependencies(&self) -> std::collections::BTreeSet<String> {
        let mut refs = std::collections::BTreeSet::new();
        if let Some(relevant) = &self.relevant {
            refs.extend(relevant.references());
        }
        if let Some(calculation) = &self.calculation {
            refs.extend(calculation.references());
        }
        if let Some(cascade) = &self.cascade {
            refs.insert(cascade.parent.clone());
        }
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_round_trip_through_parser() {
        for kind in QuestionType::ALL {
            assert_eq!(QuestionType::from_keyword(kind.keyword()), Some(kind));
        }
        assert_eq!(
            QuestionType::from_keyword("begin group"),
            None,
            "block markers are handled by the encoder, not the type parser"
        );
    }

    #[test]
    fn constraint_combines_bounds_and_pattern() {
        let constraint = Constraint {
            min: Some(0.0),
            max: Some(120.0),
            ..Default::default()
        };
        assert_eq!(constraint.to_xpath().as_deref(), Some(". >= 0 and . <= 120"));

        let text = Constraint {
            min_len: Some(2),
            pattern: Some("^[A-Z]+$".into()),
            expression: Some(". != 'XX'".into()),
            ..Default::default()
        };
        assert_eq!(
            text.to_xpath().as_deref(),
            Some("string-length(.) >= 2 and regex(., '^[A-Z]+$') and (. != 'XX')")
        );
        assert!(Constraint::default().to_xpath().is_none());
    }
}
