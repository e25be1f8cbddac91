use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::parse::references_in;

/// Expression AST used for `relevant` conditions and calculations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expr {
    LiteralBool { value: bool },
    Literal { value: Value },
    Answer { path: String },
    IsSet { path: String },
    Selected { path: String, value: String },
    Eq { left: Box<Expr>, right: Box<Expr> },
    Ne { left: Box<Expr>, right: Box<Expr> },
    Lt { left: Box<Expr>, right: Box<Expr> },
    Lte { left: Box<Expr>, right: Box<Expr> },
    Gt { left: Box<Expr>, right: Box<Expr> },
    Gte { left: Box<Expr>, right: Box<Expr> },
    And { expressions: Vec<Expr> },
    Or { expressions: Vec<Expr> },
    Not { expression: Box<Expr> },
    /// XPath kept verbatim; never evaluated locally.
    Raw { xpath: String },
}

impl Expr {
    pub fn answer(path: impl Into<String>) -> Self {
        Expr::Answer { path: path.into() }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal {
            value: value.into(),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Expr::Eq {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Shorthand for the common `${name} = 'value'` condition.
    pub fn answer_equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Expr::eq(Expr::answer(path), Expr::literal(value))
    }

    /// Evaluates the expression against a flat answers object.
    ///
    /// Unanswered questions behave like the empty string, as they do on
    /// data-collection clients. `None` means the expression cannot be decided
    /// locally.
    pub fn evaluate(&self, answers: &Value) -> Option<bool> {
        match self {
            Expr::LiteralBool { value } => Some(*value),
            Expr::Literal { value } => Some(truthy(value)),
            Expr::Answer { path } => Some(truthy(&lookup(answers, path))),
            Expr::IsSet { path } => Some(is_set(&lookup(answers, path))),
            Expr::Selected { path, value } => Some(match lookup(answers, path) {
                Value::Array(items) => items.iter().any(|item| display(item) == *value),
                Value::String(text) => text.split_whitespace().any(|item| item == value),
                other => display(&other) == *value,
            }),
            Expr::Eq { left, right } => Some(loose_eq(&left.operand(answers)?, &right.operand(answers)?)),
            Expr::Ne { left, right } => Some(!loose_eq(&left.operand(answers)?, &right.operand(answers)?)),
            Expr::Lt { left, right } => compare(left, right, answers, |ord| ord.is_lt()),
            Expr::Lte { left, right } => compare(left, right, answers, |ord| ord.is_le()),
            Expr::Gt { left, right } => compare(left, right, answers, |ord| ord.is_gt()),
            Expr::Gte { left, right } => compare(left, right, answers, |ord| ord.is_ge()),
            Expr::And { expressions } => {
                for expr in expressions {
                    match expr.evaluate(answers) {
                        Some(true) => continue,
                        Some(false) => return Some(false),
                        None => return None,
                    }
                }
                Some(true)
            }
            Expr::Or { expressions } => {
                let mut undecided = false;
                for expr in expressions {
                    match expr.evaluate(answers) {
                        Some(true) => return Some(true),
                        Some(false) => {}
                        None => undecided = true,
                    }
                }
                if undecided { None } else { Some(false) }
            }
            Expr::Not { expression } => expression.evaluate(answers).map(|value| !value),
            Expr::Raw { .. } => None,
        }
    }

    fn operand(&self, answers: &Value) -> Option<Value> {
        match self {
            Expr::Literal { value } => Some(value.clone()),
            Expr::Answer { path } => Some(lookup(answers, path)),
            other => other.evaluate(answers).map(Value::Bool),
        }
    }

    /// Renders the expression in XLSForm syntax.
    pub fn to_xpath(&self) -> String {
        match self {
            Expr::LiteralBool { value } => {
                if *value {
                    "true()".into()
                } else {
                    "false()".into()
                }
            }
            Expr::Literal { value } => literal_xpath(value),
            Expr::Answer { path } => reference(path),
            Expr::IsSet { path } => format!("{} != ''", reference(path)),
            Expr::Selected { path, value } => {
                format!("selected({}, {})", reference(path), quote_literal(value))
            }
            Expr::Eq { left, right } => binary(left, "=", right),
            Expr::Ne { left, right } => binary(left, "!=", right),
            Expr::Lt { left, right } => binary(left, "<", right),
            Expr::Lte { left, right } => binary(left, "<=", right),
            Expr::Gt { left, right } => binary(left, ">", right),
            Expr::Gte { left, right } => binary(left, ">=", right),
            Expr::And { expressions } => join(expressions, "and", Precedence::And, "true()"),
            Expr::Or { expressions } => join(expressions, "or", Precedence::Or, "false()"),
            Expr::Not { expression } => format!("not({})", expression.to_xpath()),
            Expr::Raw { xpath } => xpath.clone(),
        }
    }

    fn precedence(&self) -> Precedence {
        match self {
            Expr::Raw { .. } => Precedence::Opaque,
            Expr::Or { .. } => Precedence::Or,
            Expr::And { .. } => Precedence::And,
            Expr::IsSet { .. }
            | Expr::Eq { .. }
            | Expr::Ne { .. }
            | Expr::Lt { .. }
            | Expr::Lte { .. }
            | Expr::Gt { .. }
            | Expr::Gte { .. } => Precedence::Comparison,
            _ => Precedence::Atom,
        }
    }

    /// Question names referenced anywhere in the expression.
    pub fn references(&self) -> BTreeSet<String> {
        let mut refs = BTreeSet::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut BTreeSet<String>) {
        match self {
            Expr::Answer { path } | Expr::IsSet { path } | Expr::Selected { path, .. } => {
                refs.insert(path.clone());
            }
            Expr::Eq { left, right }
            | Expr::Ne { left, right }
            | Expr::Lt { left, right }
            | Expr::Lte { left, right }
            | Expr::Gt { left, right }
            | Expr::Gte { left, right } => {
                left.collect_references(refs);
                right.collect_references(refs);
            }
            Expr::And { expressions } | Expr::Or { expressions } => {
                for expr in expressions {
                    expr.collect_references(refs);
                }
            }
            Expr::Not { expression } => expression.collect_references(refs),
            Expr::Raw { xpath } => refs.extend(references_in(xpath)),
            Expr::LiteralBool { .. } | Expr::Literal { .. } => {}
        }
    }

    /// Points every reference to `from` at `to`.
    pub fn rename_reference(&mut self, from: &str, to: &str) {
        match self {
            Expr::Answer { path } | Expr::IsSet { path } | Expr::Selected { path, .. } => {
                if path == from {
                    *path = to.to_string();
                }
            }
            Expr::Eq { left, right }
            | Expr::Ne { left, right }
            | Expr::Lt { left, right }
            | Expr::Lte { left, right }
            | Expr::Gt { left, right }
            | Expr::Gte { left, right } => {
                left.rename_reference(from, to);
                right.rename_reference(from, to);
            }
            Expr::And { expressions } | Expr::Or { expressions } => {
                for expr in expressions {
                    expr.rename_reference(from, to);
                }
            }
            Expr::Not { expression } => expression.rename_reference(from, to),
            Expr::Raw { xpath } => *xpath = xpath.replace(&reference(from), &reference(to)),
            Expr::LiteralBool { .. } | Expr::Literal { .. } => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Opaque,
    Or,
    And,
    Comparison,
    Atom,
}

fn reference(path: &str) -> String {
    format!("${{{}}}", path)
}

/// Quotes a string literal; XPath 1.0 has no escapes, so the quote style
/// switches when the text contains a single quote.
pub fn quote_literal(text: &str) -> String {
    if text.contains('\'') {
        format!("\"{}\"", text)
    } else {
        format!("'{}'", text)
    }
}

fn literal_xpath(value: &Value) -> String {
    match value {
        Value::Null => "''".into(),
        Value::Bool(true) => "true()".into(),
        Value::Bool(false) => "false()".into(),
        Value::Number(number) => number_xpath(number),
        Value::String(text) => quote_literal(text),
        other => quote_literal(&other.to_string()),
    }
}

/// XPath has no exponent notation, so floats are written out in full.
fn number_xpath(number: &serde_json::Number) -> String {
    if number.is_i64() || number.is_u64() {
        return number.to_string();
    }
    match number.as_f64() {
        Some(value) => {
            let text = format!("{}", value);
            if text.contains('.') { text } else { format!("{}.0", text) }
        }
        None => number.to_string(),
    }
}

fn operand_xpath(expr: &Expr) -> String {
    if expr.precedence() == Precedence::Atom {
        expr.to_xpath()
    } else {
        format!("({})", expr.to_xpath())
    }
}

fn binary(left: &Expr, op: &str, right: &Expr) -> String {
    format!("{} {} {}", operand_xpath(left), op, operand_xpath(right))
}

fn join(expressions: &[Expr], op: &str, own: Precedence, empty: &str) -> String {
    if expressions.is_empty() {
        return empty.into();
    }
    expressions
        .iter()
        .map(|expr| {
            if expr.precedence() > own {
                expr.to_xpath()
            } else {
                format!("({})", expr.to_xpath())
            }
        })
        .collect::<Vec<_>>()
        .join(&format!(" {} ", op))
}

fn lookup(answers: &Value, path: &str) -> Value {
    match answers.get(path) {
        Some(Value::Null) | None => Value::String(String::new()),
        Some(value) => value.clone(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// `0` and `false` are answers; only blanks and empty selections are unset.
fn is_set(value: &Value) -> bool {
    match value {
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        other => !display(other).is_empty(),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => a == b,
        _ => display(left) == display(right),
    }
}

fn compare(
    left: &Expr,
    right: &Expr,
    answers: &Value,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> Option<bool> {
    let left = left.operand(answers)?;
    let right = right.operand(answers)?;
    let ordering = match (as_number(&left), as_number(&right)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        // Empty answers never satisfy an ordering, matching client behaviour.
        _ if display(&left).is_empty() || display(&right).is_empty() => None,
        _ => Some(display(&left).cmp(&display(&right))),
    };
    Some(ordering.map(accept).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equality_treats_missing_answers_as_empty() {
        let expr = Expr::answer_equals("consent", "yes");
        assert_eq!(expr.evaluate(&json!({ "consent": "yes" })), Some(true));
        assert_eq!(expr.evaluate(&json!({})), Some(false));
        let not_set = Expr::Ne {
            left: Box::new(Expr::answer("consent")),
            right: Box::new(Expr::literal("yes")),
        };
        assert_eq!(not_set.evaluate(&json!({})), Some(true));
    }

    #[test]
    fn zero_and_false_count_as_answered() {
        let answered = Expr::IsSet { path: "n".into() };
        assert_eq!(answered.evaluate(&json!({ "n": 0 })), Some(true));
        assert_eq!(answered.evaluate(&json!({ "n": false })), Some(true));
        assert_eq!(answered.evaluate(&json!({ "n": "" })), Some(false));
        assert_eq!(answered.evaluate(&json!({ "n": [] })), Some(false));
        assert_eq!(answered.evaluate(&json!({})), Some(false));

        let spelled_out = Expr::Ne {
            left: Box::new(Expr::answer("n")),
            right: Box::new(Expr::literal("")),
        };
        assert_eq!(spelled_out.evaluate(&json!({ "n": 0 })), Some(true));
    }

    #[test]
    fn numeric_comparisons_coerce_strings() {
        let adult = Expr::Gte {
            left: Box::new(Expr::answer("age")),
            right: Box::new(Expr::literal(18)),
        };
        assert_eq!(adult.evaluate(&json!({ "age": 21 })), Some(true));
        assert_eq!(adult.evaluate(&json!({ "age": "17" })), Some(false));
        assert_eq!(adult.evaluate(&json!({})), Some(false));
    }

    #[test]
    fn selected_reads_arrays_and_space_separated_strings() {
        let expr = Expr::Selected {
            path: "crops".into(),
            value: "maize".into(),
        };
        assert_eq!(expr.evaluate(&json!({ "crops": ["beans", "maize"] })), Some(true));
        assert_eq!(expr.evaluate(&json!({ "crops": "beans maize" })), Some(true));
        assert_eq!(expr.evaluate(&json!({ "crops": "beans" })), Some(false));
    }

    #[test]
    fn raw_expressions_are_undecided_inside_and() {
        let expr = Expr::And {
            expressions: vec![
                Expr::LiteralBool { value: true },
                Expr::Raw {
                    xpath: "count-selected(${crops}) > 2".into(),
                },
            ],
        };
        assert_eq!(expr.evaluate(&json!({})), None);
        assert_eq!(
            expr.references().into_iter().collect::<Vec<_>>(),
            vec!["crops".to_string()]
        );
    }

    #[test]
    fn xpath_rendering_parenthesizes_by_precedence() {
        let expr = Expr::And {
            expressions: vec![
                Expr::Or {
                    expressions: vec![
                        Expr::answer_equals("a", "x"),
                        Expr::answer_equals("b", "y"),
                    ],
                },
                Expr::Gt {
                    left: Box::new(Expr::answer("c")),
                    right: Box::new(Expr::literal(3)),
                },
                Expr::Not {
                    expression: Box::new(Expr::IsSet { path: "d".into() }),
                },
            ],
        };
        assert_eq!(
            expr.to_xpath(),
            "(${a} = 'x' or ${b} = 'y') and ${c} > 3 and not(${d} != '')"
        );
    }

    #[test]
    fn tiny_and_huge_numbers_render_without_exponent() {
        let expr = Expr::Lt {
            left: Box::new(Expr::answer("dose")),
            right: Box::new(Expr::literal(0.0000001)),
        };
        assert_eq!(expr.to_xpath(), "${dose} < 0.0000001");
        let expr = Expr::Gt {
            left: Box::new(Expr::answer("area")),
            right: Box::new(Expr::literal(1.5e21)),
        };
        assert_eq!(expr.to_xpath(), "${area} > 1500000000000000000000.0");
    }

    #[test]
    fn rename_reference_updates_nested_and_raw_expressions() {
        let mut expr = Expr::Or {
            expressions: vec![
                Expr::answer_equals("district", "north"),
                Expr::Raw {
                    xpath: "string-length(${district}) > 0".into(),
                },
            ],
        };
        expr.rename_reference("district", "zone");
        assert_eq!(
            expr.to_xpath(),
            "${zone} = 'north' or (string-length(${zone}) > 0)"
        );
    }
}
