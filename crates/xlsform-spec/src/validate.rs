use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde_json::{Map, Value};

use crate::answers::{ValidationError, ValidationResult};
use crate::cascade::available_choices;
use crate::spec::{Constraint, FormSpec, QuestionSpec, QuestionType};
use crate::visibility::{VisibilityMode, resolve_visibility};

/// Checks a flat answers object (question name to value) against the form.
/// Repeat answers are arrays of objects keyed by the repeat's children.
pub fn validate(spec: &FormSpec, answers: &Value) -> ValidationResult {
    let visibility = resolve_visibility(spec, answers, VisibilityMode::Visible);
    let answers_map = answers.as_object().cloned().unwrap_or_default();

    let mut errors = Vec::new();
    let mut missing_required = Vec::new();

    check_level(
        spec,
        &spec.questions,
        &answers_map,
        answers,
        "",
        &|name| visibility.get(name).copied().unwrap_or(true),
        &mut errors,
        &mut missing_required,
    );

    let all_ids: std::collections::BTreeSet<_> = spec
        .flatten()
        .into_iter()
        .map(|question| question.name.clone())
        .collect();
    let unknown_fields: Vec<String> = answers_map
        .keys()
        .filter(|key| !all_ids.contains(*key))
        .cloned()
        .collect();

    ValidationResult {
        valid: errors.is_empty() && missing_required.is_empty() && unknown_fields.is_empty(),
        errors,
        missing_required,
        unknown_fields,
    }
}

#[allow(clippy::too_many_arguments)]
fn check_level(
    spec: &FormSpec,
    questions: &[QuestionSpec],
    values: &Map<String, Value>,
    answers: &Value,
    prefix: &str,
    visible: &dyn Fn(&str) -> bool,
    errors: &mut Vec<ValidationError>,
    missing_required: &mut Vec<String>,
) {
    for question in questions {
        if !visible(&question.name) {
            continue;
        }
        let path = format!("{}/{}", prefix, question.name);

        match question.kind {
            QuestionType::Group => {
                check_level(
                    spec,
                    &question.children,
                    values,
                    answers,
                    prefix,
                    visible,
                    errors,
                    missing_required,
                );
            }
            QuestionType::Repeat => match values.get(&question.name) {
                None | Some(Value::Null) => {}
                Some(Value::Array(items)) => {
                    for (index, item) in items.iter().enumerate() {
                        let item_path = format!("{}/{}", path, index);
                        let Some(item_values) = item.as_object() else {
                            errors.push(error_at(
                                question,
                                item_path,
                                "repeat entries must be objects",
                                "type_mismatch",
                            ));
                            continue;
                        };
                        // Relevance inside a repeat entry sees the entry's own answers.
                        let mut scope = answers.as_object().cloned().unwrap_or_default();
                        scope.extend(item_values.clone());
                        let scope = Value::Object(scope);
                        let item_visible = |name: &str| {
                            spec.find_question(name)
                                .and_then(|child| child.relevant.as_ref())
                                .and_then(|expr| expr.evaluate(&scope))
                                .unwrap_or(true)
                        };
                        check_level(
                            spec,
                            &question.children,
                            item_values,
                            &scope,
                            &item_path,
                            &item_visible,
                            errors,
                            missing_required,
                        );
                    }
                }
                Some(_) => errors.push(error_at(
                    question,
                    path,
                    "repeat answers must be an array",
                    "type_mismatch",
                )),
            },
            _ => match values.get(&question.name) {
                None | Some(Value::Null) => {
                    if question.required {
                        missing_required.push(path.trim_start_matches('/').to_string());
                    }
                }
                Some(Value::String(text)) if text.is_empty() => {
                    if question.required {
                        missing_required.push(path.trim_start_matches('/').to_string());
                    }
                }
                Some(value) => {
                    if let Some(error) = validate_value(spec, question, value, answers, &path) {
                        errors.push(error);
                    }
                }
            },
        }
    }
}

fn validate_value(
    spec: &FormSpec,
    question: &QuestionSpec,
    value: &Value,
    answers: &Value,
    path: &str,
) -> Option<ValidationError> {
    if !matches_type(question, value) {
        return Some(error_at(question, path.to_string(), "type mismatch", "type_mismatch"));
    }

    if let Some(constraint) = &question.constraint
        && let Some(error) = enforce_constraint(question, value, constraint, path)
    {
        return Some(error);
    }

    if question.kind.is_select() {
        let allowed = available_choices(spec, question, answers);
        let selected = selected_values(value);
        if let Some(invalid) = selected
            .iter()
            .find(|name| !allowed.iter().any(|choice| choice.name == **name))
        {
            return Some(error_at(
                question,
                path.to_string(),
                &format!("'{}' is not an available choice", invalid),
                "choice_mismatch",
            ));
        }
    }

    None
}

fn selected_values(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        Value::String(text) => text.split_whitespace().map(String::from).collect(),
        Value::Number(number) => vec![number.to_string()],
        _ => Vec::new(),
    }
}

fn matches_type(question: &QuestionSpec, value: &Value) -> bool {
    match question.kind {
        QuestionType::Text | QuestionType::Barcode | QuestionType::Image | QuestionType::Audio => {
            value.is_string()
        }
        QuestionType::Integer => value.is_i64() || value.is_u64(),
        QuestionType::Decimal => value.is_number(),
        QuestionType::SelectOne => value.is_string() || value.is_number(),
        QuestionType::SelectMultiple => {
            value.is_string()
                || value
                    .as_array()
                    .is_some_and(|items| items.iter().all(Value::is_string))
        }
        QuestionType::Date => value
            .as_str()
            .is_some_and(|text| NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()),
        QuestionType::Time => value.as_str().is_some_and(|text| {
            NaiveTime::parse_from_str(text, "%H:%M:%S").is_ok()
                || NaiveTime::parse_from_str(text, "%H:%M").is_ok()
        }),
        QuestionType::Datetime => value.as_str().is_some_and(|text| {
            DateTime::parse_from_rfc3339(text).is_ok()
                || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S").is_ok()
        }),
        QuestionType::Geopoint => value.as_str().is_some_and(is_geopoint),
        QuestionType::Acknowledge => {
            value.is_boolean() || value.as_str().is_some_and(|text| text == "OK")
        }
        QuestionType::Note | QuestionType::Calculate => !value.is_object(),
        QuestionType::Group | QuestionType::Repeat => true,
    }
}

/// `lat lon [altitude [accuracy]]` with latitude/longitude in range.
fn is_geopoint(text: &str) -> bool {
    let parts = text
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<Vec<_>, _>>();
    match parts {
        Ok(parts) if (2..=4).contains(&parts.len()) => {
            (-90.0..=90.0).contains(&parts[0]) && (-180.0..=180.0).contains(&parts[1])
        }
        _ => false,
    }
}

fn enforce_constraint(
    question: &QuestionSpec,
    value: &Value,
    constraint: &Constraint,
    path: &str,
) -> Option<ValidationError> {
    let fail = |default_message: &str, code: &str| {
        let message = constraint
            .message
            .clone()
            .unwrap_or_else(|| default_message.to_string());
        Some(error_at(question, path.to_string(), &message, code))
    };

    if let Some(pattern) = &constraint.pattern
        && let Some(text) = value.as_str()
        && let Ok(regex) = Regex::new(pattern)
        && !regex.is_match(text)
    {
        return fail("value does not match pattern", "pattern_mismatch");
    }

    if let Some(min_len) = constraint.min_len
        && let Some(text) = value.as_str()
        && text.chars().count() < min_len
    {
        return fail("string shorter than min length", "min_length");
    }

    if let Some(max_len) = constraint.max_len
        && let Some(text) = value.as_str()
        && text.chars().count() > max_len
    {
        return fail("string longer than max length", "max_length");
    }

    if let Some(min) = constraint.min
        && let Some(value) = value.as_f64()
        && value < min
    {
        return fail("value below minimum", "min");
    }

    if let Some(max) = constraint.max
        && let Some(value) = value.as_f64()
        && value > max
    {
        return fail("value above maximum", "max");
    }

    None
}

fn error_at(question: &QuestionSpec, path: String, message: &str, code: &str) -> ValidationError {
    ValidationError {
        question_id: Some(question.name.clone()),
        path: Some(path),
        message: message.into(),
        code: Some(code.into()),
    }
}
