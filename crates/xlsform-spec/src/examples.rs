use regex::Regex;
use serde_json::{Map, Number, Value};

use crate::cascade::available_choices;
use crate::spec::{Constraint, FormSpec, QuestionSpec, QuestionType};
use crate::visibility::VisibilityMap;

/// Sample answers for the visible questions, consistent with cascades and
/// constraint bounds. Useful for trying out an exported form.
pub fn generate(spec: &FormSpec, visibility: &VisibilityMap) -> Value {
    let mut output = Map::new();
    fill(spec, &spec.questions, visibility, &mut output);
    Value::Object(output)
}

fn fill(
    spec: &FormSpec,
    questions: &[QuestionSpec],
    visibility: &VisibilityMap,
    output: &mut Map<String, Value>,
) {
    for question in questions {
        if !visibility.get(&question.name).copied().unwrap_or(true) {
            continue;
        }
        match question.kind {
            QuestionType::Group => fill(spec, &question.children, visibility, output),
            QuestionType::Repeat => {
                let mut entry = Map::new();
                fill(spec, &question.children, visibility, &mut entry);
                output.insert(question.name.clone(), Value::Array(vec![Value::Object(entry)]));
            }
            QuestionType::Note | QuestionType::Calculate => {}
            _ => {
                let answers = Value::Object(output.clone());
                if let Some(value) = example_for(spec, question, &answers) {
                    output.insert(question.name.clone(), value);
                }
            }
        }
    }
}

fn example_for(spec: &FormSpec, question: &QuestionSpec, answers: &Value) -> Option<Value> {
    if let Some(value) = question
        .default
        .as_deref()
        .and_then(|default_value| typed_default(question.kind, default_value))
    {
        return Some(value);
    }
    let constraint = question.constraint.clone().unwrap_or_default();

    let value = match question.kind {
        QuestionType::Text | QuestionType::Barcode => {
            Value::String(example_text(&question.name, &constraint))
        }
        QuestionType::Integer => {
            let lower = constraint.min.map(f64::ceil);
            let upper = constraint.max.map(f64::floor);
            Value::Number(Number::from(clamp(1.0, lower, upper) as i64))
        }
        QuestionType::Decimal => {
            let value = clamp(1.5, constraint.min, constraint.max);
            Value::Number(Number::from_f64(value).unwrap_or_else(|| Number::from(1)))
        }
        QuestionType::SelectOne => {
            let choice = available_choices(spec, question, answers).into_iter().next()?;
            Value::String(choice.name.clone())
        }
        QuestionType::SelectMultiple => {
            let choice = available_choices(spec, question, answers).into_iter().next()?;
            Value::Array(vec![Value::String(choice.name.clone())])
        }
        QuestionType::Date => Value::String("2024-01-31".into()),
        QuestionType::Time => Value::String("09:30".into()),
        QuestionType::Datetime => Value::String("2024-01-31T09:30:00".into()),
        QuestionType::Geopoint => Value::String("0.3476 32.5825 1200 5".into()),
        QuestionType::Image => Value::String(format!("{}.jpg", question.name)),
        QuestionType::Audio => Value::String(format!("{}.m4a", question.name)),
        QuestionType::Acknowledge => Value::String("OK".into()),
        QuestionType::Note | QuestionType::Calculate | QuestionType::Group | QuestionType::Repeat => {
            return None;
        }
    };
    Some(value)
}

/// Defaults are stored as sheet text; answers need the question's JSON type.
fn typed_default(kind: QuestionType, text: &str) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match kind {
        QuestionType::Integer => text.parse::<i64>().ok().map(|value| Value::Number(Number::from(value))),
        QuestionType::Decimal => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        QuestionType::SelectMultiple => Some(Value::Array(
            text.split_whitespace().map(|item| Value::String(item.to_string())).collect(),
        )),
        QuestionType::Note | QuestionType::Calculate | QuestionType::Group | QuestionType::Repeat => None,
        _ => Some(Value::String(text.to_string())),
    }
}

fn clamp(value: f64, lower: Option<f64>, upper: Option<f64>) -> f64 {
    let mut value = value;
    if let Some(upper) = upper
        && value > upper
    {
        value = upper;
    }
    if let Some(lower) = lower
        && value < lower
    {
        value = lower;
    }
    value
}

/// First candidate that satisfies the length bounds and pattern; falls back
/// to a padded placeholder when none does.
fn example_text(name: &str, constraint: &Constraint) -> String {
    let pattern = constraint
        .pattern
        .as_deref()
        .and_then(|pattern| Regex::new(pattern).ok());
    let named = [format!("example-{}", name), name.to_string(), "ABC123".to_string()];
    let repeated = (1..=32).flat_map(|len| ['1', 'a', 'A'].map(|c| c.to_string().repeat(len)));
    let fitted = named
        .into_iter()
        .chain(repeated)
        .map(|candidate| fit_length(&candidate, constraint));
    let mut first = None;
    for text in fitted {
        match &pattern {
            Some(regex) if !regex.is_match(&text) => {
                first.get_or_insert(text);
            }
            _ => return text,
        }
    }
    first.unwrap_or_default()
}

fn fit_length(text: &str, constraint: &Constraint) -> String {
    let mut text = text.to_string();
    if let Some(min_len) = constraint.min_len {
        let last = text.chars().last().unwrap_or('x');
        while text.chars().count() < min_len {
            text.push(last);
        }
    }
    if let Some(max_len) = constraint.max_len {
        text = text.chars().take(max_len).collect();
    }
    text
}
