use serde_json::{Map, Value};

use crate::spec::{Constraint, FormSpec, QuestionSpec, QuestionType};
use crate::visibility::VisibilityMap;

/// Generates a JSON schema for the answers object, restricted to visible
/// questions. Group members sit at the top level; repeats become arrays.
pub fn generate(spec: &FormSpec, visibility: &VisibilityMap) -> Value {
    object_schema(spec, &spec.questions, visibility)
}

/// JSON schema of the form definition itself.
pub fn form_schema() -> Value {
    schemars::schema_for!(FormSpec).to_value()
}

fn object_schema(spec: &FormSpec, questions: &[QuestionSpec], visibility: &VisibilityMap) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    collect(spec, questions, visibility, &mut properties, &mut required);

    let mut root = Map::new();
    root.insert("type".into(), Value::String("object".into()));
    root.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        root.insert("required".into(), Value::Array(required));
    }
    Value::Object(root)
}

fn collect(
    spec: &FormSpec,
    questions: &[QuestionSpec],
    visibility: &VisibilityMap,
    properties: &mut Map<String, Value>,
    required: &mut Vec<Value>,
) {
    for question in questions {
        if !visibility.get(&question.name).copied().unwrap_or(true) {
            continue;
        }
        match question.kind {
            QuestionType::Group => {
                collect(spec, &question.children, visibility, properties, required);
            }
            QuestionType::Repeat => {
                let mut schema = Map::new();
                schema.insert("type".into(), Value::String("array".into()));
                schema.insert(
                    "items".into(),
                    object_schema(spec, &question.children, visibility),
                );
                if let Some(count) = question.repeat_count {
                    schema.insert("maxItems".into(), Value::Number(count.into()));
                }
                properties.insert(question.name.clone(), Value::Object(schema));
            }
            QuestionType::Note => {}
            _ => {
                properties.insert(question.name.clone(), question_schema(spec, question));
                if question.required {
                    required.push(Value::String(question.name.clone()));
                }
            }
        }
    }
}

fn question_schema(spec: &FormSpec, question: &QuestionSpec) -> Value {
    let mut schema = Map::new();
    let string = || Value::String("string".into());
    match question.kind {
        QuestionType::Integer => {
            schema.insert("type".into(), Value::String("integer".into()));
        }
        QuestionType::Decimal => {
            schema.insert("type".into(), Value::String("number".into()));
        }
        QuestionType::SelectOne => {
            schema.insert("type".into(), string());
            if let Some(names) = choice_names(spec, question) {
                schema.insert("enum".into(), names);
            }
        }
        QuestionType::SelectMultiple => {
            let mut items = Map::new();
            items.insert("type".into(), string());
            if let Some(names) = choice_names(spec, question) {
                items.insert("enum".into(), names);
            }
            schema.insert("type".into(), Value::String("array".into()));
            schema.insert("items".into(), Value::Object(items));
            schema.insert("uniqueItems".into(), Value::Bool(true));
        }
        QuestionType::Date => {
            schema.insert("type".into(), string());
            schema.insert("format".into(), Value::String("date".into()));
        }
        QuestionType::Time => {
            schema.insert("type".into(), string());
            schema.insert("format".into(), Value::String("time".into()));
        }
        QuestionType::Datetime => {
            schema.insert("type".into(), string());
            schema.insert("format".into(), Value::String("date-time".into()));
        }
        QuestionType::Acknowledge => {
            schema.insert(
                "type".into(),
                Value::Array(vec![Value::String("boolean".into()), string()]),
            );
        }
        _ => {
            schema.insert("type".into(), string());
        }
    }

    if !question.label.is_empty() {
        schema.insert("title".into(), Value::String(question.label.clone()));
    }
    if let Some(hint) = &question.hint {
        schema.insert("description".into(), Value::String(hint.clone()));
    }

    if let Some(Constraint {
        pattern,
        min,
        max,
        min_len,
        max_len,
        ..
    }) = &question.constraint
    {
        if let Some(pattern) = pattern {
            schema.insert("pattern".into(), Value::String(pattern.clone()));
        }
        if let Some(min) = min
            && let Some(num) = number_from_f64(*min)
        {
            schema.insert("minimum".into(), num);
        }
        if let Some(max) = max
            && let Some(num) = number_from_f64(*max)
        {
            schema.insert("maximum".into(), num);
        }
        if let Some(min_len) = min_len {
            schema.insert("minLength".into(), Value::Number((*min_len).into()));
        }
        if let Some(max_len) = max_len {
            schema.insert("maxLength".into(), Value::Number((*max_len).into()));
        }
    }

    if let Some(default_value) = &question.default {
        schema.insert("default".into(), Value::String(default_value.clone()));
    }
    if question.read_only || question.kind == QuestionType::Calculate {
        schema.insert("readOnly".into(), Value::Bool(true));
    }

    Value::Object(schema)
}

fn choice_names(spec: &FormSpec, question: &QuestionSpec) -> Option<Value> {
    let list = spec.choice_list(question.choice_list.as_deref()?)?;
    Some(Value::Array(
        list.choices
            .iter()
            .map(|choice| Value::String(choice.name.clone()))
            .collect(),
    ))
}

fn number_from_f64(value: f64) -> Option<Value> {
    serde_json::Number::from_f64(value).map(Value::Number)
}
