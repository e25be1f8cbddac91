use serde_json::{Map, Value, json};

use crate::{
    answers_schema,
    cascade::available_choices,
    progress::{answered_count, next_question},
    spec::{FormSpec, QuestionSpec, QuestionType},
    visibility::{VisibilityMap, VisibilityMode, resolve_visibility},
};

/// Status labels returned by the renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// More input is required.
    NeedInput,
    /// All visible questions are filled.
    Complete,
}

impl RenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStatus::NeedInput => "need_input",
            RenderStatus::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderProgress {
    pub answered: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewChoice {
    pub name: String,
    pub label: String,
}

/// One survey row as shown in a preview.
#[derive(Debug, Clone)]
pub struct PreviewQuestion {
    pub name: String,
    pub label: String,
    pub hint: Option<String>,
    pub kind: QuestionType,
    /// Nesting level inside groups and repeats.
    pub depth: usize,
    pub required: bool,
    pub visible: bool,
    pub relevant: Option<String>,
    pub cascade_parent: Option<String>,
    pub current_value: Option<Value>,
    /// Choices offered for the current answers; `None` for non-select questions.
    pub choices: Option<Vec<PreviewChoice>>,
}

/// Collected payload used by both text and JSON renderers.
#[derive(Debug, Clone)]
pub struct PreviewPayload {
    pub form_id: String,
    pub form_title: String,
    pub form_version: Option<String>,
    pub status: RenderStatus,
    pub next_question_id: Option<String>,
    pub progress: RenderProgress,
    pub help: Option<String>,
    pub questions: Vec<PreviewQuestion>,
    pub schema: Value,
}

/// Builds the preview of a form for the given (possibly empty) answers.
pub fn build_preview(spec: &FormSpec, answers: &Value) -> PreviewPayload {
    let visibility = resolve_visibility(spec, answers, VisibilityMode::Visible);
    let next_question_id = next_question(spec, answers, &visibility);
    let (answered, total) = answered_count(spec, answers, &visibility);

    let mut questions = Vec::new();
    collect_questions(spec, &spec.questions, 0, answers, &visibility, &mut questions);

    let schema = answers_schema::generate(spec, &visibility);

    let status = if next_question_id.is_some() {
        RenderStatus::NeedInput
    } else {
        RenderStatus::Complete
    };

    PreviewPayload {
        form_id: spec.id.clone(),
        form_title: spec.title.clone(),
        form_version: spec.version.clone(),
        status,
        next_question_id,
        progress: RenderProgress { answered, total },
        help: spec.description.clone(),
        questions,
        schema,
    }
}

fn collect_questions(
    spec: &FormSpec,
    questions: &[QuestionSpec],
    depth: usize,
    answers: &Value,
    visibility: &VisibilityMap,
    out: &mut Vec<PreviewQuestion>,
) {
    for question in questions {
        let choices = question.kind.is_select().then(|| {
            available_choices(spec, question, answers)
                .into_iter()
                .map(|choice| PreviewChoice {
                    name: choice.name.clone(),
                    label: choice.label.clone(),
                })
                .collect()
        });
        out.push(PreviewQuestion {
            name: question.name.clone(),
            label: question.label.clone(),
            hint: question.hint.clone(),
            kind: question.kind,
            depth,
            required: question.required,
            visible: visibility.get(&question.name).copied().unwrap_or(true),
            relevant: question.relevant.as_ref().map(|expr| expr.to_xpath()),
            cascade_parent: question.cascade.as_ref().map(|cascade| cascade.parent.clone()),
            current_value: answers.get(&question.name).cloned(),
            choices,
        });
        collect_questions(spec, &question.children, depth + 1, answers, visibility, out);
    }
}

/// Render the payload as a structured JSON-friendly value.
pub fn render_json(payload: &PreviewPayload) -> Value {
    let questions = payload
        .questions
        .iter()
        .map(|question| {
            let mut map = Map::new();
            map.insert("name".into(), Value::String(question.name.clone()));
            map.insert("label".into(), Value::String(question.label.clone()));
            map.insert(
                "hint".into(),
                question.hint.clone().map(Value::String).unwrap_or(Value::Null),
            );
            map.insert("type".into(), Value::String(question.kind.keyword().to_string()));
            map.insert("depth".into(), Value::Number(question.depth.into()));
            map.insert("required".into(), Value::Bool(question.required));
            map.insert("visible".into(), Value::Bool(question.visible));
            if let Some(relevant) = &question.relevant {
                map.insert("relevant".into(), Value::String(relevant.clone()));
            }
            if let Some(parent) = &question.cascade_parent {
                map.insert("cascade_parent".into(), Value::String(parent.clone()));
            }
            if let Some(current_value) = &question.current_value {
                map.insert("current_value".into(), current_value.clone());
            }
            if let Some(choices) = &question.choices {
                map.insert(
                    "choices".into(),
                    Value::Array(
                        choices
                            .iter()
                            .map(|choice| json!({ "name": choice.name, "label": choice.label }))
                            .collect(),
                    ),
                );
            }
            Value::Object(map)
        })
        .collect::<Vec<_>>();

    json!({
        "form_id": payload.form_id,
        "form_title": payload.form_title,
        "form_version": payload.form_version,
        "status": payload.status.as_str(),
        "next_question_id": payload.next_question_id,
        "progress": {
            "answered": payload.progress.answered,
            "total": payload.progress.total,
        },
        "help": payload.help,
        "questions": questions,
        "schema": payload.schema,
    })
}

/// Render the payload as an indented outline.
pub fn render_text(payload: &PreviewPayload) -> String {
    let mut lines = Vec::new();
    lines.push(format!("Form: {} ({})", payload.form_title, payload.form_id));
    if let Some(version) = &payload.form_version {
        lines.push(format!("Version: {}", version));
    }
    lines.push(format!(
        "Status: {} ({}/{})",
        payload.status.as_str(),
        payload.progress.answered,
        payload.progress.total
    ));
    if let Some(help) = &payload.help {
        lines.push(format!("Help: {}", help));
    }

    match &payload.next_question_id {
        Some(next_question) => lines.push(format!("Next question: {}", next_question)),
        None => lines.push("All visible questions are answered.".to_string()),
    }

    lines.push("Questions:".to_string());
    for question in &payload.questions {
        let indent = "  ".repeat(question.depth + 1);
        let marker = if question.visible { "-" } else { "x" };
        let mut entry = format!(
            "{}{} {} [{}] {}",
            indent,
            marker,
            question.name,
            question.kind.keyword(),
            question.label
        );
        if question.required {
            entry.push_str(" *");
        }
        if let Some(current_value) = &question.current_value {
            entry.push_str(&format!(" = {}", value_to_display(current_value)));
        }
        lines.push(entry);
        if let Some(relevant) = &question.relevant {
            lines.push(format!("{}    if {}", indent, relevant));
        }
        if let Some(choices) = &question.choices {
            let names = choices
                .iter()
                .map(|choice| choice.name.as_str())
                .collect::<Vec<_>>();
            let shown = if names.is_empty() {
                match &question.cascade_parent {
                    Some(parent) => format!("(waiting for {})", parent),
                    None => "(none)".to_string(),
                }
            } else {
                names.join(", ")
            };
            lines.push(format!("{}    choices: {}", indent, shown));
        }
    }

    lines.join("\n")
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(num) => num.to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_to_display)
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}
