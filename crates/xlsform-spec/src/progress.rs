use serde_json::Value;

use crate::spec::{FormSpec, QuestionSpec, QuestionType};
use crate::visibility::VisibilityMap;

/// Questions that take a top-level answer: answerable leaves outside repeats,
/// plus each repeat as a whole.
fn progress_items(spec: &FormSpec) -> Vec<&QuestionSpec> {
    fn walk<'a>(questions: &'a [QuestionSpec], out: &mut Vec<&'a QuestionSpec>) {
        for question in questions {
            match question.kind {
                QuestionType::Group => walk(&question.children, out),
                QuestionType::Repeat => out.push(question),
                kind if kind.is_answerable() => out.push(question),
                _ => {}
            }
        }
    }

    let mut out = Vec::new();
    walk(&spec.questions, &mut out);
    out
}

pub fn is_answered(answers: &Value, name: &str) -> bool {
    match answers.get(name) {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

/// `(answered, total)` over visible questions.
pub fn answered_count(spec: &FormSpec, answers: &Value, visibility: &VisibilityMap) -> (usize, usize) {
    let visible = progress_items(spec)
        .into_iter()
        .filter(|question| visibility.get(&question.name).copied().unwrap_or(true))
        .collect::<Vec<_>>();
    let answered = visible
        .iter()
        .filter(|question| is_answered(answers, &question.name))
        .count();
    (answered, visible.len())
}

/// First visible question still waiting for an answer.
pub fn next_question(spec: &FormSpec, answers: &Value, visibility: &VisibilityMap) -> Option<String> {
    progress_items(spec)
        .into_iter()
        .filter(|question| visibility.get(&question.name).copied().unwrap_or(true))
        .find(|question| !is_answered(answers, &question.name))
        .map(|question| question.name.clone())
}
