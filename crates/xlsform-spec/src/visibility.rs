use serde_json::Value;

use crate::spec::{FormSpec, QuestionSpec};

pub type VisibilityMap = std::collections::BTreeMap<String, bool>;

/// How to treat `relevant` expressions that cannot be evaluated locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityMode {
    Visible,
    Hidden,
    Error,
}

/// Evaluates every `relevant` expression; questions inside a hidden group are hidden too.
pub fn resolve_visibility(spec: &FormSpec, answers: &Value, mode: VisibilityMode) -> VisibilityMap {
    let mut map = VisibilityMap::new();
    visit(&spec.questions, answers, mode, true, &mut map);
    map
}

fn visit(
    questions: &[QuestionSpec],
    answers: &Value,
    mode: VisibilityMode,
    parent_visible: bool,
    map: &mut VisibilityMap,
) {
    for question in questions {
        let own = if let Some(expr) = &question.relevant {
            match expr.evaluate(answers) {
                Some(val) => val,
                None => match mode {
                    VisibilityMode::Visible => true,
                    VisibilityMode::Hidden => false,
                    VisibilityMode::Error => true,
                },
            }
        } else {
            true
        };
        let visible = parent_visible && own;
        map.insert(question.name.clone(), visible);
        visit(&question.children, answers, mode, visible, map);
    }
}
