use serde::{Deserialize, Serialize};
use xlsform_spec::{Choice, ChoiceList, ExprSource, QuestionSpec};

/// One user action against the form being built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SessionCommand {
    /// Updates the settings sheet fields that are present; an empty string clears optional ones.
    SetFormMeta {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        version: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        default_language: Option<String>,
        #[serde(default)]
        instance_name: Option<String>,
    },
    /// Inserts a question at the top level or inside the `parent` group/repeat.
    AddQuestion {
        question: QuestionSpec,
        #[serde(default)]
        parent: Option<String>,
        #[serde(default)]
        position: Option<usize>,
    },
    RemoveQuestion {
        name: String,
        #[serde(default)]
        force: bool,
    },
    /// Moves a question to `position` among its siblings.
    MoveQuestion { name: String, position: usize },
    /// Replaces the question with the same name. Containers keep their
    /// children when the replacement has none. Dropping descendants that
    /// other questions use needs `force`.
    UpdateQuestion {
        question: QuestionSpec,
        #[serde(default)]
        force: bool,
    },
    /// Renames a question and every reference to it.
    RenameQuestion { name: String, new_name: String },
    SetRelevant { name: String, relevant: ExprSource },
    ClearRelevant { name: String },
    AddChoiceList { list: ChoiceList },
    RemoveChoiceList { name: String },
    AddChoice {
        list: String,
        choice: Choice,
        #[serde(default)]
        position: Option<usize>,
    },
    RemoveChoice { list: String, name: String },
    SetCascade {
        name: String,
        parent: String,
        column: String,
    },
    ClearCascade { name: String },
    Undo,
}

impl SessionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::SetFormMeta { .. } => "set_form_meta",
            SessionCommand::AddQuestion { .. } => "add_question",
            SessionCommand::RemoveQuestion { .. } => "remove_question",
            SessionCommand::MoveQuestion { .. } => "move_question",
            SessionCommand::UpdateQuestion { .. } => "update_question",
            SessionCommand::RenameQuestion { .. } => "rename_question",
            SessionCommand::SetRelevant { .. } => "set_relevant",
            SessionCommand::ClearRelevant { .. } => "clear_relevant",
            SessionCommand::AddChoiceList { .. } => "add_choice_list",
            SessionCommand::RemoveChoiceList { .. } => "remove_choice_list",
            SessionCommand::AddChoice { .. } => "add_choice",
            SessionCommand::RemoveChoice { .. } => "remove_choice",
            SessionCommand::SetCascade { .. } => "set_cascade",
            SessionCommand::ClearCascade { .. } => "clear_cascade",
            SessionCommand::Undo => "undo",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xlsform_spec::Expr;

    #[test]
    fn relevant_accepts_text_or_tree() {
        let text: SessionCommand = serde_json::from_value(json!({
            "command": "set_relevant",
            "name": "age",
            "relevant": "${consent} = 'yes'"
        }))
        .expect("xpath form");
        assert!(matches!(
            text,
            SessionCommand::SetRelevant { relevant: ExprSource::Xpath(_), .. }
        ));

        let tree: SessionCommand = serde_json::from_value(json!({
            "command": "set_relevant",
            "name": "age",
            "relevant": { "op": "is_set", "path": "consent" }
        }))
        .expect("tree form");
        assert_eq!(
            tree,
            SessionCommand::SetRelevant {
                name: "age".into(),
                relevant: ExprSource::Tree(Expr::IsSet {
                    path: "consent".into()
                }),
            }
        );
    }

    #[test]
    fn optional_fields_default() {
        let command: SessionCommand = serde_json::from_value(json!({
            "command": "add_question",
            "question": { "name": "age", "type": "integer", "label": "Age" }
        }))
        .expect("add question");
        match command {
            SessionCommand::AddQuestion {
                question,
                parent,
                position,
            } => {
                assert_eq!(question.name, "age");
                assert!(parent.is_none());
                assert!(position.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
        let undo: SessionCommand = serde_json::from_value(json!({ "command": "undo" })).expect("undo");
        assert_eq!(undo.name(), "undo");
    }
}
