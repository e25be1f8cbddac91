use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::spec::choices::ChoiceList;
use crate::spec::question::QuestionSpec;

/// Top-level survey definition; maps onto the `survey`, `choices` and
/// `settings` sheets of an XLSForm workbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FormSpec {
    pub id: String,
    pub title: String,
    /// Stamped with a `YYYYMMDDHHMM` timestamp at export time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    #[serde(default)]
    pub questions: Vec<QuestionSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choice_lists: Vec<ChoiceList>,
}

impl FormSpec {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            version: None,
            description: None,
            default_language: None,
            instance_name: None,
            questions: Vec::new(),
            choice_lists: Vec::new(),
        }
    }

    /// All questions in document order, containers before their children.
    pub fn flatten(&self) -> Vec<&QuestionSpec> {
        fn walk<'a>(questions: &'a [QuestionSpec], out: &mut Vec<&'a QuestionSpec>) {
            for question in questions {
                out.push(question);
                walk(&question.children, out);
            }
        }

        let mut out = Vec::new();
        walk(&self.questions, &mut out);
        out
    }

    pub fn find_question(&self, name: &str) -> Option<&QuestionSpec> {
        self.flatten().into_iter().find(|question| question.name == name)
    }

    pub fn find_question_mut(&mut self, name: &str) -> Option<&mut QuestionSpec> {
        fn walk<'a>(questions: &'a mut [QuestionSpec], name: &str) -> Option<&'a mut QuestionSpec> {
            for question in questions {
                if question.name == name {
                    return Some(question);
                }
                if let Some(found) = walk(&mut question.children, name) {
                    return Some(found);
                }
            }
            None
        }

        walk(&mut self.questions, name)
    }

    /// Document-order index of a question.
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.flatten()
            .iter()
            .position(|question| question.name == name)
    }

    pub fn contains_question(&self, name: &str) -> bool {
        self.position_of(name).is_some()
    }

    pub fn choice_list(&self, name: &str) -> Option<&ChoiceList> {
        self.choice_lists.iter().find(|list| list.name == name)
    }

    pub fn choice_list_mut(&mut self, name: &str) -> Option<&mut ChoiceList> {
        self.choice_lists.iter_mut().find(|list| list.name == name)
    }

    /// Sibling list holding a question: the top level or a container's children.
    pub fn container_of_mut(&mut self, name: &str) -> Option<&mut Vec<QuestionSpec>> {
        fn walk<'a>(
            questions: &'a mut Vec<QuestionSpec>,
            name: &str,
        ) -> Option<&'a mut Vec<QuestionSpec>> {
            if questions.iter().any(|question| question.name == name) {
                return Some(questions);
            }
            for question in questions.iter_mut() {
                if let Some(found) = walk(&mut question.children, name) {
                    return Some(found);
                }
            }
            None
        }

        walk(&mut self.questions, name)
    }

    /// Detaches a question (with its children) wherever it sits in the tree.
    pub fn remove_question(&mut self, name: &str) -> Option<QuestionSpec> {
        let container = self.container_of_mut(name)?;
        let index = container.iter().position(|question| question.name == name)?;
        Some(container.remove(index))
    }

    /// Name of the group or repeat directly containing a question.
    pub fn parent_of(&self, name: &str) -> Option<&QuestionSpec> {
        self.flatten().into_iter().find(|candidate| {
            candidate
                .children
                .iter()
                .any(|child| child.name == name)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::question::QuestionType;

    fn nested_form() -> FormSpec {
        let mut household = QuestionSpec::new("household", QuestionType::Group, "Household");
        household.children = vec![
            QuestionSpec::new("members", QuestionType::Integer, "Members"),
            QuestionSpec::new("head", QuestionType::Text, "Head of household"),
        ];
        let mut form = FormSpec::new("census", "Census");
        form.questions = vec![
            QuestionSpec::new("consent", QuestionType::Acknowledge, "Consent"),
            household,
            QuestionSpec::new("notes", QuestionType::Text, "Notes"),
        ];
        form
    }

    #[test]
    fn flatten_walks_children_in_document_order() {
        let form = nested_form();
        let names = form
            .flatten()
            .iter()
            .map(|question| question.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["consent", "household", "members", "head", "notes"]);
        assert_eq!(form.position_of("head"), Some(3));
        assert_eq!(form.parent_of("head").map(|q| q.name.as_str()), Some("household"));
        assert!(form.parent_of("notes").is_none());
    }

    #[test]
    fn remove_question_detaches_nested_child() {
        let mut form = nested_form();
        let removed = form.remove_question("members").expect("member question");
        assert_eq!(removed.kind, QuestionType::Integer);
        assert!(!form.contains_question("members"));
        assert_eq!(form.find_question("household").unwrap().children.len(), 1);
        assert!(form.remove_question("missing").is_none());
    }
}
