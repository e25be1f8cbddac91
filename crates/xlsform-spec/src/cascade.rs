//! Cascading selects: a question whose choices are filtered by the answer
//! to an earlier `select_one`.

use serde_json::Value;
use thiserror::Error;

use crate::spec::{Choice, FormSpec, QuestionSpec, QuestionType, is_filter_column};

/// Resolved dependency between a cascading question and its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeLink {
    pub child: String,
    pub parent: String,
    pub column: String,
    pub child_list: String,
    pub parent_list: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CascadeError {
    #[error("question '{child}' cannot cascade from itself")]
    SelfReference { child: String },
    #[error("question '{child}' cascades from unknown question '{parent}'")]
    UnknownParent { child: String, parent: String },
    #[error("'{column}' cannot be used as the filter column of '{child}'")]
    InvalidFilterColumn { child: String, column: String },
    #[error("question '{child}' must be a select question to cascade")]
    NotSelect { child: String },
    #[error("cascade parent '{parent}' of '{child}' must be a select_one question")]
    ParentNotSelectOne { child: String, parent: String },
    #[error("cascade parent '{parent}' must come before '{child}'")]
    ParentAfterChild { child: String, parent: String },
    #[error("question '{question}' has no usable choice list")]
    MissingChoiceList { question: String },
    #[error("choice '{choice}' in list '{list}' has no '{column}' value for cascade '{child}'")]
    MissingFilterColumn {
        child: String,
        list: String,
        choice: String,
        column: String,
    },
    #[error(
        "choice '{choice}' in list '{list}' filters on '{value}', which is not a choice of '{parent_list}'"
    )]
    UnknownFilterValue {
        child: String,
        list: String,
        choice: String,
        value: String,
        parent_list: String,
    },
}

impl CascadeError {
    /// Question the error is reported against.
    pub fn question(&self) -> &str {
        match self {
            CascadeError::SelfReference { child }
            | CascadeError::UnknownParent { child, .. }
            | CascadeError::NotSelect { child }
            | CascadeError::InvalidFilterColumn { child, .. }
            | CascadeError::ParentNotSelectOne { child, .. }
            | CascadeError::ParentAfterChild { child, .. }
            | CascadeError::MissingFilterColumn { child, .. }
            | CascadeError::UnknownFilterValue { child, .. } => child,
            CascadeError::MissingChoiceList { question } => question,
        }
    }
}

/// The XLSForm `choice_filter` cell for a cascading question.
pub fn choice_filter(question: &QuestionSpec) -> Option<String> {
    question
        .cascade
        .as_ref()
        .map(|cascade| format!("{}=${{{}}}", cascade.column, cascade.parent))
}

/// Checks the cascade declared on `name`. `Ok(None)` when the question does not cascade.
pub fn resolve_cascade(spec: &FormSpec, name: &str) -> Result<Option<CascadeLink>, CascadeError> {
    let Some(question) = spec.find_question(name) else {
        return Ok(None);
    };
    let Some(cascade) = &question.cascade else {
        return Ok(None);
    };
    let child = question.name.clone();

    if cascade.parent == question.name {
        return Err(CascadeError::SelfReference { child });
    }
    if !question.kind.is_select() {
        return Err(CascadeError::NotSelect { child });
    }
    if !is_filter_column(&cascade.column) {
        return Err(CascadeError::InvalidFilterColumn {
            child,
            column: cascade.column.clone(),
        });
    }
    let parent = spec
        .find_question(&cascade.parent)
        .ok_or_else(|| CascadeError::UnknownParent {
            child: child.clone(),
            parent: cascade.parent.clone(),
        })?;
    if parent.kind != QuestionType::SelectOne {
        return Err(CascadeError::ParentNotSelectOne {
            child,
            parent: parent.name.clone(),
        });
    }
    if spec.position_of(&parent.name) > spec.position_of(&question.name) {
        return Err(CascadeError::ParentAfterChild {
            child,
            parent: parent.name.clone(),
        });
    }

    let child_list = question
        .choice_list
        .as_deref()
        .and_then(|list| spec.choice_list(list))
        .ok_or_else(|| CascadeError::MissingChoiceList {
            question: child.clone(),
        })?;
    let parent_list = parent
        .choice_list
        .as_deref()
        .and_then(|list| spec.choice_list(list))
        .ok_or_else(|| CascadeError::MissingChoiceList {
            question: parent.name.clone(),
        })?;

    for choice in &child_list.choices {
        let value = choice
            .filters
            .get(&cascade.column)
            .ok_or_else(|| CascadeError::MissingFilterColumn {
                child: child.clone(),
                list: child_list.name.clone(),
                choice: choice.name.clone(),
                column: cascade.column.clone(),
            })?;
        if !parent_list.contains(value) {
            return Err(CascadeError::UnknownFilterValue {
                child,
                list: child_list.name.clone(),
                choice: choice.name.clone(),
                value: value.clone(),
                parent_list: parent_list.name.clone(),
            });
        }
    }

    Ok(Some(CascadeLink {
        child,
        parent: parent.name.clone(),
        column: cascade.column.clone(),
        child_list: child_list.name.clone(),
        parent_list: parent_list.name.clone(),
    }))
}

/// Every cascade in the form, in document order, or the first broken one.
pub fn resolve_cascades(spec: &FormSpec) -> Result<Vec<CascadeLink>, CascadeError> {
    let mut links = Vec::new();
    for question in spec.flatten() {
        if let Some(link) = resolve_cascade(spec, &question.name)? {
            links.push(link);
        }
    }
    Ok(links)
}

/// All broken cascades, one error per question.
pub fn cascade_errors(spec: &FormSpec) -> Vec<CascadeError> {
    spec.flatten()
        .into_iter()
        .filter_map(|question| resolve_cascade(spec, &question.name).err())
        .collect()
}

/// Names of questions whose choices are filtered by `name`.
pub fn dependents<'a>(spec: &'a FormSpec, name: &str) -> Vec<&'a str> {
    spec.flatten()
        .into_iter()
        .filter(|question| {
            question
                .cascade
                .as_ref()
                .is_some_and(|cascade| cascade.parent == name)
        })
        .map(|question| question.name.as_str())
        .collect()
}

/// Cascade ancestors of `name`, nearest first (e.g. `district -> region -> country`).
pub fn ancestors(spec: &FormSpec, name: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = spec.find_question(name);
    while let Some(question) = current {
        let Some(cascade) = &question.cascade else {
            break;
        };
        if cascade.parent == name || chain.contains(&cascade.parent) {
            break;
        }
        chain.push(cascade.parent.clone());
        current = spec.find_question(&cascade.parent);
    }
    chain
}

/// Choices offered for `question` given the current answers. A cascading
/// question offers nothing until its parent is answered.
pub fn available_choices<'a>(
    spec: &'a FormSpec,
    question: &QuestionSpec,
    answers: &Value,
) -> Vec<&'a Choice> {
    let Some(list) = question
        .choice_list
        .as_deref()
        .and_then(|list| spec.choice_list(list))
    else {
        return Vec::new();
    };
    let Some(cascade) = &question.cascade else {
        return list.choices.iter().collect();
    };
    let parent_value = match answers.get(&cascade.parent) {
        Some(Value::String(text)) if !text.is_empty() => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        _ => return Vec::new(),
    };
    list.choices
        .iter()
        .filter(|choice| choice.filters.get(&cascade.column) == Some(&parent_value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{CascadeSpec, ChoiceList};
    use serde_json::json;

    fn location_form() -> FormSpec {
        let mut country = QuestionSpec::new("country", QuestionType::SelectOne, "Country");
        country.choice_list = Some("countries".into());
        let mut city = QuestionSpec::new("city", QuestionType::SelectOne, "City");
        city.choice_list = Some("cities".into());
        city.cascade = Some(CascadeSpec {
            parent: "country".into(),
            column: "country".into(),
        });

        let mut form = FormSpec::new("locations", "Locations");
        form.questions = vec![country, city];
        form.choice_lists = vec![
            ChoiceList::new(
                "countries",
                vec![Choice::new("ke", "Kenya"), Choice::new("ug", "Uganda")],
            ),
            ChoiceList::new(
                "cities",
                vec![
                    Choice::new("nairobi", "Nairobi").with_filter("country", "ke"),
                    Choice::new("mombasa", "Mombasa").with_filter("country", "ke"),
                    Choice::new("kampala", "Kampala").with_filter("country", "ug"),
                ],
            ),
        ];
        form
    }

    #[test]
    fn resolves_links_and_filter_expression() {
        let form = location_form();
        let links = resolve_cascades(&form).expect("valid cascade");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].parent, "country");
        assert_eq!(links[0].child_list, "cities");
        let city = form.find_question("city").unwrap();
        assert_eq!(choice_filter(city).as_deref(), Some("country=${country}"));
        assert_eq!(dependents(&form, "country"), vec!["city"]);
        assert_eq!(ancestors(&form, "city"), vec!["country".to_string()]);
    }

    #[test]
    fn filters_choices_by_parent_answer() {
        let form = location_form();
        let city = form.find_question("city").unwrap();
        let names = |answers: Value| {
            available_choices(&form, city, &answers)
                .iter()
                .map(|choice| choice.name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(json!({ "country": "ke" })), vec!["nairobi", "mombasa"]);
        assert_eq!(names(json!({ "country": "ug" })), vec!["kampala"]);
        assert!(names(json!({})).is_empty());
    }

    #[test]
    fn rejects_reserved_filter_columns() {
        for column in ["label", "name", "list_name", "bad column"] {
            let mut form = location_form();
            form.questions[1].cascade = Some(CascadeSpec {
                parent: "country".into(),
                column: column.into(),
            });
            assert_eq!(
                resolve_cascade(&form, "city"),
                Err(CascadeError::InvalidFilterColumn {
                    child: "city".into(),
                    column: column.into(),
                })
            );
        }
    }

    #[test]
    fn rejects_parent_declared_after_child() {
        let mut form = location_form();
        form.questions.reverse();
        assert!(matches!(
            resolve_cascades(&form),
            Err(CascadeError::ParentAfterChild { .. })
        ));
    }

    #[test]
    fn rejects_filter_values_missing_from_parent_list() {
        let mut form = location_form();
        form.choice_lists[1]
            .choices
            .push(Choice::new("dodoma", "Dodoma").with_filter("country", "tz"));
        let errors = cascade_errors(&form);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            CascadeError::UnknownFilterValue { value, .. } if value == "tz"
        ));
        assert_eq!(errors[0].question(), "city");
    }

    #[test]
    fn rejects_choices_without_filter_column() {
        let mut form = location_form();
        form.choice_lists[1].choices.push(Choice::new("gulu", "Gulu"));
        assert!(matches!(
            resolve_cascade(&form, "city"),
            Err(CascadeError::MissingFilterColumn { choice, .. }) if choice == "gulu"
        ));
    }
}
